//! Layered pixel-art canvas engine: sparse per-layer pixel storage,
//! source-over blending, dirty-region compositing, reversible history,
//! chunked stroke previews and a headless op-script CLI.

#[macro_use]
pub mod logger;

pub mod canvas;
pub mod cli;
pub mod components;
pub mod io;
pub mod ops;
pub mod preview;
pub mod project;
pub mod scheduler;
pub mod settings;

pub use canvas::{CanvasState, Layer, Pixel, PixelStore};
pub use project::{Document, Notification};
