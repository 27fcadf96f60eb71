use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::{Rgb, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::canvas::{
    composite, Background, CanvasState, CompositeOptions, Layer, Pixel, PixelStore, MAX_CANVAS_DIM,
};

// ============================================================================
// ERRORS
// ============================================================================

/// Failure to read an image or project. The document in memory is never
/// touched when one of these is returned.
#[derive(Debug)]
pub enum LoadError {
    Io(std::io::Error),
    Decode(String),
    InvalidFormat(String),
    TooLarge { width: u32, height: u32 },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "I/O error: {}", e),
            LoadError::Decode(e) => write!(f, "Could not decode image: {}", e),
            LoadError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
            LoadError::TooLarge { width, height } => write!(
                f,
                "Image is {}x{}, larger than the {}x{} limit",
                width, height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
            ),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        LoadError::Io(e)
    }
}

impl From<image::ImageError> for LoadError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::IoError(io) => LoadError::Io(io),
            other => LoadError::Decode(other.to_string()),
        }
    }
}

impl From<Box<bincode::ErrorKind>> for LoadError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        LoadError::InvalidFormat(e.to_string())
    }
}

#[derive(Debug)]
pub enum SaveError {
    Io(std::io::Error),
    Encode(String),
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveError::Io(e) => write!(f, "I/O error: {}", e),
            SaveError::Encode(e) => write!(f, "Encoding error: {}", e),
        }
    }
}

impl std::error::Error for SaveError {}

impl From<std::io::Error> for SaveError {
    fn from(e: std::io::Error) -> Self {
        SaveError::Io(e)
    }
}

impl From<image::ImageError> for SaveError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::IoError(io) => SaveError::Io(io),
            other => SaveError::Encode(other.to_string()),
        }
    }
}

impl From<Box<bincode::ErrorKind>> for SaveError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        SaveError::Encode(e.to_string())
    }
}

// ============================================================================
// RASTER IMPORT / EXPORT
// ============================================================================

/// A decoded image ready to become a document's only layer.
pub struct ImportedImage {
    pub layer: Layer,
    pub width: u32,
    pub height: u32,
}

/// Layer name for an imported file: its stem, or "Background".
pub fn layer_name_for(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("Background")
        .to_string()
}

/// Decode a raster image into one layer holding every nonzero-alpha pixel.
pub fn import_image(path: &Path) -> Result<ImportedImage, LoadError> {
    let img = image::open(path)?.to_rgba8();
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(LoadError::InvalidFormat("image has no pixels".into()));
    }
    if width > MAX_CANVAS_DIM || height > MAX_CANVAS_DIM {
        return Err(LoadError::TooLarge { width, height });
    }

    let mut layer = Layer::new(layer_name_for(path), width, height);
    layer.pixels = PixelStore::from_rgba_image(&img);
    Ok(ImportedImage { layer, width, height })
}

/// Flatten the visible layers with straight alpha, optionally onto a solid
/// background color.
pub fn export_image(state: &CanvasState, background: Option<Rgb<u8>>) -> RgbaImage {
    let opts = CompositeOptions {
        background: background.map_or(Background::Transparent, Background::Solid),
        render_alpha: true,
    };
    composite(&state.layers, state.width, state.height, opts, None)
}

/// Write the flattened image; the format follows the file extension.
pub fn export_png(state: &CanvasState, path: &Path, background: Option<Rgb<u8>>) -> Result<(), SaveError> {
    let img = export_image(state, background);
    img.save(path)?;
    log_info!("Exported {}x{} image to {}", state.width, state.height, path.display());
    Ok(())
}

// ============================================================================
// PXC PROJECT FILE FORMAT
// ============================================================================

const PXC_MAGIC: &str = "PXC1";
/// Maximum number of layers accepted from a project file.
const MAX_LAYERS: usize = 256;

pub fn is_project_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pxc"))
}

#[derive(Serialize, Deserialize)]
struct ProjectFile {
    magic: String,
    width: u32,
    height: u32,
    active_layer_index: usize,
    layers: Vec<LayerData>,
}

#[derive(Serialize, Deserialize)]
struct LayerData {
    name: String,
    visible: bool,
    opacity: u8,
    /// `(x, y, [r, g, b, a])`, sorted row-major so files are reproducible.
    pixels: Vec<(u32, u32, [u8; 4])>,
}

impl LayerData {
    fn from_layer(layer: &Layer) -> Self {
        let mut pixels: Vec<(u32, u32, [u8; 4])> = layer
            .pixels
            .iter()
            .map(|((x, y), p)| (x, y, p.to_rgba().0))
            .collect();
        pixels.sort_unstable_by_key(|&(x, y, _)| (y, x));
        Self {
            name: layer.name.clone(),
            visible: layer.visible,
            opacity: layer.opacity,
            pixels,
        }
    }

    /// Rebuild the layer, skipping out-of-bounds and zero-alpha entries.
    fn into_layer(self, width: u32, height: u32) -> (Layer, usize) {
        let mut layer = Layer::new(self.name, width, height);
        layer.visible = self.visible;
        layer.opacity = self.opacity;
        let mut skipped = 0;
        for (x, y, [r, g, b, a]) in self.pixels {
            if !layer.pixels.put(x, y, Pixel::rgba(r, g, b, a)) {
                skipped += 1;
            }
        }
        (layer, skipped)
    }
}

pub fn save_project(state: &CanvasState, path: &Path) -> Result<(), SaveError> {
    let project = ProjectFile {
        magic: PXC_MAGIC.to_string(),
        width: state.width,
        height: state.height,
        active_layer_index: state.active_layer_index,
        layers: state.layers.iter().map(LayerData::from_layer).collect(),
    };
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, &project)?;
    log_info!("Saved project with {} layer(s) to {}", state.layers.len(), path.display());
    Ok(())
}

pub fn load_project(path: &Path) -> Result<CanvasState, LoadError> {
    let raw = std::fs::read(path)?;
    decode_project(&raw)
}

fn decode_project(raw: &[u8]) -> Result<CanvasState, LoadError> {
    // bincode writes a String as an 8-byte length followed by its bytes.
    if raw.len() < 12 || &raw[8..12] != PXC_MAGIC.as_bytes() {
        return Err(LoadError::InvalidFormat("missing PXC1 header".into()));
    }
    let project: ProjectFile = bincode::deserialize(raw)?;

    let (width, height) = (project.width, project.height);
    if width == 0 || height == 0 {
        return Err(LoadError::InvalidFormat(format!("bad canvas size {}x{}", width, height)));
    }
    if width > MAX_CANVAS_DIM || height > MAX_CANVAS_DIM {
        return Err(LoadError::TooLarge { width, height });
    }
    if project.layers.is_empty() || project.layers.len() > MAX_LAYERS {
        return Err(LoadError::InvalidFormat(format!(
            "layer count {} outside 1..={}",
            project.layers.len(),
            MAX_LAYERS
        )));
    }

    let mut skipped = 0;
    let layers: Vec<Layer> = project
        .layers
        .into_iter()
        .map(|data| {
            let (layer, dropped) = data.into_layer(width, height);
            skipped += dropped;
            layer
        })
        .collect();
    if skipped > 0 {
        log_warn!("Project load: skipped {} invalid pixel entr(ies)", skipped);
    }

    Ok(CanvasState::with_layers(width, height, layers, project.active_layer_index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn export_is_transparent_without_background() {
        let mut state = CanvasState::new(2, 1);
        state.layers[0].pixels.put(0, 0, Pixel::rgba(10, 20, 30, 128));
        let img = export_image(&state, None);
        assert_eq!(img.get_pixel(0, 0), &Rgba([10, 20, 30, 128]));
        assert_eq!(img.get_pixel(1, 0), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn export_flattens_onto_background() {
        let mut state = CanvasState::new(2, 1);
        state.layers[0].pixels.put(0, 0, Pixel::rgba(0, 0, 0, 255));
        let img = export_image(&state, Some(Rgb([255, 255, 255])));
        assert_eq!(img.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(img.get_pixel(1, 0), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn export_skips_hidden_layers() {
        let mut state = CanvasState::new(1, 1);
        state.layers[0].pixels.put(0, 0, Pixel::rgba(9, 9, 9, 255));
        state.layers[0].visible = false;
        assert_eq!(export_image(&state, None).get_pixel(0, 0), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn png_import_names_layer_after_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sprite.png");
        let mut img = RgbaImage::new(3, 2);
        img.put_pixel(1, 1, Rgba([200, 100, 50, 255]));
        img.save(&path).expect("write png");

        let imported = import_image(&path).expect("import");
        assert_eq!((imported.width, imported.height), (3, 2));
        assert_eq!(imported.layer.name, "sprite");
        assert_eq!(imported.layer.pixels.len(), 1);
        assert_eq!(imported.layer.pixels.get(1, 1), Some(Pixel::rgba(200, 100, 50, 255)));
    }

    #[test]
    fn corrupt_image_is_a_load_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").expect("write");
        assert!(matches!(import_image(&path), Err(LoadError::Decode(_))));
        assert!(matches!(import_image(&dir.path().join("missing.png")), Err(LoadError::Io(_))));
    }

    #[test]
    fn project_round_trip_keeps_layers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scene.pxc");
        let mut state = CanvasState::new(4, 3);
        state.layers[0].pixels.put(3, 2, Pixel::rgba(1, 2, 3, 4));
        let mut top = Layer::new("Ink", 4, 3);
        top.opacity = 77;
        top.visible = false;
        top.pixels.put(0, 0, Pixel::rgba(5, 6, 7, 255));
        state.layers.push(top);
        state.active_layer_index = 1;

        save_project(&state, &path).expect("save");
        let loaded = load_project(&path).expect("load");
        assert_eq!((loaded.width, loaded.height), (4, 3));
        assert_eq!(loaded.active_layer_index, 1);
        assert_eq!(loaded.layers, state.layers);
    }

    #[test]
    fn project_with_wrong_magic_is_rejected() {
        let mut raw = bincode::serialize(&ProjectFile {
            magic: "NOPE".into(),
            width: 1,
            height: 1,
            active_layer_index: 0,
            layers: vec![],
        })
        .expect("serialize");
        assert!(matches!(decode_project(&raw), Err(LoadError::InvalidFormat(_))));
        raw.truncate(5);
        assert!(matches!(decode_project(&raw), Err(LoadError::InvalidFormat(_))));
    }

    #[test]
    fn project_drops_invalid_pixels() {
        let raw = bincode::serialize(&ProjectFile {
            magic: PXC_MAGIC.into(),
            width: 2,
            height: 2,
            active_layer_index: 9,
            layers: vec![LayerData {
                name: "x".into(),
                visible: true,
                opacity: 255,
                pixels: vec![(0, 0, [1, 1, 1, 0]), (5, 5, [1, 1, 1, 255]), (1, 1, [1, 1, 1, 255])],
            }],
        })
        .expect("serialize");
        let state = decode_project(&raw).expect("decode");
        assert_eq!(state.layers[0].pixels.len(), 1);
        assert_eq!(state.active_layer_index, 0);
    }

    #[test]
    fn project_extension_check() {
        assert!(is_project_path(Path::new("a/b.PXC")));
        assert!(!is_project_path(Path::new("a/b.png")));
    }
}
