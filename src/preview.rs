//! Live stroke preview.
//!
//! While a stroke is in progress its pixels are not written to any layer.
//! They are queued here and rendered, a tick at a time, into small overlay
//! chunks that show what the canvas will look like once the stroke commits.

use std::collections::{HashMap, HashSet};

use image::{Rgba, RgbaImage};

use crate::canvas::{apply_paint, effective_alpha, Background, CanvasState, Coord, Pixel};

pub const PREVIEW_CHUNK_SIZE: u32 = 32;

/// What the in-progress stroke puts down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviewPaint {
    Color(Pixel),
    Erase,
}

/// One overlay tile. Pixels outside the stroke stay fully transparent.
#[derive(Clone, Debug)]
pub struct PreviewChunk {
    /// Canvas coordinate of the chunk's top-left pixel.
    pub origin: Coord,
    pub image: RgbaImage,
}

pub struct PreviewRenderer {
    chunk_size: u32,
    chunks: HashMap<Coord, PreviewChunk>,
    pending: HashSet<Coord>,
    /// Chunks dropped by `replace` since the last render.
    removed: HashSet<Coord>,
}

impl Default for PreviewRenderer {
    fn default() -> Self {
        Self::new(PREVIEW_CHUNK_SIZE)
    }
}

impl PreviewRenderer {
    pub fn new(chunk_size: u32) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunks: HashMap::new(),
            pending: HashSet::new(),
            removed: HashSet::new(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn queue<I: IntoIterator<Item = Coord>>(&mut self, coords: I) {
        self.pending.extend(coords);
    }

    /// Start over with a new candidate set (shape drags change the whole
    /// footprint on every move). The old chunks are reported by the next
    /// [`PreviewRenderer::render_pending`] even if nothing lands in them.
    pub fn replace<I: IntoIterator<Item = Coord>>(&mut self, coords: I) {
        self.removed.extend(self.chunks.drain().map(|(key, _)| key));
        self.pending.clear();
        self.pending.extend(coords);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.chunks.is_empty()
    }

    /// Drop every chunk and anything still queued.
    pub fn discard(&mut self) {
        self.chunks.clear();
        self.pending.clear();
        self.removed.clear();
    }

    pub fn chunks(&self) -> impl Iterator<Item = &PreviewChunk> {
        self.chunks.values()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk(&self, key: Coord) -> Option<&PreviewChunk> {
        self.chunks.get(&key)
    }

    /// Rendered preview color at a canvas coordinate, if any. Coordinates
    /// past the canvas edge have none.
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        let key = (x / self.chunk_size, y / self.chunk_size);
        let chunk = self.chunks.get(&key)?;
        let p = *chunk.image.get_pixel_checked(x - chunk.origin.0, y - chunk.origin.1)?;
        (p[3] > 0).then_some(p)
    }

    /// Render everything queued so far. Returns the keys of the chunks that
    /// changed in row-major order: re-rendered chunks plus chunks dropped by
    /// `replace`. A returned key with no [`PreviewRenderer::chunk`] is gone.
    pub fn render_pending(&mut self, canvas: &CanvasState, paint: PreviewPaint) -> Vec<Coord> {
        let size = self.chunk_size;
        let mut touched: HashSet<Coord> = self.removed.drain().collect();

        for (x, y) in self.pending.drain() {
            if x >= canvas.width || y >= canvas.height {
                continue;
            }
            let key = (x / size, y / size);
            let chunk = self.chunks.entry(key).or_insert_with(|| {
                let origin = (key.0 * size, key.1 * size);
                let w = size.min(canvas.width - origin.0);
                let h = size.min(canvas.height - origin.1);
                PreviewChunk {
                    origin,
                    image: RgbaImage::new(w, h),
                }
            });
            let value = preview_pixel(canvas, x, y, paint);
            chunk.image.put_pixel(x - chunk.origin.0, y - chunk.origin.1, value);
            touched.insert(key);
        }

        let mut keys: Vec<Coord> = touched.into_iter().collect();
        keys.sort_by_key(|&(cx, cy)| (cy, cx));
        keys
    }
}

/// Mix one stored pixel over an opaque running color.
fn mix_over(rgb: &mut [f64; 3], pixel: Pixel, opacity: u8, render_alpha: bool) {
    let alpha = if render_alpha { pixel.alpha } else { 255 };
    let alpha = effective_alpha(alpha, opacity);
    if alpha == 0 {
        return;
    }
    let t = alpha as f64 / 255.0;
    for (c, channel) in rgb.iter_mut().enumerate() {
        *channel = pixel.color[c] as f64 * t + *channel * (1.0 - t);
    }
}

/// Opaque color of `(x, y)` if the stroke were committed: layers under the
/// active one, then the painted value, then the layers above.
pub fn preview_pixel(canvas: &CanvasState, x: u32, y: u32, paint: PreviewPaint) -> Rgba<u8> {
    let background = match canvas.background {
        Background::Transparent => Background::Checkerboard,
        other => other,
    };
    let base = background
        .pixel_at(x, y)
        .map_or([255, 255, 255], |p| p.color.0);
    let mut rgb = base.map(|c| c as f64);
    let active = canvas.active_layer_index;

    for layer in canvas.layers.iter().take(active).filter(|l| l.visible) {
        if let Some(p) = layer.pixels.get(x, y) {
            mix_over(&mut rgb, p, layer.opacity, canvas.render_alpha);
        }
    }

    if let (PreviewPaint::Color(source), Some(layer)) = (paint, canvas.layers.get(active)) {
        let existing = layer.pixels.get(x, y);
        if let Some(applied) = apply_paint(source, existing, canvas.color_blending) {
            mix_over(&mut rgb, applied, layer.opacity, canvas.render_alpha);
        }
    }

    for layer in canvas.layers.iter().skip(active + 1).filter(|l| l.visible) {
        if let Some(p) = layer.pixels.get(x, y) {
            mix_over(&mut rgb, p, layer.opacity, canvas.render_alpha);
        }
    }

    let [r, g, b] = rgb.map(|c| c.round().clamp(0.0, 255.0) as u8);
    Rgba([r, g, b, 255])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Layer;
    use image::Rgb;

    fn two_layer_canvas() -> CanvasState {
        let mut below = Layer::new("below", 40, 40);
        below.pixels.put(1, 1, Pixel::rgba(0, 0, 255, 255));
        let mut above = Layer::new("above", 40, 40);
        above.pixels.put(2, 2, Pixel::rgba(0, 255, 0, 255));
        let mut canvas = CanvasState::with_layers(40, 40, vec![below, Layer::new("active", 40, 40), above], 1);
        canvas.background = Background::Solid(Rgb([255, 255, 255]));
        canvas
    }

    #[test]
    fn paint_lands_between_layers() {
        let canvas = two_layer_canvas();
        let red = PreviewPaint::Color(Pixel::rgba(255, 0, 0, 255));
        assert_eq!(preview_pixel(&canvas, 1, 1, red), Rgba([255, 0, 0, 255]));
        // The layer above still covers the stroke.
        assert_eq!(preview_pixel(&canvas, 2, 2, red), Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn eraser_reveals_layers_below() {
        let mut canvas = two_layer_canvas();
        canvas.layers[1].pixels.put(1, 1, Pixel::rgba(255, 0, 0, 255));
        assert_eq!(preview_pixel(&canvas, 1, 1, PreviewPaint::Erase), Rgba([0, 0, 255, 255]));
        assert_eq!(preview_pixel(&canvas, 5, 5, PreviewPaint::Erase), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn half_alpha_mixes_with_background() {
        let canvas = two_layer_canvas();
        let paint = PreviewPaint::Color(Pixel::rgba(0, 0, 0, 128));
        let p = preview_pixel(&canvas, 10, 10, paint);
        assert_eq!(p, Rgba([127, 127, 127, 255]));
    }

    #[test]
    fn render_pending_fills_only_touched_chunks() {
        let canvas = two_layer_canvas();
        let mut preview = PreviewRenderer::default();
        preview.queue([(0, 0), (1, 0), (33, 34), (90, 90)]);
        let touched = preview.render_pending(&canvas, PreviewPaint::Color(Pixel::rgba(255, 0, 0, 255)));
        assert_eq!(touched, vec![(0, 0), (1, 1)]);
        assert!(!preview.has_pending());
        assert_eq!(preview.pixel_at(1, 0), Some(Rgba([255, 0, 0, 255])));
        assert_eq!(preview.pixel_at(2, 0), None);

        // Edge chunk is clipped to the canvas.
        let edge = preview.chunks().find(|c| c.origin == (32, 32)).map(|c| c.image.dimensions());
        assert_eq!(edge, Some((8, 8)));

        preview.discard();
        assert!(preview.is_idle());
    }

    #[test]
    fn replace_resets_chunks() {
        let canvas = two_layer_canvas();
        let mut preview = PreviewRenderer::new(8);
        preview.queue([(0, 0)]);
        preview.render_pending(&canvas, PreviewPaint::Erase);
        preview.replace([(20, 20)]);
        assert_eq!(preview.chunk_count(), 0);
        assert_eq!(preview.pending_len(), 1);
    }

    #[test]
    fn shrinking_footprint_reports_vanished_chunks() {
        let canvas = two_layer_canvas();
        let mut preview = PreviewRenderer::new(8);
        preview.queue([(0, 0), (20, 20)]);
        assert_eq!(preview.render_pending(&canvas, PreviewPaint::Erase), vec![(0, 0), (2, 2)]);

        preview.replace([(1, 1)]);
        let changed = preview.render_pending(&canvas, PreviewPaint::Erase);
        assert_eq!(changed, vec![(0, 0), (2, 2)]);
        assert!(preview.chunk((0, 0)).is_some());
        assert!(preview.chunk((2, 2)).is_none());

        // Reported once only.
        assert!(preview.render_pending(&canvas, PreviewPaint::Erase).is_empty());
    }

    #[test]
    fn pixel_past_clipped_edge_chunk_is_none() {
        let canvas = two_layer_canvas();
        let mut preview = PreviewRenderer::default();
        preview.queue([(33, 33)]);
        preview.render_pending(&canvas, PreviewPaint::Color(Pixel::rgba(255, 0, 0, 255)));
        assert!(preview.pixel_at(33, 33).is_some());
        assert_eq!(preview.pixel_at(45, 33), None);
        assert_eq!(preview.pixel_at(33, 63), None);
    }
}
