use std::collections::HashSet;
use std::fmt;

use image::Rgb;

use crate::canvas::{apply_paint, CanvasState, Coord, Pixel};
use crate::components::history::PixelDelta;
use crate::ops::shapes::{brush_pixels, bresenham_line, shape_pixels, ShapeKind};
use crate::preview::PreviewPaint;

// ============================================================================
// TOOL CONFIGURATION
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ToolKind {
    #[default]
    Pencil,
    Eraser,
    Fill,
    Shape,
}

impl ToolKind {
    pub fn label(&self) -> &'static str {
        match self {
            ToolKind::Pencil => "Pencil",
            ToolKind::Eraser => "Eraser",
            ToolKind::Fill => "Fill",
            ToolKind::Shape => "Shape",
        }
    }
}

/// Parameters the host supplies with each press.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOptions {
    pub tool: ToolKind,
    pub color: Rgb<u8>,
    pub alpha: u8,
    pub brush_size: u32,
    pub shape: ShapeKind,
    pub fill_shape: bool,
    pub lock_aspect: bool,
}

impl Default for ToolOptions {
    fn default() -> Self {
        Self {
            tool: ToolKind::Pencil,
            color: Rgb([0, 0, 0]),
            alpha: 255,
            brush_size: 1,
            shape: ShapeKind::Line,
            fill_shape: false,
            lock_aspect: false,
        }
    }
}

impl ToolOptions {
    /// The value this tool writes; the eraser writes nothing.
    pub fn paint_value(&self) -> Pixel {
        match self.tool {
            ToolKind::Eraser => Pixel::rgba(0, 0, 0, 0),
            _ => Pixel::new(self.color, self.alpha),
        }
    }

    pub fn preview_paint(&self) -> PreviewPaint {
        match self.tool {
            ToolKind::Eraser => PreviewPaint::Erase,
            _ => PreviewPaint::Color(self.paint_value()),
        }
    }

    /// History label for a stroke made with these options.
    pub fn description(&self) -> String {
        match self.tool {
            ToolKind::Shape => self.shape.label().to_string(),
            other => other.label().to_string(),
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Why a requested edit was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    /// The target layer is hidden.
    LayerNotEditable { index: usize },
    NoSuchLayer { index: usize },
    InvalidSize { width: u32, height: u32 },
}

impl fmt::Display for EditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditError::LayerNotEditable { index } => {
                write!(f, "Layer {} is hidden and cannot be drawn on", index)
            }
            EditError::NoSuchLayer { index } => write!(f, "No layer at index {}", index),
            EditError::InvalidSize { width, height } => {
                write!(f, "Invalid canvas size {}x{}", width, height)
            }
        }
    }
}

impl std::error::Error for EditError {}

/// Check that `index` names a visible layer.
pub fn ensure_editable(canvas: &CanvasState, index: usize) -> Result<(), EditError> {
    match canvas.layers.get(index) {
        None => Err(EditError::NoSuchLayer { index }),
        Some(layer) if !layer.visible => Err(EditError::LayerNotEditable { index }),
        Some(_) => Ok(()),
    }
}

// ============================================================================
// PIXEL WRITES
// ============================================================================

/// Paint one coordinate, honoring blend mode. Returns `(before, after)` when
/// the stored value changed.
pub fn draw_pixel(
    canvas: &mut CanvasState,
    layer_index: usize,
    x: u32,
    y: u32,
    source: Pixel,
) -> Option<(Option<Pixel>, Option<Pixel>)> {
    let before = canvas.layers.get(layer_index)?.pixels.get(x, y);
    let after = apply_paint(source, before, canvas.color_blending);
    canvas
        .set_pixel(layer_index, x, y, after)
        .then_some((before, after))
}

/// Paint every coordinate in `coords` and collect the changes.
pub fn paint_pixels<I>(
    canvas: &mut CanvasState,
    layer_index: usize,
    coords: I,
    source: Pixel,
    description: impl Into<String>,
) -> PixelDelta
where
    I: IntoIterator<Item = Coord>,
{
    let mut delta = PixelDelta::new(layer_index, description);
    for (x, y) in coords {
        if let Some((before, after)) = draw_pixel(canvas, layer_index, x, y, source) {
            delta.record((x, y), before, after);
        }
    }
    delta
}

// ============================================================================
// FLOOD FILL
// ============================================================================

/// 4-connected fill of the region whose stored value equals the seed's
/// (an empty seed matches empty pixels only).
///
/// Nothing happens when the seed already holds `source` and painting it
/// again would not blend, or when erasing an already empty region.
pub fn flood_fill(canvas: &mut CanvasState, layer_index: usize, x: u32, y: u32, source: Pixel) -> PixelDelta {
    let mut delta = PixelDelta::new(layer_index, "Fill");
    let (w, h) = (canvas.width, canvas.height);
    let Some(layer) = canvas.layers.get(layer_index) else {
        return delta;
    };
    if x >= w || y >= h {
        return delta;
    }

    let target = layer.pixels.get(x, y);
    let would_blend = canvas.color_blending && source.alpha > 0 && source.alpha < 255;
    if target == Some(source) && !would_blend {
        return delta;
    }
    if target.is_none() && source.alpha == 0 {
        return delta;
    }

    let wu = w as usize;
    let mut visited = vec![false; wu * h as usize];
    // Packed `y * width + x` indices.
    let mut stack: Vec<u32> = Vec::with_capacity(1024);
    stack.push(y * w + x);

    while let Some(idx) = stack.pop() {
        if visited[idx as usize] {
            continue;
        }
        visited[idx as usize] = true;
        let (cx, cy) = (idx % w, idx / w);

        let current = canvas.layers[layer_index].pixels.get(cx, cy);
        if current != target {
            continue;
        }
        if let Some((before, after)) = draw_pixel(canvas, layer_index, cx, cy, source) {
            delta.record((cx, cy), before, after);
        }

        if cx > 0 {
            stack.push(idx - 1);
        }
        if cx + 1 < w {
            stack.push(idx + 1);
        }
        if cy > 0 {
            stack.push(idx - w);
        }
        if cy + 1 < h {
            stack.push(idx + w);
        }
    }

    delta
}

// ============================================================================
// EYEDROPPER
// ============================================================================

/// Stored value of the topmost visible layer that has a pixel at `(x, y)`.
pub fn pick_color(canvas: &CanvasState, x: u32, y: u32) -> Option<Pixel> {
    canvas
        .layers
        .iter()
        .rev()
        .filter(|l| l.visible)
        .find_map(|l| l.pixels.get(x, y))
}

// ============================================================================
// STROKES
// ============================================================================

/// Pixels swept by a pencil/eraser drag, deduplicated across the stroke.
#[derive(Clone, Debug, Default)]
pub struct FreehandStroke {
    last: Option<(i32, i32)>,
    pixels: HashSet<Coord>,
}

impl FreehandStroke {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the stroke to `(x, y)` and return the coordinates it newly
    /// covers. Leaving the canvas breaks the line; the next in-bounds point
    /// starts a fresh segment.
    pub fn move_to(&mut self, x: i32, y: i32, brush_size: u32, width: u32, height: u32) -> Vec<Coord> {
        let inside = x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height;
        if !inside {
            self.last = None;
            return Vec::new();
        }
        if self.last == Some((x, y)) {
            return Vec::new();
        }

        let from = self.last.unwrap_or((x, y));
        let mut added = Vec::new();
        for (px, py) in bresenham_line(from, (x, y)) {
            for c in brush_pixels(px, py, brush_size, width, height) {
                if self.pixels.insert(c) {
                    added.push(c);
                }
            }
        }
        self.last = Some((x, y));
        added
    }

    pub fn pixels(&self) -> &HashSet<Coord> {
        &self.pixels
    }

    pub fn into_pixels(self) -> HashSet<Coord> {
        self.pixels
    }
}

/// A shape drag anchored at its press point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShapeDrag {
    pub start: (i32, i32),
    pub end: (i32, i32),
}

impl ShapeDrag {
    pub fn new(start: (i32, i32)) -> Self {
        Self { start, end: start }
    }

    pub fn pixels(&self, options: &ToolOptions, width: u32, height: u32) -> HashSet<Coord> {
        shape_pixels(
            options.shape,
            self.start,
            self.end,
            options.fill_shape,
            options.lock_aspect,
            width,
            height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Layer;

    const GREEN: Pixel = Pixel::rgba(0, 255, 0, 255);

    #[test]
    fn fill_empty_layer_covers_everything() {
        let mut canvas = CanvasState::new(3, 3);
        let delta = flood_fill(&mut canvas, 0, 1, 1, GREEN);
        assert_eq!(delta.len(), 9);
        assert!(delta.before.values().all(Option::is_none));
        assert!(delta.after.values().all(|v| *v == Some(GREEN)));
        assert_eq!(canvas.layers[0].pixels.len(), 9);
    }

    #[test]
    fn fill_stops_at_different_pixels() {
        let mut canvas = CanvasState::new(5, 1);
        canvas.layers[0].pixels.put(2, 0, Pixel::rgba(9, 9, 9, 255));
        let delta = flood_fill(&mut canvas, 0, 0, 0, GREEN);
        assert_eq!(delta.len(), 2);
        assert_eq!(canvas.layers[0].pixels.get(3, 0), None);
    }

    #[test]
    fn fill_with_same_value_is_noop() {
        let mut canvas = CanvasState::new(3, 3);
        flood_fill(&mut canvas, 0, 0, 0, GREEN);
        let delta = flood_fill(&mut canvas, 0, 1, 1, GREEN);
        assert!(delta.is_empty());
    }

    #[test]
    fn erase_fill_on_empty_region_is_noop() {
        let mut canvas = CanvasState::new(3, 3);
        let delta = flood_fill(&mut canvas, 0, 1, 1, Pixel::rgba(0, 0, 0, 0));
        assert!(delta.is_empty());
    }

    #[test]
    fn refill_with_partial_alpha_blends_when_enabled() {
        let half = Pixel::rgba(255, 0, 0, 128);
        let mut canvas = CanvasState::new(2, 1);
        canvas.color_blending = true;
        flood_fill(&mut canvas, 0, 0, 0, half);
        let delta = flood_fill(&mut canvas, 0, 0, 0, half);
        assert_eq!(delta.len(), 2);
        assert_eq!(canvas.layers[0].pixels.get(1, 0).map(|p| p.alpha), Some(192));
    }

    #[test]
    fn draw_pixel_blends_over_existing() {
        let mut canvas = CanvasState::new(1, 1);
        canvas.color_blending = true;
        canvas.layers[0].pixels.put(0, 0, Pixel::rgba(0, 0, 255, 128));
        let (before, after) = draw_pixel(&mut canvas, 0, 0, 0, Pixel::rgba(255, 0, 0, 128)).unwrap();
        assert_eq!(before, Some(Pixel::rgba(0, 0, 255, 128)));
        assert_eq!(after, Some(Pixel::rgba(170, 0, 85, 192)));
    }

    #[test]
    fn hidden_layer_is_not_editable() {
        let mut canvas = CanvasState::new(2, 2);
        canvas.layers[0].visible = false;
        assert_eq!(ensure_editable(&canvas, 0), Err(EditError::LayerNotEditable { index: 0 }));
        assert_eq!(ensure_editable(&canvas, 3), Err(EditError::NoSuchLayer { index: 3 }));
    }

    #[test]
    fn eyedropper_takes_topmost_visible() {
        let mut low = Layer::new("low", 2, 2);
        low.pixels.put(0, 0, Pixel::rgba(1, 1, 1, 255));
        let mut high = Layer::new("high", 2, 2);
        high.pixels.put(0, 0, Pixel::rgba(2, 2, 2, 40));
        let mut canvas = CanvasState::with_layers(2, 2, vec![low, high], 0);
        assert_eq!(pick_color(&canvas, 0, 0), Some(Pixel::rgba(2, 2, 2, 40)));
        canvas.layers[1].visible = false;
        assert_eq!(pick_color(&canvas, 0, 0), Some(Pixel::rgba(1, 1, 1, 255)));
        assert_eq!(pick_color(&canvas, 1, 1), None);
    }

    #[test]
    fn freehand_dedupes_and_breaks_outside() {
        let mut stroke = FreehandStroke::new();
        assert_eq!(stroke.move_to(0, 0, 1, 4, 4), vec![(0, 0)]);
        assert_eq!(stroke.move_to(2, 0, 1, 4, 4), vec![(1, 0), (2, 0)]);
        assert!(stroke.move_to(2, 0, 1, 4, 4).is_empty());
        assert!(stroke.move_to(9, 0, 1, 4, 4).is_empty());
        // Re-entering stamps without bridging the gap.
        assert_eq!(stroke.move_to(0, 3, 1, 4, 4), vec![(0, 3)]);
        assert_eq!(stroke.pixels().len(), 4);
    }

    #[test]
    fn freehand_brush_expansion_is_clipped() {
        let mut stroke = FreehandStroke::new();
        let added = stroke.move_to(0, 0, 3, 4, 4);
        assert_eq!(added.len(), 4);
    }

    #[test]
    fn eraser_paints_nothing() {
        let opts = ToolOptions {
            tool: ToolKind::Eraser,
            ..ToolOptions::default()
        };
        assert_eq!(opts.paint_value().alpha, 0);
        assert_eq!(opts.preview_paint(), PreviewPaint::Erase);
    }
}
