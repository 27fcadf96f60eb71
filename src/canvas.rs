use std::collections::HashMap;

use image::{Rgb, Rgba, RgbaImage};
use rayon::prelude::*;

/// Largest supported canvas edge, in pixels.
pub const MAX_CANVAS_DIM: u32 = 2048;

/// Checker tone for cells where `(x + y)` is even.
pub const CHECKER_EVEN: Rgb<u8> = Rgb([224, 224, 224]);
/// Checker tone for cells where `(x + y)` is odd.
pub const CHECKER_ODD: Rgb<u8> = Rgb([240, 240, 240]);

/// Integer pixel coordinate on the canvas.
pub type Coord = (u32, u32);

// ============================================================================
// PIXELS
// ============================================================================

/// A stored pixel: straight (non-premultiplied) color plus its own alpha.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Pixel {
    pub color: Rgb<u8>,
    pub alpha: u8,
}

impl Pixel {
    pub const fn new(color: Rgb<u8>, alpha: u8) -> Self {
        Self { color, alpha }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, alpha: u8) -> Self {
        Self {
            color: Rgb([r, g, b]),
            alpha,
        }
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        let [r, g, b] = self.color.0;
        Rgba([r, g, b, self.alpha])
    }

    pub fn from_rgba(p: Rgba<u8>) -> Self {
        Self::rgba(p[0], p[1], p[2], p[3])
    }
}

/// Parse `#RRGGBB` (leading `#` optional).
pub fn parse_hex_color(s: &str) -> Option<Rgb<u8>> {
    let hex = s.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

pub fn format_hex_color(c: Rgb<u8>) -> String {
    format!("#{:02X}{:02X}{:02X}", c[0], c[1], c[2])
}

// ============================================================================
// BLEND MATH
// ============================================================================

fn to_channel(v: f64) -> u8 {
    v.round_ties_even().clamp(0.0, 255.0) as u8
}

/// Source-over of `fg` onto `bg` in normalized space.
///
/// A zero output alpha yields black at alpha 0, which callers treat as absent.
pub fn blend(fg: Rgb<u8>, fg_alpha: u8, bg: Rgb<u8>, bg_alpha: u8) -> Pixel {
    let fa = fg_alpha as f64 / 255.0;
    let ba = bg_alpha as f64 / 255.0;
    let out_a = fa + ba * (1.0 - fa);
    if out_a <= 0.0 {
        return Pixel::rgba(0, 0, 0, 0);
    }
    let bg_weight = ba * (1.0 - fa);
    let mix = |c: usize| to_channel((fg[c] as f64 * fa + bg[c] as f64 * bg_weight) / out_a);
    Pixel {
        color: Rgb([mix(0), mix(1), mix(2)]),
        alpha: to_channel(out_a * 255.0),
    }
}

/// The value a paint operation leaves behind at one coordinate.
///
/// Blending only happens with `blending` on, a partially transparent source and
/// an existing pixel underneath; otherwise the source replaces the old value.
/// `None` means the coordinate ends up empty.
pub fn apply_paint(source: Pixel, existing: Option<Pixel>, blending: bool) -> Option<Pixel> {
    let applied = match existing {
        Some(under) if blending && source.alpha > 0 && source.alpha < 255 && under.alpha > 0 => {
            blend(source.color, source.alpha, under.color, under.alpha)
        }
        _ => source,
    };
    (applied.alpha > 0).then_some(applied)
}

/// `alpha × opacity / 255`, rounded to nearest.
pub fn effective_alpha(alpha: u8, opacity: u8) -> u8 {
    ((alpha as u32 * opacity as u32 + 127) / 255) as u8
}

// ============================================================================
// PIXEL STORE
// ============================================================================

/// Sparse per-layer pixel map. Absent keys are fully transparent and
/// zero-alpha values are never stored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PixelStore {
    width: u32,
    height: u32,
    pixels: HashMap<Coord, Pixel>,
}

impl PixelStore {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: HashMap::new(),
        }
    }

    /// Build from an RGBA buffer, keeping only pixels with nonzero alpha.
    pub fn from_rgba_image(img: &RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        let pixels: HashMap<Coord, Pixel> = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| {
                (0..width).filter_map(move |x| {
                    let p = *img.get_pixel(x, y);
                    (p[3] > 0).then(|| ((x, y), Pixel::from_rgba(p)))
                })
            })
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut img = RgbaImage::new(self.width, self.height);
        for (&(x, y), p) in &self.pixels {
            img.put_pixel(x, y, p.to_rgba());
        }
        img
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn in_bounds(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }

    pub fn get(&self, x: u32, y: u32) -> Option<Pixel> {
        self.pixels.get(&(x, y)).copied()
    }

    /// Store or clear one coordinate. Returns whether the stored value changed.
    /// Out-of-bounds writes are ignored.
    pub fn set(&mut self, x: u32, y: u32, value: Option<Pixel>) -> bool {
        if !self.in_bounds(x, y) {
            return false;
        }
        match value.filter(|p| p.alpha > 0) {
            Some(p) => self.pixels.insert((x, y), p) != Some(p),
            None => self.pixels.remove(&(x, y)).is_some(),
        }
    }

    pub fn put(&mut self, x: u32, y: u32, pixel: Pixel) -> bool {
        self.set(x, y, Some(pixel))
    }

    pub fn remove(&mut self, x: u32, y: u32) -> Option<Pixel> {
        self.pixels.remove(&(x, y))
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Coord, Pixel)> + '_ {
        self.pixels.iter().map(|(&c, &p)| (c, p))
    }

    /// Number of stored pixels that fall outside a `width × height` canvas.
    pub fn count_outside(&self, width: u32, height: u32) -> usize {
        self.pixels
            .keys()
            .filter(|&&(x, y)| x >= width || y >= height)
            .count()
    }

    /// Change the bounds, dropping pixels that no longer fit. Returns how many
    /// were dropped.
    pub fn crop(&mut self, width: u32, height: u32) -> usize {
        let before = self.pixels.len();
        self.pixels.retain(|&(x, y), _| x < width && y < height);
        self.width = width;
        self.height = height;
        before - self.pixels.len()
    }

    /// Smallest rectangle containing every stored pixel.
    pub fn bounding_box(&self) -> Option<DirtyRect> {
        self.pixels.keys().fold(None, |acc, &(x, y)| {
            Some(match acc {
                Some(rect) => DirtyRect::include(rect, x, y),
                None => DirtyRect::point(x, y),
            })
        })
    }
}

// ============================================================================
// LAYERS
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub name: String,
    pub pixels: PixelStore,
    pub visible: bool,
    /// 0..=255, applied as a multiplier on each pixel's alpha.
    pub opacity: u8,
}

impl Layer {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            pixels: PixelStore::new(width, height),
            visible: true,
            opacity: 255,
        }
    }

    /// Rough heap footprint, used by the history memory budget.
    pub fn memory_size(&self) -> usize {
        let entry = std::mem::size_of::<Coord>() + std::mem::size_of::<Pixel>() + 8;
        self.pixels.len() * entry + self.name.len() + std::mem::size_of::<Self>()
    }
}

// ============================================================================
// BACKGROUND
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Background {
    /// Two-tone checker keyed by absolute `(x + y) % 2`.
    #[default]
    Checkerboard,
    Solid(Rgb<u8>),
    /// Nothing under the layers; used for export.
    Transparent,
}

impl Background {
    pub fn pixel_at(self, x: u32, y: u32) -> Option<Pixel> {
        match self {
            Background::Checkerboard => {
                let tone = if (x + y) % 2 == 0 { CHECKER_EVEN } else { CHECKER_ODD };
                Some(Pixel::new(tone, 255))
            }
            Background::Solid(color) => Some(Pixel::new(color, 255)),
            Background::Transparent => None,
        }
    }
}

// ============================================================================
// COMPOSITOR
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompositeOptions {
    pub background: Background,
    /// When false every stored pixel is treated as opaque before opacity.
    pub render_alpha: bool,
}

impl Default for CompositeOptions {
    fn default() -> Self {
        Self {
            background: Background::Checkerboard,
            render_alpha: true,
        }
    }
}

/// Composite `pixel` (already carrying its effective alpha) over `under`.
fn over(under: Option<Pixel>, pixel: Pixel) -> Option<Pixel> {
    match under {
        Some(base) if pixel.alpha < 255 && base.alpha > 0 => {
            let out = blend(pixel.color, pixel.alpha, base.color, base.alpha);
            (out.alpha > 0).then_some(out)
        }
        _ => Some(pixel),
    }
}

/// Stack visible layers bottom to top at one coordinate.
fn stack_at(layers: &[&Layer], x: u32, y: u32, opts: CompositeOptions) -> Option<Pixel> {
    let mut acc = opts.background.pixel_at(x, y);
    for layer in layers {
        let Some(p) = layer.pixels.get(x, y) else { continue };
        let alpha = if opts.render_alpha { p.alpha } else { 255 };
        let alpha = effective_alpha(alpha, layer.opacity);
        if alpha == 0 {
            continue;
        }
        acc = over(acc, Pixel::new(p.color, alpha));
    }
    acc
}

/// Render the visible layers into a straight-alpha RGBA buffer.
///
/// With `region`, only that rectangle (clamped to the canvas) is computed and
/// the returned buffer has the region's size; the caller pastes it at
/// `(region.min_x, region.min_y)`.
pub fn composite(
    layers: &[Layer],
    width: u32,
    height: u32,
    opts: CompositeOptions,
    region: Option<DirtyRect>,
) -> RgbaImage {
    let full = DirtyRect::full(width, height);
    let Some(rect) = region.unwrap_or(full).clamp(width, height) else {
        return RgbaImage::new(0, 0);
    };

    let visible: Vec<&Layer> = layers
        .iter()
        .filter(|l| l.visible && l.opacity > 0 && !l.pixels.is_empty())
        .collect();

    let mut out = RgbaImage::new(rect.width(), rect.height());
    let row_len = rect.width() as usize * 4;

    out.par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(row_idx, row)| {
            let y = rect.min_y + row_idx as u32;
            for (col, px) in row.chunks_exact_mut(4).enumerate() {
                let x = rect.min_x + col as u32;
                if let Some(p) = stack_at(&visible, x, y, opts) {
                    px.copy_from_slice(&p.to_rgba().0);
                }
            }
        });

    out
}

// ============================================================================
// DIRTY TRACKING
// ============================================================================

/// Pixel-aligned rectangle; `max_x` / `max_y` are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DirtyRect {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl DirtyRect {
    pub fn new(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn point(x: u32, y: u32) -> Self {
        Self::new(x, y, x + 1, y + 1)
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn include(self, x: u32, y: u32) -> Self {
        Self::new(
            self.min_x.min(x),
            self.min_y.min(y),
            self.max_x.max(x + 1),
            self.max_y.max(y + 1),
        )
    }

    pub fn union(self, other: Self) -> Self {
        Self::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Intersect with the canvas; `None` when nothing is left.
    pub fn clamp(self, width: u32, height: u32) -> Option<Self> {
        let r = Self::new(
            self.min_x,
            self.min_y,
            self.max_x.min(width),
            self.max_y.min(height),
        );
        (r.min_x < r.max_x && r.min_y < r.max_y).then_some(r)
    }

    pub fn width(&self) -> u32 {
        self.max_x.saturating_sub(self.min_x)
    }

    pub fn height(&self) -> u32 {
        self.max_y.saturating_sub(self.min_y)
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
    }
}

/// What a redraw had to recompute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Invalidation {
    Full,
    Region(DirtyRect),
}

/// Last composited frame plus the pending damage since it was produced.
#[derive(Default)]
pub struct DirtyCache {
    cached: Option<RgbaImage>,
    dirty: Option<DirtyRect>,
    force_full: bool,
}

impl DirtyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&mut self, x: u32, y: u32) {
        self.dirty = Some(match self.dirty {
            Some(rect) => rect.include(x, y),
            None => DirtyRect::point(x, y),
        });
    }

    pub fn mark_rect(&mut self, rect: DirtyRect) {
        self.dirty = Some(match self.dirty {
            Some(existing) => existing.union(rect),
            None => rect,
        });
    }

    pub fn force_full(&mut self) {
        self.force_full = true;
    }

    /// Drop the cached frame entirely (new document, resize).
    pub fn invalidate(&mut self) {
        self.cached = None;
        self.dirty = None;
        self.force_full = true;
    }

    pub fn dirty_rect(&self) -> Option<DirtyRect> {
        self.dirty
    }

    /// What the next [`resolve`](Self::resolve) will recompute.
    pub fn pending(&self) -> Option<Invalidation> {
        if self.force_full || self.cached.is_none() {
            Some(Invalidation::Full)
        } else {
            self.dirty.map(Invalidation::Region)
        }
    }

    pub fn cached(&self) -> Option<&RgbaImage> {
        self.cached.as_ref()
    }

    /// Bring the cached frame up to date, reading the pending state as it is
    /// now. Returns what was recomputed (`None` when the cache was reused).
    pub fn resolve(
        &mut self,
        layers: &[Layer],
        width: u32,
        height: u32,
        opts: CompositeOptions,
    ) -> (Option<Invalidation>, &RgbaImage) {
        let stale = self
            .cached
            .as_ref()
            .is_none_or(|img| img.dimensions() != (width, height));

        let outcome = if self.force_full || stale {
            self.cached = Some(composite(layers, width, height, opts, None));
            self.force_full = false;
            self.dirty = None;
            Some(Invalidation::Full)
        } else if let Some(rect) = self.dirty.take()
            && let Some(clamped) = rect.clamp(width, height)
            && let Some(frame) = self.cached.as_mut()
        {
            let patch = composite(layers, width, height, opts, Some(clamped));
            image::imageops::replace(frame, &patch, clamped.min_x as i64, clamped.min_y as i64);
            Some(Invalidation::Region(clamped))
        } else {
            None
        };

        let frame = self
            .cached
            .get_or_insert_with(|| RgbaImage::new(width, height));
        (outcome, frame)
    }
}

// ============================================================================
// CANVAS STATE
// ============================================================================

/// Layer stack, canvas size, view options and the composite cache of one
/// document.
pub struct CanvasState {
    pub width: u32,
    pub height: u32,
    /// Bottom to top. Never empty.
    pub layers: Vec<Layer>,
    pub active_layer_index: usize,
    pub cache: DirtyCache,
    pub background: Background,
    pub render_alpha: bool,
    /// Source-over blending for partially transparent paint.
    pub color_blending: bool,
}

impl CanvasState {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_layers(width, height, vec![Layer::new("Layer 1", width, height)], 0)
    }

    /// Adopt an existing layer list; an empty list gets one blank layer.
    pub fn with_layers(width: u32, height: u32, mut layers: Vec<Layer>, active: usize) -> Self {
        if layers.is_empty() {
            layers.push(Layer::new("Layer 1", width, height));
        }
        let active_layer_index = active.min(layers.len() - 1);
        Self {
            width,
            height,
            layers,
            active_layer_index,
            cache: DirtyCache::new(),
            background: Background::Checkerboard,
            render_alpha: true,
            color_blending: false,
        }
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.layers.get(self.active_layer_index)
    }

    pub fn active_layer_mut(&mut self) -> Option<&mut Layer> {
        self.layers.get_mut(self.active_layer_index)
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    pub fn composite_options(&self) -> CompositeOptions {
        CompositeOptions {
            background: self.background,
            render_alpha: self.render_alpha,
        }
    }

    /// Write one pixel into a layer, marking it dirty when the value changed.
    pub fn set_pixel(&mut self, layer_index: usize, x: u32, y: u32, value: Option<Pixel>) -> bool {
        let Some(layer) = self.layers.get_mut(layer_index) else {
            return false;
        };
        let changed = layer.pixels.set(x, y, value);
        if changed {
            self.cache.mark_dirty(x, y);
        }
        changed
    }

    pub fn mark_dirty(&mut self, x: u32, y: u32) {
        self.cache.mark_dirty(x, y);
    }

    pub fn mark_full(&mut self) {
        self.cache.force_full();
    }

    pub fn composite(&self, region: Option<DirtyRect>) -> RgbaImage {
        composite(&self.layers, self.width, self.height, self.composite_options(), region)
    }

    /// Resolve the cache and hand back the up-to-date frame.
    pub fn render(&mut self) -> (Option<Invalidation>, &RgbaImage) {
        let opts = self.composite_options();
        self.cache.resolve(&self.layers, self.width, self.height, opts)
    }
}
