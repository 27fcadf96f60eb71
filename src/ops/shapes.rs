// ============================================================================
// RASTERIZER: lines, brush stamps, rectangles and ellipses on the pixel grid
// ============================================================================
//
// Every function works in signed coordinates so extents may run past the
// canvas while dragging; results are clipped to `0..width` × `0..height`.

use std::collections::HashSet;

use crate::canvas::Coord;

/// Shapes the shape tool can commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ShapeKind {
    #[default]
    Line,
    Rectangle,
    Ellipse,
}

impl ShapeKind {
    pub fn label(&self) -> &'static str {
        match self {
            ShapeKind::Line => "Line",
            ShapeKind::Rectangle => "Rectangle",
            ShapeKind::Ellipse => "Ellipse",
        }
    }
}

// ============================================================================
// LINES
// ============================================================================

/// Integer Bresenham walk from `start` to `end`, both endpoints included.
///
/// The error term starts at `dx - dy`; x steps when `2e > -dy`, y steps when
/// `2e < dx`, so ties are always broken the same way. The major axis steps
/// every iteration, which makes the minor offset at major step `a` equal to
/// `(2·minor·a + major - 1) / (2·major)`. The walk evaluates that directly,
/// so [`BresenhamLine::clipped`] can skip the off-canvas part of a long line.
#[derive(Clone, Debug)]
pub struct BresenhamLine {
    start: (i64, i64),
    sx: i64,
    sy: i64,
    major: i64,
    minor: i64,
    x_major: bool,
    next: i64,
    last: i64,
}

impl BresenhamLine {
    pub fn new(start: (i32, i32), end: (i32, i32)) -> Self {
        let (x0, y0) = (i64::from(start.0), i64::from(start.1));
        let (x1, y1) = (i64::from(end.0), i64::from(end.1));
        let (dx, dy) = ((x1 - x0).abs(), (y1 - y0).abs());
        let x_major = dx >= dy;
        let (major, minor) = if x_major { (dx, dy) } else { (dy, dx) };
        Self {
            start: (x0, y0),
            sx: if x0 < x1 { 1 } else { -1 },
            sy: if y0 < y1 { 1 } else { -1 },
            major,
            minor,
            x_major,
            next: 0,
            last: major,
        }
    }

    /// Restrict the walk to steps whose major coordinate lies on a
    /// `width × height` canvas. Minor coordinates still need clipping.
    pub fn clipped(mut self, width: u32, height: u32) -> Self {
        let (origin, step, extent) = if self.x_major {
            (self.start.0, self.sx, i64::from(width))
        } else {
            (self.start.1, self.sy, i64::from(height))
        };
        let (lo, hi) = if step > 0 {
            (-origin, extent - 1 - origin)
        } else {
            (origin - (extent - 1), origin)
        };
        self.next = self.next.max(lo);
        self.last = self.last.min(hi);
        self
    }

    fn point_at(&self, a: i64) -> (i32, i32) {
        let b = if self.major == 0 {
            0
        } else {
            let num = 2 * i128::from(self.minor) * i128::from(a) + i128::from(self.major) - 1;
            (num / (2 * i128::from(self.major))) as i64
        };
        let (ox, oy) = if self.x_major { (a, b) } else { (b, a) };
        // Every point lies inside the endpoints' bounding box.
        ((self.start.0 + self.sx * ox) as i32, (self.start.1 + self.sy * oy) as i32)
    }
}

impl Iterator for BresenhamLine {
    type Item = (i32, i32);

    fn next(&mut self) -> Option<(i32, i32)> {
        if self.next > self.last {
            return None;
        }
        let p = self.point_at(self.next);
        self.next += 1;
        Some(p)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.last - self.next + 1).unwrap_or(0);
        (n, Some(n))
    }
}

pub fn bresenham_line(start: (i32, i32), end: (i32, i32)) -> BresenhamLine {
    BresenhamLine::new(start, end)
}

// ============================================================================
// CLIPPING + BRUSH
// ============================================================================

pub fn clip_point(x: i32, y: i32, width: u32, height: u32) -> Option<Coord> {
    (x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height).then_some((x as u32, y as u32))
}

/// Keep only the in-bounds points.
pub fn clip<I>(points: I, width: u32, height: u32) -> HashSet<Coord>
where
    I: IntoIterator<Item = (i32, i32)>,
{
    points
        .into_iter()
        .filter_map(|(x, y)| clip_point(x, y, width, height))
        .collect()
}

/// `size × size` block around `(cx, cy)`, starting `(size - 1) / 2` up and
/// left of the center, clipped to the canvas. A size of 0 is treated as 1.
pub fn brush_pixels(cx: i32, cy: i32, size: u32, width: u32, height: u32) -> impl Iterator<Item = Coord> {
    let n = i64::from(size.max(1));
    let offset = (n - 1) / 2;
    let (x0, y0) = (i64::from(cx) - offset, i64::from(cy) - offset);
    let (xs, xe) = (x0.max(0), (x0 + n - 1).min(i64::from(width) - 1));
    let (ys, ye) = (y0.max(0), (y0 + n - 1).min(i64::from(height) - 1));
    (ys..=ye).flat_map(move |y| (xs..=xe).map(move |x| (x as u32, y as u32)))
}

// ============================================================================
// SHAPES
// ============================================================================

/// Force a square extent: both deltas become `max(|dx|, |dy|)` while keeping
/// the direction of each axis relative to `start`. Corners past the `i32`
/// range saturate.
pub fn lock_aspect(start: (i32, i32), end: (i32, i32)) -> (i32, i32) {
    let (sx, sy) = (i64::from(start.0), i64::from(start.1));
    let (ex, ey) = (i64::from(end.0), i64::from(end.1));
    let side = (ex - sx).abs().max((ey - sy).abs());
    let corner = |from: i64, to: i64| {
        let c = if to < from { from - side } else { from + side };
        c.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    };
    (corner(sx, ex), corner(sy, ey))
}

/// Inclusive `lo..=hi` clamped to `0..extent`, empty when they miss.
fn clamp_span(lo: i64, hi: i64, extent: u32) -> std::ops::RangeInclusive<i64> {
    lo.max(0)..=hi.min(i64::from(extent) - 1)
}

/// Axis-aligned rectangle spanned by two corners.
pub fn rectangle_pixels(start: (i32, i32), end: (i32, i32), filled: bool, width: u32, height: u32) -> HashSet<Coord> {
    let (xs, xe) = (i64::from(start.0.min(end.0)), i64::from(start.0.max(end.0)));
    let (ys, ye) = (i64::from(start.1.min(end.1)), i64::from(start.1.max(end.1)));
    let mut out = HashSet::new();
    let on_canvas_x = |x: i64| x >= 0 && x < i64::from(width);
    let on_canvas_y = |y: i64| y >= 0 && y < i64::from(height);

    if filled {
        for y in clamp_span(ys, ye, height) {
            for x in clamp_span(xs, xe, width) {
                out.insert((x as u32, y as u32));
            }
        }
        return out;
    }

    for y in [ys, ye].into_iter().filter(|&y| on_canvas_y(y)) {
        for x in clamp_span(xs, xe, width) {
            out.insert((x as u32, y as u32));
        }
    }
    for x in [xs, xe].into_iter().filter(|&x| on_canvas_x(x)) {
        for y in clamp_span(ys + 1, ye - 1, height) {
            out.insert((x as u32, y as u32));
        }
    }
    out
}

/// Membership test `(dx/rx)² + (dy/ry)² ≤ 1`; a zero radius contributes 0.
/// Only offsets that land on the canvas are visited.
fn filled_ellipse(center: (i32, i32), rx: i64, ry: i64, width: u32, height: u32, out: &mut HashSet<Coord>) {
    let (x0, y0) = (i64::from(center.0), i64::from(center.1));
    let term = |offset: i64, radius: i64| {
        if radius > 0 {
            let t = offset as f64 / radius as f64;
            t * t
        } else {
            0.0
        }
    };
    for y in clamp_span(y0 - ry, y0 + ry, height) {
        let ty = term(y - y0, ry);
        for x in clamp_span(x0 - rx, x0 + rx, width) {
            if term(x - x0, rx) + ty <= 1.0 {
                out.insert((x as u32, y as u32));
            }
        }
    }
}

/// Ellipse centered on `center` with radii `rx`, `ry`.
///
/// The outline is the filled ellipse minus the one shrunk by a pixel on each
/// axis. With a zero radius the outline collapses to the line between the
/// two extreme points.
pub fn ellipse_pixels(center: (i32, i32), rx: i64, ry: i64, filled: bool, width: u32, height: u32) -> HashSet<Coord> {
    let (rx, ry) = (rx.abs(), ry.abs());
    let mut out = HashSet::new();

    if filled {
        filled_ellipse(center, rx, ry, width, height, &mut out);
        return out;
    }

    if rx > 0 && ry > 0 {
        filled_ellipse(center, rx, ry, width, height, &mut out);
        let (rx_in, ry_in) = (rx - 1, ry - 1);
        if rx_in > 0 && ry_in > 0 {
            let mut inner = HashSet::new();
            filled_ellipse(center, rx_in, ry_in, width, height, &mut inner);
            out.retain(|c| !inner.contains(c));
        }
        return out;
    }

    let saturate = |v: i64| v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
    let (x0, y0) = (i64::from(center.0), i64::from(center.1));
    let from = (saturate(x0 - rx), saturate(y0 - ry));
    let to = (saturate(x0 + rx), saturate(y0 + ry));
    clip(bresenham_line(from, to).clipped(width, height), width, height)
}

/// Coordinates a shape drag from `start` to `end` would paint.
///
/// Rectangles span the two points; ellipses are centered on `start` with
/// radii `|end - start|`. Aspect lock applies to rectangles and ellipses.
/// Work is bounded by the canvas, however far the endpoints lie.
pub fn shape_pixels(
    kind: ShapeKind,
    start: (i32, i32),
    end: (i32, i32),
    filled: bool,
    locked: bool,
    width: u32,
    height: u32,
) -> HashSet<Coord> {
    let end = if locked && kind != ShapeKind::Line {
        lock_aspect(start, end)
    } else {
        end
    };
    match kind {
        ShapeKind::Line => clip(bresenham_line(start, end).clipped(width, height), width, height),
        ShapeKind::Rectangle => rectangle_pixels(start, end, filled, width, height),
        ShapeKind::Ellipse => {
            let rx = i64::from(end.0) - i64::from(start.0);
            let ry = i64::from(end.1) - i64::from(start.1);
            ellipse_pixels(start, rx, ry, filled, width, height)
        }
    }
}
