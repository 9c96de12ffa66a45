//! Page-space / pixel-space geometry
//!
//! Page-space has its origin at the bottom-left corner of the page and is
//! measured in points (1/72 inch). Pixel-space has its origin at the top-left
//! corner of the rendered image and is measured in pixels.

/// Points per inch in page-space.
pub const POINTS_PER_INCH: f32 = 72.0;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle. In page-space `(x0, y0)` is the bottom-left corner.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    #[must_use]
    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Rectangle covering a whole page of the given size.
    #[must_use]
    pub const fn from_size(width: f32, height: f32) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    #[must_use]
    pub fn area(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.x0.is_finite() && self.y0.is_finite() && self.x1.is_finite() && self.y1.is_finite()
    }

    /// Overlapping region of two rectangles; empty if they do not overlap.
    #[must_use]
    pub fn intersect(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        }
    }
}

/// Quarter-turn page rotation, clockwise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Clockwise180,
    Clockwise270,
}

impl Rotation {
    #[must_use]
    pub const fn degrees(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Clockwise90 => 90,
            Self::Clockwise180 => 180,
            Self::Clockwise270 => 270,
        }
    }

    /// Parse a rotation in degrees; only multiples of 90 are accepted.
    #[must_use]
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Self::None),
            90 => Some(Self::Clockwise90),
            180 => Some(Self::Clockwise180),
            270 => Some(Self::Clockwise270),
            _ => None,
        }
    }

    /// Whether the rendered image has width and height swapped
    #[must_use]
    pub const fn is_sideways(self) -> bool {
        matches!(self, Self::Clockwise90 | Self::Clockwise270)
    }
}

/// Integer pixel rectangle in pixel-space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Snap fractional pixel bounds to the pixel grid.
    ///
    /// Each edge is rounded on its own, so two regions sharing an edge in
    /// page-space also share it in pixel-space.
    #[must_use]
    pub fn round_from(bounds: &Rect) -> Self {
        let x0 = bounds.x0.round() as i32;
        let y0 = bounds.y0.round() as i32;
        let x1 = bounds.x1.round() as i32;
        let y1 = bounds.y1.round() as i32;
        Self {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0).max(0) as u32,
            height: y1.saturating_sub(y0).max(0) as u32,
        }
    }

    #[must_use]
    pub const fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Affine transform, PDF convention:
/// `x' = a*x + c*y + e`, `y' = b*x + d*y + f`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Transform {
    pub const IDENTITY: Self = Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0);

    #[must_use]
    pub const fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// Transform taking page-space of a `width` x `height` page to the
    /// pixel-space of its rendering at `scale` pixels per point, rotated
    /// clockwise by `rotation`.
    ///
    /// The whole page always lands in `[0, W] x [0, H]` where `W`, `H` are
    /// the scaled (and, for quarter turns, swapped) page dimensions.
    #[must_use]
    pub fn page_to_pixel(width: f32, height: f32, scale: f32, rotation: Rotation) -> Self {
        let s = scale;
        match rotation {
            Rotation::None => Self::new(s, 0.0, 0.0, -s, 0.0, height * s),
            Rotation::Clockwise90 => Self::new(0.0, s, s, 0.0, 0.0, 0.0),
            Rotation::Clockwise180 => Self::new(-s, 0.0, 0.0, s, width * s, 0.0),
            Rotation::Clockwise270 => Self::new(0.0, -s, -s, 0.0, height * s, width * s),
        }
    }

    #[must_use]
    pub fn apply(&self, p: Point) -> Point {
        Point {
            x: self.a * p.x + self.c * p.y + self.e,
            y: self.b * p.x + self.d * p.y + self.f,
        }
    }

    /// Bounding box of the transformed rectangle.
    #[must_use]
    pub fn map_rect(&self, r: &Rect) -> Rect {
        let corners = [
            self.apply(Point::new(r.x0, r.y0)),
            self.apply(Point::new(r.x1, r.y0)),
            self.apply(Point::new(r.x0, r.y1)),
            self.apply(Point::new(r.x1, r.y1)),
        ];
        let mut out = Rect::new(f32::MAX, f32::MAX, f32::MIN, f32::MIN);
        for c in corners {
            out.x0 = out.x0.min(c.x);
            out.y0 = out.y0.min(c.y);
            out.x1 = out.x1.max(c.x);
            out.y1 = out.y1.max(c.y);
        }
        out
    }

    #[must_use]
    pub fn invert(&self) -> Option<Self> {
        let det = self.a * self.d - self.b * self.c;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(Self {
            a,
            b,
            c,
            d,
            e: -(a * self.e + c * self.f),
            f: -(b * self.e + d * self.f),
        })
    }
}

/// Convert a page-space point to pixel-space at `dpi`, flipping the Y axis.
#[must_use]
pub fn page_to_pixel(point: Point, dpi: f32, page_height: f32) -> Point {
    let scale = dpi / POINTS_PER_INCH;
    Point {
        x: point.x * scale,
        y: (page_height - point.y) * scale,
    }
}

/// Inverse of [`page_to_pixel`].
#[must_use]
pub fn pixel_to_page(point: Point, dpi: f32, page_height: f32) -> Point {
    let scale = POINTS_PER_INCH / dpi;
    Point {
        x: point.x * scale,
        y: page_height - point.y * scale,
    }
}

/// Exact scale that fits a page into `max_width` x `max_height`, no margin.
#[must_use]
pub fn scale_to_fit(page_width: f32, page_height: f32, max_width: f32, max_height: f32) -> f32 {
    (max_width / page_width).min(max_height / page_height)
}

/// Pixel dimensions of a page rendered at `dpi`.
#[must_use]
pub fn dimensions_at_dpi(page_width: f32, page_height: f32, dpi: f32) -> (u32, u32) {
    let scale = dpi / POINTS_PER_INCH;
    (
        (page_width * scale).round().max(0.0) as u32,
        (page_height * scale).round().max(0.0) as u32,
    )
}

/// One cell of a page's tile grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileInfo {
    pub tile_x: u32,
    pub tile_y: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    /// Page-space area covered, clipped to the page for the last row/column
    pub page_rect: Rect,
}

/// Largest grid [`tile_grid`] will build.
pub const MAX_TILE_COUNT: u64 = 1 << 20;

/// Number of tiles covering a page; `None` for degenerate inputs.
#[must_use]
pub fn tile_count(page_width: f32, page_height: f32, tile_width: u32, tile_height: u32) -> Option<u64> {
    if tile_width == 0 || tile_height == 0 || !(page_width > 0.0) || !(page_height > 0.0) {
        return None;
    }
    let cols = (page_width / tile_width as f32).ceil() as u64;
    let rows = (page_height / tile_height as f32).ceil() as u64;
    Some(cols.saturating_mul(rows))
}

/// Split a page into a grid of `tile_width` x `tile_height` tiles.
///
/// Tiles are returned row by row, left column first. Row 0 starts at
/// page-space `y = 0`. Returns an empty grid for degenerate inputs and for
/// grids of more than [`MAX_TILE_COUNT`] tiles.
#[must_use]
pub fn tile_grid(page_width: f32, page_height: f32, tile_width: u32, tile_height: u32) -> Vec<TileInfo> {
    let count = match tile_count(page_width, page_height, tile_width, tile_height) {
        Some(count) if count <= MAX_TILE_COUNT => count,
        _ => return Vec::new(),
    };

    let tw = tile_width as f32;
    let th = tile_height as f32;
    let cols = (page_width / tw).ceil() as u32;
    let rows = (page_height / th).ceil() as u32;

    let mut tiles = Vec::with_capacity(count as usize);
    for row in 0..rows {
        for col in 0..cols {
            let x0 = col as f32 * tw;
            let y0 = row as f32 * th;
            tiles.push(TileInfo {
                tile_x: col,
                tile_y: row,
                tile_width,
                tile_height,
                page_rect: Rect::new(x0, y0, (x0 + tw).min(page_width), (y0 + th).min(page_height)),
            });
        }
    }
    tiles
}
