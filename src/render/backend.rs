//! Seams to the document model and the rasterization primitive
//!
//! The rendering core never interprets page content. A [`PageProvider`]
//! answers questions about page geometry and a [`Rasterizer`] turns a page
//! region into raw samples. Rasterizers are not assumed to be thread-safe
//! or even movable between threads: every thread that renders creates its
//! own instance through a [`RasterizerFactory`].

use super::error::{RasterFailure, RenderError};
use super::geometry::{PixelRect, Rect, Rotation, Transform};
use super::request::{AntiAliasing, Color};

/// Arena-style page handle, resolved by a [`PageProvider`]. Also the page
/// half of a cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub usize);

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page {}", self.0)
    }
}

/// Page geometry as reported by the document model
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageInfo {
    /// Width in page-space units (points)
    pub width: f32,
    /// Height in page-space units (points)
    pub height: f32,
    /// Intrinsic rotation, used when a request does not override it
    pub rotation: Rotation,
}

impl PageInfo {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            rotation: Rotation::None,
        }
    }

    #[must_use]
    pub const fn rotated(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    #[must_use]
    pub const fn bounds(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }
}

/// The document/page model the renderer draws from.
pub trait PageProvider: Send + Sync {
    fn page_count(&self) -> usize;

    /// Geometry of `page`, or `None` if the handle is not valid.
    fn page_info(&self, page: PageId) -> Option<PageInfo>;

    fn page_ids(&self) -> Vec<PageId> {
        (0..self.page_count()).map(PageId).collect()
    }

    /// Resolve `page`, failing with `InvalidArgument` for unknown or
    /// degenerate pages.
    fn resolve(&self, page: PageId) -> Result<PageInfo, RenderError> {
        let info = self
            .page_info(page)
            .ok_or_else(|| RenderError::invalid(format!("invalid page handle: {page}")))?;
        if !(info.width.is_finite() && info.height.is_finite() && info.width > 0.0 && info.height > 0.0) {
            return Err(RenderError::invalid(format!(
                "{page} has degenerate size {}x{}",
                info.width, info.height
            )));
        }
        Ok(info)
    }
}

/// Colour model of raw rasterizer output
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Colorspace {
    Gray,
    Rgb,
    Cmyk,
}

impl Colorspace {
    #[must_use]
    pub const fn components(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Rgb => 3,
            Self::Cmyk => 4,
        }
    }
}

/// One call into the rasterization primitive.
#[derive(Clone, Debug)]
pub struct RasterRequest {
    pub page: PageId,
    pub page_info: PageInfo,
    /// Page-space to pixel-space of the full rendered page
    pub transform: Transform,
    /// Pixel-space region to produce; sample (0, 0) is this rect's origin
    pub target: PixelRect,
    pub colorspace: Colorspace,
    pub alpha: bool,
    pub anti_aliasing: AntiAliasing,
    pub background: Color,
    pub render_annotations: bool,
    pub render_forms: bool,
}

/// Raw samples produced by a [`Rasterizer`].
///
/// Each pixel is `n` bytes: the colorspace components followed by alpha when
/// requested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawPixmap {
    pub width: u32,
    pub height: u32,
    pub n: usize,
    pub stride: usize,
    pub samples: Vec<u8>,
}

impl RawPixmap {
    /// Check the pixmap matches what `request` asked for.
    pub fn check_against(&self, request: &RasterRequest) -> Result<(), RasterFailure> {
        let expected_n = request.colorspace.components() + usize::from(request.alpha);
        if self.width != request.target.width || self.height != request.target.height {
            return Err(RasterFailure::new(format!(
                "rasterizer returned {}x{} pixels for a {}x{} target",
                self.width, self.height, request.target.width, request.target.height
            )));
        }
        if self.n != expected_n {
            return Err(RasterFailure::new(format!(
                "rasterizer returned {} channels, expected {expected_n}",
                self.n
            )));
        }
        let row_bytes = self.width as usize * self.n;
        if self.stride < row_bytes || self.samples.len() < self.stride * self.height as usize {
            return Err(RasterFailure::new("rasterizer buffer size mismatch"));
        }
        Ok(())
    }

    #[must_use]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.samples[start..start + self.width as usize * self.n]
    }
}

/// Rasterization primitive bound to the thread that created it.
pub trait Rasterizer {
    fn rasterize(&mut self, request: &RasterRequest) -> Result<RawPixmap, RasterFailure>;
}

/// Creates a fresh [`Rasterizer`] for each rendering thread.
pub trait RasterizerFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Rasterizer>, RenderError>;
}

impl<F> RasterizerFactory for F
where
    F: Fn() -> Result<Box<dyn Rasterizer>, RenderError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn Rasterizer>, RenderError> {
        self()
    }
}
