//! Page rendering: request model, rasterization pipeline, cache and
//! background scheduling

mod backend;
mod buffer;
mod cache;
mod convert;
mod error;
mod geometry;
mod job;
#[cfg(feature = "pdf")]
mod pdf;
mod renderer;
mod request;
mod scheduler;

pub use backend::{
    Colorspace, PageId, PageInfo, PageProvider, RasterRequest, RawPixmap, Rasterizer,
    RasterizerFactory,
};
pub use buffer::{CodecError, ImageBuffer, ImageFileFormat, PixelFormat};
pub use cache::{CacheKey, CacheStats, RenderCache};
pub use error::{ErrorKind, RasterFailure, RenderError};
pub use geometry::{
    MAX_TILE_COUNT, POINTS_PER_INCH, PixelRect, Point, Rect, Rotation, TileInfo, Transform,
    dimensions_at_dpi, page_to_pixel, pixel_to_page, scale_to_fit, tile_count, tile_grid,
};
pub use job::{CancelFlag, JobEvent, JobId, JobStatus, RenderJob, RenderResult};
#[cfg(feature = "pdf")]
pub use pdf::{MupdfFactory, PdfDocument};
pub use renderer::{MAX_RENDER_PIXELS, ProgressCallback, Renderer};
pub use request::{
    AntiAliasing, Color, ColorMode, Fingerprint, RenderOptions, RenderOptionsBuilder,
    RenderQuality,
};
pub use scheduler::{AsyncRenderer, SchedulerConfig};

/// Render cache budget in megabytes
pub const DEFAULT_CACHE_SIZE_MB: usize = 100;
/// Worker threads for the scheduler; `0` means one per core
pub const DEFAULT_WORKERS: usize = 0;
/// Tile edge length in page-space units
pub const DEFAULT_TILE_SIZE: u32 = 512;
/// Thumbnail bounding box
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 200;
