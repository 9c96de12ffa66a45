//! Page rendering orchestration: render requests, a synchronous renderer,
//! a shared size-bounded image cache and a background job scheduler over a
//! pluggable rasterization primitive.

pub mod render;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use render::{
    AsyncRenderer, ImageBuffer, PageId, PixelFormat, RenderCache, RenderError, RenderJob,
    RenderOptions, Renderer,
};
pub use settings::Settings;
