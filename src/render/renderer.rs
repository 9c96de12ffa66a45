//! Synchronous page renderer

use std::sync::Arc;
use std::time::Instant;

use log::{debug, trace, warn};

use super::backend::{
    Colorspace, PageId, PageInfo, PageProvider, RasterRequest, Rasterizer, RasterizerFactory,
};
use super::cache::RenderCache;
use super::convert;
use super::error::RenderError;
use super::geometry::{self, PixelRect, Rotation, TileInfo, Transform, POINTS_PER_INCH};
use super::job::{CancelFlag, RenderResult};
use super::request::{AntiAliasing, ColorMode, RenderOptions};

/// Largest image a single render may produce. Bigger outputs must be tiled.
pub const MAX_RENDER_PIXELS: u64 = 1 << 28;

/// Batch progress hook: `(current, total, message)`. Called before each
/// unit of work; returning `false` stops the batch.
pub type ProgressCallback<'a> = &'a mut dyn FnMut(usize, usize, &str) -> bool;

/// Everything needed to ask the rasterizer for one region
struct RasterPlan;

impl RasterPlan {
    fn compute(page: PageId, info: &PageInfo, options: &RenderOptions) -> Result<RasterRequest, RenderError> {
        let rotation = options.rotation().unwrap_or(info.rotation);
        let transform = Transform::page_to_pixel(info.width, info.height, options.scale(), rotation);

        let region = match options.clip() {
            Some(clip) => {
                let region = clip.intersect(&info.bounds());
                if region.is_empty() {
                    return Err(RenderError::invalid(format!(
                        "clip rectangle {clip:?} does not intersect {page}"
                    )));
                }
                region
            }
            None => info.bounds(),
        };

        let target = PixelRect::round_from(&transform.map_rect(&region));
        if target.is_empty() {
            return Err(RenderError::invalid(format!(
                "{page} renders to an empty image at {} dpi",
                options.dpi()
            )));
        }
        if target.pixel_count() > MAX_RENDER_PIXELS {
            return Err(RenderError::invalid(format!(
                "{page} at {} dpi needs {}x{} pixels; render it in tiles",
                options.dpi(),
                target.width,
                target.height
            )));
        }

        let colorspace = match options.color_mode() {
            ColorMode::Rgb => Colorspace::Rgb,
            ColorMode::Cmyk => Colorspace::Cmyk,
            ColorMode::Grayscale | ColorMode::Monochrome => Colorspace::Gray,
        };

        Ok(RasterRequest {
            page,
            page_info: *info,
            transform,
            target,
            colorspace,
            alpha: options.render_transparent(),
            anti_aliasing: options.anti_aliasing(),
            background: options.background(),
            render_annotations: options.render_annotations(),
            render_forms: options.render_forms(),
        })
    }
}

/// Page size as displayed under `rotation`
fn display_size(info: &PageInfo, rotation: Rotation) -> (f32, f32) {
    if rotation.is_sideways() {
        (info.height, info.width)
    } else {
        (info.width, info.height)
    }
}

/// Renders pages of one document on the calling thread.
///
/// A renderer owns one rasterizer context and must not be shared between
/// threads; give each thread its own renderer and share the
/// [`RenderCache`] instead.
pub struct Renderer {
    provider: Arc<dyn PageProvider>,
    rasterizer: Box<dyn Rasterizer>,
    cache: Arc<RenderCache>,
}

impl Renderer {
    #[must_use]
    pub fn new(
        provider: Arc<dyn PageProvider>,
        rasterizer: Box<dyn Rasterizer>,
        cache: Arc<RenderCache>,
    ) -> Self {
        Self {
            provider,
            rasterizer,
            cache,
        }
    }

    /// Build a renderer with a fresh rasterizer context from `factory`
    pub fn from_factory(
        provider: Arc<dyn PageProvider>,
        factory: &dyn RasterizerFactory,
        cache: Arc<RenderCache>,
    ) -> Result<Self, RenderError> {
        Ok(Self::new(provider, factory.create()?, cache))
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn PageProvider> {
        &self.provider
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<RenderCache> {
        &self.cache
    }

    /// Render `page` as described by `options`.
    ///
    /// Served from the cache when an identical request was rendered before.
    /// Never returns a partial image.
    pub fn render(&mut self, page: PageId, options: &RenderOptions) -> RenderResult {
        self.render_observed(page, options, &CancelFlag::new(), &mut |_| {})
    }

    /// [`render`](Self::render) that gives up with `Cancelled` when `cancel`
    /// is set before or right after the rasterizer call, and reports
    /// progress in `[0, 1]`.
    pub fn render_observed(
        &mut self,
        page: PageId,
        options: &RenderOptions,
        cancel: &CancelFlag,
        progress: &mut dyn FnMut(f32),
    ) -> RenderResult {
        cancel.check()?;
        let info = self.provider.resolve(page)?;
        let fingerprint = options.fingerprint();

        if let Some(hit) = self.cache.get(page, fingerprint) {
            trace!("Cache hit for {page} [{fingerprint}]");
            progress(1.0);
            return Ok(hit);
        }

        let started = Instant::now();
        let request = RasterPlan::compute(page, &info, options)?;
        progress(0.1);
        cancel.check()?;

        let raw = self.rasterizer.rasterize(&request).map_err(|e| {
            warn!("Rasterizing {page} failed: {e}");
            RenderError::from(e)
        })?;
        raw.check_against(&request)?;
        progress(0.8);

        // The primitive call is not interruptible; drop its output here.
        cancel.check()?;

        let image = Arc::new(convert::to_image_buffer(
            &raw,
            request.colorspace,
            request.alpha,
            options.color_mode(),
            options.pixel_format(),
        ));
        self.cache.put(page, fingerprint, Arc::clone(&image));

        debug!(
            "Rendered {page} [{fingerprint}] at {} dpi: {}x{} {:?} in {:?}",
            options.dpi(),
            image.width(),
            image.height(),
            image.format(),
            started.elapsed()
        );
        Ok(image)
    }

    /// Render into a caller-provided buffer. Returns the number of bytes
    /// written (`stride * height` of the rendered image).
    pub fn render_to_buffer(
        &mut self,
        page: PageId,
        options: &RenderOptions,
        out: &mut [u8],
    ) -> Result<usize, RenderError> {
        let image = self.render(page, options)?;
        let size = image.size();
        if size > out.len() {
            return Err(RenderError::invalid(format!(
                "output buffer holds {} bytes, image needs {size}",
                out.len()
            )));
        }
        out[..size].copy_from_slice(image.data());
        Ok(size)
    }

    /// Render at `options.dpi()` scaled by the mean of `scale_x`/`scale_y`
    pub fn render_scaled(
        &mut self,
        page: PageId,
        scale_x: f32,
        scale_y: f32,
        options: &RenderOptions,
    ) -> RenderResult {
        let scaled = options.with_dpi(options.dpi() * (scale_x + scale_y) / 2.0)?;
        self.render(page, &scaled)
    }

    /// Render at the largest resolution that fits `width` x `height`
    pub fn render_to_size(
        &mut self,
        page: PageId,
        width: u32,
        height: u32,
        options: &RenderOptions,
    ) -> RenderResult {
        let info = self.provider.resolve(page)?;
        let (page_w, page_h) = display_size(&info, options.rotation().unwrap_or(info.rotation));
        let scale = geometry::scale_to_fit(page_w, page_h, width as f32, height as f32);
        let sized = options.with_dpi(POINTS_PER_INCH * scale)?;
        self.render(page, &sized)
    }

    /// Small preview bounded by `max_width` x `max_height`. Without
    /// `maintain_aspect` the page is scaled to fill the width.
    pub fn render_thumbnail(
        &mut self,
        page: PageId,
        max_width: u32,
        max_height: u32,
        maintain_aspect: bool,
    ) -> RenderResult {
        let info = self.provider.resolve(page)?;
        let (page_w, page_h) = display_size(&info, info.rotation);
        let scale = if maintain_aspect {
            geometry::scale_to_fit(page_w, page_h, max_width as f32, max_height as f32)
        } else {
            max_width as f32 / page_w
        };
        let options = RenderOptions::builder()
            .dpi(POINTS_PER_INCH * scale)
            .anti_aliasing(AntiAliasing::All)
            .build()?;
        self.render(page, &options)
    }

    /// Tile layout of `page` for the given tile size
    pub fn calculate_tiles(
        &self,
        page: PageId,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<Vec<TileInfo>, RenderError> {
        if tile_width == 0 || tile_height == 0 {
            return Err(RenderError::invalid(format!(
                "tile size must be positive, got {tile_width}x{tile_height}"
            )));
        }
        let info = self.provider.resolve(page)?;
        let count = geometry::tile_count(info.width, info.height, tile_width, tile_height).unwrap_or(0);
        if count > geometry::MAX_TILE_COUNT {
            return Err(RenderError::invalid(format!(
                "{tile_width}x{tile_height} tiles split {page} into {count} pieces, more than {}",
                geometry::MAX_TILE_COUNT
            )));
        }
        Ok(geometry::tile_grid(info.width, info.height, tile_width, tile_height))
    }

    /// Render one tile: `options` clipped to the tile's page area
    pub fn render_tile(&mut self, page: PageId, tile: &TileInfo, options: &RenderOptions) -> RenderResult {
        let clipped = options.with_clip(tile.page_rect)?;
        self.render(page, &clipped)
    }

    /// Render every tile of `page`, one rasterizer call per tile, in grid
    /// order. A failed tile does not stop the others.
    pub fn render_tiles(
        &mut self,
        page: PageId,
        tile_width: u32,
        tile_height: u32,
        options: &RenderOptions,
    ) -> Result<Vec<(TileInfo, RenderResult)>, RenderError> {
        let tiles = self.calculate_tiles(page, tile_width, tile_height)?;
        Ok(tiles
            .into_iter()
            .map(|tile| {
                let result = self.render_tile(page, &tile, options);
                (tile, result)
            })
            .collect())
    }

    /// Render `pages` in the given order. Each element of the result
    /// succeeds or fails on its own.
    pub fn render_pages(
        &mut self,
        pages: &[PageId],
        options: &RenderOptions,
        progress: Option<ProgressCallback<'_>>,
    ) -> Vec<RenderResult> {
        self.render_pages_cancellable(pages, options, progress, &CancelFlag::new())
    }

    /// [`render_pages`](Self::render_pages) that also stops when `cancel`
    /// is set. A `false` from `progress` sets `cancel`.
    pub fn render_pages_cancellable(
        &mut self,
        pages: &[PageId],
        options: &RenderOptions,
        progress: Option<ProgressCallback<'_>>,
        cancel: &CancelFlag,
    ) -> Vec<RenderResult> {
        self.run_batch(
            pages,
            progress,
            cancel,
            |_, page| format!("Rendering page {}", page.0),
            |renderer, page| renderer.render_observed(page, options, cancel, &mut |_| {}),
        )
    }

    /// Render every page in ascending order
    pub fn render_all_pages(
        &mut self,
        options: &RenderOptions,
        progress: Option<ProgressCallback<'_>>,
    ) -> Vec<RenderResult> {
        let pages = self.provider.page_ids();
        self.render_pages(&pages, options, progress)
    }

    /// Thumbnail of every page in ascending order, aspect ratio kept
    pub fn render_all_thumbnails(
        &mut self,
        max_width: u32,
        max_height: u32,
        progress: Option<ProgressCallback<'_>>,
    ) -> Vec<RenderResult> {
        let pages = self.provider.page_ids();
        self.run_batch(
            &pages,
            progress,
            &CancelFlag::new(),
            |i, _| format!("Generating thumbnail {}", i + 1),
            |renderer, page| renderer.render_thumbnail(page, max_width, max_height, true),
        )
    }

    fn run_batch(
        &mut self,
        pages: &[PageId],
        mut progress: Option<ProgressCallback<'_>>,
        cancel: &CancelFlag,
        message: impl Fn(usize, PageId) -> String,
        mut render_one: impl FnMut(&mut Self, PageId) -> RenderResult,
    ) -> Vec<RenderResult> {
        let total = pages.len();
        let mut results = Vec::with_capacity(total);

        for (i, &page) in pages.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!("Batch cancelled after {i} of {total} pages");
                break;
            }
            if let Some(callback) = progress.as_deref_mut() {
                if !callback(i, total, &message(i, page)) {
                    debug!("Batch stopped by progress callback after {i} of {total} pages");
                    cancel.cancel();
                    break;
                }
            }
            results.push(render_one(self, page));
        }

        results
    }

    /// Pixel size of `page` rendered at `dpi` with its own rotation
    pub fn dimensions(&self, page: PageId, dpi: f32) -> Result<(u32, u32), RenderError> {
        let info = self.provider.resolve(page)?;
        let (w, h) = display_size(&info, info.rotation);
        Ok(geometry::dimensions_at_dpi(w, h, dpi))
    }

    /// Scale at which `page` exactly fits `max_width` x `max_height`
    pub fn scale_to_fit(&self, page: PageId, max_width: u32, max_height: u32) -> Result<f32, RenderError> {
        let info = self.provider.resolve(page)?;
        let (w, h) = display_size(&info, info.rotation);
        Ok(geometry::scale_to_fit(w, h, max_width as f32, max_height as f32))
    }

    /// Partial-frame rendering has no defined contract yet.
    pub fn start_progressive_render(&mut self, page: PageId, _options: &RenderOptions) -> Result<(), RenderError> {
        self.provider.resolve(page)?;
        Err(RenderError::NotImplemented("progressive rendering"))
    }

    pub fn set_cache_enabled(&self, enabled: bool) {
        self.cache.set_enabled(enabled);
    }

    #[must_use]
    pub fn is_cache_enabled(&self) -> bool {
        self.cache.is_enabled()
    }

    /// Cache size limit in megabytes
    pub fn set_cache_size(&self, megabytes: usize) {
        self.cache.set_size_limit_mb(megabytes);
    }

    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.cache.size_limit_mb()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Forget cached images of `page`; call after the page changes.
    pub fn invalidate_page(&self, page: PageId) {
        self.cache.invalidate(page);
    }
}

#[cfg(test)]
mod tests {
    use super::super::backend::RawPixmap;
    use super::super::buffer::PixelFormat;
    use super::super::error::RasterFailure;
    use super::super::geometry::Rect;
    use super::*;

    struct Pages(Vec<PageInfo>);

    impl PageProvider for Pages {
        fn page_count(&self) -> usize {
            self.0.len()
        }

        fn page_info(&self, page: PageId) -> Option<PageInfo> {
            self.0.get(page.0).copied()
        }
    }

    /// Fills every pixel with the page index; records each request
    #[derive(Default)]
    struct Flat {
        requests: Arc<std::sync::Mutex<Vec<RasterRequest>>>,
        fail_page: Option<usize>,
    }

    impl Rasterizer for Flat {
        fn rasterize(&mut self, request: &RasterRequest) -> Result<RawPixmap, RasterFailure> {
            self.requests
                .lock()
                .expect("not poisoned")
                .push(request.clone());
            if self.fail_page == Some(request.page.0) {
                return Err(RasterFailure::new("broken content stream"));
            }
            let n = request.colorspace.components() + usize::from(request.alpha);
            let (w, h) = (request.target.width, request.target.height);
            Ok(RawPixmap {
                width: w,
                height: h,
                n,
                stride: w as usize * n,
                samples: vec![request.page.0 as u8; w as usize * h as usize * n],
            })
        }
    }

    fn renderer_with(
        pages: Vec<PageInfo>,
        fail_page: Option<usize>,
    ) -> (Renderer, Arc<std::sync::Mutex<Vec<RasterRequest>>>) {
        let rasterizer = Flat {
            fail_page,
            ..Flat::default()
        };
        let requests = Arc::clone(&rasterizer.requests);
        let renderer = Renderer::new(
            Arc::new(Pages(pages)),
            Box::new(rasterizer),
            Arc::new(RenderCache::with_size_mb(16)),
        );
        (renderer, requests)
    }

    fn letter() -> PageInfo {
        PageInfo::new(612.0, 792.0)
    }

    #[test]
    fn renders_page_at_dpi() {
        let (mut renderer, requests) = renderer_with(vec![letter()], None);
        let opts = RenderOptions::builder().dpi(72.0).build().expect("valid");
        let image = renderer.render(PageId(0), &opts).expect("renders");

        assert_eq!((image.width(), image.height()), (612, 792));
        assert_eq!(image.format(), PixelFormat::Rgb24);
        assert_eq!(image.stride(), 612 * 3);
        let requests = requests.lock().expect("not poisoned");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].target, PixelRect::new(0, 0, 612, 792));
        assert_eq!(requests[0].colorspace, Colorspace::Rgb);
        assert!(!requests[0].alpha);
    }

    #[test]
    fn second_render_is_served_from_cache() {
        let (mut renderer, requests) = renderer_with(vec![letter()], None);
        let opts = RenderOptions::default();
        let a = renderer.render(PageId(0), &opts).expect("renders");
        let b = renderer.render(PageId(0), &opts).expect("renders");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(requests.lock().expect("not poisoned").len(), 1);

        renderer.invalidate_page(PageId(0));
        let _ = renderer.render(PageId(0), &opts).expect("renders");
        assert_eq!(requests.lock().expect("not poisoned").len(), 2);
    }

    #[test]
    fn disabled_cache_always_rasterizes() {
        let (mut renderer, requests) = renderer_with(vec![letter()], None);
        renderer.set_cache_enabled(false);
        let opts = RenderOptions::default();
        let a = renderer.render(PageId(0), &opts).expect("renders");
        let b = renderer.render(PageId(0), &opts).expect("renders");
        assert_eq!(a, b);
        assert_eq!(requests.lock().expect("not poisoned").len(), 2);
    }

    #[test]
    fn invalid_page_is_invalid_argument() {
        let (mut renderer, requests) = renderer_with(vec![letter()], None);
        let err = renderer.render(PageId(3), &RenderOptions::default()).unwrap_err();
        assert!(matches!(err, RenderError::InvalidArgument(_)));
        assert!(requests.lock().expect("not poisoned").is_empty());
    }

    #[test]
    fn rasterizer_failure_keeps_message() {
        let (mut renderer, _) = renderer_with(vec![letter()], Some(0));
        let err = renderer.render(PageId(0), &RenderOptions::default()).unwrap_err();
        assert_eq!(err, RenderError::Render("broken content stream".into()));
        assert!(renderer.cache().is_empty());
    }

    #[test]
    fn rotation_override_swaps_dimensions() {
        let (mut renderer, _) = renderer_with(vec![letter().rotated(Rotation::Clockwise90)], None);
        let opts = RenderOptions::builder().dpi(72.0).build().expect("valid");
        let image = renderer.render(PageId(0), &opts).expect("renders");
        assert_eq!((image.width(), image.height()), (792, 612));

        let upright = opts.to_builder().rotation(Rotation::None).build().expect("valid");
        let image = renderer.render(PageId(0), &upright).expect("renders");
        assert_eq!((image.width(), image.height()), (612, 792));
    }

    #[test]
    fn clip_selects_pixel_region() {
        let (mut renderer, requests) = renderer_with(vec![letter()], None);
        let opts = RenderOptions::builder()
            .dpi(144.0)
            .clip(Rect::new(0.0, 692.0, 100.0, 792.0))
            .build()
            .expect("valid");
        let image = renderer.render(PageId(0), &opts).expect("renders");
        assert_eq!((image.width(), image.height()), (200, 200));
        assert_eq!(
            requests.lock().expect("not poisoned")[0].target,
            PixelRect::new(0, 0, 200, 200)
        );
    }

    #[test]
    fn clip_outside_page_is_rejected() {
        let (mut renderer, _) = renderer_with(vec![letter()], None);
        let opts = RenderOptions::builder()
            .clip(Rect::new(700.0, 0.0, 800.0, 100.0))
            .build()
            .expect("valid");
        assert!(matches!(
            renderer.render(PageId(0), &opts),
            Err(RenderError::InvalidArgument(_))
        ));
    }

    #[test]
    fn huge_output_is_rejected() {
        let (mut renderer, requests) = renderer_with(vec![PageInfo::new(14_400.0, 14_400.0)], None);
        let opts = RenderOptions::builder().dpi(600.0).build().expect("valid");
        assert!(matches!(
            renderer.render(PageId(0), &opts),
            Err(RenderError::InvalidArgument(_))
        ));
        assert!(requests.lock().expect("not poisoned").is_empty());
    }

    #[test]
    fn alpha_and_colorspace_follow_options() {
        let (mut renderer, requests) = renderer_with(vec![letter()], None);
        let opts = RenderOptions::builder()
            .dpi(10.0)
            .color_mode(ColorMode::Grayscale)
            .pixel_format(PixelFormat::Bgra32)
            .render_transparent(true)
            .build()
            .expect("valid");
        let image = renderer.render(PageId(0), &opts).expect("renders");
        assert_eq!(image.format(), PixelFormat::Bgra32);
        let req = &requests.lock().expect("not poisoned")[0];
        assert_eq!(req.colorspace, Colorspace::Gray);
        assert!(req.alpha);
    }

    #[test]
    fn scaled_render_averages_scales() {
        let (mut renderer, _) = renderer_with(vec![letter()], None);
        let opts = RenderOptions::builder().dpi(72.0).build().expect("valid");
        let image = renderer.render_scaled(PageId(0), 1.0, 2.0, &opts).expect("renders");
        assert_eq!((image.width(), image.height()), (918, 1188));
        assert!(renderer.render_scaled(PageId(0), 0.0, 0.0, &opts).is_err());
    }

    #[test]
    fn render_to_size_fits_both_axes() {
        let (mut renderer, _) = renderer_with(vec![letter()], None);
        let image = renderer
            .render_to_size(PageId(0), 306, 1000, &RenderOptions::default())
            .expect("renders");
        assert_eq!((image.width(), image.height()), (306, 396));
    }

    #[test]
    fn thumbnail_fits_box() {
        let (mut renderer, requests) = renderer_with(vec![letter()], None);
        let image = renderer.render_thumbnail(PageId(0), 300, 300, true).expect("renders");
        assert_eq!((image.width(), image.height()), (232, 300));
        assert_eq!(
            requests.lock().expect("not poisoned")[0].anti_aliasing,
            AntiAliasing::All
        );

        let wide = renderer.render_thumbnail(PageId(0), 306, 100, false).expect("renders");
        assert_eq!((wide.width(), wide.height()), (306, 396));
    }

    #[test]
    fn render_to_buffer_checks_capacity() {
        let (mut renderer, _) = renderer_with(vec![PageInfo::new(72.0, 72.0)], None);
        let opts = RenderOptions::builder()
            .dpi(72.0)
            .pixel_format(PixelFormat::Gray8)
            .build()
            .expect("valid");
        let mut small = vec![0u8; 10];
        assert!(matches!(
            renderer.render_to_buffer(PageId(0), &opts, &mut small),
            Err(RenderError::InvalidArgument(_))
        ));
        let mut big = vec![0u8; 72 * 72 + 5];
        assert_eq!(renderer.render_to_buffer(PageId(0), &opts, &mut big), Ok(72 * 72));
    }

    #[test]
    fn batch_isolates_failures_and_reports_progress() {
        let (mut renderer, _) = renderer_with(vec![letter(), letter(), letter()], Some(1));
        let mut calls = Vec::new();
        let mut progress = |current: usize, total: usize, msg: &str| {
            calls.push((current, total, msg.to_string()));
            true
        };
        let opts = RenderOptions::builder().dpi(10.0).build().expect("valid");
        let results = renderer.render_pages(
            &[PageId(0), PageId(1), PageId(2)],
            &opts,
            Some(&mut progress),
        );

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(RenderError::Render(_))));
        assert!(results[2].is_ok());
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1], (1, 3, "Rendering page 1".to_string()));
    }

    #[test]
    fn batch_stops_when_callback_declines() {
        let (mut renderer, _) = renderer_with(vec![letter(); 4], None);
        let mut seen = 0;
        let mut progress = |current: usize, _: usize, _: &str| {
            seen += 1;
            current < 2
        };
        let cancel = CancelFlag::new();
        let opts = RenderOptions::builder().dpi(10.0).build().expect("valid");
        let results = renderer.render_pages_cancellable(
            &[PageId(0), PageId(1), PageId(2), PageId(3)],
            &opts,
            Some(&mut progress),
            &cancel,
        );
        assert_eq!(results.len(), 2);
        assert_eq!(seen, 3);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn all_thumbnails_in_page_order() {
        let (mut renderer, _) = renderer_with(vec![letter(), letter().rotated(Rotation::Clockwise90)], None);
        let mut messages = Vec::new();
        let mut progress = |_: usize, _: usize, msg: &str| {
            messages.push(msg.to_string());
            true
        };
        let thumbs = renderer.render_all_thumbnails(100, 100, Some(&mut progress));
        assert_eq!(thumbs.len(), 2);
        let second = thumbs[1].as_ref().expect("renders");
        assert!(second.width() > second.height());
        assert_eq!(messages, vec!["Generating thumbnail 1", "Generating thumbnail 2"]);
    }

    #[test]
    fn page_helpers_use_provider_geometry() {
        let (renderer, _) = renderer_with(vec![letter()], None);
        assert_eq!(renderer.dimensions(PageId(0), 150.0), Ok((1275, 1650)));
        let scale = renderer.scale_to_fit(PageId(0), 300, 300).expect("valid page");
        assert!((scale - 0.3788).abs() < 1e-4);
        assert!(renderer.dimensions(PageId(9), 72.0).is_err());
    }

    #[test]
    fn tiles_cover_page_and_render_separately() {
        let (mut renderer, requests) = renderer_with(vec![PageInfo::new(1000.0, 1000.0)], None);
        let opts = RenderOptions::builder().dpi(72.0).build().expect("valid");
        let tiles = renderer
            .render_tiles(PageId(0), 400, 400, &opts)
            .expect("valid tile size");
        assert_eq!(tiles.len(), 9);
        assert_eq!(requests.lock().expect("not poisoned").len(), 9);

        let (last, image) = &tiles[8];
        assert_eq!(last.page_rect, Rect::new(800.0, 800.0, 1000.0, 1000.0));
        let image = image.as_ref().expect("renders");
        assert_eq!((image.width(), image.height()), (200, 200));

        assert!(renderer.calculate_tiles(PageId(0), 0, 400).is_err());
    }

    #[test]
    fn too_many_tiles_is_invalid_argument() {
        let (renderer, _) = renderer_with(vec![PageInfo::new(14_400.0, 14_400.0)], None);
        assert!(matches!(
            renderer.calculate_tiles(PageId(0), 1, 1),
            Err(RenderError::InvalidArgument(_))
        ));
        assert_eq!(renderer.calculate_tiles(PageId(0), 1024, 1024).map(|t| t.len()), Ok(225));
    }

    #[test]
    fn progressive_rendering_is_not_implemented() {
        let (mut renderer, _) = renderer_with(vec![letter()], None);
        assert_eq!(
            renderer.start_progressive_render(PageId(0), &RenderOptions::default()),
            Err(RenderError::NotImplemented("progressive rendering"))
        );
    }

    #[test]
    fn cancelled_flag_skips_rasterizer() {
        let (mut renderer, requests) = renderer_with(vec![letter()], None);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = renderer.render_observed(PageId(0), &RenderOptions::default(), &cancel, &mut |_| {});
        assert_eq!(result, Err(RenderError::Cancelled));
        assert!(requests.lock().expect("not poisoned").is_empty());
    }

    #[test]
    fn cache_controls_delegate() {
        let (renderer, _) = renderer_with(vec![letter()], None);
        renderer.set_cache_size(42);
        assert_eq!(renderer.cache_size(), 42);
        assert!(renderer.is_cache_enabled());
        renderer.clear_cache();
        assert!(renderer.cache().is_empty());
    }
}
