//! Deterministic in-memory backend for exercising the render pipeline
//! without a real document engine.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use crate::render::{
    Colorspace, PageId, PageInfo, PageProvider, RasterFailure, RasterRequest, RawPixmap,
    Rasterizer, RasterizerFactory, RenderError,
};

/// Fixed list of pages
#[derive(Clone, Debug, Default)]
pub struct SyntheticDocument {
    pages: Vec<PageInfo>,
}

impl SyntheticDocument {
    #[must_use]
    pub fn new(pages: Vec<PageInfo>) -> Self {
        Self { pages }
    }

    /// `count` US-letter pages (612 x 792 points)
    #[must_use]
    pub fn letter(count: usize) -> Self {
        Self::uniform(count, 612.0, 792.0)
    }

    #[must_use]
    pub fn uniform(count: usize, width: f32, height: f32) -> Self {
        Self::new(vec![PageInfo::new(width, height); count])
    }
}

impl PageProvider for SyntheticDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_info(&self, page: PageId) -> Option<PageInfo> {
        self.pages.get(page.0).copied()
    }
}

/// Colour of the pixel at `(x, y)` of the full-page raster of `page`.
///
/// Depends only on the absolute pixel position, so any tiling of a page
/// stitches back into the untiled render exactly.
#[must_use]
pub fn pattern_rgb(page: PageId, x: i64, y: i64) -> [u8; 3] {
    let p = page.0 as i64;
    [
        (x * 7 + p * 31).rem_euclid(256) as u8,
        (y * 13 + p * 17).rem_euclid(256) as u8,
        (x ^ y).rem_euclid(256) as u8,
    ]
}

/// One-shot barrier that holds rasterizer calls until opened
#[derive(Clone, Debug, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let (open, cvar) = &*self.inner;
        *open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn wait(&self) {
        let (open, cvar) = &*self.inner;
        let guard = open.lock().unwrap_or_else(PoisonError::into_inner);
        let _open = cvar
            .wait_while(guard, |open| !*open)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Rasterizer that paints [`pattern_rgb`]
#[derive(Debug)]
pub struct SyntheticRasterizer {
    fail_pages: Arc<HashSet<usize>>,
    gate: Option<Gate>,
    calls: Arc<AtomicUsize>,
}

impl Rasterizer for SyntheticRasterizer {
    fn rasterize(&mut self, request: &RasterRequest) -> Result<RawPixmap, RasterFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        if self.fail_pages.contains(&request.page.0) {
            return Err(RasterFailure::new(format!(
                "synthetic failure on {}",
                request.page
            )));
        }

        let target = request.target;
        let n = request.colorspace.components() + usize::from(request.alpha);
        let stride = target.width as usize * n;
        let mut samples = Vec::with_capacity(stride * target.height as usize);

        for row in 0..i64::from(target.height) {
            for col in 0..i64::from(target.width) {
                let [r, g, b] =
                    pattern_rgb(request.page, i64::from(target.x) + col, i64::from(target.y) + row);
                match request.colorspace {
                    Colorspace::Gray => samples.push(r),
                    Colorspace::Rgb => samples.extend_from_slice(&[r, g, b]),
                    Colorspace::Cmyk => samples.extend_from_slice(&[255 - r, 255 - g, 255 - b, 0]),
                }
                if request.alpha {
                    samples.push(255);
                }
            }
        }

        Ok(RawPixmap {
            width: target.width,
            height: target.height,
            n,
            stride,
            samples,
        })
    }
}

/// Factory of [`SyntheticRasterizer`]s sharing one set of counters
#[derive(Clone, Debug, Default)]
pub struct SyntheticBackend {
    fail_pages: Arc<HashSet<usize>>,
    gate: Option<Gate>,
    calls: Arc<AtomicUsize>,
    contexts: Arc<AtomicUsize>,
    refuse_contexts: bool,
}

impl SyntheticBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rasterizing `page` fails with a render error
    #[must_use]
    pub fn failing_on(mut self, page: usize) -> Self {
        let mut pages = (*self.fail_pages).clone();
        pages.insert(page);
        self.fail_pages = Arc::new(pages);
        self
    }

    /// Every rasterizer call blocks until `gate` opens
    #[must_use]
    pub fn gated(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Creating a rasterizer context always fails
    #[must_use]
    pub fn refusing_contexts(mut self) -> Self {
        self.refuse_contexts = true;
        self
    }

    #[must_use]
    pub fn rasterizer(&self) -> SyntheticRasterizer {
        SyntheticRasterizer {
            fail_pages: Arc::clone(&self.fail_pages),
            gate: self.gate.clone(),
            calls: Arc::clone(&self.calls),
        }
    }

    /// Rasterizer calls made so far, across all contexts
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Rasterizer contexts created so far
    #[must_use]
    pub fn contexts(&self) -> usize {
        self.contexts.load(Ordering::SeqCst)
    }
}

impl RasterizerFactory for SyntheticBackend {
    fn create(&self) -> Result<Box<dyn Rasterizer>, RenderError> {
        if self.refuse_contexts {
            return Err(RenderError::render("synthetic backend refused a context"));
        }
        self.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.rasterizer()))
    }
}
