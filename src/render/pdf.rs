//! MuPDF-backed document model and rasterizer

use std::path::{Path, PathBuf};

use log::debug;
use mupdf::{Colorspace as FzColorspace, Document, Matrix, Pixmap};

use super::backend::{
    Colorspace, PageId, PageInfo, PageProvider, RasterRequest, RawPixmap, Rasterizer,
    RasterizerFactory,
};
use super::error::{RasterFailure, RenderError};

fn open(path: &Path) -> Result<Document, RenderError> {
    Document::open(path.to_string_lossy().as_ref())
        .map_err(|e| RenderError::render(format!("failed to open {}: {e}", path.display())))
}

/// Page geometry of a PDF (or any MuPDF-supported) file.
///
/// MuPDF documents are bound to the thread that opened them, so only the
/// page sizes are kept here; rasterizers reopen the file per thread.
#[derive(Clone, Debug)]
pub struct PdfDocument {
    path: PathBuf,
    pages: Vec<PageInfo>,
}

impl PdfDocument {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RenderError> {
        let path = path.into();
        let doc = open(&path)?;
        let count = doc
            .page_count()
            .map_err(|e| RenderError::render(format!("failed to count pages: {e}")))?;

        let mut pages = Vec::with_capacity(count.max(0) as usize);
        for index in 0..count {
            let bounds = doc
                .load_page(index)
                .and_then(|page| page.bounds())
                .map_err(|e| RenderError::render(format!("failed to load page {index}: {e}")))?;
            // Bounds already include the page's /Rotate.
            pages.push(PageInfo::new(bounds.x1 - bounds.x0, bounds.y1 - bounds.y0));
        }
        debug!("Opened {} with {} pages", path.display(), pages.len());

        Ok(Self { path, pages })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Factory for per-thread rasterizers over the same file
    #[must_use]
    pub fn factory(&self) -> MupdfFactory {
        MupdfFactory {
            path: self.path.clone(),
        }
    }
}

impl PageProvider for PdfDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_info(&self, page: PageId) -> Option<PageInfo> {
        self.pages.get(page.0).copied()
    }
}

#[derive(Clone, Debug)]
pub struct MupdfFactory {
    path: PathBuf,
}

impl RasterizerFactory for MupdfFactory {
    fn create(&self) -> Result<Box<dyn Rasterizer>, RenderError> {
        Ok(Box::new(MupdfRasterizer {
            doc: open(&self.path)?,
        }))
    }
}

struct MupdfRasterizer {
    doc: Document,
}

impl Rasterizer for MupdfRasterizer {
    fn rasterize(&mut self, request: &RasterRequest) -> Result<RawPixmap, RasterFailure> {
        let index = i32::try_from(request.page.0)
            .map_err(|_| RasterFailure::new(format!("{} out of range", request.page)))?;
        let page = self.doc.load_page(index).map_err(fault)?;
        let bounds = page.bounds().map_err(fault)?;

        // Our page space has its origin bottom-left; MuPDF's is top-left of
        // the bounds box.
        let t = request.transform;
        let h = request.page_info.height;
        let matrix = Matrix::new(
            t.a,
            t.b,
            -t.c,
            -t.d,
            t.c * h + t.e - t.a * bounds.x0 + t.c * bounds.y0,
            t.d * h + t.f - t.b * bounds.x0 + t.d * bounds.y0,
        );

        let cs = match request.colorspace {
            Colorspace::Gray => FzColorspace::device_gray(),
            Colorspace::Rgb => FzColorspace::device_rgb(),
            Colorspace::Cmyk => FzColorspace::device_cmyk(),
        };
        let show_extras = request.render_annotations || request.render_forms;

        // TODO: draw only the target region through a clipped draw device
        // instead of cropping a full-page pixmap.
        let pixmap = page
            .to_pixmap(&matrix, &cs, true, show_extras)
            .map_err(fault)?;

        crop(&pixmap, request)
    }
}

fn fault(e: mupdf::error::Error) -> RasterFailure {
    RasterFailure::new(format!("PDF engine: {e}"))
}

/// Background colour expressed in the request's colorspace
fn background_components(request: &RasterRequest) -> Vec<u8> {
    let [r, g, b, _] = request.background.to_rgba8();
    match request.colorspace {
        Colorspace::Gray => vec![((u16::from(r) * 54 + u16::from(g) * 183 + u16::from(b) * 19) >> 8) as u8],
        Colorspace::Rgb => vec![r, g, b],
        Colorspace::Cmyk => {
            let k = 255 - r.max(g).max(b);
            let ink = |c: u8| 255 - c - k;
            vec![ink(r), ink(g), ink(b), k]
        }
    }
}

/// Copy the requested region out of a premultiplied-alpha pixmap, either
/// keeping straight alpha or flattening onto the background.
fn crop(pixmap: &Pixmap, request: &RasterRequest) -> Result<RawPixmap, RasterFailure> {
    let src_n = pixmap.n() as usize;
    let comps = request.colorspace.components();
    if src_n != comps + 1 {
        return Err(RasterFailure::new(format!(
            "unexpected pixmap layout: {src_n} channels for {comps} components"
        )));
    }

    let src_w = pixmap.width() as i64;
    let src_h = pixmap.height() as i64;
    let src_stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    if samples.len() < src_stride * src_h as usize {
        return Err(RasterFailure::new("pixmap buffer size mismatch"));
    }

    let target = request.target;
    let out_n = comps + usize::from(request.alpha);
    let stride = target.width as usize * out_n;
    let mut out = Vec::with_capacity(stride * target.height as usize);
    let background = background_components(request);

    let origin_x = i64::from(target.x) - pixmap.x() as i64;
    let origin_y = i64::from(target.y) - pixmap.y() as i64;

    for row in 0..i64::from(target.height) {
        let sy = origin_y + row;
        for col in 0..i64::from(target.width) {
            let sx = origin_x + col;
            let px = if (0..src_w).contains(&sx) && (0..src_h).contains(&sy) {
                let start = sy as usize * src_stride + sx as usize * src_n;
                &samples[start..start + src_n]
            } else {
                &[][..]
            };

            if px.is_empty() {
                if request.alpha {
                    out.extend(std::iter::repeat_n(0, out_n));
                } else {
                    out.extend_from_slice(&background);
                }
                continue;
            }

            let alpha = u16::from(px[comps]);
            if request.alpha {
                for &c in &px[..comps] {
                    let straight = if alpha == 0 { 0 } else { (u16::from(c) * 255 / alpha).min(255) };
                    out.push(straight as u8);
                }
                out.push(alpha as u8);
            } else {
                for (&c, &bg) in px[..comps].iter().zip(&background) {
                    let v = u16::from(c) + u16::from(bg) * (255 - alpha) / 255;
                    out.push(v.min(255) as u8);
                }
            }
        }
    }

    Ok(RawPixmap {
        width: target.width,
        height: target.height,
        n: out_n,
        stride,
        samples: out,
    })
}
