//! Raw rasterizer samples to output pixel formats

use rayon::prelude::*;

use super::backend::{Colorspace, RawPixmap};
use super::buffer::{ImageBuffer, PixelFormat};
use super::request::ColorMode;

/// Images at least this large are converted with one rayon task per row.
const PARALLEL_MIN_PIXELS: u64 = 200_000;

const MONO_THRESHOLD: u8 = 128;

mod simd_luma {
    use wide::u16x8;

    pub const LUMA_R: u16 = 54;
    pub const LUMA_G: u16 = 183;
    pub const LUMA_B: u16 = 19;

    #[inline]
    pub fn luma(r: u8, g: u8, b: u8) -> u8 {
        ((u16::from(r) * LUMA_R + u16::from(g) * LUMA_G + u16::from(b) * LUMA_B) >> 8) as u8
    }

    /// Luma of packed RGB samples, eight pixels at a time.
    #[inline]
    pub fn rgb_row_to_luma(src: &[u8], dst: &mut [u8]) {
        let chunks = dst.len() / 8;
        let (src_simd, src_rest) = src.split_at(chunks * 24);
        let (dst_simd, dst_rest) = dst.split_at_mut(chunks * 8);

        for (px, out) in src_simd.chunks_exact(24).zip(dst_simd.chunks_exact_mut(8)) {
            let lane = |offset: usize| {
                u16x8::new([
                    u16::from(px[offset]),
                    u16::from(px[offset + 3]),
                    u16::from(px[offset + 6]),
                    u16::from(px[offset + 9]),
                    u16::from(px[offset + 12]),
                    u16::from(px[offset + 15]),
                    u16::from(px[offset + 18]),
                    u16::from(px[offset + 21]),
                ])
            };
            let (r, g, b) = (lane(0), lane(1), lane(2));
            let l: u16x8 =
                (r * u16x8::splat(LUMA_R) + g * u16x8::splat(LUMA_G) + b * u16x8::splat(LUMA_B))
                    >> 8;
            for (o, v) in out.iter_mut().zip(l.to_array()) {
                *o = v as u8;
            }
        }

        for (px, out) in src_rest.chunks_exact(3).zip(dst_rest.iter_mut()) {
            *out = luma(px[0], px[1], px[2]);
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct SourceLayout {
    colorspace: Colorspace,
    alpha: bool,
}

impl SourceLayout {
    fn n(self) -> usize {
        self.colorspace.components() + usize::from(self.alpha)
    }

    #[inline]
    fn rgba(self, px: &[u8]) -> [u8; 4] {
        let a = if self.alpha { px[self.n() - 1] } else { 255 };
        match self.colorspace {
            Colorspace::Gray => [px[0], px[0], px[0], a],
            Colorspace::Rgb => [px[0], px[1], px[2], a],
            Colorspace::Cmyk => {
                let k = u16::from(px[3]);
                let ch = |c: u8| (255 - (u16::from(c) + k).min(255)) as u8;
                [ch(px[0]), ch(px[1]), ch(px[2]), a]
            }
        }
    }
}

/// Convert a rasterizer pixmap into a tightly packed [`ImageBuffer`].
///
/// `pixmap` must already have been checked against the request that
/// produced it.
pub(crate) fn to_image_buffer(
    pixmap: &RawPixmap,
    colorspace: Colorspace,
    alpha: bool,
    mode: ColorMode,
    format: PixelFormat,
) -> ImageBuffer {
    let layout = SourceLayout { colorspace, alpha };
    let mut out = ImageBuffer::new(pixmap.width, pixmap.height, format);
    let stride = out.stride();
    if stride == 0 || pixmap.height == 0 {
        return out;
    }

    let convert = |(y, row): (usize, &mut [u8])| {
        convert_row(pixmap.row(y as u32), row, layout, mode, format);
    };

    let pixels = u64::from(pixmap.width) * u64::from(pixmap.height);
    if pixels >= PARALLEL_MIN_PIXELS && pixmap.height >= 4 {
        out.data_mut().par_chunks_mut(stride).enumerate().for_each(convert);
    } else {
        out.data_mut().chunks_mut(stride).enumerate().for_each(convert);
    }
    out
}

fn convert_row(src: &[u8], dst: &mut [u8], layout: SourceLayout, mode: ColorMode, format: PixelFormat) {
    let mono = mode == ColorMode::Monochrome || format == PixelFormat::Mono1;

    match (layout.colorspace, layout.alpha, format) {
        (Colorspace::Rgb, false, PixelFormat::Rgb24) if !mono => {
            dst.copy_from_slice(src);
            return;
        }
        (Colorspace::Gray, false, PixelFormat::Gray8) if !mono => {
            dst.copy_from_slice(src);
            return;
        }
        (Colorspace::Rgb, false, PixelFormat::Gray8 | PixelFormat::Mono1) => {
            simd_luma::rgb_row_to_luma(src, dst);
            if mono {
                dst.iter_mut().for_each(|v| *v = threshold(*v));
            }
            return;
        }
        _ => {}
    }

    let n_out = format.bytes_per_pixel();
    for (px, out) in src.chunks_exact(layout.n()).zip(dst.chunks_exact_mut(n_out)) {
        let [mut r, mut g, mut b, a] = layout.rgba(px);
        if mono {
            let v = threshold(simd_luma::luma(r, g, b));
            (r, g, b) = (v, v, v);
        }
        match format {
            PixelFormat::Rgb24 => out.copy_from_slice(&[r, g, b]),
            PixelFormat::Rgba32 => out.copy_from_slice(&[r, g, b, a]),
            PixelFormat::Bgr24 => out.copy_from_slice(&[b, g, r]),
            PixelFormat::Bgra32 => out.copy_from_slice(&[b, g, r, a]),
            PixelFormat::Gray8 | PixelFormat::Mono1 => out[0] = simd_luma::luma(r, g, b),
        }
    }
}

#[inline]
fn threshold(luma: u8) -> u8 {
    if luma >= MONO_THRESHOLD { 255 } else { 0 }
}
