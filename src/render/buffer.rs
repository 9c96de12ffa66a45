//! Rendered image buffers and file encoding

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

/// Output pixel layout of a rendered image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 24-bit R, G, B
    #[default]
    Rgb24,
    /// 32-bit R, G, B, A
    Rgba32,
    /// 24-bit B, G, R (Windows bitmap order)
    Bgr24,
    /// 32-bit B, G, R, A
    Bgra32,
    /// 8-bit luma
    Gray8,
    /// Black and white, stored one byte per pixel (0 or 255)
    Mono1,
}

impl PixelFormat {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb24 | Self::Bgr24 => 3,
            Self::Rgba32 | Self::Bgra32 => 4,
            Self::Gray8 | Self::Mono1 => 1,
        }
    }

    #[must_use]
    pub const fn has_alpha(self) -> bool {
        matches!(self, Self::Rgba32 | Self::Bgra32)
    }
}

/// File formats an [`ImageBuffer`] can be written as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFileFormat {
    Png,
    /// JPEG with quality 1-100
    Jpeg(u8),
    Bmp,
    Tiff,
}

impl ImageFileFormat {
    pub const DEFAULT_JPEG_QUALITY: u8 = 85;

    /// Guess a format from a file extension
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg(Self::DEFAULT_JPEG_QUALITY)),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            _ => None,
        }
    }

    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg(_) => "jpg",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("image codec: {0}")]
    Image(#[from] image::ImageError),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("{detail}")]
    Layout { detail: String },
}

impl CodecError {
    pub fn layout(msg: impl Into<String>) -> Self {
        Self::Layout { detail: msg.into() }
    }
}

/// A contiguous block of pixels with its geometry.
///
/// Rows are `stride` bytes apart; only the first `width * bytes_per_pixel`
/// bytes of a row are pixel data. Once wrapped in an `Arc` and handed to the
/// cache or a caller the buffer is never mutated again.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    data: Vec<u8>,
}

impl std::fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl ImageBuffer {
    /// Zero-filled, tightly packed buffer
    #[must_use]
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width as usize * format.bytes_per_pixel();
        Self {
            width,
            height,
            stride,
            format,
            data: vec![0; stride * height as usize],
        }
    }

    /// Wrap existing pixel data, checking the geometry is consistent.
    pub fn from_raw(
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, CodecError> {
        let row_bytes = width as usize * format.bytes_per_pixel();
        if stride < row_bytes {
            return Err(CodecError::layout(format!(
                "stride {stride} is shorter than a {width}px row ({row_bytes} bytes)"
            )));
        }
        let expected = stride * height as usize;
        if data.len() != expected {
            return Err(CodecError::layout(format!(
                "expected {expected} bytes of pixel data, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            stride,
            format,
            data,
        })
    }

    /// Decode PNG/JPEG/BMP/TIFF bytes into an RGBA32 buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::from_raw(
            width,
            height,
            width as usize * 4,
            PixelFormat::Rgba32,
            rgba.into_raw(),
        )
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row
    #[must_use]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    #[must_use]
    pub fn bytes_per_pixel(&self) -> usize {
        self.format.bytes_per_pixel()
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Size of the pixel data in bytes (`stride * height`)
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.clone()
    }

    /// Pixel bytes of row `y`, without stride padding
    #[must_use]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * self.bytes_per_pixel()]
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let n = self.bytes_per_pixel();
        let start = x as usize * n;
        &self.row(y)[start..start + n]
    }

    /// Copy the pixels of `src` into this buffer with their top-left corner
    /// at `(x, y)`, clipping at the buffer edges. Formats must match.
    pub fn blit(&mut self, src: &ImageBuffer, x: u32, y: u32) -> Result<(), CodecError> {
        if src.format != self.format {
            return Err(CodecError::layout(format!(
                "cannot blit {:?} into {:?}",
                src.format, self.format
            )));
        }
        if x >= self.width || y >= self.height {
            return Ok(());
        }
        let n = self.bytes_per_pixel();
        let cols = src.width.min(self.width - x) as usize;
        let rows = src.height.min(self.height - y);
        for row in 0..rows {
            let dst_start = (y + row) as usize * self.stride + x as usize * n;
            let src_row = &src.row(row)[..cols * n];
            self.data[dst_start..dst_start + cols * n].copy_from_slice(src_row);
        }
        Ok(())
    }

    /// Convert to an `image` crate image, dropping stride padding and
    /// reordering BGR channels.
    pub fn to_dynamic_image(&self) -> Result<DynamicImage, CodecError> {
        let (w, h) = (self.width, self.height);
        let packed = self.packed_rows();
        let image = match self.format {
            PixelFormat::Rgb24 => RgbImage::from_raw(w, h, packed).map(DynamicImage::ImageRgb8),
            PixelFormat::Rgba32 => RgbaImage::from_raw(w, h, packed).map(DynamicImage::ImageRgba8),
            PixelFormat::Bgr24 => {
                let mut rgb = packed;
                rgb.chunks_exact_mut(3).for_each(|px| px.swap(0, 2));
                RgbImage::from_raw(w, h, rgb).map(DynamicImage::ImageRgb8)
            }
            PixelFormat::Bgra32 => {
                let mut rgba = packed;
                rgba.chunks_exact_mut(4).for_each(|px| px.swap(0, 2));
                RgbaImage::from_raw(w, h, rgba).map(DynamicImage::ImageRgba8)
            }
            PixelFormat::Gray8 | PixelFormat::Mono1 => {
                GrayImage::from_raw(w, h, packed).map(DynamicImage::ImageLuma8)
            }
        };
        image.ok_or_else(|| CodecError::layout("pixel data does not match image dimensions"))
    }

    /// Encode into an in-memory file of the given format.
    pub fn encode(&self, format: ImageFileFormat) -> Result<Vec<u8>, CodecError> {
        let image = self.to_dynamic_image()?;
        let mut out = Cursor::new(Vec::new());
        match format {
            ImageFileFormat::Png => image.write_to(&mut out, ImageFormat::Png)?,
            ImageFileFormat::Bmp => image.write_to(&mut out, ImageFormat::Bmp)?,
            ImageFileFormat::Tiff => image.write_to(&mut out, ImageFormat::Tiff)?,
            ImageFileFormat::Jpeg(quality) => {
                // JPEG has no alpha channel
                let rgb = match image {
                    DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => image,
                    other => DynamicImage::ImageRgb8(other.to_rgb8()),
                };
                let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
                rgb.write_with_encoder(encoder)?;
            }
        }
        Ok(out.into_inner())
    }

    pub fn save(&self, path: &Path, format: ImageFileFormat) -> Result<(), CodecError> {
        let bytes = self.encode(format)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn save_png(&self, path: &Path) -> Result<(), CodecError> {
        self.save(path, ImageFileFormat::Png)
    }

    pub fn save_jpeg(&self, path: &Path, quality: u8) -> Result<(), CodecError> {
        self.save(path, ImageFileFormat::Jpeg(quality))
    }

    pub fn save_bmp(&self, path: &Path) -> Result<(), CodecError> {
        self.save(path, ImageFileFormat::Bmp)
    }

    pub fn save_tiff(&self, path: &Path) -> Result<(), CodecError> {
        self.save(path, ImageFileFormat::Tiff)
    }

    fn packed_rows(&self) -> Vec<u8> {
        let row_bytes = self.width as usize * self.bytes_per_pixel();
        if row_bytes == self.stride {
            return self.data.clone();
        }
        let mut out = Vec::with_capacity(row_bytes * self.height as usize);
        for y in 0..self.height {
            out.extend_from_slice(self.row(y));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(format: PixelFormat) -> ImageBuffer {
        let mut buf = ImageBuffer::new(4, 3, format);
        let n = format.bytes_per_pixel();
        let stride = buf.stride();
        for y in 0..3usize {
            for x in 0..4usize {
                let px = &mut buf.data_mut()[y * stride + x * n..y * stride + (x + 1) * n];
                for (i, b) in px.iter_mut().enumerate() {
                    *b = (x * 60 + y * 20 + i * 5) as u8;
                }
            }
        }
        buf
    }

    #[test]
    fn new_buffer_is_tightly_packed() {
        let buf = ImageBuffer::new(10, 5, PixelFormat::Bgra32);
        assert_eq!(buf.stride(), 40);
        assert_eq!(buf.size(), 200);
        assert!(buf.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn from_raw_rejects_short_stride_and_bad_length() {
        assert!(ImageBuffer::from_raw(10, 2, 20, PixelFormat::Rgb24, vec![0; 40]).is_err());
        assert!(ImageBuffer::from_raw(10, 2, 32, PixelFormat::Rgb24, vec![0; 63]).is_err());
        let padded = ImageBuffer::from_raw(10, 2, 32, PixelFormat::Rgb24, vec![7; 64])
            .expect("padded rows are allowed");
        assert_eq!(padded.row(1).len(), 30);
    }

    #[test]
    fn png_encoding_round_trips_through_decode() {
        let buf = gradient(PixelFormat::Rgba32);
        let png = buf.encode(ImageFileFormat::Png).expect("encode png");
        let decoded = ImageBuffer::decode(&png).expect("decode png");
        assert_eq!(decoded, buf);
    }

    #[test]
    fn bgr_is_swapped_when_encoding() {
        let mut buf = ImageBuffer::new(1, 1, PixelFormat::Bgr24);
        buf.data_mut().copy_from_slice(&[10, 20, 30]);
        let png = buf.encode(ImageFileFormat::Png).expect("encode png");
        let decoded = ImageBuffer::decode(&png).expect("decode png");
        assert_eq!(decoded.pixel(0, 0), &[30, 20, 10, 255]);
    }

    #[test]
    fn every_file_format_produces_bytes() {
        let rgba = gradient(PixelFormat::Rgba32);
        let gray = gradient(PixelFormat::Gray8);
        for format in [
            ImageFileFormat::Png,
            ImageFileFormat::Jpeg(90),
            ImageFileFormat::Bmp,
            ImageFileFormat::Tiff,
        ] {
            assert!(!rgba.encode(format).expect("rgba encodes").is_empty());
            assert!(!gray.encode(format).expect("gray encodes").is_empty());
        }
    }

    #[test]
    fn save_writes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("page.png");
        gradient(PixelFormat::Rgb24).save_png(&path).expect("save");
        let bytes = std::fs::read(&path).expect("read back");
        assert_eq!(&bytes[..4], b"\x89PNG");
    }

    #[test]
    fn blit_clips_at_edges() {
        let mut dst = ImageBuffer::new(3, 3, PixelFormat::Gray8);
        let mut src = ImageBuffer::new(2, 2, PixelFormat::Gray8);
        src.data_mut().copy_from_slice(&[1, 2, 3, 4]);
        dst.blit(&src, 2, 2).expect("same format");
        assert_eq!(dst.data(), &[0, 0, 0, 0, 0, 0, 0, 0, 1]);

        dst.blit(&src, 100, 0).expect("fully outside is a no-op");
        dst.blit(&src, 0, 3).expect("fully outside is a no-op");
        dst.blit(&src, 3, 1).expect("fully outside is a no-op");
        assert_eq!(dst.data(), &[0, 0, 0, 0, 0, 0, 0, 0, 1]);

        let other = ImageBuffer::new(1, 1, PixelFormat::Rgb24);
        assert!(dst.blit(&other, 0, 0).is_err());
    }

    #[test]
    fn file_format_from_extension() {
        assert_eq!(ImageFileFormat::from_extension("PNG"), Some(ImageFileFormat::Png));
        assert_eq!(
            ImageFileFormat::from_extension("jpeg"),
            Some(ImageFileFormat::Jpeg(85))
        );
        assert_eq!(ImageFileFormat::from_extension("gif"), None);
    }
}
