//! Render request model
//!
//! [`RenderOptions`] is validated on construction and immutable afterwards.
//! Its [`Fingerprint`] is derived from every field and forms half of a
//! render cache key.

use serde::{Deserialize, Serialize};

use super::buffer::PixelFormat;
use super::error::RenderError;
use super::geometry::{Rect, Rotation};

/// DPI presets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderQuality {
    /// Screen preview
    Draft,
    Low,
    Medium,
    /// Print quality
    High,
    VeryHigh,
}

impl RenderQuality {
    #[must_use]
    pub const fn dpi(self) -> f32 {
        match self {
            Self::Draft => 72.0,
            Self::Low => 96.0,
            Self::Medium => 150.0,
            Self::High => 300.0,
            Self::VeryHigh => 600.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntiAliasing {
    None,
    Text,
    Graphics,
    #[default]
    All,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    #[default]
    Rgb,
    Cmyk,
    Grayscale,
    Monochrome,
}

/// RGBA colour with components in `[0, 1]`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Self = Self::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Self = Self::rgb(0.0, 0.0, 0.0);

    #[must_use]
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    #[must_use]
    pub fn to_rgba8(self) -> [u8; 4] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }

    fn components(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

/// What to render and how. Construct through [`RenderOptions::builder`].
#[derive(Clone, Debug, PartialEq)]
pub struct RenderOptions {
    dpi: f32,
    anti_aliasing: AntiAliasing,
    color_mode: ColorMode,
    pixel_format: PixelFormat,
    background: Color,
    render_annotations: bool,
    render_forms: bool,
    render_transparent: bool,
    clip: Option<Rect>,
    rotation: Option<Rotation>,
    fingerprint: Fingerprint,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptionsBuilder::default().assemble()
    }
}

impl RenderOptions {
    pub const DEFAULT_DPI: f32 = 150.0;

    #[must_use]
    pub fn builder() -> RenderOptionsBuilder {
        RenderOptionsBuilder::default()
    }

    /// Builder pre-filled with this request's values
    #[must_use]
    pub fn to_builder(&self) -> RenderOptionsBuilder {
        RenderOptionsBuilder {
            dpi: self.dpi,
            anti_aliasing: self.anti_aliasing,
            color_mode: self.color_mode,
            pixel_format: self.pixel_format,
            background: self.background,
            render_annotations: self.render_annotations,
            render_forms: self.render_forms,
            render_transparent: self.render_transparent,
            clip: self.clip,
            rotation: self.rotation,
        }
    }

    /// Same request at a different resolution
    pub fn with_dpi(&self, dpi: f32) -> Result<Self, RenderError> {
        self.to_builder().dpi(dpi).build()
    }

    /// Same request restricted to a page-space region
    pub fn with_clip(&self, clip: Rect) -> Result<Self, RenderError> {
        self.to_builder().clip(clip).build()
    }

    #[must_use]
    pub fn dpi(&self) -> f32 {
        self.dpi
    }

    /// Pixels per page-space point
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.dpi / super::geometry::POINTS_PER_INCH
    }

    #[must_use]
    pub fn anti_aliasing(&self) -> AntiAliasing {
        self.anti_aliasing
    }

    #[must_use]
    pub fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    #[must_use]
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    #[must_use]
    pub fn background(&self) -> Color {
        self.background
    }

    #[must_use]
    pub fn render_annotations(&self) -> bool {
        self.render_annotations
    }

    #[must_use]
    pub fn render_forms(&self) -> bool {
        self.render_forms
    }

    #[must_use]
    pub fn render_transparent(&self) -> bool {
        self.render_transparent
    }

    #[must_use]
    pub fn clip(&self) -> Option<Rect> {
        self.clip
    }

    /// Rotation that replaces the page's own, if any
    #[must_use]
    pub fn rotation(&self) -> Option<Rotation> {
        self.rotation
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

#[derive(Clone, Debug)]
pub struct RenderOptionsBuilder {
    dpi: f32,
    anti_aliasing: AntiAliasing,
    color_mode: ColorMode,
    pixel_format: PixelFormat,
    background: Color,
    render_annotations: bool,
    render_forms: bool,
    render_transparent: bool,
    clip: Option<Rect>,
    rotation: Option<Rotation>,
}

impl Default for RenderOptionsBuilder {
    fn default() -> Self {
        Self {
            dpi: RenderOptions::DEFAULT_DPI,
            anti_aliasing: AntiAliasing::All,
            color_mode: ColorMode::Rgb,
            pixel_format: PixelFormat::Rgb24,
            background: Color::WHITE,
            render_annotations: true,
            render_forms: true,
            render_transparent: false,
            clip: None,
            rotation: None,
        }
    }
}

impl RenderOptionsBuilder {
    #[must_use]
    pub fn dpi(mut self, dpi: f32) -> Self {
        self.dpi = dpi;
        self
    }

    #[must_use]
    pub fn quality(self, quality: RenderQuality) -> Self {
        self.dpi(quality.dpi())
    }

    #[must_use]
    pub fn anti_aliasing(mut self, anti_aliasing: AntiAliasing) -> Self {
        self.anti_aliasing = anti_aliasing;
        self
    }

    #[must_use]
    pub fn color_mode(mut self, color_mode: ColorMode) -> Self {
        self.color_mode = color_mode;
        self
    }

    #[must_use]
    pub fn pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    #[must_use]
    pub fn background(mut self, background: Color) -> Self {
        self.background = background;
        self
    }

    #[must_use]
    pub fn render_annotations(mut self, on: bool) -> Self {
        self.render_annotations = on;
        self
    }

    #[must_use]
    pub fn render_forms(mut self, on: bool) -> Self {
        self.render_forms = on;
        self
    }

    #[must_use]
    pub fn render_transparent(mut self, on: bool) -> Self {
        self.render_transparent = on;
        self
    }

    #[must_use]
    pub fn clip(mut self, clip: Rect) -> Self {
        self.clip = Some(clip);
        self
    }

    #[must_use]
    pub fn no_clip(mut self) -> Self {
        self.clip = None;
        self
    }

    #[must_use]
    pub fn rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = Some(rotation);
        self
    }

    #[must_use]
    pub fn page_rotation(mut self) -> Self {
        self.rotation = None;
        self
    }

    pub fn build(self) -> Result<RenderOptions, RenderError> {
        if !(self.dpi.is_finite() && self.dpi > 0.0) {
            return Err(RenderError::invalid(format!(
                "dpi must be positive, got {}",
                self.dpi
            )));
        }
        if let Some(clip) = self.clip {
            if !clip.is_finite() || clip.is_empty() {
                return Err(RenderError::invalid(format!(
                    "clip rectangle must have positive width and height, got {clip:?}"
                )));
            }
        }
        if self
            .background
            .components()
            .iter()
            .any(|c| !(0.0..=1.0).contains(c))
        {
            return Err(RenderError::invalid(format!(
                "background colour components must be in [0, 1], got {:?}",
                self.background
            )));
        }
        Ok(self.assemble())
    }

    fn assemble(self) -> RenderOptions {
        let fingerprint = Fingerprint::of(&self);
        RenderOptions {
            dpi: self.dpi,
            anti_aliasing: self.anti_aliasing,
            color_mode: self.color_mode,
            pixel_format: self.pixel_format,
            background: self.background,
            render_annotations: self.render_annotations,
            render_forms: self.render_forms,
            render_transparent: self.render_transparent,
            clip: self.clip,
            rotation: self.rotation,
            fingerprint,
        }
    }
}

/// Structural identity of a [`RenderOptions`].
///
/// Every field is stored losslessly (floats by bit pattern with `-0.0`
/// folded into `0.0`), so equal requests share a fingerprint and any field
/// difference yields a different one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    dpi: u32,
    anti_aliasing: AntiAliasing,
    color_mode: ColorMode,
    pixel_format: PixelFormat,
    flags: u8,
    background: [u32; 4],
    clip: Option<[u32; 4]>,
    rotation: Option<Rotation>,
}

const FLAG_ANNOTATIONS: u8 = 1;
const FLAG_FORMS: u8 = 1 << 1;
const FLAG_TRANSPARENT: u8 = 1 << 2;

fn float_key(v: f32) -> u32 {
    if v == 0.0 { 0 } else { v.to_bits() }
}

impl Fingerprint {
    fn of(b: &RenderOptionsBuilder) -> Self {
        let mut flags = 0;
        if b.render_annotations {
            flags |= FLAG_ANNOTATIONS;
        }
        if b.render_forms {
            flags |= FLAG_FORMS;
        }
        if b.render_transparent {
            flags |= FLAG_TRANSPARENT;
        }
        Self {
            dpi: float_key(b.dpi),
            anti_aliasing: b.anti_aliasing,
            color_mode: b.color_mode,
            pixel_format: b.pixel_format,
            flags,
            background: b.background.components().map(float_key),
            clip: b
                .clip
                .map(|r| [float_key(r.x0), float_key(r.y0), float_key(r.x1), float_key(r.y1)]),
            rotation: b.rotation,
        }
    }

    fn to_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(48);
        out.extend_from_slice(&self.dpi.to_le_bytes());
        out.push(self.anti_aliasing as u8);
        out.push(self.color_mode as u8);
        out.push(self.pixel_format as u8);
        out.push(self.flags);
        for c in self.background {
            out.extend_from_slice(&c.to_le_bytes());
        }
        match self.clip {
            Some(clip) => {
                out.push(1);
                for c in clip {
                    out.extend_from_slice(&c.to_le_bytes());
                }
            }
            None => out.push(0),
        }
        match self.rotation {
            Some(r) => out.extend_from_slice(&(r.degrees() + 1).to_le_bytes()),
            None => out.extend_from_slice(&0u16.to_le_bytes()),
        }
        out
    }

    /// MD5 digest of the canonical encoding, for logs and file names
    #[must_use]
    pub fn digest(self) -> [u8; 16] {
        md5::compute(self.to_bytes()).0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.digest()[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
