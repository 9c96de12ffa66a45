//! Error taxonomy for the rendering core

/// Coarse classification of a [`RenderError`], for callers that only
/// need to decide how to present a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    Render,
    Cancelled,
    NotImplemented,
}

/// Errors returned by the renderer, the cache-backed render paths and the
/// async scheduler.
///
/// `InvalidArgument` is a caller error and is never retried. `Render`
/// carries the rasterizer's own diagnostic. `Cancelled` is a valid terminal
/// outcome rather than a failure.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("render cancelled")]
    Cancelled,

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl RenderError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Render(_) => ErrorKind::Render,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Failure reported by a [`Rasterizer`](super::Rasterizer).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct RasterFailure(pub String);

impl RasterFailure {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<RasterFailure> for RenderError {
    fn from(failure: RasterFailure) -> Self {
        Self::Render(failure.0)
    }
}
