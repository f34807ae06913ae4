//! Error taxonomy for the capture and blur pipeline

use thiserror::Error;

use crate::config::{MAX_BLUR_PASSES, MAX_BLUR_RADIUS, MIN_BLUR_PASSES, MIN_BLUR_RADIUS};

/// Invalid configuration, raised synchronously before any work starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("blur radius {value} outside {}..={}", MIN_BLUR_RADIUS, MAX_BLUR_RADIUS)]
    BlurRadius { value: u32 },

    #[error("blur passes {value} outside {}..={}", MIN_BLUR_PASSES, MAX_BLUR_PASSES)]
    BlurPasses { value: u32 },
}

/// Rasterizing the background surface failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("surface has not been rendered yet")]
    NotRendered,

    #[error("rasterization failed: {0}")]
    Rasterize(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlurError {
    #[error("blur filter failed: {0}")]
    Filter(String),

    #[error("blur worker panicked")]
    Panicked,
}

/// Anything the engine can hand to an overlay's error handler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GlassError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Blur(#[from] BlurError),

    /// A request was dropped by its producer without being completed.
    #[error("{request} request dropped without completion")]
    Unresolved { request: &'static str },
}

pub type Result<T, E = GlassError> = std::result::Result<T, E>;
