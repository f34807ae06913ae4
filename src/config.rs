//! Overlay configuration with validated blur parameters

use crate::error::ConfigError;
use crate::{Position, Size};

pub const MIN_BLUR_RADIUS: u32 = 1;
pub const MAX_BLUR_RADIUS: u32 = 25;
pub const DEFAULT_BLUR_RADIUS: u32 = 25;

pub const MIN_BLUR_PASSES: u32 = 1;
pub const MAX_BLUR_PASSES: u32 = 5;
pub const DEFAULT_BLUR_PASSES: u32 = 1;

/// Blur radius in pixels, always within `1..=25`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlurRadius(u32);

impl BlurRadius {
    pub fn new(value: u32) -> Result<Self, ConfigError> {
        if (MIN_BLUR_RADIUS..=MAX_BLUR_RADIUS).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ConfigError::BlurRadius { value })
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for BlurRadius {
    fn default() -> Self {
        Self(DEFAULT_BLUR_RADIUS)
    }
}

impl TryFrom<u32> for BlurRadius {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Number of sequential blur passes, always within `1..=5`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlurPasses(u32);

impl BlurPasses {
    pub fn new(value: u32) -> Result<Self, ConfigError> {
        if (MIN_BLUR_PASSES..=MAX_BLUR_PASSES).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ConfigError::BlurPasses { value })
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for BlurPasses {
    fn default() -> Self {
        Self(DEFAULT_BLUR_PASSES)
    }
}

impl TryFrom<u32> for BlurPasses {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// When a cached blurred background gets recomputed.
///
/// `OnceOnFirstCapture` keeps painting the first snapshot across scrolls and
/// moves until the cache is cleared: cheap, but stale if the background
/// content underneath shifts. `OnEveryPositionChange` re-captures and
/// re-blurs whenever an evaluation finds the triple differs from the one that
/// produced the cached image, at the cost of a capture plus a full blur per
/// change. Evaluations run when the overlay's position or clip size changes,
/// or after [`OverlayCompositor::clear_cache`]; a background that moves under
/// a still overlay is only picked up at the next evaluation.
///
/// [`OverlayCompositor::clear_cache`]: crate::OverlayCompositor::clear_cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    #[default]
    OnceOnFirstCapture,
    OnEveryPositionChange,
}

/// Placement of overlay content inside the overlay bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    #[default]
    TopStart,
    TopCenter,
    TopEnd,
    CenterStart,
    Center,
    CenterEnd,
    BottomStart,
    BottomCenter,
    BottomEnd,
}

impl Alignment {
    /// Offset of `content` inside `bounds`, relative to the bounds origin.
    /// Content larger than the bounds gets a negative offset on that axis.
    pub fn align(self, content: Size, bounds: Size) -> Position {
        let free_x = bounds.width as i64 - content.width as i64;
        let free_y = bounds.height as i64 - content.height as i64;

        let (fx, fy) = match self {
            Alignment::TopStart => (0, 0),
            Alignment::TopCenter => (1, 0),
            Alignment::TopEnd => (2, 0),
            Alignment::CenterStart => (0, 1),
            Alignment::Center => (1, 1),
            Alignment::CenterEnd => (2, 1),
            Alignment::BottomStart => (0, 2),
            Alignment::BottomCenter => (1, 2),
            Alignment::BottomEnd => (2, 2),
        };

        Position::new(
            clamp_i32(free_x * fx / 2),
            clamp_i32(free_y * fy / 2),
        )
    }
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Configuration surface of an overlay compositor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlassConfig {
    pub blur_radius: BlurRadius,
    pub blur_passes: BlurPasses,
    pub content_alignment: Alignment,
    pub refresh_policy: RefreshPolicy,
}

impl GlassConfig {
    pub fn new(blur_radius: u32, blur_passes: u32) -> Result<Self, ConfigError> {
        Ok(Self {
            blur_radius: BlurRadius::new(blur_radius)?,
            blur_passes: BlurPasses::new(blur_passes)?,
            ..Self::default()
        })
    }

    pub fn with_blur_radius(mut self, radius: u32) -> Result<Self, ConfigError> {
        self.blur_radius = BlurRadius::new(radius)?;
        Ok(self)
    }

    pub fn with_blur_passes(mut self, passes: u32) -> Result<Self, ConfigError> {
        self.blur_passes = BlurPasses::new(passes)?;
        Ok(self)
    }

    pub fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.content_alignment = alignment;
        self
    }

    pub fn with_refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.refresh_policy = policy;
        self
    }
}
