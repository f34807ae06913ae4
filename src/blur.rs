//! Multi-pass blur stage and the filters it can run

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use image::{imageops, RgbaImage};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{trace, warn};

use crate::config::{BlurPasses, BlurRadius, GlassConfig};
use crate::deferred::{self, Deferred};
use crate::error::{BlurError, GlassError};
use crate::CapturedImage;

/// Single blur application at a given radius. Implementations must keep the
/// image dimensions unchanged.
pub trait BlurFilter: Send + Sync {
    fn blur(&self, image: &RgbaImage, radius: BlurRadius) -> Result<RgbaImage, BlurError>;
}

/// Gaussian blur backed by `image::imageops::blur`
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianBlur;

impl GaussianBlur {
    /// Radius to sigma mapping used by the RenderScript blur toolkit
    pub fn sigma(radius: BlurRadius) -> f32 {
        0.4 * radius.get() as f32 + 0.6
    }
}

impl BlurFilter for GaussianBlur {
    fn blur(&self, image: &RgbaImage, radius: BlurRadius) -> Result<RgbaImage, BlurError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(image.clone());
        }
        Ok(imageops::blur(image, Self::sigma(radius)))
    }
}

/// Separable box blur, rows processed in parallel
#[derive(Debug, Clone, Copy, Default)]
pub struct BoxBlur;

impl BlurFilter for BoxBlur {
    fn blur(&self, image: &RgbaImage, radius: BlurRadius) -> Result<RgbaImage, BlurError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(image.clone());
        }
        let radius = radius.get() as usize;
        // Columns are blurred as rows of the rotated image.
        let horizontal = blur_rows(image, radius);
        let rotated = imageops::rotate90(&horizontal);
        let vertical = blur_rows(&rotated, radius);
        Ok(imageops::rotate270(&vertical))
    }
}

fn blur_rows(image: &RgbaImage, radius: usize) -> RgbaImage {
    let (width, height) = image.dimensions();
    let row_len = width as usize * 4;
    let src = image.as_raw();
    let mut dst = vec![0u8; src.len()];

    dst.par_chunks_mut(row_len)
        .zip(src.par_chunks(row_len))
        .for_each(|(out, row)| blur_row(row, out, radius));

    // Same dimensions as the source, so the buffer always fits.
    RgbaImage::from_raw(width, height, dst).unwrap_or_else(|| image.clone())
}

/// Rolling-window box blur of one RGBA row with clamped edges
fn blur_row(src: &[u8], dst: &mut [u8], radius: usize) {
    let width = src.len() / 4;
    if width == 0 {
        return;
    }
    let last = width - 1;
    let window = (2 * radius + 1) as u32;

    for channel in 0..4 {
        let at = |x: usize| src[x * 4 + channel] as u32;

        let mut sum: u32 = (0..=2 * radius)
            .map(|i| at(i.saturating_sub(radius).min(last)))
            .sum();

        for x in 0..width {
            dst[x * 4 + channel] = ((sum + window / 2) / window) as u8;
            sum += at((x + radius + 1).min(last));
            sum -= at(x.saturating_sub(radius).min(last));
        }
    }
}

static BLUR_POOL: Lazy<Option<ThreadPool>> = Lazy::new(|| {
    match ThreadPoolBuilder::new()
        .thread_name(|i| format!("glass-blur-{i}"))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(err) => {
            warn!(error = %err, "blur pool unavailable, using the global rayon pool");
            None
        }
    }
});

/// Blur configuration plus the filter that performs each pass
#[derive(Clone)]
pub struct BlurStage {
    filter: Arc<dyn BlurFilter>,
    radius: BlurRadius,
    passes: BlurPasses,
}

impl BlurStage {
    pub fn new(radius: BlurRadius, passes: BlurPasses) -> Self {
        Self {
            filter: Arc::new(GaussianBlur),
            radius,
            passes,
        }
    }

    pub fn from_config(config: &GlassConfig) -> Self {
        Self::new(config.blur_radius, config.blur_passes)
    }

    pub fn with_filter(mut self, filter: Arc<dyn BlurFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn radius(&self) -> BlurRadius {
        self.radius
    }

    pub fn passes(&self) -> BlurPasses {
        self.passes
    }

    /// Run every pass on the calling thread, each pass blurring the previous
    /// pass's output.
    pub fn apply(&self, image: &CapturedImage) -> Result<CapturedImage, BlurError> {
        run_passes(self.filter.as_ref(), image, self.radius, self.passes)
    }

    /// Run [`BlurStage::apply`] on the blur worker pool.
    pub fn spawn(&self, image: CapturedImage) -> Deferred<CapturedImage> {
        let (mut completer, deferred) = deferred::pair("blur");
        let stage = self.clone();
        let job = move || {
            trace!(
                width = image.width(),
                height = image.height(),
                radius = stage.radius.get(),
                passes = stage.passes.get(),
                "blur started"
            );
            match panic::catch_unwind(AssertUnwindSafe(|| stage.apply(&image))) {
                Ok(Ok(blurred)) => completer.succeed(blurred),
                Ok(Err(err)) => completer.fail(err),
                Err(_) => completer.fail(BlurError::Panicked),
            };
        };
        match &*BLUR_POOL {
            Some(pool) => pool.spawn(job),
            None => rayon::spawn(job),
        }
        deferred
    }
}

impl std::fmt::Debug for BlurStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlurStage")
            .field("radius", &self.radius)
            .field("passes", &self.passes)
            .finish()
    }
}

fn run_passes(
    filter: &dyn BlurFilter,
    image: &CapturedImage,
    radius: BlurRadius,
    passes: BlurPasses,
) -> Result<CapturedImage, BlurError> {
    let mut output = filter.blur(image.pixels(), radius)?;
    for _ in 1..passes.get() {
        output = filter.blur(&output, radius)?;
    }
    Ok(CapturedImage::new(output))
}

/// Validate `radius` and `passes`, then blur `image` synchronously.
pub fn blur(
    filter: &dyn BlurFilter,
    image: &CapturedImage,
    radius: u32,
    passes: u32,
) -> Result<CapturedImage, GlassError> {
    let radius = BlurRadius::new(radius)?;
    let passes = BlurPasses::new(passes)?;
    Ok(run_passes(filter, image, radius, passes)?)
}
