//! Overlay compositor: per-overlay capture, crop, blur and cache
//!
//! The host drives one [`OverlayCompositor`] per overlay from the render
//! thread:
//!
//! 1. layout pass: [`OverlayCompositor::on_layout`] with the overlay's root
//!    position and size;
//! 2. after layout: [`OverlayCompositor::update`], which advances in-flight
//!    work and issues new requests when the inputs changed;
//! 3. draw pass: the background capturer serves its queue, then
//!    [`OverlayCompositor::paint`] draws the cached image, if any.
//!
//! Offset and capture results arrive through the capturer's queue, blur
//! results from the blur worker pool. Nothing here blocks.

use tracing::{debug, trace, warn};

use crate::blur::{BlurFilter, BlurStage};
use crate::capturer::Capturer;
use crate::config::{GlassConfig, RefreshPolicy};
use crate::deferred::Deferred;
use crate::error::GlassError;
use crate::region::resolve_source_rect;
use crate::{Canvas, CapturedImage, Position, Size};

use std::sync::Arc;

/// Callback receiving every pipeline failure
pub type ErrorHandler = Box<dyn FnMut(&GlassError)>;

/// Inputs an image was produced from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Background position observed through the last offset request
    pub background: Option<Position>,
    pub overlay: Position,
    pub clip: Size,
}

/// Cached blurred background together with its inputs
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub image: CapturedImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorState {
    /// Nothing cached, nothing in flight: the overlay paints no background
    Idle,
    AwaitingOffset,
    AwaitingCapture,
    AwaitingBlur,
    /// A cached image exists and is painted
    Ready,
}

enum Stage {
    Idle,
    Offset(Deferred<Position>),
    Capture(Deferred<CapturedImage>),
    Blur {
        pending: Deferred<CapturedImage>,
        key: CacheKey,
    },
}

/// Frosted-glass background for one overlay
pub struct OverlayCompositor {
    capturer: Capturer,
    config: GlassConfig,
    blur: BlurStage,
    on_error: Option<ErrorHandler>,
    position: Position,
    clip: Size,
    background: Option<Position>,
    evaluated: Option<CacheKey>,
    cache: Option<CacheEntry>,
    stage: Stage,
}

impl OverlayCompositor {
    pub fn new(capturer: Capturer, config: GlassConfig) -> Self {
        Self {
            capturer,
            blur: BlurStage::from_config(&config),
            config,
            on_error: None,
            position: Position::ZERO,
            clip: Size::ZERO,
            background: None,
            evaluated: None,
            cache: None,
            stage: Stage::Idle,
        }
    }

    /// Replace the default gaussian filter.
    pub fn with_filter(mut self, filter: Arc<dyn BlurFilter>) -> Self {
        self.blur = self.blur.with_filter(filter);
        self
    }

    pub fn with_error_handler(mut self, handler: impl FnMut(&GlassError) + 'static) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }

    pub fn set_error_handler(&mut self, handler: Option<ErrorHandler>) {
        self.on_error = handler;
    }

    pub fn config(&self) -> &GlassConfig {
        &self.config
    }

    pub fn capturer(&self) -> &Capturer {
        &self.capturer
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn clip_size(&self) -> Size {
        self.clip
    }

    /// Background position recorded from the last resolved offset request
    pub fn background_position(&self) -> Option<Position> {
        self.background
    }

    pub fn cached_image(&self) -> Option<&CapturedImage> {
        self.cache.as_ref().map(|entry| &entry.image)
    }

    /// Inputs the cached image was produced from
    pub fn cache_key(&self) -> Option<CacheKey> {
        self.cache.as_ref().map(|entry| entry.key)
    }

    pub fn state(&self) -> CompositorState {
        match self.stage {
            Stage::Offset(_) => CompositorState::AwaitingOffset,
            Stage::Capture(_) => CompositorState::AwaitingCapture,
            Stage::Blur { .. } => CompositorState::AwaitingBlur,
            Stage::Idle if self.cache.is_some() => CompositorState::Ready,
            Stage::Idle => CompositorState::Idle,
        }
    }

    /// Offset of overlay content of `content` size inside the overlay bounds
    pub fn content_offset(&self, content: Size) -> Position {
        self.config.content_alignment.align(content, self.clip)
    }

    /// Layout pass: store the overlay's root position and size. The cached
    /// image is left alone; [`OverlayCompositor::update`] decides what to do.
    pub fn on_layout(&mut self, position: Position, size: Size) {
        self.position = position;
        self.clip = size;
    }

    /// Drop the cached image so the next update captures again.
    pub fn clear_cache(&mut self) {
        self.cache = None;
        self.evaluated = None;
    }

    /// Point the overlay at another background. In-flight work for the old
    /// background is discarded along with the cache.
    pub fn set_capturer(&mut self, capturer: Capturer) {
        if Capturer::ptr_eq(&self.capturer, &capturer) {
            return;
        }
        debug!(
            from = self.capturer.id(),
            to = capturer.id(),
            "overlay switched capturer"
        );
        self.capturer = capturer;
        self.stage = Stage::Idle;
        self.background = None;
        self.clear_cache();
    }

    pub fn current_key(&self) -> CacheKey {
        CacheKey {
            background: self.background,
            overlay: self.position,
            clip: self.clip,
        }
    }

    /// Advance the pipeline: take whatever results arrived, then start a new
    /// evaluation if the inputs changed since the last one.
    pub fn update(&mut self) -> CompositorState {
        self.poll_stage();

        if matches!(self.stage, Stage::Idle) {
            let key = self.current_key();
            if self.evaluated != Some(key) {
                trace!(?key, "inputs changed, requesting background offset");
                self.evaluated = Some(key);
                self.stage = Stage::Offset(self.capturer.request_offset());
            }
        }
        self.state()
    }

    /// Draw the cached image as the overlay's background, in root
    /// coordinates. Draws nothing while no image is cached.
    pub fn paint(&self, canvas: &mut dyn Canvas) {
        if let Some(entry) = &self.cache {
            canvas.draw_image(&entry.image, self.position);
        }
    }

    fn poll_stage(&mut self) {
        // One stage can complete and the next start within a single update;
        // each new request waits for the next serve or worker result.
        loop {
            let outcome = match std::mem::replace(&mut self.stage, Stage::Idle) {
                Stage::Idle => return,
                Stage::Offset(pending) => match pending.try_take() {
                    None => {
                        self.stage = Stage::Offset(pending);
                        return;
                    }
                    Some(result) => result.map(|background| self.on_offset(background)),
                },
                Stage::Capture(pending) => match pending.try_take() {
                    None => {
                        self.stage = Stage::Capture(pending);
                        return;
                    }
                    Some(result) => result.map(|image| self.on_capture(image)),
                },
                Stage::Blur { pending, key } => match pending.try_take() {
                    None => {
                        self.stage = Stage::Blur { pending, key };
                        return;
                    }
                    Some(result) => result.map(|image| self.on_blurred(image, key)),
                },
            };
            if let Err(err) = outcome {
                self.report(err);
            }
        }
    }

    fn on_offset(&mut self, background: Position) {
        if self.background != Some(background) {
            debug!(?background, "background moved");
            self.background = Some(background);
        }
        // The evaluation covers the background position it just observed.
        self.evaluated = Some(self.current_key());
        if self.needs_capture() {
            self.stage = Stage::Capture(self.capturer.request_capture());
        } else if self.clip.is_empty() {
            self.drop_stale_cache();
        }
    }

    /// Under live refresh the cache must match the current triple, so an
    /// overlay with no region left paints nothing.
    fn drop_stale_cache(&mut self) {
        if self.config.refresh_policy == RefreshPolicy::OnEveryPositionChange
            && self.cache.take().is_some()
        {
            debug!(key = ?self.current_key(), "overlay region is empty, cached image dropped");
        }
    }

    fn needs_capture(&self) -> bool {
        if self.clip.is_empty() {
            return false;
        }
        match self.config.refresh_policy {
            RefreshPolicy::OnceOnFirstCapture => self.cache.is_none(),
            RefreshPolicy::OnEveryPositionChange => {
                self.cache_key() != Some(self.current_key())
            }
        }
    }

    fn on_capture(&mut self, image: CapturedImage) {
        let key = self.current_key();
        let Some(background) = key.background else {
            return;
        };
        let rect = resolve_source_rect(background, key.overlay, key.clip, image.size());
        if rect.is_empty() {
            debug!(?key, image = ?image.size(), "overlay region is empty, nothing to blur");
            self.drop_stale_cache();
            return;
        }
        trace!(?rect, "cropping captured background");
        let cropped = image.crop(rect);
        self.stage = Stage::Blur {
            pending: self.blur.spawn(cropped),
            key,
        };
    }

    fn on_blurred(&mut self, image: CapturedImage, key: CacheKey) {
        debug!(?key, size = ?image.size(), "blurred background cached");
        self.cache = Some(CacheEntry { key, image });
    }

    fn report(&mut self, err: GlassError) {
        match self.on_error.as_mut() {
            Some(handler) => handler(&err),
            None => warn!(error = %err, "frosted glass pipeline failed"),
        }
    }
}

impl std::fmt::Debug for OverlayCompositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayCompositor")
            .field("capturer", &self.capturer.id())
            .field("state", &self.state())
            .field("position", &self.position)
            .field("clip", &self.clip)
            .field("background", &self.background)
            .field("cache_key", &self.cache_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blur::BoxBlur;
    use crate::capturer::FrameLayer;
    use crate::error::CaptureError;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    fn setup(config: GlassConfig) -> (Capturer, FrameLayer, OverlayCompositor) {
        let (capturer, layer) = Capturer::with_layer();
        layer.record(CapturedImage::filled(400, 400, [200, 220, 240, 255]));
        let compositor = OverlayCompositor::new(capturer.clone(), config)
            .with_filter(Arc::new(BoxBlur));
        (capturer, layer, compositor)
    }

    /// Run frames until the compositor settles in `Ready` or `Idle`.
    fn settle(capturer: &Capturer, compositor: &mut OverlayCompositor) -> CompositorState {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let state = compositor.update();
            let served = capturer.serve_pending();
            if served == 0 && matches!(state, CompositorState::Ready | CompositorState::Idle) {
                return state;
            }
            assert!(Instant::now() < deadline, "compositor did not settle");
            if state == CompositorState::AwaitingBlur {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    #[test]
    fn test_idle_until_laid_out() {
        let (capturer, _layer, mut compositor) = setup(GlassConfig::default());
        assert_eq!(compositor.state(), CompositorState::Idle);
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Idle);
        assert!(compositor.cached_image().is_none());
    }

    #[test]
    fn test_first_capture_produces_cropped_blur() {
        let (capturer, _layer, mut compositor) = setup(GlassConfig::default());
        capturer.report_position(Position::new(0, 0));
        compositor.on_layout(Position::new(50, 50), Size::new(100, 100));

        assert_eq!(compositor.update(), CompositorState::AwaitingOffset);
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Ready);

        let key = compositor.cache_key().unwrap();
        assert_eq!(key.background, Some(Position::new(0, 0)));
        assert_eq!(key.overlay, Position::new(50, 50));
        assert_eq!(compositor.cached_image().unwrap().size(), Size::new(100, 100));
    }

    #[test]
    fn test_cache_locked_after_first_capture() {
        let (capturer, _layer, mut compositor) = setup(GlassConfig::default());
        compositor.on_layout(Position::new(10, 10), Size::new(40, 40));
        compositor.update();
        compositor.on_layout(Position::new(20, 20), Size::new(40, 40));
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Ready);
        let first = compositor.cached_image().unwrap().clone();

        capturer.report_position(Position::new(0, -30));
        compositor.on_layout(Position::new(20, 60), Size::new(40, 40));
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Ready);

        assert!(CapturedImage::ptr_eq(&first, compositor.cached_image().unwrap()));
        assert_eq!(compositor.background_position(), Some(Position::new(0, -30)));
    }

    #[test]
    fn test_every_change_policy_recomputes() {
        let config = GlassConfig::default().with_refresh_policy(RefreshPolicy::OnEveryPositionChange);
        let (capturer, _layer, mut compositor) = setup(config);
        compositor.on_layout(Position::new(10, 10), Size::new(40, 40));
        settle(&capturer, &mut compositor);
        let first = compositor.cached_image().unwrap().clone();

        compositor.on_layout(Position::new(30, 10), Size::new(40, 40));
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Ready);
        assert!(!CapturedImage::ptr_eq(&first, compositor.cached_image().unwrap()));
        assert_eq!(compositor.cache_key().unwrap().overlay, Position::new(30, 10));
    }

    #[test]
    fn test_every_change_policy_empty_region_paints_nothing() {
        let config = GlassConfig::default().with_refresh_policy(RefreshPolicy::OnEveryPositionChange);
        let (capturer, _layer, mut compositor) = setup(config);
        compositor.on_layout(Position::new(10, 10), Size::new(40, 40));
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Ready);

        // Moved entirely off the 400x400 background.
        compositor.on_layout(Position::new(500, 500), Size::new(40, 40));
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Idle);
        assert!(compositor.cached_image().is_none());
        let mut canvas = image::RgbaImage::new(600, 600);
        compositor.paint(&mut canvas);
        assert_eq!(canvas.get_pixel(510, 510), &image::Rgba([0, 0, 0, 0]));

        compositor.on_layout(Position::new(10, 10), Size::new(40, 40));
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Ready);

        // Collapsed to a zero-size clip.
        compositor.on_layout(Position::new(10, 10), Size::ZERO);
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Idle);
        assert!(compositor.cached_image().is_none());
    }

    #[test]
    fn test_once_policy_keeps_image_over_empty_region() {
        let (capturer, _layer, mut compositor) = setup(GlassConfig::default());
        compositor.on_layout(Position::new(10, 10), Size::new(40, 40));
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Ready);

        compositor.on_layout(Position::new(10, 10), Size::ZERO);
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Ready);
        assert!(compositor.cached_image().is_some());
    }

    #[test]
    fn test_clear_cache_recaptures() {
        let (capturer, _layer, mut compositor) = setup(GlassConfig::default());
        compositor.on_layout(Position::new(0, 0), Size::new(30, 30));
        settle(&capturer, &mut compositor);
        let first = compositor.cached_image().unwrap().clone();

        compositor.clear_cache();
        assert_eq!(compositor.state(), CompositorState::Idle);
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Ready);
        assert!(!CapturedImage::ptr_eq(&first, compositor.cached_image().unwrap()));
    }

    #[test]
    fn test_capture_error_reaches_handler() {
        let (capturer, layer) = Capturer::with_layer();
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&errors);
        let mut compositor = OverlayCompositor::new(capturer.clone(), GlassConfig::default())
            .with_error_handler(move |err| sink.borrow_mut().push(err.clone()));

        compositor.on_layout(Position::new(5, 5), Size::new(20, 20));
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Idle);
        assert_eq!(
            errors.borrow().as_slice(),
            &[GlassError::Capture(CaptureError::NotRendered)]
        );

        // No retry until the layout changes again.
        layer.record(CapturedImage::filled(100, 100, [0, 0, 0, 255]));
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Idle);

        compositor.on_layout(Position::new(6, 5), Size::new(20, 20));
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Ready);
        assert_eq!(errors.borrow().len(), 1);
    }

    #[test]
    fn test_error_keeps_previous_image() {
        let config = GlassConfig::default().with_refresh_policy(RefreshPolicy::OnEveryPositionChange);
        let (capturer, layer, mut compositor) = setup(config);
        let errors = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&errors);
        compositor.set_error_handler(Some(Box::new(move |_: &GlassError| *sink.borrow_mut() += 1)));

        compositor.on_layout(Position::new(0, 0), Size::new(30, 30));
        settle(&capturer, &mut compositor);
        let first = compositor.cached_image().unwrap().clone();

        layer.clear();
        compositor.on_layout(Position::new(10, 0), Size::new(30, 30));
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Ready);
        assert_eq!(*errors.borrow(), 1);
        assert!(CapturedImage::ptr_eq(&first, compositor.cached_image().unwrap()));
    }

    #[test]
    fn test_region_outside_background_paints_nothing() {
        let (capturer, _layer, mut compositor) = setup(GlassConfig::default());
        compositor.on_layout(Position::new(500, 500), Size::new(50, 50));
        assert_eq!(settle(&capturer, &mut compositor), CompositorState::Idle);

        let mut canvas = image::RgbaImage::new(600, 600);
        compositor.paint(&mut canvas);
        assert!(canvas.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_paint_draws_at_overlay_position() {
        let (capturer, _layer, mut compositor) = setup(GlassConfig::default());
        compositor.on_layout(Position::new(20, 30), Size::new(10, 10));
        settle(&capturer, &mut compositor);

        let mut canvas = image::RgbaImage::new(64, 64);
        compositor.paint(&mut canvas);
        assert_eq!(canvas.get_pixel(20, 30)[3], 255);
        assert_eq!(canvas.get_pixel(29, 39)[3], 255);
        assert_eq!(canvas.get_pixel(19, 30)[3], 0);
        assert_eq!(canvas.get_pixel(30, 30)[3], 0);
    }

    #[test]
    fn test_set_capturer_discards_cache() {
        let (capturer, _layer, mut compositor) = setup(GlassConfig::default());
        compositor.on_layout(Position::new(0, 0), Size::new(10, 10));
        settle(&capturer, &mut compositor);
        assert!(compositor.cached_image().is_some());

        let (other, other_layer) = Capturer::with_layer();
        other_layer.record(CapturedImage::filled(50, 50, [0, 0, 0, 255]));
        compositor.set_capturer(other.clone());
        assert!(compositor.cached_image().is_none());
        assert_eq!(settle(&other, &mut compositor), CompositorState::Ready);
        assert_eq!(capturer.pending_requests(), 0);
    }

    #[test]
    fn test_dropped_compositor_leaves_no_waiters_hanging() {
        let (capturer, _layer, mut compositor) = setup(GlassConfig::default());
        compositor.on_layout(Position::new(0, 0), Size::new(10, 10));
        compositor.update();
        drop(compositor);
        assert_eq!(capturer.serve_pending(), 1);
    }

    #[test]
    fn test_content_offset_uses_alignment() {
        let config = GlassConfig::default().with_alignment(crate::Alignment::Center);
        let (_capturer, _layer, mut compositor) = setup(config);
        compositor.on_layout(Position::new(0, 0), Size::new(100, 40));
        assert_eq!(compositor.content_offset(Size::new(20, 20)), Position::new(40, 10));
    }
}
