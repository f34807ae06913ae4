//! Background capturer and the host-side node that serves it
//!
//! A [`Capturer`] is the handle overlays hold on to: they enqueue offset and
//! image requests on it and get [`Deferred`] results back. The host serves
//! the queue once per draw pass on the render thread, where the surface's
//! latest frame is available, either directly through
//! [`Capturer::serve_pending`] or through a [`Backdrop`] node.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::channel::CaptureChannel;
use crate::deferred::{self, Completer, Deferred};
use crate::error::{CaptureError, GlassError};
use crate::{CapturedImage, Position};

/// Anything that can rasterize its current appearance into pixels
pub trait Surface {
    fn rasterize(&self) -> Result<CapturedImage, CaptureError>;
}

/// Recording layer: the host records each drawn frame into it and captures
/// read the most recent one.
#[derive(Clone, Default)]
pub struct FrameLayer {
    frame: Arc<Mutex<Option<CapturedImage>>>,
}

impl FrameLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, frame: impl Into<CapturedImage>) {
        *self.frame.lock() = Some(frame.into());
    }

    pub fn clear(&self) {
        *self.frame.lock() = None;
    }

    pub fn is_recorded(&self) -> bool {
        self.frame.lock().is_some()
    }
}

impl Surface for FrameLayer {
    fn rasterize(&self) -> Result<CapturedImage, CaptureError> {
        self.frame.lock().clone().ok_or(CaptureError::NotRendered)
    }
}

/// A queued request for either the background's pixels or its position
#[derive(Debug)]
pub enum CaptureRequest {
    Image(Completer<CapturedImage>),
    Offset(Completer<Position>),
}

static NEXT_CAPTURER_ID: AtomicU64 = AtomicU64::new(1);

struct CapturerInner {
    id: u64,
    surface: Box<dyn Surface>,
    requests: CaptureChannel<CaptureRequest>,
    position: Cell<Position>,
}

/// Shared handle to one background surface.
///
/// Clones refer to the same surface and queue. The handle is confined to the
/// render thread.
#[derive(Clone)]
pub struct Capturer {
    inner: Rc<CapturerInner>,
}

impl Capturer {
    pub fn new(surface: impl Surface + 'static) -> Self {
        Self {
            inner: Rc::new(CapturerInner {
                id: NEXT_CAPTURER_ID.fetch_add(1, Ordering::Relaxed),
                surface: Box::new(surface),
                requests: CaptureChannel::new(),
                position: Cell::new(Position::ZERO),
            }),
        }
    }

    /// Capturer over a fresh [`FrameLayer`], returning the layer to record into
    pub fn with_layer() -> (Self, FrameLayer) {
        let layer = FrameLayer::new();
        (Self::new(layer.clone()), layer)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn ptr_eq(a: &Capturer, b: &Capturer) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    /// Ask for the surface's pixels as of the next serve.
    pub fn request_capture(&self) -> Deferred<CapturedImage> {
        let (completer, deferred) = deferred::pair("capture");
        self.inner.requests.enqueue(CaptureRequest::Image(completer));
        trace!(capturer = self.inner.id, "capture requested");
        deferred
    }

    /// Ask for the surface's position as of the next serve.
    pub fn request_offset(&self) -> Deferred<Position> {
        let (completer, deferred) = deferred::pair("offset");
        self.inner.requests.enqueue(CaptureRequest::Offset(completer));
        trace!(capturer = self.inner.id, "offset requested");
        deferred
    }

    /// Store the surface's position. Pending offset requests see it when
    /// they are served.
    pub fn report_position(&self, position: Position) {
        self.inner.position.set(position);
    }

    pub fn position(&self) -> Position {
        self.inner.position.get()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.requests.len()
    }

    /// Serve the oldest queued request. Returns `false` if none was queued.
    pub fn serve_next(&self) -> bool {
        match self.inner.requests.pop() {
            Some(request) => {
                let mut frame = None;
                self.fulfil(request, &mut frame);
                true
            }
            None => false,
        }
    }

    /// Serve every request queued at call time, oldest first. The surface is
    /// rasterized at most once; image requests of the same pass share it.
    pub fn serve_pending(&self) -> usize {
        let requests = self.inner.requests.drain();
        let served = requests.len();
        let mut frame = None;
        for request in requests {
            self.fulfil(request, &mut frame);
        }
        if served > 0 {
            trace!(capturer = self.inner.id, served, "requests served");
        }
        served
    }

    fn fulfil(
        &self,
        request: CaptureRequest,
        frame: &mut Option<Result<CapturedImage, CaptureError>>,
    ) {
        match request {
            CaptureRequest::Offset(mut completer) => {
                completer.succeed(self.position());
            }
            CaptureRequest::Image(mut completer) => {
                let result = frame
                    .get_or_insert_with(|| self.inner.surface.rasterize())
                    .clone();
                if let Err(err) = &result {
                    debug!(capturer = self.inner.id, error = %err, "rasterization failed");
                }
                completer.complete(result.map_err(GlassError::from));
            }
        }
    }
}

impl std::fmt::Debug for Capturer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capturer")
            .field("id", &self.inner.id)
            .field("position", &self.position())
            .field("pending", &self.pending_requests())
            .finish()
    }
}

/// Background-owner node driven by the host's layout and draw passes.
///
/// Holds one active subscription. Switching capturers stops serving the old
/// queue; requests still queued there stay with the old capturer.
#[derive(Debug)]
pub struct Backdrop {
    capturer: Capturer,
    position: Option<Position>,
}

impl Backdrop {
    pub fn new(capturer: Capturer) -> Self {
        Self {
            capturer,
            position: None,
        }
    }

    pub fn capturer(&self) -> &Capturer {
        &self.capturer
    }

    /// Layout pass: forward the surface position when it moved.
    pub fn on_layout(&mut self, position: Position) {
        if self.position != Some(position) {
            self.position = Some(position);
            self.capturer.report_position(position);
        }
    }

    /// Draw pass: serve everything queued on the active capturer.
    pub fn on_draw(&mut self) -> usize {
        self.capturer.serve_pending()
    }

    /// Re-subscribe to another capturer.
    pub fn set_capturer(&mut self, capturer: Capturer) {
        if Capturer::ptr_eq(&self.capturer, &capturer) {
            return;
        }
        debug!(
            from = self.capturer.id(),
            to = capturer.id(),
            "backdrop switched capturer"
        );
        if let Some(position) = self.position {
            capturer.report_position(position);
        }
        self.capturer = capturer;
    }
}
