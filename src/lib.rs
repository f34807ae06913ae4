//! Libreria per l'effetto "vetro smerigliato" (glassmorphism).
//! Fornisce:
//! - Tipi di base: posizione, dimensione, immagine catturata
//! - Coda di richieste di cattura e slot di risultato one-shot
//! - Capturer dello sfondo e nodo Backdrop lato host
//! - Calcolo del rettangolo sorgente da ritagliare
//! - Blur multi-passata eseguito su thread pool dedicato
//! - Compositor per overlay con cache e politica di refresh

use std::ops::{Add, Sub};
use std::sync::Arc;

use image::{imageops, Rgba, RgbaImage};

pub mod blur;
pub mod capturer;
pub mod channel;
pub mod compositor;
pub mod config;
pub mod deferred;
pub mod error;
pub mod region;

pub use blur::{blur, BlurFilter, BlurStage, BoxBlur, GaussianBlur};
pub use capturer::{Backdrop, CaptureRequest, Capturer, FrameLayer, Surface};
pub use channel::CaptureChannel;
pub use compositor::{CacheEntry, CacheKey, CompositorState, ErrorHandler, OverlayCompositor};
pub use config::{Alignment, BlurPasses, BlurRadius, GlassConfig, RefreshPolicy};
pub use deferred::{Completer, Deferred};
pub use error::{BlurError, CaptureError, ConfigError, GlassError};
pub use region::{resolve_source_rect, SourceRect};

/// Posizione dell'angolo in alto a sinistra nello spazio di coordinate radice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const ZERO: Position = Position { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position::new(self.x.saturating_add(rhs.x), self.y.saturating_add(rhs.y))
    }
}

impl Sub for Position {
    type Output = Position;

    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x.saturating_sub(rhs.x), self.y.saturating_sub(rhs.y))
    }
}

/// Dimensioni allocate di una superficie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const ZERO: Size = Size { width: 0, height: 0 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Vero se almeno una dimensione è zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Immagine catturata: buffer RGBA immutabile condiviso.
///
/// Clonare è economico; ritaglio e blur producono sempre nuove immagini.
#[derive(Clone, PartialEq)]
pub struct CapturedImage {
    pixels: Arc<RgbaImage>,
}

impl CapturedImage {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    /// Crea un'immagine riempita con un colore uniforme
    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self::new(RgbaImage::from_pixel(width, height, Rgba(color)))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Restituisce il buffer, copiandolo solo se è ancora condiviso
    pub fn into_rgba(self) -> RgbaImage {
        Arc::try_unwrap(self.pixels).unwrap_or_else(|shared| (*shared).clone())
    }

    /// Ritaglia una regione; la regione viene prima limitata ai bordi
    pub fn crop(&self, rect: SourceRect) -> CapturedImage {
        let rect = rect.clamp_to(self.size());
        let view = imageops::crop_imm(&*self.pixels, rect.x, rect.y, rect.width, rect.height);
        CapturedImage::new(view.to_image())
    }

    /// Vero se le due immagini condividono lo stesso buffer
    pub fn ptr_eq(a: &CapturedImage, b: &CapturedImage) -> bool {
        Arc::ptr_eq(&a.pixels, &b.pixels)
    }
}

impl From<RgbaImage> for CapturedImage {
    fn from(pixels: RgbaImage) -> Self {
        Self::new(pixels)
    }
}

impl std::fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Destinazione su cui l'overlay dipinge lo sfondo sfocato
pub trait Canvas {
    fn draw_image(&mut self, image: &CapturedImage, origin: Position);
}

impl Canvas for RgbaImage {
    fn draw_image(&mut self, image: &CapturedImage, origin: Position) {
        imageops::overlay(self, image.pixels(), origin.x as i64, origin.y as i64);
    }
}
