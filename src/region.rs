//! Source rectangle resolution for overlay crops

use crate::{Position, Size};

/// Pixel rectangle inside a captured image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SourceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl SourceRect {
    pub const EMPTY: SourceRect = SourceRect {
        x: 0,
        y: 0,
        width: 0,
        height: 0,
    };

    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub fn contains_rect(&self, other: &SourceRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Part of this rect that lies inside an image of `bounds` size
    pub fn clamp_to(&self, bounds: Size) -> SourceRect {
        if self.x >= bounds.width || self.y >= bounds.height {
            return SourceRect::EMPTY;
        }
        SourceRect::new(
            self.x,
            self.y,
            self.width.min(bounds.width - self.x),
            self.height.min(bounds.height - self.y),
        )
    }
}

/// Rectangle of the captured background that sits under the overlay.
///
/// The origin is the overlay's offset from the background, clamped to zero on
/// each axis; the extent is the clip size cut down to what the image still
/// has past that origin. A region with no area comes back as
/// [`SourceRect::EMPTY`].
pub fn resolve_source_rect(
    background: Position,
    overlay: Position,
    clip: Size,
    image: Size,
) -> SourceRect {
    let delta = overlay - background;
    let x = clamp_offset(delta.x);
    let y = clamp_offset(delta.y);

    let width = clip.width.min(image.width.saturating_sub(x));
    let height = clip.height.min(image.height.saturating_sub(y));

    if width == 0 || height == 0 {
        return SourceRect::EMPTY;
    }
    SourceRect::new(x, y, width, height)
}

fn clamp_offset(value: i32) -> u32 {
    value.max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_position_starts_at_origin() {
        let pos = Position::new(30, 40);
        let rect = resolve_source_rect(pos, pos, Size::new(10, 10), Size::new(100, 100));
        assert_eq!(rect, SourceRect::new(0, 0, 10, 10));
    }

    #[test]
    fn test_offset_inside_image() {
        let rect = resolve_source_rect(
            Position::new(0, 0),
            Position::new(50, 50),
            Size::new(100, 100),
            Size::new(400, 400),
        );
        assert_eq!(rect, SourceRect::new(50, 50, 100, 100));
    }

    #[test]
    fn test_negative_offset_clamps() {
        let rect = resolve_source_rect(
            Position::new(20, 20),
            Position::new(5, 30),
            Size::new(50, 50),
            Size::new(100, 100),
        );
        assert_eq!(rect.x, 0);
        assert_eq!(rect.y, 10);
        assert_eq!(rect.size(), Size::new(50, 50));
    }

    #[test]
    fn test_clip_cut_at_image_edge() {
        let rect = resolve_source_rect(
            Position::new(0, 0),
            Position::new(80, 90),
            Size::new(50, 50),
            Size::new(100, 100),
        );
        assert_eq!(rect, SourceRect::new(80, 90, 20, 10));
    }

    #[test]
    fn test_outside_image_is_empty() {
        let rect = resolve_source_rect(
            Position::new(0, 0),
            Position::new(150, 0),
            Size::new(50, 50),
            Size::new(100, 100),
        );
        assert!(rect.is_empty());
        assert_eq!(rect, SourceRect::EMPTY);
    }

    #[test]
    fn test_zero_clip_is_empty() {
        let rect = resolve_source_rect(
            Position::new(0, 0),
            Position::new(10, 10),
            Size::ZERO,
            Size::new(100, 100),
        );
        assert_eq!(rect, SourceRect::EMPTY);
    }

    #[test]
    fn test_clamp_to_bounds() {
        let rect = SourceRect::new(90, 0, 30, 30).clamp_to(Size::new(100, 20));
        assert_eq!(rect, SourceRect::new(90, 0, 10, 20));
        assert!(SourceRect::new(100, 0, 5, 5).clamp_to(Size::new(100, 100)).is_empty());
    }
}
