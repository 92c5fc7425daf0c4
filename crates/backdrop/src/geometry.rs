//! Screen-space rectangles and texture sizes.
//!
//! `Rect` carries window geometry in screen coordinates; the fade animator
//! uses its overlap test for damage propagation and the blur pipeline clips
//! its final pass against damage rectangles with `intersection`. `Size` is
//! the integer dimension type for GPU targets and knows how to walk the
//! downsample chain.

/// Integer texture/framebuffer dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    /// Create a new size.
    #[inline]
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether either dimension is zero.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Dimensions after `steps` halvings, clamped so neither axis collapses
    /// below one pixel. Step `0` is the size itself.
    #[must_use]
    pub const fn shrunk(self, steps: u32) -> Self {
        let width = self.width >> steps;
        let height = self.height >> steps;
        Self {
            width: if width == 0 { 1 } else { width },
            height: if height == 0 { 1 } else { height },
        }
    }

    /// Grow both axes by `border` pixels on every side.
    #[must_use]
    pub const fn grown(self, border: u32) -> Self {
        Self {
            width: self.width + border * 2,
            height: self.height + border * 2,
        }
    }
}

/// A rectangular region in screen-space pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    /// Create a new rectangle.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge coordinate.
    #[inline]
    #[must_use]
    pub const fn right(self) -> f32 {
        self.x + self.width
    }

    /// Bottom edge coordinate.
    #[inline]
    #[must_use]
    pub const fn bottom(self) -> f32 {
        self.y + self.height
    }

    /// Axis-aligned bounding-box overlap test. Edge-touching rectangles
    /// count as overlapping, matching how stacked window borders share
    /// backdrop pixels.
    #[must_use]
    pub fn overlaps(self, other: Self) -> bool {
        if self.x > other.right() || other.x > self.right() {
            return false;
        }
        if self.y > other.bottom() || other.y > self.bottom() {
            return false;
        }
        true
    }

    /// The overlapping region of two rectangles, or `None` when they are
    /// disjoint or the overlap is degenerate.
    #[must_use]
    pub fn intersection(self, other: Self) -> Option<Self> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right > x && bottom > y).then(|| Self::new(x, y, right - x, bottom - y))
    }

    /// The smallest rectangle containing both inputs.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Self::new(x, y, right - x, bottom - y)
    }

    /// Expand the rectangle by `border` pixels on every side.
    #[must_use]
    pub const fn grown(self, border: f32) -> Self {
        Self {
            x: self.x - border,
            y: self.y - border,
            width: self.width + border * 2.0,
            height: self.height + border * 2.0,
        }
    }

    /// Integer size of the rectangle, rounded to whole pixels.
    #[must_use]
    pub fn size(self) -> Size {
        Size::new(self.width.round() as u32, self.height.round() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_and_disjoint() {
        let a = Rect::new(0.0, 0.0, 100.0, 100.0);
        let b = Rect::new(50.0, 50.0, 100.0, 100.0);
        let c = Rect::new(200.0, 0.0, 50.0, 50.0);
        assert!(a.overlaps(b));
        assert!(b.overlaps(a));
        assert!(!a.overlaps(c));
        assert!(!c.overlaps(a));
    }

    #[test]
    fn intersection_clips() {
        let a = Rect::new(0.0, 0.0, 100.0, 100.0);
        let b = Rect::new(60.0, 70.0, 100.0, 100.0);
        let i = a.intersection(b).unwrap_or_default();
        assert!((i.x - 60.0).abs() < f32::EPSILON);
        assert!((i.y - 70.0).abs() < f32::EPSILON);
        assert!((i.width - 40.0).abs() < f32::EPSILON);
        assert!((i.height - 30.0).abs() < f32::EPSILON);
        assert!(a.intersection(Rect::new(300.0, 0.0, 10.0, 10.0)).is_none());
    }

    #[test]
    fn shrunk_never_collapses() {
        let size = Size::new(100, 3);
        assert_eq!(size.shrunk(0), Size::new(100, 3));
        assert_eq!(size.shrunk(1), Size::new(50, 1));
        assert_eq!(size.shrunk(4), Size::new(6, 1));
        assert_eq!(size.shrunk(12), Size::new(1, 1));
    }

    #[test]
    fn grown_adds_border_on_all_sides() {
        let rect = Rect::new(10.0, 10.0, 80.0, 60.0).grown(64.0);
        assert!((rect.x + 54.0).abs() < f32::EPSILON);
        assert!((rect.width - 208.0).abs() < f32::EPSILON);
        assert_eq!(Size::new(80, 60).grown(64), Size::new(208, 188));
    }
}
