//! Axis-aligned boxes in image pixel space.

use anyhow::{anyhow, Result};
use serde::Serialize;

/// Bounding box as (top, left, bottom, right) in pixels.
///
/// Construction enforces `top <= bottom` and `left <= right`; a box that passes
/// is never mutated afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    top: f32,
    left: f32,
    bottom: f32,
    right: f32,
}

impl BoundingBox {
    pub fn new(top: f32, left: f32, bottom: f32, right: f32) -> Result<Self> {
        if ![top, left, bottom, right].iter().all(|v| v.is_finite()) {
            return Err(anyhow!("bounding box coordinates must be finite"));
        }
        if top > bottom || left > right {
            return Err(anyhow!(
                "inverted bounding box: top={} left={} bottom={} right={}",
                top,
                left,
                bottom,
                right
            ));
        }
        Ok(Self {
            top,
            left,
            bottom,
            right,
        })
    }

    /// Build from a center point and size, as most detector heads emit them.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Result<Self> {
        Self::new(cy - h / 2.0, cx - w / 2.0, cy + h / 2.0, cx + w / 2.0)
    }

    pub fn top(&self) -> f32 {
        self.top
    }

    pub fn left(&self) -> f32 {
        self.left
    }

    pub fn bottom(&self) -> f32 {
        self.bottom
    }

    pub fn right(&self) -> f32 {
        self.right
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Zero-area boxes never overlap anything.
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    /// Clip to `[0, width] x [0, height]`.
    pub fn clamp_to(&self, width: f32, height: f32) -> Self {
        let width = width.max(0.0);
        let height = height.max(0.0);
        let top = self.top.clamp(0.0, height);
        let left = self.left.clamp(0.0, width);
        Self {
            top,
            left,
            bottom: self.bottom.clamp(top, height),
            right: self.right.clamp(left, width),
        }
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let top = self.top.max(other.top);
        let left = self.left.max(other.left);
        let bottom = self.bottom.min(other.bottom);
        let right = self.right.min(other.right);
        if bottom <= top || right <= left {
            return 0.0;
        }
        (bottom - top) * (right - left)
    }

    /// Intersection over union. 0 for degenerate boxes or empty intersections.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        if self.is_degenerate() || other.is_degenerate() {
            return 0.0;
        }
        let intersection = self.intersection_area(other);
        if intersection <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(top: f32, left: f32, bottom: f32, right: f32) -> BoundingBox {
        BoundingBox::new(top, left, bottom, right).unwrap()
    }

    #[test]
    fn rejects_inverted_and_non_finite_boxes() {
        assert!(BoundingBox::new(10.0, 0.0, 5.0, 10.0).is_err());
        assert!(BoundingBox::new(0.0, 10.0, 5.0, 0.0).is_err());
        assert!(BoundingBox::new(f32::NAN, 0.0, 5.0, 5.0).is_err());
        assert!(BoundingBox::new(0.0, 0.0, 0.0, 0.0).is_ok());
    }

    #[test]
    fn iou_of_box_with_itself_is_one() {
        let a = bbox(10.0, 20.0, 50.0, 80.0);
        assert_eq!(a.iou(&a), 1.0);
    }

    #[test]
    fn iou_of_disjoint_or_touching_boxes_is_zero() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(20.0, 20.0, 30.0, 30.0);
        let edge = bbox(0.0, 10.0, 10.0, 20.0);
        assert_eq!(a.iou(&b), 0.0);
        assert_eq!(a.iou(&edge), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(0.0, 5.0, 10.0, 15.0);
        // 50 / (100 + 100 - 50)
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), b.iou(&a));
    }

    #[test]
    fn degenerate_boxes_never_overlap() {
        let line = bbox(5.0, 0.0, 5.0, 10.0);
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        assert!(line.is_degenerate());
        assert_eq!(line.iou(&a), 0.0);
        assert_eq!(line.iou(&line), 0.0);
    }

    #[test]
    fn from_center_and_clamp() {
        let b = BoundingBox::from_center(5.0, 5.0, 20.0, 4.0).unwrap();
        assert_eq!(b.left(), -5.0);
        let clipped = b.clamp_to(8.0, 8.0);
        assert_eq!(clipped.left(), 0.0);
        assert_eq!(clipped.right(), 8.0);
        assert_eq!(clipped.top(), 3.0);
        assert_eq!(clipped.bottom(), 7.0);
    }
}
