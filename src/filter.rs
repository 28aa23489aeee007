//! Reduce raw detections to the boxes that can occupy a parking space.

use crate::detect::Detection;
use crate::geometry::BoundingBox;

/// Boxes of car/truck/bus detections, in input order.
///
/// Order is preserved so a baseline captured from the same detections is
/// always indexed the same way.
pub fn vehicle_boxes(detections: &[Detection]) -> Vec<BoundingBox> {
    detections
        .iter()
        .filter(|d| d.class.is_vehicle())
        .map(|d| d.bbox)
        .collect()
}
