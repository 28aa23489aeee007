use serde::Serialize;

use crate::geometry::BoundingBox;

/// One object found by a detector backend, in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class: ObjectClass,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, class: ObjectClass, confidence: f32) -> Self {
        Self {
            bbox,
            class,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ObjectClass {
    Car,
    Truck,
    Bus,
    Motorcycle,
    Person,
    /// Any other label, kept as the detector's raw class id.
    Other(u16),
}

/// Label vocabulary the class id refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CocoIndexing {
    /// 80 classes starting at 0 (YOLO family exports).
    ZeroBased,
    /// Background at 0, classes starting at 1 (Mask R-CNN / TF detection zoo).
    OneBased,
}

impl ObjectClass {
    pub fn from_coco_id(id: u16, indexing: CocoIndexing) -> Self {
        let zero_based = match indexing {
            CocoIndexing::ZeroBased => Some(id),
            CocoIndexing::OneBased => id.checked_sub(1),
        };
        match zero_based {
            Some(0) => ObjectClass::Person,
            Some(2) => ObjectClass::Car,
            Some(3) => ObjectClass::Motorcycle,
            Some(5) => ObjectClass::Bus,
            Some(7) => ObjectClass::Truck,
            _ => ObjectClass::Other(id),
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "car" => ObjectClass::Car,
            "truck" => ObjectClass::Truck,
            "bus" => ObjectClass::Bus,
            "motorcycle" | "motorbike" => ObjectClass::Motorcycle,
            "person" => ObjectClass::Person,
            _ => ObjectClass::Other(u16::MAX),
        }
    }

    /// Classes that can occupy a parking space.
    pub fn is_vehicle(&self) -> bool {
        matches!(self, ObjectClass::Car | ObjectClass::Truck | ObjectClass::Bus)
    }
}
