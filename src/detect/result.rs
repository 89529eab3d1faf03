/// Axis-aligned bounding box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One labeled, scored, localized object found in a single frame.
///
/// Ephemeral: produced and consumed within one frame-processing step,
/// never persisted individually.
#[derive(Clone, Debug)]
pub struct Detection {
    pub label: String,
    /// Confidence score, 0..=1.
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            bounding_box: BoundingBox::default(),
        }
    }
}
