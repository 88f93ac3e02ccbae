/// COCO label id for `person` in the torchvision detection label space.
pub const COCO_PERSON: u32 = 1;

/// One detected object.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Box corners in frame pixel coordinates, `x1 <= x2`, `y1 <= y2`.
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Label id from the classifier's label space.
    pub class_id: u32,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: [f32; 4], class_id: u32, confidence: f32) -> Self {
        Self {
            x1: bbox[0],
            y1: bbox[1],
            x2: bbox[2],
            y2: bbox[3],
            class_id,
            confidence,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}
