//! Circle overlays for detected subjects.
//!
//! Each detection is marked with a circle centred on the box midpoint whose
//! radius is half the larger box side. The circle is loose on purpose: it covers
//! the whole box along its long axis and overshoots along the short one.
//!
//! All arithmetic is done in `f32` and truncated toward zero when converted to
//! pixels, so box `(10, 20, 50, 80)` maps to center `(30, 50)` and radius `30`.

use image::{ImageBuffer, Rgb};

use crate::detect::Detection;
use crate::frame::Frame;

pub const OVERLAY_COLOR: [u8; 3] = [0, 255, 0];
pub const OVERLAY_STROKE_PX: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Circle {
    pub cx: i32,
    pub cy: i32,
    pub radius: i32,
}

/// Circle drawn for `detection`.
pub fn bounding_circle(detection: &Detection) -> Circle {
    let cx = (detection.x1 + detection.x2) / 2.0;
    let cy = (detection.y1 + detection.y2) / 2.0;
    let radius = detection.width().max(detection.height()) / 2.0;
    Circle {
        cx: cx as i32,
        cy: cy as i32,
        radius: radius.max(0.0) as i32,
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Annotator {
    color: [u8; 3],
    stroke: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            color: OVERLAY_COLOR,
            stroke: OVERLAY_STROKE_PX,
        }
    }
}

impl Annotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw one circle per detection onto `frame`. Returns the number drawn.
    pub fn annotate(&self, frame: &mut Frame, detections: &[Detection]) -> usize {
        if detections.is_empty() {
            return 0;
        }
        let (width, height) = (frame.width, frame.height);
        let Some(mut image) =
            ImageBuffer::<Rgb<u8>, &mut [u8]>::from_raw(width, height, frame.pixels_mut())
        else {
            log::warn!("annotator: frame buffer does not match {}x{}", width, height);
            return 0;
        };

        for detection in detections {
            self.draw_circle(&mut image, bounding_circle(detection));
        }
        detections.len()
    }

    /// Paint the ring `radius - stroke/2 <= d < radius + stroke/2`, clipped to the image.
    ///
    /// Bounds are computed in `i64`: circles from saturated `i32` coordinates
    /// must clip, not overflow.
    fn draw_circle(&self, image: &mut ImageBuffer<Rgb<u8>, &mut [u8]>, circle: Circle) {
        if image.width() == 0 || image.height() == 0 {
            return;
        }
        let (cx, cy) = (i64::from(circle.cx), i64::from(circle.cy));
        let half = f64::from(self.stroke) / 2.0;
        let inner = (f64::from(circle.radius) - half).max(0.0);
        let outer = f64::from(circle.radius) + half;
        let reach = outer.ceil() as i64;

        let x_min = (cx - reach).max(0);
        let y_min = (cy - reach).max(0);
        let x_max = (cx + reach).min(i64::from(image.width()) - 1);
        let y_max = (cy + reach).min(i64::from(image.height()) - 1);

        for y in y_min..=y_max {
            for x in x_min..=x_max {
                let dx = (x - cx) as f64;
                let dy = (y - cy) as f64;
                let distance = (dx * dx + dy * dy).sqrt();
                if distance >= inner && distance < outer {
                    image.put_pixel(x as u32, y as u32, Rgb(self.color));
                }
            }
        }
    }
}
