use std::fmt;

use super::labels::class_label;

/// Model class identifier (COCO index for the bundled label table).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(pub u16);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ClassId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ClassId)
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BBox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(
            cx - width / 2.,
            cy - height / 2.,
            cx + width / 2.,
            cy + height / 2.,
        )
    }

    pub fn width(&self) -> f32 {
        (self.xmax - self.xmin).max(0.)
    }

    pub fn height(&self) -> f32 {
        (self.ymax - self.ymin).max(0.)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Corners truncated to whole pixels, the way they are drawn and counted.
    pub fn pixel_corners(&self) -> (i32, i32, i32, i32) {
        (
            self.xmin as i32,
            self.ymin as i32,
            self.xmax as i32,
            self.ymax as i32,
        )
    }

    /// Integer midpoint of the pixel corners.
    pub fn center(&self) -> (i32, i32) {
        let (xmin, ymin, xmax, ymax) = self.pixel_corners();
        (midpoint(xmin, xmax), midpoint(ymin, ymax))
    }

    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self::new(
            self.xmin * sx,
            self.ymin * sy,
            self.xmax * sx,
            self.ymax * sy,
        )
    }

    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self::new(
            self.xmin.clamp(0., w),
            self.ymin.clamp(0., h),
            self.xmax.clamp(0., w),
            self.ymax.clamp(0., h),
        )
    }

    pub fn intersection_area(&self, other: &BBox) -> f32 {
        let l = self.xmin.max(other.xmin);
        let r = self.xmax.min(other.xmax);
        let t = self.ymin.max(other.ymin);
        let b = self.ymax.min(other.ymax);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let union = self.area() + other.area() - self.intersection_area(other);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(other) / union
    }
}

fn midpoint(a: i32, b: i32) -> i32 {
    ((i64::from(a) + i64::from(b)) / 2) as i32
}

/// Pose keypoint (COCO-17 ordering when produced by a pose model).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

/// A single detection produced by the inference adapter.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class_id: ClassId,
    pub label: String,
    /// Empty for plain detection models.
    pub keypoints: Vec<Keypoint>,
}

impl Detection {
    /// Build a detection labelled from the bundled class table.
    pub fn new(bbox: BBox, confidence: f32, class_id: ClassId) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
            label: class_label(class_id).to_string(),
            keypoints: Vec::new(),
        }
    }

    pub fn with_keypoints(mut self, keypoints: Vec<Keypoint>) -> Self {
        self.keypoints = keypoints;
        self
    }

    pub fn center(&self) -> (i32, i32) {
        self.bbox.center()
    }

    /// Rescale box and keypoints by per-axis factors.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            bbox: self.bbox.scale(sx, sy),
            keypoints: self
                .keypoints
                .iter()
                .map(|kp| Keypoint {
                    x: kp.x * sx,
                    y: kp.y * sy,
                    confidence: kp.confidence,
                })
                .collect(),
            ..self.clone()
        }
    }
}

/// Greedy per-class non-maximum suppression, highest confidence first.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_uses_truncated_pixel_corners() {
        let bbox = BBox::new(50.9, 745.2, 70.4, 755.8);
        assert_eq!(bbox.center(), (60, 750));
    }

    #[test]
    fn center_of_huge_box_does_not_overflow() {
        let bbox = BBox::new(0., 0., f32::MAX, 4e9);
        assert_eq!(bbox.center(), (i32::MAX / 2, i32::MAX / 2));
    }

    #[test]
    fn detection_takes_label_from_class_table() {
        let det = Detection::new(BBox::new(0., 0., 1., 1.), 0.9, ClassId(2));
        assert_eq!(det.label, "car");
    }

    #[test]
    fn nms_keeps_best_of_overlapping_same_class() {
        let a = Detection::new(BBox::new(0., 0., 10., 10.), 0.9, ClassId(2));
        let b = Detection::new(BBox::new(1., 1., 11., 11.), 0.8, ClassId(2));
        let c = Detection::new(BBox::new(1., 1., 11., 11.), 0.7, ClassId(7));
        let kept = non_max_suppression(vec![b, c.clone(), a.clone()], 0.5);
        assert_eq!(kept, vec![a, c]);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BBox::new(0., 0., 10., 10.);
        let b = BBox::new(20., 20., 30., 30.);
        assert_eq!(a.iou(&b), 0.);
        assert!((a.iou(&a) - 1.).abs() < 1e-6);
    }
}
