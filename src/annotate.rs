//! Overlay drawing.
//!
//! Geometry (interest line, boxes, centers, skeletons) is always drawn.
//! Text needs a TrueType font; without one it is skipped.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut,
};
use imageproc::rect::Rect;

use crate::detect::{Detection, SKELETON};
use crate::frame::Frame;
use crate::resize::scale_coordinate;
use crate::zone::{Counters, LineAxis, ZoneConfig};

const KEYPOINT_MIN_CONFIDENCE: f32 = 0.5;

#[derive(Clone, Debug)]
pub struct AnnotationStyle {
    pub box_color: Rgb<u8>,
    pub interest_color: Rgb<u8>,
    pub box_thickness: i32,
    pub line_thickness: i32,
    pub center_radius: i32,
    pub keypoint_radius: i32,
    /// Pixel height of labels and counter headers.
    pub text_px: f32,
    /// Pixel height of the large in/out totals near the line.
    pub total_px: f32,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            box_color: Rgb([57, 0, 199]),
            interest_color: Rgb([199, 0, 36]),
            box_thickness: 5,
            line_thickness: 2,
            center_radius: 8,
            keypoint_radius: 3,
            text_px: 24.0,
            total_px: 48.0,
        }
    }
}

/// Counting state to overlay on a frame.
pub struct CountingOverlay<'a> {
    pub zone: &'a ZoneConfig,
    pub counters: &'a Counters,
}

pub struct Annotator {
    style: AnnotationStyle,
    font: Option<FontVec>,
    /// Scale of the frames being annotated, used to place reference-space text.
    scale_percent: u32,
}

impl Annotator {
    pub fn new(scale_percent: u32) -> Self {
        Self {
            style: AnnotationStyle::default(),
            font: None,
            scale_percent,
        }
    }

    pub fn with_style(mut self, style: AnnotationStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_font(mut self, font: FontVec) -> Self {
        self.font = Some(font);
        self
    }

    /// Load a TrueType/OpenType font from disk.
    pub fn with_font_file(self, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow!("invalid font {}: {}", path.display(), e))?;
        Ok(self.with_font(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn style(&self) -> &AnnotationStyle {
        &self.style
    }

    /// Draw detections and, when given, the counting overlay.
    pub fn annotate(
        &self,
        frame: Frame,
        detections: &[Detection],
        counting: Option<CountingOverlay<'_>>,
    ) -> Frame {
        frame.map_image(|image| {
            if let Some(overlay) = &counting {
                self.draw_interest_line(image, overlay.zone);
            }
            for detection in detections {
                self.draw_detection(image, detection);
            }
            if let Some(overlay) = &counting {
                self.draw_counters(image, overlay);
            }
        })
    }

    fn draw_interest_line(&self, image: &mut RgbImage, zone: &ZoneConfig) {
        let (width, height) = image.dimensions();
        for t in 0..self.style.line_thickness.max(1) {
            let at = zone
                .line
                .saturating_add(t - self.style.line_thickness / 2) as f32;
            let (start, end) = match zone.axis {
                LineAxis::Horizontal => ((0.0, at), (width as f32, at)),
                LineAxis::Vertical => ((at, 0.0), (at, height as f32)),
            };
            draw_line_segment_mut(image, start, end, self.style.interest_color);
        }
    }

    fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
        let color = self.style.box_color;
        let (xmin, ymin, xmax, ymax) = detection.bbox.pixel_corners();
        draw_thick_rect(
            image,
            xmin,
            ymin,
            (xmax - xmin).max(1) as u32,
            (ymax - ymin).max(1) as u32,
            color,
            self.style.box_thickness,
        );
        draw_filled_circle_mut(image, detection.center(), self.style.center_radius, color);

        if !detection.keypoints.is_empty() {
            self.draw_skeleton(image, detection);
        }

        let label = format!("{} - {:.2}", detection.label, detection.confidence);
        self.draw_text(image, &label, xmin, ymin.saturating_sub(10), self.style.text_px, color);
    }

    fn draw_skeleton(&self, image: &mut RgbImage, detection: &Detection) {
        let points = &detection.keypoints;
        let visible = |i: usize| {
            points
                .get(i)
                .filter(|kp| kp.confidence >= KEYPOINT_MIN_CONFIDENCE)
        };
        for &(a, b) in SKELETON.iter() {
            if let (Some(pa), Some(pb)) = (visible(a), visible(b)) {
                draw_line_segment_mut(
                    image,
                    (pa.x, pa.y),
                    (pb.x, pb.y),
                    self.style.interest_color,
                );
            }
        }
        for kp in points.iter().filter(|kp| kp.confidence >= KEYPOINT_MIN_CONFIDENCE) {
            draw_filled_circle_mut(
                image,
                (kp.x as i32, kp.y as i32),
                self.style.keypoint_radius,
                self.style.box_color,
            );
        }
    }

    fn draw_counters(&self, image: &mut RgbImage, overlay: &CountingOverlay<'_>) {
        let color = self.style.box_color;
        let px = self.style.text_px;
        let out_x = scale_coordinate(2800, self.scale_percent);

        self.draw_text(image, "N. Vehicles In", 30, 30, px, color);
        self.draw_text(image, "N. Vehicles Out", out_x, 30, px, color);

        let mut row = 40;
        for class in &overlay.zone.tracked_classes {
            row += 30;
            let in_text = format!("{} : {}", class, overlay.counters.class_in(*class));
            let out_text = format!("{} : {}", class, overlay.counters.class_out(*class));
            self.draw_text(image, &in_text, 30, row, px, color);
            self.draw_text(image, &out_text, out_x, row, px, color);
        }

        let line = overlay.zone.line;
        let in_at = (scale_coordinate(1820, self.scale_percent), line.saturating_add(60));
        let out_at = (scale_coordinate(1800, self.scale_percent), line.saturating_sub(40));
        let (in_at, out_at) = match overlay.zone.axis {
            LineAxis::Horizontal => (in_at, out_at),
            LineAxis::Vertical => ((in_at.1, in_at.0), (out_at.1, out_at.0)),
        };
        let big = self.style.total_px;
        let accent = self.style.interest_color;
        let total_in = format!("In:{}", overlay.counters.total_in);
        let total_out = format!("Out:{}", overlay.counters.total_out);
        self.draw_text(image, &total_in, in_at.0, in_at.1, big, accent);
        self.draw_text(image, &total_out, out_at.0, out_at.1, big, accent);
    }

    /// `baseline_y` is the text baseline, as with the usual video overlay APIs.
    fn draw_text(
        &self,
        image: &mut RgbImage,
        text: &str,
        x: i32,
        baseline_y: i32,
        px: f32,
        color: Rgb<u8>,
    ) {
        let Some(font) = &self.font else {
            return;
        };
        let top = baseline_y - px as i32;
        draw_text_mut(image, color, x, top, PxScale::from(px), font, text);
    }
}

/// Hollow rectangle grown outward `thickness` pixels.
fn draw_thick_rect(
    image: &mut RgbImage,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    color: Rgb<u8>,
    thickness: i32,
) {
    for offset in 0..thickness.max(1) {
        let rect = Rect::at(x - offset, y - offset)
            .of_size(width + (offset * 2) as u32, height + (offset * 2) as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BBox, ClassId, Keypoint, DEFAULT_TRACKED_CLASSES};
    use crate::zone::SplitBoundary;

    const BLACK: [u8; 3] = [0, 0, 0];

    fn zone() -> ZoneConfig {
        ZoneConfig {
            line: 50,
            split: 100,
            offset: 4,
            axis: LineAxis::Horizontal,
            split_boundary: SplitBoundary::Inclusive,
            tracked_classes: DEFAULT_TRACKED_CLASSES.to_vec(),
        }
    }

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * frame.width + x) * 3) as usize;
        let b = frame.as_bytes();
        [b[i], b[i + 1], b[i + 2]]
    }

    #[test]
    fn draws_box_center_and_line_without_font() -> Result<()> {
        let annotator = Annotator::new(50);
        assert!(!annotator.has_font());
        let style = annotator.style().clone();

        let frame = Frame::filled(200, 120, BLACK)?.with_sequence(3);
        let detection = Detection::new(BBox::new(20., 20., 60., 40.), 0.9, ClassId(2));
        let zone = zone();
        let counters = Counters::for_classes(&zone.tracked_classes);
        let out = annotator.annotate(
            frame,
            &[detection],
            Some(CountingOverlay {
                zone: &zone,
                counters: &counters,
            }),
        );

        assert_eq!(out.sequence, 3);
        assert_eq!(pixel(&out, 20, 30), style.box_color.0);
        assert_eq!(pixel(&out, 40, 30), style.box_color.0);
        assert_eq!(pixel(&out, 150, 50), style.interest_color.0);
        assert_eq!(pixel(&out, 150, 100), BLACK);
        Ok(())
    }

    #[test]
    fn custom_style_sets_color_and_thickness() -> Result<()> {
        let style = AnnotationStyle {
            box_color: Rgb([0, 255, 0]),
            box_thickness: 1,
            center_radius: 1,
            ..AnnotationStyle::default()
        };
        let annotator = Annotator::new(100).with_style(style);
        let detection = Detection::new(BBox::new(10., 10., 50., 50.), 0.9, ClassId(2));
        let out = annotator.annotate(Frame::filled(64, 64, BLACK)?, &[detection], None);

        assert_eq!(pixel(&out, 10, 20), [0, 255, 0]);
        assert_eq!(pixel(&out, 30, 30), [0, 255, 0]);
        assert_eq!(pixel(&out, 8, 20), BLACK);
        Ok(())
    }

    #[test]
    fn no_overlay_leaves_line_undrawn() -> Result<()> {
        let annotator = Annotator::new(100);
        let out = annotator.annotate(Frame::filled(64, 64, BLACK)?, &[], None);
        assert!(out.as_bytes().iter().all(|b| *b == 0));
        Ok(())
    }

    #[test]
    fn skeleton_connects_confident_keypoints() -> Result<()> {
        let annotator = Annotator::new(100);
        let style = annotator.style().clone();
        let mut keypoints = vec![
            Keypoint {
                x: 0.,
                y: 0.,
                confidence: 0.0
            };
            17
        ];
        // left shoulder (5) to right shoulder (6)
        keypoints[5] = Keypoint {
            x: 10.,
            y: 80.,
            confidence: 0.9,
        };
        keypoints[6] = Keypoint {
            x: 90.,
            y: 80.,
            confidence: 0.9,
        };
        let person = Detection::new(BBox::new(5., 5., 95., 30.), 0.8, ClassId(0))
            .with_keypoints(keypoints);

        let out = annotator.annotate(Frame::filled(100, 100, BLACK)?, &[person], None);
        assert_eq!(pixel(&out, 50, 80), style.interest_color.0);
        assert_eq!(pixel(&out, 50, 60), BLACK);
        Ok(())
    }

    #[test]
    fn missing_font_file_is_an_error() {
        let err = Annotator::new(100)
            .with_font_file(Path::new("/nonexistent/font.ttf"))
            .err()
            .expect("font load fails");
        assert!(err.to_string().contains("failed to read font"));
    }
}
