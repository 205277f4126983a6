//! Line-crossing counter.
//!
//! A zone is an interest line plus a band of `offset` pixels on either side,
//! and a split coordinate on the perpendicular axis. A detection whose center
//! falls inside the band is counted once for the frame: "in" when its
//! perpendicular coordinate is on the low side of the split, "out" otherwise.
//! Counts are cumulative for the life of the counter.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::detect::{ClassId, Detection};
use crate::resize::scale_coordinate;

/// Orientation of the interest line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LineAxis {
    /// Line is `y = line`; the split is compared against `x`.
    #[default]
    Horizontal,
    /// Line is `x = line`; the split is compared against `y`.
    Vertical,
}

impl FromStr for LineAxis {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "horizontal" | "h" | "y" => Ok(Self::Horizontal),
            "vertical" | "v" | "x" => Ok(Self::Vertical),
            other => Err(anyhow!("unknown line axis '{}'", other)),
        }
    }
}

/// Whether a center exactly on the split counts as "in".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SplitBoundary {
    /// `coordinate <= split` is "in".
    #[default]
    Inclusive,
    /// `coordinate < split` is "in".
    Exclusive,
}

impl FromStr for SplitBoundary {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inclusive" | "le" | "<=" => Ok(Self::Inclusive),
            "exclusive" | "lt" | "<" => Ok(Self::Exclusive),
            other => Err(anyhow!(
                "unknown split boundary '{}' (expected inclusive or exclusive)",
                other
            )),
        }
    }
}

/// Immutable zone geometry, in the pixel coordinates of the frames it is applied to.
#[derive(Clone, Debug, PartialEq)]
pub struct ZoneConfig {
    pub line: i32,
    pub split: i32,
    pub offset: i32,
    pub axis: LineAxis,
    pub split_boundary: SplitBoundary,
    pub tracked_classes: Vec<ClassId>,
}

impl ZoneConfig {
    /// Map reference (full resolution) geometry onto frames scaled by `percent`.
    pub fn scaled(&self, percent: u32) -> Self {
        Self {
            line: scale_coordinate(self.line, percent),
            split: scale_coordinate(self.split, percent),
            offset: scale_coordinate(self.offset, percent),
            ..self.clone()
        }
    }

    /// Inclusive band `[line - offset, line + offset]` along the line axis.
    pub fn band(&self) -> (i32, i32) {
        (
            self.line.saturating_sub(self.offset),
            self.line.saturating_add(self.offset),
        )
    }

    /// Check that the band and split land inside a `width` x `height` frame.
    pub fn fits_frame(&self, width: u32, height: u32) -> Result<()> {
        let (along_extent, across_extent) = match self.axis {
            LineAxis::Horizontal => (height, width),
            LineAxis::Vertical => (width, height),
        };
        let along_extent = i32::try_from(along_extent).unwrap_or(i32::MAX);
        let across_extent = i32::try_from(across_extent).unwrap_or(i32::MAX);
        let (low, high) = self.band();
        if high < 0 || low >= along_extent {
            return Err(anyhow!(
                "interest band {}..={} lies outside the {}x{} frame",
                low,
                high,
                width,
                height
            ));
        }
        if self.split < 0 || self.split > across_extent {
            return Err(anyhow!(
                "interest split {} lies outside the {}x{} frame",
                self.split,
                width,
                height
            ));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.offset < 0 {
            return Err(anyhow!("zone offset must not be negative"));
        }
        if self.tracked_classes.is_empty() {
            return Err(anyhow!("zone must track at least one class"));
        }
        Ok(())
    }

    /// Classify a center point against the band and split.
    pub fn classify(&self, (x, y): (i32, i32)) -> Crossing {
        let (along, across) = match self.axis {
            LineAxis::Horizontal => (y, x),
            LineAxis::Vertical => (x, y),
        };
        let (low, high) = self.band();
        if along < low || along > high {
            return Crossing::Outside;
        }
        let inside = match self.split_boundary {
            SplitBoundary::Inclusive => across <= self.split,
            SplitBoundary::Exclusive => across < self.split,
        };
        if inside {
            Crossing::In
        } else {
            Crossing::Out
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Crossing {
    In,
    Out,
    Outside,
}

/// Cumulative in/out tallies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub total_in: u64,
    pub total_out: u64,
    pub per_class_in: BTreeMap<ClassId, u64>,
    pub per_class_out: BTreeMap<ClassId, u64>,
}

impl Counters {
    /// Zeroed counters with one entry per tracked class.
    pub fn for_classes(classes: &[ClassId]) -> Self {
        Self {
            total_in: 0,
            total_out: 0,
            per_class_in: classes.iter().map(|c| (*c, 0)).collect(),
            per_class_out: classes.iter().map(|c| (*c, 0)).collect(),
        }
    }

    pub fn class_in(&self, class: ClassId) -> u64 {
        self.per_class_in.get(&class).copied().unwrap_or(0)
    }

    pub fn class_out(&self, class: ClassId) -> u64 {
        self.per_class_out.get(&class).copied().unwrap_or(0)
    }

    /// True when no counter in `self` is below its value in `earlier`.
    pub fn dominates(&self, earlier: &Counters) -> bool {
        self.total_in >= earlier.total_in
            && self.total_out >= earlier.total_out
            && earlier
                .per_class_in
                .iter()
                .all(|(class, n)| self.class_in(*class) >= *n)
            && earlier
                .per_class_out
                .iter()
                .all(|(class, n)| self.class_out(*class) >= *n)
    }

    fn record(&mut self, crossing: Crossing, class: ClassId) -> bool {
        let (total, per_class) = match crossing {
            Crossing::In => (&mut self.total_in, &mut self.per_class_in),
            Crossing::Out => (&mut self.total_out, &mut self.per_class_out),
            Crossing::Outside => return false,
        };
        let Some(slot) = per_class.get_mut(&class) else {
            return false;
        };
        *slot += 1;
        *total += 1;
        true
    }
}

/// What one frame contributed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameTally {
    pub entered: u64,
    pub exited: u64,
    pub ignored: u64,
}

/// Stateful counter owned by the processing loop.
pub struct ZoneCounter {
    zone: ZoneConfig,
    counters: Counters,
}

impl ZoneCounter {
    pub fn new(zone: ZoneConfig) -> Self {
        let counters = Counters::for_classes(&zone.tracked_classes);
        Self { zone, counters }
    }

    pub fn zone(&self) -> &ZoneConfig {
        &self.zone
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Count every detection of one frame.
    ///
    /// Detections outside the band and detections of untracked classes leave
    /// the counters untouched.
    pub fn observe(&mut self, detections: &[Detection]) -> FrameTally {
        let mut tally = FrameTally::default();
        for detection in detections {
            let crossing = self.zone.classify(detection.center());
            if !self.counters.record(crossing, detection.class_id) {
                tally.ignored += 1;
                continue;
            }
            match crossing {
                Crossing::In => tally.entered += 1,
                Crossing::Out => tally.exited += 1,
                Crossing::Outside => {}
            }
        }
        tally
    }
}
