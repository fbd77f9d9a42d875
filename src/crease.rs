// src/crease.rs

//! Fold-crease geometry: calibration parsing and the pure orientation
//! transform behind the live crease query.
//!
//! The calibration input is a flat string of four integers,
//! `"x,y;width,height"`. Malformed input degrades crease queries to the
//! empty region; it never fails construction.

use crate::geometry::{DisplayOrientation, Rect};
use crate::types::PanelId;
use log::warn;

/// The rectangles on a panel physically obscured or distorted by the hinge.
///
/// Immutable once computed for a given orientation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldCreaseRegion {
    pub panel: PanelId,
    pub rects: Vec<Rect>,
}

impl FoldCreaseRegion {
    pub fn new(panel: PanelId, rects: Vec<Rect>) -> Self {
        Self { panel, rects }
    }

    /// A region with no rectangles, used for modes without a visible crease.
    pub fn empty(panel: PanelId) -> Self {
        Self {
            panel,
            rects: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }
}

/// Parses the crease calibration string.
///
/// Returns `None` on the wrong field count or non-numeric fields; callers
/// degrade to an empty region.
pub fn parse_crease_calibration(calibration: &str) -> Option<Rect> {
    let fields: Vec<&str> = calibration
        .split([',', ';'])
        .map(str::trim)
        .collect();
    if fields.len() != 4 {
        warn!(
            "FoldCrease: calibration has {} fields, expected 4: {:?}",
            fields.len(),
            calibration
        );
        return None;
    }
    let x = fields[0].parse::<i32>().ok()?;
    let y = fields[1].parse::<i32>().ok()?;
    let width = fields[2].parse::<u32>().ok()?;
    let height = fields[3].parse::<u32>().ok()?;
    Some(Rect::new(x, y, width, height))
}

/// Computes the visible crease region for a panel given its live orientation.
///
/// The calibration rectangle is expressed for the vertical (portrait)
/// orientation; landscape orientations transpose it. An unknown orientation
/// keeps the calibrated reading.
pub fn crease_region_for_orientation(
    panel: PanelId,
    calibrated: Option<Rect>,
    orientation: DisplayOrientation,
) -> FoldCreaseRegion {
    let Some(rect) = calibrated else {
        return FoldCreaseRegion::empty(panel);
    };
    let rect = match orientation {
        DisplayOrientation::Landscape | DisplayOrientation::LandscapeInverted => rect.transposed(),
        _ => rect,
    };
    FoldCreaseRegion::new(panel, vec![rect])
}
