// src/geometry.rs

//! Panel geometry: rectangles, rotation, and the orientation derivation used
//! when the fold policy re-applies a panel profile.

use crate::types::FoldDisplayMode;
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in panel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The same rectangle with axes swapped, for landscape crease queries.
    pub fn transposed(self) -> Self {
        Self {
            x: self.y,
            y: self.x,
            width: self.height,
            height: self.width,
        }
    }
}

/// Panel rotation in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl Rotation {
    /// Maps a degree value to a rotation. Anything but 0/90/180/270 falls
    /// back to 0.
    pub fn from_degrees(degrees: u32) -> Self {
        match degrees % 360 {
            90 => Rotation::Rotation90,
            180 => Rotation::Rotation180,
            270 => Rotation::Rotation270,
            _ => Rotation::Rotation0,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Rotation0 => 0,
            Rotation::Rotation90 => 90,
            Rotation::Rotation180 => 180,
            Rotation::Rotation270 => 270,
        }
    }
}

/// Orientation of the rendered content as observed by applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayOrientation {
    #[default]
    Unknown,
    Portrait,
    Landscape,
    PortraitInverted,
    LandscapeInverted,
}

impl DisplayOrientation {
    pub fn is_vertical(self) -> bool {
        matches!(
            self,
            DisplayOrientation::Portrait | DisplayOrientation::PortraitInverted
        )
    }
}

/// One panel's mutable display geometry.
///
/// `rotation_offset` is the fixed per-device mounting offset of the panel
/// relative to the device chassis, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScreenGeometry {
    pub bounds: Rect,
    pub phy_bounds: Rect,
    pub rotation: Rotation,
    pub orientation: DisplayOrientation,
    pub rotation_offset: u32,
}

impl ScreenGeometry {
    pub fn with_bounds(bounds: Rect, rotation_offset: u32) -> Self {
        Self {
            bounds,
            phy_bounds: bounds,
            rotation: Rotation::Rotation0,
            orientation: DisplayOrientation::Unknown,
            rotation_offset,
        }
    }
}

/// Derives the display orientation from the physical aspect ratio, the
/// requested rotation, and the device rotation offset.
///
/// A panel is treated as vertically mounted when its physical bounds are
/// taller than wide; devices mounted with a 90/270 degree offset invert that
/// reading whenever a concrete fold mode is in effect.
pub fn calc_display_orientation(
    rotation: Rotation,
    fold_display_mode: FoldDisplayMode,
    phy_bounds: Rect,
    rotation_offset: u32,
) -> DisplayOrientation {
    let mut is_vertical = phy_bounds.width < phy_bounds.height;
    if fold_display_mode != FoldDisplayMode::Unknown && (rotation_offset == 90 || rotation_offset == 270)
    {
        is_vertical = phy_bounds.width > phy_bounds.height;
    }
    match rotation {
        Rotation::Rotation0 => {
            if is_vertical {
                DisplayOrientation::Portrait
            } else {
                DisplayOrientation::Landscape
            }
        }
        Rotation::Rotation90 => {
            if is_vertical {
                DisplayOrientation::Landscape
            } else {
                DisplayOrientation::Portrait
            }
        }
        Rotation::Rotation180 => {
            if is_vertical {
                DisplayOrientation::PortraitInverted
            } else {
                DisplayOrientation::LandscapeInverted
            }
        }
        Rotation::Rotation270 => {
            if is_vertical {
                DisplayOrientation::LandscapeInverted
            } else {
                DisplayOrientation::PortraitInverted
            }
        }
    }
}
