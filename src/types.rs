// src/types.rs

//! Core identifiers and state enums shared by the session, policy, and
//! scheduler modules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical hinge-angle classification reported by the fold sensor.
///
/// Input only; produced by an external sensor collaborator and consumed by
/// [`crate::policy::FoldDisplayPolicy::send_sensor_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FoldStatus {
    #[default]
    Unknown,
    Expanded,
    Folded,
    HalfFolded,
}

/// The logical configuration of which panel(s) are active.
///
/// Exactly one value is authoritative per policy instance at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FoldDisplayMode {
    #[default]
    Unknown,
    /// The smaller / folded configuration.
    Main,
    /// The expanded configuration (single-panel split-domain devices).
    Full,
    /// Secondary-panel-only configuration (two-panel devices).
    Sub,
    /// Both panels active simultaneously.
    Coordination,
}

/// Why a display-mode change was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayModeChangeReason {
    #[default]
    Default,
    /// Bypasses the locked-display guard (deliberate user-initiated change).
    Force,
}

/// Recorded power state of one panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScreenPowerState {
    On,
    #[default]
    Off,
}

/// Tag recorded on a session alongside a power-state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerChangeReason {
    #[default]
    Default,
    /// Power toggled as part of a fold-mode panel switch.
    DisplaySwitch,
    /// Power recorded during the boot sequence.
    Boot,
}

/// Opaque identifier distinguishing physical or virtual panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PanelId(pub u64);

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panel-{}", self.0)
    }
}

/// Compositor surface identifier underlying a session's scene-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

impl SurfaceId {
    /// Sentinel for "no backing surface"; node creation fails on it.
    pub const INVALID: SurfaceId = SurfaceId(u64::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "surface-{}", self.0)
        } else {
            write!(f, "surface-invalid")
        }
    }
}
