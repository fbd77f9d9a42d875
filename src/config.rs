// src/config.rs

//! Typed configuration for the fold-display policy.
//!
//! Embedders deserialize this from whatever configuration source the service
//! uses; loading files is outside this crate. Defaults describe the
//! two-panel reference device.

use crate::types::PanelId;
use serde::{Deserialize, Serialize};

/// Complete configuration consumed at policy construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FoldPolicyConfig {
    /// Panel wiring for the device topology.
    pub panels: PanelConfig,
    /// Crease calibration string, `"x,y;width,height"`.
    pub crease_calibration: String,
    /// Fixed per-device panel mounting offset in degrees.
    pub rotation_offset: u32,
    /// Whether this device topology supports coordination mode.
    pub coordination_supported: bool,
}

impl Default for FoldPolicyConfig {
    fn default() -> Self {
        FoldPolicyConfig {
            panels: PanelConfig::default(),
            crease_calibration: "0,1256;1136,184".to_string(),
            rotation_offset: 0,
            coordination_supported: false,
        }
    }
}

/// Panel identifiers used by the policy.
///
/// For two-panel devices `primary`/`secondary` are distinct physical panels;
/// for split-power-domain devices they name the two power sub-domains of the
/// single panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub primary: PanelId,
    pub secondary: PanelId,
}

impl Default for PanelConfig {
    fn default() -> Self {
        PanelConfig {
            primary: PanelId(0),
            secondary: PanelId(5),
        }
    }
}
