// src/power.rs

//! Power-management collaborator contract.
//!
//! The policy never performs power I/O inline; every call into this trait is
//! made from the serializing task queue worker (see [`crate::scheduler`]).

use crate::types::{PanelId, ScreenPowerState};

/// Hardware power operations consumed by the fold policy.
pub trait PowerController: Send + Sync {
    /// Whether the fold display is currently powered on at the device level.
    fn is_panel_powered_on(&self) -> bool;

    /// Wakes the whole device from sleep, implicitly powering the active
    /// panel.
    fn wake_device(&self);

    /// Powers one panel (or power sub-domain) on or off.
    fn set_panel_power(&self, panel: PanelId, state: ScreenPowerState);
}
