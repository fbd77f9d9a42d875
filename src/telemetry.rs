// src/telemetry.rs

//! Best-effort telemetry emission for mode transitions.
//!
//! Emission failures are the collaborator's problem; the policy fires and
//! forgets. Nothing here may block or propagate errors into a transition.

use crate::types::{FoldDisplayMode, PanelId};
use log::info;

/// Events emitted by the fold policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryEvent {
    /// A display-mode change was accepted and is being applied.
    DisplayModeChanged { mode: FoldDisplayMode },
    /// A panel swap started: which panel goes dark, which lights up.
    FoldTransitionBegin {
        off_panel: PanelId,
        on_panel: PanelId,
    },
}

/// Fire-and-forget event sink.
pub trait Telemetry: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Telemetry sink that forwards events to the log facade.
#[derive(Debug, Default)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::DisplayModeChanged { mode } => {
                info!("Telemetry: DISPLAY_MODE fold_display_mode={:?}", mode);
            }
            TelemetryEvent::FoldTransitionBegin {
                off_panel,
                on_panel,
            } => {
                info!(
                    "Telemetry: FOLD_STATE_CHANGE_BEGIN off={} on={}",
                    off_panel, on_panel
                );
            }
        }
    }
}

/// Telemetry sink that drops everything.
#[derive(Debug, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn emit(&self, _event: TelemetryEvent) {}
}
