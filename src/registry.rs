// src/registry.rs

//! Session registry: panel-id to session lookup plus mode-change fan-out.
//!
//! The fold policy holds the registry as an injected handle and only ever
//! identifies panels by [`PanelId`]; sessions themselves own their
//! scene-graph handles.

use crate::geometry::ScreenGeometry;
use crate::session::ScreenSession;
use crate::types::{FoldDisplayMode, PanelId};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Registry contract consumed by the policy.
pub trait SessionRegistry: Send + Sync {
    /// Resolves a panel to its live session, if the panel is enumerated.
    fn lookup(&self, panel: PanelId) -> Option<Arc<ScreenSession>>;

    /// Calibrated geometry profile for a panel (or power sub-domain).
    fn device_geometry(&self, panel: PanelId) -> Option<ScreenGeometry>;

    /// Forwards a completed mode change to app-facing listeners.
    fn notify_mode_changed(&self, mode: FoldDisplayMode);
}

/// Listener for completed display-mode changes.
pub trait ModeChangeListener: Send + Sync {
    fn on_mode_changed(&self, mode: FoldDisplayMode);
}

struct PanelEntry {
    session: Arc<ScreenSession>,
    profile: ScreenGeometry,
}

/// In-memory registry used by embedders and tests.
#[derive(Default)]
pub struct PanelRegistry {
    panels: Mutex<HashMap<PanelId, PanelEntry>>,
    listeners: Mutex<Vec<Weak<dyn ModeChangeListener>>>,
    last_mode: Mutex<FoldDisplayMode>,
}

impl PanelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a panel with its calibrated profile.
    pub fn register_panel(&self, session: Arc<ScreenSession>, profile: ScreenGeometry) {
        let panel = session.panel();
        info!("PanelRegistry: registering {}", panel);
        let mut panels = self.panels.lock().unwrap_or_else(|e| e.into_inner());
        panels.insert(panel, PanelEntry { session, profile });
    }

    /// Removes a panel; its session releases the scene node on teardown.
    pub fn remove_panel(&self, panel: PanelId) {
        let entry = {
            let mut panels = self.panels.lock().unwrap_or_else(|e| e.into_inner());
            panels.remove(&panel)
        };
        match entry {
            Some(entry) => {
                entry.session.disconnect();
                entry.session.release_node();
                info!("PanelRegistry: removed {}", panel);
            }
            None => warn!("PanelRegistry: remove of unknown {}", panel),
        }
    }

    pub fn register_mode_listener(&self, listener: &Arc<dyn ModeChangeListener>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.push(Arc::downgrade(listener));
    }

    /// Last mode handed to `notify_mode_changed`, for diagnostics.
    pub fn last_notified_mode(&self) -> FoldDisplayMode {
        *self.last_mode.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionRegistry for PanelRegistry {
    fn lookup(&self, panel: PanelId) -> Option<Arc<ScreenSession>> {
        let panels = self.panels.lock().unwrap_or_else(|e| e.into_inner());
        panels.get(&panel).map(|entry| Arc::clone(&entry.session))
    }

    fn device_geometry(&self, panel: PanelId) -> Option<ScreenGeometry> {
        let panels = self.panels.lock().unwrap_or_else(|e| e.into_inner());
        panels.get(&panel).map(|entry| entry.profile)
    }

    fn notify_mode_changed(&self, mode: FoldDisplayMode) {
        info!("PanelRegistry: display mode changed to {:?}", mode);
        *self.last_mode.lock().unwrap_or_else(|e| e.into_inner()) = mode;
        let live: Vec<Arc<dyn ModeChangeListener>> = {
            let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners.retain(|w| w.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in &live {
            listener.on_mode_changed(mode);
        }
    }
}
