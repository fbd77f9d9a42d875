// src/session/mod.rs

//! ScreenSession - single source of truth for one panel's mutable display
//! state.
//!
//! The fold policy mutates sessions (geometry, power record, scene-graph
//! membership); app-facing proxies read them. A session owns its
//! scene-graph node handle exclusively: the handle is created lazily from
//! the panel's compositor surface and released at most once.
//!
//! ## Threading Model
//! Sessions are shared as `Arc<ScreenSession>`. Interior state sits behind a
//! short-lived mutex; observer callbacks are invoked outside every lock so
//! observers may call back into the session.

use crate::geometry::{calc_display_orientation, DisplayOrientation, Rect, Rotation, ScreenGeometry};
use crate::types::{FoldDisplayMode, PanelId, PowerChangeReason, ScreenPowerState, SurfaceId};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;


/// Recoverable session failures.
///
/// Everything else on the session is total; callers treat these as a skipped
/// transition step, never as a fatal condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The panel has no valid compositor surface to back a scene-graph node.
    #[error("{panel} has no backing compositor surface")]
    NoSurface { panel: PanelId },
}

/// Compositor-side scene graph the session attaches its node to.
///
/// `commit` flushes pending membership changes; implementations may batch.
pub trait SceneGraph: Send + Sync {
    fn add_node(&self, surface: SurfaceId);
    fn remove_node(&self, surface: SurfaceId);
    fn commit(&self);
}

/// Observer of one session's lifecycle and state changes.
///
/// Held weakly: observers never own the session and dead observers are
/// pruned on the next notification.
pub trait ScreenObserver: Send + Sync {
    fn on_connect(&self, _panel: PanelId) {}
    fn on_disconnect(&self, _panel: PanelId) {}
    fn on_geometry_change(&self, _panel: PanelId, _geometry: ScreenGeometry) {}
    fn on_power_change(
        &self,
        _panel: PanelId,
        _state: ScreenPowerState,
        _reason: PowerChangeReason,
    ) {
    }
}

/// The exclusively owned compositor node handle.
#[derive(Debug)]
struct SceneNode {
    surface: SurfaceId,
    attached: bool,
}

#[derive(Debug)]
struct SessionState {
    geometry: ScreenGeometry,
    power: ScreenPowerState,
    power_reason: PowerChangeReason,
    node: Option<SceneNode>,
    connected: bool,
}

/// One panel's mutable display state.
pub struct ScreenSession {
    panel: PanelId,
    surface: SurfaceId,
    scene_graph: Arc<dyn SceneGraph>,
    state: Mutex<SessionState>,
    observers: Mutex<Vec<Weak<dyn ScreenObserver>>>,
}

impl ScreenSession {
    /// Creates a session for a newly enumerated panel. The scene-graph node
    /// is not created here; the policy creates it on first attach.
    pub fn new(
        panel: PanelId,
        surface: SurfaceId,
        geometry: ScreenGeometry,
        scene_graph: Arc<dyn SceneGraph>,
    ) -> Self {
        info!("ScreenSession: created for {} ({})", panel, surface);
        Self {
            panel,
            surface,
            scene_graph,
            state: Mutex::new(SessionState {
                geometry,
                power: ScreenPowerState::Off,
                power_reason: PowerChangeReason::Default,
                node: None,
                connected: false,
            }),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn panel(&self) -> PanelId {
        self.panel
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn geometry(&self) -> ScreenGeometry {
        self.lock_state().geometry
    }

    pub fn power_state(&self) -> ScreenPowerState {
        self.lock_state().power
    }

    pub fn power_change_reason(&self) -> PowerChangeReason {
        self.lock_state().power_reason
    }

    /// Recomputes orientation from the panel aspect ratio, the requested
    /// rotation, and the device rotation offset, then stores the new
    /// geometry. No side effect on power or scene-graph membership.
    pub fn update_geometry(
        &self,
        bounds: Rect,
        rotation: Rotation,
        fold_display_mode: FoldDisplayMode,
    ) -> DisplayOrientation {
        let (orientation, geometry) = {
            let mut state = self.lock_state();
            let orientation = calc_display_orientation(
                rotation,
                fold_display_mode,
                state.geometry.phy_bounds,
                state.geometry.rotation_offset,
            );
            state.geometry.bounds = bounds;
            state.geometry.rotation = rotation;
            state.geometry.orientation = orientation;
            (orientation, state.geometry)
        };
        debug!(
            "ScreenSession: {} geometry now {}x{} rotation={:?} orientation={:?}",
            self.panel, bounds.width, bounds.height, rotation, orientation
        );
        self.for_each_observer(|o| o.on_geometry_change(self.panel, geometry));
        orientation
    }

    /// Applies a calibrated panel profile during a fold transition: physical
    /// bounds follow the profile, then geometry is updated as in
    /// [`Self::update_geometry`].
    pub fn apply_fold_profile(
        &self,
        profile: ScreenGeometry,
        fold_display_mode: FoldDisplayMode,
    ) -> DisplayOrientation {
        {
            let mut state = self.lock_state();
            state.geometry.phy_bounds = profile.phy_bounds;
            state.geometry.rotation_offset = profile.rotation_offset;
        }
        self.update_geometry(profile.bounds, profile.rotation, fold_display_mode)
    }

    /// Records a power-state outcome. Pure state update; the actual power
    /// I/O happens on the task queue before this is called.
    pub fn set_power_state(&self, power: ScreenPowerState, reason: PowerChangeReason) {
        {
            let mut state = self.lock_state();
            state.power = power;
            state.power_reason = reason;
        }
        debug!(
            "ScreenSession: {} power recorded as {:?} ({:?})",
            self.panel, power, reason
        );
        self.for_each_observer(|o| o.on_power_change(self.panel, power, reason));
    }

    /// Creates the scene-graph node handle if the session does not hold one.
    ///
    /// Exclusive-ownership creation: safe to call repeatedly, fails only
    /// when the backing surface is invalid.
    pub fn create_node_if_absent(&self) -> Result<(), SessionError> {
        let mut state = self.lock_state();
        if state.node.is_some() {
            return Ok(());
        }
        if !self.surface.is_valid() {
            warn!("ScreenSession: {} cannot create node, invalid surface", self.panel);
            return Err(SessionError::NoSurface { panel: self.panel });
        }
        state.node = Some(SceneNode {
            surface: self.surface,
            attached: false,
        });
        info!("ScreenSession: {} scene node created ({})", self.panel, self.surface);
        Ok(())
    }

    /// Adds the node to the visible scene graph. Idempotent: attaching an
    /// attached session, or one whose node is missing, is a no-op.
    pub fn attach_to_scene_graph(&self) {
        let surface = {
            let mut state = self.lock_state();
            match state.node.as_mut() {
                Some(node) if !node.attached => {
                    node.attached = true;
                    Some(node.surface)
                }
                Some(_) => {
                    debug!("ScreenSession: {} already attached", self.panel);
                    None
                }
                None => {
                    warn!("ScreenSession: {} attach skipped, no scene node", self.panel);
                    None
                }
            }
        };
        if let Some(surface) = surface {
            info!("ScreenSession: {} attached to scene graph", self.panel);
            self.scene_graph.add_node(surface);
            self.scene_graph.commit();
        }
    }

    /// Removes the node from the visible scene graph. Idempotent.
    pub fn detach_from_scene_graph(&self) {
        let surface = {
            let mut state = self.lock_state();
            match state.node.as_mut() {
                Some(node) if node.attached => {
                    node.attached = false;
                    Some(node.surface)
                }
                Some(_) => {
                    debug!("ScreenSession: {} already detached", self.panel);
                    None
                }
                None => {
                    warn!("ScreenSession: {} detach skipped, no scene node", self.panel);
                    None
                }
            }
        };
        if let Some(surface) = surface {
            info!("ScreenSession: {} detached from scene graph", self.panel);
            self.scene_graph.remove_node(surface);
            self.scene_graph.commit();
        }
    }

    /// Releases the node handle. At most one release takes effect; an
    /// attached node is detached first so the compositor never renders a
    /// released surface.
    pub fn release_node(&self) {
        let attached_surface = {
            let mut state = self.lock_state();
            match state.node.take() {
                Some(node) if node.attached => Some(node.surface),
                Some(_) => None,
                None => return,
            }
        };
        if let Some(surface) = attached_surface {
            self.scene_graph.remove_node(surface);
            self.scene_graph.commit();
        }
        info!("ScreenSession: {} scene node released", self.panel);
    }

    /// Whether the panel currently holds an attached node.
    pub fn is_attached(&self) -> bool {
        self.lock_state()
            .node
            .as_ref()
            .map(|node| node.attached)
            .unwrap_or(false)
    }

    /// Whether the panel is visibly composited: attached and powered. A
    /// session that has been told "power off" never reports visible.
    pub fn is_visible(&self) -> bool {
        let state = self.lock_state();
        state.power == ScreenPowerState::On
            && state.node.as_ref().map(|node| node.attached).unwrap_or(false)
    }

    /// Marks the panel connected and notifies observers.
    pub fn connect(&self) {
        self.lock_state().connected = true;
        self.for_each_observer(|o| o.on_connect(self.panel));
    }

    /// Marks the panel disconnected and notifies observers.
    pub fn disconnect(&self) {
        self.lock_state().connected = false;
        self.for_each_observer(|o| o.on_disconnect(self.panel));
    }

    /// Registers an observer. Re-registering the same observer is a no-op;
    /// registering on a connected session delivers an immediate
    /// `on_connect`.
    pub fn register_observer(&self, observer: &Arc<dyn ScreenObserver>) {
        let candidate = Arc::downgrade(observer);
        {
            let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
            if observers.iter().any(|w| Weak::ptr_eq(w, &candidate)) {
                debug!("ScreenSession: {} observer already registered", self.panel);
                return;
            }
            observers.push(candidate);
        }
        if self.lock_state().connected {
            observer.on_connect(self.panel);
        }
    }

    /// Unregisters an observer; unknown observers are a no-op.
    pub fn unregister_observer(&self, observer: &Arc<dyn ScreenObserver>) {
        let candidate = Arc::downgrade(observer);
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        observers.retain(|w| !Weak::ptr_eq(w, &candidate));
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshots live observers out of the lock, pruning dead ones, then
    /// invokes the callback on each.
    fn for_each_observer(&self, f: impl Fn(&Arc<dyn ScreenObserver>)) {
        let live: Vec<Arc<dyn ScreenObserver>> = {
            let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
            observers.retain(|w| w.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in &live {
            f(observer);
        }
    }
}
