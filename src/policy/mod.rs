// src/policy/mod.rs

//! Fold-display-mode policy: decides which panel configuration is active and
//! drives the multi-step transition between configurations.
//!
//! One policy instance exists per device. Its entry points are called
//! concurrently from the sensor callback thread, the IPC dispatch thread,
//! and the boot sequence; serialization happens through an atomic transition
//! gate rather than a re-entrant lock, and power I/O is sequenced on the
//! [`crate::scheduler`] worker. Competing requests are never cancelled:
//! they are coalesced into a last-requested cache and replayed when the
//! in-flight transition settles.

use crate::config::FoldPolicyConfig;
use crate::crease::{crease_region_for_orientation, parse_crease_calibration, FoldCreaseRegion};
use crate::geometry::Rect;
use crate::power::PowerController;
use crate::registry::SessionRegistry;
use crate::scheduler::{
    PowerSequencer, PowerStep, PowerTask, PowerTaskQueue, TransitionObserver,
};
use crate::session::ScreenSession;
use crate::telemetry::{Telemetry, TelemetryEvent};
use crate::types::{DisplayModeChangeReason, FoldDisplayMode, FoldStatus, PanelId};
use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

#[cfg(test)]
mod tests;

/// A wedged transition stops blocking new requests after this long.
const MODE_CHANGE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Hardware topology of the foldable device.
///
/// The shared transition skeleton (validation, gating, caching,
/// notification) lives once in [`FoldDisplayPolicy`]; only the power and
/// scene-graph procedure differs per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Two independent physical panels; folding swaps which one is powered
    /// and composited.
    TwoPanel {
        primary: PanelId,
        secondary: PanelId,
    },
    /// A single panel whose device-level power domain is split in two;
    /// folding swaps the active sub-domain and the rendered resolution.
    SplitPowerDomain {
        full_domain: PanelId,
        main_domain: PanelId,
    },
}

impl Topology {
    pub fn two_panel(primary: PanelId, secondary: PanelId) -> Self {
        Topology::TwoPanel { primary, secondary }
    }

    pub fn split_power_domain(full_domain: PanelId, main_domain: PanelId) -> Self {
        Topology::SplitPowerDomain {
            full_domain,
            main_domain,
        }
    }

    /// The panel carrying the physical crease.
    fn crease_panel(self) -> PanelId {
        match self {
            Topology::TwoPanel { primary, .. } => primary,
            Topology::SplitPowerDomain { full_domain, .. } => full_domain,
        }
    }
}

/// Pending-transition gate: at most one transition is in flight per policy.
///
/// The running flag is claimed with a compare-and-swap before any other
/// transition state is touched. The pending counter starts at one for the
/// synchronous procedure; every submitted power task adds one before
/// submission, so the counter cannot reach zero until the procedure's own
/// token is returned. Each claim bumps a generation counter; completions
/// carrying an older generation belong to a transition the watchdog
/// displaced and must not decrement the current counter.
struct TransitionGate {
    running: AtomicBool,
    pending: AtomicU32,
    generation: AtomicU64,
    timing: Mutex<GateTiming>,
}

#[derive(Default)]
struct GateTiming {
    started_at: Option<Instant>,
    last_elapsed: Option<Duration>,
}

impl TransitionGate {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            pending: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            timing: Mutex::new(GateTiming::default()),
        }
    }

    /// Claims the gate and returns the new transition's generation. Fails
    /// while another transition is running, unless that transition exceeded
    /// the watchdog timeout, in which case the gate is reclaimed.
    fn try_begin(&self) -> Option<u64> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            if !self.timed_out() {
                return None;
            }
            warn!("TransitionGate: watchdog expired, reclaiming a wedged transition");
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending.store(1, Ordering::SeqCst);
        let mut timing = self.lock_timing();
        timing.started_at = Some(Instant::now());
        Some(generation)
    }

    fn add_step(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns one pending token. True when the transition settled.
    fn complete_step(&self) -> bool {
        let previous = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| p.checked_sub(1));
        match previous {
            Ok(1) => {
                let mut timing = self.lock_timing();
                timing.last_elapsed = timing.started_at.map(|s| s.elapsed());
                timing.started_at = None;
                self.running.store(false, Ordering::Release);
                true
            }
            Ok(_) => false,
            Err(_) => {
                warn!("TransitionGate: stale completion with no transition in flight");
                false
            }
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.timed_out()
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn timed_out(&self) -> bool {
        self.lock_timing()
            .started_at
            .map(|s| s.elapsed() > MODE_CHANGE_TIMEOUT)
            .unwrap_or(false)
    }

    fn last_elapsed_ms(&self) -> u128 {
        self.lock_timing()
            .last_elapsed
            .map(|d| d.as_millis())
            .unwrap_or(0)
    }

    fn lock_timing(&self) -> std::sync::MutexGuard<'_, GateTiming> {
        self.timing.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
struct ModeState {
    /// Authoritative mode; updated when a transition's synchronous phase
    /// finishes.
    current_mode: FoldDisplayMode,
    /// Mode whose transition was most recently started.
    last_mode: FoldDisplayMode,
    fold_status: FoldStatus,
    last_fold_status: FoldStatus,
    /// Panel most recently driven by a power step.
    active_panel: PanelId,
}

struct PolicyInner {
    topology: Topology,
    registry: Arc<dyn SessionRegistry>,
    power: Arc<dyn PowerController>,
    telemetry: Arc<dyn Telemetry>,
    queue: OnceCell<Arc<dyn PowerTaskQueue>>,
    gate: TransitionGate,
    state: Mutex<ModeState>,
    /// Most recently requested mode, recorded even for rejected requests so
    /// a settling transition can replay it.
    last_requested: Mutex<FoldDisplayMode>,
    lock_status: AtomicBool,
    on_boot_animation: AtomicBool,
    coordination_supported: bool,
    crease_calibration: Option<Rect>,
    static_crease: FoldCreaseRegion,
}

/// Completion hook handed to the task queue; holds the policy weakly so the
/// queue never keeps it alive.
struct CompletionHook {
    policy: Weak<PolicyInner>,
}

impl TransitionObserver for CompletionHook {
    fn power_step_done(&self, step: PowerStep, generation: u64) {
        match self.policy.upgrade() {
            Some(policy) => policy.on_power_step_done(step, generation),
            None => debug!("FoldDisplayPolicy: completion after policy teardown"),
        }
    }
}

/// The fold-display-mode policy. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FoldDisplayPolicy {
    inner: Arc<PolicyInner>,
}

impl FoldDisplayPolicy {
    /// Creates a policy backed by a dedicated [`PowerSequencer`] worker.
    pub fn new(
        topology: Topology,
        config: &FoldPolicyConfig,
        registry: Arc<dyn SessionRegistry>,
        power: Arc<dyn PowerController>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Result<Self> {
        let queue_power = Arc::clone(&power);
        let queue_registry = Arc::clone(&registry);
        Self::with_queue(topology, config, registry, power, telemetry, |observer| {
            let sequencer = PowerSequencer::spawn(queue_power, queue_registry, observer)?;
            Ok(Arc::new(sequencer) as Arc<dyn PowerTaskQueue>)
        })
    }

    /// Creates a policy over a caller-supplied task queue. The factory
    /// receives the completion hook the queue must report gated steps to.
    pub fn with_queue(
        topology: Topology,
        config: &FoldPolicyConfig,
        registry: Arc<dyn SessionRegistry>,
        power: Arc<dyn PowerController>,
        telemetry: Arc<dyn Telemetry>,
        make_queue: impl FnOnce(Arc<dyn TransitionObserver>) -> Result<Arc<dyn PowerTaskQueue>>,
    ) -> Result<Self> {
        let crease_calibration = parse_crease_calibration(&config.crease_calibration);
        if crease_calibration.is_none() {
            warn!("FoldDisplayPolicy: crease calibration unusable, queries degrade to empty");
        }
        let crease_panel = topology.crease_panel();
        let static_crease = match crease_calibration {
            Some(rect) => FoldCreaseRegion::new(crease_panel, vec![rect]),
            None => FoldCreaseRegion::empty(crease_panel),
        };
        info!("FoldDisplayPolicy: created for {:?}", topology);

        let inner = Arc::new(PolicyInner {
            topology,
            registry,
            power,
            telemetry,
            queue: OnceCell::new(),
            gate: TransitionGate::new(),
            state: Mutex::new(ModeState {
                current_mode: FoldDisplayMode::Unknown,
                last_mode: FoldDisplayMode::Unknown,
                fold_status: FoldStatus::Unknown,
                last_fold_status: FoldStatus::Unknown,
                active_panel: crease_panel,
            }),
            last_requested: Mutex::new(FoldDisplayMode::Unknown),
            lock_status: AtomicBool::new(false),
            on_boot_animation: AtomicBool::new(false),
            coordination_supported: config.coordination_supported,
            crease_calibration,
            static_crease,
        });

        let hook: Arc<dyn TransitionObserver> = Arc::new(CompletionHook {
            policy: Arc::downgrade(&inner),
        });
        let queue = make_queue(hook)?;
        inner
            .queue
            .set(queue)
            .map_err(|_| anyhow!("power task queue wired twice"))?;

        Ok(Self { inner })
    }

    /// Requests a display-mode change. Rejections (same mode, locked,
    /// unsupported coordination) are silent no-ops; a request arriving while
    /// a transition is in flight is cached and replayed on settle.
    pub fn change_screen_display_mode(
        &self,
        mode: FoldDisplayMode,
        reason: DisplayModeChangeReason,
    ) {
        self.inner.change_screen_display_mode(mode, reason);
    }

    /// Feeds a fold-sensor result. Maps the status to a target mode and
    /// requests it with the default (lock-respecting) reason.
    pub fn send_sensor_result(&self, fold_status: FoldStatus) {
        self.inner.send_sensor_result(fold_status);
    }

    /// Records a fold status without triggering a transition.
    pub fn set_fold_status(&self, fold_status: FoldStatus) {
        info!("FoldDisplayPolicy: fold status recorded as {:?}", fold_status);
        let mut state = self.inner.lock_state();
        state.fold_status = fold_status;
        state.last_fold_status = fold_status;
    }

    /// Freezes sensor-driven mode changes. `Force`-reason requests still
    /// proceed.
    pub fn lock_display_status(&self, locked: bool) {
        info!("FoldDisplayPolicy: lock display status: {}", locked);
        self.inner.lock_status.store(locked, Ordering::SeqCst);
    }

    /// Marks the boot-animation phase. Leaving it triggers one recovery
    /// transition so compositor state matches the hardware state established
    /// before the policy existed.
    pub fn set_on_boot_animation(&self, on_boot_animation: bool) {
        info!(
            "FoldDisplayPolicy: boot animation: {}",
            on_boot_animation
        );
        self.inner
            .on_boot_animation
            .store(on_boot_animation, Ordering::SeqCst);
        if !on_boot_animation {
            self.inner.recover_after_boot_animation();
        }
    }

    /// Leaves coordination mode: powers off and detaches the secondary
    /// panel, then recomputes the mode strictly from the current fold
    /// status.
    pub fn exit_coordination(&self) {
        self.inner.exit_coordination();
    }

    /// Re-derives the target mode after a physical screen-property change.
    pub fn update_for_phy_screen_property_change(&self) {
        let target = self.inner.mode_match_status();
        if target == FoldDisplayMode::Unknown {
            return;
        }
        if self.inner.lock_state().current_mode != target {
            self.inner
                .change_screen_display_mode(target, DisplayModeChangeReason::Default);
        }
    }

    /// The precomputed crease region, static for the life of the policy.
    pub fn current_fold_crease_region(&self) -> FoldCreaseRegion {
        self.inner.static_crease.clone()
    }

    /// The crease region under the active panel's live orientation. Empty
    /// when the current mode has no meaningful crease.
    pub fn live_crease_region(&self) -> FoldCreaseRegion {
        self.inner.live_crease_region()
    }

    pub fn screen_display_mode(&self) -> FoldDisplayMode {
        self.inner.lock_state().last_mode
    }

    pub fn current_display_mode(&self) -> FoldDisplayMode {
        self.inner.lock_state().current_mode
    }

    pub fn fold_status(&self) -> FoldStatus {
        self.inner.lock_state().last_fold_status
    }

    /// Panel most recently driven by a power step.
    pub fn active_panel(&self) -> PanelId {
        self.inner.lock_state().active_panel
    }

    /// Whether a transition is currently in flight.
    pub fn is_transitioning(&self) -> bool {
        self.inner.gate.is_running()
    }
}

impl PolicyInner {
    fn change_screen_display_mode(&self, mode: FoldDisplayMode, reason: DisplayModeChangeReason) {
        self.set_last_requested(mode);
        if mode == FoldDisplayMode::Unknown {
            debug!("FoldDisplayPolicy: unknown target mode, nothing to drive");
            return;
        }
        if self.lock_status.load(Ordering::SeqCst) && reason != DisplayModeChangeReason::Force {
            info!(
                "FoldDisplayPolicy: display locked, rejecting {:?} ({:?})",
                mode, reason
            );
            return;
        }
        if !self.check_display_mode(mode) {
            return;
        }
        self.begin_transition(mode);
    }

    fn check_display_mode(&self, mode: FoldDisplayMode) -> bool {
        if mode == FoldDisplayMode::Coordination {
            if !self.coordination_supported {
                info!("FoldDisplayPolicy: device does not support coordination");
                return false;
            }
            if self.on_boot_animation.load(Ordering::SeqCst) {
                info!("FoldDisplayPolicy: coordination unavailable during boot animation");
                return false;
            }
        }
        if self.lock_state().current_mode == mode {
            warn!("FoldDisplayPolicy: already in mode {:?}", mode);
            return false;
        }
        true
    }

    /// Runs one gated transition toward `mode`. Callers have validated the
    /// request; a transition already in flight wins and the cached request
    /// is replayed on settle.
    fn begin_transition(&self, mode: FoldDisplayMode) {
        let Some(generation) = self.gate.try_begin() else {
            warn!(
                "FoldDisplayPolicy: transition in flight, {:?} cached for replay",
                mode
            );
            return;
        };
        info!(
            "FoldDisplayPolicy: start mode change to {:?}, last took {}ms",
            mode,
            self.gate.last_elapsed_ms()
        );
        self.lock_state().last_mode = mode;
        self.telemetry
            .emit(TelemetryEvent::DisplayModeChanged { mode });

        match self.topology {
            Topology::TwoPanel { primary, secondary } => match mode {
                FoldDisplayMode::Main => {
                    self.two_panel_swap(secondary, primary, mode, generation)
                }
                FoldDisplayMode::Sub => {
                    self.two_panel_swap(primary, secondary, mode, generation)
                }
                FoldDisplayMode::Coordination => {
                    self.enter_coordination(primary, secondary, generation)
                }
                _ => info!(
                    "FoldDisplayPolicy: {:?} not driven on a two-panel device",
                    mode
                ),
            },
            Topology::SplitPowerDomain {
                full_domain,
                main_domain,
            } => match mode {
                FoldDisplayMode::Full => {
                    self.split_domain_swap(main_domain, full_domain, mode, generation)
                }
                FoldDisplayMode::Main => {
                    self.split_domain_swap(full_domain, main_domain, mode, generation)
                }
                _ => info!(
                    "FoldDisplayPolicy: {:?} not driven on a split-domain device",
                    mode
                ),
            },
        }

        self.lock_state().current_mode = mode;
        self.registry.notify_mode_changed(mode);
        if self.gate.complete_step() {
            self.on_transition_settled();
        }
    }

    /// Two-panel procedure: power off one panel, power on the other, swap
    /// scene-graph membership (detach before attach), re-apply the target
    /// panel's calibrated profile.
    fn two_panel_swap(
        &self,
        off_panel: PanelId,
        on_panel: PanelId,
        mode: FoldDisplayMode,
        generation: u64,
    ) {
        let Some(on_session) = self.registry.lookup(on_panel) else {
            error!("FoldDisplayPolicy: no session for {}", on_panel);
            return;
        };
        if self.on_boot_animation.load(Ordering::SeqCst) {
            self.apply_mode_on_boot_animation(&on_session, on_panel, mode);
            return;
        }
        self.telemetry.emit(TelemetryEvent::FoldTransitionBegin {
            off_panel,
            on_panel,
        });
        let is_screen_on = self.power.is_panel_powered_on();
        info!(
            "FoldDisplayPolicy: swap {} -> {}, screen on: {}",
            off_panel, on_panel, is_screen_on
        );

        self.submit_gated("screen-off", PowerStep::PanelOff { panel: off_panel }, generation);
        match self.registry.lookup(off_panel) {
            Some(off_session) => off_session.detach_from_scene_graph(),
            None => warn!("FoldDisplayPolicy: no session for {}, detach skipped", off_panel),
        }

        self.submit_gated(
            "screen-on",
            PowerStep::PanelOn {
                panel: on_panel,
                wake_if_asleep: !is_screen_on,
            },
            generation,
        );
        if let Err(e) = on_session.create_node_if_absent() {
            warn!("FoldDisplayPolicy: {}, panel stays powered but not composited", e);
        }
        on_session.attach_to_scene_graph();
        self.apply_panel_profile(&on_session, on_panel, mode);
    }

    /// Coordination entry: both panels powered and attached. The secondary
    /// panel only powers up if the device is awake when its step runs.
    fn enter_coordination(&self, primary: PanelId, secondary: PanelId, generation: u64) {
        let is_screen_on = self.power.is_panel_powered_on();
        info!(
            "FoldDisplayPolicy: entering coordination, screen on: {}",
            is_screen_on
        );
        self.submit_gated(
            "coordination-primary-on",
            PowerStep::PanelOn {
                panel: primary,
                wake_if_asleep: !is_screen_on,
            },
            generation,
        );
        self.submit_gated(
            "coordination-secondary-on",
            PowerStep::PanelOnIfAwake { panel: secondary },
            generation,
        );
        for panel in [primary, secondary] {
            match self.registry.lookup(panel) {
                Some(session) => {
                    if let Err(e) = session.create_node_if_absent() {
                        warn!("FoldDisplayPolicy: {}, panel not composited", e);
                        continue;
                    }
                    session.attach_to_scene_graph();
                }
                None => warn!("FoldDisplayPolicy: no session for {}, attach skipped", panel),
            }
        }
    }

    fn exit_coordination(&self) {
        let Topology::TwoPanel { secondary, .. } = self.topology else {
            warn!("FoldDisplayPolicy: exit_coordination on a split-domain device");
            return;
        };
        info!("FoldDisplayPolicy: exiting coordination");
        // Ungated: an idle-time exit must not disturb the pending counter of
        // a concurrent transition.
        self.submit(PowerTask {
            label: "exit-coordination-off",
            step: PowerStep::PanelOff { panel: secondary },
            gated: false,
            generation: 0,
        });
        match self.registry.lookup(secondary) {
            Some(session) => session.detach_from_scene_graph(),
            None => warn!("FoldDisplayPolicy: no session for {}, detach skipped", secondary),
        }
        let mode = self.mode_match_status();
        {
            let mut state = self.lock_state();
            state.current_mode = mode;
            state.last_mode = mode;
        }
        info!("FoldDisplayPolicy: coordination exited into {:?}", mode);
        self.registry.notify_mode_changed(mode);
    }

    /// Split-domain procedure: same off-then-on sequencing as the two-panel
    /// swap, minus scene-graph work; the single panel stays attached and
    /// only the resolution profile and power sub-domain change.
    fn split_domain_swap(
        &self,
        off_domain: PanelId,
        on_domain: PanelId,
        mode: FoldDisplayMode,
        generation: u64,
    ) {
        let session_panel = self.topology.crease_panel();
        let Some(session) = self.registry.lookup(session_panel) else {
            error!("FoldDisplayPolicy: no session for {}", session_panel);
            return;
        };
        if self.on_boot_animation.load(Ordering::SeqCst) {
            self.apply_mode_on_boot_animation(&session, on_domain, mode);
            return;
        }
        self.telemetry.emit(TelemetryEvent::FoldTransitionBegin {
            off_panel: off_domain,
            on_panel: on_domain,
        });
        let is_screen_on = self.power.is_panel_powered_on();
        info!(
            "FoldDisplayPolicy: domain swap {} -> {}, screen on: {}",
            off_domain, on_domain, is_screen_on
        );

        self.submit_gated("domain-off", PowerStep::PanelOff { panel: off_domain }, generation);
        self.apply_panel_profile(&session, on_domain, mode);

        // A folded device that is asleep stays asleep; expanding wakes it.
        let on_step = if is_screen_on {
            PowerStep::PanelOn {
                panel: on_domain,
                wake_if_asleep: false,
            }
        } else if mode == FoldDisplayMode::Full {
            PowerStep::PanelOn {
                panel: on_domain,
                wake_if_asleep: true,
            }
        } else {
            PowerStep::PanelOnIfAwake { panel: on_domain }
        };
        self.submit_gated("domain-on", on_step, generation);
    }

    /// Boot-animation short-circuit: geometry and scene-graph membership
    /// only, no power I/O.
    fn apply_mode_on_boot_animation(
        &self,
        session: &Arc<ScreenSession>,
        panel: PanelId,
        mode: FoldDisplayMode,
    ) {
        info!(
            "FoldDisplayPolicy: boot animation, applying {:?} without power I/O",
            mode
        );
        if let Err(e) = session.create_node_if_absent() {
            warn!("FoldDisplayPolicy: {}, panel not composited", e);
        } else {
            session.attach_to_scene_graph();
        }
        self.apply_panel_profile(session, panel, mode);
        self.lock_state().active_panel = panel;
    }

    /// Fetches the calibrated profile for `panel` and applies it to the
    /// session. A missing profile skips the step; the transition proceeds.
    fn apply_panel_profile(
        &self,
        session: &Arc<ScreenSession>,
        panel: PanelId,
        mode: FoldDisplayMode,
    ) {
        match self.registry.device_geometry(panel) {
            Some(profile) => {
                let orientation = session.apply_fold_profile(profile, mode);
                debug!(
                    "FoldDisplayPolicy: {} now {}x{} ({:?})",
                    panel, profile.bounds.width, profile.bounds.height, orientation
                );
            }
            None => warn!(
                "FoldDisplayPolicy: no device geometry for {}, profile not applied",
                panel
            ),
        }
    }

    fn recover_after_boot_animation(&self) {
        let target = self.mode_match_status();
        if target == FoldDisplayMode::Unknown {
            info!("FoldDisplayPolicy: fold status unknown at boot exit, no recovery");
            return;
        }
        self.set_last_requested(target);
        let current = self.lock_state().current_mode;
        if current != target {
            info!(
                "FoldDisplayPolicy: boot exit recovery {:?} -> {:?}",
                current, target
            );
            self.change_screen_display_mode(target, DisplayModeChangeReason::Force);
        } else {
            // Hardware already matches; re-apply so the compositor catches
            // up with state established before the policy existed.
            info!("FoldDisplayPolicy: boot exit re-applying {:?}", target);
            self.begin_transition(target);
        }
    }

    fn send_sensor_result(&self, fold_status: FoldStatus) {
        info!("FoldDisplayPolicy: sensor fold status {:?}", fold_status);
        {
            let mut state = self.lock_state();
            state.fold_status = fold_status;
            state.last_fold_status = fold_status;
        }
        let target = self.mode_match_status();
        if target == FoldDisplayMode::Unknown {
            debug!("FoldDisplayPolicy: no target mode for {:?}", fold_status);
            return;
        }
        if matches!(self.topology, Topology::TwoPanel { .. }) {
            let current = self.lock_state().current_mode;
            if current == FoldDisplayMode::Coordination
                && self.power.is_panel_powered_on()
                && target == FoldDisplayMode::Main
            {
                info!("FoldDisplayPolicy: holding coordination through half fold");
                return;
            }
        }
        self.change_screen_display_mode(target, DisplayModeChangeReason::Default);
    }

    /// Maps the current fold status to this topology's target mode.
    /// HalfFolded deliberately shares the Expanded target.
    fn mode_match_status(&self) -> FoldDisplayMode {
        let fold_status = self.lock_state().fold_status;
        match (self.topology, fold_status) {
            (_, FoldStatus::Unknown) => FoldDisplayMode::Unknown,
            (Topology::TwoPanel { .. }, FoldStatus::Expanded | FoldStatus::HalfFolded) => {
                FoldDisplayMode::Main
            }
            (Topology::TwoPanel { .. }, FoldStatus::Folded) => FoldDisplayMode::Sub,
            (
                Topology::SplitPowerDomain { .. },
                FoldStatus::Expanded | FoldStatus::HalfFolded,
            ) => FoldDisplayMode::Full,
            (Topology::SplitPowerDomain { .. }, FoldStatus::Folded) => FoldDisplayMode::Main,
        }
    }

    fn live_crease_region(&self) -> FoldCreaseRegion {
        let crease_panel = self.topology.crease_panel();
        let mode = self.lock_state().current_mode;
        let has_crease = match self.topology {
            Topology::TwoPanel { .. } => !matches!(
                mode,
                FoldDisplayMode::Sub | FoldDisplayMode::Unknown
            ),
            Topology::SplitPowerDomain { .. } => mode == FoldDisplayMode::Full,
        };
        if !has_crease {
            return FoldCreaseRegion::empty(crease_panel);
        }
        let Some(session) = self.registry.lookup(crease_panel) else {
            return FoldCreaseRegion::empty(crease_panel);
        };
        crease_region_for_orientation(
            crease_panel,
            self.crease_calibration,
            session.geometry().orientation,
        )
    }

    /// Gated-step completion, invoked from the queue worker. Steps tagged
    /// with a displaced generation are dropped so they cannot settle the
    /// transition that reclaimed the gate.
    fn on_power_step_done(&self, step: PowerStep, generation: u64) {
        if generation != self.gate.current_generation() {
            warn!(
                "FoldDisplayPolicy: dropping step {:?} from displaced transition {}",
                step, generation
            );
            return;
        }
        self.lock_state().active_panel = step.panel();
        if self.gate.complete_step() {
            self.on_transition_settled();
        }
    }

    /// The pending counter hit zero: replay a request that arrived while
    /// the transition was in flight.
    fn on_transition_settled(&self) {
        let applied = self.lock_state().last_mode;
        let cached = *self
            .last_requested
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if cached != applied {
            info!(
                "FoldDisplayPolicy: settled on {:?}, replaying cached {:?}",
                applied, cached
            );
            self.change_screen_display_mode(cached, DisplayModeChangeReason::Default);
        }
    }

    fn submit_gated(&self, label: &'static str, step: PowerStep, generation: u64) {
        self.gate.add_step();
        self.submit(PowerTask {
            label,
            step,
            gated: true,
            generation,
        });
    }

    fn submit(&self, task: PowerTask) {
        match self.queue.get() {
            Some(queue) => queue.submit(task),
            // Unreachable after construction; tolerate it like a lost step.
            None => error!("FoldDisplayPolicy: no task queue, dropping {}", task.label),
        }
    }

    fn set_last_requested(&self, mode: FoldDisplayMode) {
        *self
            .last_requested
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = mode;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ModeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
