// src/policy/tests.rs

use super::*;
use crate::geometry::ScreenGeometry;
use crate::registry::PanelRegistry;
use crate::scheduler::execute_power_task;
use crate::session::SceneGraph;
use crate::telemetry::NoopTelemetry;
use crate::types::{ScreenPowerState, SurfaceId};

const PRIMARY: PanelId = PanelId(0);
const SECONDARY: PanelId = PanelId(5);
const FULL_DOMAIN: PanelId = PanelId(0);
const MAIN_DOMAIN: PanelId = PanelId(9);

const PRIMARY_BOUNDS: Rect = Rect::new(0, 0, 1136, 2496);
const SECONDARY_BOUNDS: Rect = Rect::new(0, 0, 1080, 2504);
const FULL_BOUNDS: Rect = Rect::new(0, 0, 2048, 2496);
const MAIN_BOUNDS: Rect = Rect::new(0, 0, 1008, 2496);

/// Records every hardware call in order.
#[derive(Default)]
struct RecordingPower {
    calls: Mutex<Vec<String>>,
    screen_on: AtomicBool,
}

impl RecordingPower {
    fn with_screen_on(on: bool) -> Self {
        let power = Self::default();
        power.screen_on.store(on, Ordering::SeqCst);
        power
    }

    fn recorded(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PowerController for RecordingPower {
    fn is_panel_powered_on(&self) -> bool {
        self.screen_on.load(Ordering::SeqCst)
    }

    fn wake_device(&self) {
        self.screen_on.store(true, Ordering::SeqCst);
        self.calls.lock().unwrap().push("wake".to_string());
    }

    fn set_panel_power(&self, panel: PanelId, state: ScreenPowerState) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{:?}", panel, state));
    }
}

/// Records every scene-graph mutation in order.
#[derive(Default)]
struct RecordingSceneGraph {
    ops: Mutex<Vec<String>>,
}

impl SceneGraph for RecordingSceneGraph {
    fn add_node(&self, surface: SurfaceId) {
        self.ops.lock().unwrap().push(format!("add:{}", surface));
    }

    fn remove_node(&self, surface: SurfaceId) {
        self.ops.lock().unwrap().push(format!("remove:{}", surface));
    }

    fn commit(&self) {
        self.ops.lock().unwrap().push("commit".to_string());
    }
}

impl RecordingSceneGraph {
    fn recorded(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl Telemetry for RecordingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Buffering queue pumped by hand, so tests control exactly when the
/// asynchronous half of a transition runs.
struct FakePowerQueue {
    power: Arc<dyn PowerController>,
    registry: Arc<dyn SessionRegistry>,
    observer: Mutex<Option<Arc<dyn TransitionObserver>>>,
    tasks: Mutex<Vec<PowerTask>>,
}

impl FakePowerQueue {
    fn new(power: Arc<dyn PowerController>, registry: Arc<dyn SessionRegistry>) -> Self {
        Self {
            power,
            registry,
            observer: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn set_observer(&self, observer: Arc<dyn TransitionObserver>) {
        *self.observer.lock().unwrap() = Some(observer);
    }

    fn pending_labels(&self) -> Vec<&'static str> {
        self.tasks.lock().unwrap().iter().map(|t| t.label).collect()
    }

    /// Runs the single oldest queued task. False when the queue was empty.
    fn pump_next(&self) -> bool {
        let task = {
            let mut tasks = self.tasks.lock().unwrap();
            if tasks.is_empty() {
                return false;
            }
            tasks.remove(0)
        };
        let observer = self.observer.lock().unwrap().clone().unwrap();
        execute_power_task(&task, &self.power, &self.registry, &observer);
        true
    }

    /// Runs queued tasks to exhaustion. A settling transition may submit a
    /// replayed transition's tasks, hence the loop.
    fn pump(&self) {
        loop {
            let batch: Vec<PowerTask> = std::mem::take(&mut *self.tasks.lock().unwrap());
            if batch.is_empty() {
                break;
            }
            let observer = self.observer.lock().unwrap().clone().unwrap();
            for task in &batch {
                execute_power_task(task, &self.power, &self.registry, &observer);
            }
        }
    }
}

impl PowerTaskQueue for FakePowerQueue {
    fn submit(&self, task: PowerTask) {
        self.tasks.lock().unwrap().push(task);
    }
}

struct Fixture {
    policy: FoldDisplayPolicy,
    power: Arc<RecordingPower>,
    registry: Arc<PanelRegistry>,
    scene: Arc<RecordingSceneGraph>,
    queue: Arc<FakePowerQueue>,
}

fn register(
    registry: &PanelRegistry,
    scene: &Arc<RecordingSceneGraph>,
    panel: PanelId,
    bounds: Rect,
) -> Arc<ScreenSession> {
    let session = Arc::new(ScreenSession::new(
        panel,
        SurfaceId(panel.0 + 100),
        ScreenGeometry::with_bounds(bounds, 0),
        Arc::clone(scene) as Arc<dyn SceneGraph>,
    ));
    registry.register_panel(
        Arc::clone(&session),
        ScreenGeometry::with_bounds(bounds, 0),
    );
    session
}

fn fixture(topology: Topology, config: FoldPolicyConfig, screen_on: bool) -> Fixture {
    fixture_with_telemetry(topology, config, screen_on, Arc::new(NoopTelemetry))
}

fn fixture_with_telemetry(
    topology: Topology,
    config: FoldPolicyConfig,
    screen_on: bool,
    telemetry: Arc<dyn Telemetry>,
) -> Fixture {
    let power = Arc::new(RecordingPower::with_screen_on(screen_on));
    let registry = Arc::new(PanelRegistry::new());
    let scene = Arc::new(RecordingSceneGraph::default());
    match topology {
        Topology::TwoPanel { primary, secondary } => {
            register(&registry, &scene, primary, PRIMARY_BOUNDS);
            register(&registry, &scene, secondary, SECONDARY_BOUNDS);
        }
        Topology::SplitPowerDomain {
            full_domain,
            main_domain,
        } => {
            register(&registry, &scene, full_domain, FULL_BOUNDS);
            register(&registry, &scene, main_domain, MAIN_BOUNDS);
        }
    }
    let queue = Arc::new(FakePowerQueue::new(
        Arc::clone(&power) as Arc<dyn PowerController>,
        Arc::clone(&registry) as Arc<dyn SessionRegistry>,
    ));
    let policy = FoldDisplayPolicy::with_queue(
        topology,
        &config,
        Arc::clone(&registry) as Arc<dyn SessionRegistry>,
        Arc::clone(&power) as Arc<dyn PowerController>,
        telemetry,
        |observer| {
            queue.set_observer(observer);
            Ok(Arc::clone(&queue) as Arc<dyn PowerTaskQueue>)
        },
    )
    .unwrap();
    Fixture {
        policy,
        power,
        registry,
        scene,
        queue,
    }
}

fn two_panel(screen_on: bool) -> Fixture {
    fixture(
        Topology::two_panel(PRIMARY, SECONDARY),
        FoldPolicyConfig::default(),
        screen_on,
    )
}

fn two_panel_with_coordination(screen_on: bool) -> Fixture {
    let config = FoldPolicyConfig {
        coordination_supported: true,
        ..FoldPolicyConfig::default()
    };
    fixture(Topology::two_panel(PRIMARY, SECONDARY), config, screen_on)
}

fn split_domain(screen_on: bool) -> Fixture {
    fixture(
        Topology::split_power_domain(FULL_DOMAIN, MAIN_DOMAIN),
        FoldPolicyConfig::default(),
        screen_on,
    )
}

#[test_log::test]
fn it_should_map_fold_status_to_the_topology_target_mode() {
    let fx = two_panel(true);
    fx.policy.send_sensor_result(FoldStatus::Expanded);
    fx.queue.pump();
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Main);
    fx.policy.send_sensor_result(FoldStatus::Folded);
    fx.queue.pump();
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Sub);

    let fx = split_domain(true);
    fx.policy.send_sensor_result(FoldStatus::Expanded);
    fx.queue.pump();
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Full);
    fx.policy.send_sensor_result(FoldStatus::Folded);
    fx.queue.pump();
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Main);
}

#[test_log::test]
fn it_should_share_a_target_between_expanded_and_half_folded() {
    let fx = two_panel(true);
    fx.policy.send_sensor_result(FoldStatus::HalfFolded);
    fx.queue.pump();
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Main);

    // Expanding from half folded is a same-mode request: no new power I/O.
    let calls = fx.power.recorded().len();
    fx.policy.send_sensor_result(FoldStatus::Expanded);
    fx.queue.pump();
    assert_eq!(fx.power.recorded().len(), calls);
    assert_eq!(fx.policy.fold_status(), FoldStatus::Expanded);
}

#[test_log::test]
fn it_should_ignore_an_unknown_fold_status() {
    let fx = two_panel(true);
    fx.policy.send_sensor_result(FoldStatus::Unknown);
    assert!(fx.queue.pending_labels().is_empty());
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Unknown);
}

#[test_log::test]
fn it_should_swap_panel_power_and_track_the_active_panel() {
    let fx = two_panel(true);
    fx.policy.send_sensor_result(FoldStatus::Folded);
    fx.queue.pump();

    assert_eq!(fx.power.recorded(), vec!["panel-0:Off", "panel-5:On"]);
    assert_eq!(fx.policy.active_panel(), SECONDARY);
    assert!(!fx.policy.is_transitioning());

    let secondary = fx.registry.lookup(SECONDARY).unwrap();
    assert_eq!(secondary.power_state(), ScreenPowerState::On);
    assert_eq!(secondary.geometry().bounds, SECONDARY_BOUNDS);
    assert!(secondary.is_visible());
}

#[test_log::test]
fn it_should_detach_the_dark_panel_before_attaching_the_lit_one() {
    let fx = two_panel(true);
    fx.policy.send_sensor_result(FoldStatus::Expanded);
    fx.queue.pump();
    fx.policy.send_sensor_result(FoldStatus::Folded);
    fx.queue.pump();

    assert_eq!(
        fx.scene.recorded(),
        vec![
            "add:surface-100",
            "commit",
            "remove:surface-100",
            "commit",
            "add:surface-105",
            "commit",
        ]
    );
}

#[test_log::test]
fn it_should_reject_a_request_for_the_current_mode() {
    let fx = two_panel(true);
    fx.policy
        .change_screen_display_mode(FoldDisplayMode::Main, DisplayModeChangeReason::Default);
    fx.queue.pump();
    let calls = fx.power.recorded().len();

    fx.policy
        .change_screen_display_mode(FoldDisplayMode::Main, DisplayModeChangeReason::Default);
    fx.queue.pump();
    assert_eq!(fx.power.recorded().len(), calls);
    assert!(!fx.policy.is_transitioning());
}

#[test_log::test]
fn it_should_freeze_sensor_changes_while_locked_but_honor_force() {
    let fx = two_panel(true);
    fx.policy.lock_display_status(true);

    fx.policy.send_sensor_result(FoldStatus::Folded);
    assert!(fx.queue.pending_labels().is_empty());
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Unknown);

    fx.policy
        .change_screen_display_mode(FoldDisplayMode::Sub, DisplayModeChangeReason::Force);
    fx.queue.pump();
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Sub);

    fx.policy.lock_display_status(false);
    fx.policy.send_sensor_result(FoldStatus::Expanded);
    fx.queue.pump();
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Main);
}

#[test_log::test]
fn it_should_replay_a_request_that_arrived_mid_transition() {
    let fx = two_panel(true);
    fx.policy.send_sensor_result(FoldStatus::Expanded);
    assert!(fx.policy.is_transitioning());

    // Arrives while the swap toward Main is still on the queue.
    fx.policy.send_sensor_result(FoldStatus::Folded);
    fx.queue.pump();

    assert_eq!(
        fx.power.recorded(),
        vec!["panel-5:Off", "panel-0:On", "panel-0:Off", "panel-5:On"]
    );
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Sub);
    assert!(!fx.policy.is_transitioning());
}

#[test_log::test]
fn it_should_coalesce_a_burst_into_the_last_requested_mode() {
    let fx = two_panel(true);
    fx.policy.send_sensor_result(FoldStatus::Expanded);
    fx.policy.send_sensor_result(FoldStatus::Folded);
    fx.policy.send_sensor_result(FoldStatus::Expanded);
    fx.queue.pump();

    // The intermediate Sub request is overwritten in the cache; only the
    // first transition's two steps ever run.
    assert_eq!(fx.power.recorded(), vec!["panel-5:Off", "panel-0:On"]);
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Main);
}

#[test_log::test]
fn it_should_wake_a_sleeping_device_when_swapping_panels() {
    let fx = two_panel(false);
    fx.policy.send_sensor_result(FoldStatus::Folded);
    fx.queue.pump();
    assert_eq!(fx.power.recorded(), vec!["panel-0:Off", "wake"]);
}

#[test_log::test]
fn it_should_keep_a_folded_sleeping_device_asleep_on_split_domain() {
    let fx = split_domain(false);
    fx.policy.send_sensor_result(FoldStatus::Folded);
    fx.queue.pump();

    // The conditional power-on is skipped, yet the transition settles.
    assert_eq!(fx.power.recorded(), vec!["panel-0:Off"]);
    assert!(!fx.policy.is_transitioning());
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Main);
}

#[test_log::test]
fn it_should_wake_a_sleeping_device_when_expanding_a_split_domain() {
    let fx = split_domain(false);
    fx.policy.send_sensor_result(FoldStatus::Expanded);
    fx.queue.pump();
    assert_eq!(fx.power.recorded(), vec!["panel-9:Off", "wake"]);
}

#[test_log::test]
fn it_should_only_swap_geometry_on_a_split_domain_device() {
    let fx = split_domain(true);
    fx.policy.send_sensor_result(FoldStatus::Folded);
    fx.queue.pump();

    assert!(fx.scene.recorded().is_empty());
    let session = fx.registry.lookup(FULL_DOMAIN).unwrap();
    assert_eq!(session.geometry().bounds, MAIN_BOUNDS);

    fx.policy.send_sensor_result(FoldStatus::Expanded);
    fx.queue.pump();
    assert_eq!(session.geometry().bounds, FULL_BOUNDS);
}

#[test_log::test]
fn it_should_power_and_attach_both_panels_for_coordination() {
    let fx = two_panel_with_coordination(true);
    fx.policy
        .change_screen_display_mode(FoldDisplayMode::Coordination, DisplayModeChangeReason::Default);
    fx.queue.pump();

    assert_eq!(fx.power.recorded(), vec!["panel-0:On", "panel-5:On"]);
    assert!(fx.registry.lookup(PRIMARY).unwrap().is_attached());
    assert!(fx.registry.lookup(SECONDARY).unwrap().is_attached());
    assert_eq!(
        fx.policy.screen_display_mode(),
        FoldDisplayMode::Coordination
    );
}

#[test_log::test]
fn it_should_reject_coordination_on_unsupporting_devices() {
    let fx = two_panel(true);
    fx.policy
        .change_screen_display_mode(FoldDisplayMode::Coordination, DisplayModeChangeReason::Force);
    assert!(fx.queue.pending_labels().is_empty());
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Unknown);
}

#[test_log::test]
fn it_should_hold_coordination_through_a_half_fold() {
    let fx = two_panel_with_coordination(true);
    fx.policy
        .change_screen_display_mode(FoldDisplayMode::Coordination, DisplayModeChangeReason::Default);
    fx.queue.pump();
    let calls = fx.power.recorded().len();

    fx.policy.send_sensor_result(FoldStatus::HalfFolded);
    assert_eq!(fx.power.recorded().len(), calls);
    assert_eq!(
        fx.policy.screen_display_mode(),
        FoldDisplayMode::Coordination
    );

    // Folding fully does leave coordination.
    fx.policy.send_sensor_result(FoldStatus::Folded);
    fx.queue.pump();
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Sub);
}

#[test_log::test]
fn it_should_exit_coordination_into_the_fold_status_mode() {
    let fx = two_panel_with_coordination(true);
    fx.policy
        .change_screen_display_mode(FoldDisplayMode::Coordination, DisplayModeChangeReason::Default);
    fx.queue.pump();
    fx.policy.send_sensor_result(FoldStatus::HalfFolded);

    fx.policy.exit_coordination();
    fx.queue.pump();

    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Main);
    assert_eq!(fx.registry.last_notified_mode(), FoldDisplayMode::Main);
    assert!(!fx.registry.lookup(SECONDARY).unwrap().is_attached());
    assert!(!fx.policy.is_transitioning());
    assert!(fx
        .power
        .recorded()
        .contains(&"panel-5:Off".to_string()));
}

#[test_log::test]
fn it_should_apply_geometry_without_power_io_during_boot_animation() {
    let fx = two_panel(true);
    fx.policy.set_on_boot_animation(true);
    fx.policy
        .change_screen_display_mode(FoldDisplayMode::Main, DisplayModeChangeReason::Force);

    assert!(fx.power.recorded().is_empty());
    assert!(fx.queue.pending_labels().is_empty());
    assert!(!fx.policy.is_transitioning());
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Main);
    assert!(fx.registry.lookup(PRIMARY).unwrap().is_attached());
}

#[test_log::test]
fn it_should_run_one_recovery_transition_after_boot_animation() {
    let fx = two_panel(true);
    fx.policy.set_on_boot_animation(true);
    fx.policy.send_sensor_result(FoldStatus::Folded);
    assert!(fx.power.recorded().is_empty());

    fx.policy.set_on_boot_animation(false);
    fx.queue.pump();

    // Hardware catches up with the mode applied cosmetically during boot.
    assert_eq!(fx.power.recorded(), vec!["panel-0:Off", "panel-5:On"]);
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Sub);
}

#[test_log::test]
fn it_should_recover_toward_a_fold_status_set_during_boot() {
    let fx = two_panel(true);
    fx.policy.set_on_boot_animation(true);
    fx.policy.set_fold_status(FoldStatus::Expanded);

    fx.policy.set_on_boot_animation(false);
    fx.queue.pump();
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Main);
    assert_eq!(fx.power.recorded(), vec!["panel-5:Off", "panel-0:On"]);
}

#[test_log::test]
fn it_should_reject_coordination_during_boot_animation() {
    let fx = two_panel_with_coordination(true);
    fx.policy.set_on_boot_animation(true);
    fx.policy
        .change_screen_display_mode(FoldDisplayMode::Coordination, DisplayModeChangeReason::Force);
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Unknown);
}

#[test_log::test]
fn it_should_rederive_the_mode_on_physical_property_changes() {
    let fx = two_panel(true);
    fx.policy.set_fold_status(FoldStatus::Folded);
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Unknown);

    fx.policy.update_for_phy_screen_property_change();
    fx.queue.pump();
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Sub);
}

#[test_log::test]
fn it_should_expose_the_static_crease_region() {
    let fx = two_panel(true);
    let region = fx.policy.current_fold_crease_region();
    assert_eq!(region.panel, PRIMARY);
    assert_eq!(region.rects, vec![Rect::new(0, 1256, 1136, 184)]);
}

#[test_log::test]
fn it_should_report_an_empty_live_crease_on_the_sub_panel() {
    let fx = two_panel(true);
    fx.policy.send_sensor_result(FoldStatus::Folded);
    fx.queue.pump();
    assert!(fx.policy.live_crease_region().is_empty());
}

#[test_log::test]
fn it_should_report_the_calibrated_live_crease_in_portrait_main() {
    let fx = two_panel(true);
    fx.policy.send_sensor_result(FoldStatus::Expanded);
    fx.queue.pump();

    // The primary panel is taller than wide, so the profile lands portrait.
    let region = fx.policy.live_crease_region();
    assert_eq!(region.rects, vec![Rect::new(0, 1256, 1136, 184)]);
}

#[test_log::test]
fn it_should_limit_the_split_domain_crease_to_full_mode() {
    let fx = split_domain(true);
    fx.policy.send_sensor_result(FoldStatus::Folded);
    fx.queue.pump();
    assert!(fx.policy.live_crease_region().is_empty());

    fx.policy.send_sensor_result(FoldStatus::Expanded);
    fx.queue.pump();
    assert!(!fx.policy.live_crease_region().is_empty());
}

#[test_log::test]
fn it_should_degrade_crease_queries_on_bad_calibration() {
    let config = FoldPolicyConfig {
        crease_calibration: "not-a-rect".to_string(),
        ..FoldPolicyConfig::default()
    };
    let fx = fixture(Topology::two_panel(PRIMARY, SECONDARY), config, true);
    assert!(fx.policy.current_fold_crease_region().is_empty());
    fx.policy.send_sensor_result(FoldStatus::Expanded);
    fx.queue.pump();
    assert!(fx.policy.live_crease_region().is_empty());
}

#[test_log::test]
fn it_should_serialize_power_io_under_a_concurrent_sensor_storm() {
    /// Tracks how many threads are inside a power call at once.
    struct OverlapTrackingPower {
        in_call: AtomicU32,
        max_concurrent: AtomicU32,
        calls: AtomicU32,
    }

    impl OverlapTrackingPower {
        fn track(&self) {
            let depth = self.in_call.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(depth, Ordering::SeqCst);
            // Holds the call open long enough for overlap to be observable.
            std::thread::sleep(Duration::from_millis(2));
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.in_call.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl PowerController for OverlapTrackingPower {
        fn is_panel_powered_on(&self) -> bool {
            true
        }

        fn wake_device(&self) {
            self.track();
        }

        fn set_panel_power(&self, _panel: PanelId, _state: ScreenPowerState) {
            self.track();
        }
    }

    let power = Arc::new(OverlapTrackingPower {
        in_call: AtomicU32::new(0),
        max_concurrent: AtomicU32::new(0),
        calls: AtomicU32::new(0),
    });
    let registry = Arc::new(PanelRegistry::new());
    let scene = Arc::new(RecordingSceneGraph::default());
    register(&registry, &scene, PRIMARY, PRIMARY_BOUNDS);
    register(&registry, &scene, SECONDARY, SECONDARY_BOUNDS);
    let policy = FoldDisplayPolicy::new(
        Topology::two_panel(PRIMARY, SECONDARY),
        &FoldPolicyConfig::default(),
        Arc::clone(&registry) as Arc<dyn SessionRegistry>,
        Arc::clone(&power) as Arc<dyn PowerController>,
        Arc::new(NoopTelemetry),
    )
    .unwrap();

    let mut workers = Vec::new();
    for t in 0..8u64 {
        let policy = policy.clone();
        workers.push(std::thread::spawn(move || {
            for i in 0..50u64 {
                let status = if (t + i) % 2 == 0 {
                    FoldStatus::Expanded
                } else {
                    FoldStatus::Folded
                };
                policy.send_sensor_result(status);
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    // The cache stops moving once the senders are done; the replay chain
    // then settles toward the last cached mode.
    let deadline = Instant::now() + Duration::from_secs(5);
    while policy.is_transitioning() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }

    assert!(!policy.is_transitioning());
    assert_eq!(power.max_concurrent.load(Ordering::SeqCst), 1);
    // 400 requests coalesce into far fewer two-step transitions.
    assert!(power.calls.load(Ordering::SeqCst) < 400);
    assert!(matches!(
        policy.screen_display_mode(),
        FoldDisplayMode::Main | FoldDisplayMode::Sub
    ));
}

#[test_log::test]
fn it_should_emit_telemetry_only_for_accepted_transitions() {
    let telemetry = Arc::new(RecordingTelemetry::default());
    let fx = fixture_with_telemetry(
        Topology::two_panel(PRIMARY, SECONDARY),
        FoldPolicyConfig::default(),
        true,
        Arc::clone(&telemetry) as Arc<dyn Telemetry>,
    );
    fx.policy.send_sensor_result(FoldStatus::Folded);
    fx.queue.pump();

    assert_eq!(
        *telemetry.events.lock().unwrap(),
        [
            TelemetryEvent::DisplayModeChanged {
                mode: FoldDisplayMode::Sub
            },
            TelemetryEvent::FoldTransitionBegin {
                off_panel: PRIMARY,
                on_panel: SECONDARY
            },
        ]
    );

    // A same-mode rejection emits nothing further.
    fx.policy.send_sensor_result(FoldStatus::Folded);
    assert_eq!(telemetry.events.lock().unwrap().len(), 2);
}

#[test_log::test]
fn it_should_claim_the_gate_once_until_the_transition_settles() {
    let gate = TransitionGate::new();
    assert!(gate.try_begin().is_some());
    assert!(gate.try_begin().is_none());

    gate.add_step();
    assert!(!gate.complete_step());
    assert!(gate.complete_step());
    assert!(!gate.is_running());
    assert!(gate.try_begin().is_some());
}

#[test_log::test]
fn it_should_reclaim_a_wedged_transition_after_the_watchdog_timeout() {
    let gate = TransitionGate::new();
    let wedged = gate.try_begin().unwrap();
    gate.lock_timing().started_at = Some(Instant::now() - (MODE_CHANGE_TIMEOUT * 2));

    assert!(!gate.is_running());
    let reclaimed = gate.try_begin().unwrap();
    assert!(gate.is_running());
    // The reclaim starts a new generation so leftover steps are filtered.
    assert_eq!(reclaimed, wedged + 1);
    assert_eq!(gate.current_generation(), reclaimed);
}

#[test_log::test]
fn it_should_ignore_stale_completions() {
    let gate = TransitionGate::new();
    assert!(!gate.complete_step());
    assert!(gate.try_begin().is_some());
    assert!(gate.complete_step());
    assert!(!gate.complete_step());
}

#[test_log::test]
fn it_should_drop_leftover_steps_from_a_reclaimed_transition() {
    let fx = two_panel(true);
    fx.policy.send_sensor_result(FoldStatus::Expanded);
    assert!(fx.policy.is_transitioning());

    // The worker never reports back; age the transition past the watchdog
    // so the next request reclaims the gate with the old tasks still queued.
    fx.policy.inner.gate.lock_timing().started_at =
        Some(Instant::now() - (MODE_CHANGE_TIMEOUT * 2));
    fx.policy.send_sensor_result(FoldStatus::Folded);
    assert_eq!(fx.queue.pending_labels().len(), 4);

    // Completions of the displaced transition's two steps must not settle
    // the reclaimed one.
    assert!(fx.queue.pump_next());
    assert!(fx.queue.pump_next());
    assert!(fx.policy.is_transitioning());

    fx.queue.pump();
    assert!(!fx.policy.is_transitioning());
    assert_eq!(fx.policy.screen_display_mode(), FoldDisplayMode::Sub);
    assert_eq!(fx.policy.active_panel(), SECONDARY);
}
