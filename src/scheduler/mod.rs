// src/scheduler/mod.rs

//! Serializing power-task queue.
//!
//! Panel power I/O is the only operation in the fold core that may take real
//! wall-clock time, so it never runs inline: the policy submits typed
//! [`PowerTask`] messages and a single worker executes them in submission
//! order. Completions flow back through [`TransitionObserver`], which is how
//! the policy's pending-transition gate is decremented.
//!
//! The worker owns the power and registry handles; nothing submitted to the
//! queue captures policy state.

use crate::power::PowerController;
use crate::registry::SessionRegistry;
use crate::types::{PanelId, PowerChangeReason, ScreenPowerState};
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};


/// One hardware power operation of a mode transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerStep {
    /// Power a panel (or power sub-domain) off.
    PanelOff { panel: PanelId },
    /// Power a panel on; wakes the whole device instead when it was asleep
    /// at submission time.
    PanelOn { panel: PanelId, wake_if_asleep: bool },
    /// Power a panel on only if the device is awake when the step runs;
    /// otherwise the step completes without touching hardware.
    PanelOnIfAwake { panel: PanelId },
}

impl PowerStep {
    /// The panel this step targets.
    pub fn panel(self) -> PanelId {
        match self {
            PowerStep::PanelOff { panel }
            | PowerStep::PanelOn { panel, .. }
            | PowerStep::PanelOnIfAwake { panel } => panel,
        }
    }
}

/// A labeled power step queued by the policy.
///
/// `gated` steps report completion to the transition observer and count
/// against the pending-transition gate; ungated steps (coordination exit)
/// run to the same ordering guarantees but do not. `generation` tags the
/// transition that submitted the step; completions echo it so a transition
/// reclaimed by the watchdog can ignore steps left over from the one it
/// displaced. Ungated steps carry generation 0.
#[derive(Debug, Clone, Copy)]
pub struct PowerTask {
    pub label: &'static str,
    pub step: PowerStep,
    pub gated: bool,
    pub generation: u64,
}

/// Receives gated step completions, on the worker thread.
pub trait TransitionObserver: Send + Sync {
    fn power_step_done(&self, step: PowerStep, generation: u64);
}

/// FIFO, fire-and-forget task queue contract consumed by the policy.
pub trait PowerTaskQueue: Send + Sync {
    fn submit(&self, task: PowerTask);
}

/// Executes one task against the hardware, records the outcome on the
/// session, and reports completion when the task is gated.
///
/// Shared between the worker thread and the hand-pumped test queue so both
/// apply identical semantics.
pub fn execute_power_task(
    task: &PowerTask,
    power: &Arc<dyn PowerController>,
    registry: &Arc<dyn SessionRegistry>,
    observer: &Arc<dyn TransitionObserver>,
) {
    debug!("PowerTask: executing {} ({:?})", task.label, task.step);
    match task.step {
        PowerStep::PanelOff { panel } => {
            power.set_panel_power(panel, ScreenPowerState::Off);
            record_power(registry, panel, ScreenPowerState::Off);
        }
        PowerStep::PanelOn {
            panel,
            wake_if_asleep,
        } => {
            if wake_if_asleep {
                power.wake_device();
            } else {
                power.set_panel_power(panel, ScreenPowerState::On);
            }
            record_power(registry, panel, ScreenPowerState::On);
        }
        PowerStep::PanelOnIfAwake { panel } => {
            if power.is_panel_powered_on() {
                power.set_panel_power(panel, ScreenPowerState::On);
                record_power(registry, panel, ScreenPowerState::On);
            } else {
                debug!("PowerTask: {} skipped, device asleep", task.label);
            }
        }
    }
    if task.gated {
        observer.power_step_done(task.step, task.generation);
    }
}

fn record_power(registry: &Arc<dyn SessionRegistry>, panel: PanelId, state: ScreenPowerState) {
    match registry.lookup(panel) {
        Some(session) => session.set_power_state(state, PowerChangeReason::DisplaySwitch),
        None => warn!("PowerTask: no session for {}, outcome not recorded", panel),
    }
}

/// Single-worker FIFO queue backed by a dedicated thread.
pub struct PowerSequencer {
    task_tx: Option<Sender<PowerTask>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PowerSequencer {
    /// Spawns the worker. The worker owns the collaborator handles and
    /// reports gated completions through `observer`.
    pub fn spawn(
        power: Arc<dyn PowerController>,
        registry: Arc<dyn SessionRegistry>,
        observer: Arc<dyn TransitionObserver>,
    ) -> Result<Self> {
        let (task_tx, task_rx) = channel::<PowerTask>();
        let thread_handle = thread::Builder::new()
            .name("screen-power".to_string())
            .spawn(move || {
                info!("PowerSequencer: worker started");
                while let Ok(task) = task_rx.recv() {
                    execute_power_task(&task, &power, &registry, &observer);
                }
                debug!("PowerSequencer: channel closed, worker exiting");
            })
            .context("Failed to spawn power sequencer thread")?;

        Ok(Self {
            task_tx: Some(task_tx),
            thread_handle: Some(thread_handle),
        })
    }
}

impl PowerTaskQueue for PowerSequencer {
    fn submit(&self, task: PowerTask) {
        debug!("PowerSequencer: submit {}", task.label);
        let delivered = self
            .task_tx
            .as_ref()
            .map(|tx| tx.send(task).is_ok())
            .unwrap_or(false);
        if !delivered {
            error!("PowerSequencer: worker gone, dropping {}", task.label);
        }
    }
}

impl Drop for PowerSequencer {
    fn drop(&mut self) {
        // Close the channel first so the worker drains and exits.
        self.task_tx.take();
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                error!("PowerSequencer: worker thread panicked: {:?}", e);
            }
        }
    }
}
