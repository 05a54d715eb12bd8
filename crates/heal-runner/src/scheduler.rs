use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use heal_core::{plan_baseline, BaselineDecision, BaselinePolicy, HealError, SchedulerState, Tag, TickOutcome};
use heal_repo::{CaptureService, SnapshotCatalog};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::lifecycle::Lifecycle;

/// Periodically promotes the current state of the data directory to a
/// `baseline` snapshot, subject to the configured policy.
pub struct BaselineScheduler {
    catalog: SnapshotCatalog,
    capture: CaptureService,
    source: PathBuf,
    policy: BaselinePolicy,
    state: Mutex<SchedulerState>,
}

impl BaselineScheduler {
    pub fn new(catalog: SnapshotCatalog, capture: CaptureService, source: PathBuf, policy: BaselinePolicy) -> Self {
        Self { catalog, capture, source, policy, state: Mutex::new(SchedulerState::Idle) }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, s: SchedulerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = s;
    }

    /// One Idle -> Checking -> (Creating | Idle) pass. Always ends Idle.
    pub fn tick(&self) -> Result<TickOutcome, HealError> {
        self.set_state(SchedulerState::Checking);
        let result = self.check_and_create();
        self.set_state(SchedulerState::Idle);
        result
    }

    fn check_and_create(&self) -> Result<TickOutcome, HealError> {
        let existing = self.catalog.baselines()?.len();
        match plan_baseline(self.policy, existing) {
            BaselineDecision::Skip => {
                debug!(existing, "baseline already present; skipping");
                Ok(TickOutcome::Skipped { existing })
            }
            BaselineDecision::Create => {
                self.set_state(SchedulerState::Creating);
                let snapshot = self.capture.capture(&self.source, Tag::Baseline)?;
                Ok(TickOutcome::Created(snapshot))
            }
        }
    }
}

/// Runs `scheduler.tick()` every `every` until the lifecycle stops.
///
/// Ticks never overlap: the next interval is only awaited once the previous
/// capture has returned.
pub fn spawn_scheduler(scheduler: Arc<BaselineScheduler>, every: Duration, lifecycle: &mut Lifecycle) {
    let mut stop = lifecycle.signal();
    lifecycle.spawn("baseline-scheduler", async move {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                _ = tick.tick() => {}
            }
            let s = scheduler.clone();
            match tokio::task::spawn_blocking(move || s.tick()).await {
                Ok(Ok(TickOutcome::Created(snap))) => info!(snapshot = snap.id.short(), "baseline created"),
                Ok(Ok(TickOutcome::Skipped { .. })) => {}
                Ok(Err(HealError::AuthenticationFailed(msg))) => {
                    error!("baseline scheduler stopping: {msg}");
                    break;
                }
                Ok(Err(e)) => warn!("baseline tick error: {e:?}"),
                Err(e) => warn!("baseline tick panicked: {e:?}"),
            }
        }
        info!("baseline scheduler stopped");
    });
}
