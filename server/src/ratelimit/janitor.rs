//! Background eviction of idle keys.

use std::time::{Duration, Instant};

use crate::ratelimit::AdmissionController;

/// Start the periodic idle-key sweep.
///
/// This spawns a tokio task that runs every `every`. The first tick is consumed
/// immediately so no sweep runs during startup. Sweeps run one at a time; an
/// overlapping call is skipped by the controller.
///
/// The returned `JoinHandle` should be stored alongside other background
/// task handles in `main`.
pub fn spawn_janitor(
    controller: AdmissionController,
    every: Duration,
    idle_horizon: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // consume immediate first tick
        loop {
            interval.tick().await;
            run_sweep(&controller, idle_horizon);
        }
    })
}

#[tracing::instrument(skip(controller))]
fn run_sweep(controller: &AdmissionController, idle_horizon: Duration) {
    let start = Instant::now();
    let Some(evicted) = controller.evict_idle(start, idle_horizon) else {
        return;
    };
    tracing::info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        evicted,
        remaining = controller.tracked_keys(),
        "Idle key sweep completed"
    );
}
