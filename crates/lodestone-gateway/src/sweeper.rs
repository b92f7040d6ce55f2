//! Periodic idle sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use lodestone_control::ControlPlane;

/// Spawn a task that runs `timeout_sweep` every `period`.
///
/// The first sweep runs immediately so that records left inconsistent by a
/// restart are repaired without waiting a full period. A sweep that overruns
/// its period delays the next one instead of stacking up.
pub fn spawn_sweeper<C>(control: Arc<C>, period: Duration) -> JoinHandle<()>
where
    C: ControlPlane + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match control.timeout_sweep().await {
                Ok(report) if report.skipped => {
                    tracing::trace!("No servers armed, sweep skipped");
                }
                Ok(report) => {
                    tracing::info!(
                        checked = report.checked,
                        active = report.active,
                        stopped = report.stopped.len(),
                        healed = report.healed.len(),
                        reconciled = report.reconciled.len(),
                        failed = report.failed,
                        "Sweep complete"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Sweep failed");
                }
            }
        }
    })
}
