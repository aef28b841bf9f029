// libs/appointment-cell/src/services/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use shared_config::AppConfig;

use crate::services::reconciliation::ReconciliationService;

/// Recurring trigger for the reconciliation sweep. One sweep runs at startup,
/// then one per configured interval for the lifetime of the handle.
///
/// Ticks fire independently: a tick does not wait for the previous sweep to
/// finish, so two sweeps can overlap. That is safe because each candidate's
/// cancellation is a conditional atomic update; the second sweep just finds
/// nothing left to do.
pub struct SweepScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweepScheduler {
    pub fn start(config: Arc<AppConfig>) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let interval_seconds = config.sweep_interval_seconds.max(1);

        let handle = tokio::spawn(async move {
            let service = Arc::new(ReconciliationService::new(&config));
            let mut ticker = interval(Duration::from_secs(interval_seconds));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!("Sweep scheduler started, interval {}s", interval_seconds);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let service = Arc::clone(&service);
                        tokio::spawn(async move {
                            // Errors stay inside the tick; the timer must
                            // outlive any single failed cycle
                            if let Err(e) = service.run_once().await {
                                error!("Sweep cycle failed: {}", e);
                            }
                        });
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Sweep scheduler stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal the scheduler to stop after the current tick.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop and wait for the scheduler task to finish.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.handle.await;
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
