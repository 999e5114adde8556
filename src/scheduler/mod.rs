//! Periodic background jobs. Each job exposes a `tick` that can be invoked
//! directly; `spawn` drives them on their intervals until shutdown.

pub mod arrival;
pub mod eta;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::state::AppState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub examined: usize,
    pub updated: usize,
    pub notified: usize,
    pub failed: usize,
}

impl TickReport {
    fn merge(mut self, other: TickReport) -> Self {
        self.examined += other.examined;
        self.updated += other.updated;
        self.notified += other.notified;
        self.failed += other.failed;
        self
    }
}

pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signals every job and waits for in-flight ticks to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("schedulers stopped");
    }
}

pub fn spawn(state: Arc<AppState>) -> SchedulerHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let eta_period = Duration::from_secs(state.config.eta_interval_secs.max(1));
    let arrival_period = Duration::from_secs(state.config.arrival_interval_secs.max(1));

    let tasks = vec![
        tokio::spawn(run_every(
            "eta_recalculation",
            eta_period,
            shutdown_rx.clone(),
            state.clone(),
            |state| async move { eta::tick(&state, Utc::now()).await },
        )),
        tokio::spawn(run_every(
            "arrival_alerts",
            arrival_period,
            shutdown_rx,
            state,
            |state| async move { arrival::tick(&state, Utc::now()).await },
        )),
    ];

    SchedulerHandle { shutdown_tx, tasks }
}

async fn run_every<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    state: Arc<AppState>,
    tick: F,
) where
    F: Fn(Arc<AppState>) -> Fut,
    Fut: Future<Output = TickReport>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; start one full period after boot.
    interval.tick().await;

    info!(job = name, period_secs = period.as_secs(), "scheduler started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                let report = tick(state.clone()).await;
                info!(
                    job = name,
                    examined = report.examined,
                    updated = report.updated,
                    notified = report.notified,
                    failed = report.failed,
                    "scheduler tick finished"
                );
            }
        }
    }

    info!(job = name, "scheduler stopped");
}
