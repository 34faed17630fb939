//! Periodic maintenance jobs.
//!
//! One scheduler task per job, all spawned onto the server's tracked pool.
//! Work only happens while this node holds cluster leadership: a leader
//! listener flips the shared `active` flag, the next tick observes it, and
//! an iteration already past its leadership check runs to completion. The
//! first tick of every schedule is one full period after startup so a
//! restart never storms the database.

mod cleanup;
mod diagnostics;
mod warn_metrics;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info, warn};

use crate::error::AppResult;
use crate::model::now_millis;
use crate::server::{App, Server};
use crate::telemetry::spans;

pub const SECURITY_CHECK_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);
pub const TOKEN_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const COMMAND_WEBHOOK_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const PLUGIN_KV_EXPIRY_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
pub const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
pub const LICENSE_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
pub const WARN_METRIC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const HOUR_MILLIS: i64 = 60 * 60 * 1000;

/// Diagnostics cadence by server age: every ten minutes for the first
/// hour, hourly until twelve hours, daily from then on.
fn diagnostics_period(age_millis: i64) -> Duration {
    if age_millis < HOUR_MILLIS {
        Duration::from_secs(10 * 60)
    } else if age_millis < 12 * HOUR_MILLIS {
        Duration::from_secs(60 * 60)
    } else {
        Duration::from_secs(24 * 60 * 60)
    }
}

/// Owns the scheduler tasks and the leadership gate.
pub struct JobServer {
    srv: Arc<Server>,
    active: Arc<AtomicBool>,
    leader_listener_id: Mutex<Option<String>>,
}

impl JobServer {
    /// Spawns every scheduler and hooks leadership changes. With
    /// `jobs.run_jobs` off this node never schedules anything.
    pub fn start(srv: Arc<Server>) -> Arc<Self> {
        let jobs = Arc::new(Self {
            active: Arc::new(AtomicBool::new(srv.is_leader())),
            leader_listener_id: Mutex::new(None),
            srv,
        });

        if !jobs.srv.config().get().jobs.run_jobs {
            info!("periodic jobs disabled on this node");
            return jobs;
        }

        let listener_active = Arc::clone(&jobs.active);
        let listener_srv = Arc::downgrade(&jobs.srv);
        let id = jobs.srv.add_leader_listener(Box::new(move || {
            let Some(srv) = listener_srv.upgrade() else {
                return;
            };
            let leader = srv.is_leader();
            listener_active.store(leader, Ordering::SeqCst);
            info!(scheduling = leader, "job schedulers follow leadership");
        }));
        *jobs.leader_listener_id.lock() = Some(id);

        jobs.spawn_recurring("security_check", SECURITY_CHECK_INTERVAL, |app| async move {
            diagnostics::do_security_check(&app).await
        });
        jobs.spawn_recurring("token_cleanup", TOKEN_CLEANUP_INTERVAL, |app| async move {
            cleanup::cleanup_tokens(&app).await
        });
        jobs.spawn_recurring(
            "command_webhook_cleanup",
            COMMAND_WEBHOOK_CLEANUP_INTERVAL,
            |app| async move { cleanup::cleanup_command_webhooks(&app).await },
        );
        jobs.spawn_recurring("plugin_kv_expiry", PLUGIN_KV_EXPIRY_INTERVAL, |app| async move {
            cleanup::cleanup_plugin_kv(&app).await
        });
        jobs.spawn_recurring("session_cleanup", SESSION_CLEANUP_INTERVAL, |app| async move {
            cleanup::cleanup_sessions(&app).await
        });
        jobs.spawn_recurring("license_check", LICENSE_CHECK_INTERVAL, |app| async move {
            diagnostics::check_license_expiration(&app).await
        });
        jobs.spawn_recurring("warn_metrics", WARN_METRIC_INTERVAL, |app| async move {
            warn_metrics::evaluate_warn_metrics(&app).await
        });
        jobs.spawn_diagnostics();

        info!("job schedulers started");
        jobs
    }

    /// Unhooks the leadership listener. The scheduler tasks themselves end
    /// with the server's shutdown signal.
    pub fn stop(&self) {
        if let Some(id) = self.leader_listener_id.lock().take() {
            self.srv.remove_leader_listener(&id);
        }
    }

    fn scheduling(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn spawn_recurring<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, job: F)
    where
        F: Fn(App) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send,
    {
        let jobs = Arc::clone(self);
        let shutdown = self.srv.shutdown_signal();
        self.srv.go(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if !jobs.scheduling() {
                    debug!(job = name, "skipped; not the scheduling leader");
                    continue;
                }
                jobs.run_one(name, &job).await;
            }
            debug!(job = name, "scheduler stopped");
        });
    }

    /// Diagnostics reschedules itself each pass; the period depends on how
    /// old the installation is at that moment.
    fn spawn_diagnostics(self: &Arc<Self>) {
        let jobs = Arc::clone(self);
        let shutdown = self.srv.shutdown_signal();
        self.srv.go(async move {
            loop {
                let age = now_millis() - jobs.srv.first_run_at();
                let period = diagnostics_period(age);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
                if !jobs.scheduling() {
                    debug!(job = "diagnostics", "skipped; not the scheduling leader");
                    continue;
                }
                jobs.run_one("diagnostics", &|app: App| async move {
                    diagnostics::send_diagnostics(&app).await
                })
                .await;
            }
            debug!(job = "diagnostics", "scheduler stopped");
        });
    }

    async fn run_one<F, Fut>(&self, name: &'static str, job: &F)
    where
        F: Fn(App) -> Fut,
        Fut: Future<Output = AppResult<()>>,
    {
        let app = App::new(Arc::clone(&self.srv));
        let result = job(app).instrument(spans::job(name)).await;
        crate::metrics::record_job_run(name, result.is_ok());
        match result {
            Ok(()) => debug!(job = name, "job finished"),
            Err(err) => warn!(job = name, error = %err, "job failed"),
        }
    }
}
