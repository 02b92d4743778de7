//! Lease-arbitrated periodic loops: one for alert evaluation, one for
//! notification dispatch.
//!
//! The SQL lease is the sole arbiter of who may run a loop across process
//! replicas. Missed ticks coalesce; tick errors are logged and the loop
//! continues; shutdown releases owned leases best-effort.

use std::time::Duration;

use pfd_alerts::AUDIT_ACTOR_SCHEDULER;
use pfd_db::alerts::{acquire_scheduler_lease, release_scheduler_lease, scheduler_lease_base_name};
use pfd_notify::HttpWebhookSender;
use pfd_schemas::now_utc;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64, min_value: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or(default)
        .max(min_value)
}

/// Env-derived scheduler configuration (recognised options only).
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub auto_start: bool,
    pub interval_seconds: u64,
    pub notifications_enabled: bool,
    pub notifications_interval_seconds: u64,
    pub dispatch_batch_size: i64,
    pub lease_enabled: bool,
    pub lease_name: String,
}

impl SchedulerSettings {
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool("PREFLIGHT_ALERTS_SCHEDULER_ENABLED", true),
            auto_start: env_bool("PREFLIGHT_ALERTS_SCHEDULER_AUTO_START", true),
            interval_seconds: env_u64("PREFLIGHT_ALERTS_SCHEDULER_INTERVAL_SECONDS", 60, 1),
            notifications_enabled: env_bool("PREFLIGHT_NOTIFICATIONS_SCHEDULER_ENABLED", true),
            notifications_interval_seconds: env_u64(
                "PREFLIGHT_NOTIFICATIONS_INTERVAL_SECONDS",
                30,
                1,
            ),
            dispatch_batch_size: env_u64("PREFLIGHT_NOTIFICATIONS_DISPATCH_BATCH_SIZE", 50, 1)
                as i64,
            lease_enabled: env_bool("PREFLIGHT_ALERTS_SCHEDULER_LEASE_ENABLED", true),
            lease_name: scheduler_lease_base_name(),
        }
    }

    fn alerts_lease(&self) -> String {
        format!("{}:alerts", self.lease_name)
    }

    fn notifications_lease(&self) -> String {
        format!("{}:notifications", self.lease_name)
    }

    /// TTL is at least twice the interval and never under 30s, so a healthy
    /// holder always renews before expiry.
    fn lease_ttl_seconds(interval_seconds: u64) -> i64 {
        (interval_seconds.saturating_mul(2)).max(30) as i64
    }
}

fn default_owner_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    let suffix = &pfd_schemas::hex_id()[..8];
    format!("{host}:{}:{suffix}", std::process::id())
}

pub struct Scheduler {
    settings: SchedulerSettings,
    owner_id: String,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            settings,
            owner_id: default_owner_id(),
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Spawn the loops. Returns false (and spawns nothing) when disabled.
    pub fn start(&mut self, pool: PgPool) -> bool {
        if self.is_running() {
            return true;
        }
        if !self.settings.enabled {
            info!("preflight alerts scheduler disabled (PREFLIGHT_ALERTS_SCHEDULER_ENABLED=0)");
            return false;
        }
        if !self.settings.auto_start {
            info!("preflight alerts scheduler auto-start disabled (PREFLIGHT_ALERTS_SCHEDULER_AUTO_START=0)");
            return false;
        }

        let settings = self.settings.clone();
        let owner_id = self.owner_id.clone();
        let rx = self.shutdown_tx.subscribe();
        self.tasks
            .push(tokio::spawn(alerts_loop(pool.clone(), settings.clone(), owner_id.clone(), rx)));

        if settings.notifications_enabled {
            let rx = self.shutdown_tx.subscribe();
            self.tasks
                .push(tokio::spawn(notifications_loop(pool, settings, owner_id, rx)));
        }

        info!(
            interval_seconds = self.settings.interval_seconds,
            notifications_enabled = self.settings.notifications_enabled,
            notifications_interval_seconds = self.settings.notifications_interval_seconds,
            lease_enabled = self.settings.lease_enabled,
            lease_name = %self.settings.lease_name,
            owner_id = %self.owner_id,
            "preflight alerts scheduler started"
        );
        true
    }

    /// Stop both loops and release owned leases best-effort.
    pub async fn shutdown(mut self, pool: &PgPool) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        if self.settings.lease_enabled {
            let released_at = now_utc();
            for lease_name in [
                self.settings.alerts_lease(),
                self.settings.notifications_lease(),
            ] {
                if let Err(err) =
                    release_scheduler_lease(pool, &lease_name, &self.owner_id, released_at).await
                {
                    warn!(lease_name = %lease_name, error = %err, "failed to release scheduler lease");
                }
            }
        }

        info!(owner_id = %self.owner_id, "preflight alerts scheduler stopped");
    }
}

async fn try_acquire_lease(
    pool: &PgPool,
    settings: &SchedulerSettings,
    lease_name: &str,
    owner_id: &str,
    interval_seconds: u64,
) -> bool {
    if !settings.lease_enabled {
        return true;
    }
    let ttl = SchedulerSettings::lease_ttl_seconds(interval_seconds);
    match acquire_scheduler_lease(pool, lease_name, owner_id, ttl, now_utc()).await {
        Ok(owned) => owned,
        Err(err) => {
            warn!(lease_name, error = %err, "scheduler lease check failed");
            false
        }
    }
}

async fn alerts_loop(
    pool: PgPool,
    settings: SchedulerSettings,
    owner_id: String,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(settings.interval_seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
                continue;
            }
        }

        let lease_name = settings.alerts_lease();
        if !try_acquire_lease(&pool, &settings, &lease_name, &owner_id, settings.interval_seconds)
            .await
        {
            debug!(lease_name = %lease_name, owner_id = %owner_id, "alerts tick skipped (lease not acquired)");
            continue;
        }

        let document = match pfd_config::load_alert_policies(None) {
            Ok(document) => document,
            Err(err) => {
                warn!(error = %err, "alert policies unavailable; evaluation tick skipped");
                continue;
            }
        };
        let channels = pfd_config::safe_load_channels(None);

        match pfd_alerts::evaluate_policies(
            &pool,
            &document,
            &channels,
            now_utc(),
            AUDIT_ACTOR_SCHEDULER,
        )
        .await
        {
            Ok(summary) => info!(
                evaluated_at = %summary.evaluated_at,
                total_policies = summary.total_policies,
                active_count = summary.active_count,
                "preflight alerts scheduler tick completed"
            ),
            Err(err) => warn!(error = %err, "preflight alerts scheduler tick failed"),
        }
    }
}

async fn notifications_loop(
    pool: PgPool,
    settings: SchedulerSettings,
    owner_id: String,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let sender = HttpWebhookSender::new();
    let mut ticker =
        tokio::time::interval(Duration::from_secs(settings.notifications_interval_seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
                continue;
            }
        }

        let lease_name = settings.notifications_lease();
        if !try_acquire_lease(
            &pool,
            &settings,
            &lease_name,
            &owner_id,
            settings.notifications_interval_seconds,
        )
        .await
        {
            debug!(lease_name = %lease_name, owner_id = %owner_id, "notifications tick skipped (lease not acquired)");
            continue;
        }

        let channels = pfd_config::safe_load_channels(None);
        match pfd_notify::dispatch_due(
            &pool,
            &channels,
            &sender,
            settings.dispatch_batch_size,
            now_utc(),
            AUDIT_ACTOR_SCHEDULER,
        )
        .await
        {
            Ok(summary) => info!(
                processed = summary.processed_count,
                sent = summary.sent_count,
                retrying = summary.retrying_count,
                dead = summary.dead_count,
                "preflight notifications scheduler tick completed"
            ),
            Err(err) => warn!(error = %err, "preflight notifications scheduler tick failed"),
        }
    }
}
