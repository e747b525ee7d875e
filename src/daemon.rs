// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, error, info};
use tokio::sync::Notify;

use crate::config::{DaemonConfig, WorkerConfig};
use crate::imap::ImapError;
use crate::pool::{BridgeError, JobHandle, SchedulerBridge};
use crate::process_uid::ProcessUid;
use crate::user::UserId;
use crate::user_store::UserStore;
use crate::worker::{DispatchNotifier, TlsSessionConnector, UserWorker, WorkerError};

fn classify(err: &WorkerError) -> &'static str {
    match err {
        WorkerError::Imap(imap_err) if imap_err.is_auth() => "auth_error",
        WorkerError::Imap(imap_err) if imap_err.is_timeout() => "timeout",
        WorkerError::Imap(ImapError::Tls(_)) => "tls_error",
        WorkerError::Imap(ImapError::Connection(_)) => "connection_error",
        WorkerError::Imap(ImapError::Io(_)) => "io_error",
        WorkerError::Imap(ImapError::Protocol(_)) => "protocol_error",
        WorkerError::NoFolderMatch => "no_folder_match",
        WorkerError::UidValidityContention => "uidvalidity_contention",
        WorkerError::BridgeFailure(_) => "bridge_failure",
        WorkerError::Store(_) => "store_error",
    }
}

/// Owns the pool of running per-user workers (spec §4.4, "Daemon"): spawns a
/// respawn-on-crash loop per user bounded by the `SchedulerBridge`, tracks
/// consecutive errors for the backoff policy, and counts errors by class for
/// observability (suppressed under `stress_test_mode`).
pub struct Daemon {
    bridge: SchedulerBridge,
    store: Arc<dyn UserStore>,
    process_uid: Arc<dyn ProcessUid>,
    worker_config: WorkerConfig,
    stress_test_mode: bool,
    error_counts: DashMap<UserId, AtomicU32>,
    error_metrics: DashMap<&'static str, AtomicU64>,
    dispatch: DashMap<UserId, ()>,
}

impl Daemon {
    pub fn new(
        config: &DaemonConfig,
        worker_config: WorkerConfig,
        store: Arc<dyn UserStore>,
        process_uid: Arc<dyn ProcessUid>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bridge: SchedulerBridge::new(config.pool_workers),
            store,
            process_uid,
            worker_config,
            stress_test_mode: config.stress_test_mode,
            error_counts: DashMap::new(),
            error_metrics: DashMap::new(),
            dispatch: DashMap::new(),
        })
    }

    pub fn error_count(&self, id: &UserId) -> u32 {
        self.error_counts.get(id).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    fn increment_error_count(&self, id: &UserId) {
        self.error_counts
            .entry(id.clone())
            .or_insert_with(|| AtomicU32::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn reset_error_count(&self, id: &UserId) {
        if let Some(counter) = self.error_counts.get(id) {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn record_error_metric(&self, class: &'static str) {
        if self.stress_test_mode {
            return;
        }
        self.error_metrics
            .entry(class)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn error_metric_count(&self, class: &str) -> u64 {
        self.error_metrics.get(class).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    pub fn is_running(&self, id: &UserId) -> bool {
        self.bridge.is_running(id)
    }

    /// Requests a cooperative stop for `id`'s worker; teardown happens via
    /// the worker's own `Drop` guard once it observes the signal.
    pub fn stop_user(&self, id: &UserId) {
        self.bridge.stop_user(id);
    }

    /// Removes `id` from the dispatch table. Distinct from `stop_user`: this
    /// only touches the daemon's own bookkeeping, not the bridge's per-job
    /// lanes, so it can't interfere with a subsequent respawn's backoff wait.
    pub fn disconnect_user(&self, id: &UserId) {
        self.dispatch.remove(id);
    }

    /// Spawns the respawn-on-crash loop for `user_id`: each failed `run()`
    /// bumps the error count (driving the next attempt's backoff delay) and
    /// a per-class metric; a clean stop resets the count and exits. Per-class
    /// disposition follows spec §7: a contention stop is silent and doesn't
    /// touch the backoff counter, an auth failure is logged at info without
    /// a metric, and everything else gets the full error-log-plus-metric
    /// treatment.
    pub fn spawn_worker(self: &Arc<Self>, user_id: UserId) -> Result<JobHandle, BridgeError> {
        let daemon = self.clone();
        self.bridge.submit(&user_id.clone(), move |stop: Arc<Notify>| async move {
            let worker = UserWorker::new(
                user_id.clone(),
                TlsSessionConnector,
                daemon.store.clone(),
                daemon.process_uid.clone(),
                daemon.worker_config.clone(),
                daemon.clone(),
            );

            loop {
                let errors = daemon.error_count(&user_id);
                match worker.run(stop.clone(), errors).await {
                    Ok(()) => {
                        daemon.reset_error_count(&user_id);
                        break;
                    }
                    Err(WorkerError::UidValidityContention) => {
                        debug!("user {} stopped after a uidvalidity contention", user_id);
                        break;
                    }
                    Err(WorkerError::Imap(ref imap_err)) if imap_err.is_auth() => {
                        info!("user {} failed to authenticate: {}", user_id, imap_err);
                        daemon.increment_error_count(&user_id);
                    }
                    Err(e) => {
                        let class = classify(&e);
                        error!("user {} worker failed ({}): {}", user_id, class, e);
                        daemon.record_error_metric(class);
                        daemon.increment_error_count(&user_id);
                    }
                }
            }
        })
    }
}

impl DispatchNotifier for Daemon {
    fn notify_connect(&self, user_id: &UserId) {
        self.dispatch.insert(user_id.clone(), ());
    }

    fn notify_disconnect(&self, user_id: &UserId) {
        self.disconnect_user(user_id);
    }
}
