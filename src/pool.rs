// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, warn};
use thiserror::Error;
use tokio::sync::{oneshot, Notify, Semaphore};

use crate::user::UserId;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("user {0} already has a job running")]
    AlreadyRunning(UserId),
    #[error("scheduler bridge is shutting down")]
    Closed,
}

/// A handle to a submitted job: `stop` requests cancellation, `done`
/// resolves once the job's task has returned (spec §4.2, "Worker-Pool
/// Scheduler Bridge").
pub struct JobHandle {
    pub stop: Arc<Notify>,
    pub done: oneshot::Receiver<()>,
}

struct Inner {
    semaphore: Semaphore,
    lanes: DashMap<UserId, Arc<Notify>>,
}

/// Bounds how many user sessions run concurrently and serializes at most one
/// job per user at a time, replacing the source's thread-parked worker pool
/// with a channel-based request/response handoff (grounded on the teacher's
/// `connection_pool.rs`: `DashMap` bookkeeping plus a `Semaphore` cap, here
/// re-architected around `tokio::spawn` tasks rather than pooled
/// connections).
#[derive(Clone)]
pub struct SchedulerBridge {
    inner: Arc<Inner>,
}

impl SchedulerBridge {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                semaphore: Semaphore::new(max_concurrent),
                lanes: DashMap::new(),
            }),
        }
    }

    /// Submits `task` to run under a bounded permit. Rejects a second
    /// submission for a user that already has one in flight. `task` receives
    /// a stop signal it should select against cooperatively.
    pub fn submit<F, Fut>(&self, user_id: &UserId, task: F) -> Result<JobHandle, BridgeError>
    where
        F: FnOnce(Arc<Notify>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.inner.lanes.contains_key(user_id) {
            return Err(BridgeError::AlreadyRunning(user_id.clone()));
        }

        let stop = Arc::new(Notify::new());
        self.inner.lanes.insert(user_id.clone(), stop.clone());

        let (done_tx, done_rx) = oneshot::channel();
        let inner = self.inner.clone();
        let task_stop = stop.clone();
        let user_id = user_id.clone();

        tokio::spawn(async move {
            let permit = match inner.semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("scheduler bridge semaphore closed before user {} could run", user_id);
                    inner.lanes.remove(&user_id);
                    let _ = done_tx.send(());
                    return;
                }
            };
            debug!("user {} acquired a scheduler bridge permit", user_id);
            task(task_stop).await;
            drop(permit);
            inner.lanes.remove(&user_id);
            let _ = done_tx.send(());
        });

        Ok(JobHandle { stop, done: done_rx })
    }

    /// Signals the running job for `user_id` to stop, if one exists.
    pub fn stop_user(&self, user_id: &UserId) {
        if let Some(stop) = self.inner.lanes.get(user_id) {
            stop.notify_one();
        }
    }

    pub fn is_running(&self, user_id: &UserId) -> bool {
        self.inner.lanes.contains_key(user_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.lanes.len()
    }
}

impl std::fmt::Debug for SchedulerBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerBridge")
            .field("active", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn rejects_duplicate_submission_for_same_user() {
        let bridge = SchedulerBridge::new(2);
        let user = UserId("1".to_string());
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();

        let _handle = bridge
            .submit(&user, move |stop: Arc<Notify>| async move {
                stop.notified().await;
                ran_clone.store(true, Ordering::SeqCst);
            })
            .expect("first submission should succeed");

        let second = bridge.submit(&user, |_stop| async {});
        assert!(matches!(second, Err(BridgeError::AlreadyRunning(_))));

        bridge.stop_user(&user);
    }

    #[tokio::test]
    async fn job_completes_and_frees_its_lane() {
        let bridge = SchedulerBridge::new(1);
        let user = UserId("42".to_string());

        let handle = bridge.submit(&user, |_stop| async {}).unwrap();
        handle.done.await.unwrap();

        assert!(!bridge.is_running(&user));
    }
}
