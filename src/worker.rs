// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use thiserror::Error;
use tokio::sync::{watch, Notify};

use crate::backoff;
use crate::config::WorkerConfig;
use crate::imap::{AsyncImapOps, AsyncImapSessionWrapper, ImapClient, ImapError};
use crate::process_uid::ProcessUid;
use crate::sync_engine::{SyncEngine, WakeReason};
use crate::user::{AuthMethod, ProviderConfig, UserId};
use crate::user_store::{UserPatch, UserStore, UserStoreError};

/// Folders tried in order when selecting the mailbox to sync (spec §4.4,
/// "chooseFolder"). No match is a protocol error (Open Question resolved in
/// favor of failing loudly rather than silently falling back to `INBOX`).
const FOLDER_PREFERENCE: [&str; 3] = ["[Gmail]/All Mail", "[Google Mail]/All Mail", "INBOX"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Delaying,
    Connecting,
    Authenticating,
    SelectingFolder,
    ValidatingUid,
    Syncing,
    Idling,
    Stopped,
}

/// Top-level error classification the worker's caller branches on (spec §7).
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Imap(#[from] ImapError),
    #[error("no folder from the preference list exists on this account")]
    NoFolderMatch,
    #[error("server's UIDVALIDITY changed mid-session")]
    UidValidityContention,
    #[error("scheduler bridge rejected this job: {0}")]
    BridgeFailure(String),
    #[error(transparent)]
    Store(#[from] UserStoreError),
}

/// Notified of dispatch-table membership changes. Kept separate from the
/// `SchedulerBridge`'s own per-job lanes: this only touches the daemon's
/// own bookkeeping, no DB or CPU work to rate-limit through the bridge
/// (spec §6).
pub trait DispatchNotifier: Send + Sync {
    fn notify_connect(&self, user_id: &UserId);
    fn notify_disconnect(&self, user_id: &UserId);
}

/// Produces a live, authenticated session for a user's provider config.
/// Abstracts over the TLS connect dance so the state machine can be driven
/// against a fake in tests.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    type Session: AsyncImapOps + 'static;

    async fn connect(
        &self,
        provider: &ProviderConfig,
        timeout: Duration,
    ) -> Result<ImapClient<Self::Session>, ImapError>;
}

/// Production connector: real TLS + LOGIN/XOAUTH2 (grounded on
/// `imap::client::ImapClient`'s `connect`/`connect_with_xoauth2`).
#[derive(Debug, Default, Clone)]
pub struct TlsSessionConnector;

#[async_trait]
impl SessionConnector for TlsSessionConnector {
    type Session = AsyncImapSessionWrapper;

    async fn connect(
        &self,
        provider: &ProviderConfig,
        timeout: Duration,
    ) -> Result<ImapClient<AsyncImapSessionWrapper>, ImapError> {
        match &provider.auth {
            AuthMethod::Password { username, password } => {
                ImapClient::connect(&provider.host, provider.port, username, password, timeout).await
            }
            AuthMethod::XOAuth2 { username, access_token } => {
                ImapClient::connect_with_xoauth2(&provider.host, provider.port, username, access_token, timeout)
                    .await
            }
        }
    }
}

/// Drops its session via LOGOUT + disconnect the instant the worker leaves
/// scope for any reason, crash or clean exit alike (spec §5: crash-only
/// teardown). Grounded on the teacher's `Drop`-based guards
/// (`connection_pool.rs`'s `SessionHandle`, `bin/sync.rs`'s `LockGuard`) but
/// adapted to spawn the async cleanup since `Drop` itself can't `.await`.
struct Teardown<T: AsyncImapOps + 'static> {
    client: Option<ImapClient<T>>,
    user_id: UserId,
    notifier: Arc<dyn DispatchNotifier>,
}

impl<T: AsyncImapOps + 'static> Drop for Teardown<T> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            tokio::spawn(async move {
                let _ = client.logout().await;
                let _ = client.disconnect().await;
            });
        }
        self.notifier.notify_disconnect(&self.user_id);
    }
}

/// The per-user state machine (spec §4.4, "User Worker State Machine"). One
/// `run()` call is a single crash-only attempt: delay, connect, authenticate,
/// select a folder, validate/establish UIDVALIDITY, then loop sync ⇄ idle
/// until stopped or a fatal error tears the session down.
pub struct UserWorker<C: SessionConnector> {
    user_id: UserId,
    connector: C,
    store: Arc<dyn UserStore>,
    process_uid: Arc<dyn ProcessUid>,
    config: WorkerConfig,
    state: watch::Sender<SessionState>,
    notifier: Arc<dyn DispatchNotifier>,
}

impl<C: SessionConnector> UserWorker<C> {
    pub fn new(
        user_id: UserId,
        connector: C,
        store: Arc<dyn UserStore>,
        process_uid: Arc<dyn ProcessUid>,
        config: WorkerConfig,
        notifier: Arc<dyn DispatchNotifier>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Delaying);
        Self { user_id, connector, store, process_uid, config, state, notifier }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, s: SessionState) {
        debug!("user {} entering state {:?}", self.user_id, s);
        let _ = self.state.send(s);
    }

    async fn choose_folder(&self, client: &ImapClient<C::Session>) -> Result<String, WorkerError> {
        let folders = client.list_folders().await?;
        FOLDER_PREFERENCE
            .iter()
            .find(|candidate| folders.iter().any(|f| f == *candidate))
            .map(|s| s.to_string())
            .ok_or(WorkerError::NoFolderMatch)
    }

    /// Runs a single crash-only attempt. `errors` is the caller's current
    /// consecutive-failure count, used for the leading backoff delay (spec
    /// §8). Returns `Ok(())` on a clean stop, `Err` on anything that should
    /// trigger teardown and a fresh respawn.
    pub async fn run(&self, stop: Arc<Notify>, errors: u32) -> Result<(), WorkerError> {
        self.set_state(SessionState::Delaying);
        if !backoff::delay_start(errors, &stop).await {
            self.set_state(SessionState::Stopped);
            return Ok(());
        }

        let user = self.store.reload(&self.user_id).await?;
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);

        self.set_state(SessionState::Connecting);
        let client = self.connector.connect(&user.provider, timeout).await?;
        let teardown = Teardown {
            client: Some(client.clone()),
            user_id: self.user_id.clone(),
            notifier: self.notifier.clone(),
        };

        self.set_state(SessionState::Authenticating);
        self.notifier.notify_connect(&self.user_id);
        self.store
            .update(&self.user_id, UserPatch { last_login_at: Some(Utc::now()), ..Default::default() })
            .await?;

        self.set_state(SessionState::SelectingFolder);
        let folder = self.choose_folder(&client).await?;
        client.examine(&folder).await?;

        self.set_state(SessionState::ValidatingUid);
        let uid_validity = client.status_uid_validity(&folder).await?;
        let mut last_uid = user.last_uid;
        if let Some(expected) = &user.last_uid_validity {
            if *expected != uid_validity {
                info!(
                    "uidvalidity rotated for user {}: {} -> {}, dropping cursor",
                    self.user_id, expected, uid_validity
                );
                last_uid = None;
            }
        }

        let engine = SyncEngine::new(client.clone(), self.process_uid.clone());
        let now = Utc::now();
        let jumpstart = SyncEngine::<C::Session>::needs_jumpstart(user.last_email_at, now);

        self.set_state(SessionState::Syncing);
        let highest = if last_uid.is_none() || jumpstart {
            engine.sync_by_date(&folder, &self.user_id, now).await?
        } else {
            engine.sync_by_uid(&folder, &self.user_id, last_uid.unwrap()).await?
        };

        let mut cursor = highest.or(last_uid);
        self.store
            .update(
                &self.user_id,
                UserPatch {
                    last_uid: cursor,
                    last_uid_validity: Some(uid_validity.clone()),
                    last_email_at: Some(now),
                },
            )
            .await?;

        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);
        loop {
            self.set_state(SessionState::Idling);
            match engine.wait_for_email(idle_timeout, &stop).await? {
                WakeReason::Stopped => break,
                WakeReason::Disconnected => {
                    return Err(WorkerError::Imap(ImapError::Connection(
                        "server sent BYE while idling".to_string(),
                    )))
                }
                WakeReason::TimedOut => continue,
                WakeReason::NewMail => {
                    self.set_state(SessionState::Syncing);

                    // Reload through the store rather than re-querying IMAP:
                    // this is the cluster-race guard (another worker may have
                    // already rewritten `last_uid_validity` for this user),
                    // not a check for a server-side rotation.
                    let reloaded = self.store.reload(&self.user_id).await?;
                    if reloaded.last_uid_validity.as_deref() != Some(uid_validity.as_str()) {
                        return Err(WorkerError::UidValidityContention);
                    }

                    let now = Utc::now();
                    let jumpstart = SyncEngine::<C::Session>::needs_jumpstart(reloaded.last_email_at, now);
                    let seen = match cursor {
                        Some(uid) if !jumpstart => engine.sync_by_uid(&folder, &self.user_id, uid).await?,
                        _ => engine.sync_by_date(&folder, &self.user_id, now).await?,
                    };

                    if let Some(uid) = seen {
                        cursor = Some(cursor.map_or(uid, |c| c.max(uid)));
                        self.store
                            .update(
                                &self.user_id,
                                UserPatch {
                                    last_uid: cursor,
                                    last_uid_validity: Some(uid_validity.clone()),
                                    last_email_at: Some(now),
                                },
                            )
                            .await?;
                    }
                }
            }
        }

        self.set_state(SessionState::Stopped);
        // `teardown` drops here, spawning the LOGOUT + disconnect regardless
        // of whether the loop above exited cleanly or via `?`.
        drop(teardown);
        Ok(())
    }
}
