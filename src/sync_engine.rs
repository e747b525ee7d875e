// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::Notify;

use crate::imap::{AsyncImapOps, IdleOutcome, ImapClient, ImapError, UnsolicitedKind};
use crate::process_uid::ProcessUid;
use crate::user::UserId;

/// UIDs are searched for in batches of exactly this size (spec §4.4).
const UID_BATCH_SIZE: u32 = 100;

/// A fresh account with no cursor resyncs from this many days back (spec
/// §4.4) rather than from the start of the mailbox.
const DATE_LOOKBACK_DAYS: i64 = 2;

/// An account whose cursor is older than this is treated as stalled and
/// jumpstarted with a fresh by-date search rather than trusted (spec §4.4).
const STALL_THRESHOLD_HOURS: i64 = 24;

/// Why `wait_for_email` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    NewMail,
    Disconnected,
    TimedOut,
    Stopped,
}

/// Drives UID discovery and IDLE for one selected folder (spec §4.4, "UID
/// Sync Engine"). Generic over the session trait so tests can substitute a
/// fake.
pub struct SyncEngine<T: AsyncImapOps> {
    client: ImapClient<T>,
    process_uid: Arc<dyn ProcessUid>,
}

impl<T: AsyncImapOps> SyncEngine<T> {
    pub fn new(client: ImapClient<T>, process_uid: Arc<dyn ProcessUid>) -> Self {
        Self { client, process_uid }
    }

    /// Resyncs by walking UID ranges of `UID_BATCH_SIZE` starting just past
    /// `last_uid`, continuing until a short batch signals the end. Returns
    /// the highest UID observed, if any.
    pub async fn sync_by_uid(
        &self,
        folder: &str,
        user_id: &UserId,
        last_uid: u32,
    ) -> Result<Option<u32>, ImapError> {
        let mut lo = last_uid.saturating_add(1);
        let mut highest_seen: Option<u32> = None;

        loop {
            let hi = lo.saturating_add(UID_BATCH_SIZE - 1);
            let criteria = format!("UID {}:{}", lo, hi);
            let uids = self.client.uid_search(&criteria).await?;
            let batch_len = uids.len() as u32;

            for uid in &uids {
                self.process_uid.process_uid(user_id, folder, *uid).await;
                highest_seen = Some(highest_seen.map_or(*uid, |h| h.max(*uid)));
            }

            if batch_len < UID_BATCH_SIZE {
                break;
            }
            lo = hi.saturating_add(1);
        }

        Ok(highest_seen)
    }

    /// Resyncs by SINCE date, used when there is no UID cursor to resume
    /// from (new account, or a rotated UIDVALIDITY).
    pub async fn sync_by_date(
        &self,
        folder: &str,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>, ImapError> {
        let since = now - chrono::Duration::days(DATE_LOOKBACK_DAYS);
        let criteria = format!("SINCE {}", since.format("%d-%b-%Y"));
        let uids = self.client.uid_search(&criteria).await?;
        let mut highest_seen: Option<u32> = None;

        for uid in uids {
            self.process_uid.process_uid(user_id, folder, uid).await;
            highest_seen = Some(highest_seen.map_or(uid, |h| h.max(uid)));
        }

        Ok(highest_seen)
    }

    /// True if the cursor is missing or old enough that it should be
    /// distrusted in favor of a fresh by-date resync.
    pub fn needs_jumpstart(last_email_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_email_at {
            None => true,
            Some(t) => now - t > chrono::Duration::hours(STALL_THRESHOLD_HOURS),
        }
    }

    /// Idles until new mail arrives, the server says goodbye, the timeout
    /// elapses, or the caller's stop signal fires.
    pub async fn wait_for_email(&self, idle_timeout: Duration, stop: &Notify) -> Result<WakeReason, ImapError> {
        let outcome = self.client.idle(idle_timeout, stop).await?;
        let reason = match outcome {
            IdleOutcome::NewData(UnsolicitedKind::Exists(n)) => {
                debug!("idle observed EXISTS({})", n);
                WakeReason::NewMail
            }
            IdleOutcome::NewData(UnsolicitedKind::Bye) => WakeReason::Disconnected,
            IdleOutcome::NewData(UnsolicitedKind::Other) => WakeReason::TimedOut,
            IdleOutcome::Timeout => WakeReason::TimedOut,
            IdleOutcome::Interrupted => WakeReason::Stopped,
        };
        Ok(reason)
    }
}
