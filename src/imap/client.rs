// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::imap::error::ImapError;
use crate::imap::session::{AsyncImapOps, AsyncImapSessionWrapper, IdleOutcome};

/// Facade over a live session capability, generic over the trait so tests can
/// substitute a fake session (spec §4.1, "IMAP Client Capability").
#[derive(Debug)]
pub struct ImapClient<T: AsyncImapOps> {
    inner: Arc<T>,
}

// Manual impl: `derive(Clone)` would add a spurious `T: Clone` bound even
// though only the `Arc` is ever cloned.
impl<T: AsyncImapOps> Clone for ImapClient<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: AsyncImapOps> ImapClient<T> {
    pub fn new(inner: T) -> Self {
        Self { inner: Arc::new(inner) }
    }

    pub fn from_arc(inner: Arc<T>) -> Self {
        Self { inner }
    }

    pub async fn list_folders(&self) -> Result<Vec<String>, ImapError> {
        self.inner.list_folders().await
    }

    pub async fn examine(&self, name: &str) -> Result<(), ImapError> {
        self.inner.examine(name).await
    }

    pub async fn status_uid_validity(&self, folder: &str) -> Result<String, ImapError> {
        self.inner.status_uid_validity(folder).await
    }

    pub async fn uid_search(&self, criteria: &str) -> Result<Vec<u32>, ImapError> {
        self.inner.uid_search(criteria).await
    }

    pub async fn idle(&self, timeout: Duration, stop: &Notify) -> Result<IdleOutcome, ImapError> {
        self.inner.idle(timeout, stop).await
    }

    pub async fn logout(&self) -> Result<(), ImapError> {
        self.inner.logout().await
    }

    pub async fn disconnect(&self) -> Result<(), ImapError> {
        self.inner.disconnect().await
    }
}

impl ImapClient<AsyncImapSessionWrapper> {
    /// Connects and authenticates with username/password LOGIN.
    pub async fn connect(
        server: &str,
        port: u16,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, ImapError> {
        let session = AsyncImapSessionWrapper::connect(server, port, username, password, timeout).await?;
        Ok(Self::new(session))
    }

    /// Connects and authenticates via XOAUTH2.
    pub async fn connect_with_xoauth2(
        server: &str,
        port: u16,
        username: &str,
        access_token: &str,
        timeout: Duration,
    ) -> Result<Self, ImapError> {
        let session =
            AsyncImapSessionWrapper::connect_with_xoauth2(server, port, username, access_token, timeout)
                .await?;
        Ok(Self::new(session))
    }
}
