// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::TryStreamExt;
use log::info;

use async_imap::extensions::idle::IdleResponse;
use async_imap::types::UnsolicitedResponse;

use tokio::net::TcpStream as TokioTcpStream;
use tokio::sync::{Mutex as TokioMutex, Notify};
use tokio_native_tls::{native_tls, TlsConnector};
use tokio_util::compat::TokioAsyncReadCompatExt;

use crate::imap::error::ImapError;
use crate::imap::xoauth2::XOAuth2Authenticator;

pub type TlsCompatibleStream = tokio_util::compat::Compat<tokio_native_tls::TlsStream<TokioTcpStream>>;
pub type TlsImapSession = async_imap::Session<TlsCompatibleStream>;

/// Classification of an unsolicited response seen while idling, narrowed to
/// the two kinds the sync engine branches on (spec §4.4, Design Note in §9:
/// exit IDLE on `BYE` in addition to `EXISTS`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsolicitedKind {
    Exists(u32),
    Bye,
    Other,
}

fn classify(resp: &UnsolicitedResponse) -> UnsolicitedKind {
    match resp {
        UnsolicitedResponse::Exists(n) => UnsolicitedKind::Exists(*n),
        // Bye's payload shape has changed across async-imap releases; match
        // on the variant tag rather than destructuring fields we can't see.
        other if format!("{:?}", other).starts_with("Bye") => UnsolicitedKind::Bye,
        _ => UnsolicitedKind::Other,
    }
}

/// Outcome of one `idle()` call (spec §4.1, redesigned per Design Note in §9
/// from the source's callback-based `idle(handler)` into a value the sync
/// engine matches on directly).
#[derive(Debug, Clone)]
pub enum IdleOutcome {
    NewData(UnsolicitedKind),
    Timeout,
    Interrupted,
}

/// Narrow capability set the worker needs from a live IMAP session (spec
/// §4.1): folder discovery, read-only selection, UIDVALIDITY, UID search,
/// IDLE, and a teardown pair that never fails.
#[async_trait]
pub trait AsyncImapOps: Send + Sync + Debug {
    async fn list_folders(&self) -> Result<Vec<String>, ImapError>;
    async fn examine(&self, name: &str) -> Result<(), ImapError>;
    async fn status_uid_validity(&self, folder: &str) -> Result<String, ImapError>;
    async fn uid_search(&self, criteria: &str) -> Result<Vec<u32>, ImapError>;
    async fn idle(&self, timeout: Duration, stop: &Notify) -> Result<IdleOutcome, ImapError>;
    async fn logout(&self) -> Result<(), ImapError>;
    async fn disconnect(&self) -> Result<(), ImapError>;
}

/// Wraps a live `async_imap::Session` behind a mutex so the worker's single
/// task can drive it from async contexts that need `&self`. The session is
/// held as `Option` so `idle()` can take it by value (required by
/// `Session::idle`) and hand it back via `IdleHandle::done()`.
#[derive(Debug, Clone)]
pub struct AsyncImapSessionWrapper {
    session: Arc<TokioMutex<Option<TlsImapSession>>>,
}

impl AsyncImapSessionWrapper {
    fn wrapping(session: TlsImapSession) -> Self {
        Self {
            session: Arc::new(TokioMutex::new(Some(session))),
        }
    }

    /// Connects and authenticates with username/password LOGIN.
    pub async fn connect(
        server: &str,
        port: u16,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, ImapError> {
        let tls_stream = tokio::time::timeout(timeout, connect_tls(server, port))
            .await
            .map_err(|_| ImapError::Timeout("connect timed out".to_string()))??;

        info!("TLS connection established to {}:{}", server, port);

        let client = async_imap::Client::new(tls_stream.compat());
        let session = tokio::time::timeout(timeout, client.login(username, password))
            .await
            .map_err(|_| ImapError::Timeout("login timed out".to_string()))?
            .map_err(|(err, _client)| match err {
                async_imap::error::Error::No(msg) | async_imap::error::Error::Bad(msg) => {
                    ImapError::Auth(format!("login rejected: {}", msg))
                }
                other => ImapError::Auth(format!("login failed: {:?}", other)),
            })?;

        info!("IMAP login successful for {}", username);
        Ok(Self::wrapping(session))
    }

    /// Connects and authenticates via the XOAUTH2 SASL mechanism.
    pub async fn connect_with_xoauth2(
        server: &str,
        port: u16,
        username: &str,
        access_token: &str,
        timeout: Duration,
    ) -> Result<Self, ImapError> {
        let tls_stream = tokio::time::timeout(timeout, connect_tls(server, port))
            .await
            .map_err(|_| ImapError::Timeout("connect timed out".to_string()))??;

        info!("TLS connection established (XOAUTH2) to {}:{}", server, port);

        let client = async_imap::Client::new(tls_stream.compat());
        let authenticator = XOAuth2Authenticator::new(username, access_token);
        let session = tokio::time::timeout(timeout, client.authenticate("XOAUTH2", authenticator))
            .await
            .map_err(|_| ImapError::Timeout("xoauth2 authentication timed out".to_string()))?
            .map_err(|(err, _client)| ImapError::Auth(format!("xoauth2 auth failed: {:?}", err)))?;

        info!("IMAP XOAUTH2 authentication successful for {}", username);
        Ok(Self::wrapping(session))
    }
}

async fn connect_tls(
    server: &str,
    port: u16,
) -> Result<tokio_native_tls::TlsStream<TokioTcpStream>, ImapError> {
    let tcp_stream = TokioTcpStream::connect((server, port))
        .await
        .map_err(|e| ImapError::Connection(e.to_string()))?;
    tcp_stream
        .set_nodelay(true)
        .map_err(|e| ImapError::Connection(format!("failed to set TCP_NODELAY: {}", e)))?;

    let tls = native_tls::TlsConnector::builder()
        .build()
        .map_err(|e| ImapError::Tls(e.to_string()))?;
    let connector = TlsConnector::from(tls);
    connector
        .connect(server, tcp_stream)
        .await
        .map_err(|e| ImapError::Tls(e.to_string()))
}

#[async_trait]
impl AsyncImapOps for AsyncImapSessionWrapper {
    async fn list_folders(&self) -> Result<Vec<String>, ImapError> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| ImapError::Protocol("list called without an active session".into()))?;

        let mut stream = session.list(None, Some("*")).await.map_err(ImapError::from)?;
        let mut names = Vec::new();
        while let Some(item) = stream.try_next().await.map_err(ImapError::from)? {
            names.push(item.name().to_string());
        }
        Ok(names)
    }

    async fn examine(&self, name: &str) -> Result<(), ImapError> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| ImapError::Protocol("examine called without an active session".into()))?;
        session.examine(name).await.map(|_| ()).map_err(ImapError::from)
    }

    async fn status_uid_validity(&self, folder: &str) -> Result<String, ImapError> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| ImapError::Protocol("status called without an active session".into()))?;
        let mailbox = session
            .status(folder, "(UIDVALIDITY)")
            .await
            .map_err(ImapError::from)?;
        mailbox
            .uid_validity
            .map(|v| v.to_string())
            .ok_or_else(|| ImapError::Protocol("server did not return UIDVALIDITY".into()))
    }

    async fn uid_search(&self, criteria: &str) -> Result<Vec<u32>, ImapError> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| ImapError::Protocol("uid_search called without an active session".into()))?;
        let set = session.uid_search(criteria).await.map_err(ImapError::from)?;
        let mut uids: Vec<u32> = set.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn idle(&self, timeout: Duration, stop: &Notify) -> Result<IdleOutcome, ImapError> {
        let mut guard = self.session.lock().await;
        let session = guard
            .take()
            .ok_or_else(|| ImapError::Protocol("idle called without an active session".into()))?;

        let mut handle = session.idle();
        handle.init().await.map_err(ImapError::from)?;
        let (idle_wait, interrupt) = handle.wait_with_timeout(timeout);

        let outcome = tokio::select! {
            res = idle_wait => match res {
                Ok(IdleResponse::NewData(data)) => IdleOutcome::NewData(classify(&data)),
                Ok(IdleResponse::Timeout) => IdleOutcome::Timeout,
                Ok(IdleResponse::ManualInterrupt) => IdleOutcome::Interrupted,
                Err(e) => return Err(ImapError::from(e)),
            },
            _ = stop.notified() => {
                drop(interrupt);
                IdleOutcome::Interrupted
            }
        };

        let session = handle.done().await.map_err(ImapError::from)?;
        *guard = Some(session);
        Ok(outcome)
    }

    async fn logout(&self) -> Result<(), ImapError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_mut() {
            let _ = session.logout().await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ImapError> {
        let mut guard = self.session.lock().await;
        *guard = None;
        Ok(())
    }
}
