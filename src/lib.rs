//! Per-user IMAP synchronization worker.
//!
//! A crash-only state machine that owns one authenticated IMAP session per
//! user, advances a UID cursor, and hands off newly discovered UIDs to an
//! opaque [`process_uid::ProcessUid`] collaborator.

pub mod backoff;
pub mod config;
pub mod daemon;
pub mod imap;
pub mod pool;
pub mod process_uid;
pub mod sync_engine;
pub mod user;
pub mod user_store;
pub mod worker;

pub mod prelude {
    pub use crate::config::{DaemonConfig, WorkerConfig};
    pub use crate::daemon::Daemon;
    pub use crate::imap::{client::ImapClient, error::ImapError, session::AsyncImapSessionWrapper};
    pub use crate::pool::{BridgeError, SchedulerBridge};
    pub use crate::user::{AuthMethod, ProviderConfig, User, UserId};
    pub use crate::user_store::UserStore;
    pub use crate::worker::{UserWorker, WorkerError};

    pub use log::{debug, error, info, trace, warn};
    pub use std::sync::Arc;
    pub use thiserror::Error;
}
