// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque handle identifying one synchronized mailbox account (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Credential the worker presents to the IMAP server (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthMethod {
    Password { username: String, password: String },
    XOAuth2 { username: String, access_token: String },
}

/// Connection parameters for the user's provider (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub auth: AuthMethod,
}

/// The immutable record the worker holds for the lifetime of one session
/// (spec §3). `last_uid`/`last_uid_validity`/`last_email_at` are the cursor
/// the sync engine advances; `UserStore::update` persists changes made to a
/// fresh copy, and `UserStore::reload` hands the worker the refreshed record
/// for the next loop iteration rather than mutating this one in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub provider: ProviderConfig,
    pub last_uid: Option<u32>,
    pub last_uid_validity: Option<String>,
    pub last_email_at: Option<DateTime<Utc>>,
    pub last_login_at: DateTime<Utc>,
}
