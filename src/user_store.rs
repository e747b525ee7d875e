// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::user::{AuthMethod, ProviderConfig, User, UserId};

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("user {0} not found")]
    NotFound(UserId),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Fields the sync engine is allowed to persist back between sessions
/// (spec §3): the UID cursor, the UIDVALIDITY it was taken under, the last
/// time a sync completed, and the last successful authenticate.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub last_uid: Option<u32>,
    pub last_uid_validity: Option<String>,
    pub last_email_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Narrow persistence capability the worker depends on (spec §3): reload the
/// record before each loop iteration, persist a patch after each sync pass.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn reload(&self, id: &UserId) -> Result<User, UserStoreError>;
    async fn update(&self, id: &UserId, patch: UserPatch) -> Result<(), UserStoreError>;
    async fn list_active_users(&self) -> Result<Vec<UserId>, UserStoreError>;
}

/// `UserStore` backed by the same SQLite pool the daemon persists its own
/// bookkeeping in, in the query style of `bin/sync.rs`'s `AccountRow`
/// lookups.
#[derive(Debug, Clone)]
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn reload(&self, id: &UserId) -> Result<User, UserStoreError> {
        let row = sqlx::query(
            "SELECT id, email, host, port, use_tls, auth_kind, username, secret, \
             last_uid, last_uid_validity, last_email_at, last_login_at \
             FROM users WHERE id = ? AND active = 1",
        )
        .bind(id.0.clone())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| UserStoreError::NotFound(id.clone()))?;

        let auth_kind: String = row.try_get("auth_kind")?;
        let username: String = row.try_get("username")?;
        let secret: String = row.try_get("secret")?;
        let auth = match auth_kind.as_str() {
            "xoauth2" => AuthMethod::XOAuth2 { username, access_token: secret },
            _ => AuthMethod::Password { username, password: secret },
        };

        Ok(User {
            id: id.clone(),
            email: row.try_get("email")?,
            provider: ProviderConfig {
                host: row.try_get("host")?,
                port: row.try_get::<i64, _>("port")? as u16,
                use_tls: row.try_get::<i64, _>("use_tls")? != 0,
                auth,
            },
            last_uid: row.try_get::<Option<i64>, _>("last_uid")?.map(|v| v as u32),
            last_uid_validity: row.try_get("last_uid_validity")?,
            last_email_at: row.try_get("last_email_at")?,
            last_login_at: row.try_get("last_login_at")?,
        })
    }

    async fn update(&self, id: &UserId, patch: UserPatch) -> Result<(), UserStoreError> {
        sqlx::query(
            "UPDATE users SET \
                last_uid = COALESCE(?, last_uid), \
                last_uid_validity = COALESCE(?, last_uid_validity), \
                last_email_at = COALESCE(?, last_email_at), \
                last_login_at = COALESCE(?, last_login_at) \
             WHERE id = ?",
        )
        .bind(patch.last_uid.map(|v| v as i64))
        .bind(patch.last_uid_validity)
        .bind(patch.last_email_at)
        .bind(patch.last_login_at)
        .bind(id.0.clone())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_active_users(&self) -> Result<Vec<UserId>, UserStoreError> {
        let rows = sqlx::query("SELECT id FROM users WHERE active = 1")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| UserId(r.get("id"))).collect())
    }
}
