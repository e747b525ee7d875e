// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use async_trait::async_trait;

use crate::user::UserId;

/// Opaque collaborator the sync engine hands newly discovered UIDs to (spec
/// §1: treated as an external capability, out of scope for this worker).
/// Fetching, parsing, and storing the message itself lives on the other side
/// of this boundary.
#[async_trait]
pub trait ProcessUid: Send + Sync {
    async fn process_uid(&self, user_id: &UserId, folder: &str, uid: u32);
}

/// No-op collaborator useful for tests and for running the daemon with sync
/// discovery only, no downstream processing wired up yet.
#[derive(Debug, Default)]
pub struct NoopProcessUid;

#[async_trait]
impl ProcessUid for NoopProcessUid {
    async fn process_uid(&self, _user_id: &UserId, _folder: &str, _uid: u32) {}
}
