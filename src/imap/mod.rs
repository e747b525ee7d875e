// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Public Interface for the IMAP module

pub mod client;
pub mod error;
pub mod session;
pub mod xoauth2;

pub use client::ImapClient;
pub use error::ImapError;
pub use session::{AsyncImapOps, AsyncImapSessionWrapper, IdleOutcome, UnsolicitedKind};
pub use xoauth2::XOAuth2Authenticator;
