// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Persistence errors
//!
//! Storage backends report [`Error::Get`], [`Error::EntryNotFound`] and [`Error::Store`];
//! journals add [`Error::Codec`] for entries that can not be encoded or decoded and
//! [`Error::Journal`] for everything else. A failed replay surfaces as one of these.
//!
//! Store errors are converted into actor errors when they reach an actor:
//!
//! ```ignore
//! let actor_result: Result<(), actor::Error> = store_result
//!     .map_err(|e| actor::Error::Store(e.to_string()));
//! ```
//!

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq)]
pub enum Error {
    #[error("Can't create store: {0}")]
    CreateStore(String),

    #[error("Get error: {0}")]
    Get(String),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Journal error: {0}")]
    Journal(String),
}

impl From<Error> for actor::Error {
    fn from(error: Error) -> Self {
        actor::Error::Store(error.to_string())
    }
}
