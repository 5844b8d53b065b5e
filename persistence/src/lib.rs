// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Persistence module.
//!
//! Journals of persistent messages, the processors that recover from them and the channels
//! that deliver them with confirmation. Journals are built on the key-value collections of
//! a [`DbManager`](database::DbManager); an in-memory backend is provided.
//!

pub mod channel;
pub mod database;
pub mod error;
pub mod journal;
pub mod memory;
pub mod message;
pub mod processor;

pub use channel::Channel;
pub use database::{Collection, DbManager};
pub use error::Error;
pub use journal::{
    AsyncConfirm, AsyncReplay, AsyncWriteJournal, CollectionJournal, Journal,
    JournalActor, JournalCommand, JournalHandle,
};
pub use memory::{MemoryManager, MemoryStore};
pub use message::{ConfirmRecord, Payload, PersistenceFailure, PersistentMessage};
pub use processor::Processor;
