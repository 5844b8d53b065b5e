// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Core library for the Steadfast framework.
//! Supervised actors that recover from failures, and the journals of persistent messages
//! that let them rebuild their state.

pub use actor::{
    Actor, ActorContext, ActorHandle, ActorLifecycle, ActorPath, ActorRef,
    ActorSystem, ChildrenOnRestart, Decider, Directive, Error as ActorError,
    FailureCounter, Handler, Message, Props, Response, StrategyEngine,
    SupervisionStrategy, SystemRef, SystemRunner, default_decider,
};

pub use persistence::{
    AsyncConfirm, AsyncReplay, AsyncWriteJournal, Channel, Collection,
    CollectionJournal, ConfirmRecord, DbManager, Error as StoreError, Journal,
    JournalActor, JournalCommand, JournalHandle, MemoryManager, MemoryStore,
    Payload, PersistenceFailure, PersistentMessage, Processor,
};
