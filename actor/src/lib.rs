// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Steadfast Actor System
//!
//! A supervised actor runtime on top of tokio. Actors live in a tree: every actor is
//! supervised by the actor that created it, and top level actors by the guardian of the
//! system. When an actor fails, it suspends and asks its supervisor what to do:
//!
//! - **Resume**: keep the instance and its state, continue with the next message.
//! - **Restart**: replace the instance with a fresh one from its [`Props`], keeping the
//!   mailbox. Children are restarted too unless the actor keeps them
//!   ([`ChildrenOnRestart::Keep`]).
//! - **Stop**: terminate the actor and all its descendants.
//! - **Escalate**: fail the supervisor with the same error.
//!
//! The decision is taken by the [`SupervisionStrategy`] of the supervisor, which also bounds
//! the number of failures of each child within a time window. A child exceeding the bound is
//! stopped.
//!
//! Any actor may watch any other through its [`ActorHandle`] and receives exactly one
//! [`Handler::on_terminated`] call per watch when the target terminates.
//!
//! ## Getting Started
//!
//! ```ignore
//! use actor::*;
//! use tokio_util::sync::CancellationToken;
//!
//! let (system, mut runner) = ActorSystem::create(CancellationToken::new());
//! let counter = system.create_root_actor("counter", Counter::default()).await?;
//! counter.tell(CounterMessage::Increment(1)).await?;
//! tokio::spawn(async move { runner.run().await });
//! ```
//!
//! ## Errors
//!
//! Every error returned from a handler or a lifecycle hook is a failure, except
//! [`Error::Functional`], which only travels back to the caller of `ask`.
//!

// Private modules containing the implementation
mod actor;
mod error;
mod handler;
mod path;
mod runner;
mod supervision;
mod system;

//
// Core Actor System Types
//

/// The fundamental actor trait defining actor behavior and lifecycle hooks.
///
/// Besides the hooks, an actor declares the [`SupervisionStrategy`] it applies to its
/// children and what happens to them when it is restarted.
pub use actor::Actor;

/// Execution context providing system services and actor lifecycle management.
///
/// The context survives restarts. It gives access to the system, the children of the actor
/// and its watches.
pub use actor::ActorContext;

/// Untyped identity of an actor, used to watch it and to wait for its termination.
pub use actor::ActorHandle;

/// Lifecycle states of an actor.
pub use actor::ActorLifecycle;

/// A reference to an actor that enables message sending and actor interaction.
///
/// `ActorRef` supports both fire-and-forget (`tell`) and request-response (`ask`)
/// messaging. A reference stays valid across restarts of the actor.
pub use actor::ActorRef;

/// Trait for handling the messages of an actor.
pub use actor::Handler;

/// Trait implemented by all messages that can be sent to actors.
pub use actor::Message;

/// Factory of actor instances.
pub use actor::Props;

/// Trait implemented by all responses of actors.
pub use actor::Response;

/// Error type of the actor system.
pub use error::Error;

/// Hierarchical actor paths.
pub use path::ActorPath;

//
// Supervision
//

pub use supervision::{
    ChildrenOnRestart, Decider, Directive, FailureCounter, StrategyEngine,
    SupervisionStrategy, default_decider,
};

//
// Actor System
//

/// Entry point to create an actor system.
pub use system::ActorSystem;

/// Handle to the actor system, cheap to clone.
pub use system::SystemRef;

/// Waits until the actor system is stopped.
pub use system::SystemRunner;
