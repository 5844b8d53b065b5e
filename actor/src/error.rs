// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!
//! Every error an actor returns from a handler or a lifecycle hook is a failure that its
//! supervisor has to decide on, except [`Error::Functional`], which only travels back to the
//! caller of `ask`.
//!

use crate::ActorPath;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the actor system.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// An error occurred while sending a message to an actor.
    #[error("An error occurred while sending a message to actor: {0}.")]
    Send(String),
    /// An actor with the same path is already running.
    #[error("Actor {0} exist.")]
    Exists(ActorPath),
    /// There is no running actor at the path.
    #[error("Actor {0} not found.")]
    NotFound(ActorPath),
    /// The actor could not be initialized.
    #[error("An error occurred while starting the actor: {0}.")]
    Start(String),
    /// An error occurred while stopping an actor.
    #[error("An error occurred while stopping an actor.")]
    Stop,
    /// The actor was killed on purpose.
    #[error("Actor killed.")]
    Killed,
    /// Application failure raised while processing a message.
    #[error("Actor failure: {0}")]
    Failure(String),
    /// Error that does not compromise the operation of the actor.
    #[error("Error: {0}")]
    Functional(String),
    /// State recovery from the journal failed.
    #[error("Recovery error: {0}")]
    Recovery(String),
    /// A message could not be written to the journal.
    #[error("Persistence error: {0}")]
    Persistence(String),
    /// Store error.
    #[error("Store error: {0}")]
    Store(String),
}

impl Error {
    /// Returns `true` if the error has to be handled by the supervisor.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Error::Functional(_))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn functional_errors_are_not_failures() {
        assert!(!Error::Functional("bad request".to_owned()).is_failure());
        assert!(Error::Failure("boom".to_owned()).is_failure());
        assert!(Error::Recovery("read".to_owned()).is_failure());
    }

    #[test]
    fn error_messages_name_the_actor() {
        let error = Error::Exists(ActorPath::from("/user/worker"));
        assert_eq!(error.to_string(), "Actor /user/worker exist.");
    }
}
