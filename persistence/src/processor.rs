// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Processors
//!
//! A [`Processor`] is an actor whose state is derived from its journaled messages. It
//! recovers by replaying them, usually from `pre_start` and `post_restart`, and grows its
//! log with [`Processor::persist`].
//!
//! Recovery runs inside a lifecycle hook, so messages sent to the processor meanwhile wait
//! in its mailbox. A failed replay is reported as [`actor::Error::Recovery`], which the
//! default decider answers with `Stop`: the processor never processes live messages on top
//! of an unknown state.
//!

use crate::{
    journal::JournalHandle,
    message::{Payload, PersistenceFailure, PersistentMessage},
};

use actor::{Actor, ActorContext, ActorPath, Error as ActorError, Handler};

use async_trait::async_trait;
use tracing::{debug, error, warn};

/// Event sourced actor.
#[async_trait]
pub trait Processor: Actor + Handler<Self> {
    /// Type of the journaled events.
    type Payload: Payload;

    /// Identity of the log of this processor. Defaults to the actor path.
    fn processor_id(ctx: &ActorContext<Self>) -> String {
        ctx.path().to_string()
    }

    /// Name of the journal helper registered on the system.
    fn journal_name() -> &'static str {
        "journal"
    }

    /// Applies a journaled event to the state.
    fn apply(&mut self, message: &PersistentMessage<Self::Payload>);

    async fn journal(
        ctx: &ActorContext<Self>,
    ) -> Result<JournalHandle<Self::Payload>, ActorError> {
        ctx.system()
            .get_helper::<JournalHandle<Self::Payload>>(Self::journal_name())
            .await
            .ok_or_else(|| {
                ActorError::NotFound(ActorPath::from("/user") / Self::journal_name())
            })
    }

    /// Replays the whole log. Returns the highest sequence number of the processor.
    async fn recover(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<u64, ActorError> {
        self.recover_to(ctx, u64::MAX).await
    }

    /// Replays the log up to `to`, skipping deleted messages.
    async fn recover_to(
        &mut self,
        ctx: &mut ActorContext<Self>,
        to: u64,
    ) -> Result<u64, ActorError> {
        let journal = Self::journal(ctx)
            .await
            .map_err(|e| ActorError::Recovery(e.to_string()))?;
        let processor_id = Self::processor_id(ctx);
        debug!("Processor {} is recovering up to {}.", processor_id, to);

        let mut replayed = 0usize;
        let mut on_message = |message: PersistentMessage<Self::Payload>| {
            if !message.deleted() {
                self.apply(&message);
                replayed += 1;
            }
        };
        let highest = journal
            .journal()
            .replay_async(&processor_id, 1, to, &mut on_message)
            .await
            .map_err(|e| {
                error!("Processor {} failed to recover: {}", processor_id, e);
                ActorError::Recovery(e.to_string())
            })?;

        debug!(
            "Processor {} recovered {} messages, highest sequence number {}.",
            processor_id, replayed, highest
        );
        Ok(highest)
    }

    /// Writes a new event and applies it once it is durable.
    async fn persist(
        &mut self,
        ctx: &mut ActorContext<Self>,
        payload: Self::Payload,
    ) -> Result<PersistentMessage<Self::Payload>, PersistenceFailure<Self::Payload>>
    {
        let journal = match Self::journal(ctx).await {
            Ok(journal) => journal,
            Err(e) => {
                return Err(PersistenceFailure {
                    payload,
                    sequence_nr: 0,
                    cause: crate::Error::Journal(e.to_string()),
                });
            }
        };
        let processor_id = Self::processor_id(ctx);
        let message =
            PersistentMessage::new(payload.clone(), &processor_id)
                .with_sender(&ctx.path().to_string());

        let written = journal.journal().write_async(vec![message]).await;
        match written.map(|mut messages| messages.pop()) {
            Ok(Some(message)) => {
                self.apply(&message);
                Ok(message)
            }
            Ok(None) => Err(PersistenceFailure {
                payload,
                sequence_nr: 0,
                cause: crate::Error::Journal("nothing written".to_owned()),
            }),
            Err(cause) => {
                warn!(
                    "Processor {} failed to persist a message: {}",
                    processor_id, cause
                );
                Err(PersistenceFailure {
                    payload,
                    sequence_nr: 0,
                    cause,
                })
            }
        }
    }
}
