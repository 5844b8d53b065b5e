// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Channels forward persistent messages to a destination and track which ones the
//! destination confirmed, so that a replay does not deliver them twice.

use crate::{
    journal::{JournalActor, JournalHandle},
    message::{Payload, PersistentMessage},
};

use actor::{Actor, ActorRef, Error as ActorError, Handler};

use tracing::debug;

#[derive(Clone, Debug)]
pub struct Channel {
    channel_id: String,
    journal: ActorRef<JournalActor>,
}

impl Channel {
    pub fn new(channel_id: &str, journal: ActorRef<JournalActor>) -> Self {
        Self {
            channel_id: channel_id.to_owned(),
            journal,
        }
    }

    /// Channel confirming to the journal actor of `handle`.
    pub fn with_journal<P: Payload>(
        channel_id: &str,
        handle: &JournalHandle<P>,
    ) -> Self {
        Self::new(channel_id, handle.actor().clone())
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Message ready to be delivered on this channel, `None` if it was already confirmed.
    pub fn prepare<P: Payload>(
        &self,
        message: &PersistentMessage<P>,
    ) -> Option<PersistentMessage<P>> {
        if message.is_confirmed(&self.channel_id) {
            debug!(
                "Channel {} skips message {} of {}, already confirmed.",
                self.channel_id,
                message.sequence_nr(),
                message.processor_id()
            );
            return None;
        }
        Some(message.delivered(&self.channel_id, self.journal.clone()))
    }

    /// Delivers the message to `destination` unless it was already confirmed. Returns
    /// whether it was sent.
    pub async fn deliver<A, P>(
        &self,
        message: &PersistentMessage<P>,
        destination: &ActorRef<A>,
    ) -> Result<bool, ActorError>
    where
        A: Actor<Message = PersistentMessage<P>> + Handler<A>,
        P: Payload,
    {
        match self.prepare(message) {
            Some(message) => {
                debug!(
                    "Channel {} delivers message {} to {}.",
                    self.channel_id,
                    message.sequence_nr(),
                    destination.path()
                );
                destination.tell(message).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
