// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Persistent messages
//!
//! A [`PersistentMessage`] is one journaled event of a processor. It is created with a
//! placeholder sequence number of `0`; the journal assigns the next number of the processor
//! when it writes the message. After that the message is never mutated, only copied with
//! a different payload or with delivery metadata.
//!

use crate::{
    error::Error,
    journal::{JournalActor, JournalCommand},
};

use actor::{ActorRef, Message};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::debug;

use std::{collections::BTreeSet, fmt::Debug};

/// Payload of a persistent message.
pub trait Payload:
    Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static
{
}

impl<T> Payload for T where
    T: Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static
{
}

/// Acknowledgment that a channel delivered a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfirmRecord {
    pub processor_id: String,
    pub sequence_nr: u64,
    pub channel_id: String,
}

/// One journaled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentMessage<P> {
    payload: P,
    sequence_nr: u64,
    processor_id: String,
    channel_id: String,
    sender: String,
    resolved: bool,
    deleted: bool,
    confirms: BTreeSet<String>,
    #[serde(skip)]
    confirm_target: Option<ActorRef<JournalActor>>,
    #[serde(skip)]
    confirm_message: Option<ConfirmRecord>,
}

impl<P: Payload> PersistentMessage<P> {
    /// New message of `processor_id`, not yet written.
    pub fn new(payload: P, processor_id: &str) -> Self {
        Self {
            payload,
            sequence_nr: 0,
            processor_id: processor_id.to_owned(),
            channel_id: String::new(),
            sender: String::new(),
            resolved: false,
            deleted: false,
            confirms: BTreeSet::new(),
            confirm_target: None,
            confirm_message: None,
        }
    }

    /// Message derived from the one being processed, if any.
    ///
    /// With a current message the result keeps all its metadata and only changes the
    /// payload, otherwise it is a fresh message without processor.
    pub fn create<Q: Payload>(
        payload: P,
        current: Option<&PersistentMessage<Q>>,
    ) -> Self {
        match current {
            Some(current) => current.with_payload(payload),
            None => Self::new(payload, ""),
        }
    }

    /// Copy of this message with another payload.
    pub fn with_payload<R: Payload>(&self, payload: R) -> PersistentMessage<R> {
        PersistentMessage {
            payload,
            sequence_nr: self.sequence_nr,
            processor_id: self.processor_id.clone(),
            channel_id: self.channel_id.clone(),
            sender: self.sender.clone(),
            resolved: self.resolved,
            deleted: self.deleted,
            confirms: self.confirms.clone(),
            confirm_target: self.confirm_target.clone(),
            confirm_message: self.confirm_message.clone(),
        }
    }

    pub fn with_sender(mut self, sender: &str) -> Self {
        sender.clone_into(&mut self.sender);
        self
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    pub fn sequence_nr(&self) -> u64 {
        self.sequence_nr
    }

    pub fn processor_id(&self) -> &str {
        &self.processor_id
    }

    /// Channel the message was delivered on, empty if it was not delivered.
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn resolved(&self) -> bool {
        self.resolved
    }

    /// Logically deleted. Deleted messages are still replayed.
    pub fn deleted(&self) -> bool {
        self.deleted
    }

    /// Channels that confirmed the delivery of this message. Only set on replayed messages.
    pub fn confirms(&self) -> &BTreeSet<String> {
        &self.confirms
    }

    pub fn is_confirmed(&self, channel_id: &str) -> bool {
        self.confirms.contains(channel_id)
    }

    pub fn confirm_target(&self) -> Option<&ActorRef<JournalActor>> {
        self.confirm_target.as_ref()
    }

    pub fn confirm_message(&self) -> Option<&ConfirmRecord> {
        self.confirm_message.as_ref()
    }

    /// Confirms the delivery to the journal through the recorded confirm target.
    ///
    /// Messages that were not delivered through a channel have nothing to confirm.
    pub async fn confirm(&self) -> Result<(), actor::Error> {
        match (&self.confirm_target, &self.confirm_message) {
            (Some(target), Some(record)) => {
                debug!(
                    "Confirming message {} of {} on channel {}.",
                    record.sequence_nr, record.processor_id, record.channel_id
                );
                target.ask(JournalCommand::Confirm(record.clone())).await
            }
            _ => {
                debug!(
                    "Message {} of {} has nothing to confirm.",
                    self.sequence_nr, self.processor_id
                );
                Ok(())
            }
        }
    }

    /// Form written to the journal, with the assigned sequence number.
    pub(crate) fn stored(mut self, sequence_nr: u64) -> Self {
        self.sequence_nr = sequence_nr;
        self.deleted = false;
        self.confirms.clear();
        self.confirm_target = None;
        self.confirm_message = None;
        self
    }

    /// Form handed to the replay callback.
    pub(crate) fn replayed(
        mut self,
        deleted: bool,
        confirms: BTreeSet<String>,
    ) -> Self {
        self.deleted = deleted;
        self.confirms = confirms;
        self
    }

    /// Form handed to the destination of a channel.
    pub(crate) fn delivered(
        &self,
        channel_id: &str,
        target: ActorRef<JournalActor>,
    ) -> Self {
        let mut message = self.clone();
        channel_id.clone_into(&mut message.channel_id);
        message.resolved = true;
        message.confirm_message = Some(ConfirmRecord {
            processor_id: self.processor_id.clone(),
            sequence_nr: self.sequence_nr,
            channel_id: channel_id.to_owned(),
        });
        message.confirm_target = Some(target);
        message
    }
}

impl<P: Payload> Message for PersistentMessage<P> {}

/// A message could not be written to the journal.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Can not persist message {sequence_nr}: {cause}")]
pub struct PersistenceFailure<P: Payload> {
    pub payload: P,
    pub sequence_nr: u64,
    pub cause: Error,
}

impl<P: Payload> From<PersistenceFailure<P>> for actor::Error {
    fn from(failure: PersistenceFailure<P>) -> Self {
        actor::Error::Persistence(failure.to_string())
    }
}
