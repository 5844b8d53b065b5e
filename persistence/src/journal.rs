// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Journal
//!
//! A journal is the durable, append-only log of [`PersistentMessage`]s. Backends implement
//! three contracts:
//!
//! - [`AsyncWriteJournal`]: appends messages, assigning the next sequence number of their
//!   processor.
//! - [`AsyncReplay`]: replays a range of sequence numbers of one processor, in order,
//!   and reports the highest sequence number stored for it.
//! - [`AsyncConfirm`]: records channel confirmations and deletions.
//!
//! [`CollectionJournal`] implements all of them on top of any [`DbManager`]. The
//! [`JournalActor`] is the actor front-end that delivered messages confirm to.
//!

use crate::{
    database::{Collection, DbManager},
    error::Error,
    message::{ConfirmRecord, Payload, PersistentMessage},
};

use actor::{
    Actor, ActorContext, ActorPath, ActorRef, Handler, Message, SystemRef,
};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tracing::{debug, error};

use std::{
    collections::{BTreeMap, BTreeSet},
    marker::PhantomData,
    sync::Arc,
};

/// Replay side of a journal.
#[async_trait]
pub trait AsyncReplay<P: Payload>: Send + Sync {
    /// Delivers the messages of `processor_id` with `from <= sequence_nr <= to` to
    /// `on_message`, in increasing order, deleted ones included.
    ///
    /// Resolves to the highest sequence number stored for the processor, which does not
    /// depend on `to`. A read failure fails the whole replay; messages delivered before the
    /// failure stay delivered.
    async fn replay_async(
        &self,
        processor_id: &str,
        from: u64,
        to: u64,
        on_message: &mut (dyn FnMut(PersistentMessage<P>) + Send),
    ) -> Result<u64, Error>;

    /// Highest sequence number stored for `processor_id`, `0` if none.
    async fn highest_sequence_nr(&self, processor_id: &str) -> Result<u64, Error>;
}

/// Write side of a journal.
#[async_trait]
pub trait AsyncWriteJournal<P: Payload>: Send + Sync {
    /// Appends the messages and returns them with their assigned sequence numbers.
    async fn write_async(
        &self,
        messages: Vec<PersistentMessage<P>>,
    ) -> Result<Vec<PersistentMessage<P>>, Error>;
}

/// Confirmation and deletion side of a journal.
#[async_trait]
pub trait AsyncConfirm: Send + Sync {
    async fn write_confirmations_async(
        &self,
        confirmations: Vec<ConfirmRecord>,
    ) -> Result<(), Error>;

    /// Deletes a message. A logical deletion keeps the message in the replay, flagged as
    /// deleted; a permanent one removes it. The highest sequence number never decreases.
    async fn delete_async(
        &self,
        processor_id: &str,
        sequence_nr: u64,
        permanent: bool,
    ) -> Result<(), Error>;
}

/// A complete journal for payloads of type `P`.
pub trait Journal<P: Payload>:
    AsyncReplay<P> + AsyncWriteJournal<P> + AsyncConfirm
{
}

impl<P, T> Journal<P> for T
where
    P: Payload,
    T: AsyncReplay<P> + AsyncWriteJournal<P> + AsyncConfirm,
{
}

const HIGHEST_KEY: &str = "sequence_nr";

/// Fixed width key, so that key order is sequence order.
fn sequence_key(sequence_nr: u64) -> String {
    format!("{:020}", sequence_nr)
}

fn confirm_key(sequence_nr: u64, channel_id: &str) -> String {
    format!("{}.{}", sequence_key(sequence_nr), channel_id)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    bincode::serialize(value).map_err(|e| Error::Codec(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    bincode::deserialize(bytes).map_err(|e| Error::Codec(e.to_string()))
}

fn ignore_missing(result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(Error::EntryNotFound(_)) => Ok(()),
        other => other,
    }
}

/// Journal stored in the collections of a [`DbManager`].
///
/// Each processor gets four collections, all prefixed by its id: messages, confirmations,
/// deletion markers and its highest sequence number. Confirmations and deletions are
/// separate entries, folded into the messages at replay time.
pub struct CollectionJournal<M, C>
where
    M: DbManager<C>,
    C: Collection,
{
    name: String,
    manager: M,
    lock: Mutex<()>,
    _phantom_collection: PhantomData<C>,
}

impl<M, C> CollectionJournal<M, C>
where
    M: DbManager<C>,
    C: Collection,
{
    pub fn new(name: &str, manager: M) -> Self {
        Self {
            name: name.to_owned(),
            manager,
            lock: Mutex::new(()),
            _phantom_collection: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, kind: &str, processor_id: &str) -> Result<C, Error> {
        self.manager
            .create_collection(&format!("{}_{}", self.name, kind), processor_id)
    }

    fn messages(&self, processor_id: &str) -> Result<C, Error> {
        self.collection("messages", processor_id)
    }

    fn confirms(&self, processor_id: &str) -> Result<C, Error> {
        self.collection("confirms", processor_id)
    }

    fn deletions(&self, processor_id: &str) -> Result<C, Error> {
        self.collection("deletions", processor_id)
    }

    fn read_highest(&self, processor_id: &str) -> Result<u64, Error> {
        let highest = self.collection("highest", processor_id)?;
        match highest.get(HIGHEST_KEY) {
            Ok(bytes) => decode(&bytes),
            Err(Error::EntryNotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_highest(
        &self,
        processor_id: &str,
        sequence_nr: u64,
    ) -> Result<(), Error> {
        let mut highest = self.collection("highest", processor_id)?;
        highest.put(HIGHEST_KEY, &encode(&sequence_nr)?)
    }
}

#[async_trait]
impl<P, M, C> AsyncWriteJournal<P> for CollectionJournal<M, C>
where
    P: Payload,
    M: DbManager<C>,
    C: Collection,
{
    async fn write_async(
        &self,
        messages: Vec<PersistentMessage<P>>,
    ) -> Result<Vec<PersistentMessage<P>>, Error> {
        let _guard = self.lock.lock().await;
        let mut written = Vec::with_capacity(messages.len());
        for message in messages {
            let processor_id = message.processor_id().to_owned();
            let sequence_nr = self.read_highest(&processor_id)? + 1;
            let message = message.stored(sequence_nr);

            let mut collection = self.messages(&processor_id)?;
            collection.put(&sequence_key(sequence_nr), &encode(&message)?)?;
            self.write_highest(&processor_id, sequence_nr)?;

            debug!(
                "Journal {} wrote message {} of {}.",
                self.name, sequence_nr, processor_id
            );
            written.push(message);
        }
        Ok(written)
    }
}

#[async_trait]
impl<P, M, C> AsyncReplay<P> for CollectionJournal<M, C>
where
    P: Payload,
    M: DbManager<C>,
    C: Collection,
{
    async fn replay_async(
        &self,
        processor_id: &str,
        from: u64,
        to: u64,
        on_message: &mut (dyn FnMut(PersistentMessage<P>) + Send),
    ) -> Result<u64, Error> {
        debug!(
            "Journal {} replaying {} from {} to {}.",
            self.name, processor_id, from, to
        );
        // Snapshot under the lock, so that the highest sequence number matches the messages.
        let (entries, deleted, mut confirms, highest) = {
            let _guard = self.lock.lock().await;
            if from > to {
                let highest = self.read_highest(processor_id)?;
                (Vec::new(), BTreeSet::new(), BTreeMap::new(), highest)
            } else {
                let from_key = sequence_key(from);
                let to_key = sequence_key(to);

                let entries = self.messages(processor_id)?.range(&from_key, &to_key)?;

                let mut deleted = BTreeSet::new();
                for (key, _) in
                    self.deletions(processor_id)?.range(&from_key, &to_key)?
                {
                    let sequence_nr = key
                        .parse::<u64>()
                        .map_err(|e| Error::Codec(e.to_string()))?;
                    deleted.insert(sequence_nr);
                }

                let mut confirms: BTreeMap<u64, BTreeSet<String>> =
                    BTreeMap::new();
                // Confirmation keys extend the sequence key with `.channel`.
                for (_, bytes) in self
                    .confirms(processor_id)?
                    .range(&from_key, &format!("{}/", to_key))?
                {
                    let record: ConfirmRecord = decode(&bytes)?;
                    confirms
                        .entry(record.sequence_nr)
                        .or_default()
                        .insert(record.channel_id);
                }

                (entries, deleted, confirms, self.read_highest(processor_id)?)
            }
        };

        for (_, bytes) in entries {
            let message: PersistentMessage<P> = decode(&bytes).map_err(|e| {
                error!(
                    "Journal {} can not read a message of {}: {}",
                    self.name, processor_id, e
                );
                e
            })?;
            let sequence_nr = message.sequence_nr();
            let message = message.replayed(
                deleted.contains(&sequence_nr),
                confirms.remove(&sequence_nr).unwrap_or_default(),
            );
            on_message(message);
        }

        debug!(
            "Journal {} replayed {}, highest sequence number {}.",
            self.name, processor_id, highest
        );
        Ok(highest)
    }

    async fn highest_sequence_nr(&self, processor_id: &str) -> Result<u64, Error> {
        let _guard = self.lock.lock().await;
        self.read_highest(processor_id)
    }
}

#[async_trait]
impl<M, C> AsyncConfirm for CollectionJournal<M, C>
where
    M: DbManager<C>,
    C: Collection,
{
    async fn write_confirmations_async(
        &self,
        confirmations: Vec<ConfirmRecord>,
    ) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        for record in confirmations {
            let mut collection = self.confirms(&record.processor_id)?;
            collection.put(
                &confirm_key(record.sequence_nr, &record.channel_id),
                &encode(&record)?,
            )?;
            debug!(
                "Journal {} confirmed message {} of {} on {}.",
                self.name, record.sequence_nr, record.processor_id, record.channel_id
            );
        }
        Ok(())
    }

    async fn delete_async(
        &self,
        processor_id: &str,
        sequence_nr: u64,
        permanent: bool,
    ) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        let key = sequence_key(sequence_nr);
        if permanent {
            ignore_missing(self.messages(processor_id)?.del(&key))?;
            ignore_missing(self.deletions(processor_id)?.del(&key))?;
        } else {
            self.deletions(processor_id)?.put(&key, &[])?;
        }
        debug!(
            "Journal {} deleted message {} of {} (permanent: {}).",
            self.name, sequence_nr, processor_id, permanent
        );
        Ok(())
    }
}

/// Commands accepted by the [`JournalActor`].
#[derive(Debug, Clone)]
pub enum JournalCommand {
    Confirm(ConfirmRecord),
    Delete {
        processor_id: String,
        sequence_nr: u64,
        permanent: bool,
    },
}

impl Message for JournalCommand {}

/// Actor front-end of a journal. Delivered messages confirm to it.
#[derive(Clone)]
pub struct JournalActor {
    journal: Arc<dyn AsyncConfirm>,
}

impl JournalActor {
    pub fn new(journal: Arc<dyn AsyncConfirm>) -> Self {
        Self { journal }
    }
}

#[async_trait]
impl Actor for JournalActor {
    type Message = JournalCommand;
    type Response = ();
}

#[async_trait]
impl Handler<JournalActor> for JournalActor {
    async fn handle_message(
        &mut self,
        _sender: ActorPath,
        msg: JournalCommand,
        _ctx: &mut ActorContext<JournalActor>,
    ) -> Result<(), actor::Error> {
        match msg {
            JournalCommand::Confirm(record) => {
                self.journal.write_confirmations_async(vec![record]).await?
            }
            JournalCommand::Delete {
                processor_id,
                sequence_nr,
                permanent,
            } => {
                self.journal
                    .delete_async(&processor_id, sequence_nr, permanent)
                    .await?
            }
        }
        Ok(())
    }
}

/// A journal registered on an actor system, with its actor front-end.
pub struct JournalHandle<P: Payload> {
    journal: Arc<dyn Journal<P>>,
    actor: ActorRef<JournalActor>,
}

impl<P: Payload> JournalHandle<P> {
    pub fn new(journal: Arc<dyn Journal<P>>, actor: ActorRef<JournalActor>) -> Self {
        Self { journal, actor }
    }

    /// Starts the journal actor at `/user/{name}` and registers the journal as the helper
    /// `name`.
    pub async fn register<J>(
        system: &SystemRef,
        name: &str,
        journal: J,
    ) -> Result<Self, actor::Error>
    where
        J: Journal<P> + 'static,
    {
        let journal = Arc::new(journal);
        let confirm: Arc<dyn AsyncConfirm> = journal.clone();
        let actor = system
            .create_root_actor(name, JournalActor::new(confirm))
            .await?;

        let handle = Self::new(journal, actor);
        system.add_helper(name, handle.clone()).await;
        debug!("Journal {} registered.", name);
        Ok(handle)
    }

    pub fn journal(&self) -> &Arc<dyn Journal<P>> {
        &self.journal
    }

    pub fn actor(&self) -> &ActorRef<JournalActor> {
        &self.actor
    }
}

impl<P: Payload> Clone for JournalHandle<P> {
    fn clone(&self) -> Self {
        Self {
            journal: self.journal.clone(),
            actor: self.actor.clone(),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::memory::{MemoryManager, MemoryStore};

    use serde::Deserialize;
    use tracing_test::traced_test;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Deposit(u64);

    type TestJournal = CollectionJournal<MemoryManager, MemoryStore>;

    const PROCESSOR: &str = "/user/account";

    async fn journal_with(count: u64) -> TestJournal {
        let journal = TestJournal::new("journal", MemoryManager::default());
        let messages = (1..=count)
            .map(|i| PersistentMessage::new(Deposit(i * 10), PROCESSOR))
            .collect();
        let written = journal.write_async(messages).await.unwrap();
        assert_eq!(written.len() as u64, count);
        journal
    }

    async fn replay(
        journal: &TestJournal,
        from: u64,
        to: u64,
    ) -> (Result<u64, Error>, Vec<PersistentMessage<Deposit>>) {
        let mut replayed = Vec::new();
        let result = journal
            .replay_async(
                PROCESSOR,
                from,
                to,
                &mut |message: PersistentMessage<Deposit>| {
                    replayed.push(message)
                },
            )
            .await;
        (result, replayed)
    }

    #[tokio::test]
    async fn test_write_assigns_sequence_numbers() {
        let journal = TestJournal::new("journal", MemoryManager::default());
        let written = journal
            .write_async(vec![
                PersistentMessage::new(Deposit(1), PROCESSOR),
                PersistentMessage::new(Deposit(2), "/user/other"),
                PersistentMessage::new(Deposit(3), PROCESSOR),
            ])
            .await
            .unwrap();
        let numbers: Vec<u64> =
            written.iter().map(|message| message.sequence_nr()).collect();
        assert_eq!(numbers, vec![1, 1, 2]);
        assert_eq!(
            AsyncReplay::<Deposit>::highest_sequence_nr(&journal, PROCESSOR)
                .await,
            Ok(2)
        );
        assert_eq!(
            AsyncReplay::<Deposit>::highest_sequence_nr(&journal, "/user/none")
                .await,
            Ok(0)
        );
    }

    #[tokio::test]
    async fn test_replay_range_returns_overall_highest() {
        let journal = journal_with(10).await;
        let (result, replayed) = replay(&journal, 3, 7).await;
        assert_eq!(result, Ok(10));
        let numbers: Vec<u64> =
            replayed.iter().map(|message| message.sequence_nr()).collect();
        assert_eq!(numbers, vec![3, 4, 5, 6, 7]);
        assert_eq!(*replayed[0].payload(), Deposit(30));
    }

    #[tokio::test]
    async fn test_replay_empty_range() {
        let journal = journal_with(4).await;
        let (result, replayed) = replay(&journal, 5, 2).await;
        assert_eq!(result, Ok(4));
        assert!(replayed.is_empty());

        let (result, replayed) = replay(&journal, 20, u64::MAX).await;
        assert_eq!(result, Ok(4));
        assert!(replayed.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_messages_are_replayed() {
        let journal = journal_with(5).await;
        journal.delete_async(PROCESSOR, 4, false).await.unwrap();
        let (result, replayed) = replay(&journal, 1, 5).await;
        assert_eq!(result, Ok(5));
        assert_eq!(replayed.len(), 5);
        let deleted: Vec<u64> = replayed
            .iter()
            .filter(|message| message.deleted())
            .map(|message| message.sequence_nr())
            .collect();
        assert_eq!(deleted, vec![4]);
    }

    #[tokio::test]
    async fn test_permanent_delete_keeps_highest() {
        let journal = journal_with(3).await;
        journal.delete_async(PROCESSOR, 2, true).await.unwrap();
        journal.delete_async(PROCESSOR, 3, true).await.unwrap();
        let (result, replayed) = replay(&journal, 1, u64::MAX).await;
        assert_eq!(result, Ok(3));
        let numbers: Vec<u64> =
            replayed.iter().map(|message| message.sequence_nr()).collect();
        assert_eq!(numbers, vec![1]);

        let written = journal
            .write_async(vec![PersistentMessage::new(Deposit(0), PROCESSOR)])
            .await
            .unwrap();
        assert_eq!(written[0].sequence_nr(), 4);
    }

    #[tokio::test]
    async fn test_confirmations_are_folded() {
        let journal = journal_with(6).await;
        journal
            .write_confirmations_async(vec![
                ConfirmRecord {
                    processor_id: PROCESSOR.to_owned(),
                    sequence_nr: 5,
                    channel_id: "c1".to_owned(),
                },
                ConfirmRecord {
                    processor_id: PROCESSOR.to_owned(),
                    sequence_nr: 5,
                    channel_id: "c2".to_owned(),
                },
                ConfirmRecord {
                    processor_id: PROCESSOR.to_owned(),
                    sequence_nr: 6,
                    channel_id: "c1".to_owned(),
                },
            ])
            .await
            .unwrap();

        let (_, replayed) = replay(&journal, 4, 5).await;
        assert!(replayed[0].confirms().is_empty());
        assert_eq!(
            replayed[1].confirms(),
            &BTreeSet::from(["c1".to_owned(), "c2".to_owned()])
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_read_failure_fails_replay() {
        let journal = journal_with(8).await;
        journal
            .messages(PROCESSOR)
            .unwrap()
            .put(&sequence_key(5), b"corrupted")
            .unwrap();

        let (result, replayed) = replay(&journal, 3, 7).await;
        assert!(matches!(result, Err(Error::Codec(_))));
        let numbers: Vec<u64> =
            replayed.iter().map(|message| message.sequence_nr()).collect();
        assert_eq!(numbers, vec![3, 4]);
        assert!(logs_contain("can not read a message of /user/account"));
    }

    #[tokio::test]
    async fn test_journal_reopened_from_same_backend() {
        let manager = MemoryManager::default();
        let journal = TestJournal::new("journal", manager.clone());
        journal
            .write_async(vec![PersistentMessage::new(Deposit(1), PROCESSOR)])
            .await
            .unwrap();

        let reopened = TestJournal::new("journal", manager);
        let (result, replayed) = replay(&reopened, 1, u64::MAX).await;
        assert_eq!(result, Ok(1));
        assert_eq!(replayed.len(), 1);
    }
}
