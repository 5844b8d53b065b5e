// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Typed mailbox.
//!
//! Messages are boxed into [`MessageHandler`]s so that `tell` and `ask` share one queue. The
//! queue outlives the actor instance: a restarted actor keeps the messages that were waiting.

use crate::{
    ActorPath, Error,
    actor::{Actor, ActorContext, Handler},
};

use async_trait::async_trait;

use tokio::sync::{mpsc, oneshot};

use tracing::{debug, error};

use std::marker::PhantomData;

/// Message handler trait for processing actor messages.
#[async_trait]
pub trait MessageHandler<A: Actor>: Send + Sync {
    /// Handles a message for the given actor. A returned error is a failure of the actor.
    async fn handle(
        &mut self,
        actor: &mut A,
        ctx: &mut ActorContext<A>,
    ) -> Result<(), Error>;
}

/// Internal actor message wrapper.
struct ActorMessage<A>
where
    A: Actor + Handler<A>,
{
    message: A::Message,
    sender: ActorPath,
    /// Response channel for `ask`, `None` for `tell`.
    rsvp: Option<oneshot::Sender<Result<A::Response, Error>>>,
    _phantom_actor: PhantomData<A>,
}

impl<A> ActorMessage<A>
where
    A: Actor + Handler<A>,
{
    pub fn new(
        message: A::Message,
        sender: ActorPath,
        rsvp: Option<oneshot::Sender<Result<A::Response, Error>>>,
    ) -> Self {
        Self {
            message,
            sender,
            rsvp,
            _phantom_actor: PhantomData,
        }
    }
}

#[async_trait]
impl<A> MessageHandler<A> for ActorMessage<A>
where
    A: Actor + Handler<A>,
{
    async fn handle(
        &mut self,
        actor: &mut A,
        ctx: &mut ActorContext<A>,
    ) -> Result<(), Error> {
        debug!("Handling message.");
        let result = actor
            .handle_message(self.sender.clone(), self.message.clone(), ctx)
            .await;

        let failure = match &result {
            Err(error) if error.is_failure() => Some(error.clone()),
            _ => None,
        };

        if let Some(rsvp) = self.rsvp.take() {
            debug!("Sending back response (if any).");
            rsvp.send(result).unwrap_or_else(|_failed| {
                error!("Failed to send back response!");
            })
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Boxed message handler for type-erased message handling.
pub type BoxedMessageHandler<A> = Box<dyn MessageHandler<A>>;

pub type MailboxReceiver<A> = mpsc::UnboundedReceiver<BoxedMessageHandler<A>>;

pub type MailboxSender<A> = mpsc::UnboundedSender<BoxedMessageHandler<A>>;

pub type Mailbox<A> = (MailboxSender<A>, MailboxReceiver<A>);

/// Creates a new unbounded mailbox for an actor.
pub fn mailbox<A: Actor>() -> Mailbox<A> {
    mpsc::unbounded_channel()
}

/// Sending side of a mailbox with typed `tell` and `ask`.
pub struct HandleHelper<A: Actor> {
    sender: MailboxSender<A>,
}

impl<A> HandleHelper<A>
where
    A: Actor + Handler<A>,
{
    pub(crate) fn new(sender: MailboxSender<A>) -> Self {
        debug!("Creating new handle reference.");
        Self { sender }
    }

    /// Fire-and-forget.
    pub(crate) async fn tell(
        &self,
        sender: ActorPath,
        message: A::Message,
    ) -> Result<(), Error> {
        debug!("Telling message to actor from handle reference.");
        let msg = ActorMessage::new(message, sender, None);
        if let Err(error) = self.sender.send(Box::new(msg)) {
            debug!("Failed to tell message! {}", error.to_string());
            Err(Error::Send(error.to_string()))
        } else {
            Ok(())
        }
    }

    /// Request-response. Fails if the actor stops before answering.
    pub(crate) async fn ask(
        &self,
        sender: ActorPath,
        message: A::Message,
    ) -> Result<A::Response, Error> {
        debug!("Asking message to actor from handle reference.");
        let (response_sender, response_receiver) = oneshot::channel();
        let msg = ActorMessage::new(message, sender, Some(response_sender));
        if let Err(error) = self.sender.send(Box::new(msg)) {
            error!("Failed to ask message! {}", error.to_string());
            Err(Error::Send(error.to_string()))
        } else {
            response_receiver
                .await
                .map_err(|error| Error::Send(error.to_string()))?
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<A: Actor> Clone for HandleHelper<A> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
