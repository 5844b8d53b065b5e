// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor
//!
//! The `actor` module provides the `Actor` trait and the references used to talk to actors.
//! An [`ActorRef`] is the typed mailbox address of an actor, an [`ActorHandle`] is its untyped
//! identity, used to supervise it, watch it and compare it with other actors.
//!

use crate::{
    ActorPath, Error,
    handler::HandleHelper,
    runner::SystemMessage,
    supervision::{ChildrenOnRestart, SupervisionStrategy},
    system::SystemRef,
};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use futures::future::join_all;
use tracing::debug;

use std::{
    collections::HashSet,
    fmt::{Debug, Formatter},
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::Arc,
};

/// Execution context of an actor.
///
/// The context is owned by the actor runner and lent to the actor for every message and
/// lifecycle hook. It survives restarts: a replacement instance receives the same context,
/// with the same children and watches.
pub struct ActorContext<A: Actor + Handler<A>> {
    /// Hierarchical path identifying this actor in the system.
    path: ActorPath,
    /// Reference to the actor system.
    system: SystemRef,
    /// Identity of this actor.
    handle: ActorHandle,
    /// Supervisor of this actor, `None` for top level actors.
    parent: Option<ActorHandle>,
    /// Live children, in creation order.
    children: Vec<ActorHandle>,
    /// Actors this actor watches.
    watching: HashSet<ActorHandle>,
    _phantom_actor: PhantomData<A>,
}

impl<A> ActorContext<A>
where
    A: Actor + Handler<A>,
{
    pub(crate) fn new(
        path: ActorPath,
        system: SystemRef,
        handle: ActorHandle,
        parent: Option<ActorHandle>,
    ) -> Self {
        Self {
            path,
            system,
            handle,
            parent,
            children: Vec::new(),
            watching: HashSet::new(),
            _phantom_actor: PhantomData,
        }
    }

    /// Typed reference to this actor.
    pub async fn reference(&self) -> Option<ActorRef<A>> {
        self.system.get_actor(&self.path).await
    }

    pub fn path(&self) -> &ActorPath {
        &self.path
    }

    pub fn system(&self) -> &SystemRef {
        &self.system
    }

    /// Identity of this actor.
    pub fn handle(&self) -> &ActorHandle {
        &self.handle
    }

    /// Identity of the supervisor, `None` for top level actors.
    pub fn parent_handle(&self) -> Option<&ActorHandle> {
        self.parent.as_ref()
    }

    /// Typed reference to the supervisor.
    pub async fn parent<P: Actor + Handler<P>>(&self) -> Option<ActorRef<P>> {
        self.system.get_actor(&self.path.parent()).await
    }

    /// Creates a child supervised by this actor.
    ///
    /// The returned reference is usable at once: messages wait in the mailbox until the child
    /// has started.
    pub async fn create_child<C>(
        &mut self,
        name: &str,
        props: impl Into<Props<C>>,
    ) -> Result<ActorRef<C>, Error>
    where
        C: Actor + Handler<C>,
    {
        let props = props.into();
        let path = self.path.clone() / name;
        let actor_ref = self
            .system
            .create_actor_path(path, props, Some(self.handle.clone()))
            .await?;

        self.children.push(actor_ref.handle().clone());
        Ok(actor_ref)
    }

    pub async fn get_child<C>(&self, name: &str) -> Option<ActorRef<C>>
    where
        C: Actor + Handler<C>,
    {
        let path = self.path.clone() / name;
        self.system.get_actor(&path).await
    }

    /// Live children of this actor.
    pub fn children(&self) -> &[ActorHandle] {
        &self.children
    }

    pub(crate) fn remove_child(&mut self, child: &ActorHandle) {
        self.children.retain(|c| c != child);
    }

    /// Stops every child and waits until all of them are terminated.
    pub(crate) async fn stop_children(&mut self) {
        let children = std::mem::take(&mut self.children);
        for child in children.iter() {
            debug!("Stopping child {}.", child.path());
            let _ = child.send(SystemMessage::Stop(None));
        }
        join_all(children.iter().map(|child| child.terminated())).await;
    }

    /// Registers interest in the termination of `target`.
    ///
    /// [`Handler::on_terminated`] is called exactly once per registration, after `target` is
    /// terminated. Watching a terminated actor delivers the notification right away.
    pub fn watch(&mut self, target: &ActorHandle) {
        if !self.watching.insert(target.clone()) {
            return;
        }
        debug!("Actor {} watches {}.", self.path, target.path());
        if target
            .send(SystemMessage::Watch(self.handle.clone()))
            .is_err()
        {
            let _ = self
                .handle
                .send(SystemMessage::Terminated(target.clone()));
        }
    }

    /// Cancels a previous [`ActorContext::watch`]. A pending notification is dropped.
    pub fn unwatch(&mut self, target: &ActorHandle) {
        if self.watching.remove(target) {
            debug!("Actor {} unwatches {}.", self.path, target.path());
            let _ = target.send(SystemMessage::Unwatch(self.handle.clone()));
        }
    }

    pub fn is_watching(&self, target: &ActorHandle) -> bool {
        self.watching.contains(target)
    }

    /// Consumes the registration for a termination notification.
    pub(crate) fn take_watch(&mut self, target: &ActorHandle) -> bool {
        self.watching.remove(target)
    }

    /// Stops this actor after the current message.
    pub async fn stop(&self, sender: Option<oneshot::Sender<()>>) {
        debug!("Stopping actor {} from its context.", self.path);
        let _ = self.handle.send(SystemMessage::Stop(sender));
    }
}

/// Lifecycle of an actor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorLifecycle {
    /// `pre_start` is running. Messages wait in the mailbox.
    Starting,
    /// Processing messages.
    Running,
    /// The instance is being replaced.
    Restarting,
    /// Children and hooks are being stopped.
    Stopping,
    /// Terminated. The mailbox is discarded and watchers are notified.
    Terminated,
}

/// Factory of actor instances. A restart discards the failed instance and produces a new one.
pub struct Props<A> {
    factory: Arc<dyn Fn() -> A + Send + Sync>,
}

impl<A: Actor> Props<A> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }

    /// Creates a fresh instance.
    pub fn produce(&self) -> A {
        (self.factory)()
    }
}

impl<A: Actor + Clone> From<A> for Props<A> {
    fn from(actor: A) -> Self {
        Props::new(move || actor.clone())
    }
}

impl<A> Clone for Props<A> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
        }
    }
}

/// The `Actor` trait.
#[async_trait]
pub trait Actor: Send + Sync + Sized + 'static + Handler<Self> {
    /// The type of messages this actor can receive.
    type Message: Message;

    /// The type of responses this actor can send.
    type Response: Response;

    /// Strategy applied to the failures of the direct children of this actor.
    fn supervisor_strategy() -> SupervisionStrategy {
        SupervisionStrategy::default()
    }

    /// What happens to the children when this actor is restarted.
    fn children_on_restart() -> ChildrenOnRestart {
        ChildrenOnRestart::Restart
    }

    /// Called once, before the first message. Messages sent meanwhile are queued.
    async fn pre_start(
        &mut self,
        _context: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Called on the failed instance before it is discarded.
    async fn pre_restart(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        _error: &Error,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Called on the replacement instance before it receives messages.
    async fn post_restart(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        _error: &Error,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn pre_stop(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn post_stop(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Defines what an actor will receive as its message, and with what it should respond.
pub trait Message: Clone + Send + Sync + 'static {}

/// Defines the response of a message.
pub trait Response: Send + Sync + 'static {}

impl Response for () {}

/// Message handler for actors.
#[async_trait]
pub trait Handler<A: Actor + Handler<A>>: Send + Sync {
    /// Handles a message. A returned error other than [`Error::Functional`] is a failure and
    /// is handed to the supervisor.
    async fn handle_message(
        &mut self,
        sender: ActorPath,
        msg: A::Message,
        ctx: &mut ActorContext<A>,
    ) -> Result<A::Response, Error>;

    /// Called once for each watch registration when the watched actor terminates.
    async fn on_terminated(
        &mut self,
        actor: ActorHandle,
        _ctx: &mut ActorContext<A>,
    ) {
        debug!("Watched actor {} terminated.", actor.path());
    }
}

pub(crate) type SystemSender = mpsc::UnboundedSender<SystemMessage>;

/// Untyped identity of an actor.
///
/// Two handles are equal when they point to the same incarnation: an actor created again at
/// the same path after termination has a new identity.
#[derive(Clone)]
pub struct ActorHandle {
    path: ActorPath,
    uid: u64,
    system: SystemSender,
    terminated: CancellationToken,
}

impl ActorHandle {
    pub(crate) fn new(path: ActorPath, uid: u64, system: SystemSender) -> Self {
        Self {
            path,
            uid,
            system,
            terminated: CancellationToken::new(),
        }
    }

    pub fn path(&self) -> &ActorPath {
        &self.path
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// `true` once the actor reached [`ActorLifecycle::Terminated`].
    pub fn is_terminated(&self) -> bool {
        self.terminated.is_cancelled()
    }

    /// Resolves when the actor is terminated and its watchers were notified.
    pub async fn terminated(&self) {
        self.terminated.cancelled().await
    }

    /// Stops the actor and waits until it is terminated.
    pub async fn ask_stop(&self) -> Result<(), Error> {
        debug!("Stopping actor {} from handle.", self.path);
        let (response_sender, response_receiver) = oneshot::channel();

        if self
            .send(SystemMessage::Stop(Some(response_sender)))
            .is_err()
        {
            Ok(())
        } else {
            response_receiver
                .await
                .map_err(|error| Error::Send(error.to_string()))
        }
    }

    pub async fn tell_stop(&self) {
        debug!("Stopping actor {} from handle.", self.path);
        let _ = self.send(SystemMessage::Stop(None));
    }

    pub(crate) fn send(&self, message: SystemMessage) -> Result<(), Error> {
        self.system
            .send(message)
            .map_err(|_| Error::Send(self.path.to_string()))
    }

    pub(crate) fn mark_terminated(&self) {
        self.terminated.cancel();
    }
}

impl PartialEq for ActorHandle {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid && self.path == other.path
    }
}

impl Eq for ActorHandle {}

impl Hash for ActorHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        self.uid.hash(state);
    }
}

impl Debug for ActorHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ActorHandle({}#{})", self.path, self.uid)
    }
}

/// Typed reference to an actor.
pub struct ActorRef<A>
where
    A: Actor + Handler<A>,
{
    handle: ActorHandle,
    sender: HandleHelper<A>,
}

impl<A> ActorRef<A>
where
    A: Actor + Handler<A>,
{
    pub(crate) fn new(handle: ActorHandle, sender: HandleHelper<A>) -> Self {
        Self { handle, sender }
    }

    /// Sends a message without waiting for the response.
    pub async fn tell(&self, message: A::Message) -> Result<(), Error> {
        self.sender.tell(self.path(), message).await
    }

    /// Sends a message and waits for the response.
    pub async fn ask(&self, message: A::Message) -> Result<A::Response, Error> {
        self.sender.ask(self.path(), message).await
    }

    pub async fn ask_stop(&self) -> Result<(), Error> {
        self.handle.ask_stop().await
    }

    pub async fn tell_stop(&self) {
        self.handle.tell_stop().await
    }

    pub fn path(&self) -> ActorPath {
        self.handle.path.clone()
    }

    pub fn handle(&self) -> &ActorHandle {
        &self.handle
    }

    /// `true` if the mailbox no longer accepts messages.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn is_terminated(&self) -> bool {
        self.handle.is_terminated()
    }

    pub async fn terminated(&self) {
        self.handle.terminated().await
    }
}

impl<A> Clone for ActorRef<A>
where
    A: Actor + Handler<A>,
{
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<A> PartialEq for ActorRef<A>
where
    A: Actor + Handler<A>,
{
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl<A> Eq for ActorRef<A> where A: Actor + Handler<A> {}

impl<A> Hash for ActorRef<A>
where
    A: Actor + Handler<A>,
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.hash(state);
    }
}

impl<A> Debug for ActorRef<A>
where
    A: Actor + Handler<A>,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ActorRef({}#{})", self.handle.path, self.handle.uid)
    }
}

#[cfg(test)]
mod test {

    use super::*;

    use crate::system::ActorSystem;

    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Clone, Default)]
    struct TestActor {
        counter: usize,
    }

    #[derive(Debug, Clone)]
    enum TestMessage {
        Add(usize),
        Reject,
        Myself,
        Watch(ActorHandle),
    }

    impl Message for TestMessage {}

    #[derive(Debug, Clone, PartialEq)]
    struct TestResponse(usize);

    impl Response for TestResponse {}

    #[async_trait]
    impl Actor for TestActor {
        type Message = TestMessage;
        type Response = TestResponse;
    }

    #[async_trait]
    impl Handler<TestActor> for TestActor {
        async fn handle_message(
            &mut self,
            _sender: ActorPath,
            msg: TestMessage,
            ctx: &mut ActorContext<TestActor>,
        ) -> Result<TestResponse, Error> {
            assert!(ctx.parent_handle().is_none());
            match msg {
                TestMessage::Add(value) => {
                    self.counter += value;
                    Ok(TestResponse(self.counter))
                }
                TestMessage::Reject => {
                    Err(Error::Functional("rejected".to_owned()))
                }
                TestMessage::Myself => {
                    let myself = ctx
                        .reference()
                        .await
                        .ok_or_else(|| Error::NotFound(ctx.path().clone()))?;
                    Ok(TestResponse(myself.handle().uid() as usize))
                }
                TestMessage::Watch(target) => {
                    ctx.watch(&target);
                    ctx.watch(&target);
                    let watching = ctx.is_watching(&target);
                    ctx.unwatch(&target);
                    Ok(TestResponse(
                        usize::from(watching) + usize::from(ctx.is_watching(&target)),
                    ))
                }
            }
        }
    }

    #[tokio::test]
    async fn test_tell_and_ask() {
        let (system, _runner) = ActorSystem::create(CancellationToken::new());
        let actor_ref = system
            .create_root_actor("test", TestActor::default())
            .await
            .unwrap();

        actor_ref.tell(TestMessage::Add(10)).await.unwrap();
        let response = actor_ref.ask(TestMessage::Add(10)).await.unwrap();
        assert_eq!(response, TestResponse(20));

        actor_ref.ask_stop().await.unwrap();
        assert!(actor_ref.is_terminated());
        assert!(actor_ref.tell(TestMessage::Add(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_functional_error_keeps_state() {
        let (system, _runner) = ActorSystem::create(CancellationToken::new());
        let actor_ref = system
            .create_root_actor("test", TestActor::default())
            .await
            .unwrap();

        actor_ref.tell(TestMessage::Add(5)).await.unwrap();
        let response = actor_ref.ask(TestMessage::Reject).await;
        assert_eq!(response, Err(Error::Functional("rejected".to_owned())));
        let response = actor_ref.ask(TestMessage::Add(0)).await.unwrap();
        assert_eq!(response, TestResponse(5));
    }

    #[tokio::test]
    async fn test_identity() {
        let (system, _runner) = ActorSystem::create(CancellationToken::new());
        let first = system
            .create_root_actor("test", TestActor::default())
            .await
            .unwrap();
        assert_eq!(first, first.clone());

        first.ask_stop().await.unwrap();
        let second = system
            .create_root_actor("test", TestActor::default())
            .await
            .unwrap();

        assert_eq!(first.path(), second.path());
        assert_ne!(first.handle(), second.handle());
        assert_ne!(first.handle().uid(), second.handle().uid());
        assert!(first.is_terminated());
        assert!(!second.is_terminated());
    }

    #[tokio::test]
    async fn test_context_reference_and_watches() {
        let (system, _runner) = ActorSystem::create(CancellationToken::new());
        let actor_ref = system
            .create_root_actor("test", TestActor::default())
            .await
            .unwrap();
        let other = system
            .create_root_actor("other", TestActor::default())
            .await
            .unwrap();

        let response = actor_ref.ask(TestMessage::Myself).await.unwrap();
        assert_eq!(response, TestResponse(actor_ref.handle().uid() as usize));

        let response = actor_ref
            .ask(TestMessage::Watch(other.handle().clone()))
            .await
            .unwrap();
        assert_eq!(response, TestResponse(1));
    }

    #[tokio::test]
    async fn test_props_produce_fresh_instances() {
        let props = Props::new(|| TestActor { counter: 7 });
        let mut first = props.produce();
        first.counter += 1;
        assert_eq!(props.produce().counter, 7);

        let props: Props<TestActor> = TestActor { counter: 3 }.into();
        assert_eq!(props.clone().produce().counter, 3);
    }
}
