// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor system
//!
//! The `system` module provides the `ActorSystem` type. The `ActorSystem` type is the responsible for
//! creating and managing actors.
//!

use crate::{
    Actor, ActorPath, ActorRef, Error, Handler,
    actor::{ActorHandle, Props},
    runner::ActorRunner,
    supervision::{StrategyEngine, SupervisionStrategy},
};

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use tracing::{debug, error};

use std::{
    any::Any,
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// Actor system.
///
pub struct ActorSystem {}

/// Default implementation for `ActorSystem`.
impl ActorSystem {
    /// Create a new actor system.
    ///
    /// Top level actors are supervised by a guardian with the default strategy.
    ///
    /// # Returns
    ///
    /// Returns a tuple with the system reference and the system runner.
    pub fn create(token: CancellationToken) -> (SystemRef, SystemRunner) {
        Self::create_with_guardian(token, SupervisionStrategy::default())
    }

    /// Create a new actor system whose top level actors are supervised with `guardian`.
    pub fn create_with_guardian(
        token: CancellationToken,
        guardian: SupervisionStrategy,
    ) -> (SystemRef, SystemRunner) {
        let (event_sender, event_receiver) = mpsc::channel(100);
        let system = SystemRef::new(event_sender, token, guardian);
        let runner = SystemRunner::new(event_receiver);
        (system, runner)
    }
}

/// System event.
///
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// Stop the actor system.
    StopSystem,
}

/// System reference.
///
#[derive(Clone)]
pub struct SystemRef {
    /// The actors running in this actor system.
    actors:
        Arc<RwLock<HashMap<ActorPath, Box<dyn Any + Send + Sync + 'static>>>>,

    /// The helpers for this actor system.
    helpers: Arc<RwLock<HashMap<String, Box<dyn Any + Send + Sync + 'static>>>>,

    /// The top level actors, stopped in reverse creation order on shutdown.
    root_handles: Arc<RwLock<Vec<ActorHandle>>>,

    /// Strategy of the guardian of top level actors.
    guardian: SupervisionStrategy,

    /// Source of actor identities.
    uids: Arc<AtomicU64>,

    token: CancellationToken,
}

impl SystemRef {
    /// Create system reference.
    pub fn new(
        event_sender: mpsc::Sender<SystemEvent>,
        token: CancellationToken,
        guardian: SupervisionStrategy,
    ) -> Self {
        let root_handles = Arc::new(RwLock::new(Vec::<ActorHandle>::new()));
        let root_handles_clone = root_handles.clone();
        let token_clone = token.clone();

        tokio::spawn(async move {
            token_clone.cancelled().await;
            debug!("Stopping actor system...");
            let mut root_handles = root_handles_clone.write().await;
            while let Some(handle) = root_handles.pop() {
                if let Err(error) = handle.ask_stop().await {
                    error!("Failed to stop actor {}: {}", handle.path(), error);
                }
            }

            let _ = event_sender.send(SystemEvent::StopSystem).await;
        });

        SystemRef {
            actors: Arc::new(RwLock::new(HashMap::new())),
            helpers: Arc::new(RwLock::new(HashMap::new())),
            root_handles,
            guardian,
            uids: Arc::new(AtomicU64::new(1)),
            token,
        }
    }

    /// Retrieves an actor running in this actor system. If actor does not exist, a None
    /// is returned instead.
    ///
    /// # Arguments
    ///
    /// * `path` - The path of the actor to retrieve.
    ///
    /// # Returns
    ///
    /// Returns the actor reference.
    ///
    pub async fn get_actor<A>(&self, path: &ActorPath) -> Option<ActorRef<A>>
    where
        A: Actor + Handler<A>,
    {
        let actors = self.actors.read().await;
        actors
            .get(path)
            .and_then(|any| any.downcast_ref::<ActorRef<A>>().cloned())
    }

    /// Creates an actor in this actor system with the given path and props.
    /// If the actor already exists, an error is returned.
    ///
    /// The actor starts in its own task; the reference is returned without waiting for
    /// `pre_start`.
    pub(crate) async fn create_actor_path<A>(
        &self,
        path: ActorPath,
        props: Props<A>,
        parent: Option<ActorHandle>,
    ) -> Result<ActorRef<A>, Error>
    where
        A: Actor + Handler<A>,
    {
        let mut actors = self.actors.write().await;
        if actors.contains_key(&path) {
            error!("Actor '{}' already exists!", &path);
            return Err(Error::Exists(path));
        }

        let guardian = if parent.is_none() {
            Some(StrategyEngine::new(self.guardian.clone()))
        } else {
            None
        };
        let uid = self.uids.fetch_add(1, Ordering::Relaxed);
        let (runner, actor_ref) =
            ActorRunner::create(path.clone(), props, uid, parent, guardian);

        actors.insert(path, Box::new(actor_ref.clone()));
        drop(actors);

        let system = self.clone();
        tokio::spawn(async move {
            runner.init(system).await;
        });

        Ok(actor_ref)
    }

    /// Launches a new top level actor on this actor system at the '/user'
    /// actor path. If another actor with the same name already exists,
    /// an `Err(Error::Exists(ActorPath))` is returned instead.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the actor to create.
    /// * `props` - The factory of the actor, or an instance to clone on restart.
    ///
    /// # Returns
    ///
    /// Returns the actor reference.
    ///
    /// # Error
    ///
    /// Returns an error if the actor already exists.
    ///
    pub async fn create_root_actor<A>(
        &self,
        name: &str,
        props: impl Into<Props<A>>,
    ) -> Result<ActorRef<A>, Error>
    where
        A: Actor + Handler<A>,
    {
        let path = ActorPath::from("/user") / name;
        let actor_ref = self
            .create_actor_path::<A>(path, props.into(), None)
            .await?;
        let mut handles = self.root_handles.write().await;
        handles.retain(|handle| !handle.is_terminated());
        handles.push(actor_ref.handle().clone());
        Ok(actor_ref)
    }

    /// Remove an actor from this actor system.
    /// If the actor does not exist, nothing happens.
    ///
    /// # Arguments
    ///
    /// * `path` - The path of the actor to remove.
    ///
    pub(crate) async fn remove_actor(&self, path: &ActorPath) {
        let mut actors = self.actors.write().await;
        actors.remove(path);
    }

    /// Stops every top level actor, children first, and then the system runner.
    pub fn stop_system(&self) {
        self.token.cancel();
    }

    pub fn guardian_strategy(&self) -> &SupervisionStrategy {
        &self.guardian
    }

    /// Get the actor's children.
    pub async fn children(&self, path: &ActorPath) -> Vec<ActorPath> {
        let actors = self.actors.read().await;
        let mut children = vec![];
        for actor in actors.keys() {
            if actor.is_child_of(path) {
                children.push(actor.clone());
            }
        }
        children
    }

    /// Add a helper to the actor system.
    pub async fn add_helper<H>(&self, name: &str, helper: H)
    where
        H: Any + Send + Sync + Clone + 'static,
    {
        let mut helpers = self.helpers.write().await;
        helpers.insert(name.to_owned(), Box::new(helper));
    }

    /// Get a helper from the actor system.
    /// If the helper does not exist, a None is returned.
    pub async fn get_helper<H>(&self, name: &str) -> Option<H>
    where
        H: Any + Send + Sync + Clone + 'static,
    {
        let helpers = self.helpers.read().await;
        helpers
            .get(name)
            .and_then(|any| any.downcast_ref::<H>())
            .cloned()
    }
}

/// System runner.
pub struct SystemRunner {
    /// The event receiver.
    event_receiver: mpsc::Receiver<SystemEvent>,
}

impl SystemRunner {
    /// Create a new system runner.
    pub(crate) fn new(event_receiver: mpsc::Receiver<SystemEvent>) -> Self {
        Self { event_receiver }
    }

    /// Run the actor system until it is stopped.
    pub async fn run(&mut self) {
        debug!("Running actor system...");
        if let Some(event) = self.event_receiver.recv().await {
            match event {
                SystemEvent::StopSystem => {
                    debug!("Actor system stopped.");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::{ActorContext, Directive, Message, Response};

    use async_trait::async_trait;
    use tracing_test::traced_test;

    #[derive(Debug, Clone, Default)]
    struct Worker;

    #[derive(Debug, Clone)]
    struct Ping;

    impl Message for Ping {}

    #[derive(Debug, Clone, PartialEq)]
    struct Pong;

    impl Response for Pong {}

    #[async_trait]
    impl Actor for Worker {
        type Message = Ping;
        type Response = Pong;

        async fn pre_start(
            &mut self,
            ctx: &mut ActorContext<Self>,
        ) -> Result<(), Error> {
            if ctx.path().level() == 2 {
                ctx.create_child("leaf", Worker).await?;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Handler<Worker> for Worker {
        async fn handle_message(
            &mut self,
            _sender: ActorPath,
            _msg: Ping,
            _ctx: &mut ActorContext<Worker>,
        ) -> Result<Pong, Error> {
            Ok(Pong)
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_stop_actor_system() {
        let token = CancellationToken::new();
        let (system, mut runner) = ActorSystem::create(token.clone());

        let worker = system.create_root_actor("worker", Worker).await.unwrap();
        assert_eq!(worker.ask(Ping).await.unwrap(), Pong);
        let leaf: ActorRef<Worker> = system
            .get_actor(&ActorPath::from("/user/worker/leaf"))
            .await
            .unwrap();

        let running = tokio::spawn(async move {
            runner.run().await;
        });
        system.stop_system();
        running.await.unwrap();

        assert!(worker.is_terminated());
        assert!(leaf.is_terminated());
        assert!(logs_contain("Running actor system..."));
        assert!(logs_contain("Stopping actor system..."));
        assert!(logs_contain("Actor system stopped."));
    }

    #[tokio::test]
    async fn test_duplicate_root_actor() {
        let (system, _) = ActorSystem::create(CancellationToken::new());
        system.create_root_actor("worker", Worker).await.unwrap();
        let result = system.create_root_actor("worker", Worker).await;
        assert_eq!(
            result.map(|_| ()),
            Err(Error::Exists(ActorPath::from("/user/worker")))
        );
    }

    #[tokio::test]
    async fn test_children() {
        let (system, _) = ActorSystem::create(CancellationToken::new());
        let worker = system.create_root_actor("worker", Worker).await.unwrap();
        worker.ask(Ping).await.unwrap();
        assert_eq!(
            system.children(&ActorPath::from("/user/worker")).await,
            vec![ActorPath::from("/user/worker/leaf")]
        );
    }

    #[tokio::test]
    async fn test_helpers() {
        let (system, _) = ActorSystem::create(CancellationToken::new());
        let helper = TestHelper { value: 42 };
        system.add_helper("test", helper).await;
        let helper: Option<TestHelper> = system.get_helper("test").await;
        assert_eq!(helper, Some(TestHelper { value: 42 }));
    }

    #[tokio::test]
    async fn test_guardian_strategy() {
        let (system, _) = ActorSystem::create(CancellationToken::new());
        assert_eq!(
            system
                .guardian_strategy()
                .directive(&Error::Start("boom".to_owned())),
            Directive::Stop
        );

        let (system, _) = ActorSystem::create_with_guardian(
            CancellationToken::new(),
            SupervisionStrategy::always(Directive::Resume).with_max_retries(3),
        );
        assert_eq!(system.guardian_strategy().max_retries(), Some(3));
        assert_eq!(
            system.guardian_strategy().directive(&Error::Killed),
            Directive::Resume
        );
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct TestHelper {
        pub value: i32,
    }
}
