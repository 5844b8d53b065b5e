// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor execution
//!
//! Every actor runs inside its own `ActorRunner` task. The runner owns the actor instance, the
//! mailbox receiver and a second, unbounded channel of [`SystemMessage`]s used for supervision,
//! watching and stopping. System messages always take priority over mailbox messages.
//!
//! ## Lifecycle
//!
//! ```text
//! Starting ──ok──▶ Running ──failure──▶ (supervisor decides)
//!    │                ▲                    │ Resume  ─▶ Running
//!    │                └──── Restarting ◀───┤ Restart
//!    └──failure──▶ (supervisor decides)    │ Stop    ─▶ Stopping ─▶ Terminated
//! ```
//!
//! A failing actor reports to its supervisor and suspends: it processes no mailbox message
//! until the directive arrives. While suspended it still honours `Stop` and `Restart`
//! requests from its own supervisor, so a chain of escalations can never deadlock.
//!
//! Failures during `Starting` and `Restarting` are supervised like any other failure and
//! count against the retry budget of the supervisor.
//!

use crate::{
    ActorPath, Error,
    actor::{
        Actor, ActorContext, ActorHandle, ActorLifecycle, ActorRef, Handler,
        Props,
    },
    handler::{HandleHelper, MailboxReceiver, mailbox},
    supervision::{ChildrenOnRestart, Directive, StrategyEngine},
    system::SystemRef,
};

use tokio::{
    select,
    sync::{mpsc, oneshot},
};
use tracing::{debug, error, warn};

use std::collections::{HashMap, HashSet, VecDeque};

/// Receiving side of the system channel of an actor.
pub(crate) type SystemReceiver = mpsc::UnboundedReceiver<SystemMessage>;

/// Messages that drive supervision, watching and stopping.
pub(crate) enum SystemMessage {
    /// Stop the actor, acknowledging once it is terminated.
    Stop(Option<oneshot::Sender<()>>),
    /// A child failed and waits for a directive. `restarts` counts the restart requests the
    /// child had received from its supervisor when it failed.
    Failed {
        child: ActorHandle,
        error: Error,
        restarts: u64,
        reply: oneshot::Sender<Directive>,
    },
    /// The supervisor restarts this actor. Not counted as a failure of this actor.
    Restart(Error),
    /// Start notifying the given watcher.
    Watch(ActorHandle),
    /// Stop notifying the given watcher.
    Unwatch(ActorHandle),
    /// A watched actor terminated.
    Terminated(ActorHandle),
    /// A child terminated.
    ChildTerminated(ActorHandle),
}

/// Execution engine of a single actor.
pub(crate) struct ActorRunner<A: Actor> {
    /// Hierarchical path identifying this actor within the system.
    path: ActorPath,
    /// Factory of instances, used on restart.
    props: Props<A>,
    /// The current instance.
    actor: A,
    lifecycle: ActorLifecycle,
    /// Mailbox receiver. It survives restarts.
    receiver: MailboxReceiver<A>,
    system_receiver: SystemReceiver,
    handle: ActorHandle,
    parent: Option<ActorHandle>,
    /// Decides on the failures of the children.
    engine: StrategyEngine,
    /// Decides on the failures of this actor when it has no parent.
    guardian: Option<StrategyEngine>,
    watchers: HashSet<ActorHandle>,
    /// System messages received while suspended, replayed once running again.
    deferred: VecDeque<SystemMessage>,
    /// Cause of the pending restart.
    failure: Option<Error>,
    /// Escalating child waiting for this actor to restart.
    escalated: Option<(ActorHandle, oneshot::Sender<Directive>)>,
    /// Restart requests received from the supervisor.
    restarts: u64,
    /// Restart requests sent to each child.
    restarts_sent: HashMap<ActorHandle, u64>,
    stop_acks: Vec<oneshot::Sender<()>>,
}

impl<A> ActorRunner<A>
where
    A: Actor + Handler<A>,
{
    /// Creates the runner and the reference of a new actor.
    ///
    /// Top level actors get a `guardian` engine that replaces the missing supervisor.
    pub(crate) fn create(
        path: ActorPath,
        props: Props<A>,
        uid: u64,
        parent: Option<ActorHandle>,
        guardian: Option<StrategyEngine>,
    ) -> (Self, ActorRef<A>) {
        debug!("Creating new actor runner.");
        let (sender, receiver) = mailbox();
        let (system_sender, system_receiver) = mpsc::unbounded_channel();
        let handle = ActorHandle::new(path.clone(), uid, system_sender);
        let actor_ref = ActorRef::new(handle.clone(), HandleHelper::new(sender));
        let actor = props.produce();

        let runner = ActorRunner {
            path,
            props,
            actor,
            lifecycle: ActorLifecycle::Starting,
            receiver,
            system_receiver,
            handle,
            parent,
            engine: StrategyEngine::new(A::supervisor_strategy()),
            guardian,
            watchers: HashSet::new(),
            deferred: VecDeque::new(),
            failure: None,
            escalated: None,
            restarts: 0,
            restarts_sent: HashMap::new(),
            stop_acks: Vec::new(),
        };
        (runner, actor_ref)
    }

    /// Drives the actor until it is terminated.
    pub(crate) async fn init(mut self, system: SystemRef) {
        debug!("Initializing actor {} runner.", &self.path);

        debug!("Creating actor {} context.", &self.path);
        let mut ctx: ActorContext<A> = ActorContext::new(
            self.path.clone(),
            system,
            self.handle.clone(),
            self.parent.clone(),
        );

        loop {
            match self.lifecycle {
                ActorLifecycle::Starting => {
                    debug!("Actor {} is starting.", &self.path);
                    match self.actor.pre_start(&mut ctx).await {
                        Ok(()) => {
                            debug!(
                                "Actor {} has started successfully.",
                                &self.path
                            );
                            self.lifecycle = ActorLifecycle::Running;
                        }
                        Err(error) => {
                            error!(
                                "Actor {} failed to start: {}",
                                &self.path, error
                            );
                            self.fail(error, &mut ctx).await;
                        }
                    }
                }
                ActorLifecycle::Running => {
                    self.run(&mut ctx).await;
                }
                ActorLifecycle::Restarting => {
                    debug!("Actor {} is restarting.", &self.path);
                    let cause = self.failure.take().unwrap_or_else(|| {
                        Error::Failure("restart requested".to_owned())
                    });
                    match self.restart(&cause, &mut ctx).await {
                        Ok(()) => {
                            debug!("Actor {} has restarted.", &self.path);
                            self.lifecycle = ActorLifecycle::Running;
                        }
                        Err(error) => {
                            error!(
                                "Actor {} failed to restart: {}",
                                &self.path, error
                            );
                            self.fail(error, &mut ctx).await;
                        }
                    }
                }
                ActorLifecycle::Stopping => {
                    self.stop(&mut ctx).await;
                    self.lifecycle = ActorLifecycle::Terminated;
                }
                ActorLifecycle::Terminated => {
                    self.terminate(&mut ctx).await;
                    debug!("Actor {} is terminated.", &self.path);
                    break;
                }
            }
        }
    }

    /// Processes system and mailbox messages until the lifecycle changes.
    async fn run(&mut self, ctx: &mut ActorContext<A>) {
        debug!("Running actor {}.", &self.path);

        while self.lifecycle == ActorLifecycle::Running {
            if let Some(message) = self.deferred.pop_front() {
                self.handle_system(message, ctx).await;
                continue;
            }

            select! {
                biased;
                message = self.system_receiver.recv() => {
                    match message {
                        Some(message) => self.handle_system(message, ctx).await,
                        None => self.lifecycle = ActorLifecycle::Stopping,
                    }
                }
                message = self.receiver.recv() => {
                    match message {
                        Some(mut message) => {
                            if let Err(error) = message.handle(&mut self.actor, ctx).await {
                                error!("Actor {} failed: {}", &self.path, error);
                                self.fail(error, ctx).await;
                            }
                        }
                        None => self.lifecycle = ActorLifecycle::Stopping,
                    }
                }
            }
        }
    }

    async fn handle_system(
        &mut self,
        message: SystemMessage,
        ctx: &mut ActorContext<A>,
    ) {
        match message {
            SystemMessage::Stop(ack) => {
                debug!("Stop requested for actor {}.", &self.path);
                self.stop_acks.extend(ack);
                self.lifecycle = ActorLifecycle::Stopping;
            }
            SystemMessage::Restart(cause) => {
                debug!("Actor {} restarted by its supervisor.", &self.path);
                self.restarts += 1;
                self.failure = Some(cause);
                self.lifecycle = ActorLifecycle::Restarting;
            }
            SystemMessage::Watch(watcher) => {
                if watcher != self.handle {
                    self.watchers.insert(watcher);
                }
            }
            SystemMessage::Unwatch(watcher) => {
                self.watchers.remove(&watcher);
            }
            SystemMessage::Terminated(actor) => {
                if ctx.take_watch(&actor) {
                    self.actor.on_terminated(actor, ctx).await;
                }
            }
            SystemMessage::ChildTerminated(child) => {
                debug!(
                    "Child {} of actor {} terminated.",
                    child.path(),
                    &self.path
                );
                ctx.remove_child(&child);
                self.engine.forget(child.path());
                self.restarts_sent.remove(&child);
            }
            SystemMessage::Failed {
                child,
                error,
                restarts,
                reply,
            } => {
                self.supervise_child(child, error, restarts, reply, ctx)
                    .await;
            }
        }
    }

    /// Applies the strategy of this actor to a failed child.
    ///
    /// A report sent before the child received a restart request of this actor was already
    /// answered by that request, so it is dropped without being counted.
    async fn supervise_child(
        &mut self,
        child: ActorHandle,
        error: Error,
        restarts: u64,
        reply: oneshot::Sender<Directive>,
        ctx: &mut ActorContext<A>,
    ) {
        let sent = self.restarts_sent.get(&child).copied().unwrap_or(0);
        if restarts < sent || reply.is_closed() {
            debug!(
                "Actor {} ignores a stale failure of {}: {}",
                &self.path,
                child.path(),
                error
            );
            return;
        }

        let directive = self.engine.decide(child.path(), &error);
        if directive != Directive::Escalate {
            debug!(
                "Actor {} answers {:?} to child {}.",
                &self.path,
                directive,
                child.path()
            );
            if reply.send(directive).is_err() {
                warn!(
                    "Child {} is no longer waiting for a directive.",
                    child.path()
                );
            }
            return;
        }

        warn!(
            "Actor {} escalates the failure of {}: {}",
            &self.path,
            child.path(),
            error
        );
        let own = self.supervise(&error, ctx).await;
        let answer = match own {
            Directive::Resume => Directive::Resume,
            Directive::Restart => match A::children_on_restart() {
                ChildrenOnRestart::Restart => {
                    // Answered by `restart`, after the siblings.
                    self.escalated = Some((child, reply));
                    self.apply(own, error);
                    return;
                }
                ChildrenOnRestart::Keep => Directive::Resume,
            },
            Directive::Stop | Directive::Escalate => Directive::Stop,
        };
        if reply.send(answer).is_err() {
            warn!(
                "Child {} is no longer waiting for a directive.",
                child.path()
            );
        }
        self.apply(own, error);
    }

    /// Reports a failure of this actor and applies the resulting directive.
    async fn fail(&mut self, error: Error, ctx: &mut ActorContext<A>) {
        let directive = self.supervise(&error, ctx).await;
        self.apply(directive, error);
    }

    fn apply(&mut self, directive: Directive, error: Error) {
        debug!("Actor {} applies {:?}.", &self.path, directive);
        match directive {
            Directive::Resume => {
                if let Some((_, reply)) = self.escalated.take() {
                    let _ = reply.send(Directive::Resume);
                }
                self.lifecycle = ActorLifecycle::Running;
            }
            Directive::Restart => {
                self.failure = Some(error);
                self.lifecycle = ActorLifecycle::Restarting;
            }
            Directive::Stop | Directive::Escalate => {
                self.lifecycle = ActorLifecycle::Stopping;
            }
        }
    }

    /// Obtains the directive for a failure of this actor.
    async fn supervise(
        &mut self,
        error: &Error,
        ctx: &mut ActorContext<A>,
    ) -> Directive {
        let Some(parent) = self.parent.clone() else {
            let directive = match self.guardian.as_mut() {
                Some(guardian) => guardian.decide(&self.path, error),
                None => Directive::Stop,
            };
            if directive == Directive::Escalate {
                warn!(
                    "Actor {} has no supervisor to escalate to, stopping.",
                    &self.path
                );
                return Directive::Stop;
            }
            return directive;
        };

        let (reply, response) = oneshot::channel();
        let failed = SystemMessage::Failed {
            child: self.handle.clone(),
            error: error.clone(),
            restarts: self.restarts,
            reply,
        };
        if parent.send(failed).is_err() {
            warn!("Supervisor of actor {} is gone, stopping.", &self.path);
            return Directive::Stop;
        }
        self.await_directive(response, ctx).await
    }

    /// Waits for the supervisor, honouring its stop and restart requests meanwhile.
    ///
    /// A supervisor drops a report it already answered with a restart request, so a dropped
    /// report means that the request is on its way.
    async fn await_directive(
        &mut self,
        mut response: oneshot::Receiver<Directive>,
        ctx: &mut ActorContext<A>,
    ) -> Directive {
        debug!("Actor {} is waiting for its supervisor.", &self.path);
        let mut dropped = false;
        loop {
            select! {
                biased;
                directive = &mut response, if !dropped => {
                    match directive {
                        Ok(directive) => return directive,
                        Err(_) => {
                            if self
                                .parent
                                .as_ref()
                                .is_none_or(|parent| parent.is_terminated())
                            {
                                warn!("Supervisor of actor {} is gone, stopping.", &self.path);
                                return Directive::Stop;
                            }
                            debug!(
                                "Supervisor of actor {} dropped the failure, waiting for its request.",
                                &self.path
                            );
                            dropped = true;
                        }
                    }
                }
                message = self.system_receiver.recv() => {
                    match message {
                        Some(SystemMessage::Stop(ack)) => {
                            self.stop_acks.extend(ack);
                            return Directive::Stop;
                        }
                        Some(SystemMessage::Restart(_)) => {
                            self.restarts += 1;
                            return Directive::Restart;
                        }
                        Some(SystemMessage::Watch(watcher)) => {
                            if watcher != self.handle {
                                self.watchers.insert(watcher);
                            }
                        }
                        Some(SystemMessage::Unwatch(watcher)) => {
                            self.watchers.remove(&watcher);
                        }
                        Some(SystemMessage::ChildTerminated(child)) => {
                            ctx.remove_child(&child);
                            self.engine.forget(child.path());
                            self.restarts_sent.remove(&child);
                        }
                        Some(message) => self.deferred.push_back(message),
                        None => return Directive::Stop,
                    }
                }
            }
        }
    }

    /// Replaces the actor instance, keeping mailbox, context and children.
    async fn restart(
        &mut self,
        cause: &Error,
        ctx: &mut ActorContext<A>,
    ) -> Result<(), Error> {
        self.actor.pre_restart(ctx, cause).await?;

        let escalated = self.escalated.take();
        match A::children_on_restart() {
            ChildrenOnRestart::Restart => {
                for child in ctx.children() {
                    if escalated.as_ref().is_some_and(|(c, _)| c == child) {
                        continue;
                    }
                    debug!("Restarting child {}.", child.path());
                    if child.send(SystemMessage::Restart(cause.clone())).is_err()
                    {
                        debug!("Child {} is already gone.", child.path());
                        continue;
                    }
                    *self.restarts_sent.entry(child.clone()).or_default() += 1;
                }
            }
            ChildrenOnRestart::Keep => {
                debug!("Actor {} keeps its children.", &self.path);
            }
        }
        if let Some((child, reply)) = escalated {
            debug!("Restarting child {}.", child.path());
            let _ = reply.send(Directive::Restart);
        }

        self.actor = self.props.produce();
        self.actor.post_restart(ctx, cause).await
    }

    async fn stop(&mut self, ctx: &mut ActorContext<A>) {
        debug!("Actor {} is stopping.", &self.path);
        if let Err(error) = self.actor.pre_stop(ctx).await {
            error!("Actor {} failed to stop: {}", &self.path, error);
        }
        self.receiver.close();
        ctx.stop_children().await;
        if let Err(error) = self.actor.post_stop(ctx).await {
            error!("Actor {} failed after stop: {}", &self.path, error);
        }
    }

    /// Unregisters the actor and notifies everyone interested in its termination.
    async fn terminate(&mut self, ctx: &mut ActorContext<A>) {
        ctx.system().remove_actor(&self.path).await;
        self.system_receiver.close();

        for watcher in self.watchers.drain() {
            let _ = watcher.send(SystemMessage::Terminated(self.handle.clone()));
        }
        while let Ok(message) = self.system_receiver.try_recv() {
            match message {
                SystemMessage::Watch(watcher) => {
                    let _ = watcher
                        .send(SystemMessage::Terminated(self.handle.clone()));
                }
                SystemMessage::Stop(ack) => self.stop_acks.extend(ack),
                _ => {}
            }
        }
        self.deferred.clear();
        self.escalated = None;

        if let Some(parent) = &self.parent {
            let _ = parent.send(SystemMessage::ChildTerminated(self.handle.clone()));
        }
        self.handle.mark_terminated();

        for ack in self.stop_acks.drain(..) {
            let _ = ack.send(());
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::{
        actor::{Message, Response},
        supervision::SupervisionStrategy,
        system::ActorSystem,
    };

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    #[derive(Debug, Clone)]
    struct TestActor {
        fail_start: bool,
        value: usize,
    }

    #[derive(Debug, Clone)]
    enum TestMessage {
        Set(usize),
        Get,
        Fail,
    }

    impl Message for TestMessage {}

    #[derive(Debug, Clone, PartialEq)]
    struct TestResponse(usize);

    impl Response for TestResponse {}

    #[async_trait]
    impl Actor for TestActor {
        type Message = TestMessage;
        type Response = TestResponse;

        async fn pre_start(
            &mut self,
            _ctx: &mut ActorContext<Self>,
        ) -> Result<(), Error> {
            if self.fail_start {
                Err(Error::Start("pre_start failed".to_owned()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Handler<TestActor> for TestActor {
        async fn handle_message(
            &mut self,
            _sender: ActorPath,
            msg: TestMessage,
            _ctx: &mut ActorContext<TestActor>,
        ) -> Result<TestResponse, Error> {
            match msg {
                TestMessage::Set(value) => self.value = value,
                TestMessage::Get => {}
                TestMessage::Fail => {
                    return Err(Error::Failure("boom".to_owned()));
                }
            }
            Ok(TestResponse(self.value))
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_root_failure_uses_guardian() {
        let (system, _runner) = ActorSystem::create(CancellationToken::new());
        let actor_ref = system
            .create_root_actor(
                "test",
                TestActor {
                    fail_start: false,
                    value: 0,
                },
            )
            .await
            .unwrap();

        actor_ref.tell(TestMessage::Set(42)).await.unwrap();
        actor_ref.tell(TestMessage::Fail).await.unwrap();
        let response = actor_ref.ask(TestMessage::Get).await.unwrap();
        assert_eq!(response, TestResponse(0));

        assert!(logs_contain("Initializing actor /user/test runner"));
        assert!(logs_contain("Actor /user/test failed: Actor failure: boom"));
        assert!(logs_contain("Actor /user/test is restarting"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_root_start_failure_stops() {
        let (system, _runner) = ActorSystem::create(CancellationToken::new());
        let actor_ref = system
            .create_root_actor(
                "test",
                TestActor {
                    fail_start: true,
                    value: 0,
                },
            )
            .await
            .unwrap();

        actor_ref.terminated().await;
        assert!(actor_ref.is_closed());
        assert!(
            system
                .get_actor::<TestActor>(&ActorPath::from("/user/test"))
                .await
                .is_none()
        );
        assert!(logs_contain("Actor /user/test failed to start"));
        assert!(logs_contain("Actor /user/test is terminated"));
    }

    #[tokio::test]
    async fn test_guardian_resume_keeps_state() {
        let (system, _runner) = ActorSystem::create_with_guardian(
            CancellationToken::new(),
            SupervisionStrategy::always(Directive::Resume),
        );
        let actor_ref = system
            .create_root_actor(
                "test",
                TestActor {
                    fail_start: false,
                    value: 0,
                },
            )
            .await
            .unwrap();

        actor_ref.tell(TestMessage::Set(42)).await.unwrap();
        assert!(actor_ref.ask(TestMessage::Fail).await.is_err());
        let response = actor_ref.ask(TestMessage::Get).await.unwrap();
        assert_eq!(response, TestResponse(42));
    }

    #[tokio::test]
    async fn test_guardian_escalate_stops() {
        let (system, _runner) = ActorSystem::create_with_guardian(
            CancellationToken::new(),
            SupervisionStrategy::always(Directive::Escalate),
        );
        let actor_ref = system
            .create_root_actor(
                "test",
                TestActor {
                    fail_start: false,
                    value: 0,
                },
            )
            .await
            .unwrap();

        actor_ref.tell(TestMessage::Fail).await.unwrap();
        actor_ref.terminated().await;
        assert!(actor_ref.tell(TestMessage::Get).await.is_err());
    }
}
