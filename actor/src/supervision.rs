// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Supervision strategies
//!
//! A [`SupervisionStrategy`] maps a failure to a [`Directive`] and bounds how many failures a
//! child may have within a time window. The [`StrategyEngine`] holds the per-child failure
//! counters of one supervisor and is the only place where they change.
//!

use crate::{ActorPath, Error};

use tokio::time::Instant;
use tracing::{debug, warn};

use std::{
    collections::HashMap,
    fmt::{Debug, Formatter},
    sync::Arc,
    time::Duration,
};

/// Outcome of a fault-handling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    /// Keep the child and its state, continue with the next message.
    Resume,
    /// Replace the child instance, keeping its mailbox.
    Restart,
    /// Terminate the child.
    Stop,
    /// Fail the supervisor itself with the same error.
    Escalate,
}

/// What happens to the children of an actor when that actor is restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildrenOnRestart {
    /// Every child is restarted as well.
    #[default]
    Restart,
    /// Children keep running untouched.
    Keep,
}

/// Decision function. Returning `None` means the failure kind is not handled here and it
/// is escalated.
pub type Decider = Arc<dyn Fn(&Error) -> Option<Directive> + Send + Sync>;

/// Decider used when no other is configured.
pub fn default_decider(error: &Error) -> Option<Directive> {
    match error {
        Error::Start(_) | Error::Killed | Error::Recovery(_) => {
            Some(Directive::Stop)
        }
        _ => Some(Directive::Restart),
    }
}

/// Fault handling configuration that an actor declares for its direct children.
#[derive(Clone)]
pub struct SupervisionStrategy {
    decider: Decider,
    max_retries: Option<usize>,
    within: Option<Duration>,
}

impl SupervisionStrategy {
    /// Creates a strategy without retry limits.
    pub fn new<F>(decider: F) -> Self
    where
        F: Fn(&Error) -> Option<Directive> + Send + Sync + 'static,
    {
        Self {
            decider: Arc::new(decider),
            max_retries: None,
            within: None,
        }
    }

    /// Strategy that answers every failure with the same directive.
    pub fn always(directive: Directive) -> Self {
        Self::new(move |_| Some(directive))
    }

    /// Children failing more than `max_retries` times are stopped.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Failures are only counted within this window.
    pub fn within(mut self, window: Duration) -> Self {
        self.within = Some(window);
        self
    }

    pub fn max_retries(&self) -> Option<usize> {
        self.max_retries
    }

    pub fn window(&self) -> Option<Duration> {
        self.within
    }

    /// Evaluates the decider alone, without any bookkeeping.
    pub fn directive(&self, error: &Error) -> Directive {
        (self.decider)(error).unwrap_or(Directive::Escalate)
    }
}

impl Default for SupervisionStrategy {
    fn default() -> Self {
        Self::new(default_decider)
    }
}

impl Debug for SupervisionStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisionStrategy")
            .field("max_retries", &self.max_retries)
            .field("within", &self.within)
            .finish()
    }
}

/// Failure bookkeeping for a single child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureCounter {
    count: usize,
    window_start: Option<Instant>,
}

impl FailureCounter {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: None,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Applies a [`SupervisionStrategy`] for the children of one supervisor.
#[derive(Debug)]
pub struct StrategyEngine {
    strategy: SupervisionStrategy,
    counters: HashMap<ActorPath, FailureCounter>,
}

impl StrategyEngine {
    pub fn new(strategy: SupervisionStrategy) -> Self {
        Self {
            strategy,
            counters: HashMap::new(),
        }
    }

    pub fn strategy(&self) -> &SupervisionStrategy {
        &self.strategy
    }

    /// Records a failure of `child` and returns the directive to apply.
    pub fn decide(&mut self, child: &ActorPath, error: &Error) -> Directive {
        self.decide_at(child, error, Instant::now())
    }

    pub(crate) fn decide_at(
        &mut self,
        child: &ActorPath,
        error: &Error,
        now: Instant,
    ) -> Directive {
        let counter = self
            .counters
            .entry(child.clone())
            .or_insert_with(FailureCounter::new);

        if let (Some(window), Some(start)) =
            (self.strategy.within, counter.window_start)
        {
            if now.duration_since(start) > window {
                debug!("Failure window of {} elapsed, resetting.", child);
                *counter = FailureCounter::new();
            }
        }
        if counter.window_start.is_none() {
            counter.window_start = Some(now);
        }
        counter.count += 1;

        if let Some(max_retries) = self.strategy.max_retries {
            if counter.count > max_retries {
                warn!(
                    "Actor {} failed {} times, retries exhausted.",
                    child, counter.count
                );
                return Directive::Stop;
            }
        }

        let directive = self.strategy.directive(error);
        debug!("Directive for {} on '{}': {:?}", child, error, directive);
        directive
    }

    /// Current counter of a child, if it ever failed.
    pub fn counter(&self, child: &ActorPath) -> Option<FailureCounter> {
        self.counters.get(child).copied()
    }

    /// Drops the bookkeeping of a terminated child.
    pub fn forget(&mut self, child: &ActorPath) {
        self.counters.remove(child);
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn child() -> ActorPath {
        ActorPath::from("/user/supervisor/child")
    }

    fn by_reason(error: &Error) -> Option<Directive> {
        match error {
            Error::Failure(reason) if reason == "resume" => {
                Some(Directive::Resume)
            }
            Error::Failure(reason) if reason == "restart" => {
                Some(Directive::Restart)
            }
            Error::Failure(reason) if reason == "stop" => Some(Directive::Stop),
            _ => None,
        }
    }

    #[test]
    fn test_default_decider() {
        let strategy = SupervisionStrategy::default();
        assert_eq!(
            strategy.directive(&Error::Start("boom".to_owned())),
            Directive::Stop
        );
        assert_eq!(strategy.directive(&Error::Killed), Directive::Stop);
        assert_eq!(
            strategy.directive(&Error::Recovery("read".to_owned())),
            Directive::Stop
        );
        assert_eq!(
            strategy.directive(&Error::Failure("any".to_owned())),
            Directive::Restart
        );
    }

    #[test]
    fn test_unmatched_kind_escalates() {
        let mut engine = StrategyEngine::new(SupervisionStrategy::new(by_reason));
        assert_eq!(
            engine.decide(&child(), &Error::Store("disk".to_owned())),
            Directive::Escalate
        );
    }

    #[test]
    fn test_directive_is_deterministic() {
        let error = Error::Failure("resume".to_owned());
        let mut first = StrategyEngine::new(SupervisionStrategy::new(by_reason));
        let mut second = StrategyEngine::new(SupervisionStrategy::new(by_reason));
        let now = Instant::now();
        for _ in 0..5 {
            assert_eq!(
                first.decide_at(&child(), &error, now),
                second.decide_at(&child(), &error, now)
            );
        }
        assert_eq!(first.counter(&child()), second.counter(&child()));
    }

    #[test]
    fn test_retry_budget_forces_stop() {
        let strategy = SupervisionStrategy::always(Directive::Resume)
            .with_max_retries(2)
            .within(Duration::from_secs(60));
        assert_eq!(strategy.max_retries(), Some(2));
        assert_eq!(strategy.window(), Some(Duration::from_secs(60)));
        let mut engine = StrategyEngine::new(strategy);
        let error = Error::Failure("resume".to_owned());
        let start = Instant::now();

        let directives: Vec<Directive> = (0..3)
            .map(|i| {
                engine.decide_at(&child(), &error, start + Duration::from_secs(i))
            })
            .collect();
        assert_eq!(
            directives,
            vec![Directive::Resume, Directive::Resume, Directive::Stop]
        );
    }

    #[test]
    fn test_window_reset() {
        let strategy = SupervisionStrategy::always(Directive::Restart)
            .with_max_retries(1)
            .within(Duration::from_secs(10));
        let mut engine = StrategyEngine::new(strategy);
        let error = Error::Failure("restart".to_owned());
        let start = Instant::now();

        assert_eq!(engine.decide_at(&child(), &error, start), Directive::Restart);
        assert_eq!(
            engine.decide_at(&child(), &error, start + Duration::from_secs(11)),
            Directive::Restart
        );
        assert_eq!(engine.counter(&child()).map(|c| c.count()), Some(1));
        assert_eq!(
            engine.decide_at(&child(), &error, start + Duration::from_secs(12)),
            Directive::Stop
        );
    }

    #[test]
    fn test_counters_are_per_child() {
        let strategy =
            SupervisionStrategy::always(Directive::Restart).with_max_retries(1);
        let mut engine = StrategyEngine::new(strategy);
        let other = ActorPath::from("/user/supervisor/other");
        let error = Error::Failure("restart".to_owned());

        assert_eq!(engine.decide(&child(), &error), Directive::Restart);
        assert_eq!(engine.decide(&other, &error), Directive::Restart);
        assert_eq!(engine.decide(&child(), &error), Directive::Stop);

        engine.forget(&child());
        assert!(engine.counter(&child()).is_none());
        assert_eq!(engine.decide(&child(), &error), Directive::Restart);
    }

    #[test]
    fn test_without_window_failures_accumulate() {
        let strategy =
            SupervisionStrategy::always(Directive::Resume).with_max_retries(2);
        let mut engine = StrategyEngine::new(strategy);
        let error = Error::Failure("resume".to_owned());
        let start = Instant::now();
        engine.decide_at(&child(), &error, start);
        engine.decide_at(&child(), &error, start + Duration::from_secs(3600));
        assert_eq!(
            engine.decide_at(&child(), &error, start + Duration::from_secs(7200)),
            Directive::Stop
        );
    }
}
