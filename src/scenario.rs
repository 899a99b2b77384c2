//! Scenario state machine
//!
//! A scenario is the per-test definition of which notifications and timers
//! matter and what combination of them constitutes success. State is an open
//! set of named boolean flags plus captured values (for data learned from
//! one notification and needed by a later step, e.g. a peer address); the
//! completion predicate over that state is the single source of truth for
//! "done" and is consulted by the orchestrator after every dispatched
//! handler.
//!
//! Scenarios are assembled from plain closures (handlers, a one-shot setup,
//! the predicate) rather than by subclassing a common base. Handlers run to
//! completion before the next event is dispatched; requests against the
//! system under test are issued fire-and-continue, with the reply awaited
//! as its own notification.

use crate::bus::Notification;
use crate::error::HarnessResult;
use crate::timer::{TimerHandle, TimerService};
use std::collections::HashMap;
use tokio::time::Duration;
use tracing::debug;

/// Handler invoked for each notification on a registered topic
pub type NotificationHandler = Box<
    dyn FnMut(&mut ScenarioState, &mut RunContext<'_>, &Notification) -> HarnessResult<()> + Send,
>;

/// One-shot action invoked before the dispatch loop first blocks
pub type SetupFn =
    Box<dyn FnOnce(&mut ScenarioState, &mut RunContext<'_>) -> HarnessResult<()> + Send>;

/// One-shot callable fired by the timer service
pub type TimerCallback =
    Box<dyn FnOnce(&mut ScenarioState, &mut RunContext<'_>) -> HarnessResult<()> + Send>;

/// Completion predicate over scenario state
pub type Predicate = Box<dyn Fn(&ScenarioState) -> bool + Send>;

/// Mutable per-run state: named flags plus captured values
///
/// Created immediately before a run starts, mutated only by handlers on the
/// orchestration task, read once at loop exit, and discarded with the run.
#[derive(Debug)]
pub struct ScenarioState {
    name: String,
    flags: HashMap<String, bool>,
    captured: HashMap<String, serde_json::Value>,
}

impl ScenarioState {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            flags: HashMap::new(),
            captured: HashMap::new(),
        }
    }

    /// Scenario name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set a named flag
    pub fn set(&mut self, flag: &str) {
        debug!("[{}] flag set: {}", self.name, flag);
        self.flags.insert(flag.to_string(), true);
    }

    /// Clear a named flag
    pub fn clear(&mut self, flag: &str) {
        debug!("[{}] flag cleared: {}", self.name, flag);
        self.flags.insert(flag.to_string(), false);
    }

    /// Read a flag; flags never set read as false
    pub fn is_set(&self, flag: &str) -> bool {
        self.flags.get(flag).copied().unwrap_or(false)
    }

    /// True when every listed flag is set
    pub fn all_set(&self, flags: &[&str]) -> bool {
        flags.iter().all(|f| self.is_set(f))
    }

    /// Store a value learned from a notification
    pub fn capture(&mut self, key: &str, value: serde_json::Value) {
        debug!("[{}] captured {}: {}", self.name, key, value);
        self.captured.insert(key.to_string(), value);
    }

    /// Read back a captured value
    pub fn captured(&self, key: &str) -> Option<&serde_json::Value> {
        self.captured.get(key)
    }

    /// Read back a captured value as a string slice
    pub fn captured_str(&self, key: &str) -> Option<&str> {
        self.captured.get(key).and_then(|v| v.as_str())
    }
}

/// Capabilities available to handlers and timer callbacks during dispatch
///
/// Lets a handler schedule follow-up timers (multi-phase scenarios: wait
/// after event A, then perform step B) and request termination with a
/// failure reason without raising an error.
pub struct RunContext<'a> {
    timers: &'a mut TimerService,
    failure: Option<String>,
}

impl<'a> RunContext<'a> {
    pub(crate) fn new(timers: &'a mut TimerService) -> Self {
        Self {
            timers,
            failure: None,
        }
    }

    /// Schedule a one-shot timer `delay` from now
    pub fn after<F>(&mut self, delay: Duration, label: &str, callback: F) -> TimerHandle
    where
        F: FnOnce(&mut ScenarioState, &mut RunContext<'_>) -> HarnessResult<()> + Send + 'static,
    {
        self.timers.after(delay, label, Box::new(callback))
    }

    /// Cancel a previously scheduled timer; a no-op after it fired
    pub fn cancel_timer(&mut self, handle: TimerHandle) {
        self.timers.cancel(handle);
    }

    /// End the run with `RunResult::Failure(reason)` once this handler returns
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!("failure requested: {}", reason);
        self.failure = Some(reason);
    }

    pub(crate) fn take_failure(&mut self) -> Option<String> {
        self.failure.take()
    }
}

/// A runnable scenario: topic registrations, optional setup, and the
/// completion predicate
pub struct Scenario {
    pub(crate) name: String,
    pub(crate) registrations: Vec<(String, NotificationHandler)>,
    pub(crate) setup: Option<SetupFn>,
    pub(crate) satisfied: Predicate,
}

impl Scenario {
    /// Start building a scenario
    pub fn builder(name: &str) -> ScenarioBuilder {
        ScenarioBuilder {
            name: name.to_string(),
            registrations: Vec::new(),
            setup: None,
        }
    }

    /// Scenario name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topics this scenario listens on, in registration order
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.registrations.iter().map(|(t, _)| t.as_str())
    }
}

/// Builder for [`Scenario`]
///
/// The completion predicate is mandatory: only `satisfied_when` produces a
/// runnable scenario.
pub struct ScenarioBuilder {
    name: String,
    registrations: Vec<(String, NotificationHandler)>,
    setup: Option<SetupFn>,
}

impl ScenarioBuilder {
    /// Register a handler for a topic
    ///
    /// Multiple handlers may share one topic; they are invoked in
    /// registration order.
    pub fn on<F>(mut self, topic: &str, handler: F) -> Self
    where
        F: FnMut(&mut ScenarioState, &mut RunContext<'_>, &Notification) -> HarnessResult<()>
            + Send
            + 'static,
    {
        self.registrations.push((topic.to_string(), Box::new(handler)));
        self
    }

    /// Set the one-shot setup action that kicks off the scenario
    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut ScenarioState, &mut RunContext<'_>) -> HarnessResult<()> + Send + 'static,
    {
        self.setup = Some(Box::new(f));
        self
    }

    /// Supply the completion predicate and finish the scenario
    pub fn satisfied_when<F>(self, predicate: F) -> Scenario
    where
        F: Fn(&ScenarioState) -> bool + Send + 'static,
    {
        Scenario {
            name: self.name,
            registrations: self.registrations,
            setup: self.setup,
            satisfied: Box::new(predicate),
        }
    }
}
