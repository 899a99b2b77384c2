//! Orchestrator run loop
//!
//! One orchestrator instance drives one scenario run: it subscribes the
//! scenario's topics, arms the hard timeout, invokes setup, then dispatches
//! timers and notifications one at a time in a single total order until the
//! completion predicate holds, the hard timeout fires, a handler requests
//! failure, or a handler errors. Whatever ends the run, teardown is the
//! same: every subscription is released and every outstanding timer is
//! cancelled before the outcome is returned.
//!
//! Concurrent runs are independent orchestrator instances; they never share
//! queue, subscription, or scenario state, even when they observe the same
//! underlying bus.

use crate::bus::{NotificationBus, SubscriptionId};
use crate::error::HarnessError;
use crate::report::{Trail, TrailEvent};
use crate::scenario::{RunContext, Scenario, ScenarioState};
use crate::timer::{TimerKind, TimerService};
use std::fmt;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Terminal outcome of a run; produced exactly once
#[derive(Debug)]
pub enum RunResult {
    /// The completion predicate became true
    Success,
    /// A handler requested failure with a reason
    Failure(String),
    /// The hard timeout fired before the predicate held
    Timeout,
    /// A handler or the transport reported an error
    Error(HarnessError),
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Success)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RunResult::Timeout)
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunResult::Success => write!(f, "success"),
            RunResult::Failure(reason) => write!(f, "failure: {}", reason),
            RunResult::Timeout => write!(f, "timeout"),
            RunResult::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// Everything a terminated run leaves behind
#[derive(Debug)]
pub struct RunOutcome {
    pub result: RunResult,
    /// Final scenario state, for the verdict reporter
    pub state: ScenarioState,
    /// Ordered record of every dispatched event
    pub trail: Trail,
    pub elapsed: Duration,
}

/// Drives scenario runs against one notification bus
pub struct Orchestrator<'a, B: NotificationBus> {
    bus: &'a mut B,
}

impl<'a, B: NotificationBus> Orchestrator<'a, B> {
    pub fn new(bus: &'a mut B) -> Self {
        Self { bus }
    }

    /// Execute one scenario to its terminal outcome
    ///
    /// Never returns early: subscribe failures, handler errors, and
    /// timeouts all surface as `RunResult` variants after full teardown,
    /// so no subscription or timer can outlive the run.
    pub async fn run(&mut self, scenario: Scenario, hard_timeout: Duration) -> RunOutcome {
        let Scenario {
            name,
            mut registrations,
            setup,
            satisfied,
        } = scenario;

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut state = ScenarioState::new(&name);
        let mut trail = Trail::default();
        let mut timers = TimerService::new();
        let mut subscriptions: Vec<SubscriptionId> = Vec::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        debug!(
            "[{}] run {} starting (hard timeout {:?})",
            name, run_id, hard_timeout
        );
        trail.record(Duration::ZERO, TrailEvent::Start, format!("run {}", run_id));

        let result: RunResult = 'run: {
            // The hard timeout is armed before anything else can happen, so
            // forward progress is unconditional from here on.
            if let Err(e) = timers.arm_hard_timeout(hard_timeout) {
                break 'run RunResult::Error(e);
            }

            // One bus subscription per distinct topic; fan-out to multiple
            // handlers happens at dispatch, preserving registration order.
            let mut topics: Vec<String> = Vec::new();
            for (topic, _) in &registrations {
                if !topics.contains(topic) {
                    topics.push(topic.clone());
                }
            }
            let mut subscribe_error: Option<HarnessError> = None;
            for topic in &topics {
                match self.bus.subscribe(topic, tx.clone()).await {
                    Ok(id) => subscriptions.push(id),
                    Err(e) => {
                        subscribe_error = Some(e);
                        break;
                    }
                }
            }
            if let Some(e) = subscribe_error {
                break 'run RunResult::Error(e);
            }

            if let Some(setup_fn) = setup {
                trail.record(started.elapsed(), TrailEvent::Setup, "");
                let mut ctx = RunContext::new(&mut timers);
                match setup_fn(&mut state, &mut ctx) {
                    Ok(()) => {
                        if let Some(reason) = ctx.take_failure() {
                            break 'run RunResult::Failure(reason);
                        }
                    }
                    Err(e) => break 'run RunResult::Error(e),
                }
            }

            loop {
                // Completion check before blocking again: once the
                // predicate holds, nothing further is dispatched.
                if (satisfied)(&state) {
                    break 'run RunResult::Success;
                }

                // Due timers dispatch ahead of queued notifications.
                if let Some(due) = timers.pop_due(Instant::now()) {
                    match due.kind {
                        TimerKind::HardTimeout => {
                            warn!("[{}] hard timeout after {:?}", name, started.elapsed());
                            trail.record(started.elapsed(), TrailEvent::HardTimeout, "");
                            break 'run RunResult::Timeout;
                        }
                        TimerKind::Scheduled => {
                            debug!("[{}] timer fired: {}", name, due.label);
                            trail.record(
                                started.elapsed(),
                                TrailEvent::Timer {
                                    label: due.label.clone(),
                                },
                                "",
                            );
                            if let Some(callback) = due.callback {
                                let mut ctx = RunContext::new(&mut timers);
                                match callback(&mut state, &mut ctx) {
                                    Ok(()) => {
                                        if let Some(reason) = ctx.take_failure() {
                                            break 'run RunResult::Failure(reason);
                                        }
                                    }
                                    Err(e) => break 'run RunResult::Error(e),
                                }
                            }
                            continue;
                        }
                    }
                }

                let deadline = timers.next_deadline();
                tokio::select! {
                    biased;
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        // Woke for a timer; the loop top pops it.
                    }
                    maybe_note = rx.recv() => {
                        let Some(note) = maybe_note else {
                            break 'run RunResult::Error(HarnessError::Transport(
                                "notification channel closed".to_string(),
                            ));
                        };
                        debug!("[{}] notification: {} {}", name, note.topic, note.payload);
                        trail.record(
                            started.elapsed(),
                            TrailEvent::Notification {
                                topic: note.topic.clone(),
                            },
                            note.payload.to_string(),
                        );

                        let mut terminal: Option<RunResult> = None;
                        for (topic, handler) in registrations.iter_mut() {
                            if *topic != note.topic {
                                continue;
                            }
                            let mut ctx = RunContext::new(&mut timers);
                            match handler(&mut state, &mut ctx, &note) {
                                Ok(()) => {
                                    if let Some(reason) = ctx.take_failure() {
                                        terminal = Some(RunResult::Failure(reason));
                                        break;
                                    }
                                    // Checked after every handler; once
                                    // satisfied, later handlers for this
                                    // notification do not run.
                                    if (satisfied)(&state) {
                                        terminal = Some(RunResult::Success);
                                        break;
                                    }
                                }
                                Err(e) => {
                                    terminal = Some(RunResult::Error(e));
                                    break;
                                }
                            }
                        }
                        if let Some(r) = terminal {
                            break 'run r;
                        }
                    }
                }
            }
        };

        // Single teardown path for every outcome: release all subscriptions
        // and drop all outstanding timers.
        for id in subscriptions.drain(..) {
            if let Err(e) = self.bus.unsubscribe(id).await {
                warn!("[{}] unsubscribe failed for {}: {}", name, id, e);
            }
        }
        timers.clear();

        trail.record(started.elapsed(), TrailEvent::End, result.to_string());
        debug!("[{}] run {} finished: {}", name, run_id, result);

        RunOutcome {
            result,
            state,
            trail,
            elapsed: started.elapsed(),
        }
    }
}
