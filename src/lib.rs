//! wlharness - Wireless Daemon Test Orchestration Harness
//!
//! Async event-driven harness for conformance testing of a wireless network
//! manager daemon, providing:
//! - Notification bus abstraction (D-Bus signals or any event source)
//! - One-shot timer service with a per-run hard timeout
//! - Scenario state machines built from plain closures
//! - A single-dispatch run loop with guaranteed teardown
//! - Pass/fail/skip verdicts with a chronological diagnostic trail
//!
//! A scenario registers topic handlers, a setup action, and a completion
//! predicate; the orchestrator dispatches notifications and timers in one
//! total order until the predicate holds or the hard timeout fires.

pub mod error;
pub mod bus;
pub mod timer;
pub mod scenario;
pub mod orchestrator;
pub mod report;
pub mod config;

#[cfg(feature = "dbus")]
pub mod dbus_bus;

// Re-export commonly used types
pub use error::{HarnessError, HarnessResult};
pub use bus::{LocalBus, Notification, NotificationBus, Publisher, SubscriptionId};
pub use timer::{TimerHandle, TimerService};
pub use scenario::{RunContext, Scenario, ScenarioBuilder, ScenarioState};
pub use orchestrator::{Orchestrator, RunOutcome, RunResult};
pub use report::{Report, Trail, TrailEntry, TrailEvent, Verdict};
pub use config::HarnessConfig;

#[cfg(feature = "dbus")]
pub use dbus_bus::DbusBus;
