//! Run verdicts and the diagnostic trail
//!
//! Every dispatched event in a run is recorded in order; on failure the
//! trail is the primary debugging artifact, showing which notifications and
//! timers fired and when. The reporter maps a terminal run outcome onto a
//! pass/fail/skip verdict; whether a timeout means "feature broken" or
//! "feature not supported" is the caller's choice.

use crate::orchestrator::{RunOutcome, RunResult};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Duration;

/// What a trail entry records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrailEvent {
    /// Run started
    Start,
    /// Setup action invoked
    Setup,
    /// A notification was dispatched
    Notification { topic: String },
    /// A scheduled timer fired
    Timer { label: String },
    /// The hard timeout fired
    HardTimeout,
    /// Terminal outcome recorded
    End,
}

impl fmt::Display for TrailEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrailEvent::Start => write!(f, "start"),
            TrailEvent::Setup => write!(f, "setup"),
            TrailEvent::Notification { topic } => write!(f, "notification {}", topic),
            TrailEvent::Timer { label } => write!(f, "timer {}", label),
            TrailEvent::HardTimeout => write!(f, "hard timeout"),
            TrailEvent::End => write!(f, "end"),
        }
    }
}

/// One dispatched event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailEntry {
    /// Position in the run's total event order
    pub seq: u64,
    /// Offset from run start
    pub offset_ms: u64,
    pub event: TrailEvent,
    /// Free-form detail (payload, reason)
    pub detail: String,
}

/// Chronological record of everything a run dispatched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trail {
    entries: Vec<TrailEntry>,
}

impl Trail {
    pub(crate) fn record(&mut self, offset: Duration, event: TrailEvent, detail: impl Into<String>) {
        let seq = self.entries.len() as u64;
        self.entries.push(TrailEntry {
            seq,
            offset_ms: offset.as_millis() as u64,
            event,
            detail: detail.into(),
        });
    }

    /// Entries in dispatch order
    pub fn entries(&self) -> &[TrailEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Topics of all dispatched notifications, in order
    pub fn notification_topics(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|e| match &e.event {
                TrailEvent::Notification { topic } => Some(topic.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Structured pass/fail judgement for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Fail(String),
    Skip(String),
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail(reason) => write!(f, "FAIL: {}", reason),
            Verdict::Skip(reason) => write!(f, "SKIP: {}", reason),
        }
    }
}

/// Verdict plus the diagnostic trail for one terminated run
#[derive(Debug, Clone)]
pub struct Report {
    pub scenario: String,
    pub verdict: Verdict,
    pub elapsed_ms: u64,
    pub finished_at: DateTime<Local>,
    pub trail: Trail,
}

impl Report {
    /// Judge an outcome; a timeout counts as a failure
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        let verdict = match &outcome.result {
            RunResult::Success => Verdict::Pass,
            RunResult::Failure(reason) => Verdict::Fail(reason.clone()),
            RunResult::Timeout => {
                Verdict::Fail("scenario not satisfied within hard timeout".to_string())
            }
            RunResult::Error(e) => Verdict::Fail(e.to_string()),
        };
        Self::build(outcome, verdict)
    }

    /// Judge an outcome; a timeout counts as a skip
    ///
    /// For probing optional daemon features, where "the notification never
    /// came" means unsupported rather than broken.
    pub fn timeout_as_skip(outcome: &RunOutcome, reason: &str) -> Self {
        let verdict = match &outcome.result {
            RunResult::Timeout => Verdict::Skip(reason.to_string()),
            _ => return Self::from_outcome(outcome),
        };
        Self::build(outcome, verdict)
    }

    fn build(outcome: &RunOutcome, verdict: Verdict) -> Self {
        Self {
            scenario: outcome.state.name().to_string(),
            verdict,
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            finished_at: Local::now(),
            trail: outcome.trail.clone(),
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// Human-readable report with the full trail
    pub fn render(&self) -> String {
        let mut out = format!(
            "scenario '{}': {} ({} ms, finished {})\n",
            self.scenario,
            self.verdict,
            self.elapsed_ms,
            self.finished_at.format("%Y-%m-%d %H:%M:%S"),
        );
        out.push_str("trail:\n");
        for entry in self.trail.entries() {
            out.push_str(&format!(
                "  [{:3}] +{:>6}ms  {}",
                entry.seq, entry.offset_ms, entry.event
            ));
            if !entry.detail.is_empty() {
                out.push_str(&format!("  {}", entry.detail));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trail_preserves_dispatch_order() {
        let mut trail = Trail::default();
        trail.record(Duration::from_millis(0), TrailEvent::Start, "");
        trail.record(
            Duration::from_millis(5),
            TrailEvent::Notification {
                topic: "Event".to_string(),
            },
            "",
        );
        trail.record(
            Duration::from_millis(9),
            TrailEvent::Timer {
                label: "step_b".to_string(),
            },
            "",
        );

        let seqs: Vec<u64> = trail.entries().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(trail.notification_topics(), vec!["Event"]);
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(Verdict::Pass.to_string(), "PASS");
        assert_eq!(
            Verdict::Fail("boom".to_string()).to_string(),
            "FAIL: boom"
        );
        assert_eq!(
            Verdict::Skip("not supported".to_string()).to_string(),
            "SKIP: not supported"
        );
    }
}
