//! Orchestrator integration tests
//!
//! Exercise the run loop end to end over a LocalBus: teardown totality,
//! single terminal outcome, timeout dominance, order preservation, and the
//! multi-phase scenarios the harness exists for.

use libwlharness::bus::LocalBus;
use libwlharness::error::HarnessError;
use libwlharness::orchestrator::{Orchestrator, RunResult};
use libwlharness::scenario::Scenario;
use libwlharness::timer::TimerHandle;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};

#[tokio::test]
async fn test_two_flags_satisfied_in_either_order() {
    let mut bus = LocalBus::new();
    let publisher = bus.publisher();

    // Deliver the "second" event first; completion must not depend on order
    tokio::spawn(async move {
        sleep(Duration::from_millis(10)).await;
        publisher.emit("wps.Credentials", json!({"ssid": "test-ap"})).await;
        publisher.emit("wps.Event", json!(["success", {}])).await;
    });

    let scenario = Scenario::builder("wps_pbc")
        .on("wps.Event", |state, _ctx, note| {
            if note.payload[0] == json!("success") {
                state.set("success_seen");
            }
            Ok(())
        })
        .on("wps.Credentials", |state, _ctx, note| {
            state.capture("credentials", note.payload.clone());
            state.set("credentials_received");
            Ok(())
        })
        .satisfied_when(|state| state.all_set(&["success_seen", "credentials_received"]));

    let outcome = Orchestrator::new(&mut bus)
        .run(scenario, Duration::from_secs(5))
        .await;

    assert!(outcome.result.is_success(), "got {}", outcome.result);
    assert!(outcome.state.is_set("success_seen"));
    assert!(outcome.state.is_set("credentials_received"));
    assert_eq!(
        outcome.state.captured("credentials").unwrap()["ssid"],
        json!("test-ap")
    );
    // Teardown totality
    assert_eq!(bus.subscription_count().await, 0);
}

#[tokio::test]
async fn test_timeout_when_predicate_never_holds() {
    let mut bus = LocalBus::new();

    let scenario = Scenario::builder("never_done")
        .on("some.Event", |_, _, _| Ok(()))
        .satisfied_when(|_| false);

    let started = std::time::Instant::now();
    let outcome = Orchestrator::new(&mut bus)
        .run(scenario, Duration::from_millis(50))
        .await;
    let elapsed = started.elapsed();

    assert!(outcome.result.is_timeout(), "got {}", outcome.result);
    assert!(elapsed >= Duration::from_millis(45), "returned too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(500), "returned too late: {:?}", elapsed);
    assert_eq!(bus.subscription_count().await, 0);
}

#[tokio::test]
async fn test_handler_error_aborts_with_teardown() {
    let mut bus = LocalBus::new();
    let publisher = bus.publisher();

    tokio::spawn(async move {
        sleep(Duration::from_millis(5)).await;
        publisher.emit("iface.State", json!("failed")).await;
    });

    let scenario = Scenario::builder("strict")
        .on("iface.State", |_, _, note| {
            Err(HarnessError::Assertion(format!(
                "unexpected state {}",
                note.payload
            )))
        })
        .satisfied_when(|_| false);

    let outcome = Orchestrator::new(&mut bus)
        .run(scenario, Duration::from_secs(5))
        .await;

    match &outcome.result {
        RunResult::Error(e) => assert!(e.to_string().contains("unexpected state")),
        other => panic!("expected error, got {}", other),
    }
    assert_eq!(bus.subscription_count().await, 0);
}

#[tokio::test]
async fn test_multi_phase_completion_via_timer() {
    let mut bus = LocalBus::new();
    let publisher = bus.publisher();

    tokio::spawn(async move {
        sleep(Duration::from_millis(5)).await;
        publisher.emit("group.Started", json!({"role": "GO"})).await;
    });

    // Step B runs a fixed delay after event A; the run must not complete
    // until the second callback fires.
    let scenario = Scenario::builder("delayed_step")
        .on("group.Started", |state, ctx, _note| {
            state.set("group_started");
            ctx.after(Duration::from_millis(10), "post_start_check", |state, _ctx| {
                state.set("settled");
                Ok(())
            });
            Ok(())
        })
        .satisfied_when(|state| state.all_set(&["group_started", "settled"]));

    let started = std::time::Instant::now();
    let outcome = Orchestrator::new(&mut bus)
        .run(scenario, Duration::from_secs(5))
        .await;

    assert!(outcome.result.is_success(), "got {}", outcome.result);
    assert!(started.elapsed() >= Duration::from_millis(10));
    assert_eq!(bus.subscription_count().await, 0);
}

#[tokio::test]
async fn test_no_dispatch_after_satisfaction() {
    let mut bus = LocalBus::new();
    let publisher = bus.publisher();

    tokio::spawn(async move {
        sleep(Duration::from_millis(5)).await;
        // Burst: only the first may be acted upon
        publisher.emit("link.Up", json!(1)).await;
        publisher.emit("link.Up", json!(2)).await;
        publisher.emit("link.Up", json!(3)).await;
    });

    let scenario = Scenario::builder("first_only")
        .on("link.Up", |state, _, _| {
            state.set("up_seen");
            Ok(())
        })
        .on("link.Up", |state, _, _| {
            // Registered after the satisfying handler; must never run once
            // the predicate holds
            state.set("second_handler_ran");
            Ok(())
        })
        .satisfied_when(|state| state.is_set("up_seen"));

    let outcome = Orchestrator::new(&mut bus)
        .run(scenario, Duration::from_secs(5))
        .await;

    assert!(outcome.result.is_success());
    assert!(!outcome.state.is_set("second_handler_ran"));
    assert_eq!(outcome.trail.notification_topics(), vec!["link.Up"]);
    assert_eq!(bus.subscription_count().await, 0);
}

#[tokio::test]
async fn test_notifications_dispatched_in_delivery_order() {
    let mut bus = LocalBus::new();
    let publisher = bus.publisher();

    tokio::spawn(async move {
        sleep(Duration::from_millis(5)).await;
        publisher.emit("seq.Event", json!("first")).await;
        publisher.emit("seq.Event", json!("second")).await;
    });

    let scenario = Scenario::builder("ordered")
        .on("seq.Event", |state, _, note| {
            let mut order = state.captured("order").cloned().unwrap_or_else(|| json!([]));
            order.as_array_mut().unwrap().push(note.payload.clone());
            state.capture("order", order);
            Ok(())
        })
        .satisfied_when(|state| {
            state
                .captured("order")
                .and_then(|o| o.as_array())
                .map(|o| o.len() == 2)
                .unwrap_or(false)
        });

    let outcome = Orchestrator::new(&mut bus)
        .run(scenario, Duration::from_secs(5))
        .await;

    assert!(outcome.result.is_success());
    assert_eq!(
        outcome.state.captured("order").unwrap(),
        &json!(["first", "second"])
    );
}

#[tokio::test]
async fn test_handler_can_cancel_pending_timer() {
    let mut bus = LocalBus::new();
    let publisher = bus.publisher();

    tokio::spawn(async move {
        sleep(Duration::from_millis(5)).await;
        publisher.emit("peer.Found", json!("02:00:00:00:01:00")).await;
    });

    let pending: Arc<Mutex<Option<TimerHandle>>> = Arc::new(Mutex::new(None));
    let pending_setup = pending.clone();
    let pending_handler = pending.clone();

    let scenario = Scenario::builder("cancel_guard")
        .setup(move |_state, ctx| {
            let handle = ctx.after(Duration::from_millis(50), "no_peer_guard", |_, ctx| {
                ctx.fail("no peer found in time");
                Ok(())
            });
            ctx.after(Duration::from_millis(80), "settle", |state, _| {
                state.set("settled");
                Ok(())
            });
            *pending_setup.lock().unwrap() = Some(handle);
            Ok(())
        })
        .on("peer.Found", move |state, ctx, note| {
            if let Some(handle) = pending_handler.lock().unwrap().take() {
                ctx.cancel_timer(handle);
            }
            state.capture("peer", note.payload.clone());
            state.set("peer_found");
            Ok(())
        })
        .satisfied_when(|state| state.all_set(&["peer_found", "settled"]));

    let outcome = Orchestrator::new(&mut bus)
        .run(scenario, Duration::from_secs(5))
        .await;

    // The guard timer was cancelled, so the run completes normally
    assert!(outcome.result.is_success(), "got {}", outcome.result);
    assert_eq!(outcome.state.captured_str("peer"), Some("02:00:00:00:01:00"));
}

#[tokio::test]
async fn test_handler_requested_failure() {
    let mut bus = LocalBus::new();
    let publisher = bus.publisher();

    tokio::spawn(async move {
        sleep(Duration::from_millis(5)).await;
        publisher.emit("auth.Status", json!("denied")).await;
    });

    let scenario = Scenario::builder("auth_check")
        .on("auth.Status", |_, ctx, note| {
            if note.payload == json!("denied") {
                ctx.fail("authentication denied by daemon");
            }
            Ok(())
        })
        .satisfied_when(|state| state.is_set("authenticated"));

    let outcome = Orchestrator::new(&mut bus)
        .run(scenario, Duration::from_secs(5))
        .await;

    match &outcome.result {
        RunResult::Failure(reason) => assert_eq!(reason, "authentication denied by daemon"),
        other => panic!("expected failure, got {}", other),
    }
    assert_eq!(bus.subscription_count().await, 0);
}

#[tokio::test]
async fn test_sequential_runs_do_not_share_state() {
    let mut bus = LocalBus::new();
    let publisher = bus.publisher();

    tokio::spawn(async move {
        sleep(Duration::from_millis(5)).await;
        publisher.emit("once.Event", json!(1)).await;
    });

    let first = Scenario::builder("run_one")
        .on("once.Event", |state, _, _| {
            state.set("seen");
            Ok(())
        })
        .satisfied_when(|state| state.is_set("seen"));

    let outcome = Orchestrator::new(&mut bus)
        .run(first, Duration::from_secs(5))
        .await;
    assert!(outcome.result.is_success());

    // Second run starts from a clean slate and must time out on its own
    let second = Scenario::builder("run_two")
        .on("once.Event", |state, _, _| {
            state.set("seen");
            Ok(())
        })
        .satisfied_when(|state| state.is_set("seen"));

    let outcome = Orchestrator::new(&mut bus)
        .run(second, Duration::from_millis(50))
        .await;
    assert!(outcome.result.is_timeout());
    assert!(!outcome.state.is_set("seen"));
    assert_eq!(bus.subscription_count().await, 0);
}

#[tokio::test]
async fn test_concurrent_runs_on_shared_transport() {
    let bus = LocalBus::new();
    let publisher = bus.publisher();

    // Two logical devices observing one event source
    let mut bus_a = bus.clone();
    let mut bus_b = bus.clone();

    tokio::spawn(async move {
        sleep(Duration::from_millis(10)).await;
        publisher.emit("dev0.Ready", json!({})).await;
        publisher.emit("dev1.Ready", json!({})).await;
    });

    let scenario_a = Scenario::builder("dev0")
        .on("dev0.Ready", |state, _, _| {
            state.set("ready");
            Ok(())
        })
        .satisfied_when(|state| state.is_set("ready"));

    let scenario_b = Scenario::builder("dev1")
        .on("dev1.Ready", |state, _, _| {
            state.set("ready");
            Ok(())
        })
        .satisfied_when(|state| state.is_set("ready"));

    let (outcome_a, outcome_b) = tokio::join!(
        async {
            Orchestrator::new(&mut bus_a)
                .run(scenario_a, Duration::from_secs(5))
                .await
        },
        async {
            Orchestrator::new(&mut bus_b)
                .run(scenario_b, Duration::from_secs(5))
                .await
        },
    );

    assert!(outcome_a.result.is_success());
    assert!(outcome_b.result.is_success());
    assert_eq!(bus.subscription_count().await, 0);
}
