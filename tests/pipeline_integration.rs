//! Composable pipeline integration tests
//!
//! End-to-end tests exercising full chains of combinators, dispatcher
//! swaps, RPC-style stitching via `map_via`, and the delayed-emission
//! lifecycle. Covers the scenarios named in the crate's testable-properties
//! notes: accept/filter/reduce round-trips, error-channel routing, and
//! concurrent `wait` calls on a delayed source.

use reactor_core::{
    AnonymousSelector, Composable, Event, Observable, PredicateSelector, Reactor, ReactorError,
    ThreadDispatcher, TokioDispatcher,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ─── Accept / filter / reduce chains ───────────────────────────────

#[test]
fn filter_then_reduce_on_a_streaming_source() {
    let source: Composable<i32> = Composable::new();
    let evens = source.filter(|n| n % 2 == 0);
    let running_total = evens.reduce(|r| r.last_value + r.next_value, 0);

    for n in 1..=6 {
        source.accept(n);
    }
    source.set_expected_accept_count(6);

    // streaming parent (unbounded at accept time) means the reduce child
    // emits a running total after each accepted even number: 2, 6, 12
    assert_eq!(running_total.get().unwrap(), Some(12));
}

#[test]
fn map_chain_against_a_bounded_source_emits_once() {
    let pipeline = Composable::from_iter(vec!["a", "bb", "ccc"])
        .map(|s| s.len())
        .reduce(|r| r.last_value + r.next_value, 0);
    assert_eq!(pipeline.wait().unwrap(), Some(6));
}

#[test]
fn get_before_accept_is_none_without_error() {
    let c: Composable<i32> = Composable::new();
    assert_eq!(c.get().unwrap(), None);
}

#[test]
fn get_after_accept_error_fails() {
    #[derive(Debug, thiserror::Error)]
    #[error("upstream unavailable")]
    struct UpstreamError;

    let c: Composable<i32> = Composable::new();
    c.accept_error(UpstreamError);
    assert!(matches!(c.get(), Err(ReactorError::Failed(_))));
}

// ─── Dispatcher swaps ───────────────────────────────────────────────

#[test]
fn thread_dispatcher_still_latches_correctly() {
    let bus: Reactor<i32> = Reactor::with_dispatcher(Arc::new(ThreadDispatcher));
    let c = Composable::with_observable(bus);
    c.set_expected_accept_count(3);
    for n in [1, 2, 3] {
        c.accept(n);
    }
    assert_eq!(c.wait_timeout(Duration::from_secs(2)).unwrap(), Some(3));
}

#[tokio::test]
async fn tokio_dispatcher_schedules_consumers_on_the_runtime() {
    let bus: Reactor<i32> = Reactor::with_dispatcher(Arc::new(TokioDispatcher::current().unwrap()));
    let c = Composable::with_observable(bus);
    c.set_expected_accept_count(1);

    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = Arc::new(Mutex::new(Some(tx)));
    c.consume(move |v: i32| {
        if let Some(tx) = tx.lock().unwrap().take() {
            let _ = tx.send(v);
        }
    });
    c.accept(42);
    let received = rx.await.unwrap();
    assert_eq!(received, 42);
}

// ─── RPC stitching via map_via ──────────────────────────────────────

#[test]
fn map_via_stitches_a_request_and_reply_across_a_shared_bus() {
    let bus: Reactor<String> = Reactor::new();
    let request_sel = AnonymousSelector::new();
    bus.on(
        request_sel.clone(),
        Arc::new({
            let bus = bus.clone();
            move |event: Event<String>| {
                let reply = format!("{}-pong", event.data);
                bus.reply(&event, Event::new(reply));
            }
        }),
    );

    let requester = Composable::from_value("ping".to_string());
    let responder = requester.map_via(request_sel, bus);
    assert_eq!(responder.wait().unwrap(), Some("ping-pong".to_string()));
}

// ─── Error routing ───────────────────────────────────────────────────

#[test]
fn combinator_panics_do_not_affect_the_parent() {
    let source = Composable::from_iter(vec![1, 2, 3]);
    let risky = source.map(|n| {
        if n == 2 {
            panic!("boom");
        }
        n
    });

    let failures = Arc::new(AtomicUsize::new(0));
    let failures2 = failures.clone();
    risky.when::<reactor_core::error::PanicError, _>(move |_e| {
        failures2.fetch_add(1, Ordering::SeqCst);
    });

    risky.wait().ok();
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(source.wait().unwrap(), Some(3));
}

// ─── Selector-driven routing ─────────────────────────────────────────

#[test]
fn predicate_selector_gates_which_consumers_receive_an_event() {
    let bus: Reactor<i32> = Reactor::new();
    let only_even = PredicateSelector::new(|key| key.downcast_ref::<i32>().map(|n| n % 2 == 0).unwrap_or(false));
    let hits = Arc::new(AtomicUsize::new(0));
    let hits2 = hits.clone();
    bus.on(
        Arc::new(only_even),
        Arc::new(move |_event: Event<i32>| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }),
    );
    bus.notify(&3, Event::new(3));
    bus.notify(&4, Event::new(4));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ─── Concurrent delayed emission ─────────────────────────────────────

#[test]
fn two_threads_waiting_on_a_delayed_source_each_see_the_full_sequence() {
    let source = Arc::new(Composable::from_iter(vec![1, 2, 3]));
    let first_hits = Arc::new(AtomicUsize::new(0));
    let last_hits = Arc::new(AtomicUsize::new(0));

    let first = source.first();
    let last = source.last();
    {
        let first_hits = first_hits.clone();
        first.consume(move |_| {
            first_hits.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let last_hits = last_hits.clone();
        last.consume(move |_| {
            last_hits.fetch_add(1, Ordering::SeqCst);
        });
    }

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let source = source.clone();
            std::thread::spawn(move || source.wait())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), Some(3));
    }

    assert_eq!(first_hits.load(Ordering::SeqCst), 1);
    assert_eq!(last_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn interrupted_wait_surfaces_as_interrupted_error() {
    let c: Arc<Composable<i32>> = Arc::new(Composable::new());
    c.set_expected_accept_count(5);

    let waiter = c.clone();
    let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(10)));
    std::thread::sleep(Duration::from_millis(50));
    c.interrupt();
    assert!(matches!(handle.join().unwrap(), Err(ReactorError::Interrupted)));
}
