//! Performance benchmarks for reactor-core
//!
//! Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};
use reactor_core::{Composable, Observable, Reactor};
use std::sync::Arc;

fn bench_accept_on_a_streaming_composable(c: &mut Criterion) {
    c.bench_function("Composable::accept (streaming)", |b| {
        let composable: Composable<i32> = Composable::new();
        let mut n = 0i32;
        b.iter(|| {
            composable.accept(n);
            n = n.wrapping_add(1);
        });
    });
}

fn bench_map_filter_reduce_chain(c: &mut Criterion) {
    c.bench_function("map -> filter -> reduce chain, per accept", |b| {
        let source: Composable<i32> = Composable::new();
        let _sink = source
            .map(|n| n * 2)
            .filter(|n| n % 3 != 0)
            .reduce(|r| r.last_value + r.next_value, 0);
        let mut n = 0i32;
        b.iter(|| {
            source.accept(n);
            n = n.wrapping_add(1);
        });
    });
}

fn bench_reactor_notify_fan_out(c: &mut Criterion) {
    use reactor_core::{AnonymousSelector, Event};

    c.bench_function("Reactor::notify, 8 subscribers", |b| {
        let reactor: Reactor<i32> = Reactor::new();
        let selectors: Vec<Arc<AnonymousSelector>> = (0..8).map(|_| AnonymousSelector::new()).collect();
        for selector in &selectors {
            reactor.on(selector.clone(), Arc::new(|_event: Event<i32>| {}));
        }
        let key = selectors[0].clone();
        b.iter(|| {
            reactor.notify(&*key as &dyn std::any::Any, Event::new(1));
        });
    });
}

fn bench_event_clone_with_headers(c: &mut Criterion) {
    use reactor_core::Event;

    let event = Event::new(7).with_header("x-reactor-expectedAcceptCount", "3");
    c.bench_function("Event clone", |b| {
        b.iter(|| event.clone());
    });
}

criterion_group!(
    benches,
    bench_accept_on_a_streaming_composable,
    bench_map_filter_reduce_chain,
    bench_reactor_notify_fan_out,
    bench_event_clone_with_headers
);
criterion_main!(benches);
