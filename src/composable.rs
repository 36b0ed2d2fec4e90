//! `Composable<T>` — a latch that accepts one or many values (or an error)
//! and lets consumers chain off it with `map`/`filter`/`reduce`/`first`/
//! `last`/`consume`, or block on the result with `wait`/`get`.
//!
//! Every composable owns a private [`Reactor`] used only for its three
//! reserved channels (`accept`, `first`, `last`); combinators subscribe to
//! the parent's `accept` channel and push into a freshly built child. A
//! second, much smaller piece of state — [`DelayedState`] — exists only on
//! composables built from a pre-bound source (`from_value`, `from_iter`,
//! `from_trigger`, `from_error`): their values sit inert until the first
//! `wait`/`get` call, so that building a pipeline never triggers side
//! effects by itself.

use crate::config::default_wait_timeout;
use crate::dispatcher::Dispatcher;
use crate::error::{AnyError, ReactorError, Result};
use crate::event::{Event, HEADER_EXPECTED_ACCEPT_COUNT};
use crate::observable::{Observable, Reactor};
use crate::reduce::Reduce;
use crate::selector::{AnonymousSelector, ClassSelector, Selector};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A single composable's latched state: at most one value, at most one
/// error, never both populated with meaningful data at once in normal use
/// (an error latch wins once set).
struct Data<T> {
    value: Option<T>,
    error: Option<ReactorError>,
}

/// DELAYED -> ACCEPTING -> ACCEPTED. See [`DelayedState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptState {
    Delayed,
    Accepting,
    Accepted,
}

/// The pre-bound source a delayed composable emits on first `wait`/`get`.
enum DelayedSource<T> {
    Error(ReactorError),
    Single(T),
    Many(Vec<T>),
    /// Built by `from_trigger`: on first trigger, publish `event` to `bus`
    /// under `selector`, then latch `event.data` as this composable's own
    /// value.
    Notify {
        selector: Arc<dyn Selector>,
        event: Event<T>,
        bus: Reactor<T>,
    },
}

/// Guards the one-time DELAYED -> ACCEPTING -> ACCEPTED transition with its
/// own monitor, kept separate from `Inner::data`'s monitor. Whenever both
/// are touched in the same call, this one is acquired first and released
/// before the other is taken — emission always happens outside the state
/// lock.
struct DelayedState<T> {
    state: Mutex<AcceptState>,
    cond: Condvar,
    source: Mutex<Option<DelayedSource<T>>>,
}

impl<T> DelayedState<T> {
    fn new(source: DelayedSource<T>) -> Self {
        Self {
            state: Mutex::new(AcceptState::Delayed),
            cond: Condvar::new(),
            source: Mutex::new(Some(source)),
        }
    }
}

/// Exception-class routing: `when::<E>(handler)` registers against a
/// [`ClassSelector<E>`] on a dedicated [`Reactor`], keyed off the error's
/// own `&dyn Any` view ([`AnyError::as_any`]) rather than `T`. A composable's
/// payload type generally differs from any error type it latches, so this
/// can't share the `accept`/`first`/`last` bus directly — it's a second,
/// same-shaped bus carrying `Arc<dyn AnyError>` instead of `T`, with its
/// dispatcher kept in sync with the owning composable's.
struct ErrorChannel {
    bus: Reactor<Arc<dyn AnyError>>,
}

impl ErrorChannel {
    fn new() -> Self {
        Self { bus: Reactor::new() }
    }

    fn register<E, F>(&self, handler: F)
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.bus.on(
            Arc::new(ClassSelector::<E>::new()),
            Arc::new(move |event: Event<Arc<dyn AnyError>>| {
                if let Some(e) = event.data.as_any().downcast_ref::<E>() {
                    handler(e);
                }
            }),
        );
    }

    fn notify(&self, err: Arc<dyn AnyError>) {
        let key: &dyn Any = err.as_any();
        self.bus.notify(key, Event::new(err.clone()));
    }
}

struct Inner<T> {
    observable: Reactor<T>,
    accept_sel: Arc<dyn Selector>,
    first_sel: Arc<dyn Selector>,
    last_sel: Arc<dyn Selector>,
    accepted_count: AtomicI64,
    expected_count: AtomicI64,
    last_fired: AtomicBool,
    data: Mutex<Data<T>>,
    cond: Condvar,
    waiters: AtomicI64,
    interrupted: AtomicBool,
    error_channel: ErrorChannel,
    delayed: Option<DelayedState<T>>,
    /// Set on combinator-created children: delegates `delayed_trigger()` up
    /// to whatever composable this one was derived from, regardless of its
    /// (possibly different) payload type.
    upstream_trigger: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// A reactive latch: accepts one value, a bounded or unbounded stream of
/// values, or an error, and exposes both push-style consumption
/// (`consume`, `map`, `filter`, `reduce`, `first`, `last`) and pull-style
/// blocking reads (`get`, `wait`, `wait_timeout`).
pub struct Composable<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Composable<T> {
    fn clone(&self) -> Self {
        Composable {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Composable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Composable<T> {
    fn build(
        observable: Reactor<T>,
        expected: i64,
        delayed: Option<DelayedState<T>>,
        upstream_trigger: Option<Arc<dyn Fn() + Send + Sync>>,
    ) -> Self {
        let error_channel = ErrorChannel::new();
        error_channel.bus.set_dispatcher(observable.dispatcher());
        Composable {
            inner: Arc::new(Inner {
                observable,
                accept_sel: AnonymousSelector::new(),
                first_sel: AnonymousSelector::new(),
                last_sel: AnonymousSelector::new(),
                accepted_count: AtomicI64::new(0),
                expected_count: AtomicI64::new(expected),
                last_fired: AtomicBool::new(false),
                data: Mutex::new(Data {
                    value: None,
                    error: None,
                }),
                cond: Condvar::new(),
                waiters: AtomicI64::new(0),
                interrupted: AtomicBool::new(false),
                error_channel,
                delayed,
                upstream_trigger,
            }),
        }
    }

    /// An empty composable with no pre-bound source and an unbounded
    /// (`-1`) expected-accept-count, ready for manual `accept` calls.
    pub fn new() -> Self {
        Self::build(Reactor::new(), -1, None, None)
    }

    /// Same as [`Composable::new`] but backed by a caller-supplied bus,
    /// e.g. one wired to a non-default [`Dispatcher`].
    pub fn with_observable(observable: Reactor<T>) -> Self {
        Self::build(observable, -1, None, None)
    }

    /// An empty composable. Distinct constructor from `new()` only in
    /// intent: documents "no value will ever be latched" at call sites,
    /// since Rust has no null to distinguish "absent" from "not yet set".
    pub fn empty() -> Self {
        Self::new()
    }

    /// A delayed composable pre-bound to a single value: nothing is
    /// latched or dispatched until the first `wait`/`get`.
    pub fn from_value(value: T) -> Self {
        Self::build(
            Reactor::new(),
            1,
            Some(DelayedState::new(DelayedSource::Single(value))),
            None,
        )
    }

    /// A delayed composable pre-bound to a fixed sequence of values,
    /// emitted in order on the first `wait`/`get`. `expectedAcceptCount`
    /// is set to the sequence's length.
    pub fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let values: Vec<T> = iter.into_iter().collect();
        let expected = values.len() as i64;
        Self::build(
            Reactor::new(),
            expected,
            Some(DelayedState::new(DelayedSource::Many(values))),
            None,
        )
    }

    /// A delayed composable pre-bound to a latched error, delivered to
    /// the error channel on the first `wait`/`get`.
    pub fn from_error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::build(
            Reactor::new(),
            1,
            Some(DelayedState::new(DelayedSource::Error(ReactorError::failed(err)))),
            None,
        )
    }

    /// A one-shot delayed composable that, on first `wait`/`get`, notifies
    /// `observable` with `(selector, event)` and then latches
    /// `event.data` as its own value.
    pub fn from_trigger(selector: Arc<dyn Selector>, event: Event<T>, observable: Reactor<T>) -> Self {
        Self::build(
            Reactor::new(),
            1,
            Some(DelayedState::new(DelayedSource::Notify {
                selector,
                event,
                bus: observable,
            })),
            None,
        )
    }

    /// A composable that live-forwards every value `other` accepts. Unlike
    /// the delayed constructors, this never latches values itself until
    /// `other` actually accepts one.
    pub fn from_other(other: &Composable<T>) -> Self {
        let child = other.new_child::<T>();
        let forward = child.clone();
        other.on_accept(move |event| forward.accept(event.data));
        child
    }

    /// Build a fresh child composable of (possibly different) type `U`,
    /// snapshotting this composable's current `expectedAcceptCount` and
    /// chaining `delayed_trigger` up to this one — the dispatcher-
    /// propagation rule for combinator children (see `Reactor::child`).
    fn new_child<U: Clone + Send + Sync + 'static>(&self) -> Composable<U> {
        let expected = self.inner.expected_count.load(Ordering::SeqCst);
        let parent = self.clone();
        let trigger: Arc<dyn Fn() + Send + Sync> = Arc::new(move || parent.delayed_trigger());
        Composable::<U>::build(self.inner.observable.child(), expected, None, Some(trigger))
    }

    fn on_accept(&self, consumer: impl Fn(Event<T>) + Send + Sync + 'static) {
        self.inner.observable.on(self.inner.accept_sel.clone(), Arc::new(consumer));
    }

    /// Register `consumer` on the accept channel and, if a value is
    /// already latched, replay it exactly once. Registration and the
    /// existing-value read share `data`'s critical section with
    /// `raw_accept`'s own registry snapshot, so a concurrent `accept` can
    /// never cause both a normal dispatch and this replay to fire for the
    /// same value. Used by every combinator that subscribes to its own
    /// parent's accept channel (`consume`, `consume_to`, `map`, `map_via`,
    /// `filter`, `reduce`) — the "a combinator built after its parent
    /// already accepted still sees the value" invariant isn't scoped to
    /// any one of them.
    fn on_accept_with_replay(&self, consumer: impl Fn(Event<T>) + Send + Sync + 'static) {
        let consumer: Arc<dyn Fn(Event<T>) + Send + Sync> = Arc::new(consumer);
        let replay = {
            let data = self.inner.data.lock().expect("composable data poisoned");
            self.inner.observable.on(self.inner.accept_sel.clone(), consumer.clone());
            data.value.clone()
        };
        if let Some(value) = replay {
            let expected = self.inner.expected_count.load(Ordering::SeqCst);
            let event = Event::new(value).with_header(HEADER_EXPECTED_ACCEPT_COUNT, expected.to_string());
            let dispatcher = self.inner.observable.dispatcher();
            dispatcher.dispatch(Box::new(move || consumer(event)));
        }
    }

    fn on_first(&self, consumer: impl Fn(Event<T>) + Send + Sync + 'static) {
        self.inner.observable.on(self.inner.first_sel.clone(), Arc::new(consumer));
    }

    fn on_last(&self, consumer: impl Fn(Event<T>) + Send + Sync + 'static) {
        self.inner.observable.on(self.inner.last_sel.clone(), Arc::new(consumer));
    }

    /// Replace this composable's dispatcher — and its bus's, and its error
    /// channel's — in one call.
    pub fn set_dispatcher(&self, dispatcher: Arc<dyn Dispatcher>) {
        self.inner.observable.set_dispatcher(dispatcher.clone());
        self.inner.error_channel.bus.set_dispatcher(dispatcher);
    }

    /// Cooperatively unblock any thread parked in `wait`/`wait_timeout`, or
    /// a thread currently driving a delayed emission. There is no safe-Rust
    /// analog to interrupting another OS thread; callers that park on
    /// `wait` must poll this flag or rely on it unblocking them directly.
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
        self.inner.cond.notify_all();
        if let Some(delayed) = &self.inner.delayed {
            delayed.cond.notify_all();
        }
    }

    /// Register `handler` to fire whenever this composable's error channel
    /// latches or routes an error whose concrete type is exactly `E`.
    pub fn when<E, F>(&self, handler: F)
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.inner.error_channel.register::<E, F>(handler);
    }

    /// Accept one value: latch it, wake any blocked waiters, notify the
    /// `accept` channel, then bump `acceptedCount` and check for
    /// completion.
    pub fn accept(&self, value: T) {
        self.raw_accept(value, false);
    }

    fn raw_accept(&self, value: T, is_first_in_emission: bool) {
        let expected = self.inner.expected_count.load(Ordering::SeqCst);
        let event = Event::new(value.clone()).with_header(HEADER_EXPECTED_ACCEPT_COUNT, expected.to_string());
        // Set the latched value and snapshot the accept channel's
        // registry in the same critical section `on_accept_with_replay`
        // uses for its registration + existing-value read, so a consumer
        // registering concurrently can never see both this dispatch and
        // its own manual replay fire for the same value.
        let accept_consumers = {
            let mut data = self.inner.data.lock().expect("composable data poisoned");
            data.value = Some(value);
            if self.inner.waiters.load(Ordering::SeqCst) > 0 {
                self.inner.cond.notify_all();
            }
            self.inner.observable.consumers_for(&self.inner.accept_sel)
        };
        let dispatcher = self.inner.observable.dispatcher();
        for consumer in accept_consumers {
            let event = event.clone();
            dispatcher.dispatch(Box::new(move || consumer(event)));
        }
        if is_first_in_emission {
            self.inner.observable.notify_selector(&self.inner.first_sel, event);
        }
        self.inner.accepted_count.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(
            accepted = self.inner.accepted_count.load(Ordering::SeqCst),
            expected,
            "composable accepted value"
        );
        self.maybe_complete();
    }

    /// Latch an error: wake blocked waiters and route it through this
    /// composable's error channel. Does not touch `acceptedCount`.
    pub fn accept_error<E>(&self, err: E)
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let wrapped = ReactorError::failed(err);
        {
            let mut data = self.inner.data.lock().expect("composable data poisoned");
            data.error = Some(wrapped.clone());
            if self.inner.waiters.load(Ordering::SeqCst) > 0 {
                self.inner.cond.notify_all();
            }
        }
        tracing::warn!(error = %wrapped, "composable accepted an error");
        if let ReactorError::Failed(source) = &wrapped {
            self.inner.error_channel.notify(source.clone());
        }
    }

    /// Decrement `expectedAcceptCount` by one (used by `filter` rejections
    /// and per-item combinator errors). A count already `-1` (unbounded)
    /// is left unchanged.
    pub fn decrease_accept_length(&self) {
        loop {
            let current = self.inner.expected_count.load(Ordering::SeqCst);
            if current < 0 {
                return;
            }
            let updated = current - 1;
            if self
                .inner
                .expected_count
                .compare_exchange(current, updated, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
        self.maybe_complete();
    }

    /// Set `expectedAcceptCount` directly (e.g. once a producer knows its
    /// final size) and re-check for completion.
    pub fn set_expected_accept_count(&self, count: i64) {
        self.inner.expected_count.store(count, Ordering::SeqCst);
        self.maybe_complete();
    }

    /// Fires the `last` channel exactly once, the moment `acceptedCount`
    /// reaches a non-negative `expectedAcceptCount`, and wakes any
    /// blocked waiters.
    fn maybe_complete(&self) {
        let expected = self.inner.expected_count.load(Ordering::SeqCst);
        let accepted = self.inner.accepted_count.load(Ordering::SeqCst);
        if expected >= 0 && accepted >= expected {
            if self
                .inner
                .last_fired
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let snapshot = self.inner.data.lock().expect("composable data poisoned").value.clone();
                if let Some(value) = snapshot {
                    let event = Event::new(value).with_header(HEADER_EXPECTED_ACCEPT_COUNT, expected.to_string());
                    self.inner.observable.notify_selector(&self.inner.last_sel, event);
                }
                self.inner.cond.notify_all();
            }
        }
    }

    /// Whether this composable has latched an error, or a value with
    /// `acceptedCount >= expectedAcceptCount`.
    pub fn is_complete(&self) -> bool {
        let data = self.inner.data.lock().expect("composable data poisoned");
        Self::is_complete_locked(&data, &self.inner)
    }

    fn is_complete_locked(data: &Data<T>, inner: &Inner<T>) -> bool {
        if data.error.is_some() {
            return true;
        }
        if data.value.is_some() {
            let expected = inner.expected_count.load(Ordering::SeqCst);
            let accepted = inner.accepted_count.load(Ordering::SeqCst);
            return expected >= 0 && accepted >= expected;
        }
        false
    }

    /// Non-blocking read: the last latched value (or error), triggering a
    /// delayed emission first if this composable (or something upstream of
    /// it) has a pre-bound source that hasn't fired yet.
    pub fn get(&self) -> Result<Option<T>> {
        self.delayed_trigger();
        let data = self.inner.data.lock().expect("composable data poisoned");
        if let Some(err) = &data.error {
            return Err(err.clone());
        }
        Ok(data.value.clone())
    }

    /// Block until complete or the default timeout
    /// (`reactor.max.await.timeout`, 30s) elapses.
    pub fn wait(&self) -> Result<Option<T>> {
        self.wait_until(Some(Instant::now() + default_wait_timeout()))
    }

    /// Block until complete or `timeout` elapses. A zero duration polls
    /// completion once without blocking.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        self.wait_until(Some(Instant::now() + timeout))
    }

    /// Block with no deadline. Still cooperatively unblocked by
    /// `interrupt()`.
    pub fn wait_forever(&self) -> Result<Option<T>> {
        self.wait_until(None)
    }

    fn wait_until(&self, deadline: Option<Instant>) -> Result<Option<T>> {
        self.delayed_trigger();
        self.inner.waiters.fetch_add(1, Ordering::SeqCst);
        let mut data = self.inner.data.lock().expect("composable data poisoned");
        loop {
            if self.inner.interrupted.load(Ordering::SeqCst) {
                self.inner.waiters.fetch_sub(1, Ordering::SeqCst);
                return Err(ReactorError::Interrupted);
            }
            if Self::is_complete_locked(&data, &self.inner) {
                break;
            }
            let now = Instant::now();
            if let Some(deadline) = deadline {
                if now >= deadline {
                    break;
                }
            }
            let slice = deadline
                .map(|d| d.saturating_duration_since(now))
                .unwrap_or(Duration::from_millis(200))
                .min(Duration::from_millis(200));
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(data, slice)
                .expect("composable data poisoned");
            data = guard;
        }
        drop(data);
        self.inner.waiters.fetch_sub(1, Ordering::SeqCst);
        self.get()
    }

    /// Trigger this composable's own pre-bound emission if it has one,
    /// otherwise delegate up the chain this composable was derived from.
    /// A no-op on a plain composable with no delayed ancestor.
    fn delayed_trigger(&self) {
        if let Some(delayed) = &self.inner.delayed {
            self.do_delayed_accept(delayed);
        } else if let Some(trigger) = &self.inner.upstream_trigger {
            trigger();
        }
    }

    fn do_delayed_accept(&self, delayed: &DelayedState<T>) {
        enum Role {
            AlreadyDone,
            WaitForOther,
            DriveEmission,
        }

        let role = {
            let mut state = delayed.state.lock().expect("delayed state poisoned");
            match *state {
                AcceptState::Accepted => Role::AlreadyDone,
                AcceptState::Accepting => Role::WaitForOther,
                AcceptState::Delayed => {
                    *state = AcceptState::Accepting;
                    Role::DriveEmission
                }
            }
        };

        match role {
            Role::AlreadyDone => {}
            Role::WaitForOther => {
                let mut state = delayed.state.lock().expect("delayed state poisoned");
                while *state == AcceptState::Accepting {
                    if self.inner.interrupted.load(Ordering::SeqCst) {
                        return;
                    }
                    let (guard, _) = delayed
                        .cond
                        .wait_timeout(state, Duration::from_millis(50))
                        .expect("delayed state poisoned");
                    state = guard;
                }
            }
            Role::DriveEmission => {
                let source = delayed.source.lock().expect("delayed state poisoned").take();
                match source {
                    Some(DelayedSource::Error(err)) => self.emit_delayed_error(err),
                    Some(DelayedSource::Single(value)) => self.raw_accept(value, true),
                    Some(DelayedSource::Many(values)) => {
                        for (index, value) in values.into_iter().enumerate() {
                            self.raw_accept(value, index == 0);
                        }
                    }
                    Some(DelayedSource::Notify { selector, event, bus }) => {
                        bus.notify_selector(&selector, event.clone());
                        self.raw_accept(event.data, true);
                    }
                    None => {}
                }
                let mut state = delayed.state.lock().expect("delayed state poisoned");
                *state = AcceptState::Accepted;
                delayed.cond.notify_all();
            }
        }
    }

    fn emit_delayed_error(&self, err: ReactorError) {
        {
            let mut data = self.inner.data.lock().expect("composable data poisoned");
            data.error = Some(err.clone());
            if self.inner.waiters.load(Ordering::SeqCst) > 0 {
                self.inner.cond.notify_all();
            }
        }
        if let ReactorError::Failed(source) = &err {
            self.inner.error_channel.notify(source.clone());
        }
    }

    /// Subscribe a sink to every accepted value. Late subscription against
    /// an already-latched value replays it once, dispatched through this
    /// composable's bus. Returns a clone of `self` so it can be chained
    /// into a terminal `wait`/`get`.
    pub fn consume<F>(&self, sink: F) -> Composable<T>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.on_accept_with_replay(move |event| sink(event.data));
        self.clone()
    }

    /// Re-publish every accepted value as an event on `bus` under
    /// `selector`. Values routed through the accept channel already arrive
    /// wrapped in an [`Event`], so this just re-addresses the existing
    /// envelope rather than wrapping it twice.
    pub fn consume_to(&self, selector: Arc<dyn Selector>, bus: Reactor<T>) -> Composable<T> {
        self.on_accept_with_replay(move |event| bus.notify_selector(&selector, event));
        self.clone()
    }

    /// Transform each accepted value through `f`, producing a child
    /// composable of type `U`. A panic inside `f` is caught, routed to the
    /// child's error channel as a [`crate::error::PanicError`], and counts
    /// as a decrease against the child's `expectedAcceptCount`.
    pub fn map<U, F>(&self, f: F) -> Composable<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let child = self.new_child::<U>();
        let f = Arc::new(f);
        let sink = child.clone();
        self.on_accept_with_replay(move |event| {
            let f = f.clone();
            match catch_unwind(AssertUnwindSafe(|| f(event.data))) {
                Ok(mapped) => sink.accept(mapped),
                Err(payload) => sink.route_panic(payload),
            }
        });
        child
    }

    /// RPC-style map: publish each accepted value as an event addressed to
    /// `selector` on `bus`, tagged with a fresh reply-to selector, and feed
    /// whatever comes back on that reply-to into the child composable.
    pub fn map_via(&self, selector: Arc<dyn Selector>, bus: Reactor<T>) -> Composable<T> {
        let child = self.new_child::<T>();
        let reply_sel = AnonymousSelector::new();
        let sink = child.clone();
        bus.on(reply_sel.clone(), Arc::new(move |event: Event<T>| sink.accept(event.data)));

        let request_bus = bus;
        self.on_accept_with_replay(move |event| {
            let mut request = event;
            request.reply_to = Some(reply_sel.clone());
            request_bus.notify_selector(&selector, request);
        });
        child
    }

    /// Keep only accepted values for which `predicate` holds true; a
    /// rejected value decreases the child's `expectedAcceptCount` instead
    /// of being forwarded. A panicking predicate is treated like a
    /// rejection, with the panic routed to the child's error channel.
    pub fn filter<F>(&self, predicate: F) -> Composable<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let child = self.new_child::<T>();
        let predicate = Arc::new(predicate);
        let sink = child.clone();
        self.on_accept_with_replay(move |event| {
            let predicate = predicate.clone();
            match catch_unwind(AssertUnwindSafe(|| predicate(&event.data))) {
                Ok(true) => sink.accept(event.data),
                Ok(false) => sink.decrease_accept_length(),
                Err(payload) => sink.route_panic(payload),
            }
        });
        child
    }

    /// Fold accepted values into a single accumulator of type `V`, seeded
    /// with `init`. On an unbounded (streaming) parent, the child emits a
    /// running total after every step; on a bounded parent, it emits only
    /// once the parent's `last` channel fires.
    pub fn reduce<V, F>(&self, f: F, init: V) -> Composable<V>
    where
        V: Clone + Send + Sync + 'static,
        F: Fn(Reduce<T, V>) -> V + Send + Sync + 'static,
    {
        let child = self.new_child::<V>();
        child.inner.expected_count.store(1, Ordering::SeqCst);
        let streaming = self.inner.expected_count.load(Ordering::SeqCst) < 0;
        let accumulator = Arc::new(Mutex::new(init));
        let f = Arc::new(f);

        {
            let sink = child.clone();
            let accumulator = accumulator.clone();
            let f = f.clone();
            self.on_accept_with_replay(move |event| {
                let last_value = accumulator.lock().expect("reduce accumulator poisoned").clone();
                match catch_unwind(AssertUnwindSafe(|| f(Reduce::new(last_value, event.data)))) {
                    Ok(next) => {
                        *accumulator.lock().expect("reduce accumulator poisoned") = next.clone();
                        if streaming {
                            sink.accept(next);
                        }
                    }
                    Err(payload) => sink.route_panic(payload),
                }
            });
        }
        {
            let sink = child.clone();
            let accumulator = accumulator.clone();
            self.on_last(move |_event| {
                let snapshot = accumulator.lock().expect("reduce accumulator poisoned").clone();
                sink.accept(snapshot);
            });
        }
        child
    }

    /// A child that latches only the first accepted value.
    pub fn first(&self) -> Composable<T> {
        let child = self.new_child::<T>();
        child.inner.expected_count.store(1, Ordering::SeqCst);
        let sink = child.clone();
        self.on_first(move |event| sink.accept(event.data));
        child
    }

    /// A child that latches only the value accepted when this composable
    /// completes (its `last` channel firing).
    pub fn last(&self) -> Composable<T> {
        let child = self.new_child::<T>();
        child.inner.expected_count.store(1, Ordering::SeqCst);
        let sink = child.clone();
        self.on_last(move |event| sink.accept(event.data));
        child
    }

    fn route_panic(&self, payload: Box<dyn Any + Send>) {
        let message = panic_message(&payload);
        tracing::warn!(message = %message, "combinator panicked, routing to error channel");
        let error: Arc<dyn AnyError> = Arc::new(crate::error::PanicError(message));
        self.inner.error_channel.notify(error);
        self.decrease_accept_length();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "combinator panicked".to_string()
    }
}
