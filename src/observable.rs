//! Observable / event bus
//!
//! Exposes `on(selector, consumer)` and `notify(key, event)`. Dispatches
//! each matched consumer through the bus's `Dispatcher`. For a single
//! selector, consumers fire in registration order; no ordering is
//! guaranteed across distinct selectors.
//!
//! Exception-class routing (`when(E, handler)`) runs on this same
//! machinery — `on`/`notify` plus a `ClassSelector<E>` registration — but
//! against a second `Reactor` instance owned by each `Composable` (see
//! `composable::ErrorChannel`), since an error's type generally differs
//! from the composable's own payload type `T` and a single `Reactor<T>`
//! can only ever carry one payload type.

use crate::dispatcher::{Dispatcher, SynchronousDispatcher};
use crate::event::Event;
use crate::selector::Selector;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A registered consumer: invoked with the event that matched its selector.
pub type Consumer<T> = Arc<dyn Fn(Event<T>) + Send + Sync>;

/// The event bus contract. `Reactor<T>` is the default implementation;
/// hosts may supply their own as long as it honors this contract (see
/// `Composable::with_observable` and the dispatcher-propagation rule in
/// `Composable`'s combinators).
pub trait Observable<T>: Send + Sync {
    /// Register `consumer` under `selector`. Multiple registrations per
    /// selector are permitted; insertion order is preserved for dispatch
    /// order.
    fn on(&self, selector: Arc<dyn Selector>, consumer: Consumer<T>);

    /// For every registered selector whose `matches(key)` is true,
    /// schedule its consumer with `event` through this bus's dispatcher.
    fn notify(&self, key: &dyn Any, event: Event<T>);

    /// Shortcut that addresses a single selector object directly, by
    /// identity, bypassing `matches()` — used by `map(selector, bus)` to
    /// deliver an RPC reply back to exactly the consumer registered under
    /// a freshly-minted reply-to selector.
    fn notify_selector(&self, selector: &Arc<dyn Selector>, event: Event<T>);

    /// Replace this bus's dispatcher. Combinators call this when
    /// propagating a dispatcher override down to a child (see
    /// `Composable::set_dispatcher`).
    fn set_dispatcher(&self, dispatcher: Arc<dyn Dispatcher>);

    /// The dispatcher currently backing this bus.
    fn dispatcher(&self) -> Arc<dyn Dispatcher>;
}

struct Registration<T> {
    selector: Arc<dyn Selector>,
    consumer: Consumer<T>,
}

/// Default `Observable<T>` implementation: an ordered registry of
/// `(selector, consumer)` pairs dispatched through a shared `Dispatcher`.
pub struct Reactor<T> {
    registry: Arc<Mutex<Vec<Registration<T>>>>,
    dispatcher: Arc<Mutex<Arc<dyn Dispatcher>>>,
}

impl<T> Clone for Reactor<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<T> fmt::Debug for Reactor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.registry.lock().map(|r| r.len()).unwrap_or(0);
        f.debug_struct("Reactor")
            .field("registrations", &count)
            .finish_non_exhaustive()
    }
}

impl<T> Default for Reactor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Reactor<T> {
    /// Create a fresh bus with the default (synchronous) dispatcher.
    pub fn new() -> Self {
        Self::with_dispatcher(Arc::new(SynchronousDispatcher))
    }

    /// Create a fresh bus with an explicit dispatcher.
    pub fn with_dispatcher(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Vec::new())),
            dispatcher: Arc::new(Mutex::new(dispatcher)),
        }
    }

    /// Spawn a fresh bus for a combinator-created child, per the
    /// dispatcher-propagation rule: a reactor's child reuses the reactor
    /// shape with its own registry but a synchronous dispatcher, so the
    /// child's internal fan-out runs inline on whatever thread the
    /// parent's dispatcher already scheduled — avoiding a second hop.
    ///
    /// Generic over the child's own payload type `U`, since combinators
    /// like `map`/`reduce` build a child of a different type than their
    /// parent; the body never touches any `T`-typed state.
    pub(crate) fn child<U>(&self) -> Reactor<U> {
        Reactor::with_dispatcher(Arc::new(SynchronousDispatcher))
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> for Reactor<T> {
    fn on(&self, selector: Arc<dyn Selector>, consumer: Consumer<T>) {
        self.registry
            .lock()
            .expect("reactor registry poisoned")
            .push(Registration { selector, consumer });
    }

    fn notify(&self, key: &dyn Any, event: Event<T>) {
        let matched: Vec<Consumer<T>> = {
            let registry = self.registry.lock().expect("reactor registry poisoned");
            registry
                .iter()
                .filter(|reg| reg.selector.matches(key))
                .map(|reg| reg.consumer.clone())
                .collect()
        };
        let dispatcher = self.dispatcher.lock().expect("dispatcher lock poisoned").clone();
        for consumer in matched {
            let event = event.clone();
            dispatcher.dispatch(Box::new(move || consumer(event)));
        }
    }

    fn notify_selector(&self, selector: &Arc<dyn Selector>, event: Event<T>) {
        let matched: Vec<Consumer<T>> = {
            let registry = self.registry.lock().expect("reactor registry poisoned");
            registry
                .iter()
                .filter(|reg| Arc::ptr_eq(&reg.selector, selector))
                .map(|reg| reg.consumer.clone())
                .collect()
        };
        let dispatcher = self.dispatcher.lock().expect("dispatcher lock poisoned").clone();
        for consumer in matched {
            let event = event.clone();
            dispatcher.dispatch(Box::new(move || consumer(event)));
        }
    }

    fn set_dispatcher(&self, dispatcher: Arc<dyn Dispatcher>) {
        *self.dispatcher.lock().expect("dispatcher lock poisoned") = dispatcher;
    }

    fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        self.dispatcher.lock().expect("dispatcher lock poisoned").clone()
    }
}

impl<T: Clone + Send + Sync + 'static> Reactor<T> {
    /// If `event.reply_to` is set, deliver `response` to the selector it
    /// names via `notify_selector` — the RPC-reply half of `map(sel, bus)`.
    pub fn reply(&self, event: &Event<T>, response: Event<T>) {
        if let Some(reply_to) = &event.reply_to {
            self.notify_selector(reply_to, response);
        } else {
            tracing::warn!("reply() called on an event with no reply_to selector");
        }
    }

    /// Snapshot, by identity, every consumer registered under `selector` —
    /// without dispatching. Lets a caller (see `Composable::raw_accept` and
    /// `Composable::on_accept_with_replay`) fold this snapshot into its own
    /// state-check critical section instead of racing a separate
    /// `notify_selector` call against a concurrent registration.
    pub(crate) fn consumers_for(&self, selector: &Arc<dyn Selector>) -> Vec<Consumer<T>> {
        self.registry
            .lock()
            .expect("reactor registry poisoned")
            .iter()
            .filter(|reg| Arc::ptr_eq(&reg.selector, selector))
            .map(|reg| reg.consumer.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{AnonymousSelector, ObjectSelector};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn notify_matches_registered_selector() {
        let reactor: Reactor<i32> = Reactor::new();
        let sel = ObjectSelector::new("topic".to_string());
        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        reactor.on(
            Arc::new(sel),
            Arc::new(move |event: Event<i32>| {
                received2.lock().unwrap().push(event.data);
            }),
        );
        reactor.notify(&"topic".to_string(), Event::new(42));
        assert_eq!(*received.lock().unwrap(), vec![42]);
    }

    #[test]
    fn notify_skips_non_matching_selector() {
        let reactor: Reactor<i32> = Reactor::new();
        let sel = ObjectSelector::new("topic".to_string());
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        reactor.on(
            Arc::new(sel),
            Arc::new(move |_event: Event<i32>| {
                count2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        reactor.notify(&"other".to_string(), Event::new(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn consumers_fire_in_registration_order() {
        let reactor: Reactor<i32> = Reactor::new();
        let sel = AnonymousSelector::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            reactor.on(
                sel.clone(),
                Arc::new(move |_event: Event<i32>| {
                    order.lock().unwrap().push(i);
                }),
            );
        }
        reactor.notify(&*sel, Event::new(0));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn notify_selector_is_identity_based() {
        let reactor: Reactor<&str> = Reactor::new();
        let sel_a: Arc<dyn Selector> = AnonymousSelector::new();
        let sel_b: Arc<dyn Selector> = AnonymousSelector::new();
        let hit = Arc::new(Mutex::new(None));
        let hit2 = hit.clone();
        reactor.on(
            sel_a.clone(),
            Arc::new(move |event: Event<&str>| {
                *hit2.lock().unwrap() = Some(event.data);
            }),
        );
        reactor.notify_selector(&sel_b, Event::new("wrong"));
        assert!(hit.lock().unwrap().is_none());
        reactor.notify_selector(&sel_a, Event::new("right"));
        assert_eq!(*hit.lock().unwrap(), Some("right"));
    }

    #[test]
    fn reply_delivers_to_reply_to_selector() {
        let reactor: Reactor<&str> = Reactor::new();
        let reply_sel = AnonymousSelector::new();
        let got = Arc::new(Mutex::new(None));
        let got2 = got.clone();
        reactor.on(
            reply_sel.clone(),
            Arc::new(move |event: Event<&str>| {
                *got2.lock().unwrap() = Some(event.data);
            }),
        );
        let request = Event::new("ping").with_reply_to(reply_sel);
        reactor.reply(&request, Event::new("pong"));
        assert_eq!(*got.lock().unwrap(), Some("pong"));
    }

    #[test]
    fn child_bus_has_fresh_registry_and_synchronous_dispatcher() {
        let parent: Reactor<i32> = Reactor::with_dispatcher(Arc::new(
            crate::dispatcher::ThreadDispatcher,
        ));
        let child: Reactor<i32> = parent.child();
        assert!(child.dispatcher().is_synchronous());
        assert_eq!(child.registry.lock().unwrap().len(), 0);
    }
}
