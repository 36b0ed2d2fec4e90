//! # reactor-core
//!
//! A reactive composition engine: build pipelines out of
//! [`Composable`](composable::Composable) values chained with `map`,
//! `filter`, `reduce`, `first`, `last`, and `consume`, fed by one or many
//! calls to `accept`, and read back with a blocking `get`/`wait`.
//!
//! ## Quick start
//!
//! ```rust
//! use reactor_core::Composable;
//!
//! let total = Composable::from_iter(vec![1, 2, 3])
//!     .map(|n| n * 2)
//!     .reduce(|r| r.last_value + r.next_value, 0)
//!     .wait()
//!     .unwrap();
//!
//! assert_eq!(total, Some(12));
//! ```
//!
//! ## Architecture
//!
//! - [`Composable`](composable::Composable) — the state machine: latches a
//!   value or an error, tracks `acceptedCount`/`expectedAcceptCount`, and
//!   exposes the combinators.
//! - [`Observable`](observable::Observable) / [`Reactor`](observable::Reactor)
//!   — a `Selector`-keyed event bus each composable uses internally for its
//!   three reserved channels (accept, first, last).
//! - [`Selector`](selector::Selector) — the matcher contract: object
//!   equality, predicate, exact-type, regex, and templated-path variants.
//! - [`Dispatcher`](dispatcher::Dispatcher) — where scheduling work lives,
//!   decoupled from the bus: synchronous, thread-per-task, ring-buffer, or
//!   a caller-supplied Tokio runtime.
//!
//! `Composable::wait()`/`wait_timeout()` stand in for the spec's `await()`,
//! which isn't spellable as a Rust identifier.

pub mod composable;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod observable;
pub mod reduce;
pub mod selector;

pub use composable::Composable;
pub use dispatcher::{
    Dispatcher, RingBufferDispatcher, SynchronousDispatcher, Task, ThreadDispatcher, TokioDispatcher,
};
pub use error::{ReactorError, Result};
pub use event::{Event, HEADER_EXPECTED_ACCEPT_COUNT};
pub use observable::{Observable, Reactor};
pub use reduce::Reduce;
pub use selector::{
    AnonymousSelector, ClassSelector, ObjectSelector, PredicateSelector, RegexSelector, Selector,
    UriPathSelector,
};
