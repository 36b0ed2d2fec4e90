//! Error types for the reactor composition engine

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// An error that can also hand back a `&dyn Any` view of itself. This is
/// what lets the exception-routing channel key its subscriptions by exact
/// error type via [`crate::selector::ClassSelector`]: `Selector::matches`
/// takes `&dyn Any`, and a plain `dyn Error` trait object has no path back
/// to `Any` once the concrete type is erased.
pub trait AnyError: std::error::Error + Send + Sync {
    /// Returns `self` as `&dyn Any`, for `ClassSelector<E>::matches`.
    fn as_any(&self) -> &dyn Any;
}

impl<E> AnyError for E
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Errors that can occur while composing, accepting, or waiting on a
/// [`Composable`](crate::composable::Composable).
#[derive(Debug, Clone, Error)]
pub enum ReactorError {
    /// A latched upstream failure (via `accept_error`) or a caught
    /// combinator panic, routed through the error bus's class-selector
    /// channel.
    #[error("composable failed: {0}")]
    Failed(Arc<dyn AnyError>),

    /// `wait`/`wait_timeout` did not observe completion before the deadline.
    #[error("wait timed out after {0:?}")]
    Timeout(Duration),

    /// A blocked `wait`/`delayed_accept` was interrupted cooperatively via
    /// [`Composable::interrupt`](crate::composable::Composable::interrupt).
    #[error("wait was interrupted")]
    Interrupted,

    /// Malformed configuration, e.g. an unparsable `reactor.max.await.timeout`.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ReactorError {
    /// Wrap an arbitrary error as a latched composable failure.
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ReactorError::Failed(Arc::new(err))
    }
}

/// A simple string-backed error, used to wrap caught combinator panics
/// (Rust has no checked exceptions; `map`/`filter`/`reduce` closures are
/// run under `catch_unwind` and a panic payload becomes one of these).
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PanicError(pub String);

/// Result type alias for reactor operations.
pub type Result<T> = std::result::Result<T, ReactorError>;
