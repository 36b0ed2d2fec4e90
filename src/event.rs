//! Event envelope carried across the [`Observable`](crate::observable::Observable) bus

use crate::selector::Selector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Header carrying the current `expectedAcceptCount` target, set by
/// delayed sources on every event they dispatch.
pub const HEADER_EXPECTED_ACCEPT_COUNT: &str = "x-reactor-expectedAcceptCount";

/// A bus payload: arbitrary data plus headers and an optional reply-to
/// selector used for request/reply stitching (see `map(selector, bus)`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event<T> {
    /// The carried value.
    pub data: T,

    /// Arbitrary string headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Reply-to selector, used by `map(selector, bus)` to correlate an
    /// RPC-style response back to the requester. Not serializable (a
    /// selector is an in-process matcher, not wire data).
    #[serde(skip)]
    pub reply_to: Option<Arc<dyn Selector>>,
}

impl<T> Event<T> {
    /// Wrap a value with no headers and no reply-to.
    pub fn new(data: T) -> Self {
        Self {
            data,
            headers: HashMap::new(),
            reply_to: None,
        }
    }

    /// Attach a header, builder-style.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Attach a reply-to selector, builder-style.
    pub fn with_reply_to(mut self, selector: Arc<dyn Selector>) -> Self {
        self.reply_to = Some(selector);
        self
    }

    /// Read the `x-reactor-expectedAcceptCount` header, if present and parseable.
    pub fn expected_accept_count(&self) -> Option<i64> {
        self.headers
            .get(HEADER_EXPECTED_ACCEPT_COUNT)
            .and_then(|v| v.parse().ok())
    }

    /// Map the carried data, preserving headers and reply-to.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Event<U> {
        Event {
            data: f(self.data),
            headers: self.headers,
            reply_to: self.reply_to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_has_no_headers() {
        let event = Event::new(42);
        assert_eq!(event.data, 42);
        assert!(event.headers.is_empty());
        assert!(event.reply_to.is_none());
    }

    #[test]
    fn with_header_round_trips() {
        let event = Event::new("ping")
            .with_header(HEADER_EXPECTED_ACCEPT_COUNT, "3");
        assert_eq!(event.expected_accept_count(), Some(3));
    }

    #[test]
    fn map_preserves_headers() {
        let event = Event::new(2).with_header("k", "v");
        let mapped = event.map(|n| n * 10);
        assert_eq!(mapped.data, 20);
        assert_eq!(mapped.headers.get("k"), Some(&"v".to_string()));
    }

    #[test]
    fn serialization_skips_reply_to() {
        let event = Event::new(serde_json::json!({"rate": 7.35})).with_header("a", "b");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"data\""));
        assert!(json.contains("\"headers\""));
        assert!(!json.contains("replyTo"));
    }
}
