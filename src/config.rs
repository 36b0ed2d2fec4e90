//! Process-wide configuration knob: `reactor.max.await.timeout`
//!
//! Read once into an immutable value rather than re-parsed on every
//! `Composable::wait()` call. Format is `<integer><unit?>` where unit is
//! one of `ns`, `ms`, `s` (default unit `s` when omitted); default value
//! `30s`. Parse failures are logged and ignored — the default stands.

use std::sync::OnceLock;
use std::time::Duration;

const ENV_VAR: &str = "reactor.max.await.timeout";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

static DEFAULT_WAIT_TIMEOUT: OnceLock<Duration> = OnceLock::new();

/// The default timeout used by `Composable::wait()` (no explicit
/// duration). Computed once from the `reactor.max.await.timeout`
/// environment variable; subsequent calls return the cached value.
pub fn default_wait_timeout() -> Duration {
    *DEFAULT_WAIT_TIMEOUT.get_or_init(|| {
        match std::env::var(ENV_VAR) {
            Ok(raw) => parse_timeout(&raw).unwrap_or_else(|| {
                tracing::warn!(
                    value = %raw,
                    "failed to parse {} — using default of {:?}",
                    ENV_VAR,
                    DEFAULT_TIMEOUT
                );
                DEFAULT_TIMEOUT
            }),
            Err(_) => DEFAULT_TIMEOUT,
        }
    })
}

/// Parse a `<integer><ns|ms|s>?` duration string. Returns `None` on any
/// malformed input (non-numeric prefix, unrecognized unit suffix, etc).
pub fn parse_timeout(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw {
        s if s.ends_with("ns") => (&s[..s.len() - 2], "ns"),
        s if s.ends_with("ms") => (&s[..s.len() - 2], "ms"),
        s if s.ends_with('s') => (&s[..s.len() - 1], "s"),
        s => (s, "s"),
    };
    let value: u64 = digits.parse().ok()?;
    Some(match unit {
        "ns" => Duration::from_nanos(value),
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}
