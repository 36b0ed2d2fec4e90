//! Selectors and the subscriber registry
//!
//! A [`Selector`] is an opaque matcher used both as a subscription key and
//! for routing: `on(selector, consumer)` registers against one, `notify(key,
//! event)` finds every registered selector whose `matches(key)` is `true`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque matcher contract. Implementers include object-equality,
/// class-assignability (for error routing), regex, URI-path, and predicate
/// selectors. Anonymous selectors generate unique identities.
pub trait Selector: Send + Sync + fmt::Debug {
    /// Returns `true` if this selector matches the given routing key.
    fn matches(&self, key: &dyn Any) -> bool;
}

/// A unique, anonymous selector. Matches only another `AnonymousSelector`
/// carrying the same identity (itself, typically — these are created
/// per-composable and never shared except by explicit `Arc` clone).
#[derive(Debug, Clone)]
pub struct AnonymousSelector {
    id: Uuid,
}

impl AnonymousSelector {
    /// Create a fresh anonymous selector with a unique identity.
    pub fn new() -> Arc<Self> {
        Arc::new(Self { id: Uuid::new_v4() })
    }
}

impl Default for AnonymousSelector {
    fn default() -> Self {
        Self { id: Uuid::new_v4() }
    }
}

impl Selector for AnonymousSelector {
    fn matches(&self, key: &dyn Any) -> bool {
        key.downcast_ref::<AnonymousSelector>()
            .map(|other| other.id == self.id)
            .unwrap_or(false)
    }
}

impl PartialEq for AnonymousSelector {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Matches by equality against a held key value.
#[derive(Debug, Clone)]
pub struct ObjectSelector<K> {
    key: K,
}

impl<K> ObjectSelector<K> {
    /// Create a selector that matches keys equal to `key`.
    pub fn new(key: K) -> Self {
        Self { key }
    }
}

impl<K> Selector for ObjectSelector<K>
where
    K: PartialEq + fmt::Debug + Send + Sync + 'static,
{
    fn matches(&self, key: &dyn Any) -> bool {
        key.downcast_ref::<K>().map(|k| k == &self.key).unwrap_or(false)
    }
}

/// Matches by an arbitrary predicate over the routing key.
pub struct PredicateSelector {
    predicate: Box<dyn Fn(&dyn Any) -> bool + Send + Sync>,
}

impl PredicateSelector {
    /// Create a selector from a predicate closure.
    pub fn new(predicate: impl Fn(&dyn Any) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
        }
    }
}

impl fmt::Debug for PredicateSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateSelector").finish_non_exhaustive()
    }
}

impl Selector for PredicateSelector {
    fn matches(&self, key: &dyn Any) -> bool {
        (self.predicate)(key)
    }
}

/// A class-selector: matches keys whose concrete type is exactly `E`.
///
/// Rust has no runtime class hierarchy, so this is the nearest analog to
/// the original `SuperClass.isAssignableFrom(throwable.class)` routing
/// rule — an exact-type match rather than a supertype match. It is used
/// for the exception-routing channel (`when(E, handler)`).
pub struct ClassSelector<E> {
    _marker: std::marker::PhantomData<E>,
}

impl<E> ClassSelector<E> {
    /// Create a selector matching routing keys of concrete type `E`.
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<E> Default for ClassSelector<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ClassSelector<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassSelector")
            .field("type", &std::any::type_name::<E>())
            .finish()
    }
}

impl<E: 'static> Selector for ClassSelector<E> {
    fn matches(&self, key: &dyn Any) -> bool {
        key.is::<E>()
    }
}

/// Matches string subjects against a compiled regular expression.
#[derive(Debug)]
pub struct RegexSelector {
    pattern: regex::Regex,
}

impl RegexSelector {
    /// Compile a regex selector. Returns `Err` on an invalid pattern.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: regex::Regex::new(pattern)?,
        })
    }
}

impl Selector for RegexSelector {
    fn matches(&self, key: &dyn Any) -> bool {
        key.downcast_ref::<String>()
            .map(|s| self.pattern.is_match(s))
            .or_else(|| key.downcast_ref::<&str>().map(|s| self.pattern.is_match(s)))
            .unwrap_or(false)
    }
}

/// Matches dot-separated subjects against a template with `{param}`
/// placeholders and a trailing `>` wildcard, in the spirit of the
/// subject-wildcard conventions used by topic-based pub/sub systems.
#[derive(Debug)]
pub struct UriPathSelector {
    segments: Vec<PathSegment>,
}

#[derive(Debug, PartialEq, Eq)]
enum PathSegment {
    Literal(String),
    Param(String),
    /// `>` — matches one or more trailing segments.
    Rest,
}

impl UriPathSelector {
    /// Build a selector from a template like `events.market.{topic}` or
    /// `events.market.>`.
    pub fn new(template: &str) -> Self {
        let segments = template
            .split('.')
            .map(|seg| {
                if seg == ">" {
                    PathSegment::Rest
                } else if seg.starts_with('{') && seg.ends_with('}') {
                    PathSegment::Param(seg[1..seg.len() - 1].to_string())
                } else {
                    PathSegment::Literal(seg.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    /// Extract the named parameters from a subject that matches this
    /// template, or `None` if it doesn't match.
    pub fn params(&self, subject: &str) -> Option<Vec<(String, String)>> {
        let parts: Vec<&str> = subject.split('.').collect();
        let mut out = Vec::new();
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                PathSegment::Rest => return Some(out),
                PathSegment::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                PathSegment::Param(name) => {
                    let value = parts.get(i)?;
                    out.push((name.clone(), value.to_string()));
                }
            }
        }
        if parts.len() == self.segments.len() {
            Some(out)
        } else {
            None
        }
    }
}

impl Selector for UriPathSelector {
    fn matches(&self, key: &dyn Any) -> bool {
        key.downcast_ref::<String>()
            .map(|s| self.params(s).is_some())
            .or_else(|| key.downcast_ref::<&str>().map(|s| self.params(s).is_some()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_selectors_are_distinct() {
        let a = AnonymousSelector::new();
        let b = AnonymousSelector::new();
        assert!(a.matches(&*a));
        assert!(!a.matches(&*b));
    }

    #[test]
    fn object_selector_matches_equal_keys() {
        let sel = ObjectSelector::new("market".to_string());
        let key: &dyn Any = &"market".to_string();
        assert!(sel.matches(key));
        let other: &dyn Any = &"system".to_string();
        assert!(!sel.matches(other));
    }

    #[test]
    fn predicate_selector_matches_custom_logic() {
        let sel = PredicateSelector::new(|key| {
            key.downcast_ref::<i32>().map(|n| *n % 2 == 0).unwrap_or(false)
        });
        let even: &dyn Any = &4i32;
        let odd: &dyn Any = &5i32;
        assert!(sel.matches(even));
        assert!(!sel.matches(odd));
    }

    #[derive(Debug)]
    struct MarketError;
    #[derive(Debug)]
    struct SystemError;

    #[test]
    fn class_selector_matches_exact_type_only() {
        let sel = ClassSelector::<MarketError>::new();
        let m: &dyn Any = &MarketError;
        let s: &dyn Any = &SystemError;
        assert!(sel.matches(m));
        assert!(!sel.matches(s));
    }

    #[test]
    fn regex_selector_matches_subject_strings() {
        let sel = RegexSelector::new(r"^events\.market\..+$").unwrap();
        let hit: &dyn Any = &"events.market.forex".to_string();
        let miss: &dyn Any = &"events.system.deploy".to_string();
        assert!(sel.matches(hit));
        assert!(!sel.matches(miss));
    }

    #[test]
    fn uri_path_selector_extracts_params() {
        let sel = UriPathSelector::new("events.{category}.{topic}");
        let params = sel.params("events.market.forex").unwrap();
        assert_eq!(
            params,
            vec![
                ("category".to_string(), "market".to_string()),
                ("topic".to_string(), "forex".to_string())
            ]
        );
        assert!(sel.params("events.market").is_none());
    }

    #[test]
    fn uri_path_selector_rest_wildcard() {
        let sel = UriPathSelector::new("events.market.>");
        assert!(sel.matches(&"events.market.forex.usd_cny".to_string() as &dyn Any));
        assert!(!sel.matches(&"events.system.deploy".to_string() as &dyn Any));
    }
}
