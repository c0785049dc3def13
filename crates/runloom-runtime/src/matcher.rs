// Listener matchers
//
// A matcher decides whether an event belongs to a listener, structurally.
// The run-isolation guard (same run id unless cross-run matching was
// requested) is applied by the emitter on top of this, so the variants
// here only answer "does this event's name/path fit".

use std::sync::Arc;

use regex::Regex;

use crate::event::EventMeta;

type PredicateFn = Arc<dyn Fn(&EventMeta) -> bool + Send + Sync>;

/// Structural event matcher.
#[derive(Clone)]
pub enum EventMatcher {
    /// `"*"` — any event emitted directly on the listening emitter,
    /// never one piped up from a descendant.
    AnyLocal,
    /// `"*.*"` — any event, including everything piped from descendants.
    AnyNested,
    /// Literal local event name, e.g. `"update"`.
    Name(String),
    /// Literal full dotted path, e.g. `"agent.run.update"`.
    Path(String),
    /// Regex over the full dotted path.
    Pattern(Regex),
    /// Arbitrary predicate over the event metadata.
    Predicate(PredicateFn),
}

impl EventMatcher {
    /// Parse the string forms: `"*"`, `"*.*"`, a local name, or a dotted
    /// path. Regex and predicate matchers are constructed directly.
    pub fn parse(expr: &str) -> Self {
        match expr {
            "*" => Self::AnyLocal,
            "*.*" => Self::AnyNested,
            other if other.contains('.') => Self::Path(other.to_string()),
            other => Self::Name(other.to_string()),
        }
    }

    pub fn predicate(f: impl Fn(&EventMeta) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(f))
    }

    /// Structural check against an event, evaluated from the point of view
    /// of the listening emitter's namespace.
    pub fn matches(&self, event: &EventMeta, namespace: &[String]) -> bool {
        match self {
            Self::AnyLocal => event.source == namespace,
            Self::AnyNested => true,
            Self::Name(name) => event.name == *name && event.source == namespace,
            Self::Path(path) => event.path == *path,
            Self::Pattern(re) => re.is_match(&event.path),
            Self::Predicate(f) => f(event),
        }
    }

    /// Default structural reach: whether this matcher looks past events
    /// emitted directly on the listening emitter.
    pub fn default_match_nested(&self) -> bool {
        match self {
            Self::AnyLocal | Self::Name(_) | Self::Predicate(_) => false,
            Self::AnyNested | Self::Path(_) | Self::Pattern(_) => true,
        }
    }
}

impl From<&str> for EventMatcher {
    fn from(expr: &str) -> Self {
        Self::parse(expr)
    }
}

impl From<Regex> for EventMatcher {
    fn from(re: Regex) -> Self {
        Self::Pattern(re)
    }
}

impl std::fmt::Debug for EventMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AnyLocal => write!(f, "AnyLocal"),
            Self::AnyNested => write!(f, "AnyNested"),
            Self::Name(name) => f.debug_tuple("Name").field(name).finish(),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            Self::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}
