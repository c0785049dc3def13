// Event metadata and payloads
//
// Every event carries an immutable `EventMeta` built at emit time: identity,
// full dotted path, the emitting scope's trace stamp, and a payload drawn
// from the closed `EventBody` union. Emitters keep a name -> kind registry
// so a payload of the wrong kind is rejected at the emit site rather than
// inside some listener.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, RuntimeError};

/// Correlates an event to the run that produced it.
///
/// `group_id` is constant across a whole run tree; `run_id` is unique per
/// scope; `parent_run_id` links a nested run to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub group_id: Uuid,
    pub run_id: Uuid,
    pub parent_run_id: Option<Uuid>,
}

/// Payload kind, the discriminant of [`EventBody`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Empty,
    Text,
    Json,
    Error,
}

/// Closed payload union carried by every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventBody {
    /// No payload.
    Empty,
    /// Free-form text.
    Text(String),
    /// Structured payload; typed domain payloads serialize into this.
    Json(Value),
    /// A normalized error.
    Error(ErrorBody),
}

impl EventBody {
    /// Serialize a typed payload into the `Json` variant.
    pub fn json<T: Serialize>(payload: &T) -> Result<Self> {
        let value = serde_json::to_value(payload)
            .map_err(|e| RuntimeError::internal(format!("event payload serialization: {e}")))?;
        Ok(Self::Json(value))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn error(err: &RuntimeError) -> Self {
        Self::Error(ErrorBody::from_error(err))
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Empty => EventKind::Empty,
            Self::Text(_) => EventKind::Text,
            Self::Json(_) => EventKind::Json,
            Self::Error(_) => EventKind::Error,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorBody> {
        match self {
            Self::Error(body) => Some(body),
            _ => None,
        }
    }
}

/// Serializable rendition of a normalized error, used in event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub fatal: bool,
    pub retryable: bool,
    /// Cause chain, outermost first.
    pub chain: Vec<String>,
}

impl ErrorBody {
    pub fn from_error(err: &RuntimeError) -> Self {
        let mut chain = vec![err.to_string()];
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            fatal: err.is_fatal(),
            retryable: err.is_retryable(),
            chain,
        }
    }
}

/// Immutable description of one emitted event.
#[derive(Debug, Clone)]
pub struct EventMeta {
    /// Unique, time-ordered event id.
    pub id: Uuid,
    /// Local event name, e.g. `update`.
    pub name: String,
    /// Full dotted path, e.g. `agent.run.update`.
    pub path: String,
    pub created_at: DateTime<Utc>,
    /// Namespace of the emitter the event was emitted on.
    pub source: Vec<String>,
    /// Label of the component that owns the emitting scope.
    pub creator: Option<String>,
    /// Context snapshot taken from the emitting scope.
    pub context: HashMap<String, Value>,
    pub group_id: Option<Uuid>,
    pub trace: Option<Trace>,
    pub body: EventBody,
}

impl EventMeta {
    /// Run id stamped on the event, when it was produced inside a run.
    pub fn run_id(&self) -> Option<Uuid> {
        self.trace.map(|t| t.run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_kinds() {
        assert_eq!(EventBody::Empty.kind(), EventKind::Empty);
        assert_eq!(EventBody::text("hi").kind(), EventKind::Text);
        assert_eq!(
            EventBody::Json(serde_json::json!({"a": 1})).kind(),
            EventKind::Json
        );
        assert_eq!(
            EventBody::error(&RuntimeError::model("x")).kind(),
            EventKind::Error
        );
    }

    #[test]
    fn test_json_body_from_typed_payload() {
        #[derive(Serialize)]
        struct Update {
            key: &'static str,
            value: u32,
        }
        let body = EventBody::json(&Update {
            key: "thought",
            value: 7,
        })
        .unwrap();
        assert_eq!(body.as_json().unwrap()["key"], "thought");
        assert_eq!(body.as_json().unwrap()["value"], 7);
    }

    #[test]
    fn test_error_body_captures_chain_and_flags() {
        let inner = RuntimeError::model_retryable("rate limited");
        let outer = RuntimeError::bus("agent.run.update", inner);
        let body = ErrorBody::from_error(&outer);

        assert_eq!(body.chain.len(), 2);
        assert!(body.chain[1].contains("rate limited"));
        assert!(!body.fatal);
        assert!(!body.retryable);
    }

    #[test]
    fn test_body_serde_tagging() {
        let body = EventBody::text("partial");
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["kind"], "text");
        assert_eq!(value["data"], "partial");

        let back: EventBody = serde_json::from_value(value).unwrap();
        assert_eq!(back.as_text(), Some("partial"));
    }
}
