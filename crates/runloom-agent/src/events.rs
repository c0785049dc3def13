// Agent event surface
//
// The loop emits four named events on its run scope, on top of the
// lifecycle events the scope itself produces: `partial_update` while a
// reply streams in, `update` when an iteration produces a result,
// `retry` before a re-attempted model request, and `error` for failures
// the loop recovered from by feeding a message back to the model.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use runloom_runtime::EventKind;

use crate::decoder::IterationResult;

/// Payload of the `update` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationUpdate {
    pub iteration: usize,
    pub result: IterationResult,
}

/// Payload of the `partial_update` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialUpdate {
    pub iteration: usize,
    /// Snake-case field key, e.g. `final_answer`.
    pub field: String,
    pub delta: String,
}

/// Payload of the `retry` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryNotice {
    pub iteration: usize,
    /// 1-based attempt about to run.
    pub attempt: u32,
    pub reason: String,
}

/// Event name -> payload kind registry stamped on the agent's emitter.
pub(crate) fn agent_event_types() -> HashMap<String, EventKind> {
    [
        ("update".to_string(), EventKind::Json),
        ("partial_update".to_string(), EventKind::Json),
        ("retry".to_string(), EventKind::Json),
        ("error".to_string(), EventKind::Error),
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_the_surface() {
        let types = agent_event_types();
        assert_eq!(types.get("update"), Some(&EventKind::Json));
        assert_eq!(types.get("partial_update"), Some(&EventKind::Json));
        assert_eq!(types.get("retry"), Some(&EventKind::Json));
        assert_eq!(types.get("error"), Some(&EventKind::Error));
    }

    #[test]
    fn test_update_payload_serializes_result() {
        let payload = IterationUpdate {
            iteration: 2,
            result: IterationResult {
                final_answer: Some("done".to_string()),
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["iteration"], 2);
        assert_eq!(value["result"]["final_answer"], "done");
    }
}
