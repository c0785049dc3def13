// Incremental reply decoder
//
// Model replies are line-oriented: each structured field starts with a
// known prefix and runs until a later field in the sequence begins or the
// stream ends. The decoder consumes arbitrary text deltas, buffers until
// a full line is available, and reports partial/complete field updates
// as it goes. Sequence: thought -> {tool name, final answer},
// tool name -> tool input -> tool output -> final answer.
//
// A prefix line that would move backwards (or repeat the current field)
// is treated as plain content of the current field, so a reply quoting
// "Thought:" inside a final answer does not restart the automaton.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use runloom_runtime::{Result, RuntimeError};

/// Structured reply fields, in sequence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Field {
    Thought,
    ToolName,
    ToolInput,
    ToolOutput,
    FinalAnswer,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Thought,
        Field::ToolName,
        Field::ToolInput,
        Field::ToolOutput,
        Field::FinalAnswer,
    ];

    /// Wire prefix opening this field.
    pub fn prefix(&self) -> &'static str {
        match self {
            Field::Thought => "Thought:",
            Field::ToolName => "Function Name:",
            Field::ToolInput => "Function Input:",
            Field::ToolOutput => "Function Output:",
            Field::FinalAnswer => "Final Answer:",
        }
    }

    /// Snake-case name used in event payloads.
    pub fn key(&self) -> &'static str {
        match self {
            Field::Thought => "thought",
            Field::ToolName => "tool_name",
            Field::ToolInput => "tool_input",
            Field::ToolOutput => "tool_output",
            Field::FinalAnswer => "final_answer",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Progress reported while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeUpdate {
    /// Stream text attributed to the field it was written under. A delta
    /// spanning a field boundary is split there, so text ahead of an
    /// opening prefix line still goes to the field that line closes. The
    /// opening prefix itself is included verbatim; nothing is reported
    /// before the first field opens.
    Partial { field: Field, delta: String },
    /// A field closed because a later one began (or the stream ended).
    Complete { field: Field, value: String },
}

/// Structured outcome of one iteration.
///
/// Finalized when either a complete tool call (name and input) or a
/// final answer is present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    pub thought: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_output: Option<String>,
    pub final_answer: Option<String>,
}

impl IterationResult {
    pub fn has_tool_call(&self) -> bool {
        self.tool_name.is_some() && self.tool_input.is_some()
    }

    pub fn is_final(&self) -> bool {
        self.final_answer.is_some()
    }

    /// Reconstruct the line-prefixed reply text, for persisting the
    /// exchange back into the conversation history.
    pub fn to_reply_text(&self) -> String {
        let mut lines = Vec::new();
        if let Some(thought) = &self.thought {
            lines.push(format!("Thought: {thought}"));
        }
        if let Some(name) = &self.tool_name {
            lines.push(format!("Function Name: {name}"));
        }
        if let Some(input) = &self.tool_input {
            lines.push(format!("Function Input: {input}"));
        }
        if let Some(output) = &self.tool_output {
            lines.push(format!("Function Output: {output}"));
        }
        if let Some(answer) = &self.final_answer {
            lines.push(format!("Final Answer: {answer}"));
        }
        lines.join("\n")
    }
}

/// Incremental decoder over one model reply.
#[derive(Debug, Default)]
pub struct ReplyDecoder {
    pending: String,
    current: Option<Field>,
    values: [Option<String>; 5],
    raw: String,
}

impl ReplyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stream delta; returns the updates it produced.
    pub fn push(&mut self, delta: &str) -> Vec<DecodeUpdate> {
        self.raw.push_str(delta);
        // Carried bytes never contain a newline; every complete line is
        // drained before push returns.
        let carried = self.pending.len();
        self.pending.push_str(delta);

        let mut updates = Vec::new();
        let mut consumed = 0usize;
        let mut segment_start = 0usize;
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let line_start = consumed;
            consumed += line.len();
            let trimmed = line.trim_end_matches(['\n', '\r']);
            // A line opening a later field closes the running one; the
            // slice of this delta ahead of that line still belongs to
            // the field being closed.
            if self.opening_field(trimmed).is_some() {
                let boundary = line_start.saturating_sub(carried);
                if let Some(field) = self.current {
                    if boundary > segment_start {
                        updates.push(DecodeUpdate::Partial {
                            field,
                            delta: delta[segment_start..boundary].to_string(),
                        });
                    }
                }
                segment_start = segment_start.max(boundary);
            }
            self.take_line(trimmed, &mut updates);
        }
        if let Some(field) = self.current {
            if delta.len() > segment_start {
                updates.push(DecodeUpdate::Partial {
                    field,
                    delta: delta[segment_start..].to_string(),
                });
            }
        }
        updates
    }

    /// True once a complete tool call is decoded and its input field has
    /// closed; the loop stops consuming the stream at this point.
    pub fn tool_call_ready(&self) -> bool {
        matches!(self.current, Some(field) if field > Field::ToolInput)
            && self.values[Field::ToolName.index()].is_some()
            && self.values[Field::ToolInput.index()].is_some()
    }

    /// Consume the decoder at end of stream and produce the result.
    ///
    /// Fails with a decode error when the reply is not actionable: no
    /// output at all, a tool call without input, or structured fields
    /// that add up to neither a tool call nor a final answer. When no
    /// structured field matched but raw text exists, the fallback
    /// synthesizes a recovered final answer from it.
    pub fn finish(mut self) -> Result<IterationResult> {
        let mut updates = Vec::new();
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            self.take_line(pending.trim_end_matches('\r'), &mut updates);
        }
        self.complete_current(&mut updates);

        if self.values.iter().all(Option::is_none) {
            let raw = self.raw.trim();
            if raw.is_empty() {
                return Err(RuntimeError::decode("model produced no output"));
            }
            return Ok(IterationResult {
                thought: Some("recovered".to_string()),
                final_answer: Some(raw.to_string()),
                ..Default::default()
            });
        }

        let thought = self.value(Field::Thought);
        let tool_name = self.value(Field::ToolName);
        let tool_output = self.value(Field::ToolOutput);
        let final_answer = self.value(Field::FinalAnswer);
        let tool_input = match self.value(Field::ToolInput) {
            Some(text) => Some(serde_json::from_str::<Value>(&text).map_err(|e| {
                RuntimeError::decode(format!("tool input is not valid JSON: {e}"))
            })?),
            None => None,
        };

        let result = IterationResult {
            thought,
            tool_name,
            tool_input,
            tool_output,
            final_answer,
        };
        if !result.has_tool_call() && !result.is_final() {
            return Err(RuntimeError::decode(
                "reply contains neither a complete tool call nor a final answer",
            ));
        }
        Ok(result)
    }

    fn value(&self, field: Field) -> Option<String> {
        self.values[field.index()]
            .as_ref()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// The field this line would open under the forward-only sequence,
    /// with the text after its prefix.
    fn opening_field<'a>(&self, line: &'a str) -> Option<(Field, &'a str)> {
        Field::ALL.into_iter().find_map(|field| {
            let rest = line.strip_prefix(field.prefix())?;
            let allowed = match self.current {
                None => true,
                Some(current) => field > current,
            };
            allowed.then_some((field, rest))
        })
    }

    fn take_line(&mut self, line: &str, updates: &mut Vec<DecodeUpdate>) {
        if let Some((field, rest)) = self.opening_field(line) {
            let value = rest.trim_start().to_string();
            self.complete_current(updates);
            self.current = Some(field);
            self.values[field.index()] = Some(value);
            return;
        }
        // Continuation of the current field; text before the first
        // prefix stays in the raw buffer for the fallback.
        if let Some(current) = self.current {
            let value = self.values[current.index()].get_or_insert_with(String::new);
            value.push('\n');
            value.push_str(line);
        }
    }

    fn complete_current(&mut self, updates: &mut Vec<DecodeUpdate>) {
        if let Some(current) = self.current {
            let value = self.values[current.index()].clone().unwrap_or_default();
            updates.push(DecodeUpdate::Complete {
                field: current,
                value: value.trim().to_string(),
            });
        }
    }
}
