// Prompt templates
//
// All text the loop injects into the conversation is rendered from named
// minijinja templates: the system prompt with the tool listing, and the
// recovery messages fed back when a reply cannot be decoded or a tool
// call goes wrong. Callers can override any template by name.

use minijinja::Environment;
use serde::Serialize;

use runloom_runtime::{Result, RuntimeError};

/// System prompt describing the expected reply format and the tools.
const SYSTEM: &str = "\
You are a helpful assistant that solves tasks step by step.

Reply using these line-prefixed fields, in this order:
Thought: your reasoning about the next move
Function Name: the name of the tool to call
Function Input: the tool arguments as a single JSON object
Final Answer: the answer to the original question

{% if tools %}Available tools:
{% for tool in tools %}- {{ tool.name }}: {{ tool.description }}
{% endfor %}
To call a tool, reply with Thought, Function Name and Function Input.
{% else %}No tools are available; reply with Thought and Final Answer only.
{% endif %}When you have enough information, reply with Thought and Final Answer.";

const TOOL_NOT_FOUND: &str = "\
Tool \"{{ tool }}\" does not exist.{% if available %} Choose one of: \
{{ available | join(\", \") }}.{% else %} No tools are available; answer \
directly with a Final Answer.{% endif %}";

const TOOL_INPUT_ERROR: &str = "\
The input for tool \"{{ tool }}\" was invalid: {{ reason }}
Provide a corrected Function Input.";

const TOOL_EXECUTION_ERROR: &str = "\
Tool \"{{ tool }}\" failed: {{ reason }}
You may retry with a different Function Input or choose another tool.";

const FORMAT_CORRECTION: &str = "\
Your previous reply could not be processed: {{ reason }}
Reply again using the exact field prefixes \"Thought:\", \"Function Name:\", \
\"Function Input:\" and \"Final Answer:\".";

/// Template names registered by [`TemplateSet::new`].
pub const TEMPLATE_NAMES: [&str; 5] = [
    "system",
    "tool_not_found",
    "tool_input_error",
    "tool_execution_error",
    "format_correction",
];

/// Named prompt templates used by the loop.
pub struct TemplateSet {
    env: Environment<'static>,
}

impl TemplateSet {
    /// The default template set.
    pub fn new() -> Result<Self> {
        let mut set = Self {
            env: Environment::new(),
        };
        set.add("system", SYSTEM)?;
        set.add("tool_not_found", TOOL_NOT_FOUND)?;
        set.add("tool_input_error", TOOL_INPUT_ERROR)?;
        set.add("tool_execution_error", TOOL_EXECUTION_ERROR)?;
        set.add("format_correction", FORMAT_CORRECTION)?;
        Ok(set)
    }

    fn add(&mut self, name: &str, source: impl Into<String>) -> Result<()> {
        self.env
            .add_template_owned(name.to_string(), source.into())
            .map_err(|e| RuntimeError::internal(format!("template '{name}': {e}")))
    }

    /// Replace a template by name; the new source is compiled eagerly.
    pub fn with_template(mut self, name: &str, source: impl Into<String>) -> Result<Self> {
        self.add(name, source)?;
        Ok(self)
    }

    /// Render a named template over a serializable input model.
    pub fn render<M: Serialize>(&self, name: &str, model: M) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .map_err(|e| RuntimeError::internal(format!("template '{name}': {e}")))?;
        template
            .render(model)
            .map_err(|e| RuntimeError::internal(format!("template '{name}': {e}")))
    }
}

impl std::fmt::Debug for TemplateSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateSet").finish_non_exhaustive()
    }
}
