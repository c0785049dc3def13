// Tool abstraction
//
// Tools are defined via a trait and gathered into a registry the loop
// resolves against by name, case-insensitively. The registry only maps
// names to implementations; failure classification (invalid input vs
// execution failure) happens through the error taxonomy.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use runloom_runtime::{Result, RuntimeError};

/// Output of one tool execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    content: String,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn text_content(&self) -> &str {
        &self.content
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

impl From<String> for ToolOutput {
    fn from(content: String) -> Self {
        Self { content }
    }
}

/// A callable capability the model can request by name.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the expected input object.
    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn run(&self, input: Value) -> Result<ToolOutput>;
}

/// Serializable description of a tool, handed to the model and to the
/// system-prompt template.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.input_schema(),
        }
    }
}

/// Ordered tool collection with case-insensitive name resolution.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names must be unique ignoring case, since
    /// resolution is case-insensitive.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<&mut Self> {
        let name = tool.name().to_string();
        if self.resolve(&name).is_some() {
            return Err(RuntimeError::internal(format!(
                "tool '{name}' is already registered"
            )));
        }
        self.tools.push(Arc::new(tool));
        Ok(self)
    }

    /// Builder form of [`ToolRegistry::register`].
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Result<Self> {
        self.register(tool)?;
        Ok(self)
    }

    /// Case-insensitive exact name match.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| ToolSpec::of(t.as_ref())).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

/// Tool that echoes its input back. For examples and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the provided input back unchanged"
    }

    async fn run(&self, input: Value) -> Result<ToolOutput> {
        Ok(ToolOutput::text(input.to_string()))
    }
}

/// Tool that always fails with a configurable error class. For tests.
#[derive(Debug, Clone)]
pub struct FailingTool {
    message: String,
    invalid_input: bool,
}

impl FailingTool {
    /// Fails as an input-validation error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            invalid_input: true,
        }
    }

    /// Fails as an execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            invalid_input: false,
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }

    fn description(&self) -> &str {
        "Always fails; exercises the loop's recovery paths"
    }

    async fn run(&self, _input: Value) -> Result<ToolOutput> {
        if self.invalid_input {
            Err(RuntimeError::tool_input(self.name(), self.message.clone()))
        } else {
            Err(RuntimeError::tool_execution(self.name(), self.message.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_is_case_insensitive_exact() {
        let registry = ToolRegistry::new().with_tool(EchoTool).unwrap();

        assert!(registry.resolve("echo").is_some());
        assert!(registry.resolve("ECHO").is_some());
        assert!(registry.resolve("Echo").is_some());
        assert!(registry.resolve("ech").is_none());
        assert!(registry.resolve("echo ").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected_ignoring_case() {
        #[derive(Debug)]
        struct UpperEcho;

        #[async_trait]
        impl Tool for UpperEcho {
            fn name(&self) -> &str {
                "Echo"
            }
            fn description(&self) -> &str {
                "shadow"
            }
            async fn run(&self, _input: Value) -> Result<ToolOutput> {
                Ok(ToolOutput::default())
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        assert!(registry.register(UpperEcho).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_echo_round_trips_input() {
        let output = EchoTool.run(json!({"text": "hi"})).await.unwrap();
        assert_eq!(output.text_content(), r#"{"text":"hi"}"#);
        assert!(!output.is_empty());
    }

    #[tokio::test]
    async fn test_failing_tool_classifies() {
        let input_err = FailingTool::invalid_input("missing field")
            .run(json!({}))
            .await
            .unwrap_err();
        assert!(matches!(input_err, RuntimeError::ToolInput { .. }));
        assert!(!input_err.is_retryable());

        let exec_err = FailingTool::execution("connection reset")
            .run(json!({}))
            .await
            .unwrap_err();
        assert!(matches!(exec_err, RuntimeError::ToolExecution { .. }));
        assert!(exec_err.is_retryable());
    }

    #[test]
    fn test_output_emptiness_ignores_whitespace() {
        assert!(ToolOutput::text("  \n ").is_empty());
        assert!(!ToolOutput::text("0").is_empty());
    }

    #[test]
    fn test_specs_carry_schema() {
        let registry = ToolRegistry::new().with_tool(EchoTool).unwrap();
        let specs = registry.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "echo");
        assert_eq!(specs[0].input_schema["type"], "object");
    }
}
