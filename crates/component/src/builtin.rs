//! Small ready-made components used by the stdio demo server and in tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::component::{
    Component, ComponentError, PromptArgument, PromptHandler, PromptMessage, ResourceHandler,
    TemplateHandler, ToolHandler,
};
use crate::context::ExecutionContext;
use crate::execution::{ExecutionWrapper, RetryPolicy};
use crate::policy::TaskPolicy;

/// Returns `value * 2`.
pub struct DoubleTool;

#[async_trait]
impl ToolHandler for DoubleTool {
    async fn call(&self, arguments: Value, _ctx: &ExecutionContext) -> Result<Value, ComponentError> {
        let value = arguments
            .get("value")
            .and_then(Value::as_i64)
            .ok_or_else(|| ComponentError::InvalidInput("'value' must be an integer".into()))?;
        value
            .checked_mul(2)
            .map(Value::from)
            .ok_or_else(|| ComponentError::InvalidInput(format!("{value} is too large to double")))
    }
}

/// Echoes its `message` argument.
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn call(&self, arguments: Value, _ctx: &ExecutionContext) -> Result<Value, ComponentError> {
        let message = arguments
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| ComponentError::InvalidInput("missing 'message' field".into()))?;
        Ok(Value::String(message.to_string()))
    }
}

/// Fails the first `failures` calls, then succeeds.
///
/// The counter is shared between clones so a retry wrapper sees progress.
#[derive(Clone)]
pub struct FlakyTool {
    failures: u32,
    calls: Arc<AtomicU32>,
}

impl FlakyTool {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolHandler for FlakyTool {
    async fn call(&self, arguments: Value, ctx: &ExecutionContext) -> Result<Value, ComponentError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            return Err(ComponentError::ExecutionFailed(format!(
                "upstream unavailable (call {n})"
            )));
        }
        let source = arguments
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or("default");
        Ok(json!({ "source": source, "attempt": ctx.attempt }))
    }
}

/// Counts to `to`, sleeping `step_ms` between steps and checking for
/// cancellation at each step.
pub struct SlowCountTool;

#[async_trait]
impl ToolHandler for SlowCountTool {
    async fn call(&self, arguments: Value, ctx: &ExecutionContext) -> Result<Value, ComponentError> {
        let to = arguments.get("to").and_then(Value::as_u64).unwrap_or(5);
        let step = Duration::from_millis(arguments.get("step_ms").and_then(Value::as_u64).unwrap_or(100));

        for _ in 0..to {
            ctx.checkpoint()?;
            tokio::select! {
                _ = ctx.cancelled() => return Err(ComponentError::Cancelled),
                _ = tokio::time::sleep(step) => {}
            }
        }
        Ok(json!({ "counted": to }))
    }
}

/// A resource with fixed text.
pub struct StaticText(String);

impl StaticText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }
}

#[async_trait]
impl ResourceHandler for StaticText {
    async fn read(&self, _ctx: &ExecutionContext) -> Result<String, ComponentError> {
        Ok(self.0.clone())
    }
}

/// Template handler returning the `text` parameter upper-cased.
pub struct UppercaseTemplate;

#[async_trait]
impl TemplateHandler for UppercaseTemplate {
    async fn read(
        &self,
        params: &HashMap<String, String>,
        _ctx: &ExecutionContext,
    ) -> Result<String, ComponentError> {
        params
            .get("text")
            .map(|t| t.to_uppercase())
            .ok_or_else(|| ComponentError::InvalidInput("missing 'text' parameter".into()))
    }
}

/// `Say hello to {name}.`
pub struct GreetingPrompt;

#[async_trait]
impl PromptHandler for GreetingPrompt {
    async fn render(
        &self,
        arguments: &HashMap<String, String>,
        _ctx: &ExecutionContext,
    ) -> Result<Vec<PromptMessage>, ComponentError> {
        let name = arguments.get("name").map(String::as_str).unwrap_or("world");
        Ok(vec![PromptMessage::user(format!("Say hello to {name}."))])
    }
}

/// The component set served by the stdio demo binary.
pub fn demo_components() -> Vec<Component> {
    vec![
        Component::tool(
            "double",
            json!({
                "type": "object",
                "properties": { "value": { "type": "integer" } },
                "required": ["value"]
            }),
            DoubleTool,
        )
        .with_description("Double an integer")
        .with_policy(TaskPolicy::Optional),
        Component::tool(
            "echo",
            json!({
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"]
            }),
            EchoTool,
        )
        .with_description("Echo a message back"),
        Component::tool(
            "flaky_fetch",
            json!({
                "type": "object",
                "properties": { "source": { "type": "string" } }
            }),
            FlakyTool::new(2),
        )
        .with_description("Fetch from an unreliable upstream, retrying on failure")
        .with_policy(TaskPolicy::Optional)
        .with_execution(
            ExecutionWrapper::new()
                .with_timeout(Duration::from_secs(5))
                .with_retry(RetryPolicy::new(3).with_initial_delay(Duration::from_millis(50))),
        ),
        Component::tool(
            "slow_count",
            json!({
                "type": "object",
                "properties": {
                    "to": { "type": "integer" },
                    "step_ms": { "type": "integer" }
                }
            }),
            SlowCountTool,
        )
        .with_title("Slow counter")
        .with_description("Count slowly; always runs as a background task")
        .with_policy(TaskPolicy::Required),
        Component::resource("data://readme", StaticText::new("taskwire demo server"))
            .with_mime_type("text/plain")
            .with_policy(TaskPolicy::Optional),
        Component::template("upper://{text}", UppercaseTemplate)
            .with_mime_type("text/plain")
            .with_policy(TaskPolicy::Optional),
        Component::prompt("greet", GreetingPrompt)
            .with_description("Greet someone")
            .with_policy(TaskPolicy::Optional)
            .with_prompt_argument(PromptArgument {
                name: "name".to_string(),
                description: Some("Who to greet".to_string()),
                required: true,
            }),
    ]
}
