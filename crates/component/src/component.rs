use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::context::ExecutionContext;
use crate::execution::ExecutionWrapper;
use crate::policy::TaskPolicy;
use crate::uri::expand_uri_template;

/// The four kinds of invocable component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Tool,
    Resource,
    Template,
    Prompt,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Tool => "tool",
            ComponentKind::Resource => "resource",
            ComponentKind::Template => "template",
            ComponentKind::Prompt => "prompt",
        }
    }

    /// Human-facing label used in error messages.
    pub fn label(&self) -> &'static str {
        match self {
            ComponentKind::Tool => "Tool",
            ComponentKind::Resource => "Resource",
            ComponentKind::Template => "ResourceTemplate",
            ComponentKind::Prompt => "Prompt",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tool" => Ok(ComponentKind::Tool),
            "resource" => Ok(ComponentKind::Resource),
            "template" => Ok(ComponentKind::Template),
            "prompt" => Ok(ComponentKind::Prompt),
            other => Err(format!("unknown component kind '{other}'")),
        }
    }
}

// ── Outputs ─────────────────────────────────────────────────────────

/// One block of resource content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    User,
    Assistant,
}

/// A rendered prompt message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub text: String,
}

impl PromptMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            text: text.into(),
        }
    }
}

/// Declared prompt argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// The value produced by running a component body, tagged by kind.
/// Templates produce `Resource` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ComponentOutput {
    Tool(Value),
    Resource(Vec<ResourceContent>),
    Prompt(Vec<PromptMessage>),
}

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComponentError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    #[error("Cancelled")]
    Cancelled,
}

impl ComponentError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ComponentError::InvalidInput(_) => "invalid_input",
            ComponentError::ExecutionFailed(_) => "execution_failed",
            ComponentError::Timeout(_) => "timeout",
            ComponentError::Cancelled => "cancelled",
        }
    }

    /// Whether a retry wrapper may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ComponentError::ExecutionFailed(_) | ComponentError::Timeout(_)
        )
    }
}

// ── Handler traits ──────────────────────────────────────────────────

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value, ctx: &ExecutionContext) -> Result<Value, ComponentError>;
}

#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(&self, ctx: &ExecutionContext) -> Result<String, ComponentError>;
}

#[async_trait]
pub trait TemplateHandler: Send + Sync {
    async fn read(
        &self,
        params: &HashMap<String, String>,
        ctx: &ExecutionContext,
    ) -> Result<String, ComponentError>;
}

#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn render(
        &self,
        arguments: &HashMap<String, String>,
        ctx: &ExecutionContext,
    ) -> Result<Vec<PromptMessage>, ComponentError>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnTool<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(Value, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ComponentError>> + Send + 'static,
{
    async fn call(&self, arguments: Value, ctx: &ExecutionContext) -> Result<Value, ComponentError> {
        (self.0)(arguments, ctx.clone()).await
    }
}

// ── Component ───────────────────────────────────────────────────────

/// Kind-specific metadata plus the callable body.
#[derive(Clone)]
pub enum ComponentBody {
    Tool {
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
    },
    Resource {
        uri: String,
        mime_type: Option<String>,
        handler: Arc<dyn ResourceHandler>,
    },
    Template {
        uri_template: String,
        mime_type: Option<String>,
        handler: Arc<dyn TemplateHandler>,
    },
    Prompt {
        arguments: Vec<PromptArgument>,
        handler: Arc<dyn PromptHandler>,
    },
}

impl ComponentBody {
    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentBody::Tool { .. } => ComponentKind::Tool,
            ComponentBody::Resource { .. } => ComponentKind::Resource,
            ComponentBody::Template { .. } => ComponentKind::Template,
            ComponentBody::Prompt { .. } => ComponentKind::Prompt,
        }
    }
}

impl fmt::Debug for ComponentBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentBody::{}", self.kind().label())
    }
}

/// An invocable unit: tool, resource, resource template or prompt.
///
/// Immutable once registered; the registry hands out `Arc<Component>`.
#[derive(Debug, Clone)]
pub struct Component {
    key: String,
    title: Option<String>,
    description: Option<String>,
    policy: TaskPolicy,
    execution: Option<ExecutionWrapper>,
    body: ComponentBody,
}

impl Component {
    fn with_body(key: String, body: ComponentBody) -> Self {
        Self {
            key,
            title: None,
            description: None,
            policy: TaskPolicy::default(),
            execution: None,
            body,
        }
    }

    /// A tool keyed by its name.
    pub fn tool(
        name: impl Into<String>,
        input_schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self::with_body(
            name.into(),
            ComponentBody::Tool {
                input_schema,
                handler: Arc::new(handler),
            },
        )
    }

    /// A static resource keyed by its URI.
    pub fn resource(uri: impl Into<String>, handler: impl ResourceHandler + 'static) -> Self {
        let uri = uri.into();
        Self::with_body(
            uri.clone(),
            ComponentBody::Resource {
                uri,
                mime_type: None,
                handler: Arc::new(handler),
            },
        )
    }

    /// A resource template keyed by its URI pattern (`weather://{city}`).
    pub fn template(
        uri_template: impl Into<String>,
        handler: impl TemplateHandler + 'static,
    ) -> Self {
        let uri_template = uri_template.into();
        Self::with_body(
            uri_template.clone(),
            ComponentBody::Template {
                uri_template,
                mime_type: None,
                handler: Arc::new(handler),
            },
        )
    }

    /// A prompt keyed by its name.
    pub fn prompt(name: impl Into<String>, handler: impl PromptHandler + 'static) -> Self {
        Self::with_body(
            name.into(),
            ComponentBody::Prompt {
                arguments: Vec::new(),
                handler: Arc::new(handler),
            },
        )
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_policy(mut self, policy: TaskPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attach retry/timeout behaviour to the body.
    pub fn with_execution(mut self, wrapper: ExecutionWrapper) -> Self {
        self.execution = Some(wrapper);
        self
    }

    /// Ignored for tools and prompts.
    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        match &mut self.body {
            ComponentBody::Resource { mime_type, .. } | ComponentBody::Template { mime_type, .. } => {
                *mime_type = Some(mime.into());
            }
            _ => {}
        }
        self
    }

    /// Ignored for anything but prompts.
    pub fn with_prompt_argument(mut self, argument: PromptArgument) -> Self {
        if let ComponentBody::Prompt { arguments, .. } = &mut self.body {
            arguments.push(argument);
        }
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> ComponentKind {
        self.body.kind()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn policy(&self) -> TaskPolicy {
        self.policy
    }

    pub fn execution(&self) -> Option<&ExecutionWrapper> {
        self.execution.as_ref()
    }

    pub fn body(&self) -> &ComponentBody {
        &self.body
    }

    /// `Tool 'Double a number'`, falling back to the key when untitled.
    pub fn label(&self) -> String {
        format!(
            "{} '{}'",
            self.kind().label(),
            self.title.as_deref().unwrap_or(&self.key)
        )
    }

    /// Run the body under its execution wrapper, if any.
    pub async fn execute(
        &self,
        arguments: &Value,
        ctx: &ExecutionContext,
    ) -> Result<ComponentOutput, ComponentError> {
        match &self.execution {
            Some(wrapper) => {
                wrapper
                    .run(ctx, move |attempt_ctx| async move {
                        self.invoke(arguments, &attempt_ctx).await
                    })
                    .await
            }
            None => self.invoke(arguments, ctx).await,
        }
    }

    /// Run the body once, without any retry/timeout wrapping.
    ///
    /// `arguments` is the JSON snapshot stored with a task: tool arguments,
    /// template parameters or prompt arguments. Static resources ignore it.
    pub async fn invoke(
        &self,
        arguments: &Value,
        ctx: &ExecutionContext,
    ) -> Result<ComponentOutput, ComponentError> {
        ctx.checkpoint()?;
        match &self.body {
            ComponentBody::Tool { handler, .. } => {
                handler.call(arguments.clone(), ctx).await.map(ComponentOutput::Tool)
            }
            ComponentBody::Resource {
                uri,
                mime_type,
                handler,
            } => {
                let text = handler.read(ctx).await?;
                Ok(ComponentOutput::Resource(vec![ResourceContent {
                    uri: uri.clone(),
                    mime_type: mime_type.clone(),
                    text,
                }]))
            }
            ComponentBody::Template {
                uri_template,
                mime_type,
                handler,
            } => {
                let params = string_map(arguments)?;
                let text = handler.read(&params, ctx).await?;
                Ok(ComponentOutput::Resource(vec![ResourceContent {
                    uri: expand_uri_template(uri_template, &params),
                    mime_type: mime_type.clone(),
                    text,
                }]))
            }
            ComponentBody::Prompt {
                arguments: declared,
                handler,
            } => {
                let args = string_map(arguments)?;
                if let Some(missing) = declared
                    .iter()
                    .find(|a| a.required && !args.contains_key(&a.name))
                {
                    return Err(ComponentError::InvalidInput(format!(
                        "missing required argument '{}'",
                        missing.name
                    )));
                }
                handler.render(&args, ctx).await.map(ComponentOutput::Prompt)
            }
        }
    }
}

/// Flatten a JSON object into string values; `null` is an empty map.
fn string_map(value: &Value) -> Result<HashMap<String, String>, ComponentError> {
    match value {
        Value::Null => Ok(HashMap::new()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| {
                let s = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), s)
            })
            .collect()),
        other => Err(ComponentError::InvalidInput(format!(
            "expected an object of arguments, got {other}"
        ))),
    }
}
