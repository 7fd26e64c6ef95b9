//! MCP server implementation.
//!
//! Exposes the components of a `ComponentRegistry` over MCP. Invocations go
//! through the `TaskRouter`, which decides between inline execution and a
//! background task; `tasks/*` requests are served by [`TaskProtocol`].
//!
//! Task notifications are queued from the store's event stream and written
//! after each response, so the transport is never read and written
//! concurrently.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::TryRecvError};

use taskwire_component::{Component, ComponentBody, ComponentKind, ComponentRegistry, RegistryError};
use taskwire_core::config::{Config, DEFAULT_POLL_INTERVAL_MS};
use taskwire_tasks::{Invocation, RouteOutcome, RouterConfig, TaskError, TaskEvent, TaskRouter};

use crate::error::McpError;
use crate::tasks::{render_output, TaskProtocol};
use crate::transport::McpTransport;
use crate::types::*;

pub struct McpServer {
    router: Arc<TaskRouter>,
    protocol: TaskProtocol,
    events: Option<broadcast::Receiver<TaskEvent>>,
    server_name: String,
    server_version: String,
    initialized: bool,
}

impl McpServer {
    pub fn new(router: TaskRouter) -> Self {
        let router = Arc::new(router);
        let protocol = TaskProtocol::new(
            router.store().clone(),
            router.executor().clone(),
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        );
        let events = Some(router.store().subscribe());
        Self {
            router,
            protocol,
            events,
            server_name: "taskwire".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            initialized: false,
        }
    }

    /// Build a server from loaded configuration.
    pub fn from_config(registry: Arc<ComponentRegistry>, config: &Config) -> Self {
        let router = TaskRouter::new(registry, RouterConfig::from(&config.tasks));
        Self::new(router)
            .with_name(config.server.name.clone())
            .with_poll_interval(config.tasks.poll_interval())
            .with_notifications(config.tasks.status_notifications)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Poll interval advertised in every `TaskInfo`.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.protocol = TaskProtocol::new(
            self.router.store().clone(),
            self.router.executor().clone(),
            interval,
        );
        self
    }

    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.events = enabled.then(|| self.router.store().subscribe());
        self
    }

    pub fn router(&self) -> &Arc<TaskRouter> {
        &self.router
    }

    pub fn protocol(&self) -> &TaskProtocol {
        &self.protocol
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Run the server loop until the transport is closed.
    pub async fn run<T: McpTransport>(&mut self, transport: &mut T) -> Result<(), McpError> {
        tracing::info!(server = %self.server_name, "MCP server starting");

        loop {
            let line = match transport.receive().await? {
                Some(line) => line,
                None => {
                    tracing::info!("Transport closed, shutting down");
                    break;
                }
            };

            tracing::debug!(message = %line, "Received message");

            let raw: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse JSON");
                    let resp =
                        JsonRpcResponse::failure(RpcId::Number(0), McpError::JsonParse(e).to_rpc_error());
                    transport.send(&serde_json::to_string(&resp)?).await?;
                    continue;
                }
            };

            // No "id" means notification.
            if raw.get("id").is_none() {
                if let Ok(notif) = serde_json::from_value::<JsonRpcNotification>(raw) {
                    self.handle_notification(&notif);
                }
                continue;
            }

            let response = match serde_json::from_value::<JsonRpcRequest>(raw) {
                Ok(request) => self.handle_request(&request).await,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse JSON-RPC request");
                    JsonRpcResponse::failure(
                        RpcId::Number(0),
                        JsonRpcError {
                            code: error_codes::INVALID_REQUEST,
                            message: format!("Invalid request: {e}"),
                            data: None,
                        },
                    )
                }
            };

            let json = serde_json::to_string(&response)?;
            tracing::debug!(response = %json, "Sending response");
            transport.send(&json).await?;

            self.flush_notifications(transport).await?;
        }

        Ok(())
    }

    /// Cancel every task that is still running.
    pub fn shutdown(&self) {
        self.router.executor().shutdown();
    }

    /// Handle a single JSON-RPC request and produce a response.
    pub async fn handle_request(&mut self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        match self.dispatch(&request.method, request.params.clone()).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => {
                tracing::debug!(method = %request.method, error = %err, "Request failed");
                JsonRpcResponse::failure(id, err.to_rpc_error())
            }
        }
    }

    async fn dispatch(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        match method {
            methods::INITIALIZE => self.handle_initialize(params),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => to_value(ListToolsResult {
                tools: self.list(ComponentKind::Tool, tool_info),
            }),
            methods::TOOLS_CALL => self.handle_call_tool(parse(params)?).await,
            methods::RESOURCES_LIST => to_value(ListResourcesResult {
                resources: self.list(ComponentKind::Resource, resource_info),
            }),
            methods::RESOURCE_TEMPLATES_LIST => to_value(ListResourceTemplatesResult {
                resource_templates: self.list(ComponentKind::Template, template_info),
            }),
            methods::RESOURCES_READ => self.handle_read_resource(parse(params)?).await,
            methods::PROMPTS_LIST => to_value(ListPromptsResult {
                prompts: self.list(ComponentKind::Prompt, prompt_info),
            }),
            methods::PROMPTS_GET => self.handle_get_prompt(parse(params)?).await,
            methods::TASKS_GET => {
                let p: TaskIdParams = parse(params)?;
                self.protocol.get(&p.task_id)
            }
            methods::TASKS_RESULT => {
                let p: TaskIdParams = parse(params)?;
                self.protocol.result(&p.task_id)
            }
            methods::TASKS_LIST => {
                let p: ListTasksParams = parse_or_default(params)?;
                to_value(self.protocol.list(p)?)
            }
            methods::TASKS_CANCEL => {
                let p: TaskIdParams = parse(params)?;
                self.protocol.cancel(&p.task_id)
            }
            methods::TASKS_DELETE => {
                let p: DeleteTaskParams = parse(params)?;
                self.protocol.delete(&p.task_id, p.force)
            }
            other => {
                tracing::warn!(method = %other, "Unknown method");
                Err(McpError::MethodNotFound(other.to_string()))
            }
        }
    }

    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            methods::NOTIFY_INITIALIZED => {
                tracing::info!("Client confirmed initialization");
            }
            methods::NOTIFY_CANCELLED => {
                tracing::debug!(params = ?notif.params, "Client cancelled a request");
            }
            method => {
                tracing::debug!(method = %method, "Unknown notification, ignoring");
            }
        }
    }

    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value, McpError> {
        let client = params
            .and_then(|p| serde_json::from_value::<InitializeParams>(p).ok())
            .map(|p| p.client_info.name);
        tracing::info!(client = ?client, "Handling initialize");
        self.initialized = true;

        let tasks = self.router.config().tasks_enabled.then(|| TasksCapability {
            operations: ["get", "result", "list", "cancel", "delete"]
                .into_iter()
                .map(String::from)
                .collect(),
            requests: [methods::TOOLS_CALL, methods::RESOURCES_READ, methods::PROMPTS_GET]
                .into_iter()
                .map(String::from)
                .collect(),
        });

        to_value(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ListChangedCapability::default()),
                resources: Some(ListChangedCapability::default()),
                prompts: Some(ListChangedCapability::default()),
                tasks,
            },
            server_info: Implementation {
                name: self.server_name.clone(),
                version: Some(self.server_version.clone()),
            },
        })
    }

    fn list<I>(&self, kind: ComponentKind, describe: fn(&Component) -> I) -> Vec<I> {
        self.router
            .registry()
            .list(kind)
            .iter()
            .map(|c| describe(c))
            .collect()
    }

    async fn handle_call_tool(&self, params: CallToolParams) -> Result<Value, McpError> {
        tracing::debug!(tool = %params.name, task = params.task.is_some(), "Handling tools/call");
        let mut invocation = Invocation::new(ComponentKind::Tool, params.name, params.arguments);
        invocation.task = params.task;

        match self.router.route(invocation).await {
            Ok(outcome) => self.outcome_to_value(outcome),
            // Tool failures are results, not protocol errors.
            Err(TaskError::Component(err)) => to_value(CallToolResult::error(err.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    async fn handle_read_resource(&self, params: ReadResourceParams) -> Result<Value, McpError> {
        tracing::debug!(uri = %params.uri, "Handling resources/read");
        let registry = self.router.registry();

        let (component, arguments) = match registry.get(ComponentKind::Resource, &params.uri) {
            Some(component) => (component, Value::Null),
            None => match registry.find_template(&params.uri) {
                Some((component, template_params)) => {
                    (component, serde_json::to_value(template_params)?)
                }
                None => {
                    return Err(TaskError::from(RegistryError::NotFound {
                        kind: ComponentKind::Resource,
                        key: params.uri,
                    })
                    .into())
                }
            },
        };

        let outcome = self
            .router
            .route_component(component, arguments, params.task)
            .await?;
        self.outcome_to_value(outcome)
    }

    async fn handle_get_prompt(&self, params: GetPromptParams) -> Result<Value, McpError> {
        tracing::debug!(prompt = %params.name, "Handling prompts/get");
        let arguments = match params.arguments {
            Some(args) => serde_json::to_value(args)?,
            None => Value::Null,
        };
        let mut invocation = Invocation::new(ComponentKind::Prompt, params.name.clone(), arguments);
        invocation.task = params.task;

        let outcome = self.router.route(invocation).await?;
        let mut value = self.outcome_to_value(outcome)?;
        if let Some(description) = self
            .router
            .registry()
            .get(ComponentKind::Prompt, &params.name)
            .and_then(|c| c.description().map(str::to_string))
        {
            if value.get("messages").is_some() {
                value["description"] = json!(description);
            }
        }
        Ok(value)
    }

    fn outcome_to_value(&self, outcome: RouteOutcome) -> Result<Value, McpError> {
        match outcome {
            RouteOutcome::Completed(output) => render_output(output),
            RouteOutcome::Submitted(record) => to_value(self.protocol.submitted(&record)),
        }
    }

    async fn flush_notifications<T: McpTransport>(&mut self, transport: &mut T) -> Result<(), McpError> {
        let Some(events) = self.events.as_mut() else {
            return Ok(());
        };

        let mut pending = Vec::new();
        loop {
            match events.try_recv() {
                Ok(event) => pending.extend(notification_for(&self.protocol, event)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Task notifications dropped");
                }
            }
        }

        for notif in pending {
            transport.send(&serde_json::to_string(&notif)?).await?;
        }
        Ok(())
    }
}

fn notification_for(protocol: &TaskProtocol, event: TaskEvent) -> Option<JsonRpcNotification> {
    match event {
        TaskEvent::Created(record) => Some(JsonRpcNotification::new(
            methods::NOTIFY_TASK_CREATED,
            Some(json!({ "_meta": related_task_meta(&record.task_id) })),
        )),
        TaskEvent::StatusChanged(record) => {
            let info = serde_json::to_value(protocol.task_info(&record)).ok()?;
            Some(JsonRpcNotification::new(
                methods::NOTIFY_TASK_STATUS,
                Some(attach_meta(info, related_task_meta(&record.task_id))),
            ))
        }
        TaskEvent::Deleted { .. } => None,
    }
}

fn tool_info(component: &Component) -> ToolInfo {
    let input_schema = match component.body() {
        ComponentBody::Tool { input_schema, .. } => input_schema.clone(),
        _ => json!({"type": "object"}),
    };
    ToolInfo {
        name: component.key().to_string(),
        title: component.title().map(str::to_string),
        description: component.description().map(str::to_string),
        input_schema,
        execution: Some(ToolExecution {
            task_support: component.policy(),
        }),
    }
}

fn resource_info(component: &Component) -> ResourceInfo {
    let mime_type = match component.body() {
        ComponentBody::Resource { mime_type, .. } => mime_type.clone(),
        _ => None,
    };
    ResourceInfo {
        uri: component.key().to_string(),
        name: component.title().unwrap_or(component.key()).to_string(),
        description: component.description().map(str::to_string),
        mime_type,
    }
}

fn template_info(component: &Component) -> ResourceTemplateInfo {
    let mime_type = match component.body() {
        ComponentBody::Template { mime_type, .. } => mime_type.clone(),
        _ => None,
    };
    ResourceTemplateInfo {
        uri_template: component.key().to_string(),
        name: component.title().unwrap_or(component.key()).to_string(),
        description: component.description().map(str::to_string),
        mime_type,
    }
}

fn prompt_info(component: &Component) -> PromptInfo {
    let arguments = match component.body() {
        ComponentBody::Prompt { arguments, .. } => arguments.clone(),
        _ => Vec::new(),
    };
    PromptInfo {
        name: component.key().to_string(),
        title: component.title().map(str::to_string),
        description: component.description().map(str::to_string),
        arguments,
    }
}

fn parse<P: DeserializeOwned>(params: Option<Value>) -> Result<P, McpError> {
    let params = params.ok_or_else(|| McpError::InvalidParams("missing params".to_string()))?;
    serde_json::from_value(params).map_err(|e| McpError::InvalidParams(e.to_string()))
}

fn parse_or_default<P: DeserializeOwned + Default>(params: Option<Value>) -> Result<P, McpError> {
    match params {
        Some(Value::Null) | None => Ok(P::default()),
        Some(p) => serde_json::from_value(p).map_err(|e| McpError::InvalidParams(e.to_string())),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, McpError> {
    Ok(serde_json::to_value(value)?)
}
