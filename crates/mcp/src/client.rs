//! MCP client implementation.
//!
//! Speaks to an MCP server over any [`McpTransport`]: a spawned server
//! process, or an in-memory channel in tests. Besides the plain methods it
//! has helpers for task-augmented calls and for polling tasks to completion.
//!
//! Notifications that arrive while waiting for a response are buffered and
//! handed out by [`McpClient::take_notifications`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use taskwire_tasks::TaskDirective;

use crate::error::McpError;
use crate::transport::{ChildProcessTransport, McpTransport};
use crate::types::*;

/// Lower bound on the interval used by [`McpClient::wait_for_task`].
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct McpClient {
    transport: Mutex<Box<dyn McpTransport>>,
    next_id: AtomicI64,
    notifications: std::sync::Mutex<Vec<JsonRpcNotification>>,
    server: InitializeResult,
}

impl McpClient {
    /// Perform the initialize handshake over `transport`.
    pub async fn connect(transport: impl McpTransport + 'static) -> Result<Self, McpError> {
        let transport: Box<dyn McpTransport> = Box::new(transport);
        let transport = Mutex::new(transport);
        let next_id = AtomicI64::new(1);
        let notifications = std::sync::Mutex::new(Vec::new());

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "taskwire-client",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let value = exchange(&transport, &next_id, &notifications, methods::INITIALIZE, Some(params))
            .await
            .map_err(|e| match e {
                McpError::Rpc(err) => McpError::ServerUnavailable(err.message),
                other => other,
            })?;
        let server: InitializeResult = serde_json::from_value(value)?;

        let client = Self {
            transport,
            next_id,
            notifications,
            server,
        };
        client.notify(methods::NOTIFY_INITIALIZED, None).await?;

        tracing::info!(server = %client.server.server_info.name, "MCP client initialized");
        Ok(client)
    }

    /// Spawn an MCP server process and connect to it over its stdio.
    pub async fn spawn(program: &str, args: &[&str]) -> Result<Self, McpError> {
        let transport = ChildProcessTransport::spawn(program, args)?;
        Self::connect(transport).await
    }

    /// What the server reported during `initialize`.
    pub fn server_info(&self) -> &InitializeResult {
        &self.server
    }

    pub fn supports_tasks(&self) -> bool {
        self.server.capabilities.tasks.is_some()
    }

    /// Send a request and return the `result` of its response.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        exchange(&self.transport, &self.next_id, &self.notifications, method, params).await
    }

    async fn request_as<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<R, McpError> {
        let value = self.request(method, Some(params)).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let json = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.transport.lock().await.send(&json).await
    }

    pub async fn ping(&self) -> Result<(), McpError> {
        self.request(methods::PING, None).await.map(|_| ())
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        let result: ListToolsResult = self.request_as(methods::TOOLS_LIST, json!({})).await?;
        Ok(result.tools)
    }

    /// Call a tool synchronously.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        self.request_as(
            methods::TOOLS_CALL,
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }

    /// Call a tool as a background task and return the task handle.
    pub async fn call_tool_as_task(
        &self,
        name: &str,
        arguments: Value,
        directive: TaskDirective,
    ) -> Result<CreateTaskResult, McpError> {
        self.request_as(
            methods::TOOLS_CALL,
            json!({ "name": name, "arguments": arguments, "task": directive }),
        )
        .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        self.request_as(methods::RESOURCES_READ, json!({ "uri": uri }))
            .await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult, McpError> {
        self.request_as(
            methods::PROMPTS_GET,
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskInfo, McpError> {
        self.request_as(methods::TASKS_GET, json!({ "taskId": task_id }))
            .await
    }

    /// Raw `tasks/result` payload, `_meta` included. Fails with a
    /// `not_ready` error while the task is still running.
    pub async fn task_result(&self, task_id: &str) -> Result<Value, McpError> {
        self.request(methods::TASKS_RESULT, Some(json!({ "taskId": task_id })))
            .await
    }

    pub async fn list_tasks(&self, params: ListTasksParams) -> Result<ListTasksResult, McpError> {
        self.request_as(methods::TASKS_LIST, serde_json::to_value(params)?)
            .await
    }

    pub async fn cancel_task(&self, task_id: &str) -> Result<TaskInfo, McpError> {
        self.request_as(methods::TASKS_CANCEL, json!({ "taskId": task_id }))
            .await
    }

    pub async fn delete_task(&self, task_id: &str, force: bool) -> Result<Value, McpError> {
        self.request(
            methods::TASKS_DELETE,
            Some(json!({ "taskId": task_id, "force": force })),
        )
        .await
    }

    /// Poll `tasks/get` at the server's advertised interval until the task
    /// is terminal.
    pub async fn wait_for_task(&self, task_id: &str, timeout: Duration) -> Result<TaskInfo, McpError> {
        let poll = async {
            loop {
                let info = self.get_task(task_id).await?;
                if info.status.is_terminal() {
                    return Ok::<_, McpError>(info);
                }
                let interval = Duration::from_millis(info.poll_interval).max(MIN_POLL_INTERVAL);
                tokio::time::sleep(interval).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| McpError::Timeout(format!("task '{task_id}' did not finish in {timeout:?}")))?
    }

    /// Drain notifications received so far.
    pub fn take_notifications(&self) -> Vec<JsonRpcNotification> {
        let mut buffered = self
            .notifications
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *buffered)
    }
}

/// Write one request and read until its response arrives, buffering any
/// notifications seen on the way.
async fn exchange(
    transport: &Mutex<Box<dyn McpTransport>>,
    next_id: &AtomicI64,
    notifications: &std::sync::Mutex<Vec<JsonRpcNotification>>,
    method: &str,
    params: Option<Value>,
) -> Result<Value, McpError> {
    let id = next_id.fetch_add(1, Ordering::Relaxed);
    let request = JsonRpcRequest::new(RpcId::Number(id), method, params);
    let json = serde_json::to_string(&request)?;

    tracing::debug!(method = %method, id, "Sending request");

    let mut transport = transport.lock().await;
    transport.send(&json).await?;

    loop {
        let line = transport
            .receive()
            .await?
            .ok_or_else(|| McpError::ServerUnavailable("connection closed".to_string()))?;
        let raw: Value = serde_json::from_str(&line)?;

        match raw.get("id") {
            None => {
                let notif: JsonRpcNotification = serde_json::from_value(raw)?;
                tracing::debug!(method = %notif.method, "Buffered notification");
                notifications
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(notif);
            }
            Some(resp_id) if *resp_id == json!(id) => {
                let response: JsonRpcResponse = serde_json::from_value(raw)?;
                if let Some(err) = response.error {
                    return Err(McpError::Rpc(err));
                }
                return Ok(response.result.unwrap_or(Value::Null));
            }
            Some(other) => {
                tracing::warn!(id = %other, "Discarding response to unknown request");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;

    /// Answers the handshake, then replies to requests with canned results.
    async fn fake_server(mut transport: ChannelTransport, replies: Vec<Value>) {
        let mut replies = replies.into_iter();
        while let Some(line) = transport.receive().await.unwrap() {
            let msg: Value = serde_json::from_str(&line).unwrap();
            let Some(id) = msg.get("id").cloned() else {
                continue;
            };
            let result = if msg["method"] == "initialize" {
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "serverInfo": {"name": "fake"}
                })
            } else {
                replies.next().unwrap_or(Value::Null)
            };
            let resp = json!({"jsonrpc": "2.0", "id": id, "result": result});
            transport.send(&resp.to_string()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_connect_handshake() {
        let (client_side, server_side) = ChannelTransport::pair();
        tokio::spawn(fake_server(server_side, vec![]));

        let client = McpClient::connect(client_side).await.unwrap();
        assert_eq!(client.server_info().server_info.name, "fake");
        assert!(!client.supports_tasks());
    }

    #[tokio::test]
    async fn test_notifications_are_buffered() {
        let (client_side, mut server_side) = ChannelTransport::pair();
        let server = tokio::spawn(async move {
            // initialize
            let line = server_side.receive().await.unwrap().unwrap();
            let init: Value = serde_json::from_str(&line).unwrap();
            let resp = json!({"jsonrpc": "2.0", "id": init["id"], "result": {
                "protocolVersion": PROTOCOL_VERSION, "capabilities": {}, "serverInfo": {"name": "fake"}
            }});
            server_side.send(&resp.to_string()).await.unwrap();
            // notifications/initialized
            server_side.receive().await.unwrap();
            // ping: notification first, then the response
            let line = server_side.receive().await.unwrap().unwrap();
            let ping: Value = serde_json::from_str(&line).unwrap();
            let notif = json!({"jsonrpc": "2.0", "method": "notifications/tasks/created", "params": {}});
            server_side.send(&notif.to_string()).await.unwrap();
            let resp = json!({"jsonrpc": "2.0", "id": ping["id"], "result": {}});
            server_side.send(&resp.to_string()).await.unwrap();
            server_side
        });

        let client = McpClient::connect(client_side).await.unwrap();
        client.ping().await.unwrap();
        let notes = client.take_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].method, "notifications/tasks/created");
        assert!(client.take_notifications().is_empty());
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_connection_is_unavailable() {
        let (client_side, server_side) = ChannelTransport::pair();
        drop(server_side);
        let Err(err) = McpClient::connect(client_side).await else {
            panic!("connect should fail on a closed transport");
        };
        assert!(matches!(err, McpError::Transport(_) | McpError::ServerUnavailable(_)));
    }
}
