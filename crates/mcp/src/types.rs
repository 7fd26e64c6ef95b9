//! JSON-RPC 2.0 and MCP protocol types.
//!
//! Messages are newline-delimited JSON objects. Besides the core
//! `tools/*`, `resources/*` and `prompts/*` methods this covers the task
//! extension: task directives on invocations, `tasks/*` operations and the
//! related-task envelope carried in `_meta`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use taskwire_component::{PromptArgument, PromptMessage, PromptRole, ResourceContent, TaskPolicy};
use taskwire_tasks::{TaskDirective, TaskStatus};

// ── JSON-RPC 2.0 Base Types ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RpcId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC request ID. Can be a number or a string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    String(String),
}

pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCE_TEMPLATES_LIST: &str = "resources/templates/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
    pub const TASKS_GET: &str = "tasks/get";
    pub const TASKS_RESULT: &str = "tasks/result";
    pub const TASKS_LIST: &str = "tasks/list";
    pub const TASKS_CANCEL: &str = "tasks/cancel";
    pub const TASKS_DELETE: &str = "tasks/delete";

    pub const NOTIFY_INITIALIZED: &str = "notifications/initialized";
    pub const NOTIFY_CANCELLED: &str = "notifications/cancelled";
    pub const NOTIFY_TASK_CREATED: &str = "notifications/tasks/created";
    pub const NOTIFY_TASK_STATUS: &str = "notifications/tasks/status";
}

// ── Related-task envelope ───────────────────────────────────────────

/// `_meta` key linking a message to the task it concerns.
pub const RELATED_TASK_META_KEY: &str = "modelcontextprotocol.io/related-task";

/// `{"modelcontextprotocol.io/related-task": {"taskId": ...}}`
pub fn related_task_meta(task_id: &str) -> Value {
    let mut meta = Map::new();
    meta.insert(
        RELATED_TASK_META_KEY.to_string(),
        serde_json::json!({ "taskId": task_id }),
    );
    Value::Object(meta)
}

/// Collection-level envelope for `tasks/list`.
///
/// `taskIds` lists the page; `taskId` is its first entry (`null` on an
/// empty page) so readers of the single-task form still find the key.
pub fn related_tasks_meta<'a>(task_ids: impl IntoIterator<Item = &'a str>) -> Value {
    let ids: Vec<&str> = task_ids.into_iter().collect();
    let mut meta = Map::new();
    meta.insert(
        RELATED_TASK_META_KEY.to_string(),
        serde_json::json!({ "taskId": ids.first(), "taskIds": ids }),
    );
    Value::Object(meta)
}

/// Merge `meta` into the `_meta` object of a JSON result object.
pub fn attach_meta(mut result: Value, meta: Value) -> Value {
    if let (Value::Object(obj), Value::Object(extra)) = (&mut result, meta) {
        let slot = obj
            .entry("_meta")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(existing) = slot {
            existing.extend(extra);
        } else {
            *slot = Value::Object(extra);
        }
    }
    result
}

/// Task ID carried in a message's `_meta`, if any.
pub fn related_task_id(value: &Value) -> Option<&str> {
    value
        .get("_meta")?
        .get(RELATED_TASK_META_KEY)?
        .get("taskId")?
        .as_str()
}

// ── MCP Initialize ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub client_info: Implementation,
}

/// Name/version pair identifying a client or server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChangedCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ListChangedCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListChangedCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TasksCapability>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChangedCapability {
    #[serde(default)]
    pub list_changed: bool,
}

/// Advertised task support: which `tasks/*` operations exist and which
/// request methods accept a task directive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TasksCapability {
    pub operations: Vec<String>,
    pub requests: Vec<String>,
}

// ── Tools ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ToolExecution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecution {
    pub task_support: TaskPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskDirective>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Wrap a tool's return value. Strings become plain text; anything else
    /// is rendered as JSON text and also returned as structured content
    /// (non-objects under a `result` key).
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => Self {
                content: vec![ToolContent::Text { text }],
                structured_content: None,
                is_error: false,
            },
            other => {
                let text = other.to_string();
                let structured = match other {
                    obj @ Value::Object(_) => obj,
                    scalar => serde_json::json!({ "result": scalar }),
                };
                Self {
                    content: vec![ToolContent::Text { text }],
                    structured_content: Some(structured),
                    is_error: false,
                }
            }
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            structured_content: None,
            is_error: true,
        }
    }

    /// All text blocks joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ToolContent::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
}

// ── Resources ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResourcesResult {
    pub resources: Vec<ResourceInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplateInfo {
    pub uri_template: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourceTemplatesResult {
    pub resource_templates: Vec<ResourceTemplateInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceParams {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskDirective>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContent>,
}

// ── Prompts ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPromptsResult {
    pub prompts: Vec<PromptInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskDirective>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPromptResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<PromptMessageWire>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessageWire {
    pub role: PromptRole,
    pub content: ToolContent,
}

impl From<PromptMessage> for PromptMessageWire {
    fn from(msg: PromptMessage) -> Self {
        Self {
            role: msg.role,
            content: ToolContent::Text { text: msg.text },
        }
    }
}

// ── Tasks ───────────────────────────────────────────────────────────

/// Wire view of a task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub task_id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    /// Keep-alive after completion, in milliseconds.
    pub ttl: u64,
    /// Suggested polling interval, in milliseconds.
    pub poll_interval: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

/// Response to an invocation that was accepted as a background task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskResult {
    pub task: TaskInfo,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdParams {
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTaskParams {
    pub task_id: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<taskwire_component::ComponentKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksResult {
    pub tasks: Vec<TaskInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

// ── Helpers ─────────────────────────────────────────────────────────

impl JsonRpcRequest {
    pub fn new(id: RpcId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

impl JsonRpcResponse {
    pub fn success(id: RpcId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// The MCP protocol revision this crate speaks.
pub const PROTOCOL_VERSION: &str = "2025-11-25";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rpc_id_forms() {
        assert_eq!(serde_json::to_string(&RpcId::Number(42)).unwrap(), "42");
        let parsed: RpcId = serde_json::from_str("\"req-1\"").unwrap();
        assert_eq!(parsed, RpcId::String("req-1".to_string()));
    }

    #[test]
    fn test_related_task_meta_key() {
        let meta = related_task_meta("t1");
        assert_eq!(
            meta,
            json!({"modelcontextprotocol.io/related-task": {"taskId": "t1"}})
        );
    }

    #[test]
    fn test_related_tasks_meta_keeps_task_id_key() {
        let meta = related_tasks_meta(["a", "b"]);
        assert_eq!(
            meta[RELATED_TASK_META_KEY],
            json!({"taskId": "a", "taskIds": ["a", "b"]})
        );

        let empty = related_tasks_meta(std::iter::empty());
        assert_eq!(
            empty[RELATED_TASK_META_KEY],
            json!({"taskId": null, "taskIds": []})
        );
    }

    #[test]
    fn test_attach_meta_merges() {
        let value = json!({"status": "working", "_meta": {"other": 1}});
        let merged = attach_meta(value, related_task_meta("t9"));
        assert_eq!(merged["_meta"]["other"], 1);
        assert_eq!(related_task_id(&merged), Some("t9"));

        // Non-object results are left untouched.
        assert_eq!(attach_meta(json!(5), related_task_meta("x")), json!(5));
    }

    #[test]
    fn test_call_tool_result_from_value() {
        let r = CallToolResult::from_value(json!(10));
        assert_eq!(r.text(), "10");
        assert_eq!(r.structured_content, Some(json!({"result": 10})));

        let r = CallToolResult::from_value(json!("plain"));
        assert_eq!(r.text(), "plain");
        assert!(r.structured_content.is_none());

        let r = CallToolResult::from_value(json!({"a": 1}));
        assert_eq!(r.structured_content, Some(json!({"a": 1})));
    }

    #[test]
    fn test_call_tool_result_is_error_omitted_when_false() {
        let json = serde_json::to_value(CallToolResult::from_value(json!("ok"))).unwrap();
        assert!(json.get("isError").is_none());
        let json = serde_json::to_value(CallToolResult::error("bad")).unwrap();
        assert_eq!(json["isError"], true);
    }

    #[test]
    fn test_call_tool_params_with_task_directive() {
        let params: CallToolParams = serde_json::from_value(json!({
            "name": "double",
            "arguments": {"value": 5},
            "task": {"taskId": "t1", "ttl": 5000}
        }))
        .unwrap();
        let task = params.task.unwrap();
        assert_eq!(task.task_id.as_deref(), Some("t1"));
        assert_eq!(task.ttl, Some(5000));

        let plain: CallToolParams = serde_json::from_value(json!({"name": "double"})).unwrap();
        assert!(plain.task.is_none());
        assert_eq!(plain.arguments, Value::Null);
    }

    #[test]
    fn test_task_info_wire_shape() {
        let now = Utc::now();
        let info = TaskInfo {
            task_id: "t1".into(),
            status: TaskStatus::Working,
            created_at: now,
            last_updated_at: now,
            ttl: 60_000,
            poll_interval: 1_000,
            status_message: None,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["taskId"], "t1");
        assert_eq!(json["status"], "working");
        assert_eq!(json["pollInterval"], 1000);
        assert!(json["createdAt"].is_string());
        assert!(json.get("statusMessage").is_none());
    }

    #[test]
    fn test_tool_info_execution() {
        let info = ToolInfo {
            name: "double".into(),
            title: None,
            description: None,
            input_schema: json!({"type": "object"}),
            execution: Some(ToolExecution {
                task_support: TaskPolicy::Optional,
            }),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["execution"]["taskSupport"], "optional");
        assert_eq!(json["inputSchema"]["type"], "object");
    }
}
