//! End-to-end task protocol scenarios.
//!
//! Each test runs an `McpServer` with the demo components on one end of a
//! `ChannelTransport` pair and drives it through `McpClient`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use taskwire_component::builtin::demo_components;
use taskwire_component::{ComponentKind, ComponentRegistry};
use taskwire_mcp::{
    error_codes, methods, related_task_id, ChannelTransport, ListTasksParams, McpClient, McpError,
    McpServer, RELATED_TASK_META_KEY,
};
use taskwire_tasks::{RouterConfig, TaskDirective, TaskRouter, TaskStatus};

const TIMEOUT: Duration = Duration::from_secs(5);

fn registry() -> Arc<ComponentRegistry> {
    let mut registry = ComponentRegistry::new();
    for component in demo_components() {
        registry.register(component).unwrap();
    }
    Arc::new(registry)
}

async fn connect_with(config: RouterConfig) -> (McpClient, JoinHandle<()>) {
    let (client_side, mut server_side) = ChannelTransport::pair();
    let mut server = McpServer::new(TaskRouter::new(registry(), config))
        .with_poll_interval(Duration::from_millis(20));
    let handle = tokio::spawn(async move {
        server.run(&mut server_side).await.unwrap();
        server.shutdown();
    });
    let client = McpClient::connect(client_side).await.unwrap();
    (client, handle)
}

async fn connect() -> (McpClient, JoinHandle<()>) {
    connect_with(RouterConfig::default()).await
}

fn remote_kind(err: &McpError) -> &str {
    err.remote_kind().unwrap_or("<none>")
}

async fn start_slow(client: &McpClient, task_id: &str) {
    client
        .call_tool_as_task(
            "slow_count",
            json!({"to": 1000, "step_ms": 10}),
            TaskDirective::with_task_id(task_id),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn double_round_trip_through_tasks() {
    let (client, _server) = connect().await;
    assert!(client.supports_tasks());

    let created = client
        .call_tool_as_task("double", json!({"value": 5}), TaskDirective::default())
        .await
        .unwrap();
    assert_eq!(created.task.status, TaskStatus::Submitted);
    assert_eq!(created.task.poll_interval, 20);
    let task_id = created.task.task_id.clone();
    assert_eq!(
        created.meta.as_ref().unwrap()[RELATED_TASK_META_KEY]["taskId"],
        task_id.as_str()
    );

    let done = client.wait_for_task(&task_id, TIMEOUT).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.status_message.as_deref(), Some("Task completed successfully"));

    let result = client.task_result(&task_id).await.unwrap();
    assert_eq!(result["content"][0]["text"], "10");
    assert_eq!(related_task_id(&result), Some(task_id.as_str()));
    assert_eq!(client.task_result(&task_id).await.unwrap(), result);

    // Terminal status is stable.
    for _ in 0..3 {
        assert_eq!(client.get_task(&task_id).await.unwrap().status, TaskStatus::Completed);
    }
}

#[tokio::test]
async fn background_failure_is_read_back_through_result() {
    let (client, _server) = connect().await;
    let created = client
        .call_tool_as_task("double", json!({"value": "x"}), TaskDirective::default())
        .await
        .unwrap();
    let task_id = created.task.task_id;

    let failed = client.wait_for_task(&task_id, TIMEOUT).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);

    let result = client.task_result(&task_id).await.unwrap();
    assert_eq!(result["isError"], true);
    assert_eq!(
        result["content"][0]["text"],
        "Task failed: Invalid input: 'value' must be an integer"
    );
    assert_eq!(result["structuredContent"]["kind"], "invalid_input");
    assert_eq!(related_task_id(&result), Some(task_id.as_str()));

    // The stored outcome does not change between reads.
    assert_eq!(client.task_result(&task_id).await.unwrap(), result);
}

#[tokio::test]
async fn result_is_not_ready_until_terminal() {
    let (client, _server) = connect().await;
    start_slow(&client, "slow-1").await;

    let err = client.task_result("slow-1").await.unwrap_err();
    assert_eq!(remote_kind(&err), "not_ready");

    let cancelled = client.cancel_task("slow-1").await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    let result = client.task_result("slow-1").await.unwrap();
    assert_eq!(result["isError"], true);
    assert_eq!(result["content"][0]["text"], "Task cancelled");

    let err = client.cancel_task("slow-1").await.unwrap_err();
    assert_eq!(remote_kind(&err), "invalid_state");
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let (client, _server) = connect().await;
    let err = client.get_task("missing").await.unwrap_err();
    assert_eq!(remote_kind(&err), "not_found");
    match err {
        McpError::Rpc(rpc) => assert_eq!(rpc.data.unwrap()["taskId"], "missing"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn required_tool_rejects_plain_call() {
    let (client, _server) = connect().await;
    let err = client.call_tool("slow_count", json!({})).await.unwrap_err();
    match &err {
        McpError::Rpc(rpc) => {
            assert_eq!(rpc.code, error_codes::METHOD_NOT_FOUND);
            assert_eq!(rpc.message, "Tool 'Slow counter' requires task-augmented execution");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(remote_kind(&err), "policy_violation");

    let listed = client.list_tasks(ListTasksParams::default()).await.unwrap();
    assert!(listed.tasks.is_empty());
}

#[tokio::test]
async fn forbidden_tool_rejects_directive() {
    let (client, _server) = connect().await;
    let err = client
        .call_tool_as_task("echo", json!({"message": "hi"}), TaskDirective::default())
        .await
        .unwrap_err();
    assert_eq!(remote_kind(&err), "policy_violation");

    // The same tool still works synchronously.
    let plain = client.call_tool("echo", json!({"message": "hi"})).await.unwrap();
    assert_eq!(plain.text(), "hi");

    let listed = client.list_tasks(ListTasksParams::default()).await.unwrap();
    assert!(listed.tasks.is_empty());
}

#[tokio::test]
async fn duplicate_task_id_conflicts() {
    let (client, _server) = connect().await;
    start_slow(&client, "dup").await;

    let err = client
        .call_tool_as_task("double", json!({"value": 1}), TaskDirective::with_task_id("dup"))
        .await
        .unwrap_err();
    assert_eq!(remote_kind(&err), "conflict");

    client.delete_task("dup", true).await.unwrap();
    let reused = client
        .call_tool_as_task("double", json!({"value": 1}), TaskDirective::with_task_id("dup"))
        .await
        .unwrap();
    assert_eq!(reused.task.task_id, "dup");
    let done = client.wait_for_task("dup", TIMEOUT).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
}

#[tokio::test]
async fn delete_running_task_requires_force() {
    let (client, _server) = connect().await;
    start_slow(&client, "del").await;

    let err = client.delete_task("del", false).await.unwrap_err();
    assert_eq!(remote_kind(&err), "invalid_state");

    let deleted = client.delete_task("del", true).await.unwrap();
    assert_eq!(deleted["deleted"], true);
    assert_eq!(related_task_id(&deleted), Some("del"));

    let err = client.get_task("del").await.unwrap_err();
    assert_eq!(remote_kind(&err), "not_found");
}

#[tokio::test]
async fn list_filters_and_paginates() {
    let (client, _server) = connect().await;
    for i in 0..3 {
        client
            .call_tool_as_task("double", json!({"value": i}), TaskDirective::default())
            .await
            .unwrap();
    }
    client
        .request(
            methods::RESOURCES_READ,
            Some(json!({"uri": "data://readme", "task": {"taskId": "readme"}})),
        )
        .await
        .unwrap();

    let resources = client
        .list_tasks(ListTasksParams {
            task_type: Some(ComponentKind::Resource),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(resources.tasks.len(), 1);
    assert_eq!(resources.tasks[0].task_id, "readme");

    let first = client
        .list_tasks(ListTasksParams {
            limit: Some(3),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(first.tasks.len(), 3);
    let ids: Vec<Value> = first.tasks.iter().map(|t| json!(t.task_id)).collect();
    let envelope = &first.meta.as_ref().unwrap()[RELATED_TASK_META_KEY];
    assert_eq!(envelope["taskId"], ids[0]);
    assert_eq!(envelope["taskIds"], Value::Array(ids));

    let rest = client
        .list_tasks(ListTasksParams {
            cursor: first.next_cursor.clone(),
            limit: Some(3),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(rest.tasks.len(), 1);
    assert!(rest.next_cursor.is_none());

    let readme = client.wait_for_task("readme", TIMEOUT).await.unwrap();
    assert_eq!(readme.status, TaskStatus::Completed);
    let result = client.task_result("readme").await.unwrap();
    assert_eq!(result["contents"][0]["text"], "taskwire demo server");
}

#[tokio::test]
async fn prompt_can_run_as_task() {
    let (client, _server) = connect().await;
    let created = client
        .request(
            methods::PROMPTS_GET,
            Some(json!({"name": "greet", "arguments": {"name": "Ada"}, "task": {}})),
        )
        .await
        .unwrap();
    let task_id = created["task"]["taskId"].as_str().unwrap().to_string();

    client.wait_for_task(&task_id, TIMEOUT).await.unwrap();
    let result = client.task_result(&task_id).await.unwrap();
    assert_eq!(result["messages"][0]["content"]["text"], "Say hello to Ada.");

    let sync = client
        .get_prompt("greet", HashMap::from([("name".to_string(), "Bob".to_string())]))
        .await
        .unwrap();
    assert_eq!(sync.description.as_deref(), Some("Greet someone"));
}

#[tokio::test]
async fn wrapped_tool_is_auto_routed_without_a_task() {
    let (client, _server) = connect().await;
    let result = client
        .call_tool("flaky_fetch", json!({"source": "upstream"}))
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(
        result.structured_content,
        Some(json!({"source": "upstream", "attempt": 3}))
    );

    let listed = client.list_tasks(ListTasksParams::default()).await.unwrap();
    assert!(listed.tasks.is_empty());
}

#[tokio::test]
async fn notifications_follow_task_lifecycle() {
    let (client, _server) = connect().await;
    let created = client
        .call_tool_as_task("double", json!({"value": 4}), TaskDirective::with_task_id("n1"))
        .await
        .unwrap();
    client
        .wait_for_task(&created.task.task_id, TIMEOUT)
        .await
        .unwrap();
    // One more round trip flushes anything queued after the last poll.
    client.ping().await.unwrap();

    let notes = client.take_notifications();
    assert_eq!(notes[0].method, methods::NOTIFY_TASK_CREATED);
    assert_eq!(related_task_id(notes[0].params.as_ref().unwrap()), Some("n1"));

    let statuses: Vec<String> = notes
        .iter()
        .filter(|n| n.method == methods::NOTIFY_TASK_STATUS)
        .map(|n| n.params.as_ref().unwrap()["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(statuses, vec!["working", "completed"]);
}

#[tokio::test]
async fn concurrent_submissions_get_distinct_ids() {
    let (client, _server) = connect().await;
    let calls = (0..10).map(|i| {
        client.call_tool_as_task("double", json!({"value": i}), TaskDirective::default())
    });
    let mut ids: Vec<String> = futures::future::join_all(calls)
        .await
        .into_iter()
        .map(|r| r.unwrap().task.task_id)
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 10);
}

#[tokio::test]
async fn disabled_tasks_reject_directives() {
    let config = RouterConfig {
        tasks_enabled: false,
        ..RouterConfig::default()
    };
    let (client, _server) = connect_with(config).await;
    assert!(!client.supports_tasks());

    let err = client
        .call_tool_as_task("double", json!({"value": 1}), TaskDirective::default())
        .await
        .unwrap_err();
    assert_eq!(remote_kind(&err), "tasks_disabled");

    let plain = client.call_tool("double", json!({"value": 1})).await.unwrap();
    assert_eq!(plain.text(), "2");
}
