//! Per-invocation routing: inline, auto-routed, or submitted as a task.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use taskwire_component::{Component, ComponentKind, ComponentOutput, ComponentRegistry, TaskPolicy};
use taskwire_core::TasksConfig;

use crate::error::TaskError;
use crate::executor::TaskExecutor;
use crate::record::{NewTask, TaskRecord};
use crate::store::TaskStore;

/// Settings the router needs, taken from [`TasksConfig`] at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// When false, every task directive is rejected.
    pub tasks_enabled: bool,
    pub default_ttl: Duration,
    pub max_ttl: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::from(&TasksConfig::default())
    }
}

impl From<&TasksConfig> for RouterConfig {
    fn from(cfg: &TasksConfig) -> Self {
        Self {
            tasks_enabled: cfg.enabled,
            default_ttl: cfg.default_ttl(),
            max_ttl: cfg.max_ttl(),
        }
    }
}

/// Caller's request to run an invocation as a background task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDirective {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Requested keep-alive in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl TaskDirective {
    pub fn with_task_id(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ttl: None,
        }
    }
}

/// One inbound call against a registered component.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub kind: ComponentKind,
    pub key: String,
    pub arguments: Value,
    pub task: Option<TaskDirective>,
}

impl Invocation {
    pub fn new(kind: ComponentKind, key: impl Into<String>, arguments: Value) -> Self {
        Self {
            kind,
            key: key.into(),
            arguments,
            task: None,
        }
    }

    pub fn tool(name: impl Into<String>, arguments: Value) -> Self {
        Self::new(ComponentKind::Tool, name, arguments)
    }

    pub fn with_task(mut self, directive: TaskDirective) -> Self {
        self.task = Some(directive);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Ran in the request path (inline or auto-routed).
    Completed(ComponentOutput),
    /// Accepted as a background task; the record is in `submitted` state.
    Submitted(TaskRecord),
}

/// Decides whether a call without a task directive should still go
/// through the background executor.
pub trait AutoRoutePredicate: Send + Sync {
    fn should_auto_route(&self, component: &Component) -> bool;
}

impl<F> AutoRoutePredicate for F
where
    F: Fn(&Component) -> bool + Send + Sync,
{
    fn should_auto_route(&self, component: &Component) -> bool {
        self(component)
    }
}

/// Auto-routes components that declare a non-empty retry/timeout wrapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct WrapperPredicate;

impl AutoRoutePredicate for WrapperPredicate {
    fn should_auto_route(&self, component: &Component) -> bool {
        component.execution().is_some_and(|w| !w.is_empty())
    }
}

pub struct TaskRouter {
    registry: Arc<ComponentRegistry>,
    store: Arc<TaskStore>,
    executor: TaskExecutor,
    config: RouterConfig,
    auto_route: Arc<dyn AutoRoutePredicate>,
}

impl TaskRouter {
    pub fn new(registry: Arc<ComponentRegistry>, config: RouterConfig) -> Self {
        let store = Arc::new(TaskStore::new());
        Self {
            registry,
            executor: TaskExecutor::new(store.clone()),
            store,
            config,
            auto_route: Arc::new(WrapperPredicate),
        }
    }

    pub fn with_auto_route(mut self, predicate: impl AutoRoutePredicate + 'static) -> Self {
        self.auto_route = Arc::new(predicate);
        self
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Resolve the target component and route the call.
    pub async fn route(&self, invocation: Invocation) -> Result<RouteOutcome, TaskError> {
        let component = self.registry.resolve(invocation.kind, &invocation.key)?;
        self.route_component(component, invocation.arguments, invocation.task)
            .await
    }

    /// Route a call against an already-resolved component.
    ///
    /// Policy checks run before anything executes or any record exists.
    pub async fn route_component(
        &self,
        component: Arc<Component>,
        arguments: Value,
        directive: Option<TaskDirective>,
    ) -> Result<RouteOutcome, TaskError> {
        match (component.policy(), &directive) {
            (TaskPolicy::Required, None) => {
                return Err(TaskError::PolicyViolation(format!(
                    "{} requires task-augmented execution",
                    component.label()
                )));
            }
            (TaskPolicy::Forbidden, Some(_)) => {
                return Err(TaskError::PolicyViolation(format!(
                    "{} does not support task-augmented execution",
                    component.label()
                )));
            }
            _ => {}
        }

        match directive {
            Some(directive) => self.submit(component, arguments, directive).map(RouteOutcome::Submitted),
            None if self.auto_route.should_auto_route(&component) => {
                debug!(component = %component.key(), "auto-routing through executor");
                let output = self.executor.run_to_completion(component, arguments).await?;
                Ok(RouteOutcome::Completed(output))
            }
            None => {
                let output = self.executor.execute_inline(&component, &arguments).await?;
                Ok(RouteOutcome::Completed(output))
            }
        }
    }

    fn submit(
        &self,
        component: Arc<Component>,
        arguments: Value,
        directive: TaskDirective,
    ) -> Result<TaskRecord, TaskError> {
        if !self.config.tasks_enabled {
            return Err(TaskError::TasksDisabled);
        }

        let ttl = directive
            .ttl
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_ttl)
            .min(self.config.max_ttl);

        let record = self.store.create(
            NewTask::new(component.key(), component.kind(), arguments)
                .with_task_id(directive.task_id)
                .with_ttl(ttl),
        )?;
        self.executor.submit(component, record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{TaskFilter, TaskStatus};
    use serde_json::json;
    use taskwire_component::builtin::{DoubleTool, FlakyTool};
    use taskwire_component::{ExecutionWrapper, RetryPolicy};

    fn router_with(components: Vec<Component>) -> TaskRouter {
        let mut registry = ComponentRegistry::new();
        for c in components {
            registry.register(c).unwrap();
        }
        TaskRouter::new(Arc::new(registry), RouterConfig::default())
    }

    fn double(policy: TaskPolicy) -> Component {
        Component::tool("double", json!({}), DoubleTool).with_policy(policy)
    }

    #[tokio::test]
    async fn test_inline_without_directive() {
        let router = router_with(vec![double(TaskPolicy::Optional)]);
        let outcome = router
            .route(Invocation::tool("double", json!({"value": 5})))
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::Completed(ComponentOutput::Tool(json!(10))));
        assert!(router.store().is_empty());
    }

    #[tokio::test]
    async fn test_policy_messages() {
        let router = router_with(vec![
            double(TaskPolicy::Forbidden),
            Component::tool("slow", json!({}), DoubleTool)
                .with_title("Slow one")
                .with_policy(TaskPolicy::Required),
        ]);

        let err = router
            .route(Invocation::tool("double", json!({"value": 1})).with_task(TaskDirective::default()))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TaskError::PolicyViolation(
                "Tool 'double' does not support task-augmented execution".into()
            )
        );

        let err = router
            .route(Invocation::tool("slow", json!({"value": 1})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TaskError::PolicyViolation("Tool 'Slow one' requires task-augmented execution".into())
        );
        assert!(router.store().list(&TaskFilter::default()).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_component() {
        let router = router_with(vec![]);
        let err = router
            .route(Invocation::tool("missing", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_submit_returns_submitted_record() {
        let router = router_with(vec![double(TaskPolicy::Optional)]);
        let outcome = router
            .route(
                Invocation::tool("double", json!({"value": 5}))
                    .with_task(TaskDirective::with_task_id("t1")),
            )
            .await
            .unwrap();
        match outcome {
            RouteOutcome::Submitted(record) => {
                assert_eq!(record.task_id, "t1");
                assert_eq!(record.status, TaskStatus::Submitted);
                assert_eq!(record.ttl, RouterConfig::default().default_ttl);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ttl_clamped() {
        let mut registry = ComponentRegistry::new();
        registry.register(double(TaskPolicy::Optional)).unwrap();
        let config = RouterConfig {
            tasks_enabled: true,
            default_ttl: Duration::from_secs(60),
            max_ttl: Duration::from_secs(120),
        };
        let router = TaskRouter::new(Arc::new(registry), config);

        let directive = TaskDirective {
            task_id: None,
            ttl: Some(10_000_000),
        };
        let outcome = router
            .route(Invocation::tool("double", json!({"value": 1})).with_task(directive))
            .await
            .unwrap();
        let RouteOutcome::Submitted(record) = outcome else {
            panic!("expected submission");
        };
        assert_eq!(record.ttl, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_tasks_disabled() {
        let mut registry = ComponentRegistry::new();
        registry.register(double(TaskPolicy::Optional)).unwrap();
        let config = RouterConfig {
            tasks_enabled: false,
            ..RouterConfig::default()
        };
        let router = TaskRouter::new(Arc::new(registry), config);

        let err = router
            .route(Invocation::tool("double", json!({"value": 1})).with_task(TaskDirective::default()))
            .await
            .unwrap_err();
        assert_eq!(err, TaskError::TasksDisabled);
        assert!(router.store().is_empty());

        // Plain calls are unaffected.
        assert!(router
            .route(Invocation::tool("double", json!({"value": 1})))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_auto_route_wrapped_component() {
        let flaky = FlakyTool::new(1);
        let router = router_with(vec![Component::tool("flaky", json!({}), flaky.clone())
            .with_execution(
                ExecutionWrapper::new()
                    .with_retry(RetryPolicy::new(2).with_initial_delay(Duration::from_millis(1))),
            )]);

        let outcome = router
            .route(Invocation::tool("flaky", json!({"source": "s3"})))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::Completed(ComponentOutput::Tool(json!({"source": "s3", "attempt": 2})))
        );
        assert_eq!(flaky.calls(), 2);
        assert!(router.store().is_empty());
    }

    #[tokio::test]
    async fn test_custom_auto_route_predicate() {
        let router = router_with(vec![double(TaskPolicy::Forbidden)])
            .with_auto_route(|c: &Component| c.key() == "double");
        let outcome = router
            .route(Invocation::tool("double", json!({"value": 2})))
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::Completed(ComponentOutput::Tool(json!(4))));
    }

    #[tokio::test]
    async fn test_inline_failure_surfaces_immediately() {
        let router = router_with(vec![double(TaskPolicy::Forbidden)]);
        let err = router
            .route(Invocation::tool("double", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "component");
    }
}
