use crate::component::{Component, ComponentKind};
use crate::policy::TaskPolicy;
use crate::uri::match_uri_template;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// What `register` does when the key is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDuplicate {
    #[default]
    Error,
    Replace,
    /// Keep the existing component and drop the new one.
    Ignore,
}

/// Holds every invocable component, keyed by kind and key.
///
/// Registration happens at startup through `&mut self`; afterwards the
/// registry is shared read-only behind an `Arc`.
pub struct ComponentRegistry {
    components: IndexMap<(ComponentKind, String), Arc<Component>>,
    on_duplicate: OnDuplicate,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::with_duplicate_behavior(OnDuplicate::Error)
    }

    pub fn with_duplicate_behavior(on_duplicate: OnDuplicate) -> Self {
        Self {
            components: IndexMap::new(),
            on_duplicate,
        }
    }

    /// Register a component with the policy it was built with.
    pub fn register(&mut self, component: Component) -> Result<(), RegistryError> {
        let slot = (component.kind(), component.key().to_string());
        if self.components.contains_key(&slot) {
            match self.on_duplicate {
                OnDuplicate::Error => {
                    return Err(RegistryError::DuplicateKey {
                        kind: slot.0,
                        key: slot.1,
                    })
                }
                OnDuplicate::Ignore => {
                    debug!(kind = %slot.0, key = %slot.1, "duplicate component ignored");
                    return Ok(());
                }
                OnDuplicate::Replace => {
                    debug!(kind = %slot.0, key = %slot.1, "replacing component");
                }
            }
        }
        self.components.insert(slot, Arc::new(component));
        Ok(())
    }

    /// Register a component, overriding its task policy.
    pub fn register_with_policy(
        &mut self,
        component: Component,
        policy: TaskPolicy,
    ) -> Result<(), RegistryError> {
        self.register(component.with_policy(policy))
    }

    /// Look up a component, failing with `NotFound`.
    pub fn resolve(&self, kind: ComponentKind, key: &str) -> Result<Arc<Component>, RegistryError> {
        self.get(kind, key).ok_or_else(|| RegistryError::NotFound {
            kind,
            key: key.to_string(),
        })
    }

    pub fn get(&self, kind: ComponentKind, key: &str) -> Option<Arc<Component>> {
        self.components.get(&(kind, key.to_string())).cloned()
    }

    /// Components of one kind in registration order.
    pub fn list(&self, kind: ComponentKind) -> Vec<Arc<Component>> {
        self.components
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Components that may run as background tasks.
    pub fn task_eligible(&self) -> Vec<Arc<Component>> {
        self.components
            .values()
            .filter(|c| c.policy().supports_tasks())
            .cloned()
            .collect()
    }

    /// First template whose pattern matches `uri`, with the extracted params.
    pub fn find_template(&self, uri: &str) -> Option<(Arc<Component>, HashMap<String, String>)> {
        self.list(ComponentKind::Template)
            .into_iter()
            .find_map(|c| match_uri_template(uri, c.key()).map(|params| (c, params)))
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{} '{key}' is already registered", .kind.label())]
    DuplicateKey { kind: ComponentKind, key: String },
    #[error("Unknown {kind}: {key}")]
    NotFound { kind: ComponentKind, key: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{DoubleTool, EchoTool, StaticText, UppercaseTemplate};
    use serde_json::json;

    fn double() -> Component {
        Component::tool("double", json!({}), DoubleTool)
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ComponentRegistry::new();
        registry.register(double()).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.resolve(ComponentKind::Tool, "double").is_ok());
        assert_eq!(
            registry.resolve(ComponentKind::Tool, "missing").unwrap_err(),
            RegistryError::NotFound {
                kind: ComponentKind::Tool,
                key: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_keys_are_scoped_per_kind() {
        let mut registry = ComponentRegistry::new();
        registry.register(double()).unwrap();
        assert!(registry.get(ComponentKind::Prompt, "double").is_none());
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ComponentRegistry::new();
        registry.register(double()).unwrap();
        let err = registry.register(double()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateKey { .. }));
        assert_eq!(err.to_string(), "Tool 'double' is already registered");
    }

    #[test]
    fn test_duplicate_replace_and_ignore() {
        let mut registry = ComponentRegistry::with_duplicate_behavior(OnDuplicate::Replace);
        registry.register(double()).unwrap();
        registry
            .register_with_policy(double(), TaskPolicy::Required)
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(ComponentKind::Tool, "double").unwrap().policy(),
            TaskPolicy::Required
        );

        let mut registry = ComponentRegistry::with_duplicate_behavior(OnDuplicate::Ignore);
        registry.register(double()).unwrap();
        registry
            .register_with_policy(double(), TaskPolicy::Required)
            .unwrap();
        assert_eq!(
            registry.get(ComponentKind::Tool, "double").unwrap().policy(),
            TaskPolicy::Forbidden
        );
    }

    #[test]
    fn test_list_and_task_eligible() {
        let mut registry = ComponentRegistry::new();
        registry.register(double()).unwrap();
        registry
            .register_with_policy(Component::tool("echo", json!({}), EchoTool), TaskPolicy::Optional)
            .unwrap();
        registry
            .register(Component::resource("data://readme", StaticText::new("hi")))
            .unwrap();

        let tools: Vec<_> = registry
            .list(ComponentKind::Tool)
            .iter()
            .map(|c| c.key().to_string())
            .collect();
        assert_eq!(tools, vec!["double", "echo"]);

        let eligible = registry.task_eligible();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].key(), "echo");
    }

    #[test]
    fn test_find_template() {
        let mut registry = ComponentRegistry::new();
        registry
            .register(Component::template("upper://{text}", UppercaseTemplate))
            .unwrap();

        let (component, params) = registry.find_template("upper://abc").unwrap();
        assert_eq!(component.key(), "upper://{text}");
        assert_eq!(params["text"], "abc");
        assert!(registry.find_template("lower://abc").is_none());
    }
}
