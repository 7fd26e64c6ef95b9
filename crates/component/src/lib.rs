//! Invocable components (tools, resources, resource templates, prompts),
//! their task policies and the registry that holds them.

pub mod builtin;
pub mod component;
pub mod context;
pub mod execution;
pub mod policy;
pub mod registry;
pub mod uri;

pub use component::{
    Component, ComponentBody, ComponentError, ComponentKind, ComponentOutput, FnTool,
    PromptArgument, PromptHandler, PromptMessage, PromptRole, ResourceContent, ResourceHandler,
    TemplateHandler, ToolHandler,
};
pub use context::{CancellationToken, ExecutionContext};
pub use execution::{ExecutionWrapper, RetryPolicy};
pub use policy::TaskPolicy;
pub use registry::{ComponentRegistry, OnDuplicate, RegistryError};
