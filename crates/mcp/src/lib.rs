//! MCP (Model Context Protocol) front end for taskwire.
//!
//! Serves registered components over JSON-RPC 2.0 and adds the task
//! extension: invocations may carry a task directive, and `tasks/*` methods
//! expose the resulting background tasks.
//!
//! # Architecture
//!
//! - **types**: JSON-RPC 2.0 and MCP protocol types, related-task envelope
//! - **transport**: newline-delimited JSON over stdio, child processes or channels
//! - **tasks**: `tasks/*` operations over the task store
//! - **server**: request dispatcher on top of a `TaskRouter`
//! - **client**: client with task helpers
//! - **error**: unified error type and JSON-RPC error mapping
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskwire_component::{builtin::demo_components, ComponentRegistry};
//! use taskwire_mcp::{McpServer, StdioTransport};
//! use taskwire_tasks::{RouterConfig, TaskRouter};
//!
//! # async fn example() {
//! let mut registry = ComponentRegistry::new();
//! for component in demo_components() {
//!     registry.register(component).unwrap();
//! }
//! let router = TaskRouter::new(Arc::new(registry), RouterConfig::default());
//! let mut server = McpServer::new(router);
//! server.run(&mut StdioTransport::new()).await.unwrap();
//! # }
//! ```

pub mod client;
pub mod error;
pub mod server;
pub mod tasks;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use error::McpError;
pub use server::McpServer;
pub use tasks::TaskProtocol;
pub use transport::{ChannelTransport, ChildProcessTransport, McpTransport, StdioTransport};
pub use types::*;
