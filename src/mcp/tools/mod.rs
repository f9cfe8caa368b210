//! Tool capability interface and the provider that owns tool instances.
//!
//! Each tool advertises itself through [`Tool::describe`] and runs through
//! [`Tool::invoke`]. The dispatcher only sees descriptors and content
//! lists; tool business payloads are opaque to it.

pub mod time;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use super::protocol::{ContentItem, ToolDescriptor};

/// Boxed future returned by [`Tool::invoke`].
pub type ToolFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<ContentItem>, ToolError>> + Send + 'a>>;

/// Failure reported by a tool; the message is surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolError {
    message: String,
}

impl ToolError {
    /// Construct a tool error with a caller-visible message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Caller-visible message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ToolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ToolError {}

/// An externally supplied capability.
pub trait Tool: Send + Sync {
    /// Advertisement returned from `tools/list`.
    fn describe(&self) -> ToolDescriptor;

    /// Run the tool with the caller's `arguments` (an object, `{}` when omitted).
    fn invoke(&self, arguments: Value) -> ToolFuture<'_>;
}

/// Tool provider: named tools, listed in name order.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in tools.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(time::TimeTool));
        registry
    }

    /// Add `tool` under its descriptor name, replacing any tool of that name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.describe().name;
        self.tools.insert(name, tool);
    }

    /// Tool registered as `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    /// Descriptors of every tool, in name order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|tool| tool.describe()).collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tool is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
