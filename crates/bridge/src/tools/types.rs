//! Tool-related types.

use std::fmt;
use std::future::Future;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dispatch::{Handler, handler};
use crate::any_map::AnyMap;
use crate::error::Cause;
use crate::schema::PropertySchema;

/// A tool as described to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// Where a tool's implementation lives.
#[derive(Clone)]
pub(crate) enum Implementation {
    /// Called in-process without going through the bridge.
    Direct(Handler),
    /// Looked up in the bridge by the tool's name on every call.
    Bridged,
}

/// A tool as declared by the scripting side.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub arguments: IndexMap<String, PropertySchema>,
    pub(crate) implementation: Implementation,
}

impl ToolDefinition {
    /// A tool implemented by an in-process async closure.
    pub fn new<F, Fut, E>(
        name: impl Into<String>,
        description: impl Into<String>,
        arguments: IndexMap<String, PropertySchema>,
        implementation: F,
    ) -> Self
    where
        F: Fn(AnyMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AnyMap, E>> + Send + 'static,
        E: Into<Cause> + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            arguments,
            implementation: Implementation::Direct(handler(implementation)),
        }
    }

    /// A tool whose implementation is registered in the bridge under `name`.
    pub fn bridged(
        name: impl Into<String>,
        description: impl Into<String>,
        arguments: IndexMap<String, PropertySchema>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            arguments,
            implementation: Implementation::Bridged,
        }
    }

    pub fn is_bridged(&self) -> bool {
        matches!(self.implementation, Implementation::Bridged)
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("arguments", &self.arguments)
            .field("bridged", &self.is_bridged())
            .finish()
    }
}
