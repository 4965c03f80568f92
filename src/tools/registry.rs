//! Tool registry for the agent loop.
//!
//! Local tools and externally provided tools share one interface, [`Tool`]. The
//! registry maps names to tools and applies an explicit [`CollisionPolicy`] when
//! an external tool reuses a name that is already registered.

use crate::agent::provider::ExternalToolBundle;
use crate::error::GatewayError;
use futures_util::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub type ToolResult<T> = Result<T, ToolError>;

/// Failure of a tool lookup or invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid input for tool `{tool}`: {message}")]
    InvalidInput { tool: String, message: String },

    /// Tool ran and failed; `kind` is the underlying reason code.
    #[error("tool `{tool}` failed ({kind}): {message}")]
    Execution {
        tool: String,
        kind: String,
        message: String,
    },

    /// The connection or provider behind the tool is unusable.
    #[error("capability unavailable: {message}")]
    Unavailable { message: String },

    #[error("unknown tool `{name}`")]
    UnknownTool { name: String },

    #[error("tool `{name}` is already registered")]
    DuplicateTool { name: String },
}

impl ToolError {
    pub fn execution(
        tool: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Execution {
            tool: tool.into(),
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Map a gateway error raised while running `tool`.
    ///
    /// Connection failures mean the tool cannot work at all; everything else is
    /// something the caller can react to.
    pub fn from_gateway(tool: &str, err: GatewayError) -> Self {
        match err {
            GatewayError::Connection { .. } => Self::unavailable(err.to_string()),
            GatewayError::InvalidInput { message } => Self::InvalidInput {
                tool: tool.to_string(),
                message,
            },
            other => Self::execution(tool, other.kind(), other.to_string()),
        }
    }

    /// True when the session cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::Execution { kind, .. } => kind,
            Self::Unavailable { .. } => "unavailable",
            Self::UnknownTool { .. } => "unknown_tool",
            Self::DuplicateTool { .. } => "duplicate_tool",
        }
    }
}

/// Name, description and input-shape contract of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the accepted input object
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Spec whose input schema is generated from `T`.
    pub fn for_input<T: JsonSchema>(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null);
        Self::new(name, description, schema)
    }
}

/// A named, schema-described callable.
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    fn execute(&self, input: Value) -> BoxFuture<'_, ToolResult<Value>>;

    fn name(&self) -> &str {
        &self.spec().name
    }
}

/// Deserialize a tool's input object against its typed contract.
pub fn parse_input<T: DeserializeOwned>(tool: &str, input: Value) -> ToolResult<T> {
    serde_json::from_value(input).map_err(|e| ToolError::InvalidInput {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

/// Serialize a tool's output value.
pub fn to_output<T: Serialize>(tool: &str, output: &T) -> ToolResult<Value> {
    serde_json::to_value(output)
        .map_err(|e| ToolError::execution(tool, "internal", format!("unserializable output: {e}")))
}

/// Where a registered tool came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOrigin {
    Local,
    External,
}

/// What to do when an external tool's name is already taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Keep the existing tool, drop the newcomer, record it in `shadowed()`.
    #[default]
    LocalWins,
    /// Fail registry construction with `DuplicateTool`.
    Reject,
}

struct Entry {
    tool: Arc<dyn Tool>,
    origin: ToolOrigin,
}

/// Name → tool mapping owned by one request or session.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    shadowed: Vec<String>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("registered", &self.names())
            .field("shadowed", &self.shadowed)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local tools first, then the bundle's tools under `policy`.
    pub fn assemble(
        local: Vec<Arc<dyn Tool>>,
        bundle: Option<&ExternalToolBundle>,
        policy: CollisionPolicy,
    ) -> ToolResult<Self> {
        let mut registry = Self::new();
        for tool in local {
            registry.register_local(tool)?;
        }
        if let Some(bundle) = bundle {
            registry.merge_external(bundle.tools().iter().cloned(), policy)?;
        }
        Ok(registry)
    }

    /// Register a local tool. Local names must be unique.
    pub fn register_local(&mut self, tool: Arc<dyn Tool>) -> ToolResult<()> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        self.insert(name, tool, ToolOrigin::Local);
        Ok(())
    }

    /// Merge external tools, resolving name collisions with `policy`.
    pub fn merge_external<I>(&mut self, tools: I, policy: CollisionPolicy) -> ToolResult<()>
    where
        I: IntoIterator<Item = Arc<dyn Tool>>,
    {
        for tool in tools {
            let name = tool.name().to_string();
            if let Some(&existing) = self.index.get(&name) {
                match policy {
                    CollisionPolicy::LocalWins => {
                        warn!(
                            tool = %name,
                            kept = ?self.entries[existing].origin,
                            "External tool shadowed by existing tool"
                        );
                        self.shadowed.push(name);
                        continue;
                    }
                    CollisionPolicy::Reject => return Err(ToolError::DuplicateTool { name }),
                }
            }
            self.insert(name, tool, ToolOrigin::External);
        }
        Ok(())
    }

    fn insert(&mut self, name: String, tool: Arc<dyn Tool>, origin: ToolOrigin) {
        debug!(tool = %name, origin = ?origin, "Tool registered");
        self.index.insert(name, self.entries.len());
        self.entries.push(Entry { tool, origin });
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&i| &self.entries[i].tool)
    }

    pub fn origin(&self, name: &str) -> Option<ToolOrigin> {
        self.index.get(name).map(|&i| self.entries[i].origin)
    }

    /// Specs in registration order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.entries.iter().map(|e| e.tool.spec().clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.tool.name()).collect()
    }

    /// External tool names dropped because of a collision.
    pub fn shadowed(&self) -> &[String] {
        &self.shadowed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn invoke(&self, name: &str, input: Value) -> ToolResult<Value> {
        let tool = self.get(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_string(),
        })?;
        tool.execute(input).await
    }
}
