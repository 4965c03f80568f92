//! SQL agent gateway.
//!
//! A safety layer between callers (including LLM-driven agents) and a SQL
//! database: a statement classifier for the read-only path, a destructive-action
//! guard for writes, an all-or-nothing batch executor, and a step-bounded agent
//! loop over a name-keyed tool registry. The tools are also served over MCP.

pub mod agent;
pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::{GatewayError, GatewayResult};
pub use mcp::GatewayService;
