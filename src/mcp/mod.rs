//! MCP server integration using the rmcp framework.

pub mod service;

pub use service::GatewayService;
