//! Agent sessions over the SQL tools.
//!
//! - `message`: message history types
//! - `reasoner`: the reasoning-step seam
//! - `provider`: external tool bundles and the shared provider
//! - `session`: the bounded agent loop

pub mod message;
pub mod provider;
pub mod reasoner;
pub mod session;

pub use message::{Message, Role, ToolCall};
pub use provider::{
    BundleLease, CapabilityProvider, ExternalToolBundle, SharedToolProvider, ToolSource,
};
pub use reasoner::{ModelTurn, Reasoner, ReasonerError};
pub use session::{
    AgentConfig, AgentOutcome, AgentRunner, AgentSession, AgentState, DEFAULT_STEP_BUDGET,
    TerminationReason,
};
