//! Bounded agent loop.
//!
//! A session alternates between asking the [`Reasoner`] for a step and running
//! the tool calls it proposes, one at a time. Every invocation consumes one unit
//! of the step budget, so a session ends after at most `step_budget` tool calls.
//!
//! Terminal outcomes:
//! - `Completed`: the reasoner answered without tool calls
//! - `StepBudgetExhausted`: the budget ran out; not an error
//! - `Aborted`: registry construction failed, the reasoner failed, or a tool
//!   reported its backing connection as unusable
//!
//! An external bundle, if acquired, is released exactly once on every path.

use crate::agent::message::Message;
use crate::agent::provider::{BundleLease, CapabilityProvider, ExternalToolBundle};
use crate::agent::reasoner::Reasoner;
use crate::db::QueryExecutor;
use crate::tools::{self, AuthorizationContext, CollisionPolicy, Tool, ToolRegistry};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_STEP_BUDGET: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum tool invocations per session, at least 1
    pub step_budget: usize,
    pub collision_policy: CollisionPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_BUDGET)
    }
}

impl AgentConfig {
    pub fn new(step_budget: usize) -> Self {
        Self {
            step_budget: step_budget.max(1),
            collision_policy: CollisionPolicy::default(),
        }
    }

    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    AwaitingModelStep,
    ExecutingTool,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Completed,
    StepBudgetExhausted,
    Aborted,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::StepBudgetExhausted => "step_budget_exhausted",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-formed result of a session, whatever the terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct AgentOutcome {
    pub messages: Vec<Message>,
    pub termination: TerminationReason,
    pub final_state: AgentState,
    /// Latest assistant content seen before termination
    pub final_content: Option<String>,
    pub steps_used: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// External tools dropped by the collision policy
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub shadowed_tools: Vec<String>,
}

impl AgentOutcome {
    pub fn is_aborted(&self) -> bool {
        self.termination == TerminationReason::Aborted
    }
}

/// History, budget and state of one running session.
#[derive(Debug)]
pub struct AgentSession {
    history: Vec<Message>,
    state: AgentState,
    step_budget: usize,
    steps_used: usize,
    final_content: Option<String>,
    shadowed_tools: Vec<String>,
}

impl AgentSession {
    pub fn new(history: Vec<Message>, step_budget: usize) -> Self {
        Self {
            history,
            state: AgentState::Idle,
            step_budget: step_budget.max(1),
            steps_used: 0,
            final_content: None,
            shadowed_tools: Vec::new(),
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn steps_used(&self) -> usize {
        self.steps_used
    }

    pub fn remaining_steps(&self) -> usize {
        self.step_budget.saturating_sub(self.steps_used)
    }

    pub fn budget_exhausted(&self) -> bool {
        self.steps_used >= self.step_budget
    }

    fn transition(&mut self, next: AgentState) {
        debug!(
            from = ?self.state,
            to = ?next,
            step = self.steps_used,
            "Agent state transition"
        );
        self.state = next;
    }

    fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    fn consume_step(&mut self) -> usize {
        self.steps_used += 1;
        self.steps_used
    }

    fn complete(mut self, termination: TerminationReason) -> AgentOutcome {
        self.transition(AgentState::Completed);
        self.finish(termination, None)
    }

    fn abort(mut self, error: String) -> AgentOutcome {
        self.transition(AgentState::Aborted);
        self.finish(TerminationReason::Aborted, Some(error))
    }

    fn finish(self, termination: TerminationReason, error: Option<String>) -> AgentOutcome {
        info!(
            termination = %termination,
            steps_used = self.steps_used,
            step_budget = self.step_budget,
            messages = self.history.len(),
            "Agent session finished"
        );
        AgentOutcome {
            messages: self.history,
            termination,
            final_state: self.state,
            final_content: self.final_content,
            steps_used: self.steps_used,
            error,
            shadowed_tools: self.shadowed_tools,
        }
    }
}

/// Runs agent sessions against a reasoner and a tool set.
pub struct AgentRunner {
    reasoner: Arc<dyn Reasoner>,
    local_tools: Vec<Arc<dyn Tool>>,
    provider: Option<Arc<dyn CapabilityProvider>>,
    config: AgentConfig,
}

impl AgentRunner {
    pub fn new(reasoner: Arc<dyn Reasoner>, config: AgentConfig) -> Self {
        Self {
            reasoner,
            local_tools: Vec::new(),
            provider: None,
            config,
        }
    }

    /// Runner with `run_sql` and `run_sql_transaction` bound to `ctx`.
    pub fn for_database(
        executor: &QueryExecutor,
        ctx: AuthorizationContext,
        reasoner: Arc<dyn Reasoner>,
        config: AgentConfig,
    ) -> Self {
        Self::new(reasoner, config).with_local_tools(tools::local_tools(executor, ctx))
    }

    pub fn with_local_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.local_tools = tools;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn CapabilityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one session from `initial` history to a terminal state.
    pub async fn run(&self, initial: Vec<Message>) -> AgentOutcome {
        let session = AgentSession::new(initial, self.config.step_budget);

        let lease = match &self.provider {
            Some(provider) => match BundleLease::acquire(Arc::clone(provider)).await {
                Ok(lease) => Some(lease),
                Err(err) => {
                    warn!(error = %err, "External tools unavailable, continuing with local tools");
                    None
                }
            },
            None => None,
        };

        let outcome = self
            .drive(session, lease.as_ref().and_then(BundleLease::bundle))
            .await;

        if let Some(lease) = lease {
            lease.release();
        }
        outcome
    }

    async fn drive(
        &self,
        mut session: AgentSession,
        bundle: Option<&ExternalToolBundle>,
    ) -> AgentOutcome {
        let registry = match ToolRegistry::assemble(
            self.local_tools.clone(),
            bundle,
            self.config.collision_policy,
        ) {
            Ok(registry) => registry,
            Err(err) => {
                warn!(error = %err, "Tool registry construction failed");
                return session.abort(err.to_string());
            }
        };
        session.shadowed_tools = registry.shadowed().to_vec();
        let specs = registry.specs();

        session.transition(AgentState::AwaitingModelStep);
        loop {
            let step_result = self.reasoner.next_step(session.history(), &specs).await;
            let turn = match step_result {
                Ok(turn) => turn,
                Err(err) => {
                    warn!(error = %err, "Reasoning step failed");
                    return session.abort(err.to_string());
                }
            };

            if turn.content.is_some() {
                session.final_content = turn.content.clone();
            }
            let is_final = turn.is_final();
            let calls = turn.tool_calls.clone();
            session.push(Message::assistant(turn.content, turn.tool_calls));

            if is_final {
                return session.complete(TerminationReason::Completed);
            }

            session.transition(AgentState::ExecutingTool);
            for (index, call) in calls.iter().enumerate() {
                if session.budget_exhausted() {
                    for skipped in &calls[index..] {
                        session.push(Message::tool_error(
                            skipped.id.clone(),
                            format!("Tool call `{}` skipped: step budget exhausted", skipped.name),
                        ));
                    }
                    break;
                }

                let step = session.consume_step();
                debug!(step = step, tool = %call.name, "Invoking tool");

                match registry.invoke(&call.name, call.arguments.clone()).await {
                    Ok(value) => {
                        session.push(Message::tool_result(call.id.clone(), value.to_string()));
                    }
                    Err(err) if err.is_fatal() => {
                        session.push(Message::tool_error(call.id.clone(), err.to_string()));
                        warn!(step = step, tool = %call.name, error = %err, "Tool failure is unrecoverable");
                        return session.abort(err.to_string());
                    }
                    Err(err) => {
                        debug!(step = step, tool = %call.name, kind = err.kind(), "Tool call failed");
                        session.push(Message::tool_error(call.id.clone(), err.to_string()));
                    }
                }
            }

            if session.budget_exhausted() {
                return session.complete(TerminationReason::StepBudgetExhausted);
            }
            session.transition(AgentState::AwaitingModelStep);
        }
    }
}
