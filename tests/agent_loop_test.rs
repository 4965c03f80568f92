//! Bounded agent loop tests with scripted reasoners and counting providers.

use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use sql_agent_gateway::agent::{
    AgentConfig, AgentRunner, AgentState, CapabilityProvider, ExternalToolBundle, Message,
    ModelTurn, Reasoner, ReasonerError, Role, SharedToolProvider, TerminationReason, ToolCall,
    ToolSource,
};
use sql_agent_gateway::tools::{CollisionPolicy, Tool, ToolError, ToolResult, ToolSpec};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

// ---------- fakes ----------

struct CountingTool {
    spec: ToolSpec,
    calls: AtomicUsize,
    failure: Option<ToolError>,
}

impl CountingTool {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            spec: ToolSpec::new(name, "test tool", json!({"type": "object"})),
            calls: AtomicUsize::new(0),
            failure: None,
        })
    }

    fn failing(name: &str, failure: ToolError) -> Arc<Self> {
        Arc::new(Self {
            spec: ToolSpec::new(name, "test tool", json!({"type": "object"})),
            calls: AtomicUsize::new(0),
            failure: Some(failure),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Tool for CountingTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn execute(&self, input: Value) -> BoxFuture<'_, ToolResult<Value>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match &self.failure {
                Some(err) => Err(err.clone()),
                None => Ok(json!({ "tool": self.spec.name, "call": n, "input": input })),
            }
        })
    }
}

/// Never finishes; stands in for a tool stuck on a dead connection.
struct HangingTool {
    spec: ToolSpec,
    started: AtomicUsize,
}

impl HangingTool {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            spec: ToolSpec::new(name, "hangs", json!({"type": "object"})),
            started: AtomicUsize::new(0),
        })
    }
}

impl Tool for HangingTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn execute(&self, _input: Value) -> BoxFuture<'_, ToolResult<Value>> {
        Box::pin(async move {
            self.started.fetch_add(1, Ordering::SeqCst);
            futures_util::future::pending::<ToolResult<Value>>().await
        })
    }
}

/// Always asks for one more call of the same tool.
struct AlwaysCallReasoner {
    tool: String,
    steps: AtomicUsize,
}

impl AlwaysCallReasoner {
    fn new(tool: &str) -> Arc<Self> {
        Arc::new(Self {
            tool: tool.to_string(),
            steps: AtomicUsize::new(0),
        })
    }
}

impl Reasoner for AlwaysCallReasoner {
    fn next_step<'a>(
        &'a self,
        _history: &'a [Message],
        _tools: &'a [ToolSpec],
    ) -> BoxFuture<'a, Result<ModelTurn, ReasonerError>> {
        Box::pin(async move {
            let n = self.steps.fetch_add(1, Ordering::SeqCst);
            Ok(ModelTurn::calls(
                Some(format!("thinking {}", n)),
                vec![ToolCall::new(self.tool.clone(), json!({ "n": n }))],
            ))
        })
    }
}

/// Replays a fixed list of turns, then fails.
struct ScriptedReasoner {
    turns: Mutex<VecDeque<ModelTurn>>,
    seen_tools: Mutex<Vec<String>>,
}

impl ScriptedReasoner {
    fn new(turns: Vec<ModelTurn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            seen_tools: Mutex::new(Vec::new()),
        })
    }
}

impl Reasoner for ScriptedReasoner {
    fn next_step<'a>(
        &'a self,
        _history: &'a [Message],
        tools: &'a [ToolSpec],
    ) -> BoxFuture<'a, Result<ModelTurn, ReasonerError>> {
        *self.seen_tools.lock().unwrap() = tools.iter().map(|t| t.name.clone()).collect();
        let next = self.turns.lock().unwrap().pop_front();
        Box::pin(async move { next.ok_or_else(|| ReasonerError::new("script exhausted")) })
    }
}

struct CountingProvider {
    tools: Vec<Arc<dyn Tool>>,
    fail_acquire: bool,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl CountingProvider {
    fn new(tools: Vec<Arc<dyn Tool>>) -> Arc<Self> {
        Arc::new(Self {
            tools,
            fail_acquire: false,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        })
    }

    fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            tools: Vec::new(),
            fail_acquire: true,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        })
    }

    fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl CapabilityProvider for CountingProvider {
    fn acquire(&self) -> BoxFuture<'_, ToolResult<ExternalToolBundle>> {
        Box::pin(async move {
            if self.fail_acquire {
                return Err(ToolError::unavailable("provider offline"));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(ExternalToolBundle::new(self.tools.clone()))
        })
    }

    fn release(&self, _bundle_id: Uuid) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn tools(list: &[&Arc<CountingTool>]) -> Vec<Arc<dyn Tool>> {
    list.iter().map(|t| Arc::clone(t) as Arc<dyn Tool>).collect()
}

fn history() -> Vec<Message> {
    vec![
        Message::system("You answer questions about the database."),
        Message::user("How many users signed up today?"),
    ]
}

fn tool_messages(messages: &[Message]) -> Vec<&Message> {
    messages.iter().filter(|m| m.role == Role::Tool).collect()
}

// ---------- budget ----------

#[tokio::test]
async fn test_budget_three_stops_after_three_invocations() {
    let tool = CountingTool::new("run_sql");
    let provider = CountingProvider::new(tools(&[&CountingTool::new("weather")]));
    let reasoner = AlwaysCallReasoner::new("run_sql");

    let runner = AgentRunner::new(reasoner.clone(), AgentConfig::new(3))
        .with_local_tools(tools(&[&tool]))
        .with_provider(provider.clone());

    let outcome = runner.run(history()).await;

    assert_eq!(outcome.termination, TerminationReason::StepBudgetExhausted);
    assert_eq!(outcome.final_state, AgentState::Completed);
    assert_eq!(tool.calls(), 3);
    assert_eq!(outcome.steps_used, 3);
    assert_eq!(reasoner.steps.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.final_content.as_deref(), Some("thinking 2"));
    assert_eq!(tool_messages(&outcome.messages).len(), 3);
    assert_eq!(provider.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(provider.released(), 1);
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn test_calls_beyond_budget_in_one_turn_are_skipped() {
    let tool = CountingTool::new("run_sql");
    let calls: Vec<ToolCall> = (0..4)
        .map(|i| ToolCall::new("run_sql", json!({ "i": i })))
        .collect();
    let reasoner = ScriptedReasoner::new(vec![ModelTurn::calls(None, calls)]);

    let outcome = AgentRunner::new(reasoner, AgentConfig::new(2))
        .with_local_tools(tools(&[&tool]))
        .run(history())
        .await;

    assert_eq!(outcome.termination, TerminationReason::StepBudgetExhausted);
    assert_eq!(tool.calls(), 2);

    let tool_msgs = tool_messages(&outcome.messages);
    assert_eq!(tool_msgs.len(), 4);
    assert!(!tool_msgs[1].is_error);
    assert!(tool_msgs[2].is_error);
    assert!(tool_msgs[3].content.as_deref().unwrap().contains("skipped"));
}

// ---------- completion ----------

#[tokio::test]
async fn test_final_answer_completes() {
    let tool = CountingTool::new("run_sql");
    let provider = CountingProvider::new(Vec::new());
    let reasoner = ScriptedReasoner::new(vec![
        ModelTurn::call(ToolCall::new("run_sql", json!({"sql": "SELECT 1"}))),
        ModelTurn::final_answer("42 users"),
    ]);

    let outcome = AgentRunner::new(reasoner, AgentConfig::default())
        .with_local_tools(tools(&[&tool]))
        .with_provider(provider.clone())
        .run(history())
        .await;

    assert_eq!(outcome.termination, TerminationReason::Completed);
    assert_eq!(outcome.final_state, AgentState::Completed);
    assert_eq!(outcome.final_content.as_deref(), Some("42 users"));
    assert_eq!(outcome.steps_used, 1);
    assert_eq!(tool.calls(), 1);
    assert_eq!(provider.released(), 1);

    // system, user, assistant(call), tool, assistant(final)
    assert_eq!(outcome.messages.len(), 5);
    let tool_msg = &outcome.messages[3];
    let call_id = &outcome.messages[2].tool_calls[0].id;
    assert_eq!(tool_msg.tool_call_id.as_ref(), Some(call_id));
}

#[tokio::test]
async fn test_immediate_answer_uses_no_steps() {
    let reasoner = ScriptedReasoner::new(vec![ModelTurn::final_answer("nothing to do")]);
    let outcome = AgentRunner::new(reasoner, AgentConfig::default())
        .run(history())
        .await;
    assert_eq!(outcome.termination, TerminationReason::Completed);
    assert_eq!(outcome.steps_used, 0);
}

// ---------- failures ----------

#[tokio::test]
async fn test_recoverable_tool_error_is_reported_and_loop_continues() {
    let tool = CountingTool::failing(
        "run_sql",
        ToolError::execution("run_sql", "destructive_action_blocked", "blocked: drop"),
    );
    let reasoner = ScriptedReasoner::new(vec![
        ModelTurn::call(ToolCall::new("run_sql", json!({"sql": "DROP TABLE t"}))),
        ModelTurn::final_answer("I am not allowed to drop tables."),
    ]);

    let outcome = AgentRunner::new(reasoner, AgentConfig::default())
        .with_local_tools(tools(&[&tool]))
        .run(history())
        .await;

    assert_eq!(outcome.termination, TerminationReason::Completed);
    let tool_msgs = tool_messages(&outcome.messages);
    assert_eq!(tool_msgs.len(), 1);
    assert!(tool_msgs[0].is_error);
    assert!(
        tool_msgs[0]
            .content
            .as_deref()
            .unwrap()
            .contains("destructive_action_blocked")
    );
}

#[tokio::test]
async fn test_unknown_tool_is_reported_not_fatal() {
    let reasoner = ScriptedReasoner::new(vec![
        ModelTurn::call(ToolCall::new("format_disk", json!({}))),
        ModelTurn::final_answer("done"),
    ]);

    let outcome = AgentRunner::new(reasoner, AgentConfig::default())
        .with_local_tools(tools(&[&CountingTool::new("run_sql")]))
        .run(history())
        .await;

    assert_eq!(outcome.termination, TerminationReason::Completed);
    assert_eq!(outcome.steps_used, 1);
    let tool_msgs = tool_messages(&outcome.messages);
    assert!(tool_msgs[0].content.as_deref().unwrap().contains("unknown tool"));
}

#[tokio::test]
async fn test_unavailable_tool_aborts_and_releases_once() {
    let tool = CountingTool::failing("run_sql", ToolError::unavailable("connection refused"));
    let provider = CountingProvider::new(Vec::new());
    let reasoner = ScriptedReasoner::new(vec![
        ModelTurn::calls(
            None,
            vec![
                ToolCall::new("run_sql", json!({"sql": "SELECT 1"})),
                ToolCall::new("run_sql", json!({"sql": "SELECT 2"})),
            ],
        ),
        ModelTurn::final_answer("never reached"),
    ]);

    let outcome = AgentRunner::new(reasoner, AgentConfig::default())
        .with_local_tools(tools(&[&tool]))
        .with_provider(provider.clone())
        .run(history())
        .await;

    assert_eq!(outcome.termination, TerminationReason::Aborted);
    assert_eq!(outcome.final_state, AgentState::Aborted);
    assert!(outcome.is_aborted());
    assert!(outcome.error.as_deref().unwrap().contains("connection refused"));
    assert_eq!(tool.calls(), 1);
    assert_eq!(provider.released(), 1);
    // partial history is preserved
    assert_eq!(tool_messages(&outcome.messages).len(), 1);
}

#[tokio::test]
async fn test_cancelled_session_releases_bundle_once() {
    let tool = HangingTool::new("run_sql");
    let provider = CountingProvider::new(tools(&[&CountingTool::new("weather")]));
    let reasoner = AlwaysCallReasoner::new("run_sql");

    let runner = AgentRunner::new(reasoner, AgentConfig::default())
        .with_local_tools(vec![tool.clone() as Arc<dyn Tool>])
        .with_provider(provider.clone());

    let result = tokio::time::timeout(Duration::from_millis(50), runner.run(history())).await;

    assert!(result.is_err(), "session should still be waiting on the tool");
    assert_eq!(tool.started.load(Ordering::SeqCst), 1);
    assert_eq!(provider.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(provider.released(), 1);
}

#[tokio::test]
async fn test_reasoner_failure_aborts() {
    let provider = CountingProvider::new(Vec::new());
    let reasoner = ScriptedReasoner::new(Vec::new());

    let outcome = AgentRunner::new(reasoner, AgentConfig::default())
        .with_provider(provider.clone())
        .run(history())
        .await;

    assert_eq!(outcome.termination, TerminationReason::Aborted);
    assert!(outcome.error.as_deref().unwrap().contains("script exhausted"));
    assert_eq!(outcome.messages.len(), 2);
    assert_eq!(provider.released(), 1);
}

#[tokio::test]
async fn test_provider_failure_falls_back_to_local_tools() {
    let provider = CountingProvider::unavailable();
    let reasoner = ScriptedReasoner::new(vec![ModelTurn::final_answer("ok")]);

    let outcome = AgentRunner::new(reasoner.clone(), AgentConfig::default())
        .with_local_tools(tools(&[&CountingTool::new("run_sql")]))
        .with_provider(provider.clone())
        .run(history())
        .await;

    assert_eq!(outcome.termination, TerminationReason::Completed);
    assert_eq!(*reasoner.seen_tools.lock().unwrap(), vec!["run_sql"]);
    assert_eq!(provider.released(), 0);
}

// ---------- collisions ----------

#[tokio::test]
async fn test_local_tool_wins_collision() {
    let local = CountingTool::new("run_sql");
    let external = CountingTool::new("run_sql");
    let provider = CountingProvider::new(tools(&[&external, &CountingTool::new("weather")]));
    let reasoner = ScriptedReasoner::new(vec![
        ModelTurn::call(ToolCall::new("run_sql", json!({}))),
        ModelTurn::final_answer("done"),
    ]);

    let outcome = AgentRunner::new(reasoner.clone(), AgentConfig::default())
        .with_local_tools(tools(&[&local]))
        .with_provider(provider.clone())
        .run(history())
        .await;

    assert_eq!(outcome.termination, TerminationReason::Completed);
    assert_eq!(local.calls(), 1);
    assert_eq!(external.calls(), 0);
    assert_eq!(outcome.shadowed_tools, vec!["run_sql".to_string()]);
    assert_eq!(*reasoner.seen_tools.lock().unwrap(), vec!["run_sql", "weather"]);
    assert_eq!(provider.released(), 1);
}

#[tokio::test]
async fn test_reject_policy_aborts_before_first_step() {
    let provider = CountingProvider::new(tools(&[&CountingTool::new("run_sql")]));
    let reasoner = AlwaysCallReasoner::new("run_sql");

    let outcome = AgentRunner::new(
        reasoner.clone(),
        AgentConfig::default().with_collision_policy(CollisionPolicy::Reject),
    )
    .with_local_tools(tools(&[&CountingTool::new("run_sql")]))
    .with_provider(provider.clone())
    .run(history())
    .await;

    assert_eq!(outcome.termination, TerminationReason::Aborted);
    assert_eq!(reasoner.steps.load(Ordering::SeqCst), 0);
    assert!(outcome.error.as_deref().unwrap().contains("already registered"));
    assert_eq!(provider.released(), 1);
}

// ---------- shared provider ----------

struct FakeSource {
    shutdowns: Arc<AtomicUsize>,
}

impl ToolSource for FakeSource {
    fn list_tools(&self) -> BoxFuture<'_, ToolResult<Vec<Arc<dyn Tool>>>> {
        Box::pin(async { Ok(vec![CountingTool::new("search") as Arc<dyn Tool>]) })
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }
}

fn shared_provider(shutdowns: Arc<AtomicUsize>) -> Arc<SharedToolProvider> {
    SharedToolProvider::new(move || {
        let shutdowns = shutdowns.clone();
        async move { Ok(Arc::new(FakeSource { shutdowns }) as Arc<dyn ToolSource>) }
    })
}

#[tokio::test]
async fn test_shared_provider_connects_lazily_once() {
    let shutdowns = Arc::new(AtomicUsize::new(0));
    let provider = shared_provider(shutdowns.clone());
    assert_eq!(provider.connect_count(), 0);

    for _ in 0..3 {
        let reasoner = ScriptedReasoner::new(vec![ModelTurn::final_answer("ok")]);
        let outcome = AgentRunner::new(reasoner.clone(), AgentConfig::default())
            .with_provider(provider.clone())
            .run(history())
            .await;
        assert_eq!(outcome.termination, TerminationReason::Completed);
        assert_eq!(*reasoner.seen_tools.lock().unwrap(), vec!["search"]);
    }

    assert_eq!(provider.connect_count(), 1);
    assert_eq!(provider.active_leases(), 0);
}

#[tokio::test]
async fn test_shared_provider_shutdown_is_idempotent() {
    let shutdowns = Arc::new(AtomicUsize::new(0));
    let provider = shared_provider(shutdowns.clone());

    let bundle = provider.acquire().await.unwrap();
    assert_eq!(bundle.len(), 1);
    assert_eq!(provider.active_leases(), 1);
    provider.release(bundle.id());
    assert_eq!(provider.active_leases(), 0);

    provider.shutdown().await;
    provider.shutdown().await;
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    assert!(provider.is_closed());

    let err = provider.acquire().await.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_shutdown_without_connect_is_noop() {
    let shutdowns = Arc::new(AtomicUsize::new(0));
    let provider = shared_provider(shutdowns.clone());
    provider.shutdown().await;
    assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
    assert_eq!(provider.connect_count(), 0);
}
