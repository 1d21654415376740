//! End-to-end turn-loop scenarios with a scripted model and probe tools.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use ad_context::{CharEstimateCounter, ContextManager, ConversationState};
use ad_domain::config::{AgentConfig, ContextConfig, ToolsConfig, TruncationStrategy};
use ad_domain::message::Message;
use ad_domain::model::{ModelClient, ModelRequest, ModelTurn, TokenUsage};
use ad_domain::tool::{
    ConfirmationDecision, ConfirmationKind, ConfirmationRequest, Tool, ToolDescriptor, ToolResult,
};
use ad_domain::{AgentEvent, CancelToken, Error, EventKind};
use ad_events::{EventStream, Subscriber};
use ad_runtime::{AgentController, AGENT_INTERRUPT_MESSAGE};
use ad_tools::{AutoApprovePolicy, ConfirmationGate, ToolDispatcher, TOOL_INTERRUPT_MESSAGE};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test doubles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Model that replays a fixed script of assistant blocks, recording every
/// request it receives.
struct ScriptedModel {
    steps: Mutex<VecDeque<Vec<Message>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    fn new(steps: Vec<Vec<Message>>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl ModelClient for ScriptedModel {
    async fn generate(&self, request: ModelRequest) -> ad_domain::Result<ModelTurn> {
        self.requests.lock().push(request.messages.clone());
        let blocks = self.steps.lock().pop_front().unwrap_or_default();
        Ok(ModelTurn {
            blocks,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        })
    }
}

/// Model that asks for the same tool forever (budget-exhaustion tests).
struct LoopingModel {
    counter: AtomicUsize,
}

#[async_trait::async_trait]
impl ModelClient for LoopingModel {
    async fn generate(&self, _request: ModelRequest) -> ad_domain::Result<ModelTurn> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(ModelTurn {
            blocks: vec![Message::tool_call(format!("loop-{n}"), "noop", json!({}))],
            usage: TokenUsage::default(),
        })
    }
}

struct FailingModel;

#[async_trait::async_trait]
impl ModelClient for FailingModel {
    async fn generate(&self, _request: ModelRequest) -> ad_domain::Result<ModelTurn> {
        Err(Error::Provider("upstream unavailable".into()))
    }
}

/// Tool double: fixed output, optional confirmation, optional long sleep
/// that observes the cancel token.
struct FakeTool {
    name: String,
    read_only: bool,
    confirm: bool,
    output: String,
    sleep: Duration,
    executions: Arc<AtomicUsize>,
}

impl FakeTool {
    fn new(name: &str, output: &str) -> Self {
        Self {
            name: name.into(),
            read_only: true,
            confirm: false,
            output: output.into(),
            sleep: Duration::ZERO,
            executions: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait::async_trait]
impl Tool for FakeTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: "test tool".into(),
            input_schema: json!({"type": "object"}),
            read_only: self.read_only,
            requires_confirmation: self.confirm,
        }
    }

    fn should_confirm(&self, _input: &Value) -> Option<ConfirmationRequest> {
        self.confirm.then(|| ConfirmationRequest {
            kind: ConfirmationKind::Bash,
            message: format!("allow {}?", self.name),
        })
    }

    async fn execute(&self, _input: Value, cancel: &CancelToken) -> ad_domain::Result<ToolResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let start = std::time::Instant::now();
        while start.elapsed() < self.sleep {
            if cancel.is_cancelled() {
                return Ok(ToolResult::text("stopped early"));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(ToolResult::text(self.output.clone()))
    }
}

/// Subscriber that records every event it sees, in order.
struct Collector {
    events: Mutex<Vec<AgentEvent>>,
}

impl Collector {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }
}

#[async_trait::async_trait]
impl Subscriber for Collector {
    fn name(&self) -> &str {
        "collector"
    }

    async fn handle_event(&self, event: AgentEvent) {
        self.events.lock().push(event);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    controller: Arc<AgentController>,
    events: EventStream,
    collector: Arc<Collector>,
    gate: Arc<ConfirmationGate>,
}

fn harness(model: Arc<dyn ModelClient>, tools: Vec<FakeTool>, max_turns: usize) -> Harness {
    let mut registry = ad_tools::ToolRegistry::new();
    for tool in tools {
        registry.register(Arc::new(tool)).unwrap();
    }

    let gate = Arc::new(ConfirmationGate::new(Duration::from_secs(5)));
    let events = EventStream::new();
    let dispatcher = Arc::new(ToolDispatcher::new(
        Arc::new(registry),
        gate.clone(),
        AutoApprovePolicy::from_config(&ToolsConfig::default()),
        events.clone(),
        8,
    ));

    let context = Arc::new(ContextManager::new(
        Arc::new(CharEstimateCounter::new()),
        ContextConfig {
            token_budget: 1_000_000,
            strategy: TruncationStrategy::Drop,
            summary_max_tokens: 200,
        },
    ));

    let collector = Collector::new();
    events.subscribe(collector.clone());

    let controller = Arc::new(AgentController::new(
        model,
        dispatcher,
        context,
        events.clone(),
        std::env::temp_dir(),
        &AgentConfig {
            max_turns,
            max_output_tokens: None,
            system_prompt: None,
        },
    ));

    Harness {
        controller,
        events,
        collector,
        gate,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s1_pure_conversation() {
    let model = ScriptedModel::new(vec![vec![
        Message::Thinking {
            signature: "sig-1".into(),
            text: "the user greeted me".into(),
        },
        Message::assistant("hello"),
    ]]);
    let h = harness(model, vec![], 10);

    let output = h.controller.run("hi", &[]).await.unwrap();
    assert_eq!(output.output, "hello");

    h.events.drain(Duration::from_secs(2)).await;
    assert_eq!(
        h.collector.kinds(),
        vec![EventKind::AgentThinking, EventKind::AgentResponse]
    );

    let state = h.controller.state_snapshot();
    assert_eq!(state.turns().len(), 2);
}

#[tokio::test]
async fn s2_single_tool_call() {
    let model = ScriptedModel::new(vec![
        vec![Message::tool_call("c1", "ls", json!({"path": "/w"}))],
        vec![Message::assistant("Two files.")],
    ]);
    let h = harness(model, vec![FakeTool::new("ls", "a.txt\nb.txt")], 10);

    let output = h.controller.run("list files", &[]).await.unwrap();
    assert_eq!(output.output, "Two files.");

    h.events.drain(Duration::from_secs(2)).await;
    assert_eq!(
        h.collector.kinds(),
        vec![
            EventKind::AgentThinking,
            EventKind::ToolCall,
            EventKind::ToolResult,
            EventKind::AgentThinking,
            EventKind::AgentResponse,
        ]
    );

    // The tool output was fed back into the dialogue.
    let state = h.controller.state_snapshot();
    let has_result = state.snapshot_for_model().iter().any(|m| {
        matches!(m, Message::ToolResult { id, output, .. }
            if id == "c1" && output.text() == Some("a.txt\nb.txt"))
    });
    assert!(has_result);
}

#[tokio::test]
async fn empty_model_response_means_complete() {
    let model = ScriptedModel::new(vec![vec![]]);
    let h = harness(model, vec![], 10);

    let output = h.controller.run("anything", &[]).await.unwrap();
    assert_eq!(output.output, "Task complete");
    assert_eq!(output.message, "Task completed");
}

#[tokio::test]
async fn s5_confirmation_denial_feeds_alternative_to_model() {
    let mut rm = FakeTool::new("rm", "deleted");
    rm.read_only = false;
    rm.confirm = true;
    let executions = rm.executions.clone();

    let model = ScriptedModel::new(vec![
        vec![Message::tool_call("c1", "rm", json!({"path": "junk"}))],
        vec![Message::assistant("ok, listing instead")],
    ]);
    let h = harness(model.clone(), vec![rm], 10);

    // Deny once the confirmation shows up.
    let gate = h.gate.clone();
    let denier = tokio::spawn(async move {
        loop {
            if gate.resolve(
                "c1",
                ConfirmationDecision::denied(Some("list instead".into())),
            ) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let output = h.controller.run("remove junk", &[]).await.unwrap();
    denier.await.unwrap();
    assert_eq!(output.output, "ok, listing instead");

    h.events.drain(Duration::from_secs(2)).await;
    let kinds = h.collector.kinds();
    assert!(kinds.contains(&EventKind::ToolConfirmation));
    // Denied: the tool body never ran.
    assert_eq!(executions.load(Ordering::SeqCst), 0);

    // The second model request saw the denial text with the alternative.
    let requests = model.requests.lock();
    let denial_seen = requests[1].iter().any(|m| {
        matches!(m, Message::ToolResult { output, .. }
            if output.text().is_some_and(|t|
                t.contains("Tool execution denied for: rm")
                && t.contains("list instead")))
    });
    assert!(denial_seen);
}

#[tokio::test]
async fn s6_cancellation_mid_tool() {
    let mut slow = FakeTool::new("slow", "never seen");
    slow.read_only = false;
    slow.sleep = Duration::from_secs(30);

    let model = ScriptedModel::new(vec![vec![
        Message::tool_call("c1", "slow", json!({})),
        Message::tool_call("c2", "slow2", json!({})),
    ]]);
    let mut slow2 = FakeTool::new("slow2", "never seen");
    slow2.read_only = false;
    slow2.sleep = Duration::from_secs(30);

    let h = harness(model, vec![slow, slow2], 10);

    let controller = h.controller.clone();
    let runner = tokio::spawn(async move { controller.run("do slow things", &[]).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    h.controller.cancel();

    let started = std::time::Instant::now();
    let output = runner.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10), "cancel was not prompt");
    assert_eq!(output.message, AGENT_INTERRUPT_MESSAGE);

    // Every tool call in the turn has a matching result.
    let state = h.controller.state_snapshot();
    assert!(state.pending_tool_calls().is_empty());
    let messages = state.snapshot_for_model();
    let interrupt_results = messages
        .iter()
        .filter(|m| {
            matches!(m, Message::ToolResult { output, .. }
                if output.text() == Some(TOOL_INTERRUPT_MESSAGE))
        })
        .count();
    assert!(interrupt_results >= 1);

    h.events.drain(Duration::from_secs(2)).await;
    assert!(h
        .collector
        .kinds()
        .contains(&EventKind::AgentResponseInterrupted));
}

#[tokio::test]
async fn max_turns_is_a_terminal_outcome_not_an_error() {
    let model = Arc::new(LoopingModel {
        counter: AtomicUsize::new(0),
    });
    let h = harness(model, vec![FakeTool::new("noop", "ok")], 3);

    let output = h.controller.run("never ends", &[]).await.unwrap();
    assert_eq!(output.output, "Agent did not complete after max turns");
}

#[tokio::test]
async fn model_error_aborts_turn_and_keeps_transcript() {
    let h = harness(Arc::new(FailingModel), vec![], 10);

    let err = h.controller.run("hi", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Provider(_)));

    h.events.drain(Duration::from_secs(2)).await;
    assert!(h.collector.kinds().contains(&EventKind::Error));

    // The user turn stays in the transcript.
    let state = h.controller.state_snapshot();
    assert_eq!(state.turns().len(), 1);
}

#[tokio::test]
async fn tool_error_is_fed_back_and_loop_recovers() {
    struct BrokenTool;

    #[async_trait::async_trait]
    impl Tool for BrokenTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "broken".into(),
                description: "always fails".into(),
                input_schema: json!({"type": "object"}),
                read_only: true,
                requires_confirmation: false,
            }
        }

        async fn execute(
            &self,
            _input: Value,
            _cancel: &CancelToken,
        ) -> ad_domain::Result<ToolResult> {
            Err(Error::ToolExecution {
                tool: "broken".into(),
                message: "disk on fire".into(),
            })
        }
    }

    let model = ScriptedModel::new(vec![
        vec![Message::tool_call("c1", "broken", json!({}))],
        vec![Message::assistant("recovered")],
    ]);

    let mut registry = ad_tools::ToolRegistry::new();
    registry.register(Arc::new(BrokenTool)).unwrap();

    let events = EventStream::new();
    let dispatcher = Arc::new(ToolDispatcher::new(
        Arc::new(registry),
        Arc::new(ConfirmationGate::new(Duration::from_secs(5))),
        AutoApprovePolicy::default(),
        events.clone(),
        8,
    ));
    let context = Arc::new(ContextManager::new(
        Arc::new(CharEstimateCounter::new()),
        ContextConfig::default(),
    ));
    let controller = AgentController::new(
        model.clone(),
        dispatcher,
        context,
        events.clone(),
        std::env::temp_dir(),
        &AgentConfig::default(),
    );

    let output = controller.run("try it", &[]).await.unwrap();
    assert_eq!(output.output, "recovered");

    // The error result reached the model on the next iteration.
    let requests = model.requests.lock();
    let error_seen = requests[1].iter().any(|m| {
        matches!(m, Message::ToolResult { is_error, output, .. }
            if *is_error && output.text().is_some_and(|t| t.contains("disk on fire")))
    });
    assert!(error_seen);
}

#[tokio::test]
async fn compact_reports_token_savings() {
    let model = ScriptedModel::new(vec![]);
    let h = harness(model, vec![], 10);

    // Seed a multi-episode dialogue directly.
    let mut state = ConversationState::new();
    for i in 0..5 {
        state.append_user_turn(format!("question {i}"), vec![]);
        state
            .append_assistant_turn(vec![Message::assistant("x".repeat(2000))])
            .unwrap();
    }
    h.controller.restore_state(state);

    let report = h.controller.compact().await.unwrap();
    assert!(report.new_tokens < report.original_tokens);
    assert_eq!(
        report.tokens_saved,
        report.original_tokens - report.new_tokens
    );

    h.events.drain(Duration::from_secs(2)).await;
    assert!(h.collector.kinds().contains(&EventKind::CompactDone));
}

#[tokio::test]
async fn clear_resets_dialogue() {
    let model = ScriptedModel::new(vec![vec![Message::assistant("hello")]]);
    let h = harness(model, vec![], 10);

    h.controller.run("hi", &[]).await.unwrap();
    assert!(!h.controller.state_snapshot().is_empty());

    h.controller.clear();
    assert!(h.controller.state_snapshot().is_empty());
}
