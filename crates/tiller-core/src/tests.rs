// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
/// End-to-end tests for the agent loop.
///
/// Uses ScriptedTransport so every scenario is deterministic and needs
/// no network access.
#[cfg(test)]
mod agent_tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use tiller_config::CompactionConfig;
    use tiller_hooks::{Hook, HookContext, HookEventKind, HookRunner, ToolBeforeOutcome};
    use tiller_model::{
        Message, Script, ScriptedTransport, StopReason, TransportError, UserMessage,
    };
    use tiller_tools::{Tool, ToolRegistry, ToolResult, ToolUpdate};

    use crate::{Agent, AgentEvent};

    // ── Helpers ───────────────────────────────────────────────────────────────

    struct EchoTool {
        called: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn label(&self) -> &str {
            "Echo"
        }
        fn description(&self) -> &str {
            "echoes the text argument"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "required": ["text"],
                "properties": { "text": { "type": "string" } }
            })
        }
        async fn execute(
            &self,
            _call_id: &str,
            args: Value,
            _cancel: CancellationToken,
            _update: mpsc::Sender<ToolUpdate>,
        ) -> ToolResult {
            self.called.store(true, Ordering::SeqCst);
            ToolResult::ok(args["text"].as_str().unwrap_or_default())
        }
    }

    /// Sleeps before answering so completion order differs from call order.
    struct SlowTool {
        name: &'static str,
        delay_ms: u64,
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            self.name
        }
        fn label(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "sleeps, then reports its own name"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(
            &self,
            _call_id: &str,
            _args: Value,
            _cancel: CancellationToken,
            _update: mpsc::Sender<ToolUpdate>,
        ) -> ToolResult {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            ToolResult::ok(self.name)
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn label(&self) -> &str {
            "Broken"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(
            &self,
            _call_id: &str,
            _args: Value,
            _cancel: CancellationToken,
            _update: mpsc::Sender<ToolUpdate>,
        ) -> ToolResult {
            ToolResult::err("disk on fire")
        }
    }

    /// Streams two partial updates before finishing.
    struct ProgressTool;

    #[async_trait]
    impl Tool for ProgressTool {
        fn name(&self) -> &str {
            "progress"
        }
        fn label(&self) -> &str {
            "Progress"
        }
        fn description(&self) -> &str {
            "reports progress while running"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(
            &self,
            _call_id: &str,
            _args: Value,
            _cancel: CancellationToken,
            update: mpsc::Sender<ToolUpdate>,
        ) -> ToolResult {
            for step in ["half", "done"] {
                let _ = update
                    .send(ToolUpdate {
                        content: vec![tiller_tools::ToolContent::Text(step.into())],
                        details: Value::Null,
                    })
                    .await;
            }
            ToolResult::ok("finished")
        }
    }

    fn agent_with_tools(transport: ScriptedTransport, registry: ToolRegistry) -> Agent {
        Agent::new(Arc::new(transport), "you are helpful", Arc::new(registry))
    }

    fn agent(transport: ScriptedTransport) -> Agent {
        agent_with_tools(transport, ToolRegistry::new())
    }

    async fn drain(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                AgentEvent::AgentStart => "agent_start",
                AgentEvent::TurnStart => "turn_start",
                AgentEvent::MessageStart { message } => match message {
                    Message::User(_) => "message_start:user",
                    Message::Assistant(_) => "message_start:assistant",
                    _ => "message_start:other",
                },
                AgentEvent::MessageUpdate { .. } => "message_update",
                AgentEvent::MessageEnd { message } => match message {
                    Message::User(_) => "message_end:user",
                    Message::Assistant(_) => "message_end:assistant",
                    _ => "message_end:other",
                },
                AgentEvent::ToolExecutionStart { .. } => "tool_execution_start",
                AgentEvent::ToolExecutionUpdate { .. } => "tool_execution_update",
                AgentEvent::ToolExecutionEnd { .. } => "tool_execution_end",
                AgentEvent::TurnEnd { .. } => "turn_end",
                AgentEvent::AgentEnd { .. } => "agent_end",
            })
            .collect()
    }

    // ── Single turn, no tools ─────────────────────────────────────────────────

    #[tokio::test]
    async fn single_turn_event_order() {
        let mut agent = agent(ScriptedTransport::new(vec![Script::text("hello")]));
        let (tx, rx) = mpsc::channel(256);

        let added = agent.prompt("say hi", vec![], tx).await.unwrap();
        let events = drain(rx).await;

        assert_eq!(
            kinds(&events),
            vec![
                "agent_start",
                "turn_start",
                "message_start:user",
                "message_end:user",
                "message_start:assistant",
                "message_update",
                "message_end:assistant",
                "turn_end",
                "agent_end",
            ]
        );
        assert_eq!(added.len(), 2);
        assert_eq!(added[0], Message::user("say hi").clone_with_ts(&added[0]));
        let assistant = added[1].as_assistant().unwrap();
        assert_eq!(assistant.text(), "hello");
        assert_eq!(assistant.stop_reason, StopReason::Stop);
    }

    // Keep timestamps out of equality checks for user messages.
    trait CloneWithTs {
        fn clone_with_ts(&self, other: &Message) -> Message;
    }
    impl CloneWithTs for Message {
        fn clone_with_ts(&self, other: &Message) -> Message {
            let mut m = self.clone();
            if let (Message::User(u), Message::User(o)) = (&mut m, other) {
                u.timestamp = o.timestamp;
            }
            m
        }
    }

    #[tokio::test]
    async fn streamed_deltas_accumulate_into_final_text() {
        let mut agent = agent(ScriptedTransport::new(vec![Script::text_deltas([
            "hel", "lo", " world",
        ])]));
        let (tx, rx) = mpsc::channel(256);
        let added = agent.prompt("go", vec![], tx).await.unwrap();
        let events = drain(rx).await;

        let updates = events
            .iter()
            .filter(|e| matches!(e, AgentEvent::MessageUpdate { .. }))
            .count();
        assert_eq!(updates, 3);
        assert_eq!(added[1].as_assistant().unwrap().text(), "hello world");
    }

    // ── One tool call ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn tool_call_round_trip() {
        let called = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool {
            called: called.clone(),
        });
        let transport =
            ScriptedTransport::tool_then_text("t1", "echo", json!({"text": "hi"}), "done");
        let mut agent = agent_with_tools(transport, registry);
        let (tx, rx) = mpsc::channel(256);

        let added = agent.prompt("use the tool", vec![], tx).await.unwrap();
        let events = drain(rx).await;

        assert!(called.load(Ordering::SeqCst));
        let start = events.iter().find_map(|e| match e {
            AgentEvent::ToolExecutionStart { tool_call_id, .. } => Some(tool_call_id.clone()),
            _ => None,
        });
        assert_eq!(start.as_deref(), Some("t1"));
        let end_result = events.iter().find_map(|e| match e {
            AgentEvent::ToolExecutionEnd { result, .. } => Some(result.clone()),
            _ => None,
        });
        let end_result = end_result.unwrap();
        assert_eq!(end_result.content[0].as_text(), Some("hi"));
        assert!(!end_result.is_error);

        // user, assistant(toolUse), toolResult, assistant("done")
        assert_eq!(added.len(), 4);
        let tool_result = added[2].as_tool_result().unwrap();
        assert_eq!(tool_result.tool_call_id, "t1");
        assert_eq!(tool_result.tool_name, "echo");
        assert_eq!(added[3].as_assistant().unwrap().text(), "done");
    }

    #[tokio::test]
    async fn parallel_tools_results_keep_call_order() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool {
            name: "slow",
            delay_ms: 60,
        });
        registry.register(SlowTool {
            name: "fast",
            delay_ms: 0,
        });
        let transport = ScriptedTransport::new(vec![
            Script::tool_use(vec![
                Script::call("t1", "slow", json!({})),
                Script::call("t2", "fast", json!({})),
            ]),
            Script::text("after tools"),
        ]);
        let mut agent = agent_with_tools(transport, registry);
        let (tx, rx) = mpsc::channel(256);

        let added = agent.prompt("run both", vec![], tx).await.unwrap();
        let events = drain(rx).await;

        let end_order: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolExecutionEnd { tool_call_id, .. } => Some(tool_call_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(end_order, vec!["t1", "t2"]);

        let result_ids: Vec<&str> = added
            .iter()
            .filter_map(|m| m.as_tool_result())
            .map(|r| r.tool_call_id.as_str())
            .collect();
        assert_eq!(result_ids, vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn one_failing_tool_does_not_cancel_its_peer() {
        let mut registry = ToolRegistry::new();
        registry.register(FailingTool);
        registry.register(SlowTool {
            name: "fine",
            delay_ms: 0,
        });
        let transport = ScriptedTransport::new(vec![
            Script::tool_use(vec![
                Script::call("t1", "broken", json!({})),
                Script::call("t2", "fine", json!({})),
            ]),
            Script::text("continued"),
        ]);
        let mut agent = agent_with_tools(transport, registry);
        let (tx, rx) = mpsc::channel(256);

        let added = agent.prompt("go", vec![], tx).await.unwrap();
        drop(rx);

        let results: Vec<_> = added.iter().filter_map(|m| m.as_tool_result()).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_error);
        assert!(!results[1].is_error);
        assert_eq!(added.last().unwrap().as_assistant().unwrap().text(), "continued");
    }

    #[tokio::test]
    async fn invalid_arguments_produce_error_result_without_execution() {
        let called = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool {
            called: called.clone(),
        });
        // "text" argument missing.
        let transport = ScriptedTransport::tool_then_text("t1", "echo", json!({}), "recovered");
        let mut agent = agent_with_tools(transport, registry);
        let (tx, rx) = mpsc::channel(256);

        let added = agent.prompt("go", vec![], tx).await.unwrap();
        drop(rx);

        assert!(!called.load(Ordering::SeqCst), "execute must not run");
        let result = added[2].as_tool_result().unwrap();
        assert!(result.is_error);
        assert!(result.content[0].as_text().unwrap().contains("invalid arguments"));
    }

    #[tokio::test]
    async fn unknown_tool_produces_error_result() {
        let transport =
            ScriptedTransport::tool_then_text("t1", "missing", json!({}), "moving on");
        let mut agent = agent(transport);
        let (tx, rx) = mpsc::channel(256);

        let added = agent.prompt("go", vec![], tx).await.unwrap();
        drop(rx);

        let result = added[2].as_tool_result().unwrap();
        assert!(result.is_error);
        assert!(result.content[0].as_text().unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn tool_partial_updates_are_forwarded() {
        let mut registry = ToolRegistry::new();
        registry.register(ProgressTool);
        let transport =
            ScriptedTransport::tool_then_text("t1", "progress", json!({}), "ok");
        let mut agent = agent_with_tools(transport, registry);
        let (tx, rx) = mpsc::channel(256);

        agent.prompt("go", vec![], tx).await.unwrap();
        let events = drain(rx).await;

        let updates: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolExecutionUpdate { content, .. } => {
                    content[0].as_text().map(String::from)
                }
                _ => None,
            })
            .collect();
        assert_eq!(updates, vec!["half", "done"]);
    }

    // ── Boundary: toolUse with zero calls ─────────────────────────────────────

    #[tokio::test]
    async fn tool_use_stop_with_no_calls_is_treated_as_stop() {
        let transport = ScriptedTransport::new(vec![Script::tool_use(vec![])]);
        let mut agent = agent(transport);
        let (tx, rx) = mpsc::channel(256);

        let added = agent.prompt("go", vec![], tx).await.unwrap();
        let events = drain(rx).await;

        // One turn only, no tool events, clean termination.
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, AgentEvent::TurnStart))
                .count(),
            1
        );
        assert!(!events
            .iter()
            .any(|e| matches!(e, AgentEvent::ToolExecutionStart { .. })));
        assert_eq!(added.len(), 2);
    }

    // ── Steering pre-emption ──────────────────────────────────────────────────

    #[tokio::test]
    async fn steer_prompt_starts_a_new_turn_before_follow_ups() {
        let transport = ScriptedTransport::new(vec![
            Script::text("turn one"),
            Script::text("turn two"),
        ]);
        let mut agent = agent(transport);

        let queue = Arc::new(Mutex::new(vec![UserMessage::text("pivot")]));
        let q = queue.clone();
        agent.set_steering_source(move || q.lock().unwrap().drain(..).collect());

        let (tx, rx) = mpsc::channel(256);
        let added = agent.prompt("start", vec![], tx).await.unwrap();
        let events = drain(rx).await;

        assert_eq!(
            kinds(&events),
            vec![
                "agent_start",
                "turn_start",
                "message_start:user",
                "message_end:user",
                "message_start:assistant",
                "message_update",
                "message_end:assistant",
                "turn_end",
                // Steered turn: turn_start precedes the synthesised user
                // message, with no tool-result follow-up in between.
                "turn_start",
                "message_start:user",
                "message_end:user",
                "message_start:assistant",
                "message_update",
                "message_end:assistant",
                "turn_end",
                "agent_end",
            ]
        );
        assert_eq!(added[2].as_user().unwrap().as_text(), "pivot");
        assert_eq!(added[3].as_assistant().unwrap().text(), "turn two");
    }

    #[tokio::test]
    async fn follow_up_runs_after_model_stops() {
        let transport = ScriptedTransport::new(vec![
            Script::text("first answer"),
            Script::text("second answer"),
        ]);
        let mut agent = agent(transport);

        let queue = Arc::new(Mutex::new(vec![UserMessage::text("and then?")]));
        let q = queue.clone();
        agent.set_follow_up_source(move || q.lock().unwrap().drain(..).collect());

        let (tx, rx) = mpsc::channel(256);
        let added = agent.prompt("start", vec![], tx).await.unwrap();
        drop(rx);

        assert_eq!(added.len(), 4);
        assert_eq!(added[2].as_user().unwrap().as_text(), "and then?");
        assert_eq!(added[3].as_assistant().unwrap().text(), "second answer");
    }

    // ── Cancellation mid-stream ───────────────────────────────────────────────

    #[tokio::test]
    async fn abort_mid_stream_emits_partial_aborted_message() {
        let transport = ScriptedTransport::new(vec![Script::stall(vec!["par".into()])]);
        let mut agent = agent(transport);
        let cancel = agent.cancellation();

        let (tx, mut rx) = mpsc::channel(256);
        let task = tokio::spawn(async move { agent.prompt("write a poem", vec![], tx).await });

        // Wait for the delta, then abort.
        let mut seen_delta = false;
        let mut tail = Vec::new();
        while let Some(ev) = rx.recv().await {
            if !seen_delta {
                if let AgentEvent::MessageUpdate { delta, .. } = &ev {
                    assert_eq!(delta, "par");
                    seen_delta = true;
                    cancel.cancel();
                    // Idempotent double-cancel.
                    cancel.cancel();
                }
                continue;
            }
            tail.push(ev);
        }
        assert!(seen_delta);

        let added = task.await.unwrap().unwrap();
        let assistant = added.last().unwrap().as_assistant().unwrap();
        assert_eq!(assistant.stop_reason, StopReason::Aborted);
        assert_eq!(assistant.text(), "par");

        // Bounded termination: no further updates after the abort.
        assert!(!tail
            .iter()
            .any(|e| matches!(e, AgentEvent::MessageUpdate { .. })));
        assert!(matches!(tail.last(), Some(AgentEvent::AgentEnd { .. })));
    }

    #[tokio::test]
    async fn abort_before_start_ends_immediately() {
        let mut agent = agent(ScriptedTransport::always_text("never sent"));
        agent.cancellation().cancel();

        let (tx, rx) = mpsc::channel(256);
        let added = agent.prompt("go", vec![], tx).await.unwrap();
        let events = drain(rx).await;

        assert!(added.is_empty());
        assert_eq!(kinds(&events), vec!["agent_start", "agent_end"]);
    }

    // ── Transport failures ────────────────────────────────────────────────────

    #[tokio::test]
    async fn retryable_transport_error_escapes_the_loop() {
        let transport = ScriptedTransport::new(vec![Script::connect_error(
            TransportError::RateLimit("overloaded".into()),
        )]);
        let mut agent = agent(transport);
        let (tx, rx) = mpsc::channel(256);

        let err = agent.prompt("go", vec![], tx).await.unwrap_err();
        drop(rx);
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn non_retryable_error_becomes_error_assistant_message() {
        let transport = ScriptedTransport::new(vec![Script::connect_error(
            TransportError::Auth("bad key".into()),
        )]);
        let mut agent = agent(transport);
        let (tx, rx) = mpsc::channel(256);

        let added = agent.prompt("go", vec![], tx).await.unwrap();
        let events = drain(rx).await;

        let assistant = added.last().unwrap().as_assistant().unwrap();
        assert_eq!(assistant.stop_reason, StopReason::Error);
        assert!(assistant
            .error_message
            .as_deref()
            .unwrap()
            .contains("authentication failed"));
        assert!(matches!(events.last(), Some(AgentEvent::AgentEnd { .. })));
    }

    #[tokio::test]
    async fn mid_stream_error_event_is_classified_like_connect_errors() {
        let transport = ScriptedTransport::new(vec![Script::stream_error(
            TransportError::Protocol("garbled frame".into()),
        )]);
        let mut agent = agent(transport);
        let (tx, rx) = mpsc::channel(256);

        let added = agent.prompt("go", vec![], tx).await.unwrap();
        drop(rx);
        let assistant = added.last().unwrap().as_assistant().unwrap();
        assert_eq!(assistant.stop_reason, StopReason::Error);
    }

    // ── Retry-after-overflow ──────────────────────────────────────────────────

    #[tokio::test]
    async fn overflow_with_compaction_enabled_retries_on_summary() {
        let transport = ScriptedTransport::new(vec![
            Script::connect_error(TransportError::ContextOverflow("too big".into())),
            Script::text("summary of earlier work"),
            Script::text("recovered answer"),
        ]);
        let mut agent = agent(transport).with_compaction(CompactionConfig {
            on_overflow: true,
            instructions: None,
        });
        let (tx, rx) = mpsc::channel(256);

        let added = agent.prompt("go", vec![], tx).await.unwrap();
        let events = drain(rx).await;

        let assistant = added.last().unwrap().as_assistant().unwrap();
        assert_eq!(assistant.text(), "recovered answer");
        let state = agent.compaction_state().unwrap();
        assert_eq!(state.last_summary, "summary of earlier work");
        // The context was replaced by the summary message.
        assert!(agent.messages()[0]
            .as_user()
            .unwrap()
            .as_text()
            .contains("compacted into the following summary"));
        // One prompt, one agent_end.
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, AgentEvent::AgentEnd { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn overflow_with_compaction_disabled_surfaces_the_error() {
        let transport = ScriptedTransport::new(vec![Script::connect_error(
            TransportError::ContextOverflow("too big".into()),
        )]);
        let mut agent = agent(transport);
        let (tx, rx) = mpsc::channel(256);

        let added = agent.prompt("go", vec![], tx).await.unwrap();
        drop(rx);
        let assistant = added.last().unwrap().as_assistant().unwrap();
        assert_eq!(assistant.stop_reason, StopReason::Error);
        assert!(assistant.error_message.as_deref().unwrap().contains("context overflow"));
    }

    // ── Continue mode ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn continue_run_answers_pending_user_message() {
        let mut agent = agent(ScriptedTransport::always_text("the answer"));
        agent.seed_messages(vec![Message::user("unanswered question")]);

        let (tx, rx) = mpsc::channel(256);
        let added = agent.continue_run(tx).await.unwrap();
        let events = drain(rx).await;

        assert_eq!(added.len(), 1);
        assert_eq!(added[0].as_assistant().unwrap().text(), "the answer");
        // No user message events for a continue.
        assert!(!kinds(&events).contains(&"message_start:user"));
    }

    // ── Hook integration ──────────────────────────────────────────────────────

    struct BlockEcho;

    #[async_trait]
    impl Hook for BlockEcho {
        fn name(&self) -> &str {
            "block-echo"
        }
        fn subscriptions(&self) -> &[HookEventKind] {
            &[HookEventKind::ToolExecuteBefore]
        }
        async fn on_tool_execute_before(
            &self,
            request: &tiller_hooks::ToolExecuteRequest,
            _ctx: &HookContext,
        ) -> anyhow::Result<Option<ToolBeforeOutcome>> {
            if request.tool_name == "echo" {
                Ok(Some(ToolBeforeOutcome::Block("echo is disabled".into())))
            } else {
                Ok(None)
            }
        }
    }

    #[tokio::test]
    async fn gatekeeping_hook_blocks_tool_execution() {
        let called = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool {
            called: called.clone(),
        });
        let transport =
            ScriptedTransport::tool_then_text("t1", "echo", json!({"text": "x"}), "after");
        let runner = Arc::new(HookRunner::new(vec![Arc::new(BlockEcho)]));
        let hook_ctx = HookContext::new(std::env::temp_dir(), "scripted-model");
        let mut agent = agent_with_tools(transport, registry).with_hooks(runner, hook_ctx);

        let (tx, rx) = mpsc::channel(256);
        let added = agent.prompt("go", vec![], tx).await.unwrap();
        drop(rx);

        assert!(!called.load(Ordering::SeqCst));
        let result = added[2].as_tool_result().unwrap();
        assert!(result.is_error);
        assert!(result.content[0]
            .as_text()
            .unwrap()
            .contains("echo is disabled"));
    }

    struct RewriteInput;

    #[async_trait]
    impl Hook for RewriteInput {
        fn name(&self) -> &str {
            "rewrite-input"
        }
        fn subscriptions(&self) -> &[HookEventKind] {
            &[HookEventKind::ToolExecuteBefore]
        }
        async fn on_tool_execute_before(
            &self,
            _request: &tiller_hooks::ToolExecuteRequest,
            _ctx: &HookContext,
        ) -> anyhow::Result<Option<ToolBeforeOutcome>> {
            Ok(Some(ToolBeforeOutcome::Proceed(
                json!({"text": "rewritten"}),
            )))
        }
    }

    #[tokio::test]
    async fn gatekeeping_hook_can_replace_tool_input() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool {
            called: Arc::new(AtomicBool::new(false)),
        });
        let transport =
            ScriptedTransport::tool_then_text("t1", "echo", json!({"text": "original"}), "end");
        let runner = Arc::new(HookRunner::new(vec![Arc::new(RewriteInput)]));
        let hook_ctx = HookContext::new(std::env::temp_dir(), "scripted-model");
        let mut agent = agent_with_tools(transport, registry).with_hooks(runner, hook_ctx);

        let (tx, rx) = mpsc::channel(256);
        let added = agent.prompt("go", vec![], tx).await.unwrap();
        drop(rx);

        let result = added[2].as_tool_result().unwrap();
        assert_eq!(result.content[0].as_text(), Some("rewritten"));
    }
}
