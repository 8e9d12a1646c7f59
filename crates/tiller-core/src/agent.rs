// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use tiller_config::{CompactionConfig, ThinkingLevel};
use tiller_hooks::{
    ChatParams, HookContext, HookRunner, Notification, ToolAfterResult, ToolBeforeOutcome,
    ToolExecuteRequest,
};
use tiller_model::{
    AssistantMessage, Attachment, Message, MessageAccumulator, StopReason, StreamEvent,
    StreamOptions, ToolResultMessage, Transport, TransportContext, TransportError, UserContent,
    UserMessage,
};
use tiller_session::CompactionState;
use tiller_tools::{validate_args, ToolContent, ToolRegistry, ToolUpdate};

use crate::{compact, context::AgentContext, events::AgentEvent};

/// Source of queued user messages consulted between turns.
pub type MessageSource = Box<dyn Fn() -> Vec<UserMessage> + Send + Sync>;

/// Outcome of one assistant streaming call.
enum StreamedTurn {
    Completed {
        message: AssistantMessage,
        started: bool,
    },
    /// The provider rejected the request for exceeding its context
    /// window; the loop may compact and retry.
    Overflow(TransportError),
}

/// The agent loop: drives one or more model streaming calls plus tool
/// executions per prompt, emitting [`AgentEvent`]s and appending every
/// new message to its context.
pub struct Agent {
    context: AgentContext,
    transport: Arc<dyn Transport>,
    hooks: Option<Arc<HookRunner>>,
    hook_ctx: HookContext,
    compaction: CompactionConfig,
    thinking_level: ThinkingLevel,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    cancel: CancellationToken,
    steering: Option<MessageSource>,
    follow_up: Option<MessageSource>,
    last_compaction: Option<CompactionState>,
}

impl Agent {
    pub fn new(
        transport: Arc<dyn Transport>,
        system_prompt: impl Into<String>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| ".".into());
        let hook_ctx = HookContext::new(cwd, transport.model());
        Self {
            context: AgentContext::new(system_prompt, tools),
            transport,
            hooks: None,
            hook_ctx,
            compaction: CompactionConfig::default(),
            thinking_level: ThinkingLevel::Off,
            temperature: None,
            max_tokens: None,
            cancel: CancellationToken::new(),
            steering: None,
            follow_up: None,
            last_compaction: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRunner>, ctx: HookContext) -> Self {
        self.hooks = Some(hooks);
        self.hook_ctx = ctx;
        self
    }

    pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    pub fn with_thinking_level(mut self, level: ThinkingLevel) -> Self {
        self.thinking_level = level;
        self
    }

    pub fn with_params(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Install an externally owned cancellation token so the caller can
    /// abort the prompt without holding the agent.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Messages consulted as soon as the current turn ends, ahead of any
    /// tool-result follow-up.
    pub fn set_steering_source(
        &mut self,
        source: impl Fn() -> Vec<UserMessage> + Send + Sync + 'static,
    ) {
        self.steering = Some(Box::new(source));
    }

    /// Messages consulted once the model has finished responding to
    /// outstanding tool results.
    pub fn set_follow_up_source(
        &mut self,
        source: impl Fn() -> Vec<UserMessage> + Send + Sync + 'static,
    ) {
        self.follow_up = Some(Box::new(source));
    }

    /// Switch the model for subsequent turns.  The conversation history
    /// is preserved; the execution plan uses this between fallback steps.
    pub fn set_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transport = transport;
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn messages(&self) -> &[Message] {
        &self.context.messages
    }

    /// Copy of the message list, taken by the execution plan before an
    /// attempt so retries can restore the exact starting state.
    pub fn snapshot_messages(&self) -> Vec<Message> {
        self.context.messages.clone()
    }

    pub fn restore_messages(&mut self, messages: Vec<Message>) {
        self.context.messages = messages;
    }

    /// Pre-load history from a resumed session without submitting.
    pub fn seed_messages(&mut self, messages: Vec<Message>) {
        self.context.messages = messages;
    }

    /// Compaction produced during this prompt, if any.  The orchestrator
    /// persists it into the session metadata.
    pub fn compaction_state(&self) -> Option<&CompactionState> {
        self.last_compaction.as_ref()
    }

    /// Token aborting the current prompt.  `cancel()` is idempotent: the
    /// stream and all in-flight tools observe it on their next poll.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one prompt to completion.
    pub async fn prompt(
        &mut self,
        text: &str,
        attachments: Vec<Attachment>,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<Vec<Message>> {
        let mut user = UserMessage::text(text);
        user.attachments = attachments;
        self.run(Some(user), tx).await
    }

    /// Run one prompt from an already-built user message (the
    /// orchestrator passes hook-transformed content parts).
    pub async fn prompt_with_message(
        &mut self,
        user: UserMessage,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<Vec<Message>> {
        self.run(Some(user), tx).await
    }

    /// Continue from existing context: the last message must be a user
    /// or toolResult message the model has not yet answered.
    pub async fn continue_run(
        &mut self,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<Vec<Message>> {
        self.run(None, tx).await
    }

    async fn run(
        &mut self,
        new_user: Option<UserMessage>,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<Vec<Message>> {
        let added_from = self.context.messages.len();

        let _ = tx.send(AgentEvent::AgentStart).await;
        self.notify_hooks(Notification::AgentStart).await;

        // Aborted before the first turn: terminate without touching the
        // context.
        if self.cancel.is_cancelled() {
            let _ = tx.send(AgentEvent::AgentEnd { messages: vec![] }).await;
            self.notify_hooks(Notification::AgentEnd { messages: vec![] })
                .await;
            return Ok(Vec::new());
        }

        // Messages spliced in at the top of the next turn: the initial
        // prompt first, steering/follow-up prompts on later rounds.
        let mut pending: Vec<UserMessage> = new_user.into_iter().collect();
        let mut compacted_this_prompt = false;

        loop {
            let _ = tx.send(AgentEvent::TurnStart).await;
            self.notify_hooks(Notification::TurnStart).await;

            for user in pending.drain(..) {
                let message = Message::User(user);
                let _ = tx
                    .send(AgentEvent::MessageStart {
                        message: message.clone(),
                    })
                    .await;
                let _ = tx
                    .send(AgentEvent::MessageEnd {
                        message: message.clone(),
                    })
                    .await;
                self.context.messages.push(message);
            }

            // One assistant streaming call, with at most one
            // compact-and-retry on context overflow.
            let (assistant, started) = loop {
                match self.stream_turn(&tx).await? {
                    StreamedTurn::Completed { message, started } => break (message, started),
                    StreamedTurn::Overflow(error) => {
                        if !self.compaction.on_overflow || compacted_this_prompt {
                            break (self.error_message(&error), false);
                        }
                        if let Some(hooks) = &self.hooks {
                            if hooks.session_before_compact(self.hook_ctx.clone()).await {
                                break (self.error_message(&error), false);
                            }
                        }
                        match compact::compact(
                            self.transport.as_ref(),
                            &self.context.messages,
                            self.compaction.instructions.as_deref(),
                            self.last_compaction.as_ref(),
                        )
                        .await
                        {
                            Ok(state) => {
                                self.context.messages =
                                    vec![Message::User(compact::summary_message(&state))];
                                self.last_compaction = Some(state);
                                compacted_this_prompt = true;
                            }
                            Err(e) => {
                                warn!(error = %e, "compaction after overflow failed");
                                break (self.error_message(&error), false);
                            }
                        }
                    }
                }
            };

            if !started {
                let _ = tx
                    .send(AgentEvent::MessageStart {
                        message: Message::Assistant(assistant.clone()),
                    })
                    .await;
            }
            let assistant_message = Message::Assistant(assistant.clone());
            self.context.messages.push(assistant_message.clone());
            let _ = tx
                .send(AgentEvent::MessageEnd {
                    message: assistant_message.clone(),
                })
                .await;

            let terminal = matches!(
                assistant.stop_reason,
                StopReason::Error | StopReason::Aborted
            );

            // Zero tool calls with stopReason=toolUse degrades to a plain
            // stop so the loop cannot spin.
            let mut tool_results: Vec<Message> = Vec::new();
            if !terminal
                && assistant.stop_reason == StopReason::ToolUse
                && !assistant.tool_calls().is_empty()
            {
                tool_results = self.dispatch_tools(&assistant, &tx).await;
                for result in &tool_results {
                    self.context.messages.push(result.clone());
                }
            }

            let _ = tx
                .send(AgentEvent::TurnEnd {
                    message: assistant_message,
                    tool_results: tool_results.clone(),
                })
                .await;
            self.notify_hooks(Notification::TurnEnd {
                tool_results: tool_results.clone(),
            })
            .await;

            if terminal {
                break;
            }

            // Queue check: steering first, then the mandatory response to
            // tool results, then follow-ups.
            let steering = self.take_from(&self.steering);
            if !steering.is_empty() {
                pending = steering;
                continue;
            }
            if !tool_results.is_empty() {
                continue;
            }
            let follow_ups = self.take_from(&self.follow_up);
            if !follow_ups.is_empty() {
                pending = follow_ups;
                continue;
            }
            break;
        }

        let added = self.context.messages[added_from..].to_vec();
        let _ = tx
            .send(AgentEvent::AgentEnd {
                messages: added.clone(),
            })
            .await;
        self.notify_hooks(Notification::AgentEnd {
            messages: added.clone(),
        })
        .await;
        Ok(added)
    }

    fn take_from(&self, source: &Option<MessageSource>) -> Vec<UserMessage> {
        source.as_ref().map(|f| f()).unwrap_or_default()
    }

    fn error_message(&self, error: &TransportError) -> AssistantMessage {
        AssistantMessage::from_error(
            self.transport.provider(),
            self.transport.model(),
            self.transport.api(),
            error,
        )
    }

    /// Classify a transport failure: overflow may trigger compaction,
    /// retryable errors escape to the execution plan, everything else
    /// becomes an error assistant message.
    fn classify(&self, error: TransportError) -> anyhow::Result<StreamedTurn> {
        if error.is_context_overflow() {
            return Ok(StreamedTurn::Overflow(error));
        }
        if error.is_retryable() {
            return Err(error.into());
        }
        Ok(StreamedTurn::Completed {
            message: self.error_message(&error),
            started: false,
        })
    }

    /// One assistant streaming call against the current context.
    async fn stream_turn(&self, tx: &mpsc::Sender<AgentEvent>) -> anyhow::Result<StreamedTurn> {
        let mut system_prompt = self.context.system_prompt.clone();
        let mut params = ChatParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let mut outbound = self.context.outbound_messages();
        if let Some(hooks) = &self.hooks {
            system_prompt = hooks
                .chat_system_transform(system_prompt, self.hook_ctx.clone())
                .await;
            params = hooks.chat_params(params, self.hook_ctx.clone()).await;
            outbound = hooks
                .chat_messages_transform(outbound, self.hook_ctx.clone())
                .await;
        }

        let transport_ctx = TransportContext {
            system_prompt,
            messages: outbound,
            tools: self.context.tool_schemas(),
        };
        let options = StreamOptions {
            cancel: self.cancel.clone(),
            thinking_level: self.thinking_level,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            ..Default::default()
        };

        let mut stream = match self.transport.stream(&transport_ctx, &options).await {
            Ok(stream) => stream,
            Err(e) => return self.classify(e),
        };

        let mut acc = MessageAccumulator::new(
            self.transport.provider(),
            self.transport.model(),
            self.transport.api(),
        );
        let mut started = false;
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Ok(StreamedTurn::Completed {
                        message: acc.finish(StopReason::Aborted),
                        started,
                    });
                }
                event = stream.next() => {
                    let Some(event) = event else {
                        warn!("transport stream ended without a done event");
                        return Ok(StreamedTurn::Completed {
                            message: acc.finish(StopReason::Stop),
                            started,
                        });
                    };
                    match event {
                        Err(error) => return self.classify(error),
                        Ok(StreamEvent::Done { message, .. }) => {
                            return Ok(StreamedTurn::Completed { message, started });
                        }
                        Ok(StreamEvent::Error { error }) => return self.classify(error),
                        Ok(event) => {
                            if !started {
                                started = true;
                                let _ = tx
                                    .send(AgentEvent::MessageStart {
                                        message: Message::Assistant(
                                            acc.snapshot(StopReason::Stop),
                                        ),
                                    })
                                    .await;
                            }
                            acc.apply(&event);
                            match &event {
                                StreamEvent::TextDelta { delta, .. }
                                | StreamEvent::ThinkingDelta { delta, .. } => {
                                    let _ = tx
                                        .send(AgentEvent::MessageUpdate {
                                            message: Message::Assistant(
                                                acc.snapshot(StopReason::Stop),
                                            ),
                                            delta: delta.clone(),
                                        })
                                        .await;
                                }
                                _ => {}
                            }
                        }
                    }
                }
            }
        }
    }

    /// Execute every tool call of one assistant message in parallel and
    /// collect the results in the original call order.
    async fn dispatch_tools(
        &self,
        assistant: &AssistantMessage,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Vec<Message> {
        let calls: Vec<(String, String, serde_json::Value)> = assistant
            .tool_calls()
            .into_iter()
            .map(|(id, name, args)| (id.to_string(), name.to_string(), args.clone()))
            .collect();

        for (id, name, args) in &calls {
            let _ = tx
                .send(AgentEvent::ToolExecutionStart {
                    tool_call_id: id.clone(),
                    tool_name: name.clone(),
                    args: args.clone(),
                })
                .await;
        }

        let mut tasks = Vec::with_capacity(calls.len());
        for (id, name, args) in calls.clone() {
            let registry = Arc::clone(&self.context.tools);
            let hooks = self.hooks.clone();
            let hook_ctx = self.hook_ctx.clone();
            let cancel = self.cancel.clone();
            let events = tx.clone();
            tasks.push(tokio::spawn(async move {
                execute_one(registry, hooks, hook_ctx, cancel, events, id, name, args).await
            }));
        }

        // Await in call order so the results slice preserves it; one
        // panicking task does not cancel its peers.
        let mut results = Vec::with_capacity(calls.len());
        for (task, (id, name, _)) in tasks.into_iter().zip(calls.iter()) {
            let message = match task.await {
                Ok(message) => message,
                Err(e) => ToolResultMessage::error(
                    id.clone(),
                    name.clone(),
                    format!("tool execution panicked: {e}"),
                ),
            };
            let _ = tx
                .send(AgentEvent::ToolExecutionEnd {
                    tool_call_id: message.tool_call_id.clone(),
                    result: message.clone(),
                    is_error: message.is_error,
                })
                .await;
            results.push(Message::ToolResult(message));
        }
        results
    }

    async fn notify_hooks(&self, event: Notification) {
        if let Some(hooks) = &self.hooks {
            hooks.notify(event, self.hook_ctx.clone()).await;
        }
    }
}

/// Validate, gate, execute, and patch one tool call.
#[allow(clippy::too_many_arguments)]
async fn execute_one(
    registry: Arc<ToolRegistry>,
    hooks: Option<Arc<HookRunner>>,
    hook_ctx: HookContext,
    cancel: CancellationToken,
    events: mpsc::Sender<AgentEvent>,
    call_id: String,
    tool_name: String,
    args: serde_json::Value,
) -> ToolResultMessage {
    let Some(tool) = registry.get(&tool_name) else {
        return ToolResultMessage::error(call_id, tool_name.clone(), format!("unknown tool: {tool_name}"));
    };

    if let Err(reason) = validate_args(&tool.parameters_schema(), &args) {
        return ToolResultMessage::error(
            call_id,
            tool_name,
            format!("invalid arguments: {reason}"),
        );
    }

    let mut input = args;
    if let Some(hooks) = &hooks {
        let request = ToolExecuteRequest {
            tool_call_id: call_id.clone(),
            tool_name: tool_name.clone(),
            input: input.clone(),
        };
        match hooks.tool_execute_before(request, hook_ctx.clone()).await {
            ToolBeforeOutcome::Proceed(replacement) => input = replacement,
            ToolBeforeOutcome::Block(reason) => {
                return ToolResultMessage::error(
                    call_id,
                    tool_name,
                    format!("tool call blocked: {reason}"),
                );
            }
        }
    }

    // Partial results flow out as ToolExecutionUpdate events; the
    // channel closes when the tool returns.
    let (update_tx, mut update_rx) = mpsc::channel::<ToolUpdate>(16);
    let forward_id = call_id.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(update) = update_rx.recv().await {
            let _ = events
                .send(AgentEvent::ToolExecutionUpdate {
                    tool_call_id: forward_id.clone(),
                    content: convert_content(update.content),
                    details: update.details,
                })
                .await;
        }
    });

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => tiller_tools::ToolResult::err("Operation aborted"),
        result = tool.execute(&call_id, input.clone(), cancel.clone(), update_tx) => result,
    };
    let _ = forwarder.await;

    let mut after = ToolAfterResult {
        content: convert_content(result.content),
        details: result.details,
        is_error: result.is_error,
    };
    if let Some(hooks) = &hooks {
        let request = ToolExecuteRequest {
            tool_call_id: call_id.clone(),
            tool_name: tool_name.clone(),
            input,
        };
        after = hooks
            .tool_execute_after(request, after, hook_ctx)
            .await;
    }

    ToolResultMessage {
        tool_call_id: call_id,
        tool_name,
        content: after.content,
        details: after.details,
        is_error: after.is_error,
        timestamp: tiller_model::monotonic_ms(),
    }
}

fn convert_content(content: Vec<ToolContent>) -> Vec<UserContent> {
    content
        .into_iter()
        .map(|c| match c {
            ToolContent::Text(text) => UserContent::Text { text },
            ToolContent::Image { data, mime_type } => UserContent::Image { data, mime_type },
        })
        .collect()
}
