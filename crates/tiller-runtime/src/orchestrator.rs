// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tiller_config::Config;
use tiller_core::{Agent, AgentEvent};
use tiller_hooks::{Delivery, HookContext, HookRunner, Notification};
use tiller_model::{monotonic_ms, Message, UserContent, UserMessage};
use tiller_queue::{DeliveryMode, PromptQueue, PromptQueueItem};
use tiller_session::{LoadedSession, SessionManager};
use tiller_tools::ToolRegistry;

use crate::{plan::ExecutionPlan, resolver::TransportResolver};

/// Everything the orchestrator needs to run prompts.
pub struct OrchestratorDeps {
    pub config: Arc<Config>,
    pub resolver: Arc<dyn TransportResolver>,
    pub hooks: Arc<HookRunner>,
    pub sessions: Arc<Mutex<SessionManager>>,
    pub tools: Arc<ToolRegistry>,
    pub system_prompt: String,
    /// A previously loaded session to continue instead of starting
    /// fresh on the first prompt.
    pub resume: Option<LoadedSession>,
}

/// Single long-running consumer of the prompt queue.
///
/// At most one prompt is active at a time; prompts are processed in
/// submission order.  Each one is wrapped in the retry/fallback
/// execution plan, journalled, and its lifecycle reported on the
/// instrumentation target `tiller::orchestrator`.
pub struct SessionOrchestrator {
    queue: Arc<PromptQueue>,
    events: broadcast::Sender<AgentEvent>,
    shutdown: CancellationToken,
    current: Arc<StdMutex<Option<CancellationToken>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionOrchestrator {
    /// Launch the background consumer.
    pub fn start(deps: OrchestratorDeps) -> Arc<Self> {
        let queue = Arc::new(PromptQueue::new());
        let (events, _) = broadcast::channel(256);
        let shutdown = CancellationToken::new();
        let current = Arc::new(StdMutex::new(None));

        let worker = Worker {
            deps,
            queue: Arc::clone(&queue),
            events: events.clone(),
            shutdown: shutdown.clone(),
            current: Arc::clone(&current),
            active: Arc::new(AtomicBool::new(false)),
        };
        let task = tokio::spawn(worker.run());

        Arc::new(Self {
            queue,
            events,
            shutdown,
            current,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn queue(&self) -> &Arc<PromptQueue> {
        &self.queue
    }

    /// Subscribe to the agent-event fan-out.  Delivery is best-effort:
    /// a lagging subscriber misses events rather than blocking the run.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Enqueue a prompt and return immediately.
    pub fn submit_prompt(&self, text: impl Into<String>, mode: DeliveryMode) {
        self.queue.enqueue(PromptQueueItem::new(text, mode));
    }

    /// Enqueue a fully specified item (attachments, beforeStart result).
    pub fn submit(&self, item: PromptQueueItem) {
        self.queue.enqueue(item);
    }

    /// Enqueue a prompt and wait until it settles.
    pub async fn submit_prompt_and_wait(
        &self,
        text: impl Into<String>,
        mode: DeliveryMode,
    ) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        let mut item = PromptQueueItem::new(text, mode);
        item.completion = Some(tx);
        self.queue.enqueue(item);
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(anyhow::anyhow!(message)),
            Err(_) => Err(anyhow::anyhow!("prompt queue drained")),
        }
    }

    /// Abort the prompt currently in flight, if any.  Idempotent.
    pub fn abort_current(&self) {
        if let Some(cancel) = self.current.lock().unwrap().as_ref() {
            cancel.cancel();
        }
    }

    /// Stop the consumer: the in-flight prompt is aborted, queued items
    /// fail with "prompt queue drained".
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.abort_current();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}

/// Backs the hook delivery helpers with the prompt queue.
struct QueueDelivery {
    queue: Arc<PromptQueue>,
    active: Arc<AtomicBool>,
}

impl Delivery for QueueDelivery {
    fn steer(&self, text: &str) {
        self.queue.enqueue(PromptQueueItem::steer(text));
    }

    fn follow_up(&self, text: &str) {
        self.queue.enqueue(PromptQueueItem::follow_up(text));
    }

    fn is_idle(&self) -> bool {
        !self.active.load(Ordering::SeqCst) && self.queue.is_empty()
    }
}

struct Worker {
    deps: OrchestratorDeps,
    queue: Arc<PromptQueue>,
    events: broadcast::Sender<AgentEvent>,
    shutdown: CancellationToken,
    current: Arc<StdMutex<Option<CancellationToken>>>,
    active: Arc<AtomicBool>,
}

impl Worker {
    async fn run(mut self) {
        let mut history: Vec<Message> = Vec::new();

        if let Some(resumed) = self.deps.resume.take() {
            history = resumed.messages.clone();
            {
                let mut sessions = self.deps.sessions.lock().await;
                sessions.continue_session(resumed.path.clone(), resumed.meta.id.clone());
            }
            let ctx = self.hook_context(Some(resumed.meta.id.clone()), CancellationToken::new());
            self.deps
                .hooks
                .notify(
                    Notification::SessionResume {
                        session_id: resumed.meta.id,
                    },
                    ctx,
                )
                .await;
        }

        loop {
            let item = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                item = self.queue.take() => item,
            };
            self.process(item, &mut history).await;
            if self.shutdown.is_cancelled() {
                break;
            }
        }

        // Fail whatever never ran.
        for mut item in self.queue.take_all() {
            if let Some(tx) = item.completion.take() {
                let _ = tx.send(Err("prompt queue drained".into()));
            }
        }

        let session_id = {
            let sessions = self.deps.sessions.lock().await;
            sessions.current_id().map(String::from)
        };
        if let Some(id) = session_id {
            let ctx = self.hook_context(Some(id), CancellationToken::new());
            self.deps
                .hooks
                .notify(Notification::SessionShutdown, ctx)
                .await;
        }
    }

    fn hook_context(&self, session_id: Option<String>, cancel: CancellationToken) -> HookContext {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let mut ctx = HookContext::new(cwd, &self.deps.config.model.name)
            .with_cancel(cancel)
            .with_delivery(Arc::new(QueueDelivery {
                queue: Arc::clone(&self.queue),
                active: Arc::clone(&self.active),
            }));
        if let Some(id) = session_id {
            ctx = ctx.with_session_id(id);
        }
        ctx
    }

    async fn process(&self, mut item: PromptQueueItem, history: &mut Vec<Message>) {
        let completion = item.completion.take();
        self.active.store(true, Ordering::SeqCst);
        info!(target: "tiller::orchestrator", mode = ?item.mode, "prompt:process:start");

        let result = self.process_inner(item, history).await;
        match &result {
            Ok(()) => info!(target: "tiller::orchestrator", "prompt:process:complete"),
            Err(e) => info!(target: "tiller::orchestrator", error = %e, "prompt:process:error"),
        }

        self.active.store(false, Ordering::SeqCst);
        *self.current.lock().unwrap() = None;
        if let Some(tx) = completion {
            let _ = tx.send(result.map_err(|e| e.to_string()));
        }
    }

    async fn process_inner(
        &self,
        item: PromptQueueItem,
        history: &mut Vec<Message>,
    ) -> anyhow::Result<()> {
        let config = &self.deps.config;
        let hooks = &self.deps.hooks;

        // Ensure a session exists; the first prompt creates it.
        let (session_id, first_use) = {
            let mut sessions = self.deps.sessions.lock().await;
            match sessions.current_id() {
                Some(id) => (id.to_string(), false),
                None => {
                    let meta = sessions.start_session(
                        &config.model.provider,
                        &config.model.name,
                        config.model.thinking_level,
                    )?;
                    (meta.id, true)
                }
            }
        };

        let cancel = CancellationToken::new();
        *self.current.lock().unwrap() = Some(cancel.clone());
        let hook_ctx = self.hook_context(Some(session_id.clone()), cancel.clone());

        if first_use {
            hooks
                .notify(Notification::SessionStart { session_id }, hook_ctx.clone())
                .await;
        }

        // agent.before_start — skipped when the adapter already supplied
        // a result with the item.
        if item.before_start.is_none() {
            if let Some(record) = hooks
                .agent_before_start(item.text.clone(), hook_ctx.clone())
                .await
            {
                let message = Message::HookMessage(record);
                self.journal(&message).await;
                history.push(message);
            }
        }

        // chat.message shapes the user parts before journalling.
        let mut parts = hooks
            .chat_message(vec![UserContent::text(&item.text)], hook_ctx.clone())
            .await;
        if parts.is_empty() {
            parts = vec![UserContent::text(&item.text)];
        }
        let user = UserMessage {
            content: parts,
            attachments: item.attachments.clone(),
            timestamp: monotonic_ms(),
        };
        self.journal(&Message::User(user.clone())).await;

        // Build the per-prompt agent over the shared history.
        let transport = self.deps.resolver.resolve(&config.model.name)?;
        let mut agent = Agent::new(
            transport,
            self.deps.system_prompt.clone(),
            Arc::clone(&self.deps.tools),
        )
        .with_hooks(Arc::clone(hooks), hook_ctx)
        .with_cancellation(cancel)
        .with_compaction(config.agent.compaction.clone())
        .with_thinking_level(config.model.thinking_level)
        .with_params(config.model.temperature, config.model.max_tokens);
        agent.seed_messages(history.clone());

        // Steer/follow-up items enqueued while this prompt runs are
        // absorbed into it; their completions settle with the prompt.
        let absorbed: Arc<StdMutex<Vec<oneshot::Sender<Result<(), String>>>>> =
            Arc::new(StdMutex::new(Vec::new()));
        let steer_queue = Arc::clone(&self.queue);
        let steer_absorbed = Arc::clone(&absorbed);
        agent.set_steering_source(move || {
            drain_as_messages(&steer_queue, DeliveryMode::Steer, &steer_absorbed)
        });
        let follow_queue = Arc::clone(&self.queue);
        let follow_absorbed = Arc::clone(&absorbed);
        agent.set_follow_up_source(move || {
            drain_as_messages(&follow_queue, DeliveryMode::FollowUp, &follow_absorbed)
        });

        // Fan events out while the plan runs.
        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
        let fan_out = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let _ = fan_out.send(event);
            }
        });

        let plan = ExecutionPlan::from_config(&config.retry, &config.model.name);
        let run = plan
            .run(&mut agent, self.deps.resolver.as_ref(), user, &tx)
            .await;
        drop(tx);
        let _ = forwarder.await;

        let failure = run.as_ref().err().map(|e| e.to_string());
        for tx in absorbed.lock().unwrap().drain(..) {
            let _ = tx.send(match &failure {
                None => Ok(()),
                Some(message) => Err(message.clone()),
            });
        }

        let added = run?;

        // Journal everything the run added beyond the user message that
        // was written up front.
        {
            let sessions = self.deps.sessions.lock().await;
            for message in added.iter().skip(1) {
                if let Err(e) = sessions.append_message(message) {
                    warn!(error = %e, "journal append failed; continuing");
                }
            }
            if let Some(state) = agent.compaction_state() {
                if let Err(e) = sessions.update_compaction_state(state.clone()) {
                    warn!(error = %e, "persisting compaction state failed");
                }
            }
        }

        *history = agent.snapshot_messages();
        Ok(())
    }

    async fn journal(&self, message: &Message) {
        let sessions = self.deps.sessions.lock().await;
        if let Err(e) = sessions.append_message(message) {
            warn!(error = %e, "journal append failed; continuing");
        }
    }
}

fn drain_as_messages(
    queue: &Arc<PromptQueue>,
    mode: DeliveryMode,
    absorbed: &Arc<StdMutex<Vec<oneshot::Sender<Result<(), String>>>>>,
) -> Vec<UserMessage> {
    queue
        .take_by_mode(mode)
        .into_iter()
        .map(|mut item| {
            if let Some(tx) = item.completion.take() {
                absorbed.lock().unwrap().push(tx);
            }
            UserMessage::text(item.text)
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
