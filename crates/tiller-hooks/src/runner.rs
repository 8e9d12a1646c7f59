// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

use tiller_model::{HookMessageRecord, Message, UserContent};

use crate::{
    context::HookContext,
    events::{
        AuthOutput, ChatParams, HookEventKind, ModelChoice, Notification, ToolAfterResult,
        ToolBeforeOutcome, ToolExecuteRequest,
    },
    hook::Hook,
};

/// A captured handler failure, published on the error channel.
#[derive(Debug, Clone)]
pub struct HookError {
    pub hook: String,
    pub event: HookEventKind,
    pub message: String,
}

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;
type Hooks = Arc<Vec<Arc<dyn Hook>>>;

/// Dispatches lifecycle events to registered hooks.
///
/// A dedicated worker task drains an unbounded job channel in FIFO
/// order; one job corresponds to one event emission, and its handlers
/// run sequentially inside the job.  This gives two guarantees at once:
/// handlers for one event fire in registration order, and two events
/// never interleave their handlers.
pub struct HookRunner {
    hooks: Hooks,
    jobs: mpsc::UnboundedSender<Job>,
    errors: broadcast::Sender<HookError>,
    issues: Vec<String>,
}

impl HookRunner {
    /// Register `hooks` and start the dispatcher.
    ///
    /// Invalid registrations — duplicate names, empty subscription
    /// lists — are skipped and reported through [`issues`]; the runner
    /// always starts.
    pub fn new(hooks: Vec<Arc<dyn Hook>>) -> Self {
        let mut issues = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut accepted: Vec<Arc<dyn Hook>> = Vec::new();
        for hook in hooks {
            if hook.subscriptions().is_empty() {
                issues.push(format!("hook `{}` subscribes to no events", hook.name()));
                continue;
            }
            if !seen.insert(hook.name().to_string()) {
                issues.push(format!("duplicate hook name `{}`", hook.name()));
                continue;
            }
            accepted.push(hook);
        }
        for issue in &issues {
            warn!(issue = %issue, "skipping invalid hook registration");
        }
        // Load order: alphabetical by name.
        accepted.sort_by(|a, b| a.name().cmp(b.name()));

        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });
        let (errors, _) = broadcast::channel(64);

        Self {
            hooks: Arc::new(accepted),
            jobs,
            errors,
            issues,
        }
    }

    /// Validation problems found at registration time.
    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<HookError> {
        self.errors.subscribe()
    }

    /// True when at least one registered hook subscribes to `kind`.
    pub fn has_subscribers(&self, kind: HookEventKind) -> bool {
        self.hooks.iter().any(|h| h.subscriptions().contains(&kind))
    }

    fn subscribed(hooks: &Hooks, kind: HookEventKind) -> Vec<Arc<dyn Hook>> {
        hooks
            .iter()
            .filter(|h| h.subscriptions().contains(&kind))
            .cloned()
            .collect()
    }

    fn report(errors: &broadcast::Sender<HookError>, hook: &str, kind: HookEventKind, e: anyhow::Error) {
        let _ = errors.send(HookError {
            hook: hook.to_string(),
            event: kind,
            message: e.to_string(),
        });
    }

    /// Enqueue one job and wait for the dispatcher to finish it.
    async fn dispatch<T: Send + 'static>(
        &self,
        make: impl FnOnce(Hooks, broadcast::Sender<HookError>) -> Pin<Box<dyn Future<Output = T> + Send>>,
    ) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        let fut = make(self.hooks.clone(), self.errors.clone());
        let job: Job = Box::pin(async move {
            let _ = tx.send(fut.await);
        });
        self.jobs.send(job).ok()?;
        rx.await.ok()
    }

    /// Emit a pure notification; returns once every subscribed handler
    /// has run (or failed).
    pub async fn notify(&self, event: Notification, ctx: HookContext) {
        self.dispatch(move |hooks, errors| {
            Box::pin(async move {
                let kind = event.kind();
                for hook in Self::subscribed(&hooks, kind) {
                    if let Err(e) = hook.on_notification(&event, &ctx).await {
                        Self::report(&errors, hook.name(), kind, e);
                    }
                }
            })
        })
        .await;
    }

    /// `chat.system.transform`: each handler receives the current prompt;
    /// the last rewrite wins.  A dispatcher failure degrades to "hooks
    /// skipped" — the caller's prompt passes through unchanged.
    pub async fn chat_system_transform(&self, prompt: String, ctx: HookContext) -> String {
        let fallback = prompt.clone();
        self.dispatch(move |hooks, errors| {
            Box::pin(async move {
                let kind = HookEventKind::ChatSystemTransform;
                let mut current = prompt;
                for hook in Self::subscribed(&hooks, kind) {
                    match hook.on_chat_system_transform(current.clone(), &ctx).await {
                        Ok(next) => current = next,
                        Err(e) => Self::report(&errors, hook.name(), kind, e),
                    }
                }
                current
            })
        })
        .await
        .unwrap_or(fallback)
    }

    pub async fn chat_params(&self, params: ChatParams, ctx: HookContext) -> ChatParams {
        self.dispatch(move |hooks, errors| {
            Box::pin(async move {
                let kind = HookEventKind::ChatParams;
                let mut current = params;
                for hook in Self::subscribed(&hooks, kind) {
                    match hook.on_chat_params(current, &ctx).await {
                        Ok(next) => current = next,
                        Err(e) => Self::report(&errors, hook.name(), kind, e),
                    }
                }
                current
            })
        })
        .await
        .unwrap_or(params)
    }

    pub async fn auth_get(&self, ctx: HookContext) -> AuthOutput {
        self.dispatch(move |hooks, errors| {
            Box::pin(async move {
                let kind = HookEventKind::AuthGet;
                let mut current = AuthOutput::default();
                for hook in Self::subscribed(&hooks, kind) {
                    match hook.on_auth_get(current.clone(), &ctx).await {
                        Ok(next) => current = next,
                        Err(e) => Self::report(&errors, hook.name(), kind, e),
                    }
                }
                current
            })
        })
        .await
        // There is no caller-supplied input to preserve here; an empty
        // AuthOutput means "no hook-provided credentials".
        .unwrap_or_else(AuthOutput::default)
    }

    pub async fn model_resolve(&self, choice: ModelChoice, ctx: HookContext) -> ModelChoice {
        let fallback = choice.clone();
        self.dispatch(move |hooks, errors| {
            Box::pin(async move {
                let kind = HookEventKind::ModelResolve;
                let mut current = choice;
                for hook in Self::subscribed(&hooks, kind) {
                    match hook.on_model_resolve(current.clone(), &ctx).await {
                        Ok(next) => current = next,
                        Err(e) => Self::report(&errors, hook.name(), kind, e),
                    }
                }
                current
            })
        })
        .await
        .unwrap_or(fallback)
    }

    /// `chat.messages.transform`: pipeline over a deep copy of the
    /// outbound message list.  On dispatcher failure the original list
    /// is returned — never an empty one.
    pub async fn chat_messages_transform(
        &self,
        messages: Vec<Message>,
        ctx: HookContext,
    ) -> Vec<Message> {
        let fallback = messages.clone();
        self.dispatch(move |hooks, errors| {
            Box::pin(async move {
                let kind = HookEventKind::ChatMessagesTransform;
                let mut current = messages;
                for hook in Self::subscribed(&hooks, kind) {
                    match hook.on_chat_messages_transform(current.clone(), &ctx).await {
                        Ok(next) => current = next,
                        Err(e) => Self::report(&errors, hook.name(), kind, e),
                    }
                }
                current
            })
        })
        .await
        .unwrap_or(fallback)
    }

    /// `chat.message`: pipeline over the parts of one user prompt.  On
    /// dispatcher failure the original parts are returned.
    pub async fn chat_message(
        &self,
        parts: Vec<UserContent>,
        ctx: HookContext,
    ) -> Vec<UserContent> {
        let fallback = parts.clone();
        self.dispatch(move |hooks, errors| {
            Box::pin(async move {
                let kind = HookEventKind::ChatMessage;
                let mut current = parts;
                for hook in Self::subscribed(&hooks, kind) {
                    match hook.on_chat_message(current.clone(), &ctx).await {
                        Ok(next) => current = next,
                        Err(e) => Self::report(&errors, hook.name(), kind, e),
                    }
                }
                current
            })
        })
        .await
        .unwrap_or(fallback)
    }

    /// `tool.execute.before`: the first block wins; otherwise the last
    /// replaced input wins.  A handler error blocks the call (fail-safe)
    /// in addition to landing on the error channel.
    pub async fn tool_execute_before(
        &self,
        request: ToolExecuteRequest,
        ctx: HookContext,
    ) -> ToolBeforeOutcome {
        let fallback_input = request.input.clone();
        self.dispatch(move |hooks, errors| {
            Box::pin(async move {
                let kind = HookEventKind::ToolExecuteBefore;
                let mut input = request.input.clone();
                for hook in Self::subscribed(&hooks, kind) {
                    match hook.on_tool_execute_before(&request, &ctx).await {
                        Ok(None) => {}
                        Ok(Some(ToolBeforeOutcome::Proceed(replacement))) => input = replacement,
                        Ok(Some(ToolBeforeOutcome::Block(reason))) => {
                            return ToolBeforeOutcome::Block(reason);
                        }
                        Err(e) => {
                            let reason =
                                format!("hook `{}` failed: {e}", hook.name());
                            Self::report(&errors, hook.name(), kind, e);
                            return ToolBeforeOutcome::Block(reason);
                        }
                    }
                }
                ToolBeforeOutcome::Proceed(input)
            })
        })
        .await
        .unwrap_or(ToolBeforeOutcome::Proceed(fallback_input))
    }

    /// `tool.execute.after`: merge each handler's patch; later handlers
    /// see prior merges.
    pub async fn tool_execute_after(
        &self,
        request: ToolExecuteRequest,
        result: ToolAfterResult,
        ctx: HookContext,
    ) -> ToolAfterResult {
        let fallback = result.clone();
        self.dispatch(move |hooks, errors| {
            Box::pin(async move {
                let kind = HookEventKind::ToolExecuteAfter;
                let mut current = result;
                for hook in Self::subscribed(&hooks, kind) {
                    match hook.on_tool_execute_after(&request, &current, &ctx).await {
                        Ok(Some(patch)) => current.merge(patch),
                        Ok(None) => {}
                        Err(e) => Self::report(&errors, hook.name(), kind, e),
                    }
                }
                current
            })
        })
        .await
        .unwrap_or(fallback)
    }

    /// `agent.before_start`: the first injected message wins, but every
    /// subscribed handler still runs for its side effects.
    pub async fn agent_before_start(
        &self,
        prompt: String,
        ctx: HookContext,
    ) -> Option<HookMessageRecord> {
        self.dispatch(move |hooks, errors| {
            Box::pin(async move {
                let kind = HookEventKind::AgentBeforeStart;
                let mut winner: Option<HookMessageRecord> = None;
                for hook in Self::subscribed(&hooks, kind) {
                    match hook.on_agent_before_start(&prompt, &ctx).await {
                        Ok(Some(message)) if winner.is_none() => winner = Some(message),
                        Ok(_) => {}
                        Err(e) => Self::report(&errors, hook.name(), kind, e),
                    }
                }
                winner
            })
        })
        .await
        .flatten()
    }

    /// `session.before_compact`: any handler may cancel the compaction.
    pub async fn session_before_compact(&self, ctx: HookContext) -> bool {
        self.dispatch(move |hooks, errors| {
            Box::pin(async move {
                let kind = HookEventKind::SessionBeforeCompact;
                let mut cancel = false;
                for hook in Self::subscribed(&hooks, kind) {
                    match hook.on_session_before_compact(&ctx).await {
                        Ok(c) => cancel = cancel || c,
                        Err(e) => Self::report(&errors, hook.name(), kind, e),
                    }
                }
                cancel
            })
        })
        .await
        .unwrap_or(false)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
