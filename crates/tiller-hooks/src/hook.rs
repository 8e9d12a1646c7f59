// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use tiller_model::{HookMessageRecord, Message, UserContent};

use crate::{
    context::HookContext,
    events::{
        AuthOutput, ChatParams, HookEventKind, ModelChoice, Notification, ToolAfterResult,
        ToolBeforeOutcome, ToolExecuteRequest, ToolResultPatch,
    },
};

/// Trait every hook implements.
///
/// Only the methods for subscribed event kinds are ever called; all have
/// no-op defaults, so a hook implements exactly what it cares about.
/// Handlers receive read-only views except where the return value
/// explicitly replaces outbound data.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Unique name.  Dispatch order is alphabetical by name.
    fn name(&self) -> &str;

    /// Event kinds this hook wants.
    fn subscriptions(&self) -> &[HookEventKind];

    /// All pure notification events.
    async fn on_notification(
        &self,
        _event: &Notification,
        _ctx: &HookContext,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// `chat.system.transform` — return the (possibly rewritten) system
    /// prompt.  Later hooks observe earlier rewrites.
    async fn on_chat_system_transform(
        &self,
        prompt: String,
        _ctx: &HookContext,
    ) -> anyhow::Result<String> {
        Ok(prompt)
    }

    /// `chat.params` — adjust sampling parameters; last writer wins.
    async fn on_chat_params(
        &self,
        params: ChatParams,
        _ctx: &HookContext,
    ) -> anyhow::Result<ChatParams> {
        Ok(params)
    }

    /// `auth.get` — supply or override credential material.
    async fn on_auth_get(&self, auth: AuthOutput, _ctx: &HookContext) -> anyhow::Result<AuthOutput> {
        Ok(auth)
    }

    /// `model.resolve` — substitute the provider/model pair.
    async fn on_model_resolve(
        &self,
        choice: ModelChoice,
        _ctx: &HookContext,
    ) -> anyhow::Result<ModelChoice> {
        Ok(choice)
    }

    /// `chat.messages.transform` — rewrite the outbound message list.
    /// The list is a deep copy of everything that would be sent to the
    /// model, tool results included; the output of one hook is the input
    /// to the next.
    async fn on_chat_messages_transform(
        &self,
        messages: Vec<Message>,
        _ctx: &HookContext,
    ) -> anyhow::Result<Vec<Message>> {
        Ok(messages)
    }

    /// `chat.message` — rewrite the content parts of a user prompt
    /// before it is journalled and sent.
    async fn on_chat_message(
        &self,
        parts: Vec<UserContent>,
        _ctx: &HookContext,
    ) -> anyhow::Result<Vec<UserContent>> {
        Ok(parts)
    }

    /// `tool.execute.before` — gatekeeping.  The first hook that blocks
    /// wins; otherwise the last replaced input wins.  An error here
    /// blocks the call (fail-safe).
    async fn on_tool_execute_before(
        &self,
        _request: &ToolExecuteRequest,
        _ctx: &HookContext,
    ) -> anyhow::Result<Option<ToolBeforeOutcome>> {
        Ok(None)
    }

    /// `tool.execute.after` — patch the tool result; `current` already
    /// reflects earlier hooks' patches.
    async fn on_tool_execute_after(
        &self,
        _request: &ToolExecuteRequest,
        _current: &ToolAfterResult,
        _ctx: &HookContext,
    ) -> anyhow::Result<Option<ToolResultPatch>> {
        Ok(None)
    }

    /// `agent.before_start` — optionally inject a hook message before a
    /// prompt runs.  The first non-None return wins; later hooks still
    /// run for their side effects.
    async fn on_agent_before_start(
        &self,
        _prompt: &str,
        _ctx: &HookContext,
    ) -> anyhow::Result<Option<HookMessageRecord>> {
        Ok(None)
    }

    /// `session.before_compact` — return true to cancel the compaction.
    async fn on_session_before_compact(&self, _ctx: &HookContext) -> anyhow::Result<bool> {
        Ok(false)
    }
}
