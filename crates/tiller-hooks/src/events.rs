// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use tiller_model::{Message, UserContent};

/// Every event kind a hook can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEventKind {
    AppStart,
    SessionStart,
    SessionResume,
    SessionClear,
    SessionShutdown,
    SessionBeforeCompact,
    AgentStart,
    AgentEnd,
    TurnStart,
    TurnEnd,
    ChatSystemTransform,
    ChatParams,
    ChatMessage,
    ChatMessagesTransform,
    AuthGet,
    ModelResolve,
    ToolExecuteBefore,
    ToolExecuteAfter,
    AgentBeforeStart,
}

impl HookEventKind {
    /// Dotted event name as it appears in hook manifests and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AppStart => "app.start",
            Self::SessionStart => "session.start",
            Self::SessionResume => "session.resume",
            Self::SessionClear => "session.clear",
            Self::SessionShutdown => "session.shutdown",
            Self::SessionBeforeCompact => "session.before_compact",
            Self::AgentStart => "agent.start",
            Self::AgentEnd => "agent.end",
            Self::TurnStart => "turn.start",
            Self::TurnEnd => "turn.end",
            Self::ChatSystemTransform => "chat.system.transform",
            Self::ChatParams => "chat.params",
            Self::ChatMessage => "chat.message",
            Self::ChatMessagesTransform => "chat.messages.transform",
            Self::AuthGet => "auth.get",
            Self::ModelResolve => "model.resolve",
            Self::ToolExecuteBefore => "tool.execute.before",
            Self::ToolExecuteAfter => "tool.execute.after",
            Self::AgentBeforeStart => "agent.before_start",
        }
    }
}

/// Pure notification events: dispatched to every subscribed hook, no
/// reply.  All handlers run to completion before the emitter returns.
#[derive(Debug, Clone)]
pub enum Notification {
    AppStart,
    SessionStart { session_id: String },
    SessionResume { session_id: String },
    SessionClear,
    SessionShutdown,
    AgentStart,
    AgentEnd { messages: Vec<Message> },
    TurnStart,
    TurnEnd { tool_results: Vec<Message> },
}

impl Notification {
    pub fn kind(&self) -> HookEventKind {
        match self {
            Self::AppStart => HookEventKind::AppStart,
            Self::SessionStart { .. } => HookEventKind::SessionStart,
            Self::SessionResume { .. } => HookEventKind::SessionResume,
            Self::SessionClear => HookEventKind::SessionClear,
            Self::SessionShutdown => HookEventKind::SessionShutdown,
            Self::AgentStart => HookEventKind::AgentStart,
            Self::AgentEnd { .. } => HookEventKind::AgentEnd,
            Self::TurnStart => HookEventKind::TurnStart,
            Self::TurnEnd { .. } => HookEventKind::TurnEnd,
        }
    }
}

/// Sampling parameters hooks may adjust before each model call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChatParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Credential material produced by `auth.get`.
#[derive(Debug, Clone, Default)]
pub struct AuthOutput {
    pub api_key: Option<String>,
    pub headers: Vec<(String, String)>,
}

/// Provider/model pair resolved by `model.resolve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChoice {
    pub provider: String,
    pub model: String,
}

/// A pending tool call as seen by `tool.execute.before` / `.after`.
#[derive(Debug, Clone)]
pub struct ToolExecuteRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
}

/// Gatekeeping decision for one tool call.
#[derive(Debug, Clone)]
pub enum ToolBeforeOutcome {
    /// Run the tool with these (possibly replaced) arguments.
    Proceed(serde_json::Value),
    /// Abort the call; the reason becomes an error tool result.
    Block(String),
}

/// The tool result as hooks see it during `tool.execute.after`.
#[derive(Debug, Clone)]
pub struct ToolAfterResult {
    pub content: Vec<UserContent>,
    pub details: serde_json::Value,
    pub is_error: bool,
}

/// Partial override returned by a `tool.execute.after` handler; unset
/// fields keep the current value.  Later handlers see prior merges.
#[derive(Debug, Clone, Default)]
pub struct ToolResultPatch {
    pub content: Option<Vec<UserContent>>,
    pub details: Option<serde_json::Value>,
    pub is_error: Option<bool>,
}

impl ToolAfterResult {
    pub fn merge(&mut self, patch: ToolResultPatch) {
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(details) = patch.details {
            self.details = details;
        }
        if let Some(is_error) = patch.is_error {
            self.is_error = is_error;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
