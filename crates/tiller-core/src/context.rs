// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use tiller_model::Message;
use tiller_tools::ToolRegistry;

/// Per-prompt conversation state.  The agent owns this exclusively for
/// the duration of one prompt; messages are appended as the turns
/// progress.
pub struct AgentContext {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Arc<ToolRegistry>,
}

impl AgentContext {
    pub fn new(system_prompt: impl Into<String>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
            tools,
        }
    }

    /// The message list as it would be sent to the model.  Hook messages
    /// are journal-only; a `chat.messages.transform` hook can re-insert
    /// them explicitly.
    pub fn outbound_messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| !matches!(m, Message::HookMessage(_)))
            .cloned()
            .collect()
    }

    /// Tool schemas in wire form.
    pub fn tool_schemas(&self) -> Vec<tiller_model::ToolSchema> {
        self.tools
            .schemas()
            .into_iter()
            .map(|s| tiller_model::ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
