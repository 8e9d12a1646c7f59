// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use tiller_model::{Message, ToolResultMessage, UserContent};

/// Events emitted by the agent during one prompt.
///
/// Consumers (the orchestrator, UIs, headless runners) subscribe to these
/// to drive their output; the sequence for one prompt always starts with
/// `AgentStart` and terminates with `AgentEnd`.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// The agent started processing a prompt (or a continue request).
    AgentStart,
    /// A new turn began: one model call plus any tool dispatches.
    TurnStart,
    /// A message entered the conversation.  For assistant messages this
    /// carries the in-progress stub; the final form arrives in
    /// [`AgentEvent::MessageEnd`].
    MessageStart { message: Message },
    /// A streaming delta; `message` is the current in-progress snapshot.
    MessageUpdate { message: Message, delta: String },
    /// The message is final and committed to the context.
    MessageEnd { message: Message },
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    /// A partial result streamed by a running tool.
    ToolExecutionUpdate {
        tool_call_id: String,
        content: Vec<UserContent>,
        details: serde_json::Value,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        result: ToolResultMessage,
        is_error: bool,
    },
    /// The turn finished; `tool_results` is empty when no tools ran.
    TurnEnd {
        message: Message,
        tool_results: Vec<Message>,
    },
    /// The prompt settled; `messages` lists everything added this run.
    AgentEnd { messages: Vec<Message> },
}
