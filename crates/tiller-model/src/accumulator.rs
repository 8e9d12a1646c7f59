// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use tracing::warn;

use crate::{
    transport::StreamEvent,
    types::{monotonic_ms, AssistantContent, AssistantMessage, StopReason, Usage},
};

/// Folds a sequence of [`StreamEvent`]s into an assistant message.
///
/// Content blocks are appended in the order their first event arrives;
/// deltas for different blocks may interleave and are routed by stream
/// index.  Tool-call argument fragments accumulate as text and are parsed
/// on `ToolCallEnd` (or at finish, if the stream was cut short).
pub struct MessageAccumulator {
    provider: String,
    model: String,
    api: String,
    blocks: Vec<AssistantContent>,
    text_at: HashMap<usize, usize>,
    thinking_at: HashMap<usize, usize>,
    tool_at: HashMap<usize, usize>,
    tool_args: HashMap<usize, String>,
    usage: Usage,
}

impl MessageAccumulator {
    pub fn new(provider: &str, model: &str, api: &str) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api: api.into(),
            blocks: Vec::new(),
            text_at: HashMap::new(),
            thinking_at: HashMap::new(),
            tool_at: HashMap::new(),
            tool_args: HashMap::new(),
            usage: Usage::default(),
        }
    }

    pub fn set_usage(&mut self, usage: Usage) {
        self.usage = usage;
    }

    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Start => {}
            StreamEvent::TextStart { index } => {
                self.ensure_text(*index);
            }
            StreamEvent::TextDelta { index, delta } => {
                let pos = self.ensure_text(*index);
                if let AssistantContent::Text { text } = &mut self.blocks[pos] {
                    text.push_str(delta);
                }
            }
            StreamEvent::TextEnd { .. } => {}
            StreamEvent::ThinkingStart { index } => {
                self.ensure_thinking(*index);
            }
            StreamEvent::ThinkingDelta { index, delta } => {
                let pos = self.ensure_thinking(*index);
                if let AssistantContent::Thinking { text } = &mut self.blocks[pos] {
                    text.push_str(delta);
                }
            }
            StreamEvent::ThinkingEnd { .. } => {}
            StreamEvent::ToolCallStart { index, id, name } => {
                let pos = self.blocks.len();
                self.blocks.push(AssistantContent::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: serde_json::Value::Null,
                });
                self.tool_at.insert(*index, pos);
                self.tool_args.insert(*index, String::new());
            }
            StreamEvent::ToolCallDelta { index, arguments } => {
                self.tool_args.entry(*index).or_default().push_str(arguments);
            }
            StreamEvent::ToolCallEnd { index } => {
                self.finish_tool_call(*index);
            }
            StreamEvent::Done { .. } | StreamEvent::Error { .. } => {}
        }
    }

    /// Final message.  Any tool-call buffer that never saw its end event
    /// (aborted stream) is parsed with the same empty-object fallback.
    pub fn finish(mut self, stop_reason: StopReason) -> AssistantMessage {
        let pending: Vec<usize> = self.tool_args.keys().copied().collect();
        for index in pending {
            self.finish_tool_call(index);
        }
        AssistantMessage {
            content: self.blocks,
            stop_reason,
            error_message: None,
            usage: self.usage,
            provider: self.provider,
            model: self.model,
            api: self.api,
            timestamp: monotonic_ms(),
        }
    }

    /// Clone of the in-progress message, used for `message_update` events
    /// while the stream is still running.
    pub fn snapshot(&self, stop_reason: StopReason) -> AssistantMessage {
        AssistantMessage {
            content: self.blocks.clone(),
            stop_reason,
            error_message: None,
            usage: self.usage,
            provider: self.provider.clone(),
            model: self.model.clone(),
            api: self.api.clone(),
            timestamp: monotonic_ms(),
        }
    }

    fn ensure_text(&mut self, index: usize) -> usize {
        if let Some(pos) = self.text_at.get(&index) {
            return *pos;
        }
        let pos = self.blocks.len();
        self.blocks
            .push(AssistantContent::Text { text: String::new() });
        self.text_at.insert(index, pos);
        pos
    }

    fn ensure_thinking(&mut self, index: usize) -> usize {
        if let Some(pos) = self.thinking_at.get(&index) {
            return *pos;
        }
        let pos = self.blocks.len();
        self.blocks.push(AssistantContent::Thinking {
            text: String::new(),
        });
        self.thinking_at.insert(index, pos);
        pos
    }

    /// Parse the accumulated argument text for one call.  Models sometimes
    /// send empty or invalid JSON; substituting `{}` keeps the turn alive
    /// rather than corrupting the history sent back on the next request.
    fn finish_tool_call(&mut self, index: usize) {
        let buf = match self.tool_args.remove(&index) {
            Some(b) => b,
            None => return,
        };
        let Some(&pos) = self.tool_at.get(&index) else {
            return;
        };
        let parsed = if buf.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_str(&buf) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "tool call arguments were not valid JSON; substituting {{}}");
                    serde_json::Value::Object(Default::default())
                }
            }
        };
        if let AssistantContent::ToolCall { arguments, .. } = &mut self.blocks[pos] {
            *arguments = parsed;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_deltas_accumulate() {
        let mut acc = MessageAccumulator::new("p", "m", "a");
        acc.apply(&StreamEvent::TextStart { index: 0 });
        acc.apply(&StreamEvent::TextDelta {
            index: 0,
            delta: "hel".into(),
        });
        acc.apply(&StreamEvent::TextDelta {
            index: 0,
            delta: "lo".into(),
        });
        let msg = acc.finish(StopReason::Stop);
        assert_eq!(msg.text(), "hello");
    }

    #[test]
    fn delta_without_start_creates_block() {
        let mut acc = MessageAccumulator::new("p", "m", "a");
        acc.apply(&StreamEvent::TextDelta {
            index: 0,
            delta: "x".into(),
        });
        assert_eq!(acc.snapshot(StopReason::Stop).text(), "x");
    }

    #[test]
    fn interleaved_tool_calls_routed_by_index() {
        let mut acc = MessageAccumulator::new("p", "m", "a");
        acc.apply(&StreamEvent::ToolCallStart {
            index: 0,
            id: "a".into(),
            name: "read".into(),
        });
        acc.apply(&StreamEvent::ToolCallStart {
            index: 1,
            id: "b".into(),
            name: "write".into(),
        });
        acc.apply(&StreamEvent::ToolCallDelta {
            index: 1,
            arguments: "{\"path\":".into(),
        });
        acc.apply(&StreamEvent::ToolCallDelta {
            index: 0,
            arguments: "{\"path\":\"x\"}".into(),
        });
        acc.apply(&StreamEvent::ToolCallDelta {
            index: 1,
            arguments: "\"y\"}".into(),
        });
        acc.apply(&StreamEvent::ToolCallEnd { index: 0 });
        acc.apply(&StreamEvent::ToolCallEnd { index: 1 });
        let msg = acc.finish(StopReason::ToolUse);
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "a");
        assert_eq!(calls[0].2["path"], "x");
        assert_eq!(calls[1].2["path"], "y");
    }

    #[test]
    fn invalid_tool_arguments_fall_back_to_empty_object() {
        let mut acc = MessageAccumulator::new("p", "m", "a");
        acc.apply(&StreamEvent::ToolCallStart {
            index: 0,
            id: "t".into(),
            name: "shell".into(),
        });
        acc.apply(&StreamEvent::ToolCallDelta {
            index: 0,
            arguments: "{not json".into(),
        });
        acc.apply(&StreamEvent::ToolCallEnd { index: 0 });
        let msg = acc.finish(StopReason::ToolUse);
        assert_eq!(*msg.tool_calls()[0].2, serde_json::json!({}));
    }

    #[test]
    fn finish_parses_unterminated_tool_call() {
        let mut acc = MessageAccumulator::new("p", "m", "a");
        acc.apply(&StreamEvent::ToolCallStart {
            index: 0,
            id: "t".into(),
            name: "shell".into(),
        });
        acc.apply(&StreamEvent::ToolCallDelta {
            index: 0,
            arguments: "{\"command\":\"ls\"}".into(),
        });
        // No ToolCallEnd — the stream was aborted.
        let msg = acc.finish(StopReason::Aborted);
        assert_eq!(msg.tool_calls()[0].2["command"], "ls");
        assert_eq!(msg.stop_reason, StopReason::Aborted);
    }

    #[test]
    fn thinking_and_text_keep_arrival_order() {
        let mut acc = MessageAccumulator::new("p", "m", "a");
        acc.apply(&StreamEvent::ThinkingDelta {
            index: 0,
            delta: "mull".into(),
        });
        acc.apply(&StreamEvent::TextDelta {
            index: 0,
            delta: "answer".into(),
        });
        let msg = acc.finish(StopReason::Stop);
        assert!(matches!(msg.content[0], AssistantContent::Thinking { .. }));
        assert!(matches!(msg.content[1], AssistantContent::Text { .. }));
    }
}
