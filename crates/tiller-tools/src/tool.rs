// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A single content item in a tool result.
///
/// Most tools produce only `Text`.  Vision-capable tools may mix `Text`
/// and `Image` items.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolContent {
    /// Plain UTF-8 text.
    Text(String),
    /// Base64 payload plus mime type.
    Image { data: String, mime_type: String },
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    /// Typed payload for renderers; opaque to the runtime.
    pub details: Value,
    /// True when the execution failed non-fatally (the message in
    /// `content` describes the error to the model).
    pub is_error: bool,
}

impl ToolResult {
    /// Successful plain-text result.
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text(content.into())],
            details: Value::Null,
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text(msg.into())],
            details: Value::Null,
            is_error: true,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Concatenation of all text items.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text(t) => Some(t.as_str()),
                ToolContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A partial result streamed while a tool is still running.
#[derive(Debug, Clone)]
pub struct ToolUpdate {
    pub content: Vec<ToolContent>,
    pub details: Value,
}

/// Trait every tool must implement.
///
/// `execute` receives the enclosing turn's cancellation token and an
/// update channel for partial results; the channel is dropped when the
/// tool returns.  Long-running tools should watch the token and stop
/// promptly when it fires.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    /// Human-readable label for UI display.
    fn label(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;
    /// Execute the tool.  Errors should be wrapped in [`ToolResult::err`].
    async fn execute(
        &self,
        call_id: &str,
        args: Value,
        cancel: CancellationToken,
        update: mpsc::Sender<ToolUpdate>,
    ) -> ToolResult;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
