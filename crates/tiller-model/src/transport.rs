// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use tiller_config::ThinkingLevel;

use crate::{
    accumulator::MessageAccumulator, error::TransportError, types::AssistantMessage,
    types::Message, types::StopReason, types::ToolSchema,
};

/// A single streamed event from the model.
///
/// `index` groups deltas belonging to one content block; providers that
/// interleave parallel tool-call chunks key them by index, others always
/// use 0.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The provider accepted the request and started a message.
    Start,
    TextStart {
        index: usize,
    },
    TextDelta {
        index: usize,
        delta: String,
    },
    TextEnd {
        index: usize,
    },
    ThinkingStart {
        index: usize,
    },
    ThinkingDelta {
        index: usize,
        delta: String,
    },
    ThinkingEnd {
        index: usize,
    },
    ToolCallStart {
        index: usize,
        id: String,
        name: String,
    },
    /// A fragment of the JSON argument text for the call at `index`.
    ToolCallDelta {
        index: usize,
        arguments: String,
    },
    ToolCallEnd {
        index: usize,
    },
    /// The stream finished; `message` is the fully assembled assistant
    /// message (also available from [`MessageAccumulator`]).
    Done {
        reason: StopReason,
        message: AssistantMessage,
    },
    Error {
        error: TransportError,
    },
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, TransportError>> + Send>>;

/// Everything a transport needs to build one completion request.
#[derive(Debug, Clone, Default)]
pub struct TransportContext {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
}

/// Per-call options.  Authentication material stays inside the transport;
/// callers only pass an optional key override.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub api_key: Option<String>,
    /// Extra instructions appended to the system prompt by the transport.
    pub instructions: Option<String>,
    pub headers: Vec<(String, String)>,
    /// Cancelling this token aborts the in-flight request on its next read.
    pub cancel: CancellationToken,
    pub thinking_level: ThinkingLevel,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            instructions: None,
            headers: Vec::new(),
            cancel: CancellationToken::new(),
            thinking_level: ThinkingLevel::Off,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Converts a context into a stream of assistant-message events.
///
/// The stream is single-shot: drive it to completion or cancel it via
/// `StreamOptions::cancel`.  Implementations map provider wire formats
/// onto [`StreamEvent`]; OAuth refresh and auth headers are internal.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Provider identifier for display and journal metadata.
    fn provider(&self) -> &str;

    /// Model identifier as reported to users.
    fn model(&self) -> &str;

    /// Wire API label recorded on assistant messages (e.g. "messages").
    fn api(&self) -> &str {
        "messages"
    }

    async fn stream(
        &self,
        ctx: &TransportContext,
        opts: &StreamOptions,
    ) -> Result<EventStream, TransportError>;

    /// Non-streaming variant used by compaction: drives [`stream`] to
    /// completion and returns the final message.
    async fn complete(
        &self,
        ctx: &TransportContext,
        opts: &StreamOptions,
    ) -> Result<AssistantMessage, TransportError> {
        let mut stream = self.stream(ctx, opts).await?;
        let mut acc = MessageAccumulator::new(self.provider(), self.model(), self.api());
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Done { message, .. } => return Ok(message),
                StreamEvent::Error { error } => return Err(error),
                other => acc.apply(&other),
            }
        }
        Err(TransportError::Protocol(
            "stream ended without a done event".into(),
        ))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
