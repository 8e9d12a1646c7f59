// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Deterministic scripted transport for tests.
//!
//! Each call to [`ScriptedTransport::stream`] pops the next [`Script`]
//! from the front of the queue and plays it back as a streamed event
//! sequence.  Tests specify exact turns — including tool calls, errors,
//! and streams that never finish — without network access.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;

use crate::{
    accumulator::MessageAccumulator,
    error::TransportError,
    transport::{EventStream, StreamEvent, StreamOptions, Transport, TransportContext},
    types::{AssistantMessage, Cost, StopReason, Usage},
};

/// One scripted tool call.
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum Script {
    /// Text streamed as the given deltas, then a normal stop.
    Text { deltas: Vec<String> },
    /// A thinking block followed by text.
    Thinking { thinking: String, text: String },
    /// Optional text followed by tool calls, stopReason = toolUse.
    ToolUse {
        text: Option<String>,
        calls: Vec<ScriptedCall>,
    },
    /// Text cut short by the output-token limit.
    MaxTokens { deltas: Vec<String> },
    /// The stream starts, then yields an error event.
    StreamError { error: TransportError },
    /// `stream()` itself fails (connection-level error).
    ConnectError { error: TransportError },
    /// Emits the deltas, then never completes.  Pair with cancellation.
    Stall { deltas: Vec<String> },
}

impl Script {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            deltas: vec![text.into()],
        }
    }

    pub fn text_deltas<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Text {
            deltas: deltas.into_iter().map(Into::into).collect(),
        }
    }

    pub fn thinking(thinking: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Thinking {
            thinking: thinking.into(),
            text: text.into(),
        }
    }

    pub fn tool_use(calls: Vec<ScriptedCall>) -> Self {
        Self::ToolUse { text: None, calls }
    }

    pub fn call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> ScriptedCall {
        ScriptedCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn max_tokens(text: impl Into<String>) -> Self {
        Self::MaxTokens {
            deltas: vec![text.into()],
        }
    }

    pub fn stream_error(error: TransportError) -> Self {
        Self::StreamError { error }
    }

    pub fn connect_error(error: TransportError) -> Self {
        Self::ConnectError { error }
    }

    pub fn stall(deltas: Vec<String>) -> Self {
        Self::Stall { deltas }
    }
}

/// A pre-scripted [`Transport`].
pub struct ScriptedTransport {
    scripts: Mutex<Vec<Script>>,
    provider: String,
    model: String,
    /// Every context seen by `stream`/`complete`, in call order.  Tests
    /// inspect this to assert what was actually sent.
    pub requests: Arc<Mutex<Vec<TransportContext>>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self::named("scripted-model", scripts)
    }

    /// A scripted transport reporting the given model name.  Useful for
    /// execution-plan tests that route between a primary and a fallback.
    pub fn named(model: impl Into<String>, scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            provider: "scripted".into(),
            model: model.into(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: transport that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Script::text(reply)])
    }

    /// Convenience: a tool call on turn one, text on turn two.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Script::tool_use(vec![Script::call(tool_id, tool_name, arguments)]),
            Script::text(final_text),
        ])
    }

    /// Number of scripts not yet consumed.
    pub fn remaining(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }

    fn synthetic_usage() -> Usage {
        Usage {
            input: 12,
            output: 4,
            cache_read: 0,
            cache_write: 0,
            total_tokens: 16,
            cost: Cost::default(),
        }
    }

    /// Expand one script into the event sequence it plays back.
    fn events_for(&self, script: &Script) -> (Vec<StreamEvent>, bool) {
        let mut events = vec![StreamEvent::Start];
        let mut stall = false;
        let reason = match script {
            Script::Text { deltas } => {
                push_text(&mut events, 0, deltas);
                StopReason::Stop
            }
            Script::Thinking { thinking, text } => {
                events.push(StreamEvent::ThinkingStart { index: 0 });
                events.push(StreamEvent::ThinkingDelta {
                    index: 0,
                    delta: thinking.clone(),
                });
                events.push(StreamEvent::ThinkingEnd { index: 0 });
                push_text(&mut events, 0, std::slice::from_ref(text));
                StopReason::Stop
            }
            Script::ToolUse { text, calls } => {
                if let Some(t) = text {
                    push_text(&mut events, 0, std::slice::from_ref(t));
                }
                for (i, call) in calls.iter().enumerate() {
                    events.push(StreamEvent::ToolCallStart {
                        index: i,
                        id: call.id.clone(),
                        name: call.name.clone(),
                    });
                    events.push(StreamEvent::ToolCallDelta {
                        index: i,
                        arguments: call.arguments.to_string(),
                    });
                    events.push(StreamEvent::ToolCallEnd { index: i });
                }
                StopReason::ToolUse
            }
            Script::MaxTokens { deltas } => {
                push_text(&mut events, 0, deltas);
                StopReason::MaxTokens
            }
            Script::StreamError { error } => {
                events.push(StreamEvent::Error {
                    error: error.clone(),
                });
                return (events, false);
            }
            Script::ConnectError { .. } => unreachable!("handled before event expansion"),
            Script::Stall { deltas } => {
                push_text_open(&mut events, 0, deltas);
                stall = true;
                return (events, stall);
            }
        };

        // Assemble the Done message the way a real transport would.
        let mut acc = MessageAccumulator::new(&self.provider, &self.model, "scripted");
        for ev in &events {
            acc.apply(ev);
        }
        acc.set_usage(Self::synthetic_usage());
        let message: AssistantMessage = acc.finish(reason);
        events.push(StreamEvent::Done { reason, message });
        (events, stall)
    }
}

fn push_text<S: AsRef<str>>(events: &mut Vec<StreamEvent>, index: usize, deltas: &[S]) {
    push_text_open(events, index, deltas);
    events.push(StreamEvent::TextEnd { index });
}

fn push_text_open<S: AsRef<str>>(events: &mut Vec<StreamEvent>, index: usize, deltas: &[S]) {
    events.push(StreamEvent::TextStart { index });
    for d in deltas {
        events.push(StreamEvent::TextDelta {
            index,
            delta: d.as_ref().to_string(),
        });
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn api(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        ctx: &TransportContext,
        _opts: &StreamOptions,
    ) -> Result<EventStream, TransportError> {
        self.requests.lock().unwrap().push(ctx.clone());

        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                Script::text("[no more scripts]")
            } else {
                scripts.remove(0)
            }
        };

        if let Script::ConnectError { error } = &script {
            return Err(error.clone());
        }

        let (events, stall) = self.events_for(&script);
        let wrapped: Vec<Result<StreamEvent, TransportError>> =
            events.into_iter().map(Ok).collect();
        if stall {
            Ok(Box::pin(stream::iter(wrapped).chain(stream::pending())))
        } else {
            Ok(Box::pin(stream::iter(wrapped)))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
