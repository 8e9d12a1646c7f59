// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Message data model and transport abstraction.
//!
//! Everything that crosses the wire lives here: the tagged [`Message`]
//! tree that is sent to providers and journalled to disk, the
//! [`Transport`] trait that converts a context into a stream of
//! [`StreamEvent`]s, and the deterministic [`ScriptedTransport`] used by
//! tests throughout the workspace.

mod accumulator;
mod error;
pub mod mock;
mod transport;
mod types;

pub use accumulator::MessageAccumulator;
pub use error::TransportError;
pub use mock::{Script, ScriptedTransport};
pub use transport::{EventStream, StreamEvent, StreamOptions, Transport, TransportContext};
pub use types::{
    monotonic_ms, AssistantContent, AssistantMessage, Attachment, Cost, HookMessageRecord,
    Message, StopReason, ToolResultMessage, ToolSchema, Usage, UserContent, UserMessage,
};
