// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Lifecycle hooks.
//!
//! Hooks are compiled extensions registered at startup.  Each hook
//! subscribes to a subset of the event kinds in [`HookEventKind`]; the
//! [`HookRunner`] dispatches events on a dedicated serial worker so that
//! handlers for one event always run to completion, in registration
//! order, before the next event is taken.  Handler failures land on an
//! error channel instead of propagating — with the single exception of
//! `tool.execute.before`, which fails closed.

mod context;
mod events;
mod hook;
mod runner;

pub use context::{DeliverAs, Delivery, ExecResult, HookContext, NullDelivery, SessionBridge};
pub use events::{
    AuthOutput, ChatParams, HookEventKind, ModelChoice, Notification, ToolAfterResult,
    ToolBeforeOutcome, ToolExecuteRequest, ToolResultPatch,
};
pub use hook::Hook;
pub use runner::{HookError, HookRunner};
