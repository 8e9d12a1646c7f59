// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use tiller_model::Usage;

/// Delivery target for `send_user_message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverAs {
    Steer,
    FollowUp,
}

/// Prompt-delivery helpers exposed to hooks.  The runtime backs this
/// with the prompt queue; standalone tests use [`NullDelivery`].
pub trait Delivery: Send + Sync {
    fn steer(&self, text: &str);
    fn follow_up(&self, text: &str);
    fn send_user_message(&self, text: &str, deliver_as: DeliverAs) {
        match deliver_as {
            DeliverAs::Steer => self.steer(text),
            DeliverAs::FollowUp => self.follow_up(text),
        }
    }
    /// True when no prompt is in flight or queued.
    fn is_idle(&self) -> bool;
}

/// No-op delivery for non-interactive contexts.
pub struct NullDelivery;

impl Delivery for NullDelivery {
    fn steer(&self, _text: &str) {}
    fn follow_up(&self, _text: &str) {}
    fn is_idle(&self) -> bool {
        true
    }
}

/// Session-level operations a hook may request.  All methods default to
/// no-ops so adapters implement only what their surface supports.
pub trait SessionBridge: Send + Sync {
    /// Ask the runtime to compact the current conversation.
    fn summarize(&self) {}
    /// Show a transient notification in interactive modes.
    fn toast(&self, _message: &str) {}
    fn token_usage(&self) -> Option<Usage> {
        None
    }
    fn context_limit(&self) -> Option<usize> {
        None
    }
    /// Start a fresh session after the current prompt settles.
    fn new_session(&self) {}
    /// Signal that the hook considers the current task complete.
    fn complete(&self) {}
}

struct NullBridge;

impl SessionBridge for NullBridge {}

/// Result of the process-execution helper.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub killed: bool,
}

/// Context object handed to every hook handler.
#[derive(Clone)]
pub struct HookContext {
    pub cwd: PathBuf,
    pub session_id: Option<String>,
    pub model: String,
    /// Cancellation token of the enclosing turn.  Handlers that honour
    /// it stop promptly when the user aborts.
    pub cancel: CancellationToken,
    bridge: Arc<dyn SessionBridge>,
    delivery: Arc<dyn Delivery>,
}

impl HookContext {
    pub fn new(cwd: PathBuf, model: impl Into<String>) -> Self {
        Self {
            cwd,
            session_id: None,
            model: model.into(),
            cancel: CancellationToken::new(),
            bridge: Arc::new(NullBridge),
            delivery: Arc::new(NullDelivery),
        }
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn SessionBridge>) -> Self {
        self.bridge = bridge;
        self
    }

    pub fn with_delivery(mut self, delivery: Arc<dyn Delivery>) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn bridge(&self) -> &dyn SessionBridge {
        self.bridge.as_ref()
    }

    pub fn delivery(&self) -> &dyn Delivery {
        self.delivery.as_ref()
    }

    /// Run a process in the hook's working directory and capture its
    /// output.  Cancelling the turn kills the child; the result then
    /// reports `killed = true`.
    pub async fn exec(&self, program: &str, args: &[&str]) -> anyhow::Result<ExecResult> {
        let child = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {program}"))?;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Ok(ExecResult {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: -1,
                    killed: true,
                })
            }
            output = child.wait_with_output() => {
                let output = output.with_context(|| format!("waiting for {program}"))?;
                Ok(ExecResult {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code: output.status.code().unwrap_or(-1),
                    killed: false,
                })
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
