// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
/// Error classes a transport must surface explicitly.
///
/// The variants mirror the failure modes providers report: the agent loop
/// folds any of these into an assistant message with `stopReason = error`,
/// and the execution plan decides whether the class is worth retrying.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("context overflow: {0}")]
    ContextOverflow(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("request aborted")]
    Aborted,
    /// The provider sent something the transport could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Transient errors worth another attempt.  Auth, overflow, and
    /// protocol errors will fail identically on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit(_) | Self::Server(_) | Self::Network(_) | Self::Timeout(_)
        )
    }

    pub fn is_context_overflow(&self) -> bool {
        matches!(self, Self::ContextOverflow(_))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
