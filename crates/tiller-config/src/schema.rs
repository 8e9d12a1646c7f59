// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be enabled unless the user
/// explicitly disables them need a named function.
fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_retry_on() -> Vec<String> {
    vec![
        "overloaded".into(),
        "rate.?limit".into(),
        "server error".into(),
        "network error".into(),
        "timed out".into(),
    ]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Named model configurations.
    ///
    /// Define alternate endpoints or additional accounts here and reference
    /// them by name — e.g. as the retry fallback model:
    ///
    /// ```yaml
    /// providers:
    ///   fast:
    ///     provider: anthropic
    ///     name: claude-haiku-4-5
    /// retry:
    ///   fallback:
    ///     model: fast
    /// ```
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ModelConfig>,
}

/// Reasoning-effort knob forwarded to the transport.  Opaque to the
/// runtime; providers map it onto their own extended-thinking parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    #[default]
    Off,
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier, e.g. "anthropic" | "openai" | "scripted".
    pub provider: String,
    /// Model name forwarded to the provider API.
    pub name: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid
    /// secrets in version-controlled files.
    pub api_key: Option<String>,
    /// Base URL override for local proxies and compatible servers.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
    #[serde(default)]
    pub thinking_level: ThinkingLevel,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            name: "claude-sonnet-4-5".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: None,
            temperature: None,
            thinking_level: ThinkingLevel::Off,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Full system prompt override.  When unset the caller supplies one.
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub compaction: CompactionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Compact and retry when the provider rejects a request for exceeding
    /// the context window.  Off by default: the error surfaces to the user.
    #[serde(default)]
    pub on_overflow: bool,
    /// Extra instructions appended to the summarisation prompt.
    pub instructions: Option<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            on_overflow: false,
            instructions: None,
        }
    }
}

/// Retry/fallback behaviour for one prompt.  The runtime expands this into
/// an ordered execution plan: the primary model with `max_attempts` and
/// exponential backoff, then the fallback model if one is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Regex patterns matched against the error text; a match means the
    /// error is retryable at the current plan step.
    #[serde(default = "default_retry_on")]
    pub retry_on: Vec<String>,
    pub fallback: Option<FallbackConfig>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            retry_on: default_retry_on(),
            fallback: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Key into `Config::providers`, or a bare model name for the default
    /// provider.
    pub model: String,
    #[serde(default = "default_fallback_attempts")]
    pub max_attempts: u32,
}

fn default_fallback_attempts() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Directory scanned for hook manifests at startup.
    pub dir: Option<PathBuf>,
    /// Dispatch lifecycle events to hooks at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            dir: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Root directory for session journals.  Defaults to
    /// `<config_dir>/tiller/sessions`.
    pub dir: Option<PathBuf>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
