// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod loader;
mod schema;

pub use loader::{load, load_from};
pub use schema::{
    AgentConfig, CompactionConfig, Config, FallbackConfig, HooksConfig, ModelConfig, RetryConfig,
    SessionsConfig, ThinkingLevel,
};
