// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::bail;

use tiller_model::Transport;

/// Maps a model name from the execution plan onto a concrete transport.
/// Adapters implement this over their provider catalogue; tests use
/// [`TransportMap`].
pub trait TransportResolver: Send + Sync {
    fn resolve(&self, model: &str) -> anyhow::Result<Arc<dyn Transport>>;
}

/// Static name → transport table.
#[derive(Default)]
pub struct TransportMap {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl TransportMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: impl Into<String>, transport: Arc<dyn Transport>) {
        self.transports.insert(model.into(), transport);
    }

    pub fn with(mut self, model: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        self.insert(model, transport);
        self
    }
}

impl TransportResolver for TransportMap {
    fn resolve(&self, model: &str) -> anyhow::Result<Arc<dyn Transport>> {
        match self.transports.get(model) {
            Some(t) => Ok(Arc::clone(t)),
            None => bail!("no transport configured for model `{model}`"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
