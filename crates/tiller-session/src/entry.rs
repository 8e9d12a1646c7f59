// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use tiller_config::ThinkingLevel;
use tiller_model::Message;

/// Summary carried forward when a conversation is compacted.  Stored in
/// the session metadata so a resumed session can iterate an
/// "update the previous summary" pass instead of starting over.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionState {
    pub last_summary: String,
    pub read_files: Vec<String>,
    pub modified_files: Vec<String>,
}

/// First line of every session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub id: String,
    pub timestamp: i64,
    pub cwd: String,
    pub provider: String,
    pub model_id: String,
    pub thinking_level: ThinkingLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction: Option<CompactionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forked_from: Option<String>,
}

/// One line of a session file, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEntry {
    Session(SessionMeta),
    Message {
        message: Message,
    },
    #[serde(rename_all = "camelCase")]
    Custom {
        custom_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
