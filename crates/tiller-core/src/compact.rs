// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeSet;

use anyhow::Context;

use tiller_model::{
    Message, StreamOptions, Transport, TransportContext, UserMessage,
};
use tiller_session::CompactionState;

/// Output-token ceiling for the summarisation call.
pub const COMPACTION_MAX_TOKENS: u32 = 8192;

const SUMMARIZE_PROMPT: &str = "\
Summarise the conversation above in a concise, information-dense way. \
Preserve all technical details, decisions, file names, code snippets, and \
tool outputs that may be relevant to future work. The summary will replace \
the original history to free up context space.";

const UPDATE_PROMPT: &str = "\
Update the previous summary below so that it also covers the conversation \
above. Keep everything from the previous summary that is still relevant; \
fold in new decisions, files, and outcomes. If nothing changed, restate the \
previous summary.";

fn summarization_prompt(
    instructions: Option<&str>,
    previous: Option<&CompactionState>,
) -> String {
    let mut prompt = String::new();
    match previous {
        Some(state) => {
            prompt.push_str(UPDATE_PROMPT);
            prompt.push_str("\n\nPrevious summary:\n");
            prompt.push_str(&state.last_summary);
        }
        None => prompt.push_str(SUMMARIZE_PROMPT),
    }
    if let Some(extra) = instructions {
        prompt.push_str("\n\nAdditional instructions:\n");
        prompt.push_str(extra);
    }
    prompt
}

/// Summarise the conversation into a fresh [`CompactionState`].
///
/// Hook messages never reach the model; the remaining history plus the
/// summarisation request is sent through the transport's non-streaming
/// path with a fixed output budget.
pub async fn compact(
    transport: &dyn Transport,
    messages: &[Message],
    instructions: Option<&str>,
    previous: Option<&CompactionState>,
) -> anyhow::Result<CompactionState> {
    let mut history: Vec<Message> = messages
        .iter()
        .filter(|m| !matches!(m, Message::HookMessage(_)))
        .cloned()
        .collect();
    history.push(Message::user(summarization_prompt(instructions, previous)));

    let ctx = TransportContext {
        system_prompt: String::new(),
        messages: history,
        tools: Vec::new(),
    };
    let options = StreamOptions {
        max_tokens: Some(COMPACTION_MAX_TOKENS),
        ..Default::default()
    };
    let reply = transport
        .complete(&ctx, &options)
        .await
        .context("compaction summarisation call failed")?;

    let summary = reply.text();
    if summary.is_empty() {
        anyhow::bail!("compaction produced an empty summary");
    }

    let (read_files, modified_files) = file_operations(messages);
    Ok(CompactionState {
        last_summary: summary,
        read_files,
        modified_files,
    })
}

/// Extract file-operation sets from the assistant tool calls in
/// `messages`: every `read`/`write`/`edit` call contributes its `path`
/// argument.  Read-only files are those read but never written or
/// edited; both lists come back sorted.
pub fn file_operations(messages: &[Message]) -> (Vec<String>, Vec<String>) {
    let mut read: BTreeSet<String> = BTreeSet::new();
    let mut modified: BTreeSet<String> = BTreeSet::new();
    for message in messages {
        let Message::Assistant(assistant) = message else {
            continue;
        };
        for (_, name, args) in assistant.tool_calls() {
            let Some(path) = args.get("path").and_then(serde_json::Value::as_str) else {
                continue;
            };
            match name {
                "read" => {
                    read.insert(path.to_string());
                }
                "write" | "edit" => {
                    modified.insert(path.to_string());
                }
                _ => {}
            }
        }
    }
    let read_only: Vec<String> = read.difference(&modified).cloned().collect();
    (read_only, modified.into_iter().collect())
}

/// The user message that replaces the compacted history.
pub fn summary_message(state: &CompactionState) -> UserMessage {
    let mut text = String::from(
        "The conversation history before this point was compacted into the following summary:\n",
    );
    text.push_str("<summary>\n");
    text.push_str(&state.last_summary);
    text.push_str("\n\n<read-files>\n");
    for path in &state.read_files {
        text.push_str(path);
        text.push('\n');
    }
    text.push_str("</read-files>\n\n<modified-files>\n");
    for path in &state.modified_files {
        text.push_str(path);
        text.push('\n');
    }
    text.push_str("</modified-files>\n</summary>");
    UserMessage::text(text)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
