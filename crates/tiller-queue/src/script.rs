// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use crate::DeliveryMode;

/// Serialise queued prompts as newline-separated command lines.
pub fn render_script<'a>(items: impl Iterator<Item = (DeliveryMode, &'a str)>) -> String {
    let mut out = String::new();
    for (mode, text) in items {
        let command = match mode {
            DeliveryMode::Steer => "/steer",
            DeliveryMode::FollowUp => "/followup",
        };
        out.push_str(command);
        if !text.is_empty() {
            out.push(' ');
            out.push_str(text);
        }
        out.push('\n');
    }
    out
}

/// Parse a script back into (mode, text) pairs.  `/follow-up` is accepted
/// as an input alias for `/followup`; anything else is ignored.
pub fn parse_script(text: &str) -> Vec<(DeliveryMode, String)> {
    let mut items = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if let Some(rest) = strip_command(line, "/steer") {
            items.push((DeliveryMode::Steer, rest.to_string()));
        } else if let Some(rest) =
            strip_command(line, "/followup").or_else(|| strip_command(line, "/follow-up"))
        {
            items.push((DeliveryMode::FollowUp, rest.to_string()));
        }
    }
    items
}

/// Match `command` exactly or `command ` followed by the payload.
fn strip_command<'a>(line: &'a str, command: &str) -> Option<&'a str> {
    if line == command {
        return Some("");
    }
    line.strip_prefix(command)
        .and_then(|rest| rest.strip_prefix(' '))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
