// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::{debug, warn};

use tiller_config::ThinkingLevel;
use tiller_model::{monotonic_ms, Message};

use crate::entry::{CompactionState, SessionEntry, SessionMeta};

/// Encode a working directory into a directory name: strip the outer
/// slashes, replace the rest with `--`, and wrap the result in `--…--`.
/// `/work/project` becomes `--work--project--`.
pub fn encode_cwd(cwd: &Path) -> String {
    let trimmed = cwd
        .to_string_lossy()
        .trim_matches('/')
        .replace('/', "--");
    format!("--{trimmed}--")
}

/// One session file as seen by `list_sessions`.
#[derive(Debug, Clone)]
pub struct SessionDescriptor {
    pub path: PathBuf,
    pub meta: SessionMeta,
}

/// A fully parsed session file.
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub path: PathBuf,
    pub meta: SessionMeta,
    /// Message entries in file order.
    pub messages: Vec<Message>,
    /// Custom entries in file order.
    pub custom: Vec<(String, Option<serde_json::Value>)>,
}

struct Current {
    path: PathBuf,
    id: String,
}

/// Owns the on-disk journal for one working directory.
///
/// All writes go through this manager; other processes must not write to
/// the same files.  Append failures are surfaced as errors so callers can
/// log and continue — a journal problem never kills a turn.
pub struct SessionManager {
    root: PathBuf,
    cwd: PathBuf,
    current: Option<Current>,
}

impl SessionManager {
    /// `root` overrides the default `<config_dir>/tiller/sessions`.
    pub fn new(root: Option<PathBuf>, cwd: PathBuf) -> Self {
        let root = root.unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tiller/sessions")
        });
        Self {
            root,
            cwd,
            current: None,
        }
    }

    /// The cwd-scoped directory all of this manager's sessions live in.
    pub fn dir(&self) -> PathBuf {
        self.root.join(encode_cwd(&self.cwd))
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.id.as_str())
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|c| c.path.as_path())
    }

    /// Create a new session file and write its metadata line.
    pub fn start_session(
        &mut self,
        provider: &str,
        model_id: &str,
        thinking_level: ThinkingLevel,
    ) -> anyhow::Result<SessionMeta> {
        let dir = self.dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating session directory {}", dir.display()))?;

        let id = uuid::Uuid::new_v4().to_string();
        let timestamp = monotonic_ms();
        let ns = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(timestamp * 1_000_000);
        let path = dir.join(format!("{ns}_{id}.jsonl"));

        let meta = SessionMeta {
            id: id.clone(),
            timestamp,
            cwd: self.cwd.to_string_lossy().into_owned(),
            provider: provider.into(),
            model_id: model_id.into(),
            thinking_level,
            compaction: None,
            forked_from: None,
        };

        write_line_new(&path, &SessionEntry::Session(meta.clone()))?;
        debug!(session_id = %id, path = %path.display(), "session started");
        self.current = Some(Current { path, id });
        Ok(meta)
    }

    /// Point the manager at an existing file without writing anything.
    pub fn continue_session(&mut self, path: PathBuf, id: String) {
        self.current = Some(Current { path, id });
    }

    pub fn append_message(&self, message: &Message) -> anyhow::Result<()> {
        self.append(&SessionEntry::Message {
            message: message.clone(),
        })
    }

    pub fn append_entry(
        &self,
        custom_type: &str,
        data: Option<serde_json::Value>,
    ) -> anyhow::Result<()> {
        self.append(&SessionEntry::Custom {
            custom_type: custom_type.into(),
            data,
        })
    }

    fn append(&self, entry: &SessionEntry) -> anyhow::Result<()> {
        let Some(current) = &self.current else {
            bail!("no active session");
        };
        let line = serde_json::to_string(entry).context("serializing session entry")?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&current.path)
            .with_context(|| format!("opening {}", current.path.display()))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        // Durability is best-effort: a failed sync is logged, not fatal.
        if let Err(e) = file.sync_data() {
            warn!(error = %e, "session journal sync failed");
        }
        Ok(())
    }

    /// Session descriptors for this cwd, newest first.
    pub fn list_sessions(&self) -> Vec<SessionDescriptor> {
        let dir = self.dir();
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            match read_meta(&path) {
                Ok(meta) => sessions.push(SessionDescriptor { path, meta }),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable session file")
                }
            }
        }
        sessions.sort_by(|a, b| b.meta.timestamp.cmp(&a.meta.timestamp));
        sessions
    }

    /// Parse a session file.  Malformed lines after the metadata are
    /// skipped; one warning reports how many.
    pub fn load_session(path: &Path) -> anyhow::Result<LoadedSession> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut lines = text.lines();
        let first = lines.next().context("session file is empty")?;
        let meta = match serde_json::from_str::<SessionEntry>(first) {
            Ok(SessionEntry::Session(meta)) => meta,
            Ok(_) => bail!("first line of {} is not session metadata", path.display()),
            Err(e) => bail!("unparseable metadata in {}: {e}", path.display()),
        };

        let mut messages = Vec::new();
        let mut custom = Vec::new();
        let mut malformed = 0usize;
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionEntry>(line) {
                Ok(SessionEntry::Message { message }) => messages.push(message),
                Ok(SessionEntry::Custom { custom_type, data }) => {
                    custom.push((custom_type, data))
                }
                Ok(SessionEntry::Session(_)) => malformed += 1,
                Err(_) => malformed += 1,
            }
        }
        if malformed > 0 {
            warn!(
                path = %path.display(),
                skipped = malformed,
                "skipped malformed session lines"
            );
        }

        Ok(LoadedSession {
            path: path.to_path_buf(),
            meta,
            messages,
            custom,
        })
    }

    /// Load the most recent session for this cwd, if any.
    pub fn load_latest(&self) -> Option<LoadedSession> {
        let desc = self.list_sessions().into_iter().next()?;
        Self::load_session(&desc.path).ok()
    }

    /// Resolve an identifier to a session file: an absolute path, a file
    /// name in this cwd's directory, a full UUID, or a UUID prefix (most
    /// recent match wins).
    pub fn find_session(&self, identifier: &str) -> Option<PathBuf> {
        let as_path = Path::new(identifier);
        if as_path.is_absolute() && as_path.is_file() {
            return Some(as_path.to_path_buf());
        }
        let in_dir = self.dir().join(identifier);
        if in_dir.is_file() {
            return Some(in_dir);
        }
        self.list_sessions()
            .into_iter()
            .find(|d| d.meta.id.starts_with(identifier))
            .map(|d| d.path)
    }

    /// Copy the current session into a new file with a fresh id and a
    /// `forkedFrom` pointer; the manager switches to the fork.
    pub fn fork_session(&mut self) -> anyhow::Result<SessionMeta> {
        let Some(current) = &self.current else {
            bail!("no active session to fork");
        };
        let text = std::fs::read_to_string(&current.path)
            .with_context(|| format!("reading {}", current.path.display()))?;
        let mut lines = text.lines();
        let first = lines.next().context("session file is empty")?;
        let mut meta = match serde_json::from_str::<SessionEntry>(first) {
            Ok(SessionEntry::Session(meta)) => meta,
            _ => bail!("current session has no metadata line"),
        };

        let old_id = meta.id.clone();
        meta.id = uuid::Uuid::new_v4().to_string();
        meta.timestamp = monotonic_ms();
        meta.forked_from = Some(old_id);

        let ns = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(meta.timestamp * 1_000_000);
        let path = self.dir().join(format!("{ns}_{}.jsonl", meta.id));

        let mut out = serde_json::to_string(&SessionEntry::Session(meta.clone()))
            .context("serializing fork metadata")?;
        out.push('\n');
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
        std::fs::write(&path, out)
            .with_context(|| format!("writing fork {}", path.display()))?;

        debug!(session_id = %meta.id, from = %meta.forked_from.as_deref().unwrap_or(""), "session forked");
        self.current = Some(Current {
            path,
            id: meta.id.clone(),
        });
        Ok(meta)
    }

    /// Rewrite line 1 with the compaction payload merged in.  Every other
    /// line is preserved byte-for-byte; the file is replaced atomically.
    pub fn update_compaction_state(&self, state: CompactionState) -> anyhow::Result<()> {
        let Some(current) = &self.current else {
            bail!("no active session");
        };
        let text = std::fs::read_to_string(&current.path)
            .with_context(|| format!("reading {}", current.path.display()))?;
        let mut lines = text.lines();
        let first = lines.next().context("session file is empty")?;
        let mut meta = match serde_json::from_str::<SessionEntry>(first) {
            Ok(SessionEntry::Session(meta)) => meta,
            _ => bail!("current session has no metadata line"),
        };
        meta.compaction = Some(state);

        let mut out = serde_json::to_string(&SessionEntry::Session(meta))
            .context("serializing metadata")?;
        out.push('\n');
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }

        let tmp = current.path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, out).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &current.path)
            .with_context(|| format!("replacing {}", current.path.display()))?;
        Ok(())
    }
}

fn write_line_new(path: &Path, entry: &SessionEntry) -> anyhow::Result<()> {
    let line = serde_json::to_string(entry).context("serializing session entry")?;
    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)
        .with_context(|| format!("creating {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    if let Err(e) = file.sync_data() {
        warn!(error = %e, "session journal sync failed");
    }
    Ok(())
}

fn read_meta(path: &Path) -> anyhow::Result<SessionMeta> {
    use std::io::BufRead;
    let file = std::fs::File::open(path)?;
    let mut first = String::new();
    std::io::BufReader::new(file).read_line(&mut first)?;
    match serde_json::from_str::<SessionEntry>(first.trim_end())? {
        SessionEntry::Session(meta) => Ok(meta),
        _ => bail!("first line is not session metadata"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
