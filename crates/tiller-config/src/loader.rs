// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Workspace-level config file name, searched upward from the working
/// directory.  The nearest file wins, so a project can override its
/// parent repo's settings.
const WORKSPACE_FILE: &str = ".tiller.yaml";

/// Load configuration.
///
/// An explicit path is exclusive: only that file is parsed, and any
/// problem with it — missing, unreadable, wrong shape — is an error.
/// Without one, two layers are composed: the user file under the
/// platform config directory, then the nearest workspace
/// `.tiller.yaml`, which overrides the user layer field by field.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    load_from(explicit, &cwd)
}

/// As [`load`], with the workspace search rooted at `cwd`.
pub fn load_from(explicit: Option<&Path>, cwd: &Path) -> anyhow::Result<Config> {
    if let Some(path) = explicit {
        let value = read_layer(path)?;
        return serde_yaml::from_value(value)
            .with_context(|| format!("invalid config in {}", path.display()));
    }

    let layers: Vec<PathBuf> = user_file()
        .into_iter()
        .chain(workspace_file(cwd))
        .collect();
    compose(&layers)
}

/// Compose the given files, later ones overriding earlier ones.
/// Missing files are skipped; a file that fails to parse is an error
/// (a silently dropped layer is worse than a loud one).
fn compose(layers: &[PathBuf]) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Null;
    for path in layers {
        if !path.is_file() {
            continue;
        }
        debug!(path = %path.display(), "applying config layer");
        merged = overlay(merged, read_layer(path)?);
    }
    if merged.is_null() {
        return Ok(Config::default());
    }
    serde_yaml::from_value(merged).context("composed configuration has the wrong shape")
}

fn user_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tiller/config.yaml"))
}

/// Nearest workspace file walking up from `start`.
fn workspace_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(WORKSPACE_FILE))
        .find(|candidate| candidate.is_file())
}

fn read_layer(path: &Path) -> anyhow::Result<serde_yaml::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Overlay `over` onto `base`, producing a new value.  Mappings combine
/// key by key, recursing into shared keys; any other kind of node in
/// `over` replaces whatever the base had there.
fn overlay(base: serde_yaml::Value, over: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value::Mapping;
    match (base, over) {
        (Mapping(mut base), Mapping(over)) => {
            for (key, value) in over {
                let combined = match base.remove(&key) {
                    Some(existing) => overlay(existing, value),
                    None => value,
                };
                base.insert(key, combined);
            }
            Mapping(base)
        }
        (_, over) => over,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn overlay_combines_mappings_key_by_key() {
        let out = overlay(yaml("a: 1\nb: 2"), yaml("b: 9\nc: 3"));
        assert_eq!(out["a"].as_i64(), Some(1));
        assert_eq!(out["b"].as_i64(), Some(9));
        assert_eq!(out["c"].as_i64(), Some(3));
    }

    #[test]
    fn overlay_recurses_into_shared_keys() {
        let out = overlay(
            yaml("model:\n  provider: anthropic\n  name: big"),
            yaml("model:\n  name: small"),
        );
        assert_eq!(out["model"]["provider"].as_str(), Some("anthropic"));
        assert_eq!(out["model"]["name"].as_str(), Some("small"));
    }

    #[test]
    fn overlay_scalar_replaces_whole_subtree() {
        let out = overlay(yaml("retry:\n  max_attempts: 5"), yaml("retry: off"));
        assert_eq!(out["retry"].as_str(), Some("off"));
    }

    #[test]
    fn compose_later_layer_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let lower = write_file(tmp.path(), "lower.yaml", "model:\n  provider: scripted\n  name: base\n");
        let upper = write_file(tmp.path(), "upper.yaml", "model:\n  name: override\n");

        let cfg = compose(&[lower, upper]).unwrap();
        assert_eq!(cfg.model.provider, "scripted");
        assert_eq!(cfg.model.name, "override");
    }

    #[test]
    fn compose_skips_missing_files_and_defaults_when_none_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let ghost = tmp.path().join("nope.yaml");
        let cfg = compose(&[ghost]).unwrap();
        assert_eq!(cfg.retry.max_attempts, 2);
    }

    #[test]
    fn compose_rejects_unparseable_layer() {
        let tmp = tempfile::tempdir().unwrap();
        let bad = write_file(tmp.path(), "bad.yaml", "model: [unclosed\n");
        assert!(compose(&[bad]).is_err());
    }

    #[test]
    fn workspace_file_nearest_ancestor_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("repo/sub/crate");
        std::fs::create_dir_all(&nested).unwrap();
        write_file(&tmp.path().join("repo"), WORKSPACE_FILE, "model:\n  name: outer\n");
        write_file(&tmp.path().join("repo/sub"), WORKSPACE_FILE, "model:\n  name: inner\n");

        let found = workspace_file(&nested).unwrap();
        assert!(found.ends_with(Path::new("sub").join(WORKSPACE_FILE)));
    }

    #[test]
    fn explicit_path_is_exclusive_and_strict() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "model:\n  provider: scripted\n  name: pinned").unwrap();
        let cfg = load_from(Some(f.path()), Path::new("/")).unwrap();
        assert_eq!(cfg.model.name, "pinned");

        let missing = Path::new("/tmp/tiller_no_such_config.yaml");
        assert!(load_from(Some(missing), Path::new("/")).is_err());
    }

    #[test]
    fn explicit_file_with_wrong_shape_is_an_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "model: just-a-string").unwrap();
        assert!(load_from(Some(f.path()), Path::new("/")).is_err());
    }
}
