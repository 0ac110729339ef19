//! Config pack layout and artifact I/O.
//!
//! A config pack is the directory contract between the ops layer and this
//! tool: canon documents plus raw menu inputs go in, `normalized/config.json`
//! and `normalized/report.json` come out. On a failed run the report is still
//! written but the previous config artifact is left untouched, so consumers
//! keep their last known-good configuration.

use crate::canon;
use crate::diagnostics::Diagnostics;
use crate::dsl::EvalContext;
use crate::pipeline::{ExecutionMode, NormalizeInput, NormalizeOutcome, RawOverlay};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const REPORT_SCHEMA_VERSION: u32 = 1;

const NAMED_OVERLAY_ORIGINS: &[&str] = &["platform", "profile", "workspace", "user"];

/// Well-known paths inside one config pack.
pub struct ConfigPackPaths {
    root: PathBuf,
}

impl ConfigPackPaths {
    pub fn new(root: PathBuf) -> Self {
        ConfigPackPaths { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn canon_dir(&self) -> PathBuf {
        self.root.join("canon")
    }

    pub fn base_menu_path(&self) -> PathBuf {
        self.root.join("menu").join("base.json")
    }

    pub fn named_overlay_path(&self, origin: &str) -> PathBuf {
        self.root.join("overlays").join(format!("{origin}.json"))
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.root.join("overlays").join("plugins")
    }

    pub fn extras_dir(&self) -> PathBuf {
        self.root.join("overlays").join("extra")
    }

    pub fn context_path(&self) -> PathBuf {
        self.root.join("context.json")
    }

    pub fn normalized_dir(&self) -> PathBuf {
        self.root.join("normalized")
    }

    pub fn normalized_config_path(&self) -> PathBuf {
        self.normalized_dir().join("config.json")
    }

    pub fn report_path(&self) -> PathBuf {
        self.normalized_dir().join("report.json")
    }
}

/// `context.json` payload: the evaluation context plus the execution mode.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ContextFile {
    #[serde(flatten)]
    context: EvalContext,
    execution_mode: ExecutionMode,
}

/// Assemble the engine input from pack files and CLI options.
pub fn load_input(
    paths: &ConfigPackPaths,
    enforce_sunset: bool,
    today: Option<NaiveDate>,
) -> Result<NormalizeInput> {
    let base_config: Value = read_json(&paths.base_menu_path())?;

    let mut named: Vec<Option<Value>> = Vec::with_capacity(NAMED_OVERLAY_ORIGINS.len());
    for origin in NAMED_OVERLAY_ORIGINS {
        let path = paths.named_overlay_path(origin);
        named.push(if path.is_file() {
            Some(read_json(&path)?)
        } else {
            None
        });
    }

    let plugin_overlays = read_json_dir(&paths.plugins_dir())?;
    let extra_overlays: Vec<RawOverlay> = read_json_dir(&paths.extras_dir())?;

    let context_path = paths.context_path();
    let context_file: ContextFile = if context_path.is_file() {
        read_json(&context_path)?
    } else {
        ContextFile::default()
    };

    let mut named = named.into_iter();
    Ok(NormalizeInput {
        base_config,
        platform_overlay: named.next().flatten(),
        profile_overlay: named.next().flatten(),
        workspace_overlay: named.next().flatten(),
        user_overlay: named.next().flatten(),
        plugin_overlays,
        extra_overlays,
        context: context_file.context,
        execution_mode: context_file.execution_mode,
        enforce_sunset,
        today,
    })
}

/// Machine-readable run summary written next to the config artifact.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NormalizeReport<'a> {
    schema_version: u32,
    generated_at_epoch_ms: u128,
    ok: bool,
    overlay_stack_applied: &'a [String],
    input_fingerprint_sha256: &'a str,
    normalized_hash_sha256: &'a str,
    canon_defaults_used: &'a [String],
    diagnostics: &'a Diagnostics,
}

/// Write the report, and the config artifact when the run succeeded.
pub fn write_artifacts(
    paths: &ConfigPackPaths,
    outcome: &NormalizeOutcome,
    canon_defaults_used: &[String],
) -> Result<()> {
    fs::create_dir_all(paths.normalized_dir()).context("create normalized dir")?;

    let report = NormalizeReport {
        schema_version: REPORT_SCHEMA_VERSION,
        generated_at_epoch_ms: now_epoch_ms()?,
        ok: outcome.ok,
        overlay_stack_applied: &outcome.overlay_stack_applied,
        input_fingerprint_sha256: &outcome.input_fingerprint_sha256,
        normalized_hash_sha256: &outcome.normalized_hash_sha256,
        canon_defaults_used,
        diagnostics: &outcome.diagnostics,
    };
    write_json(&paths.report_path(), &report)?;

    if let Some(config) = &outcome.normalized_config {
        write_json(&paths.normalized_config_path(), config)?;
    }
    Ok(())
}

/// Load the pack's canon documents, defaulting missing files.
pub fn load_canons(paths: &ConfigPackPaths) -> Result<canon::LoadedCanons> {
    canon::load_canons(&paths.canon_dir())
}

pub fn now_epoch_ms() -> Result<u128> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("compute timestamp")?
        .as_millis())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize artifact")?;
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))
}

/// Read every `*.json` file in a directory, sorted by file name so input
/// order is reproducible across hosts.
fn read_json_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    entries.sort();
    entries.iter().map(|path| read_json(path)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_file(path: &Path, value: &Value) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create dirs");
        }
        fs::write(path, serde_json::to_vec_pretty(value).expect("serialize")).expect("write");
    }

    #[test]
    fn loads_a_minimal_pack() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = ConfigPackPaths::new(dir.path().to_path_buf());
        write_file(
            &paths.base_menu_path(),
            &json!({"menuConfigVersion": 1, "menus": []}),
        );
        let input = load_input(&paths, false, None).expect("load input");
        assert!(input.plugin_overlays.is_empty());
        assert_eq!(input.execution_mode, ExecutionMode::Release);
        assert_eq!(input.context.mode, "");
    }

    #[test]
    fn loads_overlays_and_context() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = ConfigPackPaths::new(dir.path().to_path_buf());
        write_file(&paths.base_menu_path(), &json!({"menus": []}));
        write_file(
            &paths.named_overlay_path("user"),
            &json!({"menus": [{"id": "save", "label": "My Save"}]}),
        );
        write_file(
            &paths.plugins_dir().join("b.json"),
            &json!({"pluginId": "b", "menus": []}),
        );
        write_file(
            &paths.plugins_dir().join("a.json"),
            &json!({"pluginId": "a", "menus": []}),
        );
        write_file(
            &paths.context_path(),
            &json!({"mode": "offline", "profile": "pro", "platform": "linux",
                     "stage": "X2", "executionMode": "promotion"}),
        );

        let input = load_input(&paths, false, None).expect("load input");
        assert!(input.user_overlay.is_some());
        assert!(input.platform_overlay.is_none());
        assert_eq!(input.plugin_overlays.len(), 2);
        // Directory reads are name-sorted for reproducibility.
        assert_eq!(input.plugin_overlays[0]["pluginId"], "a");
        assert_eq!(input.execution_mode, ExecutionMode::Promotion);
        assert_eq!(input.context.profile, "pro");
    }

    #[test]
    fn failed_runs_keep_the_previous_config_artifact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = ConfigPackPaths::new(dir.path().to_path_buf());
        let previous = json!({"normalizedShapeVersion": 1});
        write_file(&paths.normalized_config_path(), &previous);

        let outcome = NormalizeOutcome {
            ok: false,
            normalized_config: None,
            diagnostics: Diagnostics::default(),
            overlay_stack_applied: Vec::new(),
            input_fingerprint_sha256: "abc".to_string(),
            normalized_hash_sha256: String::new(),
        };
        write_artifacts(&paths, &outcome, &[]).expect("write artifacts");

        assert!(paths.report_path().is_file());
        let kept: Value =
            serde_json::from_slice(&fs::read(paths.normalized_config_path()).expect("read"))
                .expect("parse");
        assert_eq!(kept, previous);
    }
}
