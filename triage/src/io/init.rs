//! Initialization helpers for `.triage/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{TriageConfig, write_config};
use super::store::write_tickets;

/// All canonical paths within `.triage/` for a project root.
#[derive(Debug, Clone)]
pub struct TriagePaths {
    pub root: PathBuf,
    pub triage_dir: PathBuf,
    pub state_dir: PathBuf,
    pub audit_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub tickets_path: PathBuf,
    pub audit_log_path: PathBuf,
}

impl TriagePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let triage_dir = root.join(".triage");
        let state_dir = triage_dir.join("state");
        let audit_dir = triage_dir.join("audit");
        Self {
            root,
            gitignore_path: triage_dir.join(".gitignore"),
            config_path: state_dir.join("config.toml"),
            tickets_path: state_dir.join("tickets.json"),
            audit_log_path: audit_dir.join("resolutions.jsonl"),
            triage_dir,
            state_dir,
            audit_dir,
        }
    }
}

/// Options for `init_triage`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, rewrite the config and `.gitignore`. Existing tickets are kept.
    pub force: bool,
}

/// Create `.triage/` scaffolding in `root`.
///
/// Fails if `.triage/` already exists unless `options.force` is set.
pub fn init_triage(root: &Path, options: &InitOptions) -> Result<TriagePaths> {
    let paths = TriagePaths::new(root);
    if paths.triage_dir.exists() && !paths.triage_dir.is_dir() {
        return Err(anyhow!(
            "triage init: .triage exists but is not a directory"
        ));
    }
    if paths.triage_dir.exists() && !options.force {
        return Err(anyhow!(
            "triage init: .triage already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.triage_dir)?;
    create_dir(&paths.state_dir)?;
    create_dir(&paths.audit_dir)?;

    write_file(&paths.gitignore_path, TRIAGE_GITIGNORE)?;
    write_config(&paths.config_path, &TriageConfig::default())?;
    if !paths.tickets_path.exists() {
        write_tickets(&paths.tickets_path, &[])?;
    }

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const TRIAGE_GITIGNORE: &str = "audit/\n";
