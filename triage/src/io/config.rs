//! Triage configuration stored under `.triage/state/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Triage configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriageConfig {
    pub oracle: OracleConfig,
    pub context: ContextConfig,
    pub audit: AuditConfig,
}

/// Which oracle backend answers completions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    /// Spawn `command`, write the prompt to stdin, read the completion from stdout.
    Command,
    /// Call the Gemini `generateContent` API over HTTPS.
    Gemini,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    pub provider: OracleProvider,

    /// Argv for the command provider (e.g. `["gemini"]`).
    pub command: Vec<String>,

    pub model: String,
    pub base_url: String,

    /// Environment variable holding the Gemini API key.
    pub api_key_env: String,

    pub temperature: f32,

    /// Wall-clock budget for one whole invocation, across iterations.
    pub timeout_secs: u64,

    /// Maximum completions per invocation before giving up.
    pub max_iterations: u32,

    /// Truncate command-oracle stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: OracleProvider::Command,
            command: vec!["gemini".to_string()],
            model: "gemini-2.0-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            temperature: 0.0,
            timeout_secs: 120,
            max_iterations: 2,
            output_limit_bytes: 100_000,
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    /// Most recent tickets included in the oracle context.
    pub max_tickets: usize,
    /// Characters of each description shown to the oracle.
    pub description_chars: usize,
    /// Maximum bytes for the rendered prompt before sections are dropped.
    pub prompt_budget_bytes: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tickets: 200,
            description_chars: 60,
            prompt_budget_bytes: 40_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuditConfig {
    /// Append one JSON line per resolution to `.triage/audit/resolutions.jsonl`.
    pub enabled: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Upper bound for `oracle.timeout_secs` (one day).
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

impl TriageConfig {
    pub fn validate(&self) -> Result<()> {
        let oracle = &self.oracle;
        if oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        if oracle.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(anyhow!(
                "oracle.timeout_secs must be <= {MAX_TIMEOUT_SECS}"
            ));
        }
        if oracle.max_iterations == 0 {
            return Err(anyhow!("oracle.max_iterations must be > 0"));
        }
        if oracle.output_limit_bytes == 0 {
            return Err(anyhow!("oracle.output_limit_bytes must be > 0"));
        }
        if !(0.0..=2.0).contains(&oracle.temperature) {
            return Err(anyhow!("oracle.temperature must be within 0.0..=2.0"));
        }
        match oracle.provider {
            OracleProvider::Command => {
                if oracle.command.is_empty() || oracle.command[0].trim().is_empty() {
                    return Err(anyhow!("oracle.command must be a non-empty array"));
                }
            }
            OracleProvider::Gemini => {
                if oracle.model.trim().is_empty() {
                    return Err(anyhow!("oracle.model must be set for the gemini provider"));
                }
                if oracle.api_key_env.trim().is_empty() {
                    return Err(anyhow!(
                        "oracle.api_key_env must be set for the gemini provider"
                    ));
                }
            }
        }
        if self.context.max_tickets == 0 {
            return Err(anyhow!("context.max_tickets must be > 0"));
        }
        if self.context.description_chars == 0 {
            return Err(anyhow!("context.description_chars must be > 0"));
        }
        if self.context.prompt_budget_bytes == 0 {
            return Err(anyhow!("context.prompt_budget_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TriageConfig::default()`.
pub fn load_config(path: &Path) -> Result<TriageConfig> {
    if !path.exists() {
        let cfg = TriageConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TriageConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &TriageConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
