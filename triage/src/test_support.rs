//! Test-only doubles for the store and oracle seams.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Utc;

use crate::core::types::{NewTicket, Ticket, TicketId, TicketSummary, TicketType};
use crate::io::config::{TriageConfig, write_config};
use crate::io::init::{InitOptions, TriagePaths, init_triage};
use crate::io::oracle::{Oracle, OracleCallError, OracleRequest};
use crate::io::store::TicketStore;

/// Deterministic task ticket with a fresh id and `<title> description`.
pub fn ticket(title: &str, messages: &[&str]) -> Ticket {
    NewTicket {
        kind: TicketType::Task,
        title: title.to_string(),
        description: format!("{title} description"),
        action: String::new(),
        messages: messages.iter().map(|m| m.to_string()).collect(),
    }
    .into_ticket(TicketId::generate(Utc::now()), Utc::now())
}

#[derive(Debug, Default)]
struct OracleLog {
    prompts: Vec<String>,
    timeouts: Vec<Duration>,
}

/// Oracle that replays scripted completions in order and records each request.
///
/// Once the script runs out, every further call fails.
#[derive(Debug)]
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<String, OracleCallError>>>,
    log: Mutex<OracleLog>,
    delay: Option<Duration>,
}

impl ScriptedOracle {
    pub fn new<I, T>(outputs: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::from_results(outputs.into_iter().map(|output| Ok(output.into())))
    }

    pub fn from_results(results: impl IntoIterator<Item = Result<String, OracleCallError>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            log: Mutex::new(OracleLog::default()),
            delay: None,
        }
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.log.lock().expect("oracle log").prompts.len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.log.lock().expect("oracle log").prompts.clone()
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.log.lock().expect("oracle log").timeouts.clone()
    }
}

impl Oracle for ScriptedOracle {
    fn complete(&self, request: &OracleRequest) -> Result<String, OracleCallError> {
        {
            let mut log = self.log.lock().expect("oracle log");
            log.prompts.push(request.prompt.clone());
            log.timeouts.push(request.timeout);
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.script
            .lock()
            .expect("oracle script")
            .pop_front()
            .unwrap_or_else(|| Err(OracleCallError::Failed("script exhausted".to_string())))
    }
}

/// Store whose every operation fails with `store offline`.
#[derive(Debug, Default)]
pub struct FailingStore;

impl TicketStore for FailingStore {
    fn create_ticket(&self, _ticket: NewTicket) -> Result<TicketId> {
        Err(anyhow!("store offline"))
    }

    fn append_message(&self, _id: &TicketId, _message: &str) -> Result<u64> {
        Err(anyhow!("store offline"))
    }

    fn list_all(&self) -> Result<Vec<Ticket>> {
        Err(anyhow!("store offline"))
    }

    fn list_summaries(&self) -> Result<Vec<TicketSummary>> {
        Err(anyhow!("store offline"))
    }
}

/// Temporary project root with `.triage/` initialized.
pub struct TestWorkspace {
    _dir: tempfile::TempDir,
    pub paths: TriagePaths,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = init_triage(dir.path(), &InitOptions { force: false }).expect("init");
        Self { _dir: dir, paths }
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.paths.config_path.clone()
    }

    /// Rewrite the config through `edit`.
    pub fn configure(&self, edit: impl FnOnce(&mut TriageConfig)) {
        let mut cfg = TriageConfig::default();
        edit(&mut cfg);
        write_config(&self.paths.config_path, &cfg).expect("write config");
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
