//! Resolution Loop: routes one message to at most one ticket mutation.
//!
//! The loop is a straight-line state machine:
//! `Start -> ContextBuilt -> OracleInvoked -> Parsed -> Executed -> Done`.
//! Any failure jumps directly to `Done`. Nothing is retried, and at most one
//! store mutation is issued per message.

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::context::ContextBuilder;
use crate::core::error::ResolutionFailure;
use crate::core::types::{ActionAttempt, LoopState, MessageResponse};
use crate::executor::{Applied, execute};
use crate::invoker::{InvokerConfig, OracleInvoker, Transcript};
use crate::io::audit::{AuditRecord, append_record, resolution_id};
use crate::io::config::TriageConfig;
use crate::io::oracle::Oracle;
use crate::io::store::TicketStore;

/// Settings for a [`Resolver`].
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub invoker: InvokerConfig,
    pub max_context_tickets: usize,
    pub description_chars: usize,
    /// Append an audit record per resolution when set.
    pub audit_log_path: Option<PathBuf>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            invoker: InvokerConfig::default(),
            max_context_tickets: 200,
            description_chars: 60,
            audit_log_path: None,
        }
    }
}

impl ResolverConfig {
    pub fn from_config(cfg: &TriageConfig, audit_log_path: PathBuf) -> Self {
        Self {
            invoker: InvokerConfig {
                max_iterations: cfg.oracle.max_iterations,
                timeout: cfg.oracle.timeout(),
                prompt_budget_bytes: cfg.context.prompt_budget_bytes,
            },
            max_context_tickets: cfg.context.max_tickets,
            description_chars: cfg.context.description_chars,
            audit_log_path: cfg.audit.enabled.then_some(audit_log_path),
        }
    }
}

/// Everything known about one finished resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub resolution_id: String,
    pub started_at: DateTime<Utc>,
    pub message: String,
    /// States in visiting order, always ending in `Done`.
    pub states: Vec<LoopState>,
    pub result: Result<Applied, ResolutionFailure>,
    pub attempt: Option<ActionAttempt>,
    pub raw_output: Option<String>,
    pub iterations: u32,
    pub warnings: Vec<String>,
}

impl Resolution {
    /// Uniform caller-facing view.
    pub fn response(&self) -> MessageResponse {
        match &self.result {
            Ok(applied) => MessageResponse::success(applied.to_string()),
            Err(failure) => MessageResponse::error(failure.to_string()),
        }
    }

    fn audit_record(&self, duration_ms: u64) -> AuditRecord {
        let response = self.response();
        AuditRecord {
            resolution_id: self.resolution_id.clone(),
            started_at: self.started_at,
            duration_ms,
            message: self.message.clone(),
            states: self.states.clone(),
            iterations: self.iterations,
            attempt: self.attempt.clone(),
            raw_output: self.raw_output.clone(),
            warnings: self.warnings.clone(),
            status: response.status,
            output: response.output,
            failure: self
                .result
                .as_ref()
                .err()
                .map(|failure| failure.kind().to_string()),
        }
    }
}

/// Visited-state trail; refuses to revisit a state.
#[derive(Debug, Default)]
struct Trail {
    states: Vec<LoopState>,
}

impl Trail {
    fn enter(&mut self, state: LoopState) {
        debug_assert!(!self.states.contains(&state), "state {state:?} revisited");
        debug!(?state, "resolution state");
        self.states.push(state);
    }
}

/// Resolves messages against an injected store and oracle.
pub struct Resolver<'a, S: TicketStore + ?Sized, O: Oracle + ?Sized> {
    store: &'a S,
    oracle: &'a O,
    config: ResolverConfig,
}

impl<'a, S: TicketStore + ?Sized, O: Oracle + ?Sized> Resolver<'a, S, O> {
    pub fn new(store: &'a S, oracle: &'a O, config: ResolverConfig) -> Self {
        Self {
            store,
            oracle,
            config,
        }
    }

    /// Resolve `message` and return the uniform `{status, output}` view.
    pub fn process_message(&self, message: &str) -> MessageResponse {
        self.resolve(message).response()
    }

    /// Run the full loop for one message.
    #[instrument(skip_all, fields(message_len = message.len()))]
    pub fn resolve(&self, message: &str) -> Resolution {
        let clock = Instant::now();
        let started_at = Utc::now();
        let mut trail = Trail::default();
        let mut transcript = Transcript::default();
        let mut resolution = Resolution {
            resolution_id: resolution_id(started_at),
            started_at,
            message: message.to_string(),
            states: Vec::new(),
            result: Err(ResolutionFailure::EmptyMessage),
            attempt: None,
            raw_output: None,
            iterations: 0,
            warnings: Vec::new(),
        };

        let result = self.run(message, &mut trail, &mut transcript, &mut resolution);
        resolution.result = result;
        trail.enter(LoopState::Done);
        resolution.states = trail.states;
        resolution.iterations = transcript.iterations();
        if resolution.raw_output.is_none() {
            resolution.raw_output = transcript.last().map(str::to_string);
        }

        match &resolution.result {
            Ok(applied) => info!(ticket_id = %applied.ticket_id(), "message resolved"),
            Err(failure) => warn!(kind = failure.kind(), %failure, "message not resolved"),
        }
        self.audit(&resolution, clock);
        resolution
    }

    fn run(
        &self,
        message: &str,
        trail: &mut Trail,
        transcript: &mut Transcript,
        resolution: &mut Resolution,
    ) -> Result<Applied, ResolutionFailure> {
        trail.enter(LoopState::Start);
        if message.trim().is_empty() {
            return Err(ResolutionFailure::EmptyMessage);
        }

        let snapshot = ContextBuilder::new(self.store, self.config.max_context_tickets).build();
        resolution.warnings.extend(snapshot.warning.clone());
        let context = snapshot.render(self.config.description_chars);
        trail.enter(LoopState::ContextBuilt);

        let invoked = OracleInvoker::new(self.oracle, self.config.invoker.clone())
            .invoke_recorded(message, &context, transcript)?;
        resolution.attempt = invoked.attempt;
        resolution.raw_output = Some(invoked.output.raw().to_string());
        trail.enter(LoopState::OracleInvoked);

        let decision = invoked.output.decision().map_err(|err| {
            debug!(%err, "oracle output rejected by parser");
            ResolutionFailure::Parse(err)
        })?;
        trail.enter(LoopState::Parsed);

        let outcome = execute(self.store, &decision);
        trail.enter(LoopState::Executed);
        outcome.into_result()
    }

    fn audit(&self, resolution: &Resolution, clock: Instant) {
        let Some(path) = &self.config.audit_log_path else {
            return;
        };
        let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        if let Err(err) = append_record(path, &resolution.audit_record(duration_ms)) {
            warn!(err = %format!("{err:#}"), "failed to append audit record");
        }
    }
}
