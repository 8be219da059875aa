//! Oracle Invoker: one bounded reasoning call per message.
//!
//! Wraps an [`Oracle`] with a prompt, an iteration cap, a wall-clock deadline
//! shared by all iterations, and the single-action rule.

use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::core::budget::remaining_budget;
use crate::core::error::OracleError;
use crate::core::parser::ScannedOutput;
use crate::core::types::ActionAttempt;
use crate::io::oracle::{Oracle, OracleCallError, OracleRequest};
use crate::io::prompt::{PromptBuilder, PromptInputs};

/// Corrective observation appended after an iteration that did not act.
const NO_ACTION_OBSERVATION: &str = "Observation: no action was taken. Reply now with exactly one JSON object: \
{\"tool\": \"CreateTicket\" or \"UpdateTicket\", \"args\": {...}}.";

/// Bounds for one invocation.
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    pub max_iterations: u32,
    pub timeout: Duration,
    pub prompt_budget_bytes: usize,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2,
            timeout: Duration::from_secs(120),
            prompt_budget_bytes: 40_000,
        }
    }
}

/// Successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    /// Final completion, with its JSON fragments already located.
    pub output: ScannedOutput,
    /// The single action the oracle attempted, if it attempted one.
    pub attempt: Option<ActionAttempt>,
    /// Completions used, at least one.
    pub iterations: u32,
}

/// Completions seen during one invocation, kept for the audit log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub completions: Vec<String>,
}

impl Transcript {
    pub fn iterations(&self) -> u32 {
        u32::try_from(self.completions.len()).unwrap_or(u32::MAX)
    }

    pub fn last(&self) -> Option<&str> {
        self.completions.last().map(String::as_str)
    }
}

pub struct OracleInvoker<'a, O: Oracle + ?Sized> {
    oracle: &'a O,
    config: InvokerConfig,
}

impl<'a, O: Oracle + ?Sized> OracleInvoker<'a, O> {
    pub fn new(oracle: &'a O, config: InvokerConfig) -> Self {
        Self { oracle, config }
    }

    pub fn invoke(&self, message: &str, context: &str) -> Result<OracleResult, OracleError> {
        self.invoke_recorded(message, context, &mut Transcript::default())
    }

    /// Like [`Self::invoke`], recording every completion into `transcript`.
    #[instrument(skip_all, fields(max_iterations = self.config.max_iterations, timeout_ms = self.config.timeout.as_millis() as u64))]
    pub fn invoke_recorded(
        &self,
        message: &str,
        context: &str,
        transcript: &mut Transcript,
    ) -> Result<OracleResult, OracleError> {
        let timeout = self.config.timeout;
        let deadline = Instant::now().checked_add(timeout).ok_or_else(|| {
            OracleError::Unavailable(format!("timeout {timeout:?} is out of range"))
        })?;
        let builder = PromptBuilder::new(self.config.prompt_budget_bytes);
        let mut scratchpad = String::new();

        for iteration in 1..=self.config.max_iterations {
            let remaining =
                remaining_budget(deadline).ok_or(OracleError::Timeout { after: timeout })?;
            let prompt = builder
                .build(&PromptInputs {
                    message: message.to_string(),
                    tickets: context.to_string(),
                    scratchpad: (!scratchpad.is_empty()).then(|| scratchpad.clone()),
                })
                .map_err(|err| OracleError::Unavailable(format!("build prompt: {err:#}")))?;

            debug!(iteration, prompt_bytes = prompt.len(), "requesting completion");
            let output = match self.oracle.complete(&OracleRequest {
                prompt,
                timeout: remaining,
            }) {
                Ok(output) => output,
                Err(OracleCallError::TimedOut) => {
                    warn!(iteration, "oracle timed out");
                    return Err(OracleError::Timeout { after: timeout });
                }
                Err(OracleCallError::Failed(detail)) => {
                    warn!(iteration, %detail, "oracle call failed");
                    return Err(OracleError::Unavailable(detail));
                }
            };
            transcript.completions.push(output.clone());
            let output = ScannedOutput::new(output);

            if remaining_budget(deadline).is_none() {
                warn!(iteration, "oracle answered after the deadline");
                return Err(OracleError::Timeout { after: timeout });
            }

            let mut attempts = output.attempts().into_iter();
            match (attempts.next(), attempts.next()) {
                (Some(first), Some(second)) => {
                    warn!(first = %first.tool, second = %second.tool, "oracle attempted multiple actions");
                    return Err(OracleError::MultipleActionsAttempted { first, second });
                }
                (Some(attempt), None) => {
                    info!(iteration, tool = %attempt.tool, "oracle chose an action");
                    return Ok(OracleResult {
                        output,
                        attempt: Some(attempt),
                        iterations: iteration,
                    });
                }
                (None, _) if output.is_unfinished_step() => {
                    debug!(iteration, "oracle is still reasoning, iterating");
                    if !scratchpad.is_empty() {
                        scratchpad.push_str("\n\n");
                    }
                    scratchpad.push_str(output.raw().trim());
                    scratchpad.push('\n');
                    scratchpad.push_str(NO_ACTION_OBSERVATION);
                }
                (None, _) => {
                    debug!(iteration, "final output carries no action attempt");
                    return Ok(OracleResult {
                        output,
                        attempt: None,
                        iterations: iteration,
                    });
                }
            }
        }

        warn!(
            limit = self.config.max_iterations,
            "oracle exhausted its iterations"
        );
        Err(OracleError::IterationLimitExceeded {
            limit: self.config.max_iterations,
        })
    }
}
