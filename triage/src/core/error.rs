//! Failure taxonomy for one resolution.
//!
//! Every variant's `Display` is the single user-visible line reported for that
//! failure kind. None of these errors leave a partially applied mutation behind.

use std::time::Duration;

use thiserror::Error;

use crate::core::types::{ActionAttempt, TicketId};

/// Oracle-supplied arguments that do not satisfy the action contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be {expected}")]
    InvalidType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("`{0}` is not a valid ticket id")]
    InvalidIdFormat(String),
}

/// Failures of the bounded oracle invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("oracle did not choose an action within {limit} iteration(s)")]
    IterationLimitExceeded { limit: u32 },
    #[error("oracle timed out after {after:?}")]
    Timeout { after: Duration },
    #[error(
        "oracle attempted more than one action ({} then {}); nothing was changed",
        .first.tool,
        .second.tool
    )]
    MultipleActionsAttempted {
        first: ActionAttempt,
        second: ActionAttempt,
    },
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

/// Oracle output that cannot be turned into a decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("oracle output contained no well-formed JSON object")]
    NotJson,
    #[error("oracle output has no tool/args shape: {0}")]
    UnrecognizedShape(String),
    #[error("oracle chose unknown action `{0}`")]
    UnknownAction(String),
}

/// Why a resolution ended without a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionFailure {
    #[error("message is empty")]
    EmptyMessage,
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("invalid action arguments: {0}")]
    Schema(#[from] SchemaError),
    #[error("ticket {0} not found")]
    TicketNotFound(TicketId),
    #[error("ticket store error: {0}")]
    Store(String),
}

impl ResolutionFailure {
    /// Stable short label for logs and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyMessage => "empty_message",
            Self::Oracle(_) => "oracle",
            Self::Parse(_) => "parse",
            Self::Schema(_) => "schema",
            Self::TicketNotFound(_) => "ticket_not_found",
            Self::Store(_) => "store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_messages_name_the_cause() {
        let err = ResolutionFailure::from(SchemaError::MissingField("message"));
        assert_eq!(
            err.to_string(),
            "invalid action arguments: missing required field `message`"
        );

        let err = ResolutionFailure::from(OracleError::IterationLimitExceeded { limit: 2 });
        assert_eq!(
            err.to_string(),
            "oracle did not choose an action within 2 iteration(s)"
        );
        assert_eq!(err.kind(), "oracle");
    }

    #[test]
    fn multiple_actions_message_lists_both_tools() {
        let err = OracleError::MultipleActionsAttempted {
            first: ActionAttempt {
                tool: "CreateTicket".to_string(),
                input: "{}".to_string(),
            },
            second: ActionAttempt {
                tool: "UpdateTicket".to_string(),
                input: "{}".to_string(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("CreateTicket then UpdateTicket"));
    }
}
