//! Action Executor: applies one validated decision to the ticket store.

use std::fmt;

use tracing::{info, instrument, warn};

use crate::core::error::{ResolutionFailure, SchemaError};
use crate::core::schema::{ValidatedAction, validate_decision};
use crate::core::types::{Decision, TicketId};
use crate::io::store::TicketStore;

/// Why a decision was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Schema(SchemaError),
    TicketNotFound(TicketId),
}

/// Result of executing one decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created { ticket_id: TicketId },
    Appended { ticket_id: TicketId, modified_count: u64 },
    Rejected(Rejection),
    StoreError { detail: String },
}

impl Outcome {
    /// Success line for applied outcomes; the failure otherwise.
    pub fn into_result(self) -> Result<Applied, ResolutionFailure> {
        match self {
            Self::Created { ticket_id } => Ok(Applied::Created(ticket_id)),
            Self::Appended { ticket_id, .. } => Ok(Applied::Appended(ticket_id)),
            Self::Rejected(Rejection::Schema(err)) => Err(ResolutionFailure::Schema(err)),
            Self::Rejected(Rejection::TicketNotFound(id)) => {
                Err(ResolutionFailure::TicketNotFound(id))
            }
            Self::StoreError { detail } => Err(ResolutionFailure::Store(detail)),
        }
    }
}

/// A mutation that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Created(TicketId),
    Appended(TicketId),
}

impl Applied {
    pub fn ticket_id(&self) -> &TicketId {
        match self {
            Self::Created(id) | Self::Appended(id) => id,
        }
    }
}

impl fmt::Display for Applied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created(id) => write!(f, "Ticket created with ID {id}"),
            Self::Appended(id) => write!(f, "Message appended to ticket {id}"),
        }
    }
}

/// Validate `decision` and issue at most one store mutation.
#[instrument(skip_all, fields(action = decision.action.as_str()))]
pub fn execute<S: TicketStore + ?Sized>(store: &S, decision: &Decision) -> Outcome {
    let action = match validate_decision(decision) {
        Ok(action) => action,
        Err(err) => {
            warn!(%err, "decision rejected by schema");
            return Outcome::Rejected(Rejection::Schema(err));
        }
    };

    match action {
        ValidatedAction::Create(ticket) => match store.create_ticket(ticket) {
            Ok(ticket_id) => {
                info!(%ticket_id, "ticket created");
                Outcome::Created { ticket_id }
            }
            Err(err) => store_error(err),
        },
        ValidatedAction::Update(args) => {
            match store.append_message(&args.ticket_id, &args.message) {
                Ok(0) => {
                    warn!(ticket_id = %args.ticket_id, "update target not found");
                    Outcome::Rejected(Rejection::TicketNotFound(args.ticket_id))
                }
                Ok(modified_count) => {
                    info!(ticket_id = %args.ticket_id, modified_count, "message appended");
                    Outcome::Appended {
                        ticket_id: args.ticket_id,
                        modified_count,
                    }
                }
                Err(err) => store_error(err),
            }
        }
    }
}

fn store_error(err: anyhow::Error) -> Outcome {
    let detail = format!("{err:#}");
    warn!(%detail, "ticket store mutation failed");
    Outcome::StoreError { detail }
}
