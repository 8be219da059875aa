//! Shared deterministic types for the resolution core.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O, except for id generation and timestamps which
//! are only produced by stores at creation time.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

static TICKET_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{24}$").expect("ticket id regex"));

/// Store-assigned ticket identifier: 24 lowercase hex characters.
///
/// Layout mirrors a document object id: 4 bytes of big-endian unix seconds
/// followed by 8 random bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    /// Generate a fresh id for a newly created ticket.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let secs = u32::try_from(now.timestamp().max(0)).unwrap_or(u32::MAX);
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        rand::thread_rng().fill(&mut bytes[4..]);
        Self(hex::encode(bytes))
    }

    /// Parse a caller- or oracle-supplied id. Trims whitespace and lowercases.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        TICKET_ID_RE
            .is_match(&normalized)
            .then_some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed ticket classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TicketType {
    Task,
    Reminder,
    FollowUp,
    Other,
}

impl TicketType {
    /// Lenient classification used for oracle-supplied values.
    ///
    /// Unknown labels map to [`TicketType::Other`].
    pub fn from_label(label: &str) -> Self {
        match fold_label(label).as_str() {
            "task" => Self::Task,
            "reminder" => Self::Reminder,
            "followup" => Self::FollowUp,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Reminder => "reminder",
            Self::FollowUp => "follow-up",
            Self::Other => "other",
        }
    }
}

/// Durable unit of work.
///
/// Only `messages` changes after creation, and only by appending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    #[serde(rename = "type")]
    pub kind: TicketType,
    pub title: String,
    pub description: String,
    pub action: String,
    pub messages: Vec<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Validated fields for a ticket that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub kind: TicketType,
    pub title: String,
    pub description: String,
    pub action: String,
    pub messages: Vec<String>,
}

impl NewTicket {
    /// Materialize the ticket with a store-assigned id and creation time.
    pub fn into_ticket(self, id: TicketId, created_at: DateTime<Utc>) -> Ticket {
        Ticket {
            id,
            kind: self.kind,
            title: self.title,
            description: self.description,
            action: self.action,
            messages: self.messages,
            created_at,
        }
    }
}

/// Minimal projection used to build oracle context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSummary {
    pub id: TicketId,
    pub description: String,
}

impl From<&Ticket> for TicketSummary {
    fn from(ticket: &Ticket) -> Self {
        Self {
            id: ticket.id.clone(),
            description: ticket.description.clone(),
        }
    }
}

/// The two actions the oracle may choose between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionName {
    CreateTicket,
    UpdateTicket,
}

impl ActionName {
    pub const ALL: [ActionName; 2] = [ActionName::CreateTicket, ActionName::UpdateTicket];

    /// Match an oracle-supplied tool name, ignoring case and `_`/`-`/space separators.
    pub fn from_tool(name: &str) -> Option<Self> {
        let folded = fold_label(name);
        Self::ALL
            .into_iter()
            .find(|action| fold_label(action.as_str()) == folded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateTicket => "CreateTicket",
            Self::UpdateTicket => "UpdateTicket",
        }
    }
}

/// Lowercase a label and drop separators so near-miss spellings compare equal.
pub fn fold_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// One parsed oracle choice. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: ActionName,
    pub arguments: Map<String, Value>,
}

/// The single action the oracle attempted during one invocation, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionAttempt {
    /// Tool name exactly as the oracle wrote it.
    pub tool: String,
    /// Tool input as compact JSON text.
    pub input: String,
}

/// States of one resolution. Each state is visited at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Start,
    ContextBuilt,
    OracleInvoked,
    Parsed,
    Executed,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

impl ResponseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Caller-facing result of processing one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub status: ResponseStatus,
    pub output: String,
}

impl MessageResponse {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            output: output.into(),
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            output: output.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}
