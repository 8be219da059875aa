//! Action contract: the two legal actions and their argument shapes.
//!
//! Validation is pure. Oracle arguments arrive as an untyped JSON map and leave
//! as a typed [`ValidatedAction`] or a [`SchemaError`].

use serde_json::{Map, Value};

use crate::core::error::SchemaError;
use crate::core::types::{ActionName, Decision, NewTicket, TicketId, TicketType};

/// Title used when the oracle leaves it out or blank.
pub const UNTITLED: &str = "Untitled";

/// Typed arguments for appending to an existing ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTicketArgs {
    pub ticket_id: TicketId,
    pub message: String,
}

/// A decision whose arguments satisfy the action contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedAction {
    Create(NewTicket),
    Update(UpdateTicketArgs),
}

/// Validate a parsed decision's arguments.
pub fn validate_decision(decision: &Decision) -> Result<ValidatedAction, SchemaError> {
    validate_action(decision.action, &decision.arguments)
}

/// Validate raw arguments for `action`.
pub fn validate_action(
    action: ActionName,
    args: &Map<String, Value>,
) -> Result<ValidatedAction, SchemaError> {
    match action {
        ActionName::CreateTicket => validate_create(args).map(ValidatedAction::Create),
        ActionName::UpdateTicket => validate_update(args).map(ValidatedAction::Update),
    }
}

fn validate_create(args: &Map<String, Value>) -> Result<NewTicket, SchemaError> {
    // Unrecognized or non-string types fall back to `other` rather than failing.
    let kind = match args.get("type") {
        Some(Value::String(label)) => TicketType::from_label(label),
        _ => TicketType::Other,
    };
    let title = optional_string(args, "title")?
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED)
        .to_string();
    let description = optional_string(args, "description")?
        .unwrap_or_default()
        .to_string();
    let action = optional_string(args, "action")?
        .unwrap_or_default()
        .to_string();
    let messages = messages(args)?;

    Ok(NewTicket {
        kind,
        title,
        description,
        action,
        messages,
    })
}

fn validate_update(args: &Map<String, Value>) -> Result<UpdateTicketArgs, SchemaError> {
    let raw_id = required_string(args, "ticket_id")?;
    let ticket_id =
        TicketId::parse(raw_id).ok_or_else(|| SchemaError::InvalidIdFormat(raw_id.to_string()))?;
    let message = required_string(args, "message")?.to_string();
    Ok(UpdateTicketArgs { ticket_id, message })
}

/// `None` when absent or null; error when present with a non-string type.
fn optional_string<'a>(
    args: &'a Map<String, Value>,
    field: &'static str,
) -> Result<Option<&'a str>, SchemaError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(SchemaError::InvalidType {
            field,
            expected: "a string",
        }),
    }
}

/// Blank strings count as missing.
fn required_string<'a>(
    args: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, SchemaError> {
    optional_string(args, field)?
        .filter(|s| !s.trim().is_empty())
        .ok_or(SchemaError::MissingField(field))
}

fn messages(args: &Map<String, Value>) -> Result<Vec<String>, SchemaError> {
    let invalid = SchemaError::InvalidType {
        field: "messages",
        expected: "a list of strings",
    };
    match args.get("messages") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(single)) => Ok(vec![single.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(|| invalid.clone()))
            .collect(),
        Some(_) => Err(invalid),
    }
}
