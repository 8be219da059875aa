//! Decision parsing for raw oracle output.
//!
//! Oracle text is untrusted. The parser locates top-level JSON objects embedded
//! in prose, normalizes near-miss envelope shapes (alias keys, string-encoded
//! arguments, ReAct `Action:` directives) and only then maps the chosen tool to
//! an [`ActionName`]. Fragments are located once per completion in
//! [`ScannedOutput`], which serves both the invoker's single-action rule and
//! the final decision.

use std::sync::LazyLock;

use jsonschema::Validator;
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::core::error::ParseError;
use crate::core::types::{ActionAttempt, ActionName, Decision, fold_label};

const DECISION_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/decision.schema.json"
));

/// Keys accepted for the argument object, in priority order.
const ARG_KEYS: [&str; 4] = ["args", "arguments", "action_input", "input"];
/// Alias keys for the tool name. `tool` itself is always authoritative.
const TOOL_ALIASES: [&str; 2] = ["action", "name"];

static DECISION_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(DECISION_SCHEMA).expect("decision schema json");
    jsonschema::validator_for(&schema).expect("decision schema should compile")
});

static THOUGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^[ \t>*]*Thought[ \t]*:").unwrap());

static FINAL_ANSWER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^[ \t>*]*Final[ \t]+Answer[ \t]*:").unwrap());

static ACTION_DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t>*`]*Action[ \t]*:[ \t]*`?([A-Za-z][A-Za-z0-9_ -]*?)`?[ \t]*$").unwrap()
});

/// A well-formed JSON object found in raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct JsonFragment {
    start: usize,
    end: usize,
    object: Map<String, Value>,
}

/// Tool name plus argument object, after near-miss normalization.
#[derive(Debug, Clone, PartialEq)]
struct Envelope {
    tool: String,
    args: Map<String, Value>,
}

/// Oracle output with its top-level JSON fragments located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedOutput {
    raw: String,
    fragments: Vec<JsonFragment>,
}

impl ScannedOutput {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let fragments = json_fragments(&raw);
        Self { raw, fragments }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The oracle's final decision.
    ///
    /// Only the last well-formed JSON object counts; earlier fragments are
    /// treated as reasoning.
    pub fn decision(&self) -> Result<Decision, ParseError> {
        let last_idx = self.fragments.len().checked_sub(1).ok_or(ParseError::NotJson)?;
        let envelope = self
            .envelope(last_idx)
            .map_err(ParseError::UnrecognizedShape)?;
        check_envelope_schema(&envelope)?;
        let action = ActionName::from_tool(&envelope.tool)
            .ok_or_else(|| ParseError::UnknownAction(envelope.tool.clone()))?;
        Ok(Decision {
            action,
            arguments: envelope.args,
        })
    }

    /// Distinct actions the oracle attempted, in order of appearance.
    ///
    /// An attempt is either a tool call under a ReAct `Action:` directive or
    /// the envelope in the last fragment, which is the final answer. Envelopes
    /// quoted earlier in prose are reasoning, not attempts. Repeats of the same
    /// tool with equal arguments collapse to one attempt.
    pub fn attempts(&self) -> Vec<ActionAttempt> {
        let last_idx = self.fragments.len().checked_sub(1);
        let mut seen: Vec<(String, Map<String, Value>)> = Vec::new();
        let mut attempts = Vec::new();

        for idx in 0..self.fragments.len() {
            let directed = last_directive(self.lead_in(idx)).is_some();
            if !directed && Some(idx) != last_idx {
                continue;
            }
            let Ok(envelope) = self.envelope(idx) else {
                continue;
            };
            let key = (fold_label(&envelope.tool), envelope.args.clone());
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            attempts.push(ActionAttempt {
                input: Value::Object(envelope.args).to_string(),
                tool: envelope.tool,
            });
        }

        attempts
    }

    /// True when the output is a ReAct step that reasoned without acting yet.
    ///
    /// Such output has a `Thought:` line, no action attempt and no `Final Answer:`.
    pub fn is_unfinished_step(&self) -> bool {
        THOUGHT_RE.is_match(&self.raw)
            && !FINAL_ANSWER_RE.is_match(&self.raw)
            && self.attempts().is_empty()
    }

    fn envelope(&self, idx: usize) -> Result<Envelope, String> {
        normalize(&self.fragments[idx].object, self.lead_in(idx))
    }

    /// Text between the previous fragment (or start of output) and fragment `idx`.
    fn lead_in(&self, idx: usize) -> &str {
        let from = idx
            .checked_sub(1)
            .map(|prev| self.fragments[prev].end)
            .unwrap_or(0);
        &self.raw[from..self.fragments[idx].start]
    }
}

/// Parse the oracle's final decision from raw output.
pub fn parse_decision(raw: &str) -> Result<Decision, ParseError> {
    ScannedOutput::new(raw).decision()
}

fn normalize(object: &Map<String, Value>, lead_in: &str) -> Result<Envelope, String> {
    if let Some(tool) = object.get("tool") {
        let Value::String(tool) = tool else {
            return Err("`tool` must be a string".to_string());
        };
        return Ok(Envelope {
            tool: tool.trim().to_string(),
            args: arguments(object, "tool")?,
        });
    }

    // Alias keys collide with argument fields (CreateTicket has an `action`
    // field), so they only count when the object clearly is an envelope.
    for alias in TOOL_ALIASES {
        if let Some(Value::String(tool)) = object.get(alias) {
            let has_args = ARG_KEYS.iter().any(|key| object.contains_key(*key));
            if has_args || ActionName::from_tool(tool).is_some() {
                return Ok(Envelope {
                    tool: tool.trim().to_string(),
                    args: arguments(object, alias)?,
                });
            }
        }
    }

    if let Some(tool) = last_directive(lead_in) {
        return Ok(Envelope {
            tool,
            args: object.clone(),
        });
    }

    Err("expected an object with `tool` and `args`".to_string())
}

/// Resolve the argument object of an envelope whose tool lives under `tool_key`.
///
/// Without an explicit argument key, the remaining fields are the arguments.
fn arguments(object: &Map<String, Value>, tool_key: &str) -> Result<Map<String, Value>, String> {
    let Some((key, value)) = ARG_KEYS
        .iter()
        .find_map(|key| object.get(*key).map(|value| (*key, value)))
    else {
        let mut flat = object.clone();
        flat.remove(tool_key);
        return Ok(flat);
    };

    match value {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(format!("`{key}` is a string but not a JSON object")),
        },
        _ => Err(format!("`{key}` must be an object")),
    }
}

fn last_directive(lead_in: &str) -> Option<String> {
    ACTION_DIRECTIVE_RE
        .captures_iter(lead_in)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}

fn check_envelope_schema(envelope: &Envelope) -> Result<(), ParseError> {
    let instance = json!({
        "tool": envelope.tool,
        "args": Value::Object(envelope.args.clone()),
    });
    if DECISION_VALIDATOR.is_valid(&instance) {
        return Ok(());
    }
    let messages = DECISION_VALIDATOR
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(ParseError::UnrecognizedShape(messages.join("; ")))
}

/// Find top-level JSON objects in `raw` that parse cleanly.
///
/// Each `{` is tried as the start of one streamed JSON value. A failed
/// candidate stops at its first syntax error, so broken text is skipped
/// cheaply and a well-formed object nested inside it is still found.
fn json_fragments(raw: &str) -> Vec<JsonFragment> {
    let mut fragments = Vec::new();
    let mut pos = 0;

    while let Some(offset) = raw[pos..].find('{') {
        let start = pos + offset;
        let mut stream = serde_json::Deserializer::from_str(&raw[start..])
            .into_iter::<Map<String, Value>>();
        match stream.next() {
            Some(Ok(object)) => {
                let end = start + stream.byte_offset();
                fragments.push(JsonFragment { start, end, object });
                pos = end;
            }
            _ => pos = start + 1,
        }
    }

    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempts(raw: &str) -> Vec<ActionAttempt> {
        ScannedOutput::new(raw).attempts()
    }

    fn unfinished(raw: &str) -> bool {
        ScannedOutput::new(raw).is_unfinished_step()
    }

    #[test]
    fn detects_unfinished_react_step() {
        assert!(unfinished(
            "Thought: I should check the existing tickets first."
        ));
        assert!(!unfinished("Thought: done.\nFinal Answer: nothing to do"));
        assert!(!unfinished(
            "Thought: create it\nAction: CreateTicket\nAction Input: {\"title\": \"x\"}"
        ));
        assert!(!unfinished("I cannot help with that."));
    }

    #[test]
    fn parses_bare_envelope() {
        let decision = parse_decision(
            r#"{"tool": "CreateTicket", "args": {"type": "task", "title": "Q4 deck"}}"#,
        )
        .expect("decision");
        assert_eq!(decision.action, ActionName::CreateTicket);
        assert_eq!(decision.arguments["title"], "Q4 deck");
    }

    #[test]
    fn finds_envelope_wrapped_in_prose_and_fences() {
        let raw = "Thought: this is new work.\n```json\n{\"tool\": \"CreateTicket\", \"args\": {\"title\": \"Use {braces} in strings\"}}\n```\nDone.";
        let decision = parse_decision(raw).expect("decision");
        assert_eq!(decision.arguments["title"], "Use {braces} in strings");
    }

    #[test]
    fn last_well_formed_object_wins() {
        let raw = r#"First idea: {"tool": "CreateTicket", "args": {"title": "draft"}}
Actually it is an update: {"tool": "UpdateTicket", "args": {"ticket_id": "66f1a2b3c4d5e6f708091a2b", "message": "done"}}
trailing junk {"tool": "#;
        let decision = parse_decision(raw).expect("decision");
        assert_eq!(decision.action, ActionName::UpdateTicket);
    }

    #[test]
    fn accepts_alias_keys_and_string_encoded_args() {
        let raw = r#"{"action": "update_ticket", "action_input": "{\"ticket_id\": \"66f1a2b3c4d5e6f708091a2b\", \"message\": \"hi\"}"}"#;
        let decision = parse_decision(raw).expect("decision");
        assert_eq!(decision.action, ActionName::UpdateTicket);
        assert_eq!(decision.arguments["message"], "hi");
    }

    #[test]
    fn accepts_flat_envelope_without_args_key() {
        let decision =
            parse_decision(r#"{"tool": "CreateTicket", "title": "flat", "type": "task"}"#)
                .expect("decision");
        assert_eq!(decision.arguments["title"], "flat");
        assert!(!decision.arguments.contains_key("tool"));
    }

    #[test]
    fn accepts_react_directive_with_bare_arguments() {
        let raw = "Thought: new reminder\nAction: CreateTicket\nAction Input: {\"type\": \"reminder\", \"action\": \"Schedule backup\"}";
        let decision = parse_decision(raw).expect("decision");
        assert_eq!(decision.action, ActionName::CreateTicket);
        assert_eq!(decision.arguments["action"], "Schedule backup");
    }

    #[test]
    fn rejects_non_json_output() {
        assert_eq!(
            parse_decision("I think you should create a ticket."),
            Err(ParseError::NotJson)
        );
        assert_eq!(
            parse_decision("{\"tool\": \"CreateTicket\", "),
            Err(ParseError::NotJson)
        );
    }

    #[test]
    fn rejects_object_without_tool_shape() {
        let err = parse_decision(r#"{"answer": 42}"#).unwrap_err();
        assert!(matches!(err, ParseError::UnrecognizedShape(_)));
    }

    #[test]
    fn rejects_non_object_args() {
        let err = parse_decision(r#"{"tool": "CreateTicket", "args": [1, 2]}"#).unwrap_err();
        assert!(matches!(err, ParseError::UnrecognizedShape(_)));
    }

    #[test]
    fn rejects_empty_tool_name_via_schema() {
        let err = parse_decision(r#"{"tool": "  ", "args": {}}"#).unwrap_err();
        assert!(matches!(err, ParseError::UnrecognizedShape(_)));
    }

    #[test]
    fn rejects_unknown_tool() {
        assert_eq!(
            parse_decision(r#"{"tool": "DeleteTicket", "args": {}}"#),
            Err(ParseError::UnknownAction("DeleteTicket".to_string()))
        );
    }

    #[test]
    fn directive_repeated_as_final_answer_is_one_attempt() {
        let raw = r#"Action: CreateTicket
Action Input: {"title": "a"}
Final Answer: {"tool": "createticket", "args": {"title": "a"}}"#;
        let attempts = attempts(raw);
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].tool, "CreateTicket");
        assert_eq!(attempts[0].input, r#"{"title":"a"}"#);
    }

    #[test]
    fn distinct_directives_are_separate_attempts() {
        let raw = "Action: CreateTicket\nAction Input: {\"title\": \"a\"}\nObservation: ok\nAction: UpdateTicket\nAction Input: {\"ticket_id\": \"66f1a2b3c4d5e6f708091a2b\", \"message\": \"b\"}";
        let attempts = attempts(raw);
        let tools: Vec<&str> = attempts.iter().map(|a| a.tool.as_str()).collect();
        assert_eq!(tools, vec!["CreateTicket", "UpdateTicket"]);
    }

    #[test]
    fn plain_objects_are_not_attempts() {
        assert!(attempts(r#"Example args: {"title": "x", "name": "Bob"}"#).is_empty());
    }

    #[test]
    fn envelopes_quoted_in_prose_are_reasoning() {
        let raw = r#"First idea: {"tool": "CreateTicket", "args": {"title": "draft"}}
Actually it is an update: {"tool": "UpdateTicket", "args": {"ticket_id": "66f1a2b3c4d5e6f708091a2b", "message": "done"}}"#;
        let attempts = attempts(raw);
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].tool, "UpdateTicket");
    }

    #[test]
    fn directive_then_different_final_answer_is_two_attempts() {
        let raw = r#"Action: CreateTicket
Action Input: {"title": "a"}
Final Answer: {"tool": "UpdateTicket", "args": {"ticket_id": "66f1a2b3c4d5e6f708091a2b", "message": "b"}}"#;
        let tools: Vec<String> = attempts(raw).into_iter().map(|a| a.tool).collect();
        assert_eq!(tools, vec!["CreateTicket", "UpdateTicket"]);
    }

    #[test]
    fn unbalanced_braces_scan_in_linear_time() {
        let raw = format!(
            "{}{}",
            "{".repeat(100_000),
            r#"{"tool": "CreateTicket", "args": {"title": "deep"}}"#
        );
        let started = std::time::Instant::now();
        let scanned = ScannedOutput::new(raw);
        assert_eq!(scanned.attempts().len(), 1);
        assert_eq!(
            scanned.decision().expect("decision").arguments["title"],
            "deep"
        );
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn fragment_offsets_cover_the_object() {
        let scanned = ScannedOutput::new("é {\"a\": {\"b\": 1}} tail {oops");
        assert_eq!(scanned.fragments.len(), 1);
        let fragment = &scanned.fragments[0];
        assert_eq!(&scanned.raw()[fragment.start..fragment.end], "{\"a\": {\"b\": 1}}");
    }
}
