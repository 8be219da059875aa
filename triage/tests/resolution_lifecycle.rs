//! Resolution-level tests against the durable file store.
//!
//! These drive `Resolver` end to end with scripted oracles to verify the
//! mutation guarantees: one message, at most one store mutation, and no
//! mutation at all on any failure path.

use std::thread;

use triage::core::error::{OracleError, ResolutionFailure};
use triage::core::types::{LoopState, ResponseStatus, TicketId, TicketType};
use triage::executor::Applied;
use triage::io::audit::read_records;
use triage::io::store::{JsonFileStore, TicketStore};
use triage::resolve::{Resolver, ResolverConfig};
use triage::test_support::{ScriptedOracle, TestWorkspace};

const REMINDER: &str = "Reminder: Backup the database every month end";

fn create_reminder() -> String {
    format!(
        r#"Thought: no existing ticket covers this.
{{"tool": "CreateTicket", "args": {{"type": "reminder", "title": "Monthly backup", "description": "Back up the database at month end", "action": "Schedule backup", "messages": ["{REMINDER}"]}}}}"#
    )
}

fn update(id: &TicketId, message: &str) -> String {
    format!(
        r#"{{"tool": "UpdateTicket", "args": {{"ticket_id": "{id}", "message": "{message}"}}}}"#
    )
}

fn resolver_config(ws: &TestWorkspace) -> ResolverConfig {
    ResolverConfig {
        audit_log_path: Some(ws.paths.audit_log_path.clone()),
        ..ResolverConfig::default()
    }
}

/// Reminder with an empty store creates one ticket; a follow-up appends to it.
#[test]
fn reminder_then_follow_up_appends_to_same_ticket() {
    let ws = TestWorkspace::new();
    let store = JsonFileStore::new(&ws.paths.tickets_path);

    let first_oracle = ScriptedOracle::new([create_reminder()]);
    let first = Resolver::new(&store, &first_oracle, resolver_config(&ws)).resolve(REMINDER);
    let Ok(Applied::Created(id)) = first.result.clone() else {
        panic!("expected created, got {:?}", first.result);
    };
    assert!(first_oracle.prompts()[0].contains("No previous tickets."));

    let tickets = store.list_all().expect("list");
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].kind, TicketType::Reminder);
    assert_eq!(tickets[0].messages, vec![REMINDER.to_string()]);

    let second_oracle = ScriptedOracle::new([update(&id, "backup completed")]);
    let response = Resolver::new(&store, &second_oracle, resolver_config(&ws))
        .process_message(&format!("Update ticket {id}: backup completed"));
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.output, format!("Message appended to ticket {id}"));
    assert!(
        second_oracle.prompts()[0].contains(&format!(
            "- ID: {id} | Description: Back up the database at month end"
        )),
        "second prompt lists the first ticket"
    );

    let after = store.list_all().expect("list");
    assert_eq!(after.len(), 1);
    assert_eq!(
        after[0].messages,
        vec![REMINDER.to_string(), "backup completed".to_string()]
    );
    assert_eq!(after[0].title, tickets[0].title);
    assert_eq!(after[0].description, tickets[0].description);
    assert_eq!(after[0].kind, tickets[0].kind);

    let records = read_records(&ws.paths.audit_log_path).expect("audit");
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == ResponseStatus::Success));
}

/// Two distinct tool calls in one completion are refused with zero mutations.
#[test]
fn multiple_tool_calls_mutate_nothing() {
    let ws = TestWorkspace::new();
    let store = JsonFileStore::new(&ws.paths.tickets_path);
    let existing = store
        .create_ticket(triage::core::types::NewTicket {
            kind: TicketType::Task,
            title: "Q4 deck".to_string(),
            description: "Prepare the Q4 deck".to_string(),
            action: String::new(),
            messages: Vec::new(),
        })
        .expect("seed");
    let before = store.list_all().expect("list");

    let oracle = ScriptedOracle::new([format!(
        "Thought: log it.\nAction: UpdateTicket\nAction Input: {{\"ticket_id\": \"{existing}\", \"message\": \"slides drafted\"}}\nObservation: ok\nAction: CreateTicket\nAction Input: {{\"title\": \"Slides\"}}"
    )]);
    let resolution =
        Resolver::new(&store, &oracle, resolver_config(&ws)).resolve("slides drafted");

    assert!(matches!(
        resolution.result,
        Err(ResolutionFailure::Oracle(
            OracleError::MultipleActionsAttempted { .. }
        ))
    ));
    assert_eq!(store.list_all().expect("list"), before);
}

/// Only the last JSON fragment decides; earlier non-action JSON is reasoning.
#[test]
fn last_fragment_decides() {
    let ws = TestWorkspace::new();
    let store = JsonFileStore::new(&ws.paths.tickets_path);
    let oracle = ScriptedOracle::new([format!(
        "Considering fields {{\"type\": \"task\", \"title\": \"draft\"}} first.\n{}",
        create_reminder()
    )]);
    let resolution = Resolver::new(&store, &oracle, resolver_config(&ws)).resolve(REMINDER);

    assert!(resolution.result.is_ok(), "{:?}", resolution.result);
    let tickets = store.list_all().expect("list");
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].title, "Monthly backup");
}

/// An envelope quoted in prose is reasoning; the later envelope decides.
#[test]
fn revised_decision_appends_exactly_once() {
    let ws = TestWorkspace::new();
    let store = JsonFileStore::new(&ws.paths.tickets_path);
    let existing = store
        .create_ticket(triage::core::types::NewTicket {
            kind: TicketType::Task,
            title: "Q4 deck".to_string(),
            description: "Prepare the Q4 deck".to_string(),
            action: String::new(),
            messages: Vec::new(),
        })
        .expect("seed");

    let oracle = ScriptedOracle::new([format!(
        "First idea: {}\nActually it is an update: {}",
        r#"{"tool": "CreateTicket", "args": {"type": "task", "title": "Deck"}}"#,
        update(&existing, "done")
    )]);
    let resolution = Resolver::new(&store, &oracle, resolver_config(&ws)).resolve("done");

    assert_eq!(resolution.result, Ok(Applied::Appended(existing.clone())));
    let tickets = store.list_all().expect("list");
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].messages, vec!["done".to_string()]);
}

/// Failure paths never reach the store.
#[test]
fn failures_leave_store_untouched() {
    let ws = TestWorkspace::new();
    let store = JsonFileStore::new(&ws.paths.tickets_path);
    let scripts = [
        "no json here",
        r#"{"tool": "CloseTicket", "args": {"ticket_id": "66f1a2b3c4d5e6f708091a2b"}}"#,
        r#"{"tool": "UpdateTicket", "args": {"ticket_id": "66f1...", "message": "x"}}"#,
        r#"{"tool": "UpdateTicket", "args": {"ticket_id": "66f1a2b3c4d5e6f708091a2b", "message": "x"}}"#,
    ];
    for script in scripts {
        let oracle = ScriptedOracle::new([script]);
        let resolution = Resolver::new(&store, &oracle, resolver_config(&ws)).resolve("hello");
        assert_eq!(
            resolution.response().status,
            ResponseStatus::Error,
            "{script}"
        );
        assert_eq!(resolution.states.last(), Some(&LoopState::Done));
    }
    assert!(store.list_all().expect("list").is_empty());

    let records = read_records(&ws.paths.audit_log_path).expect("audit");
    let failures: Vec<_> = records
        .iter()
        .map(|r| r.failure.as_deref().unwrap_or("none"))
        .collect();
    assert_eq!(failures, vec!["parse", "parse", "schema", "ticket_not_found"]);
}

/// Concurrent resolutions against one store each land exactly one mutation.
#[test]
fn concurrent_resolutions_each_mutate_once() {
    let ws = TestWorkspace::new();
    let store = JsonFileStore::new(&ws.paths.tickets_path);
    let target = store
        .create_ticket(triage::core::types::NewTicket {
            kind: TicketType::FollowUp,
            title: "Vendor contract".to_string(),
            description: "Follow up on the vendor contract".to_string(),
            action: String::new(),
            messages: Vec::new(),
        })
        .expect("seed");

    thread::scope(|scope| {
        for n in 0..6 {
            let store = &store;
            let target = &target;
            let ws = &ws;
            scope.spawn(move || {
                let oracle = ScriptedOracle::new([update(target, &format!("note {n}"))]);
                let response = Resolver::new(store, &oracle, resolver_config(ws))
                    .process_message(&format!("note {n}"));
                assert_eq!(response.status, ResponseStatus::Success);
            });
        }
    });

    let tickets = store.list_all().expect("list");
    assert_eq!(tickets.len(), 1);
    let mut messages = tickets[0].messages.clone();
    messages.sort();
    assert_eq!(
        messages,
        (0..6).map(|n| format!("note {n}")).collect::<Vec<_>>()
    );
}
