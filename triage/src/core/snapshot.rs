//! Context snapshot rendering for the oracle prompt.

use crate::core::types::TicketSummary;

/// Rendered when the snapshot has no tickets.
pub const NO_TICKETS: &str = "No previous tickets.";

/// Per-invocation view of existing tickets. Built fresh for every message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub entries: Vec<TicketSummary>,
    /// Set when the store could not be read and the snapshot fell back to empty.
    pub warning: Option<String>,
}

impl ContextSnapshot {
    /// Render one line per ticket with the description cut to `description_chars`.
    pub fn render(&self, description_chars: usize) -> String {
        if self.entries.is_empty() {
            return NO_TICKETS.to_string();
        }
        self.entries
            .iter()
            .map(|entry| {
                format!(
                    "- ID: {} | Description: {}",
                    entry.id,
                    clip(&entry.description, description_chars)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// First `max_chars` characters with line breaks flattened to spaces.
fn clip(text: &str, max_chars: usize) -> String {
    text.chars()
        .take(max_chars)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}
