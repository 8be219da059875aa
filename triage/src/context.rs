//! Context Builder: the per-invocation ticket snapshot shown to the oracle.

use tracing::{debug, instrument, warn};

use crate::core::snapshot::ContextSnapshot;
use crate::io::store::TicketStore;

/// Reads ticket summaries from an injected store.
#[derive(Debug)]
pub struct ContextBuilder<'a, S: TicketStore + ?Sized> {
    store: &'a S,
    max_tickets: usize,
}

impl<'a, S: TicketStore + ?Sized> ContextBuilder<'a, S> {
    pub fn new(store: &'a S, max_tickets: usize) -> Self {
        Self { store, max_tickets }
    }

    /// Build a fresh snapshot. Never fails.
    ///
    /// Keeps the `max_tickets` most recent entries. A store read failure yields
    /// an empty snapshot carrying a warning.
    #[instrument(skip_all, fields(max_tickets = self.max_tickets))]
    pub fn build(&self) -> ContextSnapshot {
        match self.store.list_summaries() {
            Ok(mut entries) => {
                let total = entries.len();
                if total > self.max_tickets {
                    entries.drain(..total - self.max_tickets);
                }
                debug!(total, kept = entries.len(), "context snapshot built");
                ContextSnapshot {
                    entries,
                    warning: None,
                }
            }
            Err(err) => {
                let warning = format!("ticket context unavailable: {err:#}");
                warn!(%warning, "falling back to empty context");
                ContextSnapshot {
                    entries: Vec::new(),
                    warning: Some(warning),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::NO_TICKETS;
    use crate::io::store::MemoryStore;
    use crate::test_support::{FailingStore, ticket};

    #[test]
    fn empty_store_renders_placeholder() {
        let store = MemoryStore::new();
        let snapshot = ContextBuilder::new(&store, 10).build();
        assert!(snapshot.entries.is_empty());
        assert!(snapshot.warning.is_none());
        assert_eq!(snapshot.render(60), NO_TICKETS);
    }

    #[test]
    fn keeps_most_recent_entries() {
        let store = MemoryStore::with_tickets(vec![
            ticket("first", &[]),
            ticket("second", &[]),
            ticket("third", &[]),
        ]);
        let snapshot = ContextBuilder::new(&store, 2).build();
        let descriptions: Vec<_> = snapshot
            .entries
            .iter()
            .map(|e| e.description.as_str())
            .collect();
        assert_eq!(descriptions, vec!["second description", "third description"]);
    }

    #[test]
    fn store_failure_falls_back_with_warning() {
        let snapshot = ContextBuilder::new(&FailingStore::default(), 10).build();
        assert!(snapshot.entries.is_empty());
        let warning = snapshot.warning.as_deref().expect("warning");
        assert!(warning.contains("store offline"), "{warning}");
        assert_eq!(snapshot.render(60), NO_TICKETS);
    }
}
