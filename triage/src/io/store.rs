//! Ticket store abstraction and the bundled implementations.
//!
//! The [`TicketStore`] trait is the only shared resource between concurrent
//! resolutions. Implementations must make `create_ticket` and `append_message`
//! atomic per ticket; both bundled stores serialize mutations behind a mutex.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, instrument};

use crate::core::types::{NewTicket, Ticket, TicketId, TicketSummary};

/// Durable ticket storage.
pub trait TicketStore {
    /// Insert a new ticket and return its freshly assigned id.
    fn create_ticket(&self, ticket: NewTicket) -> Result<TicketId>;
    /// Append one message. Returns the number of tickets modified (0 when `id` is unknown).
    fn append_message(&self, id: &TicketId, message: &str) -> Result<u64>;
    /// Full projection, in creation order.
    fn list_all(&self) -> Result<Vec<Ticket>>;
    /// Id + description projection, in creation order.
    fn list_summaries(&self) -> Result<Vec<TicketSummary>>;
}

/// Store backed by a single pretty-printed JSON array on disk.
///
/// Every mutation rewrites the file through a temp file + rename, so readers
/// never observe a partial write.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| anyhow!("ticket store lock poisoned"))
    }

    fn load(&self) -> Result<Vec<Ticket>> {
        load_tickets(&self.path)
    }
}

impl TicketStore for JsonFileStore {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn create_ticket(&self, ticket: NewTicket) -> Result<TicketId> {
        let _guard = self.guard()?;
        let mut tickets = self.load()?;
        let id = fresh_id(&tickets);
        tickets.push(ticket.into_ticket(id.clone(), Utc::now()));
        write_tickets(&self.path, &tickets)?;
        debug!(ticket_id = %id, total = tickets.len(), "ticket created");
        Ok(id)
    }

    #[instrument(skip_all, fields(path = %self.path.display(), ticket_id = %id))]
    fn append_message(&self, id: &TicketId, message: &str) -> Result<u64> {
        let _guard = self.guard()?;
        let mut tickets = self.load()?;
        let Some(ticket) = tickets.iter_mut().find(|t| &t.id == id) else {
            debug!("append target not found");
            return Ok(0);
        };
        ticket.messages.push(message.to_string());
        write_tickets(&self.path, &tickets)?;
        Ok(1)
    }

    fn list_all(&self) -> Result<Vec<Ticket>> {
        let _guard = self.guard()?;
        self.load()
    }

    fn list_summaries(&self) -> Result<Vec<TicketSummary>> {
        let _guard = self.guard()?;
        Ok(self.load()?.iter().map(TicketSummary::from).collect())
    }
}

/// In-process store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tickets: Mutex<Vec<Ticket>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing tickets.
    pub fn with_tickets(tickets: Vec<Ticket>) -> Self {
        Self {
            tickets: Mutex::new(tickets),
        }
    }

    fn tickets(&self) -> Result<MutexGuard<'_, Vec<Ticket>>> {
        self.tickets
            .lock()
            .map_err(|_| anyhow!("ticket store lock poisoned"))
    }
}

impl TicketStore for MemoryStore {
    fn create_ticket(&self, ticket: NewTicket) -> Result<TicketId> {
        let mut tickets = self.tickets()?;
        let id = fresh_id(&tickets);
        tickets.push(ticket.into_ticket(id.clone(), Utc::now()));
        Ok(id)
    }

    fn append_message(&self, id: &TicketId, message: &str) -> Result<u64> {
        let mut tickets = self.tickets()?;
        match tickets.iter_mut().find(|t| &t.id == id) {
            Some(ticket) => {
                ticket.messages.push(message.to_string());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn list_all(&self) -> Result<Vec<Ticket>> {
        Ok(self.tickets()?.clone())
    }

    fn list_summaries(&self) -> Result<Vec<TicketSummary>> {
        Ok(self.tickets()?.iter().map(TicketSummary::from).collect())
    }
}

/// Generate an id not already used by `existing`.
fn fresh_id(existing: &[Ticket]) -> TicketId {
    loop {
        let id = TicketId::generate(Utc::now());
        if !existing.iter().any(|t| t.id == id) {
            return id;
        }
    }
}

/// Load tickets from disk. A missing file is an empty store.
pub fn load_tickets(path: &Path) -> Result<Vec<Ticket>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read tickets {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&contents).with_context(|| format!("parse tickets {}", path.display()))
}

/// Atomically write tickets to disk (temp file + rename).
pub fn write_tickets(path: &Path, tickets: &[Ticket]) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(tickets).context("serialize tickets")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("ticket store path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp tickets {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace tickets {}", path.display()))?;
    Ok(())
}
