//! Message-to-ticket triage.
//!
//! Routes each incoming message through a reasoning oracle to exactly one
//! ticket action (create or append) against the store in
//! `.triage/state/tickets.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use triage::context::ContextBuilder;
use triage::core::types::Ticket;
use triage::exit_codes;
use triage::io::config::{TriageConfig, load_config};
use triage::io::init::{InitOptions, TriagePaths, init_triage};
use triage::io::oracle::oracle_from_config;
use triage::io::store::{JsonFileStore, TicketStore};
use triage::logging;
use triage::resolve::{Resolver, ResolverConfig};

#[derive(Parser)]
#[command(
    name = "triage",
    version,
    about = "Route incoming messages to tickets with a reasoning oracle"
)]
struct Cli {
    /// Project root containing `.triage/`.
    #[arg(long, env = "TRIAGE_ROOT", global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.triage/` with default config and an empty ticket store.
    Init {
        /// Rewrite config and `.gitignore` if `.triage/` exists (tickets are kept).
        #[arg(short, long)]
        force: bool,
    },
    /// Resolve one message into a ticket create or append.
    Process {
        /// Message text; multiple words are joined with spaces.
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
        /// Print `{status, output}` as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print every ticket.
    List {
        /// Print the tickets as a JSON array.
        #[arg(long)]
        json: bool,
    },
    /// Print the ticket context the oracle would see.
    Context,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    debug!(root = %root.display(), "resolved project root");
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Process { message, json } => cmd_process(&root, &message.join(" "), json),
        Command::List { json } => cmd_list(&root, json),
        Command::Context => cmd_context(&root),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_triage(root, &InitOptions { force })?;
    println!("initialized {}", paths.triage_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_process(root: &Path, message: &str, json: bool) -> Result<i32> {
    let (paths, cfg) = open_workspace(root)?;
    let store = JsonFileStore::new(&paths.tickets_path);
    let oracle = oracle_from_config(&cfg.oracle, root)?;
    let resolver = Resolver::new(
        &store,
        oracle.as_ref(),
        ResolverConfig::from_config(&cfg, paths.audit_log_path.clone()),
    );

    let response = resolver.process_message(message);
    if json {
        println!(
            "{}",
            serde_json::to_string(&response).context("serialize response")?
        );
    } else {
        println!("{}: {}", response.status.as_str(), response.output);
    }
    Ok(if response.is_success() {
        exit_codes::OK
    } else {
        exit_codes::UNRESOLVED
    })
}

fn cmd_list(root: &Path, json: bool) -> Result<i32> {
    let (paths, _) = open_workspace(root)?;
    let tickets = JsonFileStore::new(&paths.tickets_path).list_all()?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&tickets).context("serialize tickets")?
        );
    } else if tickets.is_empty() {
        println!("no tickets");
    } else {
        for ticket in &tickets {
            print!("{}", render_ticket(ticket));
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_context(root: &Path) -> Result<i32> {
    let (paths, cfg) = open_workspace(root)?;
    let store = JsonFileStore::new(&paths.tickets_path);
    let snapshot = ContextBuilder::new(&store, cfg.context.max_tickets).build();
    if let Some(warning) = &snapshot.warning {
        eprintln!("warning: {warning}");
    }
    println!("{}", snapshot.render(cfg.context.description_chars));
    Ok(exit_codes::OK)
}

fn open_workspace(root: &Path) -> Result<(TriagePaths, TriageConfig)> {
    let paths = TriagePaths::new(root);
    if !paths.triage_dir.is_dir() {
        bail!(
            "{} not found (run `triage init` first)",
            paths.triage_dir.display()
        );
    }
    let cfg = load_config(&paths.config_path)?;
    Ok((paths, cfg))
}

/// Dashboard view of one ticket.
fn render_ticket(ticket: &Ticket) -> String {
    let mut out = format!(
        "{} [{}] {}\n",
        ticket.id,
        ticket.kind.as_str(),
        ticket.title
    );
    out.push_str(&format!("  created: {}\n", ticket.created_at.to_rfc3339()));
    if !ticket.description.is_empty() {
        out.push_str(&format!("  description: {}\n", ticket.description));
    }
    if !ticket.action.is_empty() {
        out.push_str(&format!("  action: {}\n", ticket.action));
    }
    for message in &ticket.messages {
        out.push_str(&format!("  - {message}\n"));
    }
    out
}
