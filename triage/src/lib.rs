//! Message-to-ticket resolution.
//!
//! Each incoming message is routed by a reasoning oracle to exactly one ticket
//! action: create a new ticket or append to an existing one. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (action schema, decision parsing,
//!   context rendering). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (ticket store, oracle backends,
//!   config, audit log). Isolated behind traits to enable fakes in tests.
//!
//! Orchestration modules ([`context`], [`invoker`], [`executor`], [`resolve`])
//! coordinate core logic with I/O to resolve one message at a time.

pub mod context;
pub mod core;
pub mod executor;
pub mod exit_codes;
pub mod invoker;
pub mod io;
pub mod logging;
pub mod resolve;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
