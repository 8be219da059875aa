//! I/O helpers: ticket storage, oracle backends, config and audit files.

pub mod audit;
pub mod config;
pub mod init;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod store;
