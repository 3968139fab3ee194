//! Host layer for DCD, the D Completion Daemon: supervises a shared
//! `dcd-server` process and issues one-shot `dcd-client` queries
//! against it.

pub mod client;
pub mod config;
pub mod doctor;
pub mod dub;
pub mod error;
pub mod offset;
pub mod server;

// Re-export the query surface so embedders can use dcdhost::ProtocolClient
// without walking the module tree.
pub use client::{CompletionEntry, CompletionResult, ProtocolClient, SymbolKind, SymbolLocation};
pub use error::{HostError, HostResult};
pub use server::{ServerLease, ServerRegistry};
