// SPDX-License-Identifier: MIT

//! One-shot exchanges with the analysis server via `dcd-client`.
//!
//! Every query spawns a short-lived client process that connects to the
//! server's TCP port, sends the buffer on stdin and prints the response
//! on stdout. The client process is the protocol implementation; this
//! module only shells out, bounds the exchange and parses the output.

pub mod parse;
pub mod unescape;

pub use parse::{CompletionEntry, CompletionResult, SymbolKind, SymbolLocation};

use crate::config::HostConfig;
use crate::error;
use crate::server::ServerRegistry;
use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{debug, warn};

/// Issues protocol queries against the registry's current server.
///
/// All query methods degrade to an empty result when the server is not
/// running or the exchange fails; completion is an assist, not a
/// hard dependency, so callers never see an error they would have to
/// surface mid-keystroke.
#[derive(Clone)]
pub struct ProtocolClient {
    registry: Arc<ServerRegistry>,
}

impl ProtocolClient {
    pub fn new(registry: Arc<ServerRegistry>) -> Self {
        Self { registry }
    }

    /// Completions for `buffer` at `byte_offset`.
    pub fn completions_at(&self, buffer: &str, byte_offset: usize) -> CompletionResult {
        let raw = self.exchange(&query_args(byte_offset, None), buffer.as_bytes());
        parse::parse_completions(&String::from_utf8_lossy(&raw))
    }

    /// Declaration site of the symbol under `byte_offset`.
    pub fn symbol_location_at(&self, buffer: &str, byte_offset: usize) -> SymbolLocation {
        let raw = self.exchange(
            &query_args(byte_offset, Some("--symbolLocation")),
            buffer.as_bytes(),
        );
        parse::parse_symbol_location(&String::from_utf8_lossy(&raw))
    }

    /// Documentation comment for the symbol under `byte_offset`, with
    /// escape sequences decoded. `None` when the server has nothing.
    pub fn documentation_at(&self, buffer: &str, byte_offset: usize) -> Option<String> {
        let raw = self.exchange(&query_args(byte_offset, Some("--doc")), buffer.as_bytes());
        if raw.is_empty() {
            None
        } else {
            Some(unescape::unescape_doc(&raw))
        }
    }

    /// Register additional include paths with the running server.
    ///
    /// An empty list is a no-op and spawns no client process.
    pub fn register_include_paths(&self, paths: &[PathBuf]) {
        if paths.is_empty() {
            return;
        }
        self.exchange(&include_args(paths), &[]);
    }

    fn exchange(&self, extra_args: &[OsString], stdin_bytes: &[u8]) -> Vec<u8> {
        let port = match self.registry.current_port() {
            Some(port) => port,
            None => {
                debug!("analysis server not running; returning an empty response");
                return Vec::new();
            }
        };
        let cfg = self.registry.config().get();
        exchange_on_port(&cfg, port, extra_args, stdin_bytes)
    }
}

/// Push include paths straight to a known port, bypassing the registry.
///
/// Used during server startup, where the registry lock is already held
/// and `current_port()` would deadlock.
pub(crate) fn push_include_paths(cfg: &HostConfig, port: u16, paths: &[PathBuf]) {
    if paths.is_empty() {
        return;
    }
    exchange_on_port(cfg, port, &include_args(paths), &[]);
}

fn query_args(byte_offset: usize, selector: Option<&str>) -> Vec<OsString> {
    let mut args = vec![
        OsString::from("-c"),
        OsString::from(byte_offset.to_string()),
    ];
    if let Some(flag) = selector {
        args.push(OsString::from(flag));
    }
    args
}

fn include_args(paths: &[PathBuf]) -> Vec<OsString> {
    let mut args = Vec::with_capacity(paths.len() * 2);
    for path in paths {
        args.push(OsString::from("-I"));
        args.push(path.clone().into_os_string());
    }
    args
}

/// Run one client process to completion, bounded by the exchange timeout.
fn exchange_on_port(
    cfg: &HostConfig,
    port: u16,
    extra_args: &[OsString],
    stdin_bytes: &[u8],
) -> Vec<u8> {
    let mut command = Command::new(&cfg.client_path);
    command
        .arg("--tcp")
        .arg("--port")
        .arg(port.to_string())
        .args(extra_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            error::warn_missing_once(&cfg.client_path);
            return Vec::new();
        }
        Err(e) => {
            warn!(err = %e, "failed to spawn dcd-client");
            return Vec::new();
        }
    };

    // Feed stdin from its own thread so a child that stops reading
    // cannot wedge this one on a full pipe. Dropping the handle closes
    // the pipe and signals end of input.
    if let Some(mut stdin) = child.stdin.take() {
        let payload = stdin_bytes.to_vec();
        std::thread::spawn(move || {
            let _ = stdin.write_all(&payload);
        });
    }

    let mut stdout = match child.stdout.take() {
        Some(stdout) => stdout,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Vec::new();
        }
    };

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });

    let response = match rx.recv_timeout(Duration::from_millis(cfg.exchange_timeout_ms)) {
        Ok(bytes) => bytes,
        Err(_) => {
            warn!(
                port,
                timeout_ms = cfg.exchange_timeout_ms,
                "client exchange timed out"
            );
            Vec::new()
        }
    };

    // Kill unconditionally: on the timeout path the client is still
    // alive, on the normal path this is a no-op on an exited process.
    let _ = child.kill();
    let _ = child.wait();
    response
}
