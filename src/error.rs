// SPDX-License-Identifier: MIT

//! Error taxonomy for the server supervisor and protocol client.
//!
//! Every condition here is handled inside the crate and degrades to
//! "no result" at the query surface; nothing reaches callers as a panic
//! or a fault that would interrupt editing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing::warn;

/// Errors raised while supervising `dcd-server` or talking to it.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The configured executable could not be located.
    #[error("executable not found: {0}")]
    ExecutableNotFound(PathBuf),
    /// The candidate port is presumed bound by another process.
    ///
    /// Heuristic: the freshly spawned server exited within the probe
    /// window. Recoverable; the caller moves on to the next port.
    #[error("port {0} is in use")]
    PortInUse(u16),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type HostResult<T> = Result<T, HostError>;

static WARNED_MISSING: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();

/// Warn about a missing executable once per path for the process lifetime.
///
/// Spawn attempts repeat on every query and every configuration change;
/// the warning must not.
pub(crate) fn warn_missing_once(path: &Path) {
    let set = WARNED_MISSING.get_or_init(|| Mutex::new(HashSet::new()));
    let mut warned = set.lock().unwrap_or_else(|e| e.into_inner());
    if warned.insert(path.to_path_buf()) {
        warn!(
            path = %path.display(),
            "executable not found; dependent features are disabled until it is installed or reconfigured"
        );
    }
}
