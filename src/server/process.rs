// SPDX-License-Identifier: MIT

//! Spawning and terminating the analysis server process.

use crate::error::{HostError, HostResult};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const PROBE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A running analysis server bound to one TCP port.
///
/// Terminates the process on drop; the server has no shutdown handshake,
/// so kill-and-reap is the supported way to stop it.
pub struct ServerHandle {
    port: u16,
    child: Option<Child>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Kill the server process and reap it. Idempotent.
    pub fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            // kill() on an already-exited child reports InvalidInput,
            // which is fine; wait() reaps either way.
            let _ = child.kill();
            let _ = child.wait();
            info!(port = self.port, "analysis server stopped");
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Spawn an analysis server on `port` and probe it for an early exit.
///
/// The server gives no positive ready signal, so port collisions are
/// detected heuristically: a server that finds its port taken exits
/// almost immediately, and an exit within `probe_window` is reported as
/// [`HostError::PortInUse`]. A window that is too short lets collisions
/// slip through as dead servers; one that is too long stalls every
/// start. The default of 50ms errs toward fast startup.
pub fn spawn(
    exe: &Path,
    port: u16,
    include_paths: &[PathBuf],
    probe_window: Duration,
) -> HostResult<ServerHandle> {
    let mut command = Command::new(exe);
    command
        .arg("--tcp")
        .arg("--port")
        .arg(port.to_string())
        .arg("--loglevel")
        .arg("error")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    for path in include_paths {
        command.arg("-I").arg(path);
    }

    let mut child = command.spawn().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            HostError::ExecutableNotFound(exe.to_path_buf())
        } else {
            HostError::Io(e)
        }
    })?;

    let deadline = Instant::now() + probe_window;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(port, %status, "analysis server exited during the probe window");
                return Err(HostError::PortInUse(port));
            }
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(HostError::Io(e));
            }
        }
        if Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(PROBE_POLL_INTERVAL);
    }

    debug!(port, exe = %exe.display(), "analysis server spawned");
    Ok(ServerHandle {
        port,
        child: Some(child),
    })
}
