// SPDX-License-Identifier: MIT

//! Refcounted lifecycle for the shared analysis server.
//!
//! Every consumer of the server holds a [`ServerLease`]. The first lease
//! starts the server, the last one dropped stops it, and a configuration
//! change while any lease is held restarts it on current settings.

use crate::client;
use crate::config::ConfigHandle;
use crate::dub::IncludePathSource;
use crate::error::{self, HostError};
use crate::server::process::{self, ServerHandle};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Duration;
use tracing::{info, warn};

const CONFIG_WATCH_KEY: &str = "dcd-server";

enum ServerState {
    /// No server process. A later start attempt may succeed.
    Stopped,
    Running(ServerHandle),
    /// The server executable is missing. Queries degrade to empty
    /// results until a config change or explicit restart retries.
    Unavailable,
}

struct RegistryInner {
    refcount: usize,
    state: ServerState,
}

/// Owner of the single analysis server shared by all consumers.
pub struct ServerRegistry {
    // Weak self-reference handed to leases and config callbacks.
    me: Weak<ServerRegistry>,
    inner: Mutex<RegistryInner>,
    config: ConfigHandle,
    include_source: Arc<dyn IncludePathSource>,
}

impl ServerRegistry {
    pub fn new(config: ConfigHandle, include_source: Arc<dyn IncludePathSource>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            inner: Mutex::new(RegistryInner {
                refcount: 0,
                state: ServerState::Stopped,
            }),
            config,
            include_source,
        })
    }

    /// Take a lease on the server, starting it if this is the first one.
    ///
    /// A failed start still hands out a lease: queries return empty
    /// results while the registry waits for a config change or an
    /// explicit restart to try again.
    pub fn acquire(&self) -> ServerLease {
        let mut inner = self.lock_inner();
        inner.refcount += 1;
        if inner.refcount == 1 {
            self.start_locked(&mut inner);
        }
        drop(inner);
        ServerLease {
            registry: self.me.clone(),
        }
    }

    fn release(&self) {
        let mut inner = self.lock_inner();
        inner.refcount = inner.refcount.saturating_sub(1);
        if inner.refcount == 0 {
            self.stop_locked(&mut inner);
        }
    }

    /// Stop and start the server on current configuration.
    ///
    /// No-op when no lease is held; the next first lease starts fresh
    /// anyway.
    pub fn restart(&self) {
        let mut inner = self.lock_inner();
        if inner.refcount == 0 {
            return;
        }
        self.stop_locked(&mut inner);
        self.start_locked(&mut inner);
    }

    fn start_locked(&self, inner: &mut RegistryInner) {
        if matches!(inner.state, ServerState::Running(_)) {
            return;
        }
        inner.state = self.scan_and_spawn();
        // Subscribe on every outcome so a config change can retry a
        // failed start, not just restart a healthy server.
        self.subscribe_config();
    }

    /// Walk the candidate port range until a spawn sticks.
    fn scan_and_spawn(&self) -> ServerState {
        let cfg = self.config.get();
        let probe_window = Duration::from_millis(cfg.spawn_probe_ms);
        for port in cfg.port_min..=cfg.port_max {
            match process::spawn(&cfg.server_path, port, &cfg.include_paths, probe_window) {
                Ok(handle) => {
                    info!(port, "analysis server started");
                    let paths = self.include_source.all_paths();
                    client::push_include_paths(&cfg, port, &paths);
                    return ServerState::Running(handle);
                }
                Err(HostError::PortInUse(_)) => continue,
                Err(HostError::ExecutableNotFound(path)) => {
                    error::warn_missing_once(&path);
                    return ServerState::Unavailable;
                }
                Err(e) => {
                    warn!(err = %e, "failed to start the analysis server");
                    return ServerState::Stopped;
                }
            }
        }
        warn!(
            port_min = cfg.port_min,
            port_max = cfg.port_max,
            "no free port for the analysis server; every candidate in the range is taken"
        );
        ServerState::Stopped
    }

    fn stop_locked(&self, inner: &mut RegistryInner) {
        self.config.clear_on_change(CONFIG_WATCH_KEY);
        if let ServerState::Running(ref mut handle) = inner.state {
            handle.terminate();
        }
        inner.state = ServerState::Stopped;
    }

    fn subscribe_config(&self) {
        let weak = self.me.clone();
        self.config.on_change(CONFIG_WATCH_KEY, move || {
            if let Some(registry) = weak.upgrade() {
                registry.restart();
            }
        });
    }

    /// Port of the running server, if any.
    pub fn current_port(&self) -> Option<u16> {
        match self.lock_inner().state {
            ServerState::Running(ref handle) => Some(handle.port()),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.lock_inner().state, ServerState::Running(_))
    }

    pub fn lease_count(&self) -> usize {
        self.lock_inner().refcount
    }

    pub(crate) fn config(&self) -> &ConfigHandle {
        &self.config
    }

    fn lock_inner(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// RAII lease on the shared server; dropping it releases the reference.
///
/// The lease holds a weak back-reference, so one that outlives its
/// registry has nothing left to release and dropping it is a no-op.
#[must_use = "dropping the lease immediately releases the server"]
pub struct ServerLease {
    registry: Weak<ServerRegistry>,
}

impl Drop for ServerLease {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release();
        }
    }
}

// ─── Process-wide registry ────────────────────────────────────────────────────

static GLOBAL: OnceLock<Arc<ServerRegistry>> = OnceLock::new();

/// Install `registry` as the process-wide instance. The first install
/// wins; later calls return the already-installed registry.
pub fn install_global(registry: Arc<ServerRegistry>) -> Arc<ServerRegistry> {
    GLOBAL.get_or_init(|| registry).clone()
}

/// The process-wide registry, if one has been installed.
pub fn global() -> Option<Arc<ServerRegistry>> {
    GLOBAL.get().cloned()
}
