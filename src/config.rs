use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{error, info, warn};

const DEFAULT_SERVER_PATH: &str = "dcd-server";
const DEFAULT_CLIENT_PATH: &str = "dcd-client";
const DEFAULT_DUB_PATH: &str = "dub";
const DEFAULT_PORT_MIN: u16 = 9166;
const DEFAULT_PORT_MAX: u16 = 9190;
const DEFAULT_SPAWN_PROBE_MS: u64 = 50;
const DEFAULT_EXCHANGE_TIMEOUT_MS: u64 = 5_000;

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{config_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// Path to the dcd-server executable (default: "dcd-server" on PATH).
    server_path: Option<PathBuf>,
    /// Path to the dcd-client executable (default: "dcd-client" on PATH).
    client_path: Option<PathBuf>,
    /// Path to the dub executable (default: "dub" on PATH).
    dub_path: Option<PathBuf>,
    /// Lowest candidate TCP port for the analysis server (default: 9166).
    port_min: Option<u16>,
    /// Highest candidate TCP port, inclusive (default: 9190).
    port_max: Option<u16>,
    /// Include paths passed to the server at spawn as repeated `-I` flags.
    include_paths: Option<Vec<PathBuf>>,
    /// Surface call-tip results (default: true).
    calltip_popups: Option<bool>,
    /// How long to watch a fresh server for an early exit before declaring
    /// its port taken, in milliseconds (default: 50).
    spawn_probe_ms: Option<u64>,
    /// Upper bound on one client exchange, in milliseconds (default: 5000).
    exchange_timeout_ms: Option<u64>,
    /// Log level filter string, e.g. "debug", "info,dcdhost=trace".
    log: Option<String>,
}

fn load_toml(config_dir: &Path) -> Option<TomlConfig> {
    let path = config_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml; using defaults");
            None
        }
    }
}

/// Parse `{config_dir}/config.toml` without applying it.
///
/// `Ok(true)` means the file exists and parsed, `Ok(false)` means it is
/// absent, `Err` carries the parse error. Used by the doctor checks.
pub fn probe_config_file(config_dir: &Path) -> Result<bool, String> {
    let path = config_dir.join("config.toml");
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(_) => return Ok(false),
    };
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(_) => Ok(true),
        Err(e) => Err(e.to_string()),
    }
}

// ─── HostConfig ───────────────────────────────────────────────────────────────

/// Resolved host configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    pub server_path: PathBuf,
    pub client_path: PathBuf,
    pub dub_path: PathBuf,
    /// Inclusive candidate port range scanned when starting the server.
    pub port_min: u16,
    pub port_max: u16,
    /// Include paths passed on the server command line at spawn.
    pub include_paths: Vec<PathBuf>,
    /// Whether call-tip results should be surfaced at all.
    pub calltip_popups: bool,
    /// Port-collision probe window in milliseconds.
    pub spawn_probe_ms: u64,
    /// Per-exchange timeout in milliseconds.
    pub exchange_timeout_ms: u64,
    /// Log level filter string.
    pub log: String,
    /// Directory config.toml is read from (and watched in).
    pub config_dir: PathBuf,
}

impl HostConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{config_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        server_path: Option<PathBuf>,
        client_path: Option<PathBuf>,
        dub_path: Option<PathBuf>,
        log: Option<String>,
        config_dir: Option<PathBuf>,
    ) -> Self {
        let config_dir = config_dir.unwrap_or_else(default_config_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&config_dir).unwrap_or_default();

        let server_path = server_path
            .or(toml.server_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SERVER_PATH));
        let client_path = client_path
            .or(toml.client_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIENT_PATH));
        let dub_path = dub_path
            .or(toml.dub_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DUB_PATH));

        let port_min = toml.port_min.unwrap_or(DEFAULT_PORT_MIN);
        // An inverted range clamps to a single candidate port.
        let port_max = toml.port_max.unwrap_or(DEFAULT_PORT_MAX).max(port_min);

        let include_paths = toml.include_paths.unwrap_or_default();
        let calltip_popups = toml.calltip_popups.unwrap_or(true);
        let spawn_probe_ms = toml.spawn_probe_ms.unwrap_or(DEFAULT_SPAWN_PROBE_MS);
        let exchange_timeout_ms = toml
            .exchange_timeout_ms
            .unwrap_or(DEFAULT_EXCHANGE_TIMEOUT_MS);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        Self {
            server_path,
            client_path,
            dub_path,
            port_min,
            port_max,
            include_paths,
            calltip_popups,
            spawn_probe_ms,
            exchange_timeout_ms,
            log,
            config_dir,
        }
    }
}

// ─── Change notification ──────────────────────────────────────────────────────

type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Shared, replaceable configuration value with keyed change callbacks.
///
/// This replaces the string-keyed settings object of editor runtimes with
/// a typed snapshot plus an explicit subscriber list. Registering under a
/// key that already has a subscriber replaces the old one, so a component
/// re-arming its watch never stacks duplicate callbacks.
#[derive(Clone)]
pub struct ConfigHandle {
    value: Arc<RwLock<HostConfig>>,
    subscribers: Arc<Mutex<Vec<(String, ChangeCallback)>>>,
}

impl ConfigHandle {
    pub fn new(config: HostConfig) -> Self {
        Self {
            value: Arc::new(RwLock::new(config)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Snapshot of the current configuration.
    pub fn get(&self) -> HostConfig {
        self.value.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Swap in `new`, firing subscribers when the value actually changed.
    ///
    /// Returns `true` if the value changed.
    pub fn replace(&self, new: HostConfig) -> bool {
        let changed = {
            let mut guard = self.value.write().unwrap_or_else(|e| e.into_inner());
            if *guard == new {
                false
            } else {
                *guard = new;
                true
            }
        };
        if changed {
            self.notify();
        }
        changed
    }

    /// Subscribe `callback` under `key`, replacing any previous
    /// subscription under the same key.
    pub fn on_change(&self, key: &str, callback: impl Fn() + Send + Sync + 'static) {
        let mut subs = self.lock_subscribers();
        subs.retain(|(k, _)| k != key);
        subs.push((key.to_string(), Arc::new(callback)));
    }

    /// Drop the subscription under `key`, if any.
    pub fn clear_on_change(&self, key: &str) {
        self.lock_subscribers().retain(|(k, _)| k != key);
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<(String, ChangeCallback)>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run every subscriber outside the list lock, so a callback may
    /// re-subscribe or unsubscribe without deadlocking.
    fn notify(&self) {
        let callbacks: Vec<ChangeCallback> = self
            .lock_subscribers()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback();
        }
    }
}

// ─── File watcher ─────────────────────────────────────────────────────────────

/// Watches `{config_dir}/config.toml` and republishes the merged config
/// through a [`ConfigHandle`] when the file changes.
///
/// `reload` rebuilds the full configuration so CLI and env overrides keep
/// their precedence over the re-read TOML layer.
pub struct ConfigWatcher {
    // Hold the watcher alive; dropping it stops the file watch.
    _watcher: notify_debouncer_full::Debouncer<
        notify_debouncer_full::notify::RecommendedWatcher,
        notify_debouncer_full::FileIdMap,
    >,
}

impl ConfigWatcher {
    /// Start watching `{config_dir}/config.toml` for changes.
    ///
    /// Returns `None` if the watcher could not be created (non-fatal; the
    /// host runs fine without live reconfiguration).
    pub fn start<F>(config_dir: &Path, handle: ConfigHandle, reload: F) -> Option<Self>
    where
        F: Fn() -> HostConfig + Send + 'static,
    {
        let config_path = config_dir.join("config.toml");

        let watcher = notify_debouncer_full::new_debouncer(
            std::time::Duration::from_secs(2),
            None,
            move |result: notify_debouncer_full::DebounceEventResult| {
                if let Ok(events) = result {
                    // Only act on modify/create events
                    let relevant = events.iter().any(|e| {
                        use notify_debouncer_full::notify::EventKind;
                        matches!(e.event.kind, EventKind::Modify(_) | EventKind::Create(_))
                    });
                    if relevant && handle.replace(reload()) {
                        info!("config.toml reloaded");
                    }
                }
            },
        );

        match watcher {
            Ok(mut debouncer) => {
                use notify_debouncer_full::notify::Watcher as _;
                // Watch the directory rather than the file itself since
                // watching a non-existent file fails on some platforms.
                if let Err(e) = debouncer.watcher().watch(
                    config_dir,
                    notify_debouncer_full::notify::RecursiveMode::NonRecursive,
                ) {
                    warn!("config watcher failed to start: {e}; live reconfiguration disabled");
                    return None;
                }
                info!(path = %config_path.display(), "config watcher started");
                Some(Self { _watcher: debouncer })
            }
            Err(e) => {
                warn!("config watcher creation failed: {e}; live reconfiguration disabled");
                None
            }
        }
    }
}

fn default_config_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/dcdhost
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("dcdhost");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_CONFIG_HOME/dcdhost or ~/.config/dcdhost
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("dcdhost");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config").join("dcdhost");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\dcdhost
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("dcdhost");
        }
    }
    // Fallback
    PathBuf::from(".dcdhost")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config_in(dir: &Path) -> HostConfig {
        HostConfig::new(None, None, None, None, Some(dir.to_path_buf()))
    }

    #[test]
    fn defaults_apply_without_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        assert_eq!(cfg.server_path, PathBuf::from("dcd-server"));
        assert_eq!(cfg.client_path, PathBuf::from("dcd-client"));
        assert_eq!(cfg.port_min, 9166);
        assert_eq!(cfg.port_max, 9190);
        assert!(cfg.include_paths.is_empty());
        assert!(cfg.calltip_popups);
        assert_eq!(cfg.spawn_probe_ms, 50);
        assert_eq!(cfg.exchange_timeout_ms, 5_000);
    }

    #[test]
    fn toml_layer_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            r#"
server_path = "/opt/dcd/dcd-server"
port_min = 9300
port_max = 9310
include_paths = ["/usr/include/dlang/dmd"]
calltip_popups = false
exchange_timeout_ms = 750
"#,
        )
        .unwrap();
        let cfg = config_in(dir.path());
        assert_eq!(cfg.server_path, PathBuf::from("/opt/dcd/dcd-server"));
        assert_eq!(cfg.port_min, 9300);
        assert_eq!(cfg.port_max, 9310);
        assert_eq!(cfg.include_paths, vec![PathBuf::from("/usr/include/dlang/dmd")]);
        assert!(!cfg.calltip_popups);
        assert_eq!(cfg.exchange_timeout_ms, 750);
        // Unset fields keep their defaults.
        assert_eq!(cfg.client_path, PathBuf::from("dcd-client"));
    }

    #[test]
    fn cli_layer_overrides_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "server_path = \"/from/toml\"\n").unwrap();
        let cfg = HostConfig::new(
            Some(PathBuf::from("/from/cli")),
            None,
            None,
            None,
            Some(dir.path().to_path_buf()),
        );
        assert_eq!(cfg.server_path, PathBuf::from("/from/cli"));
    }

    #[test]
    fn unparseable_toml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "port_min = \"not a number").unwrap();
        let cfg = config_in(dir.path());
        assert_eq!(cfg.port_min, 9166);
    }

    #[test]
    fn inverted_port_range_clamps_to_one_port() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "port_min = 9200\nport_max = 9100\n").unwrap();
        let cfg = config_in(dir.path());
        assert_eq!(cfg.port_min, 9200);
        assert_eq!(cfg.port_max, 9200);
    }

    #[test]
    fn probe_reports_absent_present_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(probe_config_file(dir.path()), Ok(false));
        std::fs::write(dir.path().join("config.toml"), "port_min = 9300\n").unwrap();
        assert_eq!(probe_config_file(dir.path()), Ok(true));
        std::fs::write(dir.path().join("config.toml"), "port_min = [").unwrap();
        assert!(probe_config_file(dir.path()).is_err());
    }

    #[test]
    fn replace_fires_subscribers_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ConfigHandle::new(config_in(dir.path()));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        handle.on_change("test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Identical value: no notification.
        assert!(!handle.replace(config_in(dir.path())));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let mut changed = config_in(dir.path());
        changed.port_min = 9400;
        changed.port_max = 9400;
        assert!(handle.replace(changed));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn same_key_subscription_replaces_the_old_one() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ConfigHandle::new(config_in(dir.path()));
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        handle.on_change("dcd-server", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&second);
        handle.on_change("dcd-server", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut changed = handle.get();
        changed.port_min += 1;
        changed.port_max = changed.port_max.max(changed.port_min);
        handle.replace(changed);

        assert_eq!(first.load(Ordering::SeqCst), 0, "replaced subscriber must not fire");
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleared_subscription_does_not_fire() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ConfigHandle::new(config_in(dir.path()));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        handle.on_change("dcd-server", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.clear_on_change("dcd-server");

        let mut changed = handle.get();
        changed.calltip_popups = !changed.calltip_popups;
        handle.replace(changed);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscriber_may_resubscribe_while_notified() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ConfigHandle::new(config_in(dir.path()));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        let reentrant = handle.clone();
        handle.on_change("dcd-server", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            // Re-arming from inside the callback must not deadlock.
            reentrant.on_change("dcd-server", || {});
        });

        let mut changed = handle.get();
        changed.spawn_probe_ms += 10;
        handle.replace(changed);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
