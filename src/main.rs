use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use dcdhost::client::ProtocolClient;
use dcdhost::config::{ConfigHandle, ConfigWatcher, HostConfig};
use dcdhost::doctor;
use dcdhost::dub::DubCache;
use dcdhost::offset::{self, TextEncoding};
use dcdhost::server::{self, ServerRegistry};
use dcdhost::{CompletionResult, SymbolLocation};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "dcdhost",
    about = "Supervises a shared D completion server and queries it",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to the dcd-server executable
    #[arg(long, env = "DCDHOST_SERVER_PATH")]
    server_path: Option<PathBuf>,

    /// Path to the dcd-client executable
    #[arg(long, env = "DCDHOST_CLIENT_PATH")]
    client_path: Option<PathBuf>,

    /// Path to the dub executable
    #[arg(long, env = "DCDHOST_DUB_PATH")]
    dub_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "DCDHOST_LOG")]
    log: Option<String>,

    /// Directory containing config.toml
    #[arg(long, env = "DCDHOST_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Identifier completions or call tips at a position.
    ///
    /// Reads the D source file, translates the character offset to the
    /// byte offset the server expects, and prints one completion per line
    /// as text<TAB>kind. Call tips print one signature per line.
    ///
    /// Examples:
    ///   dcdhost complete --file source/app.d --offset 1042
    ///   dcdhost complete --file source/app.d --offset 1042 --root .
    Complete {
        /// D source file to query
        #[arg(long)]
        file: PathBuf,
        /// Cursor position as a character offset into the file
        #[arg(long)]
        offset: usize,
        /// Workspace folder(s) whose dub packages feed include paths
        /// (default: current directory)
        #[arg(long)]
        root: Vec<PathBuf>,
    },
    /// Locate the declaration of the symbol at a position.
    ///
    /// Prints `path:charOffset`, with the byte offset reported by the
    /// server translated back to characters, or `not found`.
    ///
    /// Examples:
    ///   dcdhost symbol --file source/app.d --offset 1042
    Symbol {
        /// D source file to query
        #[arg(long)]
        file: PathBuf,
        /// Cursor position as a character offset into the file
        #[arg(long)]
        offset: usize,
        /// Workspace folder(s) whose dub packages feed include paths
        /// (default: current directory)
        #[arg(long)]
        root: Vec<PathBuf>,
    },
    /// Show the documentation comment for the symbol at a position.
    ///
    /// Prints nothing when the symbol carries no documentation.
    ///
    /// Examples:
    ///   dcdhost doc --file source/app.d --offset 1042
    Doc {
        /// D source file to query
        #[arg(long)]
        file: PathBuf,
        /// Cursor position as a character offset into the file
        #[arg(long)]
        offset: usize,
        /// Workspace folder(s) whose dub packages feed include paths
        /// (default: current directory)
        #[arg(long)]
        root: Vec<PathBuf>,
    },
    /// Re-derive and print dub include paths for workspace folders.
    ///
    /// Drops the cached derivation, reruns `dub describe` per folder and
    /// prints the resulting union, one path per line.
    ///
    /// Examples:
    ///   dcdhost paths
    ///   dcdhost paths --root ~/code/app --root ~/code/lib
    Paths {
        /// Workspace folder(s) to derive from (default: current directory)
        #[arg(long)]
        root: Vec<PathBuf>,
    },
    /// Start the analysis server, bounce it once and report its port.
    ///
    /// Useful for verifying that the configured executables and port
    /// range can actually produce a running server.
    ///
    /// Examples:
    ///   dcdhost restart
    Restart,
    /// Run diagnostic checks on host prerequisites.
    ///
    /// Checks the dcd-server, dcd-client and dub executables, free ports
    /// in the configured range, and the config file.
    ///
    /// Exit code 0 if all checks pass, 1 if any check fails.
    ///
    /// Examples:
    ///   dcdhost doctor
    Doctor,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = HostConfig::new(
        args.server_path.clone(),
        args.client_path.clone(),
        args.dub_path.clone(),
        args.log.clone(),
        args.config_dir.clone(),
    );

    // Query results go to stdout, so all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(config.log.as_str())
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config_dir = config.config_dir.clone();
    let handle = ConfigHandle::new(config);

    let dub = Arc::new(DubCache::new(handle.clone()));
    let registry = server::install_global(ServerRegistry::new(handle.clone(), dub.clone()));
    let client = ProtocolClient::new(Arc::clone(&registry));

    // Rebuilding through HostConfig::new keeps CLI and env overrides
    // ranked above the re-read TOML layer.
    let (server_path, client_path, dub_path, log) = (
        args.server_path.clone(),
        args.client_path.clone(),
        args.dub_path.clone(),
        args.log.clone(),
    );
    let watch_dir = config_dir.clone();
    let _watcher = ConfigWatcher::start(&config_dir, handle.clone(), move || {
        HostConfig::new(
            server_path.clone(),
            client_path.clone(),
            dub_path.clone(),
            log.clone(),
            Some(watch_dir.clone()),
        )
    });

    match args.command {
        Command::Complete { file, offset, root } => {
            run_complete(&registry, &dub, &client, &handle, &file, offset, &root)
        }
        Command::Symbol { file, offset, root } => {
            run_symbol(&registry, &dub, &client, &file, offset, &root)
        }
        Command::Doc { file, offset, root } => {
            run_doc(&registry, &dub, &client, &file, offset, &root)
        }
        Command::Paths { root } => run_paths(&dub, &root),
        Command::Restart => run_restart(&registry),
        Command::Doctor => run_doctor(&handle),
    }
}

/// Derive include paths for the workspace roots before the server
/// starts; the spawn-time registration pushes the union to the server.
fn seed_include_paths(dub: &DubCache, roots: &[PathBuf]) {
    for root in default_roots(roots) {
        dub.register_folder(&root);
    }
}

fn default_roots(roots: &[PathBuf]) -> Vec<PathBuf> {
    if !roots.is_empty() {
        return roots.to_vec();
    }
    match std::env::current_dir() {
        Ok(cwd) => vec![cwd],
        Err(_) => Vec::new(),
    }
}

fn read_source(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))
}

fn run_complete(
    registry: &Arc<ServerRegistry>,
    dub: &DubCache,
    client: &ProtocolClient,
    handle: &ConfigHandle,
    file: &Path,
    char_offset: usize,
    roots: &[PathBuf],
) -> Result<()> {
    let buffer = read_source(file)?;
    let byte_offset = offset::char_to_byte(&buffer, char_offset, TextEncoding::Utf8);

    seed_include_paths(dub, roots);
    let _lease = registry.acquire();

    match client.completions_at(&buffer, byte_offset) {
        CompletionResult::Identifiers(entries) => {
            for entry in entries {
                println!("{}\t{}", entry.text, entry.kind.label());
            }
        }
        CompletionResult::CallTips(tips) => {
            if handle.get().calltip_popups {
                for tip in tips {
                    println!("{tip}");
                }
            }
        }
        CompletionResult::Empty => {}
    }
    Ok(())
}

fn run_symbol(
    registry: &Arc<ServerRegistry>,
    dub: &DubCache,
    client: &ProtocolClient,
    file: &Path,
    char_offset: usize,
    roots: &[PathBuf],
) -> Result<()> {
    let buffer = read_source(file)?;
    let byte_offset = offset::char_to_byte(&buffer, char_offset, TextEncoding::Utf8);

    seed_include_paths(dub, roots);
    let _lease = registry.acquire();

    match client.symbol_location_at(&buffer, byte_offset) {
        SymbolLocation::NotFound => println!("not found"),
        SymbolLocation::Buffer { byte_offset } => {
            let char_offset = offset::byte_to_char(&buffer, byte_offset, TextEncoding::Utf8);
            println!("{}:{char_offset}", file.display());
        }
        SymbolLocation::File { path, byte_offset } => {
            // Offsets in other files need that file's text to translate;
            // fall back to the raw byte offset if it cannot be read.
            let char_offset = match std::fs::read_to_string(&path) {
                Ok(target) => offset::byte_to_char(&target, byte_offset, TextEncoding::Utf8),
                Err(_) => byte_offset,
            };
            println!("{}:{char_offset}", path.display());
        }
    }
    Ok(())
}

fn run_doc(
    registry: &Arc<ServerRegistry>,
    dub: &DubCache,
    client: &ProtocolClient,
    file: &Path,
    char_offset: usize,
    roots: &[PathBuf],
) -> Result<()> {
    let buffer = read_source(file)?;
    let byte_offset = offset::char_to_byte(&buffer, char_offset, TextEncoding::Utf8);

    seed_include_paths(dub, roots);
    let _lease = registry.acquire();

    if let Some(doc) = client.documentation_at(&buffer, byte_offset) {
        println!("{}", doc.trim_end_matches('\n'));
    }
    Ok(())
}

fn run_paths(dub: &DubCache, roots: &[PathBuf]) -> Result<()> {
    for path in dub.refresh(&default_roots(roots)) {
        println!("{}", path.display());
    }
    Ok(())
}

fn run_restart(registry: &Arc<ServerRegistry>) -> Result<()> {
    let _lease = registry.acquire();
    registry.restart();
    match registry.current_port() {
        Some(port) => println!("analysis server restarted on port {port}"),
        None => println!("analysis server could not be started"),
    }
    Ok(())
}

fn run_doctor(handle: &ConfigHandle) -> Result<()> {
    let results = doctor::run_doctor(&handle.get());
    doctor::print_doctor_results(&results);
    // Advisory failures (a missing dub) leave completion working and do
    // not fail the run.
    if doctor::gating_failures(&results) > 0 {
        std::process::exit(1);
    }
    Ok(())
}
