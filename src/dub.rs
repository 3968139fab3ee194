// SPDX-License-Identifier: MIT

//! Include-path discovery through `dub describe`.
//!
//! A workspace folder that carries a dub package file gets its
//! dependencies' import paths registered with the analysis server, so
//! completion works across the whole dependency graph. Derivation runs
//! dub once per folder and caches the result, including the empty
//! result for folders without a package file.

use crate::config::ConfigHandle;
use crate::error;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Filenames that mark a folder as a dub package root.
const PACKAGE_FILENAMES: [&str; 3] = ["dub.json", "package.json", "dub.sdl"];

/// Where the server's include paths come from at startup.
pub trait IncludePathSource: Send + Sync {
    /// Union of include paths across every registered folder.
    fn all_paths(&self) -> Vec<PathBuf>;
}

#[derive(Deserialize)]
struct DubDescription {
    #[serde(default)]
    packages: Vec<DubPackage>,
}

#[derive(Deserialize)]
struct DubPackage {
    path: PathBuf,
    #[serde(rename = "importPaths", default)]
    import_paths: Vec<PathBuf>,
}

/// Per-folder cache of dub-derived include paths.
pub struct DubCache {
    config: ConfigHandle,
    folders: Mutex<HashMap<PathBuf, BTreeSet<PathBuf>>>,
}

impl DubCache {
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            config,
            folders: Mutex::new(HashMap::new()),
        }
    }

    /// Include paths for `root`, derived on first sight and cached.
    ///
    /// Folders without a recognized package file cache an empty set, so
    /// repeated registration of a plain D folder never re-runs dub.
    pub fn register_folder(&self, root: &Path) -> Vec<PathBuf> {
        if let Some(paths) = self.lock_folders().get(root) {
            return paths.iter().cloned().collect();
        }
        // Derivation shells out to dub; the lock is not held across it,
        // so a racing registration of the same folder just derives twice
        // and the identical results overwrite each other.
        let paths = self.derive_include_paths(root);
        let result: Vec<PathBuf> = paths.iter().cloned().collect();
        self.lock_folders().insert(root.to_path_buf(), paths);
        result
    }

    /// Drop every cached derivation and re-derive for `roots`.
    ///
    /// Returns the union of include paths across all of `roots`, ready
    /// to be pushed to the server in one registration.
    pub fn refresh(&self, roots: &[PathBuf]) -> Vec<PathBuf> {
        self.lock_folders().clear();
        for root in roots {
            let paths = self.derive_include_paths(root);
            self.lock_folders().insert(root.clone(), paths);
        }
        self.all_paths()
    }

    fn derive_include_paths(&self, root: &Path) -> BTreeSet<PathBuf> {
        if !has_package_file(root) {
            return BTreeSet::new();
        }
        let description = match self.describe(root) {
            Some(description) => description,
            None => return BTreeSet::new(),
        };
        let mut paths = BTreeSet::new();
        for package in description.packages {
            // importPaths are relative to the owning package, which may
            // itself live anywhere in the dub cache.
            let base = absolute(&package.path);
            for import in &package.import_paths {
                paths.insert(base.join(import));
            }
        }
        debug!(root = %root.display(), count = paths.len(), "derived include paths");
        paths
    }

    fn describe(&self, root: &Path) -> Option<DubDescription> {
        let cfg = self.config.get();
        let output = Command::new(&cfg.dub_path)
            .arg("describe")
            .arg(format!("--root={}", root.display()))
            .arg("--vquiet")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();
        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                error::warn_missing_once(&cfg.dub_path);
                return None;
            }
            Err(e) => {
                warn!(err = %e, "failed to run dub describe");
                return None;
            }
        };
        if !output.status.success() {
            // Unresolvable dependencies, broken manifest and the like.
            debug!(root = %root.display(), status = %output.status, "dub describe failed");
            return None;
        }
        if output.stdout.is_empty() {
            return None;
        }
        match serde_json::from_slice(&output.stdout) {
            Ok(description) => Some(description),
            Err(e) => {
                warn!(err = %e, "unparseable dub describe output");
                None
            }
        }
    }

    fn lock_folders(&self) -> MutexGuard<'_, HashMap<PathBuf, BTreeSet<PathBuf>>> {
        self.folders.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl IncludePathSource for DubCache {
    fn all_paths(&self) -> Vec<PathBuf> {
        let folders = self.lock_folders();
        let mut union = BTreeSet::new();
        for paths in folders.values() {
            union.extend(paths.iter().cloned());
        }
        union.into_iter().collect()
    }
}

fn has_package_file(root: &Path) -> bool {
    PACKAGE_FILENAMES.iter().any(|name| root.join(name).is_file())
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}
