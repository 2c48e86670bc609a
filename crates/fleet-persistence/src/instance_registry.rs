//! Registry of running orchestrator instances, one per repository.

use std::path::{Path, PathBuf};

use chrono::Utc;
use fleet_models::{InstanceInfo, InstanceRegistryFile};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::atomic::{atomic_write_json, read_json_or_default};
use crate::error::Result;

/// Length of the hash suffix used to disambiguate colliding instance ids.
const HASH_SUFFIX_LEN: usize = 8;

/// Persists which orchestrator instances are active and for which repository.
///
/// A single user-scoped JSON file:
/// ```text
/// {"version": 1, "instances": {"widget": {...}, "widget-1f2e3d4c": {...}}}
/// ```
///
/// There is no locking. Each operation re-reads the file, applies its change
/// and writes the whole file back.
pub struct InstanceRegistry {
    path: PathBuf,
}

/// Derives the base instance id from a repository path.
///
/// The repository's base name, lower-cased, with every character outside
/// `[a-z0-9-]` replaced by `-`.
pub fn derive_instance_id(repo_path: &Path) -> String {
    let name = repo_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("repo");
    let id: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let id = id.trim_matches('-').to_string();
    if id.is_empty() {
        "repo".to_string()
    } else {
        id
    }
}

/// First hex digits of the SHA-256 of the path.
fn path_hash(repo_path: &Path) -> String {
    let digest = Sha256::digest(repo_path.to_string_lossy().as_bytes());
    hex::encode(digest)[..HASH_SUFFIX_LEN].to_string()
}

/// Resolves a path to an absolute, canonical form where possible.
fn absolute(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

impl InstanceRegistry {
    /// Creates a registry backed by the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a registry backed by the default user-scoped file.
    pub fn open_default() -> Self {
        Self::new(fleet_core::instance_registry_file())
    }

    /// Returns the registry file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> InstanceRegistryFile {
        read_json_or_default(&self.path)
    }

    fn save(&self, file: &InstanceRegistryFile) -> Result<()> {
        atomic_write_json(&self.path, file)
    }

    /// Registers an instance for a repository.
    ///
    /// The id is derived from the repository's base name. If that id is already
    /// taken by a different absolute path, a hash of the path is appended.
    /// Re-registering the same repository replaces its previous entry.
    pub fn register_instance(
        &self,
        repo_path: impl AsRef<Path>,
        session_count: usize,
    ) -> Result<InstanceInfo> {
        let repo_path = absolute(repo_path.as_ref());
        let mut file = self.load();

        // At most one entry per repository path
        let existing = file
            .instances
            .values()
            .find(|i| i.repo_path == repo_path)
            .map(|i| i.id.clone());

        let id = match existing {
            Some(id) => id,
            None => {
                let base = derive_instance_id(&repo_path);
                match file.instances.get(&base) {
                    Some(other) if other.repo_path != repo_path => {
                        let suffixed = format!("{}-{}", base, path_hash(&repo_path));
                        debug!(
                            base = %base,
                            id = %suffixed,
                            other = %other.repo_path.display(),
                            "instance id collision, using hashed id"
                        );
                        suffixed
                    }
                    _ => base,
                }
            }
        };

        let info = InstanceInfo {
            id: id.clone(),
            repo_path,
            pane_group: format!("fleet-{}", id),
            pid: std::process::id(),
            started_at: Utc::now(),
            session_count,
        };

        file.instances.insert(id.clone(), info.clone());
        self.save(&file)?;

        info!(
            instance_id = %id,
            repo = %info.repo_path.display(),
            "instance registered"
        );
        Ok(info)
    }

    /// Removes an instance. Returns whether it existed.
    pub fn unregister_instance(&self, id: &str) -> Result<bool> {
        let mut file = self.load();
        let existed = file.instances.remove(id).is_some();
        if existed {
            self.save(&file)?;
            info!(instance_id = %id, "instance unregistered");
        }
        Ok(existed)
    }

    /// Gets an instance by id.
    pub fn get(&self, id: &str) -> Option<InstanceInfo> {
        self.load().instances.remove(id)
    }

    /// Lists all registered instances, ordered by id.
    pub fn list(&self) -> Vec<InstanceInfo> {
        self.load().instances.into_values().collect()
    }

    /// Finds the instance registered for exactly this repository path.
    pub fn find_by_repo(&self, repo_path: impl AsRef<Path>) -> Option<InstanceInfo> {
        let repo_path = absolute(repo_path.as_ref());
        self.load()
            .instances
            .into_values()
            .find(|i| i.repo_path == repo_path)
    }

    /// Walks upward from `cwd` and returns the first instance whose
    /// repository path matches the directory or one of its ancestors.
    pub fn find_instance_from_cwd(&self, cwd: impl AsRef<Path>) -> Option<InstanceInfo> {
        let cwd = absolute(cwd.as_ref());
        let file = self.load();
        cwd.ancestors().find_map(|dir| {
            file.instances
                .values()
                .find(|i| i.repo_path == dir)
                .cloned()
        })
    }

    /// Updates the recorded session count of an instance.
    pub fn update_session_count(&self, id: &str, session_count: usize) -> Result<bool> {
        let mut file = self.load();
        let Some(info) = file.instances.get_mut(id) else {
            return Ok(false);
        };
        info.session_count = session_count;
        self.save(&file)?;
        Ok(true)
    }

    /// Removes every instance whose pane group no longer exists.
    ///
    /// Liveness is decided by `pane_group_exists`, never by the registering
    /// pid: that process usually exits right after handing off to the pane
    /// driver. Returns the removed ids.
    pub fn cleanup_stale_instances<F>(&self, pane_group_exists: F) -> Result<Vec<String>>
    where
        F: Fn(&str) -> bool,
    {
        let mut file = self.load();
        let stale: Vec<String> = file
            .instances
            .values()
            .filter(|i| !pane_group_exists(&i.pane_group))
            .map(|i| i.id.clone())
            .collect();

        if stale.is_empty() {
            return Ok(stale);
        }

        for id in &stale {
            file.instances.remove(id);
        }
        self.save(&file)?;

        info!(removed = ?stale, "removed stale instances");
        Ok(stale)
    }
}
