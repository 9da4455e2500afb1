//! The on-disk keeper state file and init-progress file: the authoritative
//! local cache of the last interaction with the coordinator (§3 "Keeper
//! state file") and the marker that an interrupted `create` must resume
//! (§3 "Init-progress file").
//!
//! Both files share the same versioned binary framing and the same
//! atomic-write discipline: serialize, write to a temp file, fsync, rename
//! over the target. `bincode` gives us the binary encoding; the version
//! byte in front of the payload is what lets us reject an incompatible
//! major version outright instead of silently misreading old bytes.

pub mod error;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use fs::file::deleter::FileDeleter;
use fs::file::renamer::FileRenamer;
use fs::file::LocalFile;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use self::error::StateError;
use crate::config::paths::Paths;
use crate::roles::NodeRole;

/// Major version of the on-disk layout. A minor bump (new optional field
/// appended with a default) keeps this constant; changing the meaning of an
/// existing field bumps it, which makes every previously-written state file
/// unreadable by design so the agent falls back to re-registration rather
/// than guessing.
const STATE_MAJOR_VERSION: u32 = 1;

/// Authoritative local cache of the last interaction with the coordinator,
/// per §3 "Keeper state file".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeeperState {
    pub version: u32,
    pub current_node_id: i64,
    pub current_group: i32,
    pub current_role: NodeRole,
    pub assigned_role: NodeRole,
    pub last_monitor_contact_epoch: u64,
    pub last_secondary_contact_epoch: u64,
    pub xlog_location: String,
    pub pg_control_version: u32,
    pub catalog_version: u32,
    pub system_identifier: u64,
}

impl KeeperState {
    pub fn new(current_node_id: i64, current_group: i32, current_role: NodeRole) -> Self {
        Self {
            version: STATE_MAJOR_VERSION,
            current_node_id,
            current_group,
            current_role,
            assigned_role: current_role,
            last_monitor_contact_epoch: 0,
            last_secondary_contact_epoch: 0,
            xlog_location: String::new(),
            pg_control_version: 0,
            catalog_version: 0,
            system_identifier: 0,
        }
    }

    /// Invariant 2: the agent never believes it is primary from the state
    /// file alone once contact with both the coordinator and any standby
    /// has lapsed past `partition_timeout`.
    pub fn partition_suspected(&self, now_epoch: u64, partition_timeout_secs: u64) -> bool {
        if self.last_monitor_contact_epoch == 0 && self.last_secondary_contact_epoch == 0 {
            // never-contacted nodes do not self-demote on this rule.
            return false;
        }
        let most_recent = self
            .last_monitor_contact_epoch
            .max(self.last_secondary_contact_epoch);
        now_epoch.saturating_sub(most_recent) > partition_timeout_secs
    }
}

/// Present only between the first `create` call and the first successful
/// `reach_initial_state`; its existence is the sole signal that an
/// interrupted create must be resumed (§3 "Init-progress file").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitProgress {
    pub version: u32,
    pub pre_init_state: NodeRole,
    pub registration_time: u64,
}

impl InitProgress {
    pub fn new(pre_init_state: NodeRole) -> Self {
        Self {
            version: STATE_MAJOR_VERSION,
            pre_init_state,
            registration_time: now_epoch(),
        }
    }
}

pub fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Reads/writes the `<name>.state` and `<name>.init` files for one node.
pub struct StateStore {
    paths: Paths,
}

impl StateStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    #[instrument(skip(self), fields(path = %self.paths.state_file().display()))]
    pub fn load(&self) -> Result<KeeperState, StateError> {
        let path = self.paths.state_file();
        if !path.exists() {
            return Err(StateError::NotFound(path));
        }
        let bytes = std::fs::read(&path).map_err(|source| StateError::Io {
            path: path.clone(),
            source,
        })?;
        decode_bytes(&path, &bytes)
    }

    #[instrument(skip(self, state), fields(path = %self.paths.state_file().display()))]
    pub fn store(&self, state: &KeeperState) -> Result<(), StateError> {
        atomic_write(&self.paths.state_file(), state)
    }

    /// Loads, applies `f`, then persists — the pattern every control-loop
    /// iteration and every FSM transition uses to update the state file.
    pub fn update(
        &self,
        f: impl FnOnce(&mut KeeperState),
    ) -> Result<KeeperState, StateError> {
        let mut state = self.load()?;
        f(&mut state);
        self.store(&state)?;
        Ok(state)
    }

    pub fn read_init(&self) -> Result<InitProgress, StateError> {
        let path = self.paths.init_file();
        if !path.exists() {
            return Err(StateError::NoInitInProgress(path));
        }
        let bytes = std::fs::read(&path).map_err(|source| StateError::Io {
            path: path.clone(),
            source,
        })?;
        decode_bytes(&path, &bytes)
    }

    pub fn write_init(&self, progress: &InitProgress) -> Result<(), StateError> {
        atomic_write(&self.paths.init_file(), progress)
    }

    /// Invariant: the init file is removed only after the initial
    /// assignment is fully realized.
    pub fn remove_init(&self) -> Result<(), StateError> {
        let path = self.paths.init_file();
        if !path.exists() {
            return Ok(());
        }
        LocalFile.delete(&path).map_err(|source| StateError::Io { path, source })
    }

    pub fn init_in_progress(&self) -> bool {
        self.paths.init_file().exists()
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }
}

fn atomic_write<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let payload = bincode::serialize(value).map_err(|source| StateError::Corrupt {
        path: path.to_path_buf(),
        reason: format!("failed to serialize: {source}"),
    })?;

    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&STATE_MAJOR_VERSION.to_le_bytes());
    framed.extend_from_slice(&payload);

    let tmp_path = tmp_path_for(path);
    {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp_path)
            .map_err(|source| StateError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        file.write_all(&framed).map_err(|source| StateError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        file.sync_all().map_err(|source| StateError::Io {
            path: tmp_path.clone(),
            source,
        })?;
    }

    LocalFile
        .rename(&tmp_path, path)
        .map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = tmp
        .file_name()
        .map(|n| format!("{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| "state.tmp".to_string());
    tmp.set_file_name(file_name);
    tmp
}

fn decode_bytes<T: for<'de> Deserialize<'de>>(path: &Path, bytes: &[u8]) -> Result<T, StateError> {
    if bytes.len() < 4 {
        return Err(StateError::Corrupt {
            path: path.to_path_buf(),
            reason: "file shorter than the version header".to_string(),
        });
    }
    let version = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if version != STATE_MAJOR_VERSION {
        warn!(found = version, expected = STATE_MAJOR_VERSION, path = %path.display(), "state file version mismatch");
        return Err(StateError::VersionMismatch {
            path: path.to_path_buf(),
            found: version,
            expected: STATE_MAJOR_VERSION,
        });
    }
    bincode::deserialize(&bytes[4..]).map_err(|source| StateError::Corrupt {
        path: path.to_path_buf(),
        reason: format!("failed to deserialize: {source}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> StateStore {
        StateStore::new(Paths::new(dir.path().join("pgdata"), "node1"))
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let state = KeeperState::new(1, 0, NodeRole::Single);
        store.store(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(matches!(store.load(), Err(StateError::NotFound(_))));
    }

    #[test]
    fn corrupt_file_is_rejected_not_misread() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.paths().state_file(), b"\x00").unwrap();
        assert!(matches!(store.load(), Err(StateError::Corrupt { .. })));
    }

    #[test]
    fn mismatched_major_version_forces_reregistration() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let mut framed = 99u32.to_le_bytes().to_vec();
        framed.extend_from_slice(&bincode::serialize(&KeeperState::new(1, 0, NodeRole::Single)).unwrap());
        std::fs::write(store.paths().state_file(), framed).unwrap();
        assert!(matches!(
            store.load(),
            Err(StateError::VersionMismatch { found: 99, .. })
        ));
    }

    #[test]
    fn update_persists_the_mutated_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.store(&KeeperState::new(1, 0, NodeRole::Init)).unwrap();
        store
            .update(|s| s.assigned_role = NodeRole::Single)
            .unwrap();
        assert_eq!(store.load().unwrap().assigned_role, NodeRole::Single);
    }

    #[test]
    fn init_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(!store.init_in_progress());
        store.write_init(&InitProgress::new(NodeRole::Init)).unwrap();
        assert!(store.init_in_progress());
        let progress = store.read_init().unwrap();
        assert_eq!(progress.pre_init_state, NodeRole::Init);
        store.remove_init().unwrap();
        assert!(!store.init_in_progress());
    }

    #[test]
    fn partition_never_suspected_before_first_contact() {
        let state = KeeperState::new(1, 0, NodeRole::Primary);
        assert!(!state.partition_suspected(1_000_000, 20));
    }

    #[test]
    fn partition_suspected_past_timeout() {
        let mut state = KeeperState::new(1, 0, NodeRole::Primary);
        state.last_monitor_contact_epoch = 1_000_000;
        assert!(state.partition_suspected(1_000_050, 20));
        assert!(!state.partition_suspected(1_000_010, 20));
    }
}
