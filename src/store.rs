//! On-disk storage for per-machine artefacts.
//!
//! Each machine owns a directory under the store root:
//!
//! ```text
//! <root>/machines/<name>/id_rsa
//! <root>/machines/<name>/id_rsa.pub
//! <root>/machines/<name>/state.json
//! ```

use std::env;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::fs;

const MACHINES_DIR: &str = "machines";
const PRIVATE_KEY_FILE: &str = "id_rsa";
const STATE_FILE: &str = "state.json";
const DEFAULT_STORE_DIR: &str = ".hetzner-machine";

/// Errors raised while reading or writing the machine store.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when a machine name cannot be used as a directory name.
    #[error("invalid machine name {name:?}: {reason}")]
    InvalidName {
        /// Rejected machine name.
        name: String,
        /// Why the name was rejected.
        reason: &'static str,
    },
    /// Raised when no store root can be derived from the environment.
    #[error("cannot determine the machine store: set HOME or pass --store-path")]
    NoHome,
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the persisted state cannot be parsed or rendered.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path holding the state.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Identifiers retained between driver calls.
///
/// Only handles are kept; every query re-resolves the server from its id.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DriverState {
    /// Orchestrator-assigned machine name.
    pub name: String,
    /// Provider server id, set once creation succeeds.
    #[serde(default)]
    pub server_id: Option<u64>,
    /// Provider SSH key id, set once the key is registered. A retried
    /// `create` reuses it while the provider still knows it.
    #[serde(default)]
    pub ssh_key_id: Option<u64>,
    /// Public address observed when the server first reported running.
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl DriverState {
    /// Creates an empty state for `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Directory tree holding keys and driver state for every machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineStore {
    root: Utf8PathBuf,
}

impl MachineStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a store at `$HOME/.hetzner-machine`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoHome`] when `HOME` is unset or not UTF-8.
    pub fn default_root() -> Result<Self, StoreError> {
        let home = env::var("HOME").map_err(|_| StoreError::NoHome)?;
        if home.is_empty() {
            return Err(StoreError::NoHome);
        }
        Ok(Self::new(Utf8PathBuf::from(home).join(DEFAULT_STORE_DIR)))
    }

    /// Store root directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory owned by machine `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidName`] when `name` is empty or would
    /// escape the store.
    pub fn machine_dir(&self, name: &str) -> Result<Utf8PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.root.join(MACHINES_DIR).join(name))
    }

    /// Private key path for machine `name`; the public key sits beside it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidName`] for unusable names.
    pub fn key_path(&self, name: &str) -> Result<Utf8PathBuf, StoreError> {
        Ok(self.machine_dir(name)?.join(PRIVATE_KEY_FILE))
    }

    /// State file path for machine `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidName`] for unusable names.
    pub fn state_path(&self, name: &str) -> Result<Utf8PathBuf, StoreError> {
        Ok(self.machine_dir(name)?.join(STATE_FILE))
    }

    /// Loads the persisted state for `name`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the file cannot be read and
    /// [`StoreError::Parse`] when its content is not valid state.
    pub fn load(&self, name: &str) -> Result<Option<DriverState>, StoreError> {
        let path = self.state_path(name)?;
        let exists = fs::exists(&path).map_err(|err| io_error(&path, &err))?;
        if !exists {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|err| io_error(&path, &err))?;
        let state = serde_json::from_str(&content).map_err(|err| StoreError::Parse {
            path: path.clone(),
            message: err.to_string(),
        })?;
        debug!(path = %path, "loaded driver state");
        Ok(Some(state))
    }

    /// Persists `state` under its machine name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the file cannot be written.
    pub fn save(&self, state: &DriverState) -> Result<Utf8PathBuf, StoreError> {
        let path = self.state_path(&state.name)?;
        let mut content =
            serde_json::to_string_pretty(state).map_err(|err| StoreError::Parse {
                path: path.clone(),
                message: err.to_string(),
            })?;
        content.push('\n');
        fs::write(&path, &content).map_err(|err| io_error(&path, &err))?;
        debug!(path = %path, "saved driver state");
        Ok(path)
    }
}

fn io_error(path: &Utf8Path, err: &std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let reason = if name.is_empty() {
        Some("name must not be empty")
    } else if name == "." || name == ".." {
        Some("name must not be a relative path component")
    } else if !name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
    {
        Some("only ASCII letters, digits, '-', '_' and '.' are allowed")
    } else {
        None
    };
    reason.map_or(Ok(()), |reason| {
        Err(StoreError::InvalidName {
            name: name.to_owned(),
            reason,
        })
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    fn store(tmp: &TempDir) -> MachineStore {
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
        MachineStore::new(root)
    }

    #[test]
    fn paths_are_scoped_to_the_machine() {
        let store = MachineStore::new("/var/lib/hm");
        assert_eq!(
            store.key_path("alpha").unwrap_or_else(|err| panic!("{err}")),
            Utf8PathBuf::from("/var/lib/hm/machines/alpha/id_rsa")
        );
        assert_eq!(
            store.state_path("alpha").unwrap_or_else(|err| panic!("{err}")),
            Utf8PathBuf::from("/var/lib/hm/machines/alpha/state.json")
        );
    }

    #[rstest]
    #[case("")]
    #[case("..")]
    #[case("a/b")]
    #[case("name with spaces")]
    fn unusable_names_are_rejected(#[case] name: &str) {
        let err = MachineStore::new("/tmp")
            .machine_dir(name)
            .expect_err("name should be rejected");
        assert!(matches!(err, StoreError::InvalidName { .. }));
    }

    #[test]
    fn missing_state_loads_as_none() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let loaded = store(&tmp)
            .load("alpha")
            .unwrap_or_else(|err| panic!("load: {err}"));
        assert_eq!(loaded, None);
    }

    #[test]
    fn saved_state_is_loaded_back() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let store = store(&tmp);
        let state = DriverState {
            server_id: Some(4711),
            ssh_key_id: Some(12),
            ip_address: Some(String::from("203.0.113.7")),
            ..DriverState::new("alpha")
        };

        store
            .save(&state)
            .unwrap_or_else(|err| panic!("save: {err}"));
        let loaded = store
            .load("alpha")
            .unwrap_or_else(|err| panic!("load: {err}"));
        assert_eq!(loaded, Some(state));
    }

    #[test]
    fn corrupt_state_reports_parse_error() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let store = store(&tmp);
        let path = store
            .state_path("alpha")
            .unwrap_or_else(|err| panic!("{err}"));
        fs::write(&path, "not json").unwrap_or_else(|err| panic!("write: {err}"));

        let err = store.load("alpha").expect_err("corrupt state");
        assert!(matches!(err, StoreError::Parse { .. }));
    }
}
