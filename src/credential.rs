//! SSH credential provisioning.
//!
//! A key pair is generated locally, the public half is registered with the
//! provider under the machine name, and the returned key id is attached to
//! the server at creation time. Nothing is rolled back here when a later step
//! fails; see the driver's cleanup policy.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::command::{CommandError, CommandRunner, ProcessCommandRunner};
use crate::fs;
use crate::hcloud::{CloudApi, CreateSshKeyRequest, ProviderError};

const DEFAULT_KEYGEN_BIN: &str = "ssh-keygen";
const KEY_BITS: &str = "2048";

/// Errors raised while preparing the SSH credential.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CredentialError {
    /// Raised when the key generator cannot be started.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Raised when the key generator exits unsuccessfully.
    #[error("{program} exited with status {status_text}: {stderr}")]
    Generate {
        /// Generator program.
        program: String,
        /// Exit status rendered for display.
        status_text: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when a key file cannot be accessed.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the public key file is empty.
    #[error("public key {path} is empty")]
    EmptyPublicKey {
        /// Public key path.
        path: Utf8PathBuf,
    },
    /// Raised when the provider rejects the public key.
    #[error("failed to register public key: {0}")]
    Registration(#[source] ProviderError),
    /// Raised when a previously registered key cannot be checked.
    #[error("failed to look up registered ssh key: {0}")]
    Lookup(#[source] ProviderError),
}

/// Locally held private key paired with the provider's key id.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CredentialHandle {
    /// Path of the private key; the key itself never leaves the host.
    pub private_key: Utf8PathBuf,
    /// Provider-assigned SSH key identifier.
    pub key_id: u64,
}

/// Returns the conventional public key path for `private_key`.
#[must_use]
pub fn public_key_path(private_key: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{private_key}.pub"))
}

/// Produces a key pair on disk.
pub trait KeyPairGenerator: Send + Sync {
    /// Writes a new private key to `private_key` and its public half next to
    /// it with a `.pub` suffix.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when generation fails.
    fn generate(&self, private_key: &Utf8Path) -> Result<(), CredentialError>;
}

/// Key generator backed by the OpenSSH `ssh-keygen` tool.
#[derive(Clone, Debug)]
pub struct SshKeygen<R = ProcessCommandRunner> {
    runner: R,
    program: String,
}

impl SshKeygen<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    #[must_use]
    pub fn with_process_runner() -> Self {
        Self::new(ProcessCommandRunner)
    }
}

impl<R> SshKeygen<R> {
    /// Creates a generator that runs `ssh-keygen` through `runner`.
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            program: DEFAULT_KEYGEN_BIN.to_owned(),
        }
    }

    /// Overrides the `ssh-keygen` executable.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn args(private_key: &Utf8Path) -> Vec<OsString> {
        ["-t", "rsa", "-b", KEY_BITS, "-N", "", "-q", "-f", private_key.as_str()]
            .into_iter()
            .map(OsString::from)
            .collect()
    }
}

impl<R> KeyPairGenerator for SshKeygen<R>
where
    R: CommandRunner + Send + Sync,
{
    fn generate(&self, private_key: &Utf8Path) -> Result<(), CredentialError> {
        if let Some(parent) = private_key.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| CredentialError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            })?;
        }

        let output = self.runner.run(&self.program, &Self::args(private_key))?;
        if output.is_success() {
            return Ok(());
        }
        Err(CredentialError::Generate {
            program: self.program.clone(),
            status_text: output.status_text(),
            stderr: output.stderr,
        })
    }
}

/// Generates, stores, and registers the machine's SSH key.
#[derive(Debug)]
pub struct CredentialProvisioner<'a, A: ?Sized, K: ?Sized> {
    api: &'a A,
    keygen: &'a K,
}

impl<'a, A, K> CredentialProvisioner<'a, A, K>
where
    A: CloudApi + ?Sized,
    K: KeyPairGenerator + ?Sized,
{
    /// Creates a provisioner over the given provider client and generator.
    #[must_use]
    pub const fn new(api: &'a A, keygen: &'a K) -> Self {
        Self { api, keygen }
    }

    /// Ensures a key pair exists at `private_key`, registers its public half
    /// under `machine_name`, and returns the resulting handle.
    ///
    /// An existing key pair at `private_key` is reused rather than replaced.
    /// When it is, `registered` names the key id recorded for it by an
    /// earlier attempt; if the provider still knows that id, no new
    /// registration is made.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when generation, reading the public key,
    /// the lookup of `registered`, or registration fails. Files already
    /// written are left in place.
    pub async fn provision(
        &self,
        machine_name: &str,
        private_key: &Utf8Path,
        registered: Option<u64>,
    ) -> Result<CredentialHandle, CredentialError> {
        let exists = fs::exists(private_key).map_err(|err| CredentialError::Io {
            path: private_key.to_path_buf(),
            message: err.to_string(),
        })?;
        if exists {
            debug!(path = %private_key, "reusing existing key pair");
            if let Some(key_id) = registered
                && let Some(handle) = self.still_registered(private_key, key_id).await?
            {
                return Ok(handle);
            }
        } else {
            self.keygen.generate(private_key)?;
            debug!(path = %private_key, "generated key pair");
        }

        let public_path = public_key_path(private_key);
        let public_key = fs::read_to_string(&public_path)
            .map_err(|err| CredentialError::Io {
                path: public_path.clone(),
                message: err.to_string(),
            })?
            .trim()
            .to_owned();
        if public_key.is_empty() {
            return Err(CredentialError::EmptyPublicKey { path: public_path });
        }

        let request = CreateSshKeyRequest {
            name: machine_name.to_owned(),
            public_key,
        };
        let key = self
            .api
            .create_ssh_key(&request)
            .await
            .map_err(CredentialError::Registration)?;
        info!(key_id = key.id, machine = machine_name, "registered ssh key");

        Ok(CredentialHandle {
            private_key: private_key.to_path_buf(),
            key_id: key.id,
        })
    }

    async fn still_registered(
        &self,
        private_key: &Utf8Path,
        key_id: u64,
    ) -> Result<Option<CredentialHandle>, CredentialError> {
        match self.api.ssh_key_by_id(key_id).await {
            Ok(key) => {
                info!(key_id = key.id, "reusing registered ssh key");
                Ok(Some(CredentialHandle {
                    private_key: private_key.to_path_buf(),
                    key_id: key.id,
                }))
            }
            Err(ProviderError::NotFound { .. }) => {
                debug!(key_id, "recorded ssh key is gone; registering again");
                Ok(None)
            }
            Err(err) => Err(CredentialError::Lookup(err)),
        }
    }
}
