//! Error type returned by the Hetzner driver.

use thiserror::Error;

use crate::config::ConfigError;
use crate::credential::CredentialError;
use crate::hcloud::ProviderError;
use crate::provision::ProvisionError;
use crate::store::StoreError;
use crate::wait::WaitError;

/// Errors surfaced through the [`Driver`](super::Driver) contract.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// Raised when configuration is missing or invalid. No provider call has
    /// been made.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when the machine store cannot be used.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Raised when an operation needs a server but none has been created.
    #[error("machine {machine} has no server; run create first")]
    NotCreated {
        /// Machine name.
        machine: String,
    },
    /// Raised when `create` runs for a machine that already owns a server.
    #[error("machine {machine} already owns server {server_id}")]
    AlreadyCreated {
        /// Machine name.
        machine: String,
        /// Existing server id.
        server_id: u64,
    },
    /// Raised when the SSH credential cannot be prepared.
    #[error(transparent)]
    Credential(#[from] CredentialError),
    /// Raised when a provider lookup or submission fails.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Raised when an awaited operation fails, times out, or is cancelled.
    #[error(transparent)]
    Wait(#[from] WaitError),
    /// Raised when a running server has no public IPv4 address.
    #[error("server {server_id} has no public IPv4 address")]
    MissingPublicIp {
        /// Provider server id.
        server_id: u64,
    },
}

impl From<ProvisionError> for DriverError {
    fn from(value: ProvisionError) -> Self {
        match value {
            ProvisionError::Provider(err) => Self::Provider(err),
            ProvisionError::Wait(err) => Self::Wait(err),
            ProvisionError::MissingPublicIp { server_id } => Self::MissingPublicIp { server_id },
        }
    }
}
