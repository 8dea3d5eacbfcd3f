//! Wire models for the subset of the Hetzner Cloud API used by the driver.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Boot image resource.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Image {
    /// Provider identifier.
    pub id: u64,
    /// Unique image name (for example `debian-9`). Snapshots have none.
    #[serde(default)]
    pub name: Option<String>,
}

/// Data-centre location resource.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Location {
    /// Provider identifier.
    pub id: u64,
    /// Location code (for example `fsn1`).
    pub name: String,
}

/// Server class resource.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ServerType {
    /// Provider identifier.
    pub id: u64,
    /// Server type code (for example `cx11`).
    pub name: String,
}

/// Registered public SSH key.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct SshKey {
    /// Provider identifier.
    pub id: u64,
    /// Key name.
    pub name: String,
    /// Fingerprint computed by the provider.
    #[serde(default)]
    pub fingerprint: String,
}

/// Server lifecycle status as reported by the provider.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(from = "String")]
pub enum ServerStatus {
    /// Server is being created.
    Initializing,
    /// Server is booting.
    Starting,
    /// Server is up.
    Running,
    /// Server is shutting down.
    Stopping,
    /// Server is powered off.
    Off,
    /// Server is being deleted.
    Deleting,
    /// Server is moving between hosts.
    Migrating,
    /// Server is being rebuilt from an image.
    Rebuilding,
    /// Status the provider itself cannot determine, or one this client does
    /// not know.
    Unknown,
}

impl From<String> for ServerStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "initializing" => Self::Initializing,
            "starting" => Self::Starting,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "off" => Self::Off,
            "deleting" => Self::Deleting,
            "migrating" => Self::Migrating,
            "rebuilding" => Self::Rebuilding,
            _ => Self::Unknown,
        }
    }
}

/// Public IPv4 assignment of a server.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Ipv4Assignment {
    /// Assigned address.
    pub ip: Ipv4Addr,
}

/// Public network configuration of a server.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct PublicNet {
    /// Primary IPv4, absent for IPv6-only servers.
    #[serde(default)]
    pub ipv4: Option<Ipv4Assignment>,
}

/// Server resource.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Server {
    /// Provider identifier.
    pub id: u64,
    /// Server name.
    pub name: String,
    /// Current lifecycle status.
    pub status: ServerStatus,
    /// Public network configuration.
    #[serde(default)]
    pub public_net: PublicNet,
}

impl Server {
    /// Returns the public IPv4 address, if one is assigned.
    #[must_use]
    pub fn public_ipv4(&self) -> Option<Ipv4Addr> {
        self.public_net.ipv4.as_ref().map(|assignment| assignment.ip)
    }
}

/// Progress of a provider action.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(from = "String")]
pub enum ActionStatus {
    /// Action is still in flight.
    Running,
    /// Action completed successfully.
    Success,
    /// Action failed; see [`Action::error`].
    Error,
    /// Status this client does not know; treated as still pending.
    Unknown,
}

impl From<String> for ActionStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "running" => Self::Running,
            "success" => Self::Success,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// Error detail attached to a failed action.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ActionError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Asynchronous operation tracked by the provider.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Action {
    /// Provider identifier.
    pub id: u64,
    /// Command that started the action (for example `start_server`).
    pub command: String,
    /// Current status.
    pub status: ActionStatus,
    /// Completion percentage reported by the provider.
    #[serde(default)]
    pub progress: u8,
    /// Failure detail, present when `status` is `error`.
    #[serde(default)]
    pub error: Option<ActionError>,
}

/// Payload for registering a public SSH key.
#[derive(Clone, Debug, Serialize, Eq, PartialEq)]
pub struct CreateSshKeyRequest {
    /// Key name, unique per project.
    pub name: String,
    /// OpenSSH formatted public key.
    pub public_key: String,
}

/// Payload for creating a server.
#[derive(Clone, Debug, Serialize, Eq, PartialEq)]
pub struct CreateServerRequest {
    /// Server name.
    pub name: String,
    /// Server type identifier or name.
    pub server_type: String,
    /// Image identifier or name.
    pub image: String,
    /// Location identifier or name.
    pub location: String,
    /// SSH key identifiers injected at first boot.
    pub ssh_keys: Vec<u64>,
    /// Whether the provider should boot the server once created.
    pub start_after_create: bool,
}

/// Server creation result.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct CreatedServer {
    /// The newly created server.
    pub server: Server,
    /// Action tracking the creation.
    pub action: Action,
}
