//! Machine driver for Hetzner Cloud.
//!
//! The crate provisions a single Hetzner Cloud server, registers an SSH key
//! for it, and exposes the lifecycle (create, start, stop, restart, kill,
//! remove) plus state and address queries through the [`Driver`] trait.

pub mod command;
pub mod config;
pub mod credential;
pub mod driver;
pub(crate) mod fs;
pub mod hcloud;
pub mod provision;
pub mod state;
pub mod store;
pub mod test_support;
pub mod wait;

pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, HetznerConfig};
pub use credential::{
    CredentialError, CredentialHandle, CredentialProvisioner, KeyPairGenerator, SshKeygen,
};
pub use driver::{
    DRIVER_NAME, Driver, DriverError, DriverFuture, ENGINE_PORT, HetznerDriver, StateReport,
};
pub use hcloud::{CloudApi, HetznerClient, PowerAction, ProviderError};
pub use provision::{InstanceProvisioner, ProvisionError, ProvisionFailure, ProvisionedInstance};
pub use state::MachineState;
pub use store::{DriverState, MachineStore, StoreError};
pub use wait::{Probe, WaitContext, WaitError, await_action};
