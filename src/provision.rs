//! Instance creation and readiness polling.

use std::net::IpAddr;

use thiserror::Error;
use tracing::{Instrument, debug, info, info_span};

use crate::config::HetznerConfig;
use crate::credential::CredentialHandle;
use crate::hcloud::{CloudApi, CreateServerRequest, ProviderError, Server};
use crate::state::MachineState;
use crate::wait::{Probe, WaitContext, WaitError};

/// Errors raised while creating a server.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// Raised when a lookup or the create call fails.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Raised when the readiness wait is cancelled or times out.
    #[error(transparent)]
    Wait(#[from] WaitError),
    /// Raised when a running server reports no public IPv4 address.
    #[error("server {server_id} is running but has no public IPv4 address")]
    MissingPublicIp {
        /// Provider server id.
        server_id: u64,
    },
}

/// Failed creation attempt, carrying the id of any server already created.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{error}")]
pub struct ProvisionFailure {
    /// Id of the server if the create call was accepted.
    pub server_id: Option<u64>,
    /// Underlying failure.
    #[source]
    pub error: ProvisionError,
}

impl ProvisionFailure {
    const fn before_create(error: ProvisionError) -> Self {
        Self {
            server_id: None,
            error,
        }
    }
}

/// A server observed running with a resolved address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProvisionedInstance {
    /// Provider server id.
    pub server_id: u64,
    /// Public address read from the response that reported running.
    pub address: IpAddr,
}

/// Turns a resolved configuration and credential into a running server.
#[derive(Debug)]
pub struct InstanceProvisioner<'a, A: ?Sized> {
    api: &'a A,
    config: &'a HetznerConfig,
    wait: &'a WaitContext,
}

impl<'a, A> InstanceProvisioner<'a, A>
where
    A: CloudApi + ?Sized,
{
    /// Creates a provisioner using `config` for resource names and `wait`
    /// for readiness pacing.
    #[must_use]
    pub const fn new(api: &'a A, config: &'a HetznerConfig, wait: &'a WaitContext) -> Self {
        Self { api, config, wait }
    }

    /// Creates the server named `machine_name` and waits until it runs.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionFailure`] on the first failing lookup, when the
    /// create call is rejected, or when readiness cannot be established.
    /// `server_id` is set whenever the provider accepted the create call.
    pub async fn create_instance(
        &self,
        machine_name: &str,
        credential: &CredentialHandle,
    ) -> Result<ProvisionedInstance, ProvisionFailure> {
        let span = info_span!("create_instance", machine = machine_name);
        async {
            let request = self
                .build_request(machine_name, credential)
                .await
                .map_err(ProvisionFailure::before_create)?;

            let created = self
                .api
                .create_server(&request)
                .await
                .map_err(|err| ProvisionFailure::before_create(err.into()))?;
            let server_id = created.server.id;
            info!(server_id, action_id = created.action.id, "server create accepted");

            let address = self
                .await_running(server_id)
                .await
                .map_err(|error| ProvisionFailure {
                    server_id: Some(server_id),
                    error,
                })?;
            info!(server_id, %address, "server running");
            Ok(ProvisionedInstance { server_id, address })
        }
        .instrument(span)
        .await
    }

    async fn build_request(
        &self,
        machine_name: &str,
        credential: &CredentialHandle,
    ) -> Result<CreateServerRequest, ProvisionError> {
        let key = self.api.ssh_key_by_id(credential.key_id).await?;
        let image = self.api.image_by_name(&self.config.image).await?;
        let location = self.api.location_by_name(&self.config.location).await?;
        let server_type = self
            .api
            .server_type_by_name(&self.config.server_type)
            .await?;
        debug!(
            ssh_key = key.id,
            image = image.id,
            location = %location.name,
            server_type = %server_type.name,
            "resolved server resources"
        );

        Ok(CreateServerRequest {
            name: machine_name.to_owned(),
            server_type: server_type.id.to_string(),
            image: image.id.to_string(),
            location: location.id.to_string(),
            ssh_keys: vec![key.id],
            start_after_create: true,
        })
    }

    /// Polls the server until its status maps to running and returns the
    /// address from that same response.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when a poll fails, the wait ends early, or
    /// the running server has no IPv4 address.
    pub async fn await_running(&self, server_id: u64) -> Result<IpAddr, ProvisionError> {
        let api = self.api;
        self.wait
            .poll_until(&format!("server {server_id} running"), move || async move {
                let server = api.server_by_id(server_id).await?;
                running_address(&server)
            })
            .await
    }
}

fn running_address(server: &Server) -> Result<Probe<IpAddr>, ProvisionError> {
    let state = MachineState::from(server.status);
    if state != MachineState::Running {
        debug!(server_id = server.id, ?state, "server not running yet");
        return Ok(Probe::Pending);
    }
    server
        .public_ipv4()
        .map(|ip| Probe::Ready(IpAddr::V4(ip)))
        .ok_or(ProvisionError::MissingPublicIp {
            server_id: server.id,
        })
}
