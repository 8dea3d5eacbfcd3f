//! Machine-driver contract and its Hetzner Cloud implementation.
//!
//! [`Driver`] is the surface an orchestrator talks to. [`HetznerDriver`]
//! implements it by composing the credential provisioner, the instance
//! provisioner, and the action waiter. Only the server id, SSH key id, and
//! the address captured at creation are retained; every query re-resolves
//! the server from the provider.

mod error;

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{Instrument, info, info_span, warn};

use crate::config::HetznerConfig;
use crate::credential::{CredentialProvisioner, KeyPairGenerator, SshKeygen};
use crate::hcloud::{CloudApi, HetznerClient, PowerAction};
use crate::provision::InstanceProvisioner;
use crate::state::MachineState;
use crate::store::{DriverState, MachineStore};
use crate::wait::{WaitContext, await_action};

pub use error::DriverError;

/// Name the driver registers under.
pub const DRIVER_NAME: &str = "hetzner";
/// Port of the remote container engine endpoint returned by [`Driver::url`].
pub const ENGINE_PORT: u16 = 2376;

/// Future returned by driver operations.
pub type DriverFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Machine state together with the failure that produced
/// [`MachineState::Error`], if any.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateReport<E> {
    /// Reported state.
    pub state: MachineState,
    /// Lookup failure; set exactly when `state` is [`MachineState::Error`].
    pub error: Option<E>,
}

/// Uniform control surface for a single remote machine.
///
/// Operations other than [`Driver::create`] require a server to exist and
/// fail fast otherwise. Mutating calls take `&mut self`, so one driver is
/// driven by one caller at a time.
pub trait Driver: Send + Sync {
    /// Driver-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Name the driver registers under.
    fn driver_name(&self) -> &'static str;

    /// Checks that creation can be attempted without contacting the provider.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` when the configuration is unusable.
    fn pre_create_check(&self) -> Result<(), Self::Error>;

    /// Provisions the credential and server, returning once it runs.
    fn create(&mut self) -> DriverFuture<'_, (), Self::Error>;

    /// Powers the server on and waits for the action to finish.
    fn start(&self) -> DriverFuture<'_, (), Self::Error>;

    /// Powers the server off and waits for the action to finish.
    fn stop(&self) -> DriverFuture<'_, (), Self::Error>;

    /// Reboots the server and waits for the action to finish.
    fn restart(&self) -> DriverFuture<'_, (), Self::Error>;

    /// Shuts the server down and waits for the action to finish.
    fn kill(&self) -> DriverFuture<'_, (), Self::Error>;

    /// Deletes the server without waiting for the deletion to complete.
    fn remove(&mut self) -> DriverFuture<'_, (), Self::Error>;

    /// Resolves the server and maps its status.
    ///
    /// An `Err` stands for [`MachineState::Error`]; use
    /// [`Driver::state_or_error`] to receive both.
    fn state(&self) -> DriverFuture<'_, MachineState, Self::Error>;

    /// Public address of the server.
    fn ip(&self) -> DriverFuture<'_, IpAddr, Self::Error>;

    /// Remote user for SSH sessions.
    fn ssh_username(&self) -> &str;

    /// Remote SSH port.
    fn ssh_port(&self) -> u16;

    /// Local private key used for SSH sessions.
    fn ssh_key_path(&self) -> &Utf8Path;

    /// Host name for SSH sessions; the public address.
    fn ssh_hostname(&self) -> DriverFuture<'_, String, Self::Error> {
        Box::pin(async move { Ok(self.ip().await?.to_string()) })
    }

    /// Container engine endpoint, `tcp://<ip>:2376`.
    fn url(&self) -> DriverFuture<'_, String, Self::Error> {
        Box::pin(async move {
            let ip = self.ip().await?;
            Ok(format!("tcp://{}", SocketAddr::new(ip, ENGINE_PORT)))
        })
    }

    /// Like [`Driver::state`], but reports a failed lookup as
    /// [`MachineState::Error`] alongside the error itself.
    fn state_or_error(
        &self,
    ) -> Pin<Box<dyn Future<Output = StateReport<Self::Error>> + Send + '_>> {
        Box::pin(async move {
            match self.state().await {
                Ok(state) => StateReport { state, error: None },
                Err(err) => {
                    warn!(error = %err, "state query failed");
                    StateReport {
                        state: MachineState::Error,
                        error: Some(err),
                    }
                }
            }
        })
    }
}

/// Hetzner Cloud machine driver.
#[derive(Debug)]
pub struct HetznerDriver<A = HetznerClient, K = SshKeygen> {
    api: A,
    keygen: K,
    config: HetznerConfig,
    key_path: Utf8PathBuf,
    wait: WaitContext,
    state: DriverState,
}

impl HetznerDriver<HetznerClient, SshKeygen> {
    /// Builds a driver talking to the real API, keeping keys in `store`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Config`] when `config` is invalid and
    /// [`DriverError::Store`] when `machine_name` is unusable.
    pub fn from_config(
        config: HetznerConfig,
        machine_name: &str,
        store: &MachineStore,
    ) -> Result<Self, DriverError> {
        let key_path = store.key_path(machine_name)?;
        let api = HetznerClient::from_config(&config);
        Self::new(
            config,
            machine_name,
            key_path,
            api,
            SshKeygen::with_process_runner(),
        )
    }
}

impl<A, K> HetznerDriver<A, K>
where
    A: CloudApi,
    K: KeyPairGenerator,
{
    /// Builds a driver over explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Config`] when `config` is invalid. Nothing is
    /// sent to the provider in that case.
    pub fn new(
        config: HetznerConfig,
        machine_name: &str,
        key_path: impl Into<Utf8PathBuf>,
        api: A,
        keygen: K,
    ) -> Result<Self, DriverError> {
        config.validate()?;
        let wait = config.wait_context();
        Ok(Self {
            api,
            keygen,
            config,
            key_path: key_path.into(),
            wait,
            state: DriverState::new(machine_name),
        })
    }

    /// Resumes from previously persisted identifiers.
    #[must_use]
    pub fn with_driver_state(mut self, state: DriverState) -> Self {
        self.state = state;
        self
    }

    /// Replaces the wait context, for example to attach a shutdown token.
    #[must_use]
    pub fn with_wait_context(mut self, wait: WaitContext) -> Self {
        self.wait = wait;
        self
    }

    /// Identifiers retained between calls.
    #[must_use]
    pub const fn driver_state(&self) -> &DriverState {
        &self.state
    }

    /// Wait context used by readiness and action polls.
    #[must_use]
    pub const fn wait_context(&self) -> &WaitContext {
        &self.wait
    }

    fn require_server(&self) -> Result<u64, DriverError> {
        self.state.server_id.ok_or_else(|| DriverError::NotCreated {
            machine: self.state.name.clone(),
        })
    }

    async fn create_inner(&mut self) -> Result<(), DriverError> {
        if let Some(server_id) = self.state.server_id {
            return Err(DriverError::AlreadyCreated {
                machine: self.state.name.clone(),
                server_id,
            });
        }
        self.config.validate()?;

        let credential = CredentialProvisioner::new(&self.api, &self.keygen)
            .provision(&self.state.name, &self.key_path, self.state.ssh_key_id)
            .await?;
        self.state.ssh_key_id = Some(credential.key_id);

        let outcome = InstanceProvisioner::new(&self.api, &self.config, &self.wait)
            .create_instance(&self.state.name, &credential)
            .await;
        match outcome {
            Ok(instance) => {
                self.state.server_id = Some(instance.server_id);
                self.state.ip_address = Some(instance.address.to_string());
                Ok(())
            }
            Err(failure) => {
                if self.config.cleanup_on_failure {
                    self.discard_partial(failure.server_id, credential.key_id)
                        .await;
                }
                Err(failure.error.into())
            }
        }
    }

    /// Best-effort removal of what a failed `create` left behind. Failures
    /// are logged and never replace the original error.
    async fn discard_partial(&mut self, server_id: Option<u64>, key_id: u64) {
        if let Some(server_id) = server_id {
            match self.api.delete_server(server_id).await {
                Ok(_) => info!(server_id, "deleted partially provisioned server"),
                Err(err) => warn!(server_id, error = %err, "failed to delete server"),
            }
        }
        match self.api.delete_ssh_key(key_id).await {
            Ok(()) => {
                info!(key_id, "deleted registered ssh key");
                self.state.ssh_key_id = None;
            }
            Err(err) => warn!(key_id, error = %err, "failed to delete ssh key"),
        }
    }

    async fn transition(&self, transition: PowerAction) -> Result<(), DriverError> {
        let server_id = self.require_server()?;
        let server = self.api.server_by_id(server_id).await?;
        let action = self.api.power(server.id, transition).await?;
        info!(
            server_id,
            action_id = action.id,
            transition = transition.as_str(),
            "power action submitted"
        );
        await_action(&self.api, &action, &self.wait).await?;
        Ok(())
    }

    async fn remove_inner(&mut self) -> Result<(), DriverError> {
        let server_id = self.require_server()?;
        let server = self.api.server_by_id(server_id).await?;
        let action = self.api.delete_server(server.id).await?;
        info!(server_id, action_id = action.id, "server deletion submitted");
        self.state.server_id = None;
        self.state.ip_address = None;
        Ok(())
    }

    async fn current_ip(&self) -> Result<IpAddr, DriverError> {
        let server_id = self.require_server()?;
        if let Some(ip) = self
            .state
            .ip_address
            .as_deref()
            .and_then(|raw| raw.parse::<IpAddr>().ok())
        {
            return Ok(ip);
        }
        let server = self.api.server_by_id(server_id).await?;
        server
            .public_ipv4()
            .map(IpAddr::V4)
            .ok_or(DriverError::MissingPublicIp { server_id })
    }
}

impl<A, K> Driver for HetznerDriver<A, K>
where
    A: CloudApi,
    K: KeyPairGenerator,
{
    type Error = DriverError;

    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn pre_create_check(&self) -> Result<(), DriverError> {
        self.config.validate()?;
        Ok(())
    }

    fn create(&mut self) -> DriverFuture<'_, (), DriverError> {
        let span = info_span!("create", machine = %self.state.name);
        Box::pin(self.create_inner().instrument(span))
    }

    fn start(&self) -> DriverFuture<'_, (), DriverError> {
        Box::pin(self.transition(PowerAction::PowerOn))
    }

    fn stop(&self) -> DriverFuture<'_, (), DriverError> {
        Box::pin(self.transition(PowerAction::PowerOff))
    }

    fn restart(&self) -> DriverFuture<'_, (), DriverError> {
        Box::pin(self.transition(PowerAction::Reboot))
    }

    fn kill(&self) -> DriverFuture<'_, (), DriverError> {
        Box::pin(self.transition(PowerAction::Shutdown))
    }

    fn remove(&mut self) -> DriverFuture<'_, (), DriverError> {
        Box::pin(self.remove_inner())
    }

    fn state(&self) -> DriverFuture<'_, MachineState, DriverError> {
        Box::pin(async move {
            let server_id = self.require_server()?;
            let server = self.api.server_by_id(server_id).await?;
            Ok(MachineState::from(server.status))
        })
    }

    fn ip(&self) -> DriverFuture<'_, IpAddr, DriverError> {
        Box::pin(self.current_ip())
    }

    fn ssh_username(&self) -> &str {
        &self.config.ssh_user
    }

    fn ssh_port(&self) -> u16 {
        self.config.ssh_port
    }

    fn ssh_key_path(&self) -> &Utf8Path {
        &self.key_path
    }
}
