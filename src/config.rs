//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::wait::WaitContext;

/// Image requested when no override is configured.
pub const DEFAULT_IMAGE: &str = "debian-9";
/// Location (data-centre code) requested when no override is configured.
pub const DEFAULT_LOCATION: &str = "fsn1";
/// Server type requested when no override is configured.
pub const DEFAULT_SERVER_TYPE: &str = "cx11";
/// Public Hetzner Cloud API endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://api.hetzner.cloud/v1";
/// SSH user provisioned by Hetzner images.
pub const DEFAULT_SSH_USER: &str = "root";
/// SSH port exposed by freshly created servers.
pub const DEFAULT_SSH_PORT: u16 = 22;
/// Seconds slept between provider status polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;

/// Hetzner specific configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HETZNER",
    discovery(
        app_name = "hetzner-machine",
        env_var = "HETZNER_MACHINE_CONFIG_PATH",
        config_file_name = "hetzner-machine.toml",
        dotfile_name = ".hetzner-machine.toml",
        project_file_name = "hetzner-machine.toml"
    )
)]
pub struct HetznerConfig {
    /// API token used for bearer authentication. This value is required.
    #[ortho_config(default = String::new())]
    pub access_token: String,
    /// Image name (for example `debian-9`).
    #[ortho_config(default = DEFAULT_IMAGE.to_owned())]
    pub image: String,
    /// Location name (for example `fsn1`).
    #[ortho_config(default = DEFAULT_LOCATION.to_owned())]
    pub location: String,
    /// Server type name (for example `cx11`).
    #[ortho_config(default = DEFAULT_SERVER_TYPE.to_owned())]
    pub server_type: String,
    /// Base URL of the Hetzner Cloud API.
    #[ortho_config(default = DEFAULT_API_ENDPOINT.to_owned())]
    pub api_endpoint: String,
    /// Remote user the orchestrator connects as.
    #[ortho_config(default = DEFAULT_SSH_USER.to_owned())]
    pub ssh_user: String,
    /// Remote SSH port.
    #[ortho_config(default = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,
    /// Seconds between status polls while waiting on the provider.
    #[ortho_config(default = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval_secs: u64,
    /// Optional upper bound for a single wait. When unset, waits only end on
    /// a terminal provider status, a query error, or cancellation.
    pub wait_timeout_secs: Option<u64>,
    /// Delete the registered SSH key (and any created server) when
    /// provisioning fails part way through.
    #[ortho_config(default = false)]
    pub cleanup_on_failure: bool,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl HetznerConfig {
    /// Builds a configuration with every optional field at its default.
    #[must_use]
    pub fn with_access_token(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            image: DEFAULT_IMAGE.to_owned(),
            location: DEFAULT_LOCATION.to_owned(),
            server_type: DEFAULT_SERVER_TYPE.to_owned(),
            api_endpoint: DEFAULT_API_ENDPOINT.to_owned(),
            ssh_user: DEFAULT_SSH_USER.to_owned(),
            ssh_port: DEFAULT_SSH_PORT,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            wait_timeout_secs: None,
            cleanup_on_failure: false,
        }
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to hetzner-machine.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("hetzner-machine")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a numeric field is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.access_token,
            &FieldMetadata::new("Hetzner API access token", "HETZNER_ACCESS_TOKEN", "access_token"),
        )?;
        Self::require_field(
            &self.image,
            &FieldMetadata::new("server image", "HETZNER_IMAGE", "image"),
        )?;
        Self::require_field(
            &self.location,
            &FieldMetadata::new("server location", "HETZNER_LOCATION", "location"),
        )?;
        Self::require_field(
            &self.server_type,
            &FieldMetadata::new("server type", "HETZNER_SERVER_TYPE", "server_type"),
        )?;
        Self::require_field(
            &self.api_endpoint,
            &FieldMetadata::new("API endpoint", "HETZNER_API_ENDPOINT", "api_endpoint"),
        )?;
        Self::require_field(
            &self.ssh_user,
            &FieldMetadata::new("SSH user", "HETZNER_SSH_USER", "ssh_user"),
        )?;
        if self.ssh_port == 0 {
            return Err(ConfigError::Invalid(String::from(
                "ssh_port must be between 1 and 65535",
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "poll_interval_secs must be at least 1",
            )));
        }
        Ok(())
    }

    /// Builds the wait context used by every poll loop.
    #[must_use]
    pub fn wait_context(&self) -> WaitContext {
        let context = WaitContext::new(Duration::from_secs(self.poll_interval_secs));
        match self.wait_timeout_secs {
            Some(secs) => context.with_timeout(Duration::from_secs(secs)),
            None => context,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value outside its accepted range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
