//! Typed access to the Hetzner Cloud API.
//!
//! [`CloudApi`] is the seam the driver is written against; [`HetznerClient`]
//! implements it over HTTPS. Every call goes to the provider: nothing is
//! cached, so results always reflect the current remote state.

mod error;
mod types;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::HetznerConfig;

pub use error::ProviderError;
pub use types::{
    Action, ActionError, ActionStatus, CreateServerRequest, CreateSshKeyRequest, CreatedServer,
    Image, Ipv4Assignment, Location, PublicNet, Server, ServerStatus, ServerType, SshKey,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("hetzner-machine/", env!("CARGO_PKG_VERSION"));

/// Future returned by [`CloudApi`] operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Power transitions a server accepts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerAction {
    /// Boot a stopped server.
    PowerOn,
    /// Cut power immediately.
    PowerOff,
    /// Soft reboot through ACPI.
    Reboot,
    /// Graceful ACPI shutdown.
    Shutdown,
}

impl PowerAction {
    /// Path segment of the action endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PowerOn => "poweron",
            Self::PowerOff => "poweroff",
            Self::Reboot => "reboot",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Operations the driver needs from the cloud provider.
pub trait CloudApi: Send + Sync {
    /// Resolves an image by its unique name.
    fn image_by_name<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Image>;

    /// Resolves a location by its code.
    fn location_by_name<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Location>;

    /// Resolves a server type by its code.
    fn server_type_by_name<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ServerType>;

    /// Fetches a registered SSH key.
    fn ssh_key_by_id(&self, id: u64) -> ApiFuture<'_, SshKey>;

    /// Fetches a server.
    fn server_by_id(&self, id: u64) -> ApiFuture<'_, Server>;

    /// Fetches the current state of an action.
    fn action_by_id(&self, id: u64) -> ApiFuture<'_, Action>;

    /// Registers a public SSH key.
    fn create_ssh_key<'a>(&'a self, request: &'a CreateSshKeyRequest) -> ApiFuture<'a, SshKey>;

    /// Deletes a registered SSH key.
    fn delete_ssh_key(&self, id: u64) -> ApiFuture<'_, ()>;

    /// Submits a server creation request.
    fn create_server<'a>(
        &'a self,
        request: &'a CreateServerRequest,
    ) -> ApiFuture<'a, CreatedServer>;

    /// Submits a server deletion and returns the tracking action.
    fn delete_server(&self, id: u64) -> ApiFuture<'_, Action>;

    /// Submits a power transition and returns the tracking action.
    fn power(&self, id: u64, action: PowerAction) -> ApiFuture<'_, Action>;
}

#[derive(Deserialize)]
struct ImageList {
    images: Vec<Image>,
}

#[derive(Deserialize)]
struct LocationList {
    locations: Vec<Location>,
}

#[derive(Deserialize)]
struct ServerTypeList {
    server_types: Vec<ServerType>,
}

#[derive(Deserialize)]
struct SshKeyEnvelope {
    ssh_key: SshKey,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: Server,
}

#[derive(Deserialize)]
struct ActionEnvelope {
    action: Action,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// HTTPS client for the Hetzner Cloud API authenticated with a bearer token.
#[derive(Clone)]
pub struct HetznerClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl std::fmt::Debug for HetznerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HetznerClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HetznerClient {
    /// Creates a client for `endpoint` using `token` for authentication.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
            token: token.into(),
        }
    }

    /// Creates a client from the endpoint and token in `config`.
    #[must_use]
    pub fn from_config(config: &HetznerConfig) -> Self {
        Self::new(&config.api_endpoint, &config.access_token)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{path}", self.endpoint);
        debug!(%method, %url, "hetzner api request");
        self.http.request(method, url).bearer_auth(&self.token)
    }

    async fn send_raw(
        request: reqwest::RequestBuilder,
        resource: &'static str,
        selector: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status.is_success() {
            return Ok(body.to_vec());
        }
        Err(api_error(resource, selector, status, &body))
    }

    async fn send<T: DeserializeOwned>(
        request: reqwest::RequestBuilder,
        resource: &'static str,
        selector: &str,
    ) -> Result<T, ProviderError> {
        let body = Self::send_raw(request, resource, selector).await?;
        serde_json::from_slice(&body).map_err(|err| ProviderError::Decode {
            resource,
            message: err.to_string(),
        })
    }
}

/// Maps a non-success response onto [`ProviderError`].
pub(crate) fn api_error(
    resource: &'static str,
    selector: &str,
    status: StatusCode,
    body: &[u8],
) -> ProviderError {
    if status == StatusCode::NOT_FOUND {
        return ProviderError::NotFound {
            resource,
            selector: selector.to_owned(),
        };
    }
    match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) => ProviderError::Api {
            status: status.as_u16(),
            code: envelope.error.code,
            message: envelope.error.message,
        },
        Err(_) => ProviderError::Api {
            status: status.as_u16(),
            code: String::from("unknown"),
            message: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

fn first_or_not_found<T>(
    items: Vec<T>,
    resource: &'static str,
    selector: &str,
) -> Result<T, ProviderError> {
    items
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::NotFound {
            resource,
            selector: selector.to_owned(),
        })
}

impl CloudApi for HetznerClient {
    fn image_by_name<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Image> {
        Box::pin(async move {
            let request = self.request(Method::GET, "images").query(&[("name", name)]);
            let list: ImageList = Self::send(request, "image", name).await?;
            first_or_not_found(list.images, "image", name)
        })
    }

    fn location_by_name<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Location> {
        Box::pin(async move {
            let request = self
                .request(Method::GET, "locations")
                .query(&[("name", name)]);
            let list: LocationList = Self::send(request, "location", name).await?;
            first_or_not_found(list.locations, "location", name)
        })
    }

    fn server_type_by_name<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ServerType> {
        Box::pin(async move {
            let request = self
                .request(Method::GET, "server_types")
                .query(&[("name", name)]);
            let list: ServerTypeList = Self::send(request, "server type", name).await?;
            first_or_not_found(list.server_types, "server type", name)
        })
    }

    fn ssh_key_by_id(&self, id: u64) -> ApiFuture<'_, SshKey> {
        Box::pin(async move {
            let request = self.request(Method::GET, &format!("ssh_keys/{id}"));
            let envelope: SshKeyEnvelope = Self::send(request, "ssh key", &id.to_string()).await?;
            Ok(envelope.ssh_key)
        })
    }

    fn server_by_id(&self, id: u64) -> ApiFuture<'_, Server> {
        Box::pin(async move {
            let request = self.request(Method::GET, &format!("servers/{id}"));
            let envelope: ServerEnvelope = Self::send(request, "server", &id.to_string()).await?;
            Ok(envelope.server)
        })
    }

    fn action_by_id(&self, id: u64) -> ApiFuture<'_, Action> {
        Box::pin(async move {
            let request = self.request(Method::GET, &format!("actions/{id}"));
            let envelope: ActionEnvelope = Self::send(request, "action", &id.to_string()).await?;
            Ok(envelope.action)
        })
    }

    fn create_ssh_key<'a>(&'a self, request: &'a CreateSshKeyRequest) -> ApiFuture<'a, SshKey> {
        Box::pin(async move {
            let builder = self.request(Method::POST, "ssh_keys").json(request);
            let envelope: SshKeyEnvelope = Self::send(builder, "ssh key", &request.name).await?;
            Ok(envelope.ssh_key)
        })
    }

    fn delete_ssh_key(&self, id: u64) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let request = self.request(Method::DELETE, &format!("ssh_keys/{id}"));
            Self::send_raw(request, "ssh key", &id.to_string()).await?;
            Ok(())
        })
    }

    fn create_server<'a>(
        &'a self,
        request: &'a CreateServerRequest,
    ) -> ApiFuture<'a, CreatedServer> {
        Box::pin(async move {
            let builder = self.request(Method::POST, "servers").json(request);
            Self::send(builder, "server", &request.name).await
        })
    }

    fn delete_server(&self, id: u64) -> ApiFuture<'_, Action> {
        Box::pin(async move {
            let request = self.request(Method::DELETE, &format!("servers/{id}"));
            let envelope: ActionEnvelope = Self::send(request, "server", &id.to_string()).await?;
            Ok(envelope.action)
        })
    }

    fn power(&self, id: u64, action: PowerAction) -> ApiFuture<'_, Action> {
        Box::pin(async move {
            let path = format!("servers/{id}/actions/{}", action.as_str());
            let request = self.request(Method::POST, &path);
            let envelope: ActionEnvelope = Self::send(request, "server", &id.to_string()).await?;
            Ok(envelope.action)
        })
    }
}
