//! Shared HTTP client, error taxonomy, and request helpers for the CLI.

use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use maestro_config::{ConfigError, Credential, CredentialStore};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";
pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// CLI-level error taxonomy. Every failure a command can surface maps to one variant.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    #[error("no credential found for context '{context}', probably you should login")]
    ConfigMissing { context: String },
    #[error("request to {url} failed")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} returned status {status}")]
    RemoteStatus {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("invalid oauth state, expected '{expected}', got '{received}'")]
    OAuthStateMismatch { expected: String, received: String },
    #[error("invalid operation key '{key}': expected <action>:<scheduler>[:<id>]")]
    InvalidOperationKey { key: String },
    #[error("failed to decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("credential store failure")]
    Config(#[source] ConfigError),
    #[error("failed to bind callback listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("callback listener failed")]
    Serve(#[source] io::Error),
    #[error("failed to open browser for {url}")]
    Browser {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("callback listener stopped before the login redirect arrived")]
    CallbackAbandoned,
    #[error("operation {key} failed: {reason}")]
    OperationFailed { key: String, reason: String },
    #[error("operation tracking cancelled")]
    Cancelled,
    #[error("operation {key} did not finish within {}s", after.as_secs())]
    DeadlineExceeded { key: String, after: Duration },
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) | Self::InvalidOperationKey { .. } => 2,
            _ => 3,
        }
    }

    /// Message printed to the operator, including the chain of underlying causes.
    pub(crate) fn display_message(&self) -> String {
        if let Self::Failure(error) = self {
            return format!("{error:#}");
        }
        let mut message = self.to_string();
        let mut cause = self.source();
        while let Some(err) = cause {
            message.push_str(": ");
            message.push_str(&err.to_string());
            cause = err.source();
        }
        message
    }
}

impl From<ConfigError> for CliError {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::CredentialMissing { context, .. } => Self::ConfigMissing { context },
            ConfigError::InvalidContext { .. } => Self::Validation(error.to_string()),
            other => Self::Config(other),
        }
    }
}

/// Dependencies constructed from CLI options.
#[derive(Clone)]
pub(crate) struct CliDependencies {
    pub(crate) client: Client,
}

impl CliDependencies {
    /// Construct the shared HTTP client carrying the per-invocation trace id.
    pub(crate) fn new(timeout_secs: u64, trace_id: &str) -> CliResult<Self> {
        let mut default_headers = HeaderMap::new();
        let request_id = HeaderValue::from_str(trace_id).map_err(|_| {
            CliError::failure(anyhow!("trace identifier contains invalid characters"))
        })?;
        default_headers.insert(HEADER_REQUEST_ID, request_id);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|err| CliError::failure(anyhow!("failed to build HTTP client: {err}")))?;

        Ok(Self { client })
    }
}

/// Application context passed to command handlers.
#[derive(Clone)]
pub(crate) struct AppContext {
    pub(crate) client: Client,
    pub(crate) context: String,
    pub(crate) store: Arc<dyn CredentialStore>,
}

impl AppContext {
    /// API client authenticated with the credential stored for the active context.
    pub(crate) fn api(&self) -> CliResult<ApiClient> {
        let credential = self.store.load(&self.context)?;
        ApiClient::authenticated(self.client.clone(), credential)
    }
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawResponse {
    pub(crate) url: String,
    pub(crate) status: StatusCode,
    pub(crate) body: String,
}

impl RawResponse {
    /// Body of a 200 response; any other status becomes [`CliError::RemoteStatus`].
    pub(crate) fn into_ok_body(self) -> CliResult<String> {
        if self.status == StatusCode::OK {
            Ok(self.body)
        } else {
            Err(CliError::RemoteStatus {
                url: self.url,
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// HTTP client bound to one remote server, optionally carrying a bearer credential.
#[derive(Clone)]
pub(crate) struct ApiClient {
    http: Client,
    base_url: Url,
    credential: Option<Credential>,
}

impl ApiClient {
    pub(crate) fn anonymous(http: Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            credential: None,
        }
    }

    pub(crate) fn authenticated(http: Client, credential: Credential) -> CliResult<Self> {
        let base_url = parse_server_url(&credential.server_url)?;
        Ok(Self {
            http,
            base_url,
            credential: Some(credential),
        })
    }

    /// Build a URL by appending path segments to the server base URL.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> CliResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                CliError::validation(format!(
                    "server URL '{}' cannot be used as a base",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.credential {
            Some(credential) => builder.header(AUTHORIZATION, credential.bearer()),
            None => builder,
        }
    }

    /// Send a request and collect its status and body, whatever the status.
    pub(crate) async fn execute(&self, method: Method, url: Url) -> CliResult<RawResponse> {
        self.execute_with(self.request(method, url.clone()), url)
            .await
    }

    pub(crate) async fn execute_with(
        &self,
        builder: RequestBuilder,
        url: Url,
    ) -> CliResult<RawResponse> {
        debug!(url = %url, "sending request");
        let response = builder.send().await.map_err(|source| CliError::Network {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|source| CliError::Network {
            url: url.to_string(),
            source,
        })?;
        debug!(url = %url, status = status.as_u16(), "response received");
        Ok(RawResponse {
            url: url.to_string(),
            status,
            body,
        })
    }

    /// `GET` a JSON document, failing on any non-200 status.
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: Url) -> CliResult<T> {
        let response = self.execute(Method::GET, url).await?;
        let target = response.url.clone();
        let body = response.into_ok_body()?;
        decode_json(&target, &body)
    }
}

/// Decode a JSON body, attributing failures to the URL it came from.
pub(crate) fn decode_json<T: DeserializeOwned>(url: &str, body: &str) -> CliResult<T> {
    serde_json::from_str(body).map_err(|source| CliError::Decode {
        url: url.to_string(),
        source,
    })
}

/// Parse a server URL supplied by the operator or read from a stored credential.
pub(crate) fn parse_server_url(input: &str) -> CliResult<Url> {
    let url = input
        .trim()
        .parse::<Url>()
        .map_err(|err| CliError::validation(format!("invalid server URL '{input}': {err}")))?;
    if url.cannot_be_a_base() {
        return Err(CliError::validation(format!(
            "server URL '{input}' cannot be used as a base"
        )));
    }
    Ok(url)
}
