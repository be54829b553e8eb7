//! Interactive credential acquisition.
//!
//! # Design
//! - One [`LoginAttempt`] per invocation; its nonce is generated fresh and never persisted.
//! - The login URL is fetched before the callback listener is bound, and the
//!   listener is bound before the browser opens.
//! - A credential is written only after the state check and the code exchange
//!   have both succeeded.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use maestro_config::{Credential, CredentialStore, validate_context};
use reqwest::{Client, Method, Url};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cli::LoginArgs;
use crate::client::{AppContext, ApiClient, CliError, CliResult, decode_json, parse_server_url};
use crate::commands::callback::{CallbackListener, CallbackResult};

pub(crate) const DEFAULT_CALLBACK_ADDR: &str = "127.0.0.1:57460";

/// State of a single login invocation.
#[derive(Debug, Clone)]
pub(crate) struct LoginAttempt {
    nonce: String,
    server_url: String,
    listen_addr: SocketAddr,
}

impl LoginAttempt {
    pub(crate) fn new(server_url: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            nonce: Uuid::new_v4().simple().to_string(),
            server_url: server_url.into(),
            listen_addr,
        }
    }

    pub(crate) fn nonce(&self) -> &str {
        &self.nonce
    }

    pub(crate) fn server_url(&self) -> &str {
        &self.server_url
    }

    pub(crate) const fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }
}

/// Opens a URL for the operator.
pub(crate) trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> io::Result<()>;
}

/// Launches the operator's default browser.
pub(crate) struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        open::that(url)
    }
}

#[derive(Debug, Deserialize)]
struct LoginUrlResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct AccessResponse {
    token: String,
}

/// Orchestrates a login attempt from nonce generation to credential persistence.
pub(crate) struct CredentialBroker {
    http: Client,
    store: Arc<dyn CredentialStore>,
    browser: Arc<dyn BrowserLauncher>,
    listen_addr: SocketAddr,
}

impl CredentialBroker {
    pub(crate) fn new(
        http: Client,
        store: Arc<dyn CredentialStore>,
        browser: Arc<dyn BrowserLauncher>,
        listen_addr: SocketAddr,
    ) -> Self {
        Self {
            http,
            store,
            browser,
            listen_addr,
        }
    }

    /// Run a full login against `server_url` and persist the credential under `context`.
    pub(crate) async fn perform(&self, server_url: &str, context: &str) -> CliResult<Credential> {
        self.run_attempt(LoginAttempt::new(server_url, self.listen_addr), context)
            .await
    }

    pub(crate) async fn run_attempt(
        &self,
        attempt: LoginAttempt,
        context: &str,
    ) -> CliResult<Credential> {
        validate_context(context)?;
        let api = ApiClient::anonymous(self.http.clone(), parse_server_url(attempt.server_url())?);

        let login_url = request_login_url(&api, attempt.nonce()).await?;

        let listener = CallbackListener::bind(attempt.listen_addr()).await?;
        info!(addr = %listener.local_addr(), "callback listener bound");

        println!("Opening {login_url} in your browser");
        self.browser
            .open(&login_url)
            .map_err(|source| CliError::Browser {
                url: login_url.clone(),
                source,
            })?;
        info!("browser opened for login");

        listener
            .serve_once(|callback| self.complete_exchange(&api, &attempt, context, callback))
            .await
    }

    /// Validate the callback against the attempt, exchange the code, and persist.
    pub(crate) async fn complete_exchange(
        &self,
        api: &ApiClient,
        attempt: &LoginAttempt,
        context: &str,
        callback: CallbackResult,
    ) -> CliResult<Credential> {
        if callback.state != attempt.nonce() {
            warn!("login callback state does not match this attempt");
            return Err(CliError::OAuthStateMismatch {
                expected: attempt.nonce().to_string(),
                received: callback.state,
            });
        }

        let token = exchange_code(api, &callback.code).await?;
        let credential = Credential::new(attempt.server_url(), token);
        self.store.save(context, &credential)?;
        info!(context, "credential stored");
        Ok(credential)
    }
}

async fn request_login_url(api: &ApiClient, nonce: &str) -> CliResult<String> {
    let mut url = api.endpoint(&["login"])?;
    url.query_pairs_mut().append_pair("state", nonce);
    let response = api.execute(Method::GET, url).await?;
    let target = response.url.clone();
    let body = response.into_ok_body()?;
    let decoded: LoginUrlResponse = decode_json(&target, &body)?;
    Ok(decoded.url)
}

async fn exchange_code(api: &ApiClient, code: &str) -> CliResult<String> {
    let mut url: Url = api.endpoint(&["access"])?;
    url.query_pairs_mut().append_pair("code", code);
    let decoded: AccessResponse = api.get_json(url).await?;
    Ok(decoded.token)
}

pub(crate) async fn handle_login(ctx: &AppContext, args: LoginArgs) -> CliResult<()> {
    let listen_addr = args
        .listen
        .parse::<SocketAddr>()
        .map_err(|err| CliError::validation(format!("invalid listen address '{}': {err}", args.listen)))?;
    let broker = CredentialBroker::new(
        ctx.client.clone(),
        Arc::clone(&ctx.store),
        Arc::new(SystemBrowser),
        listen_addr,
    );
    let credential = broker.perform(&args.server_url, &ctx.context).await?;
    println!(
        "Logged in to {} (context '{}')",
        credential.server_url, ctx.context
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::Result;
    use httpmock::prelude::*;
    use maestro_config::{ConfigError, ConfigResult};
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<HashMap<String, Credential>>,
        saves: AtomicUsize,
    }

    impl MemoryStore {
        fn with(context: &str, credential: Credential) -> Self {
            let store = Self::default();
            store
                .records
                .lock()
                .expect("store lock")
                .insert(context.to_string(), credential);
            store
        }

        fn get(&self, context: &str) -> Option<Credential> {
            self.records.lock().expect("store lock").get(context).cloned()
        }
    }

    impl CredentialStore for MemoryStore {
        fn load(&self, context: &str) -> ConfigResult<Credential> {
            self.get(context)
                .ok_or_else(|| ConfigError::CredentialMissing {
                    context: context.to_string(),
                    path: format!("memory/{context}").into(),
                })
        }

        fn save(&self, context: &str, credential: &Credential) -> ConfigResult<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.records
                .lock()
                .expect("store lock")
                .insert(context.to_string(), credential.clone());
            Ok(())
        }
    }

    struct FailingBrowser;

    impl BrowserLauncher for FailingBrowser {
        fn open(&self, _url: &str) -> io::Result<()> {
            Err(io::Error::other("no display"))
        }
    }

    /// Follows the redirect itself by hitting the callback with a fixed query.
    struct RedirectingBrowser {
        callback: String,
        opened: Mutex<Option<String>>,
        page: Mutex<Option<oneshot::Sender<String>>>,
    }

    impl RedirectingBrowser {
        fn new(callback: String) -> (Self, oneshot::Receiver<String>) {
            let (tx, rx) = oneshot::channel();
            let browser = Self {
                callback,
                opened: Mutex::new(None),
                page: Mutex::new(Some(tx)),
            };
            (browser, rx)
        }
    }

    impl BrowserLauncher for RedirectingBrowser {
        fn open(&self, url: &str) -> io::Result<()> {
            *self.opened.lock().expect("opened lock") = Some(url.to_string());
            let target = self.callback.clone();
            let reply = self.page.lock().expect("page lock").take();
            tokio::spawn(async move {
                let page = match reqwest::get(target).await {
                    Ok(response) => response.text().await.unwrap_or_default(),
                    Err(err) => err.to_string(),
                };
                if let Some(reply) = reply {
                    let _ = reply.send(page);
                }
            });
            Ok(())
        }
    }

    fn free_addr() -> Result<SocketAddr> {
        let probe = std::net::TcpListener::bind("127.0.0.1:0")?;
        Ok(probe.local_addr()?)
    }

    fn broker(
        store: Arc<MemoryStore>,
        browser: Arc<dyn BrowserLauncher>,
        addr: SocketAddr,
    ) -> CredentialBroker {
        CredentialBroker::new(Client::new(), store, browser, addr)
    }

    #[tokio::test]
    async fn state_mismatch_never_exchanges_or_saves() -> Result<()> {
        let server = MockServer::start_async().await;
        let access = server.mock(|when, then| {
            when.method(GET).path("/access");
            then.status(200).body(r#"{"token":"T1"}"#);
        });
        let prior = Credential::new("https://old.example.com", "old-token");
        let store = Arc::new(MemoryStore::with("prod", prior.clone()));
        let broker = broker(store.clone(), Arc::new(FailingBrowser), free_addr()?);
        let api = ApiClient::anonymous(Client::new(), server.base_url().parse()?);
        let attempt = LoginAttempt::new(server.base_url(), free_addr()?);

        let err = broker
            .complete_exchange(
                &api,
                &attempt,
                "prod",
                CallbackResult {
                    state: "forged".into(),
                    code: "abc".into(),
                },
            )
            .await
            .expect_err("mismatch must fail");

        assert_eq!(
            err.display_message(),
            format!(
                "invalid oauth state, expected '{}', got 'forged'",
                attempt.nonce()
            )
        );
        assert_eq!(access.calls(), 0);
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
        assert_eq!(store.get("prod"), Some(prior));
        Ok(())
    }

    #[tokio::test]
    async fn matching_state_stores_exchanged_token_for_context_only() -> Result<()> {
        let server = MockServer::start_async().await;
        let access = server.mock(|when, then| {
            when.method(GET).path("/access").query_param("code", "abc");
            then.status(200).body(r#"{"token":"T1"}"#);
        });
        let other = Credential::new("https://staging.example.com", "staging-token");
        let store = Arc::new(MemoryStore::with("staging", other.clone()));
        let broker = broker(store.clone(), Arc::new(FailingBrowser), free_addr()?);
        let api = ApiClient::anonymous(Client::new(), server.base_url().parse()?);
        let attempt = LoginAttempt::new(server.base_url(), free_addr()?);

        let credential = broker
            .complete_exchange(
                &api,
                &attempt,
                "prod",
                CallbackResult {
                    state: attempt.nonce().to_string(),
                    code: "abc".into(),
                },
            )
            .await?;

        let expected = Credential::new(server.base_url(), "T1");
        assert_eq!(credential, expected);
        assert_eq!(store.get("prod"), Some(expected));
        assert_eq!(store.get("staging"), Some(other));
        access.assert();
        Ok(())
    }

    #[tokio::test]
    async fn failed_exchange_keeps_prior_credential() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/access");
            then.status(403).body(r#"{"error":"email not allowed"}"#);
        });
        let prior = Credential::new("https://old.example.com", "old-token");
        let store = Arc::new(MemoryStore::with("prod", prior.clone()));
        let broker = broker(store.clone(), Arc::new(FailingBrowser), free_addr()?);
        let api = ApiClient::anonymous(Client::new(), server.base_url().parse()?);
        let attempt = LoginAttempt::new(server.base_url(), free_addr()?);

        let err = broker
            .complete_exchange(
                &api,
                &attempt,
                "prod",
                CallbackResult {
                    state: attempt.nonce().to_string(),
                    code: "abc".into(),
                },
            )
            .await
            .expect_err("403 must fail");

        assert!(matches!(err, CliError::RemoteStatus { .. }));
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
        assert_eq!(store.get("prod"), Some(prior));
        Ok(())
    }

    #[tokio::test]
    async fn login_url_failure_never_binds_listener() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/login");
            then.status(500).body("boom");
        });
        let addr = free_addr()?;
        let store = Arc::new(MemoryStore::default());
        let broker = broker(store.clone(), Arc::new(FailingBrowser), addr);

        let err = broker
            .perform(&server.base_url(), "prod")
            .await
            .expect_err("500 must fail");

        assert!(matches!(err, CliError::RemoteStatus { .. }));
        assert!(std::net::TcpListener::bind(addr).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn browser_failure_is_fatal() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/login").query_param_exists("state");
            then.status(200).body(r#"{"url":"https://accounts.example.com/auth"}"#);
        });
        let store = Arc::new(MemoryStore::default());
        let broker = broker(store.clone(), Arc::new(FailingBrowser), free_addr()?);

        let err = broker
            .perform(&server.base_url(), "prod")
            .await
            .expect_err("browser failure must fail");

        assert!(matches!(err, CliError::Browser { ref url, .. } if url == "https://accounts.example.com/auth"));
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn full_attempt_round_trips_through_listener() -> Result<()> {
        let server = MockServer::start_async().await;
        let addr = free_addr()?;
        let attempt = LoginAttempt::new(server.base_url(), addr);
        let nonce = attempt.nonce().to_string();
        let login = server.mock(|when, then| {
            when.method(GET).path("/login").query_param("state", nonce.as_str());
            then.status(200).body(r#"{"url":"https://accounts.example.com/auth"}"#);
        });
        let access = server.mock(|when, then| {
            when.method(GET).path("/access").query_param("code", "granted");
            then.status(200).body(r#"{"token":"T1"}"#);
        });
        let (browser, page) = RedirectingBrowser::new(format!(
            "http://{addr}/google-callback?state={nonce}&code=granted"
        ));
        let browser = Arc::new(browser);
        let store = Arc::new(MemoryStore::default());
        let broker = broker(store.clone(), browser.clone(), addr);

        let credential = broker.run_attempt(attempt, "prod").await?;

        assert_eq!(credential.token, "T1");
        assert_eq!(store.get("prod"), Some(Credential::new(server.base_url(), "T1")));
        assert_eq!(
            browser.opened.lock().expect("opened lock").as_deref(),
            Some("https://accounts.example.com/auth")
        );
        assert!(page.await?.contains("Thanks for logging in"));
        login.assert();
        access.assert();
        Ok(())
    }

    #[tokio::test]
    async fn forged_redirect_through_listener_renders_unauthorized() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/login");
            then.status(200).body(r#"{"url":"https://accounts.example.com/auth"}"#);
        });
        let access = server.mock(|when, then| {
            when.method(GET).path("/access");
            then.status(200).body(r#"{"token":"T1"}"#);
        });
        let addr = free_addr()?;
        let (browser, page) =
            RedirectingBrowser::new(format!("http://{addr}/callback?state=forged&code=x"));
        let store = Arc::new(MemoryStore::default());
        let broker = broker(store.clone(), Arc::new(browser), addr);

        let err = broker
            .perform(&server.base_url(), "prod")
            .await
            .expect_err("forged state must fail");

        assert!(matches!(err, CliError::OAuthStateMismatch { ref received, .. } if received == "forged"));
        assert!(page.await?.contains("Unauthorized"));
        assert_eq!(access.calls(), 0);
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_context_is_rejected_before_any_request() -> Result<()> {
        let server = MockServer::start_async().await;
        let login = server.mock(|when, then| {
            when.method(GET).path("/login");
            then.status(200).body(r#"{"url":"https://accounts.example.com/auth"}"#);
        });
        let broker = broker(
            Arc::new(MemoryStore::default()),
            Arc::new(FailingBrowser),
            free_addr()?,
        );

        let err = broker
            .perform(&server.base_url(), "../etc")
            .await
            .expect_err("invalid context");

        assert!(matches!(err, CliError::Validation(_)));
        assert_eq!(login.calls(), 0);
        Ok(())
    }
}
