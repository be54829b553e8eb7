//! Single-use local HTTP endpoint receiving the identity broker's redirect.
//!
//! The handler never stops the server itself. It forwards the redirect
//! parameters together with a reply channel to the owner of the listener,
//! waits for the page to render, and the owner shuts the server down once it
//! has an outcome.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{CliError, CliResult};

const SUCCESS_PAGE: &str = r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8">
  <title>Maestro</title>
</head>
<body>
  <h1>Thanks for logging in</h1>
  You can go back to your terminal
</body>
</html>
"#;

const UNAUTHORIZED_PAGE: &str = r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8">
  <title>Maestro</title>
</head>
<body>
  <h1>Unauthorized</h1>
  Your email is not authorized to use Maestro
</body>
</html>
"#;

/// Parameters carried by the redirect. Missing values decode as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct CallbackResult {
    #[serde(default)]
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) code: String,
}

/// Page shown in the browser once the attempt has an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallbackPage {
    Success,
    Unauthorized,
}

impl CallbackPage {
    const fn html(self) -> &'static str {
        match self {
            Self::Success => SUCCESS_PAGE,
            Self::Unauthorized => UNAUTHORIZED_PAGE,
        }
    }
}

type Delivery = (CallbackResult, oneshot::Sender<CallbackPage>);

struct CallbackState {
    deliver: Mutex<Option<oneshot::Sender<Delivery>>>,
}

/// Bound callback listener, owned by one login attempt.
pub(crate) struct CallbackListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl CallbackListener {
    /// Bind the listener. An address already in use fails the attempt.
    pub(crate) async fn bind(addr: SocketAddr) -> CliResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| CliError::Bind { addr, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| CliError::Bind { addr, source })?;
        Ok(Self { listener, addr })
    }

    pub(crate) const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until exactly one redirect has been handled by `on_callback`.
    ///
    /// A successful outcome renders the success page; any error renders the
    /// unauthorized page. The server is shut down gracefully before returning.
    pub(crate) async fn serve_once<T, F, Fut>(self, on_callback: F) -> CliResult<T>
    where
        F: FnOnce(CallbackResult) -> Fut,
        Fut: Future<Output = CliResult<T>>,
    {
        let (deliver_tx, deliver_rx) = oneshot::channel::<Delivery>();
        let state = Arc::new(CallbackState {
            deliver: Mutex::new(Some(deliver_tx)),
        });
        let router = Router::new()
            .route("/google-callback", get(handle_callback))
            .route("/callback", get(handle_callback))
            .with_state(state);

        let listener = self.listener;
        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
        });

        let outcome = match deliver_rx.await {
            Ok((callback, reply)) => {
                let result = on_callback(callback).await;
                let page = if result.is_ok() {
                    CallbackPage::Success
                } else {
                    CallbackPage::Unauthorized
                };
                if reply.send(page).is_err() {
                    debug!("browser disconnected before the callback page was sent");
                }
                result
            }
            Err(_) => Err(CliError::CallbackAbandoned),
        };

        shutdown.cancel();
        match server.await {
            Ok(Ok(())) => debug!("callback listener closed"),
            Ok(Err(err)) => match &outcome {
                Err(CliError::CallbackAbandoned) => return Err(CliError::Serve(err)),
                _ => debug!(error = %err, "callback listener closed with error"),
            },
            Err(err) => debug!(error = %err, "callback listener task ended abnormally"),
        }
        outcome
    }
}

async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(callback): Query<CallbackResult>,
) -> Html<&'static str> {
    let Some(deliver) = state.deliver.lock().await.take() else {
        debug!("ignoring callback received after the attempt was resolved");
        return Html(UNAUTHORIZED_PAGE);
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    if deliver.send((callback, reply_tx)).is_err() {
        return Html(UNAUTHORIZED_PAGE);
    }
    Html(reply_rx.await.map_or(UNAUTHORIZED_PAGE, CallbackPage::html))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    async fn bind_any() -> Result<CallbackListener> {
        Ok(CallbackListener::bind("127.0.0.1:0".parse()?).await?)
    }

    #[tokio::test]
    async fn forwards_query_and_renders_success_page() -> Result<()> {
        let listener = bind_any().await?;
        let url = format!(
            "http://{}/google-callback?state=abc&code=xyz",
            listener.local_addr()
        );
        let browser = tokio::spawn(async move { reqwest::get(url).await?.text().await });

        let received = listener
            .serve_once(|callback| async move { Ok::<_, CliError>(callback) })
            .await?;

        assert_eq!(
            received,
            CallbackResult {
                state: "abc".into(),
                code: "xyz".into()
            }
        );
        let page = browser.await??;
        assert!(page.contains("Thanks for logging in"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_parameters_decode_as_empty_and_errors_render_unauthorized() -> Result<()> {
        let listener = bind_any().await?;
        let url = format!("http://{}/callback", listener.local_addr());
        let browser = tokio::spawn(async move { reqwest::get(url).await?.text().await });

        let err = listener
            .serve_once(|callback| async move {
                assert_eq!(callback, CallbackResult::default());
                Err::<(), _>(CliError::validation("rejected"))
            })
            .await
            .expect_err("handler error propagates");

        assert!(matches!(err, CliError::Validation(_)));
        let page = browser.await??;
        assert!(page.contains("Unauthorized"));
        Ok(())
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() -> Result<()> {
        let first = bind_any().await?;
        let err = CallbackListener::bind(first.local_addr())
            .await
            .err()
            .expect("second bind must fail");
        assert!(matches!(err, CliError::Bind { .. }));
        Ok(())
    }
}
