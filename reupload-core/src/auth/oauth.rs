use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult, RetryableError, RetryableKind};

use super::port::ReservedPort;
use super::types::{ClientSecrets, Credential};
use super::{InteractiveAuthorizer, TokenRefresher};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// OAuth client for the installed-app flow: refresh grant plus loopback consent.
pub struct OAuthClient {
    http: reqwest::Client,
    secrets: ClientSecrets,
    scopes: Vec<String>,
    callback_timeout: Duration,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, secrets: ClientSecrets, scopes: Vec<String>) -> Self {
        Self {
            http,
            secrets,
            scopes,
            callback_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_callback_timeout(mut self, limit: Duration) -> Self {
        self.callback_timeout = limit;
        self
    }

    async fn token_request(&self, token_uri: &str, form: &[(&str, &str)]) -> PipelineResult<TokenResponse> {
        let response = self.http.post(token_uri).form(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return serde_json::from_str(&body).map_err(|err| PipelineError::AuthFlow {
                message: format!("malformed token response: {err}"),
                error_type: None,
                description: None,
            });
        }
        if status.is_server_error() {
            return Err(RetryableError::new(
                RetryableKind::Network,
                format!("token endpoint returned {status}"),
            )
            .into());
        }
        match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(parsed) => Err(PipelineError::AuthFlow {
                message: format!("token endpoint rejected the request ({status})"),
                error_type: Some(parsed.error),
                description: parsed.error_description,
            }),
            Err(_) => Err(PipelineError::AuthFlow {
                message: format!("token endpoint returned {status}"),
                error_type: None,
                description: Some(body),
            }),
        }
    }

    /// Serves the loopback redirect until the browser delivers a code, an error, or the
    /// timeout passes. The listener is shut down before returning.
    async fn wait_for_callback(&self, port: ReservedPort, state: &str) -> PipelineResult<String> {
        let listener = port.bind().await.map_err(|err| PipelineError::AuthFlow {
            message: format!("cannot bind callback listener on {}: {err}", port.addr()),
            error_type: None,
            description: None,
        })?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let app = callback_router(reply_tx);
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
        });
        debug!(addr = %port.addr(), "callback listener started");

        let received = timeout(self.callback_timeout, reply_rx).await;
        let _ = stop_tx.send(());
        match timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(Ok(Ok(()))) => debug!("callback listener stopped"),
            Ok(Ok(Err(err))) => warn!(error = %err, "callback listener failed"),
            Ok(Err(err)) => warn!(error = %err, "callback listener task failed"),
            Err(_) => {
                debug!("callback listener did not drain in time");
                server.abort();
            }
        }

        match received {
            Ok(Ok(params)) => callback_code(params, state),
            Ok(Err(_)) => Err(PipelineError::AuthFlow {
                message: "callback listener stopped before the browser responded".into(),
                error_type: None,
                description: None,
            }),
            Err(_) => Err(PipelineError::AuthFlow {
                message: format!(
                    "no authorization callback within {}s",
                    self.callback_timeout.as_secs()
                ),
                error_type: Some("timeout".into()),
                description: None,
            }),
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh(&self, credential: &Credential) -> PipelineResult<Credential> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| PipelineError::Credentials {
                message: "credential has no refresh token".into(),
                path: None,
            })?;
        let client_id = credential
            .client_id
            .as_deref()
            .unwrap_or(self.secrets.client_id.as_str());
        let client_secret = credential
            .client_secret
            .as_deref()
            .unwrap_or(self.secrets.client_secret.as_str());
        let response = self
            .token_request(
                &credential.token_uri,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", client_id),
                    ("client_secret", client_secret),
                ],
            )
            .await?;
        Ok(Credential {
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .or_else(|| credential.refresh_token.clone()),
            expiry: response
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
            token_uri: credential.token_uri.clone(),
            client_id: Some(client_id.to_string()),
            client_secret: Some(client_secret.to_string()),
            scopes: response
                .scope
                .map(|scope| scope.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(|| credential.scopes.clone()),
        })
    }
}

#[async_trait]
impl InteractiveAuthorizer for OAuthClient {
    async fn authorize(&self, port: ReservedPort) -> PipelineResult<Credential> {
        let state = Uuid::new_v4().simple().to_string();
        let redirect_uri = port.redirect_uri();
        let consent = authorization_url(&self.secrets, &self.scopes, &redirect_uri, &state)?;
        info!(url = %consent, "open this URL in a browser to authorize uploads");

        let code = self.wait_for_callback(port, &state).await?;
        let response = self
            .token_request(
                &self.secrets.token_uri,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", redirect_uri.as_str()),
                    ("client_id", self.secrets.client_id.as_str()),
                    ("client_secret", self.secrets.client_secret.as_str()),
                ],
            )
            .await?;
        Ok(Credential {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expiry: response
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
            token_uri: self.secrets.token_uri.clone(),
            client_id: Some(self.secrets.client_id.clone()),
            client_secret: Some(self.secrets.client_secret.clone()),
            scopes: self.scopes.clone(),
        })
    }
}

pub fn authorization_url(
    secrets: &ClientSecrets,
    scopes: &[String],
    redirect_uri: &str,
    state: &str,
) -> PipelineResult<Url> {
    let scope = scopes.join(" ");
    Url::parse_with_params(
        &secrets.auth_uri,
        &[
            ("client_id", secrets.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("access_type", "offline"),
            ("include_granted_scopes", "true"),
            ("prompt", "consent"),
            ("state", state),
        ],
    )
    .map_err(|err| PipelineError::Configuration(format!("invalid auth_uri: {err}")))
}

/// Query string of the redirect back to the loopback listener.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Clone)]
struct CallbackState {
    reply: Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>,
}

/// Single-route router for the consent redirect. The first request carrying a code or an
/// error is forwarded to `reply`; anything else on `/` is a bad request.
pub fn callback_router(reply: oneshot::Sender<CallbackParams>) -> Router {
    Router::new()
        .route("/", get(receive_callback))
        .with_state(CallbackState {
            reply: Arc::new(Mutex::new(Some(reply))),
        })
}

async fn receive_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, &'static str) {
    if params.code.is_none() && params.error.is_none() {
        return (StatusCode::BAD_REQUEST, "Missing authorization code.");
    }
    if let Some(reply) = state.reply.lock().await.take() {
        let _ = reply.send(params);
    }
    (
        StatusCode::OK,
        "Authorization received. You can close this window.",
    )
}

/// Checks the redirect against the `state` sent with the consent URL.
pub fn callback_code(params: CallbackParams, expected_state: &str) -> PipelineResult<String> {
    if let Some(error) = params.error {
        return Err(PipelineError::AuthFlow {
            message: "authorization was denied".into(),
            error_type: Some(error),
            description: params.error_description,
        });
    }
    if params.state.as_deref() != Some(expected_state) {
        return Err(PipelineError::AuthFlow {
            message: "callback state does not match the request".into(),
            error_type: Some("state_mismatch".into()),
            description: None,
        });
    }
    params.code.ok_or_else(|| PipelineError::AuthFlow {
        message: "callback carried no authorization code".into(),
        error_type: None,
        description: None,
    })
}
