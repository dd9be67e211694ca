mod oauth;
mod port;
mod types;

pub use oauth::{authorization_url, callback_code, callback_router, CallbackParams, OAuthClient};
pub use port::{reserve_port, ReservedPort};
pub use types::{
    load_client_secrets, ClientSecrets, Credential, CredentialState, DEFAULT_AUTH_URI,
    DEFAULT_TOKEN_URI, EXPIRY_SKEW_SECONDS,
};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult, AUTH_ATTEMPTS_EXHAUSTED};

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, credential: &Credential) -> PipelineResult<Credential>;
}

/// Runs the full interactive consent flow with its callback on `port`.
#[async_trait]
pub trait InteractiveAuthorizer: Send + Sync {
    async fn authorize(&self, port: ReservedPort) -> PipelineResult<Credential>;
}

struct Slot {
    loaded: bool,
    state: CredentialState,
    credential: Option<Arc<Credential>>,
}

/// Owns the persisted credential. The slot lock is held for the whole of a refresh or
/// interactive acquisition, so concurrent publishers wait and reuse the result.
pub struct CredentialStore {
    token_path: PathBuf,
    callback_host: String,
    max_interactive_attempts: u32,
    refresher: Arc<dyn TokenRefresher>,
    authorizer: Arc<dyn InteractiveAuthorizer>,
    slot: Mutex<Slot>,
}

impl CredentialStore {
    pub fn new(
        token_path: impl Into<PathBuf>,
        refresher: Arc<dyn TokenRefresher>,
        authorizer: Arc<dyn InteractiveAuthorizer>,
    ) -> Self {
        Self {
            token_path: token_path.into(),
            callback_host: "127.0.0.1".to_string(),
            max_interactive_attempts: 3,
            refresher,
            authorizer,
            slot: Mutex::new(Slot {
                loaded: false,
                state: CredentialState::NoToken,
                credential: None,
            }),
        }
    }

    pub fn with_callback_host(mut self, host: impl Into<String>) -> Self {
        self.callback_host = host.into();
        self
    }

    pub fn with_max_interactive_attempts(mut self, attempts: u32) -> Self {
        self.max_interactive_attempts = attempts.max(1);
        self
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    pub async fn state(&self) -> CredentialState {
        self.slot.lock().await.state
    }

    /// Returns a usable credential. A still-valid token is returned as the same `Arc`.
    pub async fn ensure_valid(&self) -> PipelineResult<Arc<Credential>> {
        self.ensure_valid_at(Utc::now()).await
    }

    pub async fn ensure_valid_at(&self, now: DateTime<Utc>) -> PipelineResult<Arc<Credential>> {
        let mut slot = self.slot.lock().await;
        if !slot.loaded {
            self.load_into(&mut slot).await;
        }

        if let Some(current) = slot.credential.clone() {
            if !current.is_expired(now) {
                slot.state = CredentialState::TokenValid;
                return Ok(current);
            }
            slot.state = CredentialState::TokenExpired;
            if current.can_refresh() {
                info!(path = %self.token_path.display(), "refreshing expired token");
                match self.refresher.refresh(&current).await {
                    Ok(mut refreshed) => {
                        if !refreshed.can_refresh() {
                            refreshed.refresh_token = current.refresh_token.clone();
                        }
                        return self.install(&mut slot, refreshed).await;
                    }
                    Err(err) => warn!(error = %err, "token refresh failed"),
                }
            }
            slot.state = CredentialState::Unauthenticated;
            slot.credential = None;
        }

        self.acquire_interactive(&mut slot).await
    }

    /// Marks `stale` as rejected by the platform. Ignored if another caller already
    /// replaced it.
    pub async fn invalidate(&self, stale: &Arc<Credential>) {
        let mut slot = self.slot.lock().await;
        let Some(current) = slot.credential.as_ref() else {
            return;
        };
        if !Arc::ptr_eq(current, stale) {
            return;
        }
        let mut expired = Credential::clone(current);
        expired.expiry = Some(Utc::now() - chrono::Duration::hours(1));
        slot.credential = Some(Arc::new(expired));
        slot.state = CredentialState::TokenExpired;
        warn!("credential rejected by platform, will refresh on next use");
    }

    async fn load_into(&self, slot: &mut Slot) {
        slot.loaded = true;
        let content = match fs::read_to_string(&self.token_path).await {
            Ok(content) => content,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    warn!(path = %self.token_path.display(), error = %err, "cannot read token file");
                }
                slot.state = CredentialState::NoToken;
                return;
            }
        };
        match serde_json::from_str::<Credential>(&content) {
            Ok(credential) => {
                slot.credential = Some(Arc::new(credential));
                slot.state = CredentialState::TokenLoaded;
            }
            Err(err) => {
                warn!(
                    path = %self.token_path.display(),
                    error = %err,
                    "discarding corrupt token file"
                );
                if let Err(err) = fs::remove_file(&self.token_path).await {
                    warn!(error = %err, "failed to remove corrupt token file");
                }
                slot.state = CredentialState::NoToken;
            }
        }
    }

    async fn acquire_interactive(&self, slot: &mut Slot) -> PipelineResult<Arc<Credential>> {
        let mut last_error = None;
        for attempt in 1..=self.max_interactive_attempts {
            let port = match reserve_port(&self.callback_host) {
                Ok(port) => port,
                Err(err) => {
                    warn!(attempt, error = %err, "cannot reserve callback port");
                    last_error = Some(PipelineError::AuthFlow {
                        message: format!("cannot reserve callback port: {err}"),
                        error_type: None,
                        description: None,
                    });
                    continue;
                }
            };
            info!(
                attempt,
                max_attempts = self.max_interactive_attempts,
                redirect_uri = %port.redirect_uri(),
                "starting interactive authorization"
            );
            match self.authorizer.authorize(port).await {
                Ok(credential) => return self.install(slot, credential).await,
                Err(err) => {
                    warn!(attempt, error = %err, "interactive authorization failed");
                    last_error = Some(err);
                }
            }
        }
        slot.state = CredentialState::Unauthenticated;
        Err(PipelineError::AuthFlow {
            message: format!(
                "interactive authorization failed after {} attempts",
                self.max_interactive_attempts
            ),
            error_type: Some(AUTH_ATTEMPTS_EXHAUSTED.into()),
            description: last_error.map(|err| err.to_string()),
        })
    }

    async fn install(&self, slot: &mut Slot, credential: Credential) -> PipelineResult<Arc<Credential>> {
        let credential = Arc::new(credential);
        slot.credential = Some(credential.clone());
        slot.state = CredentialState::TokenValid;
        persist(&self.token_path, &credential).await?;
        info!(path = %self.token_path.display(), "credential saved");
        Ok(credential)
    }
}

/// Writes through a sibling temp file and renames, so readers never see a partial token.
async fn persist(path: &Path, credential: &Credential) -> PipelineResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| PipelineError::storage(parent, "create_dir", err))?;
    }
    let body = serde_json::to_vec_pretty(credential)
        .map_err(|err| PipelineError::Credentials {
            message: format!("cannot serialize token: {err}"),
            path: Some(path.to_path_buf()),
        })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)
        .await
        .map_err(|err| PipelineError::storage(&tmp, "write", err))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|err| PipelineError::storage(&tmp, "chmod", err))?;
    }
    fs::rename(&tmp, path)
        .await
        .map_err(|err| PipelineError::storage(path, "rename", err))
}
