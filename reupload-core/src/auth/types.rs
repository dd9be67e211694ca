use std::fmt;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens this close to expiry are treated as expired.
pub const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Persisted token document. Field names follow the authorized-user JSON layout so
/// existing token files keep loading.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "token", alias = "access_token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl Credential {
    /// Tokens without a recorded expiry are assumed valid until the platform rejects them.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_SKEW_SECONDS) <= now,
            None => false,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.can_refresh())
            .field("expiry", &self.expiry)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Lifecycle of the persisted credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    NoToken,
    TokenLoaded,
    TokenValid,
    TokenExpired,
    Unauthenticated,
}

impl CredentialState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialState::NoToken => "no_token",
            CredentialState::TokenLoaded => "token_loaded",
            CredentialState::TokenValid => "token_valid",
            CredentialState::TokenExpired => "token_expired",
            CredentialState::Unauthenticated => "unauthenticated",
        }
    }
}

impl fmt::Display for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    #[serde(default)]
    installed: Option<ClientSecrets>,
    #[serde(default)]
    web: Option<ClientSecrets>,
}

/// Loads the separately provisioned application-secret file (`installed` or `web` layout).
pub fn load_client_secrets(path: &Path) -> PipelineResult<ClientSecrets> {
    let content = std::fs::read_to_string(path).map_err(|err| PipelineError::Credentials {
        message: format!("cannot read client secrets: {err}"),
        path: Some(path.to_path_buf()),
    })?;
    parse_client_secrets(&content).map_err(|message| PipelineError::Credentials {
        message,
        path: Some(path.to_path_buf()),
    })
}

pub(crate) fn parse_client_secrets(content: &str) -> Result<ClientSecrets, String> {
    let file: ClientSecretsFile =
        serde_json::from_str(content).map_err(|err| format!("malformed client secrets: {err}"))?;
    file.installed
        .or(file.web)
        .ok_or_else(|| "client secrets contain neither `installed` nor `web`".to_string())
}
