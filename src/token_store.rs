use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};
use yup_oauth2::error::TokenStorageError;
use yup_oauth2::storage::{TokenInfo, TokenStorage};

use crate::config::{Config, Tokens};

/// Keeps OAuth tokens in the `[drive_oauth.tokens]` table of the config file.
pub struct ConfigTokenStore {
    config_path: PathBuf,
    cached: Mutex<Option<TokenInfo>>,
}

impl ConfigTokenStore {
    pub fn new(config_path: impl Into<PathBuf>, tokens: Option<&Tokens>) -> Self {
        Self {
            config_path: config_path.into(),
            cached: Mutex::new(tokens.and_then(token_info)),
        }
    }
}

/// `None` when neither token is present, so the installed flow runs.
fn token_info(tokens: &Tokens) -> Option<TokenInfo> {
    if tokens.access_token.is_none() && tokens.refresh_token.is_none() {
        return None;
    }
    let expires_at = tokens
        .expires_at
        .as_deref()
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok());
    Some(TokenInfo {
        access_token: tokens.access_token.clone(),
        refresh_token: tokens.refresh_token.clone(),
        expires_at,
        id_token: None,
    })
}

#[async_trait]
impl TokenStorage for ConfigTokenStore {
    async fn set(&self, _scopes: &[&str], token: TokenInfo) -> Result<(), TokenStorageError> {
        let expires_at = token
            .expires_at
            .and_then(|at| at.format(&Rfc3339).ok());
        Config::update_tokens(
            &self.config_path,
            token.access_token.as_deref(),
            token.refresh_token.as_deref(),
            expires_at.as_deref(),
        )
        .map_err(|e| TokenStorageError::Other(e.to_string().into()))?;
        info!(config = %self.config_path.display(), "OAuth tokens saved");

        match self.cached.lock() {
            Ok(mut cached) => *cached = Some(token),
            Err(_) => warn!("Token cache poisoned, keeping file copy only"),
        }
        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        self.cached.lock().ok().and_then(|cached| cached.clone())
    }
}
