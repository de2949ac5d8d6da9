use async_trait::async_trait;
use std::path::Path;
use yup_oauth2::authenticator::DefaultAuthenticator;
use yup_oauth2::{ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::token_store::ConfigTokenStore;

/// Only files this app created or opened.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Builds the installed-app authenticator. The first call without stored
/// tokens opens the browser consent screen.
pub async fn create_authenticator(cfg: &Config, config_path: &Path) -> Result<DefaultAuthenticator> {
    let oauth = cfg.oauth()?;

    let secret = ApplicationSecret {
        client_id: oauth.client_id.clone(),
        client_secret: oauth.client_secret.clone(),
        token_uri: oauth.token_url.clone(),
        auth_uri: oauth.auth_url.clone(),
        redirect_uris: vec!["http://localhost".to_string()],
        project_id: None,
        client_email: None,
        auth_provider_x509_cert_url: None,
        client_x509_cert_url: None,
    };

    let auth = InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
        .with_storage(Box::new(ConfigTokenStore::new(
            config_path,
            oauth.tokens.as_ref(),
        )))
        .build()
        .await?;

    Ok(auth)
}

/// A bearer token for the drive scope, refreshed by the authenticator as needed.
pub async fn access_token(auth: &DefaultAuthenticator) -> Result<String> {
    let token = auth.token(&[DRIVE_SCOPE]).await?;
    token
        .token()
        .map(str::to_string)
        .ok_or_else(|| Error::OAuth("authenticator returned no access token".into()))
}

/// Anything that can hand out a drive bearer token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn bearer(&self) -> Result<String>;
}

#[async_trait]
impl TokenSource for DefaultAuthenticator {
    async fn bearer(&self) -> Result<String> {
        access_token(self).await
    }
}
