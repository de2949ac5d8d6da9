use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing::{error, info};
use urlencoding::encode;

use crate::config::OAuthConfig;
use crate::error::{Error, Result};

#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub token_type: String,
}

impl TokenResponse {
    pub fn expires_at(&self) -> Option<String> {
        (OffsetDateTime::now_utc() + Duration::seconds(self.expires_in))
            .format(&Rfc3339)
            .ok()
    }
}

pub fn refresh_body(oauth: &OAuthConfig, refresh_token: &str) -> String {
    format!(
        "client_id={}&client_secret={}&refresh_token={}&grant_type=refresh_token",
        encode(&oauth.client_id),
        encode(&oauth.client_secret),
        encode(refresh_token),
    )
}

/// Trade the stored refresh token for a new access token.
pub async fn manual_refresh(oauth: &OAuthConfig) -> Result<TokenResponse> {
    let refresh_token = oauth
        .tokens
        .as_ref()
        .and_then(|t| t.refresh_token.as_deref())
        .ok_or_else(|| Error::OAuth("no refresh token stored; run `po auth` first".into()))?;

    let client = reqwest::Client::new();
    let resp = client
        .post(&oauth.token_url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(refresh_body(oauth, refresh_token))
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        error!(status, body = %body, "Token refresh rejected");
        return Err(Error::OAuth(format!("token endpoint returned {status}: {body}")));
    }

    let token_resp: TokenResponse = resp.json().await?;
    info!(expires_in = token_resp.expires_in, "Access token refreshed");
    Ok(token_resp)
}
