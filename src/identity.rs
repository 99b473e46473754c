use crate::config::IdentityConfig;
use crate::error::{PipelineError, Result};
use crate::model::SessionToken;
use chrono::{Duration as ChronoDuration, Utc};
use log::{debug, info};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Opaque sign-in capability of the identity provider
pub trait IdentityProvider: Send + Sync {
    /// Run the interactive handshake and return a fresh token
    ///
    /// A user who abandons the handshake is reported as `AuthFailure`.
    fn sign_in(&self) -> impl Future<Output = Result<SessionToken>> + Send;

    /// Ask the provider whether `token` is still accepted
    fn validate(&self, token: &SessionToken) -> impl Future<Output = Result<bool>> + Send;

    /// Revoke `token` with the provider
    fn sign_out(&self, token: &SessionToken) -> impl Future<Output = Result<()>> + Send;
}

/// Successful response of the OAuth token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl From<TokenResponse> for SessionToken {
    fn from(response: TokenResponse) -> Self {
        SessionToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: response
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        }
    }
}

/// Google OAuth 2.0 client (authorization code flow)
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    config: IdentityConfig,
}

impl OAuthClient {
    pub fn new(config: IdentityConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("progress/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(OAuthClient { http, config })
    }

    /// Build the URI the user is sent to in order to grant access
    ///
    /// # Arguments
    /// * `state` - Optional opaque value echoed back on the redirect
    ///
    /// # Returns
    /// * `String` - The authorization URI with all query parameters encoded
    pub fn authorization_uri(&self, state: Option<&str>) -> String {
        let scope = self.config.scopes.join(" ");
        let mut uri = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&access_type=offline",
            self.config.auth_uri,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&scope),
        );
        if let Some(state) = state {
            uri.push_str("&state=");
            uri.push_str(&urlencoding::encode(state));
        }
        uri
    }

    /// Exchange an authorization code for a token
    ///
    /// # Arguments
    /// * `code` - The `code` query parameter of the OAuth redirect
    ///
    /// # Errors
    /// * `AuthFailure` if the provider rejects the code or cannot be reached
    pub async fn exchange_code(&self, code: &str) -> Result<SessionToken> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let resp = self
            .http
            .post(&self.config.token_uri)
            .form(&form)
            .send()
            .await
            .map_err(|e| PipelineError::Auth(format!("token request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Auth(format!(
                "token endpoint returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::Auth(format!("malformed token response: {}", e)))?;
        debug!("authorization code exchanged");
        Ok(token.into())
    }

    async fn prompt_for_code(&self) -> Result<String> {
        let uri = self.authorization_uri(None);
        let mut stderr = tokio::io::stderr();
        let prompt = format!(
            "Open this address in a browser and sign in:\n\n  {}\n\nPaste the authorization code (empty to cancel): ",
            uri
        );
        stderr
            .write_all(prompt.as_bytes())
            .await
            .map_err(|e| PipelineError::Auth(e.to_string()))?;
        stderr
            .flush()
            .await
            .map_err(|e| PipelineError::Auth(e.to_string()))?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| PipelineError::Auth(format!("failed to read authorization code: {}", e)))?;
        Ok(line.trim().to_string())
    }
}

impl IdentityProvider for OAuthClient {
    async fn sign_in(&self) -> Result<SessionToken> {
        if self.config.client_id.trim().is_empty() {
            return Err(PipelineError::Config("no OAuth client id configured".into()));
        }
        let code = self.prompt_for_code().await?;
        if code.is_empty() {
            info!("sign-in cancelled by user");
            return Err(PipelineError::Auth("sign-in cancelled".into()));
        }
        self.exchange_code(&code).await
    }

    async fn validate(&self, token: &SessionToken) -> Result<bool> {
        let resp = self
            .http
            .get(&self.config.tokeninfo_uri)
            .query(&[("access_token", token.access_token.as_str())])
            .send()
            .await
            .map_err(|e| PipelineError::Auth(format!("token validation failed: {}", e)))?;
        Ok(resp.status().is_success())
    }

    async fn sign_out(&self, token: &SessionToken) -> Result<()> {
        let resp = self
            .http
            .post(&self.config.revoke_uri)
            .form(&[("token", token.access_token.as_str())])
            .send()
            .await
            .map_err(|e| PipelineError::Auth(format!("revoke request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(PipelineError::Auth(format!(
                "revoke endpoint returned HTTP {}",
                resp.status().as_u16()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Environment};

    fn client() -> OAuthClient {
        let mut config = Config::defaults(Environment::Development).identity;
        config.client_id = "123-abc.apps.googleusercontent.com".into();
        OAuthClient::new(config).unwrap()
    }

    #[test]
    fn test_authorization_uri_is_encoded() {
        let uri = client().authorization_uri(Some("a b"));

        assert!(uri.starts_with("https://accounts.google.com/o/oauth2/v2/auth?response_type=code"));
        assert!(uri.contains("client_id=123-abc.apps.googleusercontent.com"));
        assert!(uri.contains("redirect_uri=http%3A%2F%2Flocalhost%3A4567%2Foauth"));
        assert!(uri.contains("scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fspreadsheets.readonly%20"));
        assert!(uri.ends_with("&state=a%20b"));
    }

    #[test]
    fn test_token_response_conversion() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"ya29.x","expires_in":3599,"token_type":"Bearer","scope":"s"}"#,
        )
        .unwrap();
        let token = SessionToken::from(response);

        assert_eq!(token.access_token, "ya29.x");
        assert_eq!(token.refresh_token, None);
        assert!(!token.is_expired(Utc::now()));
        assert!(token.is_expired(Utc::now() + ChronoDuration::hours(2)));
    }
}
