use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::clients::{MetadataEndpoint, TokenEndpoint};
use crate::constants::{DEFAULT_DISCORD_API_BASE, DEFAULT_HTTP_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::models::{RoleConnection, TokenGrant};

/// OAuth error code for a rejected code or refresh secret
const INVALID_GRANT: &str = "invalid_grant";

#[derive(Debug, Clone)]
pub struct DiscordClientConfig {
    pub api_base: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub timeout: Duration,
}

impl DiscordClientConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            api_base: DEFAULT_DISCORD_API_BASE.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

/// Chat-platform OAuth and role-connection client
#[derive(Debug, Clone)]
pub struct DiscordClient {
    api_base: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
}

impl DiscordClient {
    pub fn new(config: DiscordClientConfig) -> Result<Self> {
        let api_base = config.api_base.trim().trim_end_matches('/').to_string();
        if api_base.is_empty() {
            return Err(AppError::InvalidInput("API base URL is empty".to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Connectivity(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_base,
            client_id: config.client_id,
            client_secret: config.client_secret,
            redirect_uri: config.redirect_uri,
            http,
        })
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth2/token", self.api_base)
    }

    pub fn role_connection_url(&self) -> String {
        format!(
            "{}/users/@me/applications/{}/role-connection",
            self.api_base, self.client_id
        )
    }

    async fn token_request(&self, form: &[(&str, &str)], refreshing: bool) -> Result<TokenGrant> {
        let response = self.http.post(self.token_url()).form(form).send().await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response.json::<TokenGrant>().await?);
        }

        let body = error_body(response).await;
        Err(classify_token_failure(status, &body, refreshing))
    }
}

#[async_trait]
impl TokenEndpoint for DiscordClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        tracing::debug!("Exchanging authorization code");
        self.token_request(
            &[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ],
            false,
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        tracing::debug!("Refreshing access token");
        self.token_request(
            &[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
            true,
        )
        .await
    }
}

#[async_trait]
impl MetadataEndpoint for DiscordClient {
    async fn push(&self, access_token: &str, connection: &RoleConnection) -> Result<()> {
        let response = self
            .http
            .put(self.role_connection_url())
            .bearer_auth(access_token)
            .json(connection)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }

        let body = error_body(response).await;
        Err(classify_metadata_failure(status, &body))
    }

    async fn fetch(&self, access_token: &str) -> Result<RoleConnection> {
        let response = self
            .http
            .get(self.role_connection_url())
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response.json::<RoleConnection>().await?);
        }

        let body = error_body(response).await;
        Err(classify_metadata_failure(status, &body))
    }
}

/// Body of a failed answer; an unreadable body becomes empty
async fn error_body(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!("Failed to read {} response body: {}", status, e);
            String::new()
        }
    }
}

/// Map a non-200 token endpoint answer onto the error taxonomy
pub fn classify_token_failure(status: StatusCode, body: &str, refreshing: bool) -> AppError {
    let invalid_grant = serde_json::from_str::<OAuthErrorBody>(body)
        .map(|b| b.error == INVALID_GRANT)
        .unwrap_or(false);

    if refreshing && (status == StatusCode::UNAUTHORIZED || invalid_grant) {
        return AppError::ReauthorizationRequired;
    }

    AppError::RemoteService {
        status: status.as_u16(),
        body: body.trim().to_string(),
    }
}

/// Map a non-200 role-connection answer onto the error taxonomy
pub fn classify_metadata_failure(status: StatusCode, body: &str) -> AppError {
    if status == StatusCode::UNAUTHORIZED {
        return AppError::Unauthorized;
    }

    AppError::RemoteService {
        status: status.as_u16(),
        body: body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> Result<DiscordClient> {
        let mut config = DiscordClientConfig::new("1234", "secret", "https://example.com/cb");
        config.api_base = base.to_string();
        DiscordClient::new(config)
    }

    #[test]
    fn test_urls_are_normalized() {
        let client = client("https://discord.com/api/v10/").unwrap();
        assert_eq!(client.token_url(), "https://discord.com/api/v10/oauth2/token");
        assert_eq!(
            client.role_connection_url(),
            "https://discord.com/api/v10/users/@me/applications/1234/role-connection"
        );
    }

    #[test]
    fn test_empty_base_is_rejected() {
        assert!(matches!(client("  "), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_metadata_failure_classification() {
        assert!(matches!(
            classify_metadata_failure(StatusCode::UNAUTHORIZED, ""),
            AppError::Unauthorized
        ));
        assert!(matches!(
            classify_metadata_failure(StatusCode::FORBIDDEN, " denied "),
            AppError::RemoteService { status: 403, ref body } if body == "denied"
        ));
    }

    #[test]
    fn test_token_failure_classification() {
        let invalid = r#"{"error": "invalid_grant"}"#;

        assert!(matches!(
            classify_token_failure(StatusCode::BAD_REQUEST, invalid, true),
            AppError::ReauthorizationRequired
        ));
        assert!(matches!(
            classify_token_failure(StatusCode::UNAUTHORIZED, "", true),
            AppError::ReauthorizationRequired
        ));
        assert!(matches!(
            classify_token_failure(StatusCode::BAD_REQUEST, invalid, false),
            AppError::RemoteService { status: 400, .. }
        ));
        assert!(matches!(
            classify_token_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom", true),
            AppError::RemoteService { status: 500, .. }
        ));
    }
}
