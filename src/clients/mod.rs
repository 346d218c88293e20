//! Remote collaborators consumed by the core.
//!
//! The traits are the injection seams; `discord` holds the HTTP implementation.

pub mod discord;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{RoleConnection, TokenGrant};

pub use discord::{DiscordClient, DiscordClientConfig};

/// OAuth token endpoint
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// `authorization_code` grant
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant>;

    /// `refresh_token` grant; a rejected refresh secret is `ReauthorizationRequired`
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;
}

/// Role-connection metadata resource of the authenticated user
#[async_trait]
pub trait MetadataEndpoint: Send + Sync {
    /// `PUT`; a 401 answer is `Unauthorized`
    async fn push(&self, access_token: &str, connection: &RoleConnection) -> Result<()>;

    /// `GET` of the currently stored connection
    async fn fetch(&self, access_token: &str) -> Result<RoleConnection>;
}
