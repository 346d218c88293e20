//! Role-link service library
//!
//! Typed SQLite vaults, OAuth token lifecycle and the role-connection publisher,
//! exported for the server binary and for tests.

pub mod clients;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod models;
pub mod publisher;
pub mod routes;
pub mod tokens;

pub use config::Config;
pub use db::{open_database, Vault, VaultOptions};
pub use error::{AppError, Result};
pub use publisher::{MetadataPublisher, PublishReport};
pub use tokens::TokenLifecycle;

use sqlx::SqlitePool;
use std::sync::Arc;

use clients::{MetadataEndpoint, TokenEndpoint};
use constants::{DISCORD_TOKENS_TABLE, USER_LINKS_TABLE};
use models::{Token, UserLink};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Config,
    pub links: Arc<Vault<UserLink>>,
    pub tokens: Arc<Vault<Token>>,
    pub lifecycle: Arc<TokenLifecycle>,
    pub publisher: Arc<MetadataPublisher>,
}

impl AppState {
    /// Open the vaults and wire the collaborators into the core.
    ///
    /// Fails when a table is missing and auto-create is disabled.
    pub async fn new(
        pool: SqlitePool,
        config: Config,
        token_endpoint: Arc<dyn TokenEndpoint>,
        metadata_endpoint: Arc<dyn MetadataEndpoint>,
    ) -> Result<Self> {
        let options = VaultOptions {
            auto_create: config.db_auto_create,
            timeout: config.storage_timeout(),
        };

        let tokens = Arc::new(Vault::open(pool.clone(), DISCORD_TOKENS_TABLE, options).await?);
        let links = Arc::new(Vault::open(pool.clone(), USER_LINKS_TABLE, options).await?);

        let lifecycle = Arc::new(TokenLifecycle::new(token_endpoint, tokens.clone()));
        let publisher = Arc::new(MetadataPublisher::new(
            lifecycle.clone(),
            metadata_endpoint,
            links.clone(),
            config.platform_name.clone(),
        ));

        Ok(Self {
            pool,
            config,
            links,
            tokens,
            lifecycle,
            publisher,
        })
    }
}
