//! Pushes role-connection metadata with a fresh token and at most one
//! refresh-and-retry after an authorization failure.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::clients::MetadataEndpoint;
use crate::db::Vault;
use crate::error::{AppError, Result};
use crate::models::{RoleConnection, Token, UserLink};
use crate::tokens::TokenLifecycle;

/// Counters of one publisher run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub push_attempts: u32,
    pub refreshes: u32,
}

enum Step<T> {
    Start,
    Refresh { stale: Token, retry: bool },
    Call { token: Token, retry: bool },
    Succeeded(T),
    Failed(AppError),
}

pub struct MetadataPublisher {
    tokens: Arc<TokenLifecycle>,
    endpoint: Arc<dyn MetadataEndpoint>,
    links: Arc<Vault<UserLink>>,
    platform_name: String,
}

impl MetadataPublisher {
    pub fn new(
        tokens: Arc<TokenLifecycle>,
        endpoint: Arc<dyn MetadataEndpoint>,
        links: Arc<Vault<UserLink>>,
        platform_name: impl Into<String>,
    ) -> Self {
        Self {
            tokens,
            endpoint,
            links,
            platform_name: platform_name.into(),
        }
    }

    pub fn tokens(&self) -> &TokenLifecycle {
        &self.tokens
    }

    /// Push `connection` for `user_id`
    pub async fn publish(&self, user_id: i64, connection: &RoleConnection) -> Result<PublishReport> {
        let endpoint = self.endpoint.clone();
        let ((), report) = self
            .run(user_id, |access| {
                let endpoint = endpoint.clone();
                async move { endpoint.push(&access, connection).await }
            })
            .await?;

        tracing::info!(
            "Published metadata for user {} ({} push attempts, {} refreshes)",
            user_id,
            report.push_attempts,
            report.refreshes
        );

        Ok(report)
    }

    /// Build the payload from the stored link and push it
    pub async fn sync(&self, user_id: i64) -> Result<PublishReport> {
        let link = self
            .links
            .get(&user_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                table: self.links.table().to_string(),
                key: user_id.to_string(),
            })?;

        let connection = RoleConnection::from_link(&self.platform_name, &link);
        self.publish(user_id, &connection).await
    }

    /// Currently stored connection on the chat platform
    pub async fn fetch(&self, user_id: i64) -> Result<RoleConnection> {
        let endpoint = self.endpoint.clone();
        let (connection, _) = self
            .run(user_id, |access| {
                let endpoint = endpoint.clone();
                async move { endpoint.fetch(&access).await }
            })
            .await?;
        Ok(connection)
    }

    /// Whether the stored token still grants access
    pub async fn check_authorization(&self, user_id: i64) -> Result<bool> {
        match self.fetch(user_id).await {
            Ok(_) => Ok(true),
            Err(AppError::Unauthorized)
            | Err(AppError::ReauthorizationRequired)
            | Err(AppError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drive `Start -> [Refresh] -> Call -> [Refresh -> Call] -> Succeeded | Failed`.
    ///
    /// Only `Unauthorized` leads back to `Refresh`, and only once.
    async fn run<T, F, Fut>(&self, user_id: i64, call: F) -> Result<(T, PublishReport)>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut report = PublishReport::default();
        let mut step = Step::Start;

        loop {
            step = match step {
                Step::Start => match self.tokens.current(user_id).await {
                    Ok(Some(token)) if TokenLifecycle::is_expired(&token, Utc::now()) => Step::Refresh {
                        stale: token,
                        retry: false,
                    },
                    Ok(Some(token)) => Step::Call {
                        token,
                        retry: false,
                    },
                    Ok(None) => Step::Failed(AppError::NotFound {
                        table: self.tokens.table().to_string(),
                        key: user_id.to_string(),
                    }),
                    Err(e) => Step::Failed(e),
                },
                Step::Refresh { stale, retry } => {
                    report.refreshes += 1;
                    match self.tokens.refresh(user_id, &stale).await {
                        Ok(token) => Step::Call { token, retry },
                        Err(e) => Step::Failed(e),
                    }
                }
                Step::Call { token, retry } => {
                    report.push_attempts += 1;
                    match call(token.access_token.clone()).await {
                        Ok(value) => Step::Succeeded(value),
                        Err(e) if e.is_unauthorized() && !retry => {
                            tracing::warn!(
                                "Access token for user {} rejected, refreshing once",
                                user_id
                            );
                            Step::Refresh {
                                stale: token,
                                retry: true,
                            }
                        }
                        Err(e) => Step::Failed(e),
                    }
                }
                Step::Succeeded(value) => return Ok((value, report)),
                Step::Failed(e) => {
                    tracing::warn!(
                        "Metadata call for user {} failed after {} attempts: {}",
                        user_id,
                        report.push_attempts,
                        e
                    );
                    return Err(e);
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::clients::TokenEndpoint;
    use crate::db::{open_database, VaultOptions};
    use crate::models::TokenGrant;

    const USER: i64 = 12345;

    #[derive(Default)]
    struct FakeTokens {
        refreshes: AtomicU32,
        reject: bool,
    }

    #[async_trait]
    impl TokenEndpoint for FakeTokens {
        async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
            Ok(grant(&format!("code-{}", code)))
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant> {
            if self.reject {
                return Err(AppError::ReauthorizationRequired);
            }
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(grant(&format!("refreshed-{}", n)))
        }
    }

    /// Answers pushes from a script, then succeeds
    #[derive(Default)]
    struct ScriptedEndpoint {
        script: Mutex<VecDeque<u16>>,
        pushes: AtomicU32,
        seen_tokens: Mutex<Vec<String>>,
    }

    impl ScriptedEndpoint {
        fn with_script(statuses: &[u16]) -> Self {
            Self {
                script: Mutex::new(statuses.iter().copied().collect()),
                ..Default::default()
            }
        }

        fn answer(&self, access_token: &str) -> Result<()> {
            self.pushes.fetch_add(1, Ordering::SeqCst);
            self.seen_tokens.lock().unwrap().push(access_token.to_string());
            match self.script.lock().unwrap().pop_front() {
                None | Some(200) => Ok(()),
                Some(401) => Err(AppError::Unauthorized),
                Some(status) => Err(AppError::RemoteService {
                    status,
                    body: String::new(),
                }),
            }
        }
    }

    #[async_trait]
    impl MetadataEndpoint for ScriptedEndpoint {
        async fn push(&self, access_token: &str, _connection: &RoleConnection) -> Result<()> {
            self.answer(access_token)
        }

        async fn fetch(&self, access_token: &str) -> Result<RoleConnection> {
            self.answer(access_token).map(|_| RoleConnection::default())
        }
    }

    fn grant(access: &str) -> TokenGrant {
        TokenGrant {
            token_type: "Bearer".into(),
            access_token: access.into(),
            refresh_token: format!("{}-refresh", access),
            expires_in: 3600,
        }
    }

    struct Harness {
        publisher: MetadataPublisher,
        tokens: Arc<FakeTokens>,
        endpoint: Arc<ScriptedEndpoint>,
        token_vault: Arc<Vault<Token>>,
        _dir: tempfile::TempDir,
    }

    async fn harness(tokens: FakeTokens, endpoint: ScriptedEndpoint, expired: bool) -> Harness {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let pool = open_database(&url, 2).await.unwrap();

        let token_vault = Arc::new(
            Vault::<Token>::open(pool.clone(), "discord_tokens", VaultOptions::default())
                .await
                .unwrap(),
        );
        let links = Arc::new(
            Vault::<UserLink>::open(pool, "user_links", VaultOptions::default())
                .await
                .unwrap(),
        );

        let offset = chrono::Duration::hours(1);
        let mut token = Token::from_grant(grant("initial"), Utc::now());
        token.expires_at = if expired {
            Utc::now() - offset
        } else {
            Utc::now() + offset
        };
        token_vault.save(&USER, &token).await.unwrap();

        let tokens = Arc::new(tokens);
        let endpoint = Arc::new(endpoint);
        let lifecycle = Arc::new(TokenLifecycle::new(tokens.clone(), token_vault.clone()));
        let publisher =
            MetadataPublisher::new(lifecycle, endpoint.clone(), links, "shikimori.me");

        Harness {
            publisher,
            tokens,
            endpoint,
            token_vault,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_fresh_token_pushes_once() {
        let h = harness(FakeTokens::default(), ScriptedEndpoint::default(), false).await;

        let report = h.publisher.publish(USER, &RoleConnection::default()).await.unwrap();

        assert_eq!(report, PublishReport { push_attempts: 1, refreshes: 0 });
        assert_eq!(h.tokens.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_refreshes_before_push() {
        let h = harness(FakeTokens::default(), ScriptedEndpoint::default(), true).await;

        let report = h.publisher.publish(USER, &RoleConnection::default()).await.unwrap();

        assert_eq!(report, PublishReport { push_attempts: 1, refreshes: 1 });
        assert_eq!(h.tokens.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(*h.endpoint.seen_tokens.lock().unwrap(), vec!["refreshed-1"]);

        let stored = h.token_vault.get(&USER).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "refreshed-1");
    }

    #[tokio::test]
    async fn test_single_unauthorized_is_recovered() {
        let h = harness(
            FakeTokens::default(),
            ScriptedEndpoint::with_script(&[401, 200]),
            false,
        )
        .await;

        let report = h.publisher.publish(USER, &RoleConnection::default()).await.unwrap();

        assert_eq!(report, PublishReport { push_attempts: 2, refreshes: 1 });
        assert_eq!(
            *h.endpoint.seen_tokens.lock().unwrap(),
            vec!["initial", "refreshed-1"]
        );
    }

    #[tokio::test]
    async fn test_second_unauthorized_fails_without_third_push() {
        let h = harness(
            FakeTokens::default(),
            ScriptedEndpoint::with_script(&[401, 401, 200]),
            false,
        )
        .await;

        let result = h.publisher.publish(USER, &RoleConnection::default()).await;

        assert!(matches!(result, Err(AppError::Unauthorized)));
        assert_eq!(h.endpoint.pushes.load(Ordering::SeqCst), 2);
        assert_eq!(h.tokens.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_failures_are_not_retried() {
        let h = harness(
            FakeTokens::default(),
            ScriptedEndpoint::with_script(&[500]),
            false,
        )
        .await;

        let result = h.publisher.publish(USER, &RoleConnection::default()).await;

        assert!(matches!(result, Err(AppError::RemoteService { status: 500, .. })));
        assert_eq!(h.endpoint.pushes.load(Ordering::SeqCst), 1);
        assert_eq!(h.tokens.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_refresh_keeps_stored_token() {
        let tokens = FakeTokens {
            reject: true,
            ..Default::default()
        };
        let h = harness(tokens, ScriptedEndpoint::default(), true).await;

        let result = h.publisher.publish(USER, &RoleConnection::default()).await;

        assert!(matches!(result, Err(AppError::ReauthorizationRequired)));
        assert_eq!(h.endpoint.pushes.load(Ordering::SeqCst), 0);

        let stored = h.token_vault.get(&USER).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "initial");
    }

    #[tokio::test]
    async fn test_missing_token_is_not_found() {
        let h = harness(FakeTokens::default(), ScriptedEndpoint::default(), false).await;
        h.token_vault.delete(&USER).await.unwrap();

        let result = h.publisher.publish(USER, &RoleConnection::default()).await;
        assert!(matches!(result, Err(AppError::NotFound { .. })));
        assert!(!h.publisher.check_authorization(USER).await.unwrap());
    }

    #[tokio::test]
    async fn test_sync_requires_link() {
        let h = harness(FakeTokens::default(), ScriptedEndpoint::default(), false).await;

        assert!(matches!(
            h.publisher.sync(USER).await,
            Err(AppError::NotFound { .. })
        ));

        h.publisher
            .links
            .save(
                &USER,
                &UserLink {
                    catalog_id: 272747,
                    nickname: "ReN".into(),
                    titles_watched: 10,
                    hours_watched: 50.0,
                },
            )
            .await
            .unwrap();

        let report = h.publisher.sync(USER).await.unwrap();
        assert_eq!(report.push_attempts, 1);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_hit_remote_once() {
        let h = harness(FakeTokens::default(), ScriptedEndpoint::default(), true).await;
        let stale = h.token_vault.get(&USER).await.unwrap().unwrap();
        let lifecycle = h.publisher.tokens();

        let (a, b) = tokio::join!(lifecycle.refresh(USER, &stale), lifecycle.refresh(USER, &stale));

        assert_eq!(a.unwrap().access_token, "refreshed-1");
        assert_eq!(b.unwrap().access_token, "refreshed-1");
        assert_eq!(h.tokens.refreshes.load(Ordering::SeqCst), 1);
    }
}
