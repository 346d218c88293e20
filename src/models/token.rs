use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::schema::{duration_secs, Field, FieldKind, Model, RecordSchema};

/// Longest lifetime honoured from a token grant (one year)
const MAX_TOKEN_LIFETIME_SECS: u64 = 365 * 24 * 3600;

const TOKEN_SCHEMA: RecordSchema = RecordSchema::new(
    "token",
    "user_id",
    &[
        Field::new("token_type", FieldKind::Text),
        Field::new("access_token", FieldKind::Text),
        Field::new("refresh_token", FieldKind::Text),
        Field::new("expires_in", FieldKind::Integer),
        Field::new("expires_at", FieldKind::Timestamp),
    ],
);

/// Successful answer of an OAuth token endpoint
#[derive(Clone, Deserialize)]
pub struct TokenGrant {
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime in seconds
    pub expires_in: u64,
}

/// OAuth credential pair owned by one user
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "duration_secs")]
    pub expires_in: Duration,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Build a token from a grant received at `now`
    pub fn from_grant(grant: TokenGrant, now: DateTime<Utc>) -> Self {
        let lifetime = grant.expires_in.min(MAX_TOKEN_LIFETIME_SECS);
        Self {
            token_type: grant.token_type,
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_in: Duration::from_secs(lifetime),
            expires_at: now + chrono::Duration::seconds(lifetime as i64),
        }
    }

    /// Expired at and after `expires_at`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl Model for Token {
    const SCHEMA: &'static RecordSchema = &TOKEN_SCHEMA;
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("token_type", &self.token_type)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}
