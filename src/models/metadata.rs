use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::UserLink;

/// Metadata key for the number of completed titles
pub const TITLES_WATCHED_KEY: &str = "titles_watched";

/// Metadata key for the whole hours spent watching
pub const HOURS_WATCHING_KEY: &str = "hours_watching";

/// Role-connection object as exchanged with the chat platform
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoleConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_username: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RoleConnection {
    /// Payload pushed for a linked profile
    pub fn from_link(platform_name: &str, link: &UserLink) -> Self {
        let mut metadata = Map::new();
        metadata.insert(TITLES_WATCHED_KEY.into(), Value::from(link.titles_watched));
        // integer comparisons only, partial hours are dropped
        metadata.insert(
            HOURS_WATCHING_KEY.into(),
            Value::from(link.hours_watched.max(0.0).floor() as i64),
        );

        Self {
            platform_name: Some(platform_name.to_string()),
            platform_username: (!link.nickname.is_empty()).then(|| link.nickname.clone()),
            metadata,
        }
    }
}
