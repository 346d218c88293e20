use serde::{Deserialize, Serialize};

use crate::db::schema::{Field, FieldKind, Model, RecordSchema};

const USER_LINK_SCHEMA: RecordSchema = RecordSchema::new(
    "user_link",
    "user_id",
    &[
        Field::new("catalog_id", FieldKind::Integer),
        Field::new("nickname", FieldKind::Text),
        Field::new("titles_watched", FieldKind::Integer),
        Field::new("hours_watched", FieldKind::Float),
    ],
);

/// Catalog-site profile linked to a chat user, keyed by the chat user id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLink {
    pub catalog_id: i64,
    pub nickname: String,
    pub titles_watched: i64,
    pub hours_watched: f64,
}

impl Model for UserLink {
    const SCHEMA: &'static RecordSchema = &USER_LINK_SCHEMA;
}
