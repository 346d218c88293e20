//! Static record declarations and the coercion rules that turn loosely typed
//! input into canonical, storable records.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Number, Value as JsonValue};

use crate::constants::{IDENTITY_COLUMN, MAX_IDENTIFIER_LEN, TEXT_COLUMN_WIDTH};
use crate::error::{AppError, Result};

/// Naive timestamp form accepted on input (interpreted as UTC)
const NAIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Primitive kind of a declared field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Text,
    Float,
    Timestamp,
}

impl FieldKind {
    /// Column type used when provisioning a table
    pub fn storage_type(self) -> &'static str {
        match self {
            FieldKind::Integer => "BIGINT",
            FieldKind::Text => "VARCHAR(255)",
            FieldKind::Float => "REAL",
            FieldKind::Timestamp => "DATETIME",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl Field {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Static description of one record type.
///
/// Declared once per type as a constant; the field order is the column order.
#[derive(Debug, PartialEq, Eq)]
pub struct RecordSchema {
    /// Human readable type name, used in error messages
    pub name: &'static str,
    /// Name of the external-key column
    pub key: &'static str,
    pub fields: &'static [Field],
}

impl RecordSchema {
    pub const fn new(name: &'static str, key: &'static str, fields: &'static [Field]) -> Self {
        Self { name, key, fields }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check that the declaration can be mapped onto a table
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(AppError::InvalidSchema(format!(
                "{} declares no fields",
                self.name
            )));
        }

        validate_identifier(self.key)?;

        for (i, field) in self.fields.iter().enumerate() {
            validate_identifier(field.name)?;

            if field.name == self.key || field.name == IDENTITY_COLUMN {
                return Err(AppError::InvalidSchema(format!(
                    "{}: field '{}' collides with a reserved column",
                    self.name, field.name
                )));
            }

            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(AppError::InvalidSchema(format!(
                    "{}: duplicate field '{}'",
                    self.name, field.name
                )));
            }
        }

        if self.key == IDENTITY_COLUMN {
            return Err(AppError::InvalidSchema(format!(
                "{}: key column may not be named '{}'",
                self.name, IDENTITY_COLUMN
            )));
        }

        Ok(())
    }

    /// Coerce a loosely typed JSON object into a canonical record.
    ///
    /// The object must carry exactly the declared fields.
    pub fn coerce(&'static self, input: &JsonValue) -> Result<Record> {
        let object = input.as_object().ok_or_else(|| {
            AppError::SchemaMismatch(format!("{}: expected an object", self.name))
        })?;

        if let Some(extra) = object.keys().find(|k| self.field(k).is_none()) {
            return Err(AppError::SchemaMismatch(format!(
                "{}: unknown field '{}'",
                self.name, extra
            )));
        }

        let values = self
            .fields
            .iter()
            .map(|field| {
                let raw = object.get(field.name).ok_or_else(|| {
                    AppError::SchemaMismatch(format!(
                        "{}: missing field '{}'",
                        self.name, field.name
                    ))
                })?;
                coerce_value(field, raw).ok_or_else(|| {
                    AppError::SchemaMismatch(format!(
                        "{}: field '{}' cannot hold {}",
                        self.name, field.name, raw
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Record {
            schema: self,
            values,
        })
    }

    /// Accept a record that was already built against this schema
    pub fn accept(&'static self, record: Record) -> Result<Record> {
        if record.schema != self {
            return Err(AppError::SchemaMismatch(format!(
                "expected a {} record, got {}",
                self.name, record.schema.name
            )));
        }
        Ok(record)
    }
}

/// Table and column names are spliced into statements, so they are restricted
/// to plain identifiers.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = name.len() <= MAX_IDENTIFIER_LEN
        && matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidSchema(format!(
            "'{}' is not a valid identifier",
            name
        )))
    }
}

fn coerce_value(field: &Field, raw: &JsonValue) -> Option<Value> {
    match field.kind {
        FieldKind::Integer => coerce_integer(raw).map(Value::Integer),
        FieldKind::Float => coerce_float(raw).map(Value::Float),
        FieldKind::Text => coerce_text(raw).map(Value::Text),
        FieldKind::Timestamp => coerce_timestamp(raw).map(Value::Timestamp),
    }
}

fn coerce_integer(raw: &JsonValue) -> Option<i64> {
    match raw {
        JsonValue::Number(n) => n.as_i64().or_else(|| {
            let f = n.as_f64()?;
            (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
        }),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_float(raw: &JsonValue) -> Option<f64> {
    let value = match raw {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

fn coerce_text(raw: &JsonValue) -> Option<String> {
    let text = match raw {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        _ => return None,
    };
    (text.chars().count() <= TEXT_COLUMN_WIDTH).then_some(text)
}

fn coerce_timestamp(raw: &JsonValue) -> Option<DateTime<Utc>> {
    match raw {
        JsonValue::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s.trim(), NAIVE_TIMESTAMP_FORMAT)
                    .ok()
                    .map(|naive| Utc.from_utc_datetime(&naive))
            }),
        JsonValue::Number(n) => DateTime::from_timestamp(n.as_i64()?, 0),
        _ => None,
    }
}

/// A single stored primitive
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Text(String),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn kind(&self) -> FieldKind {
        match self {
            Value::Integer(_) => FieldKind::Integer,
            Value::Text(_) => FieldKind::Text,
            Value::Float(_) => FieldKind::Float,
            Value::Timestamp(_) => FieldKind::Timestamp,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Integer(v) => JsonValue::from(*v),
            Value::Text(v) => JsonValue::from(v.as_str()),
            Value::Float(v) => Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Timestamp(v) => {
                JsonValue::from(v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

/// A value conforming to a [`RecordSchema`], one entry per declared field in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: &'static RecordSchema,
    values: Vec<Value>,
}

impl Record {
    /// Build a record from values decoded out of storage.
    ///
    /// Kinds are checked against the declaration.
    pub(crate) fn from_values(schema: &'static RecordSchema, values: Vec<Value>) -> Result<Self> {
        let conforms = values.len() == schema.fields.len()
            && schema
                .fields
                .iter()
                .zip(&values)
                .all(|(field, value)| field.kind == value.kind());

        if !conforms {
            return Err(AppError::SchemaMismatch(format!(
                "{}: stored row does not match the declaration",
                schema.name
            )));
        }

        Ok(Self { schema, values })
    }

    pub fn schema(&self) -> &'static RecordSchema {
        self.schema
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema
            .fields
            .iter()
            .position(|f| f.name == name)
            .map(|i| &self.values[i])
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static Field, &Value)> + '_ {
        self.schema.fields.iter().zip(self.values.iter())
    }

    pub fn to_json(&self) -> JsonValue {
        let map: Map<String, JsonValue> = self
            .iter()
            .map(|(field, value)| (field.name.to_string(), value.to_json()))
            .collect();
        JsonValue::Object(map)
    }
}

/// A Rust type persisted through a vault.
///
/// The type serializes to a JSON object whose keys match `SCHEMA`.
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    const SCHEMA: &'static RecordSchema;

    fn to_record(&self) -> Result<Record> {
        let json = serde_json::to_value(self)
            .map_err(|e| AppError::SchemaMismatch(format!("{}: {}", Self::SCHEMA.name, e)))?;
        Self::SCHEMA.coerce(&json)
    }

    fn from_record(record: Record) -> Result<Self> {
        let record = Self::SCHEMA.accept(record)?;
        serde_json::from_value(record.to_json())
            .map_err(|e| AppError::SchemaMismatch(format!("{}: {}", Self::SCHEMA.name, e)))
    }
}

/// Serde helper storing a `std::time::Duration` as whole seconds
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    const PROFILE: RecordSchema = RecordSchema::new(
        "profile",
        "user_id",
        &[
            Field::new("nickname", FieldKind::Text),
            Field::new("score", FieldKind::Integer),
            Field::new("ratio", FieldKind::Float),
            Field::new("seen_at", FieldKind::Timestamp),
        ],
    );

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        nickname: String,
        score: i64,
        ratio: f64,
        seen_at: DateTime<Utc>,
    }

    impl Model for Profile {
        const SCHEMA: &'static RecordSchema = &PROFILE;
    }

    fn sample() -> JsonValue {
        json!({
            "nickname": "ReN",
            "score": 10,
            "ratio": 0.5,
            "seen_at": "2024-03-01T12:00:00Z",
        })
    }

    #[test]
    fn test_validate_accepts_declaration() {
        assert!(PROFILE.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_bad_names() {
        const DUP: RecordSchema = RecordSchema::new(
            "dup",
            "user_id",
            &[
                Field::new("a", FieldKind::Text),
                Field::new("a", FieldKind::Integer),
            ],
        );
        assert!(matches!(DUP.validate(), Err(AppError::InvalidSchema(_))));

        const INJECT: RecordSchema =
            RecordSchema::new("inject", "user_id", &[Field::new("a; DROP", FieldKind::Text)]);
        assert!(matches!(INJECT.validate(), Err(AppError::InvalidSchema(_))));

        const SHADOW: RecordSchema =
            RecordSchema::new("shadow", "user_id", &[Field::new("user_id", FieldKind::Text)]);
        assert!(matches!(SHADOW.validate(), Err(AppError::InvalidSchema(_))));
    }

    #[test]
    fn test_coerce_canonical_input() {
        let record = PROFILE.coerce(&sample()).unwrap();
        assert_eq!(record.get("nickname"), Some(&Value::Text("ReN".into())));
        assert_eq!(record.get("score"), Some(&Value::Integer(10)));
        assert_eq!(record.get("ratio"), Some(&Value::Float(0.5)));
        assert_eq!(
            record.get("seen_at"),
            Some(&Value::Timestamp(
                Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
            ))
        );
    }

    #[test]
    fn test_coerce_loose_input() {
        let loose = json!({
            "nickname": 272747,
            "score": "11",
            "ratio": 2,
            "seen_at": "2024-03-01 12:00:00",
        });
        let record = PROFILE.coerce(&loose).unwrap();
        assert_eq!(record.get("nickname"), Some(&Value::Text("272747".into())));
        assert_eq!(record.get("score"), Some(&Value::Integer(11)));
        assert_eq!(record.get("ratio"), Some(&Value::Float(2.0)));
        assert_eq!(record, PROFILE.coerce(&json!({
            "nickname": "272747",
            "score": 11.0,
            "ratio": "2",
            "seen_at": 1709294400,
        })).unwrap());
    }

    #[test]
    fn test_coerce_rejects_wrong_field_set() {
        let mut missing = sample();
        missing.as_object_mut().unwrap().remove("score");
        assert!(matches!(
            PROFILE.coerce(&missing),
            Err(AppError::SchemaMismatch(_))
        ));

        let mut extra = sample();
        extra
            .as_object_mut()
            .unwrap()
            .insert("admin".into(), json!(true));
        assert!(matches!(
            PROFILE.coerce(&extra),
            Err(AppError::SchemaMismatch(_))
        ));

        assert!(PROFILE.coerce(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_coerce_rejects_uncoercible_values() {
        for (field, bad) in [
            ("score", json!("ten")),
            ("score", json!(1.5)),
            ("ratio", json!(null)),
            ("seen_at", json!("yesterday")),
            ("nickname", json!("x".repeat(TEXT_COLUMN_WIDTH + 1))),
            ("nickname", json!({"nested": true})),
        ] {
            let mut input = sample();
            input.as_object_mut().unwrap().insert(field.into(), bad);
            assert!(
                matches!(PROFILE.coerce(&input), Err(AppError::SchemaMismatch(_))),
                "{} should be rejected",
                field
            );
        }
    }

    #[test]
    fn test_model_conversion_preserves_fields() {
        let profile: Profile = serde_json::from_value(sample()).unwrap();
        let record = profile.to_record().unwrap();
        assert_eq!(record.to_json()["seen_at"], "2024-03-01T12:00:00Z");
        assert_eq!(Profile::from_record(record).unwrap(), profile);
    }

    #[test]
    fn test_from_values_checks_kinds() {
        let bad = vec![
            Value::Integer(1),
            Value::Integer(2),
            Value::Float(0.0),
            Value::Timestamp(Utc::now()),
        ];
        assert!(Record::from_values(&PROFILE, bad).is_err());
    }

    #[test]
    fn test_duration_secs_helper() {
        #[derive(Serialize, Deserialize)]
        struct Lifetime {
            #[serde(with = "duration_secs")]
            expires_in: std::time::Duration,
        }

        let json = serde_json::to_value(Lifetime {
            expires_in: std::time::Duration::from_secs(604800),
        })
        .unwrap();
        assert_eq!(json, json!({"expires_in": 604800}));

        let back: Lifetime = serde_json::from_value(json).unwrap();
        assert_eq!(back.expires_in.as_secs(), 604800);
    }
}
