//! Content models produced by extraction.
//!
//! A model declares its fields once as a [`FieldSpec`] table; the
//! [`Extractable`] trait derives assembly from extracted values, cache hash
//! encoding, JSON rendering and field-wise merging from that table.

pub mod research_article;

pub use research_article::ResearchArticle;

use std::collections::HashMap;

use log::warn;
use thiserror::Error;

use crate::operation::{AssemblyContext, Value};
use crate::utils::{GranularDateTime, Granularity};

/// Hash field naming the model a content hash was written by
pub const MODEL_KEY: &str = "__model__";
pub const SOURCE_URL_FIELD: &str = "source_url";
pub const RANK_FIELD: &str = "rank";
pub const CACHE_VERSION_FIELD: &str = "_cache_version";
pub const LAST_EXTRACTED_FIELD: &str = "_last_extracted";
/// Stored in place of a null field value
pub const NULL_VALUE: &str = "null";

pub type ContentResult<T> = Result<T, ContentError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("Content hash has no '{MODEL_KEY}' entry")]
    MissingModel,

    #[error("Content hash is for model '{found}', expected '{expected}'")]
    ModelMismatch { expected: String, found: String },

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

/// How a field's value is typed, stored and coerced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Int,
    TextList,
    DateTime,
    Granularity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Housekeeping fields are stored but never extracted
    pub private: bool,
}

impl FieldSpec {
    #[must_use]
    pub const fn public(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            private: false,
        }
    }

    #[must_use]
    pub const fn private(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            private: true,
        }
    }

    /// Coerce an extracted value to this field's canonical value
    pub fn coerce(&self, value: Value) -> ContentResult<Value> {
        let invalid = |value: &Value| ContentError::InvalidField {
            field: self.name.to_string(),
            reason: format!("cannot store {} '{value}' as {:?}", value.type_name(), self.kind),
        };

        let coerced = match (self.kind, value) {
            (_, Value::Null) => Value::Null,

            (FieldKind::Text, Value::List(items)) => {
                return Err(invalid(&Value::List(items)));
            }
            (FieldKind::Text, value @ (Value::Page | Value::Element(_))) => return Err(invalid(&value)),
            (FieldKind::Text, value) => Value::Text(value.to_string()),

            (FieldKind::Int, Value::Int(i)) => Value::Int(i),
            (FieldKind::Int, Value::Text(s)) => match s.trim().parse() {
                Ok(i) => Value::Int(i),
                Err(_) => return Err(invalid(&Value::Text(s))),
            },
            (FieldKind::Int, value) => return Err(invalid(&value)),

            (FieldKind::TextList, Value::List(items)) => Value::List(
                items
                    .into_iter()
                    .filter(|item| !item.is_null())
                    .map(|item| Value::Text(item.to_string()))
                    .collect(),
            ),
            (FieldKind::TextList, Value::Text(s)) => Value::List(vec![Value::Text(s)]),
            (FieldKind::TextList, value) => return Err(invalid(&value)),

            (FieldKind::DateTime, Value::DateTime(dt)) => Value::DateTime(dt),
            (FieldKind::DateTime, Value::Text(s)) => match GranularDateTime::deserialize(&s) {
                Ok(dt) => Value::DateTime(dt),
                Err(_) => return Err(invalid(&Value::Text(s))),
            },
            (FieldKind::DateTime, value) => return Err(invalid(&value)),

            (FieldKind::Granularity, Value::Int(i)) => match usize::try_from(i) {
                Ok(v @ 1..=7) => Value::Text(Granularity::from_value_clamped(v).name().to_string()),
                _ => return Err(invalid(&Value::Int(i))),
            },
            (FieldKind::Granularity, Value::Text(s)) => match Granularity::from_name(&s) {
                Ok(granularity) => Value::Text(granularity.name().to_string()),
                Err(_) => return Err(invalid(&Value::Text(s))),
            },
            (FieldKind::Granularity, value) => return Err(invalid(&value)),
        };
        Ok(coerced)
    }

    /// Hash encoding of a canonical value; `None` for null
    #[must_use]
    pub fn encode(&self, value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::List(items) => {
                let items: Vec<String> = items.iter().map(ToString::to_string).collect();
                serde_json::to_string(&items).ok()
            }
            Value::DateTime(dt) => Some(dt.serialize()),
            other => Some(other.to_string()),
        }
    }

    /// Inverse of [`encode`](Self::encode)
    pub fn decode(&self, raw: &str) -> ContentResult<Value> {
        if raw == NULL_VALUE {
            return Ok(Value::Null);
        }
        match self.kind {
            FieldKind::TextList => {
                let items: Vec<String> =
                    serde_json::from_str(raw).map_err(|e| ContentError::InvalidField {
                        field: self.name.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Value::from(items))
            }
            _ => self.coerce(Value::Text(raw.to_string())),
        }
    }
}

/// A conflicting value found while merging a source record over an item
#[derive(Debug, Clone, PartialEq)]
pub struct FieldConflict {
    pub field: &'static str,
    pub existing: Value,
    pub incoming: Value,
}

/// A content model that extractors can assemble and caches can store
pub trait Extractable: Clone + std::fmt::Debug + Default + PartialEq + Send + Sync + 'static {
    /// Discriminator stored under [`MODEL_KEY`]
    const MODEL: &'static str;
    /// Every field, public fields in extraction order with the unique key
    /// first, then housekeeping fields
    const FIELDS: &'static [FieldSpec];

    /// Canonical value of a field; null for unset or unknown fields
    fn get(&self, field: &str) -> Value;

    /// Store a canonical (already coerced) value
    fn put(&mut self, field: &str, value: Value);

    fn spec(field: &str) -> Option<&'static FieldSpec> {
        Self::FIELDS.iter().find(|spec| spec.name == field)
    }

    /// Names of the fields extractors fill in
    fn field_names() -> impl Iterator<Item = &'static str> + Send {
        Self::FIELDS.iter().filter(|spec| !spec.private).map(|spec| spec.name)
    }

    /// Coerce and store a field value
    fn set(&mut self, field: &str, value: Value) -> ContentResult<()> {
        let spec = Self::spec(field).ok_or_else(|| ContentError::InvalidField {
            field: field.to_string(),
            reason: format!("not a field of {}", Self::MODEL),
        })?;
        let value = spec.coerce(value)?;
        self.put(field, value);
        Ok(())
    }

    /// Build a record from assembled field values. Fields that fail to
    /// coerce are logged and left unset.
    fn from_assembly(content: &AssemblyContext) -> Self {
        let mut record = Self::default();
        for spec in Self::FIELDS {
            let Some(value) = content.get(spec.name) else {
                continue;
            };
            if let Err(e) = record.set(spec.name, value.clone()) {
                warn!("Dropping field of {}: {e}", Self::MODEL);
            }
        }
        record
    }

    fn source_url(&self) -> Option<String> {
        match self.get(SOURCE_URL_FIELD) {
            Value::Text(url) => Some(url),
            _ => None,
        }
    }

    fn rank(&self) -> Option<i64> {
        match self.get(RANK_FIELD) {
            Value::Int(rank) => Some(rank),
            _ => None,
        }
    }

    fn set_rank(&mut self, rank: Option<i64>) {
        self.put(RANK_FIELD, Value::from(rank));
    }

    fn cache_version(&self) -> Option<String> {
        match self.get(CACHE_VERSION_FIELD) {
            Value::Text(version) => Some(version),
            _ => None,
        }
    }

    fn last_extracted(&self) -> Option<GranularDateTime> {
        match self.get(LAST_EXTRACTED_FIELD) {
            Value::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    /// Stamp housekeeping fields before storage
    fn mark_extracted(&mut self, cache_version: Option<&str>, now: GranularDateTime) {
        self.put(CACHE_VERSION_FIELD, Value::from(cache_version));
        self.put(LAST_EXTRACTED_FIELD, Value::DateTime(now));
    }

    /// Cache hash: the model discriminator followed by every non-null field
    fn to_hash(&self) -> Vec<(String, String)> {
        let mut hash = vec![(MODEL_KEY.to_string(), Self::MODEL.to_string())];
        for spec in Self::FIELDS {
            if let Some(encoded) = spec.encode(&self.get(spec.name)) {
                hash.push((spec.name.to_string(), encoded));
            }
        }
        hash
    }

    fn from_hash(hash: &HashMap<String, String>) -> ContentResult<Self> {
        let model = hash.get(MODEL_KEY).ok_or(ContentError::MissingModel)?;
        if model != Self::MODEL {
            return Err(ContentError::ModelMismatch {
                expected: Self::MODEL.to_string(),
                found: model.clone(),
            });
        }

        let mut record = Self::default();
        for spec in Self::FIELDS {
            if let Some(raw) = hash.get(spec.name) {
                let value = spec.decode(raw)?;
                record.put(spec.name, value);
            }
        }
        Ok(record)
    }

    /// Every field, nulls included, as a JSON object
    fn to_json(&self) -> serde_json::Value {
        let object = Self::FIELDS
            .iter()
            .map(|spec| (spec.name.to_string(), self.get(spec.name).to_json()))
            .collect();
        serde_json::Value::Object(object)
    }

    /// Overlay the non-null public fields of `other`. Returns the fields
    /// whose differing non-null values were overwritten.
    fn merge_from(&mut self, other: &Self) -> Vec<FieldConflict> {
        let mut conflicts = Vec::new();
        for spec in Self::FIELDS.iter().filter(|spec| !spec.private) {
            let incoming = other.get(spec.name);
            if incoming.is_null() {
                continue;
            }
            let existing = self.get(spec.name);
            if !existing.is_null() && existing != incoming {
                conflicts.push(FieldConflict {
                    field: spec.name,
                    existing,
                    incoming: incoming.clone(),
                });
            }
            self.put(spec.name, incoming);
        }
        conflicts
    }
}
