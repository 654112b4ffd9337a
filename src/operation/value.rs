//! Values flowing between operation phases.

use std::fmt;

use indexmap::IndexMap;

use super::{OperationError, OperationResult};
use crate::browser::ElementHandle;
use crate::utils::GranularDateTime;

/// Field name to already-resolved value for the record being assembled.
/// Back-references (`<title>`) resolve against it.
pub type AssemblyContext = IndexMap<String, Value>;

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(GranularDateTime),
    /// The session's current page as a find target
    Page,
    Element(ElementHandle),
    List(Vec<Value>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Falsy values: null, false, zero, empty text and empty lists
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::DateTime(_) | Value::Page | Value::Element(_) => true,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::DateTime(_) => "datetime",
            Value::Page => "page",
            Value::Element(_) => "element",
            Value::List(_) => "list",
        }
    }

    /// Named attribute used by dotted back-references (`<issue_date.year>`)
    pub fn attribute(&self, name: &str) -> OperationResult<Value> {
        let unknown = || OperationError::UnknownAttribute {
            attribute: name.to_string(),
            value: self.type_name().to_string(),
        };
        match self {
            Value::DateTime(dt) => dt.component(name).map(Value::Int).ok_or_else(unknown),
            Value::List(items) if name == "len" => Ok(Value::Int(i64::try_from(items.len()).unwrap_or(i64::MAX))),
            _ => Err(unknown()),
        }
    }

    /// A list's items, or the value itself as a one-item list
    #[must_use]
    pub fn enlist(self) -> Vec<Value> {
        match self {
            Value::List(items) => items,
            other => vec![other],
        }
    }

    /// Collapse a list: empty to null, one item to that item; longer lists
    /// stay as they are.
    #[must_use]
    pub fn delist(values: Vec<Value>) -> Value {
        match values.len() {
            0 => Value::Null,
            1 => values.into_iter().next().unwrap_or_default(),
            _ => Value::List(values),
        }
    }

    /// Convert a browser property value
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Value {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float))
                .unwrap_or(Value::Null),
            Json::String(s) => Value::Text(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from_json).collect()),
            object @ Json::Object(_) => Value::Text(object.to_string()),
        }
    }

    /// JSON rendering for responses; datetimes use their granular ISO form
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(x) => serde_json::Number::from_f64(*x).map_or(Json::Null, Json::Number),
            Value::Text(s) => Json::String(s.clone()),
            Value::DateTime(dt) => Json::String(dt.serialize()),
            Value::Page | Value::Element(_) => Json::String(self.to_string()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    /// Convert a constant from provider configuration
    #[must_use]
    pub fn from_yaml(yaml: &serde_yaml::Value) -> Value {
        use serde_yaml::Value as Yaml;
        match yaml {
            Yaml::Null => Value::Null,
            Yaml::Bool(b) => Value::Bool(*b),
            Yaml::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float))
                .unwrap_or(Value::Null),
            Yaml::String(s) => Value::Text(s.clone()),
            Yaml::Sequence(items) => Value::List(items.iter().map(Value::from_yaml).collect()),
            Yaml::Mapping(_) | Yaml::Tagged(_) => {
                Value::Text(serde_yaml::to_string(yaml).unwrap_or_default().trim_end().to_string())
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) | (Value::Page, Value::Page) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Element(a), Value::Element(b)) => a.ptr_eq(b),
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

/// Null renders empty so it disappears from rendered templates
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::DateTime(dt) => write!(f, "{dt}"),
            Value::Page => f.write_str("<page>"),
            Value::Element(_) => f.write_str("<element>"),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<GranularDateTime> for Value {
    fn from(dt: GranularDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

/// Exactly one argument
pub(crate) fn one<T>(values: Vec<T>, what: &str) -> OperationResult<T> {
    let count = values.len();
    let mut iter = values.into_iter();
    match (iter.next(), count) {
        (Some(first), 1) => Ok(first),
        (None, _) => Err(OperationError::TooFewValues {
            expected: 1,
            context: what.to_string(),
        }),
        _ => Err(OperationError::TooManyValues {
            expected: 1,
            received: count,
            context: what.to_string(),
        }),
    }
}

/// At least one argument
pub(crate) fn one_min<T>(values: Vec<T>, what: &str) -> OperationResult<Vec<T>> {
    if values.is_empty() {
        return Err(OperationError::TooFewValues {
            expected: 1,
            context: what.to_string(),
        });
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Text(String::new()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Text("x".into()).is_truthy());
        assert!(Value::Page.is_truthy());
    }

    #[test]
    fn delist_collapses_singletons() {
        assert_eq!(Value::delist(vec![]), Value::Null);
        assert_eq!(Value::delist(vec!["a".into()]), Value::from("a"));
        assert_eq!(
            Value::delist(vec!["a".into(), "b".into()]),
            Value::List(vec!["a".into(), "b".into()])
        );
        assert_eq!(Value::Null.enlist(), vec![Value::Null]);
    }

    #[test]
    fn display_renders_null_empty() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::from(vec!["a", "b"]).to_string(), "[a, b]");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
    }

    #[test]
    fn datetime_components_are_attributes() {
        let dt = GranularDateTime::strptime("March 2019", &["%B %Y"]).unwrap();
        let value = Value::DateTime(dt);
        assert_eq!(value.attribute("year").unwrap(), Value::Int(2019));
        assert_eq!(value.attribute("granularity").unwrap(), Value::Int(2));
        assert!(matches!(
            value.attribute("weekday"),
            Err(OperationError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn json_properties_convert() {
        let json = serde_json::json!({"a": 1});
        assert_eq!(Value::from_json(serde_json::json!(3)), Value::Int(3));
        assert_eq!(Value::from_json(serde_json::json!(true)), Value::Bool(true));
        assert_eq!(Value::from_json(json), Value::from(r#"{"a":1}"#));
    }

    #[test]
    fn argument_arity() {
        assert_eq!(one(vec!["x"], "format").unwrap(), "x");
        assert!(matches!(one(Vec::<&str>::new(), "format"), Err(OperationError::TooFewValues { .. })));
        assert!(matches!(one(vec!["a", "b"], "join"), Err(OperationError::TooManyValues { .. })));
        assert!(one_min(Vec::<&str>::new(), "excise").is_err());
    }
}
