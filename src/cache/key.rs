//! Composite, reversible cache keys.
//!
//! A key is an ordered list of qualifiers followed by ordered named fields.
//! The stored form separates terms with SOH, names from values with STX,
//! and writes null values as NUL. A list value opens with ETX and each item
//! is terminated by ETX, so single-item and empty lists stay lists. The
//! display form uses `&`, `=`, `|` and `~` instead and is only reversible
//! when those characters do not occur inside terms.

use std::fmt;

use thiserror::Error;

const TERM_DELIMITER: char = '\x01';
const NAME_VALUE_DELIMITER: char = '\x02';
const LIST_DELIMITER: char = '\x03';
const NULL: &str = "\x00";

const TERM_DELIMITER_DISPLAY: char = '&';
const NAME_VALUE_DELIMITER_DISPLAY: char = '=';
const LIST_DELIMITER_DISPLAY: char = '|';
const NULL_DISPLAY: &str = "~";

pub type CacheKeyResult<T> = Result<T, CacheKeyError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheKeyError {
    #[error("Attempting to form empty cache key")]
    Empty,

    #[error("CacheKey qualifiers must precede all fields: {0:?}")]
    FieldAfterQualifier(String),

    #[error("Cache key is not valid UTF-8")]
    InvalidEncoding,
}

/// Value of a named cache key field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    Null,
    Text(String),
    List(Vec<String>),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::List(value)
    }
}

#[derive(Clone, Copy)]
struct Delimiters {
    term: char,
    name_value: char,
    list: char,
    null: &'static str,
}

const STORED: Delimiters = Delimiters {
    term: TERM_DELIMITER,
    name_value: NAME_VALUE_DELIMITER,
    list: LIST_DELIMITER,
    null: NULL,
};

const DISPLAY: Delimiters = Delimiters {
    term: TERM_DELIMITER_DISPLAY,
    name_value: NAME_VALUE_DELIMITER_DISPLAY,
    list: LIST_DELIMITER_DISPLAY,
    null: NULL_DISPLAY,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    qualifiers: Vec<String>,
    fields: Vec<(String, FieldValue)>,
}

impl CacheKey {
    /// Build a key from qualifiers and fields; at least one term is required.
    pub fn new<Q, F, K>(qualifiers: Q, fields: F) -> CacheKeyResult<Self>
    where
        Q: IntoIterator,
        Q::Item: Into<String>,
        F: IntoIterator<Item = (K, FieldValue)>,
        K: Into<String>,
    {
        let qualifiers: Vec<String> = qualifiers.into_iter().map(Into::into).collect();
        let fields: Vec<(String, FieldValue)> =
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if qualifiers.is_empty() && fields.is_empty() {
            return Err(CacheKeyError::Empty);
        }
        Ok(Self { qualifiers, fields })
    }

    #[must_use]
    pub fn qualifiers(&self) -> &[String] {
        &self.qualifiers
    }

    #[must_use]
    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    /// Stored form using control-character delimiters
    #[must_use]
    pub fn encoded(&self) -> String {
        self.render(STORED)
    }

    /// UTF-8 bytes of the stored form, as handed to cache clients
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encoded().into_bytes()
    }

    /// Human-readable form
    #[must_use]
    pub fn display(&self) -> String {
        self.render(DISPLAY)
    }

    fn render(&self, d: Delimiters) -> String {
        let mut terms: Vec<String> = self.qualifiers.clone();
        for (name, value) in &self.fields {
            let rendered = match value {
                FieldValue::Null => d.null.to_string(),
                FieldValue::Text(text) => text.clone(),
                FieldValue::List(items) => {
                    let mut list = String::from(d.list);
                    for item in items {
                        list.push_str(item);
                        list.push(d.list);
                    }
                    list
                }
            };
            terms.push(format!("{name}{}{rendered}", d.name_value));
        }
        terms.join(&d.term.to_string())
    }

    /// Decode either form. The display form is assumed when the key holds
    /// neither SOH nor STX.
    pub fn decode(key: &str) -> CacheKeyResult<Self> {
        if key.is_empty() {
            return Err(CacheKeyError::Empty);
        }
        let is_display = !key.contains(TERM_DELIMITER) && !key.contains(NAME_VALUE_DELIMITER);
        let d = if is_display { DISPLAY } else { STORED };

        let mut qualifiers = Vec::new();
        let mut fields = Vec::new();

        for term in key.split(d.term) {
            match term.split_once(d.name_value) {
                Some((name, raw)) => {
                    let value = if raw == d.null {
                        FieldValue::Null
                    } else if let Some(items) = raw.strip_prefix(d.list) {
                        FieldValue::List(decode_list(items, d.list))
                    } else {
                        FieldValue::Text(raw.to_string())
                    };
                    fields.push((name.to_string(), value));
                }
                None if fields.is_empty() => qualifiers.push(term.to_string()),
                None => return Err(CacheKeyError::FieldAfterQualifier(term.to_string())),
            }
        }

        Self::new(qualifiers, fields)
    }

    pub fn from_bytes(bytes: &[u8]) -> CacheKeyResult<Self> {
        let key = std::str::from_utf8(bytes).map_err(|_| CacheKeyError::InvalidEncoding)?;
        Self::decode(key)
    }
}

/// Items of a list value after its opening delimiter
fn decode_list(items: &str, delimiter: char) -> Vec<String> {
    match items.strip_suffix(delimiter) {
        Some(items) => items.split(delimiter).map(str::to_string).collect(),
        None if items.is_empty() => Vec::new(),
        None => items.split(delimiter).map(str::to_string).collect(),
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> FieldValue {
        FieldValue::Text(value.to_string())
    }

    fn check(key: &CacheKey, display: &str, encoded: &str) {
        assert_eq!(key.display(), display);
        assert_eq!(key.encoded(), encoded);
        assert_eq!(key.to_bytes(), encoded.as_bytes());
        assert_eq!(&CacheKey::decode(display).unwrap(), key);
        assert_eq!(&CacheKey::decode(encoded).unwrap(), key);
        assert_eq!(&CacheKey::from_bytes(encoded.as_bytes()).unwrap(), key);
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = CacheKey::new(Vec::<String>::new(), Vec::<(String, FieldValue)>::new());
        assert_eq!(err, Err(CacheKeyError::Empty));
        assert_eq!(CacheKey::decode(""), Err(CacheKeyError::Empty));
    }

    #[test]
    fn qualifiers_only() {
        let key = CacheKey::new(["alpha", "beta"], Vec::<(String, FieldValue)>::new()).unwrap();
        check(&key, "alpha&beta", "alpha\x01beta");
    }

    #[test]
    fn fields_only() {
        let key = CacheKey::new(Vec::<String>::new(), [("a", text("1")), ("b", text("2"))]).unwrap();
        check(&key, "a=1&b=2", "a\x021\x01b\x022");
    }

    #[test]
    fn null_field() {
        let key = CacheKey::new(["alpha", "beta"], [("a", text("1")), ("b", FieldValue::Null)]).unwrap();
        check(&key, "alpha&beta&a=1&b=~", "alpha\x01beta\x01a\x021\x01b\x02\x00");
    }

    #[test]
    fn list_field() {
        let key = CacheKey::new(
            ["alpha", "beta"],
            [
                ("a", text("1")),
                ("b", FieldValue::List(vec!["b1".into(), "b2".into()])),
            ],
        )
        .unwrap();
        check(
            &key,
            "alpha&beta&a=1&b=|b1|b2|",
            "alpha\x01beta\x01a\x021\x01b\x02\x03b1\x03b2\x03",
        );
    }

    #[test]
    fn short_lists_stay_lists() {
        let single = CacheKey::new(["search"], [("geo", FieldValue::List(vec!["Texas".into()]))]).unwrap();
        check(&single, "search&geo=|Texas|", "search\x01geo\x02\x03Texas\x03");

        let empty = CacheKey::new(["search"], [("geo", FieldValue::List(Vec::new()))]).unwrap();
        check(&empty, "search&geo=|", "search\x01geo\x02\x03");

        let blank = CacheKey::new(["search"], [("geo", FieldValue::List(vec![String::new()]))]).unwrap();
        check(&blank, "search&geo=||", "search\x01geo\x02\x03\x03");

        let text = CacheKey::new(["search"], [("geo", text(""))]).unwrap();
        check(&text, "search&geo=", "search\x01geo\x02");
    }

    #[test]
    fn non_ascii_terms() {
        let key = CacheKey::new(["🐍", "beta"], [("a", text("1")), ("🐲", text("🐉"))]).unwrap();
        check(&key, "🐍&beta&a=1&🐲=🐉", "🐍\x01beta\x01a\x021\x01🐲\x02🐉");
        assert_eq!(
            key.to_bytes(),
            b"\xf0\x9f\x90\x8d\x01beta\x01a\x021\x01\xf0\x9f\x90\xb2\x02\xf0\x9f\x90\x89".to_vec()
        );
    }

    #[test]
    fn qualifier_after_field_is_rejected() {
        assert!(matches!(
            CacheKey::decode("a=1&alpha"),
            Err(CacheKeyError::FieldAfterQualifier(_))
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        assert_eq!(
            CacheKey::from_bytes(&[0xff, 0xfe]),
            Err(CacheKeyError::InvalidEncoding)
        );
    }
}
