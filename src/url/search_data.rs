//! Ordered search topics and their terms

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cache::key::FieldValue;

/// Terms for one topic: a single string or several alternatives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SearchTerms {
    One(String),
    Many(Vec<String>),
}

impl SearchTerms {
    #[must_use]
    pub fn as_vec(&self) -> Vec<&str> {
        match self {
            SearchTerms::One(term) => vec![term.as_str()],
            SearchTerms::Many(terms) => terms.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for SearchTerms {
    fn from(term: &str) -> Self {
        SearchTerms::One(term.to_string())
    }
}

impl From<String> for SearchTerms {
    fn from(term: String) -> Self {
        SearchTerms::One(term)
    }
}

impl From<Vec<String>> for SearchTerms {
    fn from(terms: Vec<String>) -> Self {
        SearchTerms::Many(terms)
    }
}

impl From<Vec<&str>> for SearchTerms {
    fn from(terms: Vec<&str>) -> Self {
        SearchTerms::Many(terms.into_iter().map(str::to_string).collect())
    }
}

/// Ordered map of topic to terms. A `None` topic has no value yet and any
/// URL clause depending on it is omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchData {
    topics: IndexMap<String, Option<SearchTerms>>,
}

impl SearchData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a topic, builder style
    #[must_use]
    pub fn with<T: Into<SearchTerms>>(mut self, topic: &str, terms: Option<T>) -> Self {
        self.insert(topic, terms.map(Into::into));
        self
    }

    pub fn insert(&mut self, topic: &str, terms: Option<SearchTerms>) {
        self.topics.insert(topic.to_string(), terms);
    }

    #[must_use]
    pub fn get(&self, topic: &str) -> Option<&Option<SearchTerms>> {
        self.topics.get(topic)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Option<SearchTerms>)> {
        self.topics.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Fields for search-scoped cache keys, in topic order
    #[must_use]
    pub fn key_fields(&self) -> Vec<(String, FieldValue)> {
        self.topics
            .iter()
            .map(|(topic, terms)| {
                let value = match terms {
                    None => FieldValue::Null,
                    Some(SearchTerms::One(term)) => FieldValue::Text(term.clone()),
                    Some(SearchTerms::Many(terms)) => FieldValue::List(terms.clone()),
                };
                (topic.clone(), value)
            })
            .collect()
    }
}

impl fmt::Display for SearchData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (topic, terms)) in self.topics.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match terms {
                None => write!(f, "{topic}: None")?,
                Some(SearchTerms::One(term)) => write!(f, "{topic}: {term}")?,
                Some(SearchTerms::Many(terms)) => write!(f, "{topic}: [{}]", terms.join(", "))?,
            }
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_shape_is_a_plain_map() {
        let search = SearchData::new()
            .with("problem", Some("Homelessness"))
            .with::<&str>("org", None)
            .with("geo", Some(vec!["Texas", "TX"]));
        let json = serde_json::to_string(&search).unwrap();
        assert_eq!(json, r#"{"problem":"Homelessness","org":null,"geo":["Texas","TX"]}"#);
        let back: SearchData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, search);
        assert_eq!(search.to_string(), "{problem: Homelessness, org: None, geo: [Texas, TX]}");
    }

    #[test]
    fn key_fields_follow_topic_order() {
        let search = SearchData::new()
            .with("problem", Some("Homelessness"))
            .with::<&str>("org", None);
        assert_eq!(
            search.key_fields(),
            vec![
                ("problem".to_string(), FieldValue::Text("Homelessness".to_string())),
                ("org".to_string(), FieldValue::Null),
            ]
        );
    }
}
