//! Search URL construction from `{token}` templates.
//!
//! Tokens resolve depth-first: `{index}` is the 1-based clause position, a
//! topic name or `{term}` pulls a search term, and any other token must name
//! a definition that is either another template or a [`ClauseSeries`].

use indexmap::IndexMap;
use serde_yaml::Value;

use super::search_data::SearchData;
use super::series::ClauseSeries;
use super::{UrlError, UrlResult};

pub(crate) const INDEX_TAG: &str = "index";
pub(crate) const TERM_TAG: &str = "term";
const URL_TEMPLATE_TAG: &str = "url_template";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Definition {
    Template(String),
    Series(ClauseSeries),
}

/// Tokens of `template` in order of appearance. Tokens may not contain
/// tokens, so each yielded token is the innermost `{...}` pair.
pub(crate) fn find_tokens(template: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut from = 0;
    while let Some(offset) = template[from..].find('{') {
        let mut start = from + offset;
        let Some(end_offset) = template[start + 1..].find('}') else {
            break;
        };
        let end = start + 1 + end_offset;
        if let Some(inner) = template[start + 1..end].rfind('{') {
            start = start + 1 + inner;
        }
        tokens.push(&template[start + 1..end]);
        from = start + 1;
    }
    tokens
}

/// Percent-encode a term, leaving `/` intact
fn encode_term(term: &str) -> String {
    urlencoding::encode(term).replace("%2F", "/")
}

/// Search data after URL encoding; `None` marks a topic without terms
type EncodedSearch = IndexMap<String, Option<Vec<String>>>;

/// Renders clauses against one encoded search
pub(crate) struct ClauseRenderer<'a> {
    definitions: &'a IndexMap<String, Definition>,
    search: &'a EncodedSearch,
}

impl ClauseRenderer<'_> {
    pub(crate) fn topics(&self) -> impl Iterator<Item = &str> {
        self.search.keys().map(String::as_str)
    }

    pub(crate) fn has_topic(&self, token: &str) -> bool {
        self.search.contains_key(token)
    }

    /// Terms named by `token`, or by the enclosing `topic` for `{term}`
    pub(crate) fn relevant_terms(&self, token: &str, topic: Option<&str>) -> UrlResult<&[String]> {
        let topic = if self.has_topic(token) {
            token
        } else {
            topic.ok_or_else(|| UrlError::UnknownToken(token.to_string()))?
        };
        match self.search.get(topic) {
            Some(Some(terms)) => Ok(terms),
            Some(None) => Err(UrlError::NoneValue(topic.to_string())),
            None => Err(UrlError::UnknownToken(token.to_string())),
        }
    }

    pub(crate) fn construct_clause(
        &self,
        template: &str,
        topic: Option<&str>,
        in_term: bool,
        index: usize,
    ) -> UrlResult<String> {
        let mut rendered = template.to_string();

        for token in find_tokens(template) {
            let value = if token == INDEX_TAG {
                index.to_string()
            } else if self.has_topic(token) || token == TERM_TAG {
                let terms = self.relevant_terms(token, topic)?;
                let term_index = if in_term { index - 1 } else { 0 };
                terms
                    .get(term_index)
                    .cloned()
                    .ok_or_else(|| UrlError::NoneValue(token.to_string()))?
            } else {
                match self.definitions.get(token) {
                    Some(Definition::Template(nested)) => {
                        self.construct_clause(nested, topic, in_term, index)?
                    }
                    Some(Definition::Series(series)) => series.construct(self, topic)?,
                    None => return Err(UrlError::UnknownToken(token.to_string())),
                }
            };
            rendered = rendered.replace(&format!("{{{token}}}"), &value);
        }

        Ok(rendered)
    }
}

/// URL template plus named sub-definitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlConstructor {
    url_template: String,
    definitions: IndexMap<String, Definition>,
}

impl UrlConstructor {
    /// A fixed URL returned as-is by [`construct`](Self::construct)
    #[must_use]
    pub fn shorthand(url: impl Into<String>) -> Self {
        Self {
            url_template: url.into(),
            definitions: IndexMap::new(),
        }
    }

    /// Build from the `url` section of a provider configuration: either a
    /// plain URL string or a mapping with `url_template` and definitions.
    pub fn from_value(config: &Value) -> UrlResult<Self> {
        let mapping = match config {
            Value::String(url) => return Ok(Self::shorthand(url.clone())),
            Value::Mapping(mapping) if mapping.is_empty() => {
                return Err(UrlError::Configuration("url configuration is empty".into()));
            }
            Value::Mapping(mapping) => mapping,
            other => {
                return Err(UrlError::Configuration(format!(
                    "Expected string or mapping for url configuration; received {other:?}"
                )));
            }
        };

        let mut url_template = None;
        let mut definitions = IndexMap::new();

        for (key, value) in mapping {
            let Some(name) = key.as_str() else {
                return Err(UrlError::Configuration(format!("Non-string url key: {key:?}")));
            };
            if name == URL_TEMPLATE_TAG {
                url_template = Some(value.as_str().map(str::to_string).ok_or_else(|| {
                    UrlError::Configuration(format!("'{URL_TEMPLATE_TAG}' must be a string"))
                })?);
                continue;
            }
            let definition = match value {
                Value::String(template) => Definition::Template(template.clone()),
                Value::Mapping(series) => Definition::Series(ClauseSeries::from_mapping(name, series)?),
                other => {
                    return Err(UrlError::Configuration(format!(
                        "Expected string or mapping for '{name}'; received {other:?}"
                    )));
                }
            };
            definitions.insert(name.to_string(), definition);
        }

        let url_template = url_template
            .ok_or_else(|| UrlError::Configuration(format!("Missing '{URL_TEMPLATE_TAG}'")))?;

        Ok(Self {
            url_template,
            definitions,
        })
    }

    #[must_use]
    pub fn is_shorthand(&self) -> bool {
        self.definitions.is_empty()
    }

    #[must_use]
    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    /// Render the URL for `search`
    pub fn construct(&self, search: &SearchData) -> UrlResult<String> {
        if self.is_shorthand() {
            return Ok(self.url_template.clone());
        }

        let encoded: EncodedSearch = search
            .iter()
            .map(|(topic, terms)| {
                let terms = terms
                    .as_ref()
                    .map(|terms| terms.as_vec().into_iter().map(encode_term).collect());
                (topic.clone(), terms)
            })
            .collect();

        let renderer = ClauseRenderer {
            definitions: &self.definitions,
            search: &encoded,
        };
        renderer.construct_clause(&self.url_template, None, false, 1)
    }
}
