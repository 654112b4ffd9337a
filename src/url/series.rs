//! Clause series: delimiter-joined URL fragments over topics or terms.

use serde_yaml::{Mapping, Value};

use super::constructor::{ClauseRenderer, TERM_TAG, find_tokens};
use super::{UrlError, UrlResult};

const SERIES_TAG: &str = "series";
const TEMPLATES_TAG: &str = "templates";
const DELIMITER_TAG: &str = "delimiter";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    /// One clause per search topic
    Topic,
    /// One clause per term of a single topic
    Term,
}

impl SeriesKind {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "TOPIC" => Some(SeriesKind::Topic),
            "TERM" => Some(SeriesKind::Term),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClauseSeries {
    kind: SeriesKind,
    templates: Vec<String>,
    delimiter: String,
}

impl ClauseSeries {
    pub fn new(kind: SeriesKind, templates: Vec<String>, delimiter: impl Into<String>) -> UrlResult<Self> {
        if templates.is_empty() {
            return Err(UrlError::InvalidSeries("series requires at least one template".into()));
        }
        Ok(Self {
            kind,
            templates,
            delimiter: delimiter.into(),
        })
    }

    /// Read `{series, templates, delimiter}`; all three keys are required.
    pub fn from_mapping(name: &str, mapping: &Mapping) -> UrlResult<Self> {
        let field = |key: &str| {
            mapping
                .get(key)
                .ok_or_else(|| UrlError::InvalidSeries(format!("'{name}' is missing '{key}'")))
        };

        let kind_name = field(SERIES_TAG)?
            .as_str()
            .ok_or_else(|| UrlError::InvalidSeries(format!("'{name}' series must be a string")))?;
        let kind = SeriesKind::from_name(kind_name).ok_or_else(|| {
            UrlError::InvalidSeries(format!("'{name}' has unknown series type '{kind_name}'"))
        })?;

        let templates = match field(TEMPLATES_TAG)? {
            Value::Sequence(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        UrlError::InvalidSeries(format!("'{name}' templates must be strings"))
                    })
                })
                .collect::<UrlResult<Vec<_>>>()?,
            Value::String(template) => vec![template.clone()],
            _ => {
                return Err(UrlError::InvalidSeries(format!(
                    "'{name}' templates must be a list of strings"
                )));
            }
        };

        let delimiter = field(DELIMITER_TAG)?
            .as_str()
            .ok_or_else(|| UrlError::InvalidSeries(format!("'{name}' delimiter must be a string")))?;

        Self::new(kind, templates, delimiter)
    }

    #[must_use]
    pub fn kind(&self) -> SeriesKind {
        self.kind
    }

    fn template(&self, position: usize) -> &str {
        let last = self.templates.len().saturating_sub(1);
        &self.templates[position.min(last)]
    }

    /// Render the series; positions whose terms are null are skipped and the
    /// clause index counts only emitted clauses.
    pub(crate) fn construct(&self, renderer: &ClauseRenderer<'_>, topic: Option<&str>) -> UrlResult<String> {
        let mut clauses = Vec::new();
        let mut index = 1;

        match self.kind {
            SeriesKind::Topic => {
                for (position, topic) in renderer.topics().enumerate() {
                    match renderer.construct_clause(self.template(position), Some(topic), false, index) {
                        Ok(clause) => {
                            clauses.push(clause);
                            index += 1;
                        }
                        Err(UrlError::NoneValue(_)) => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
            SeriesKind::Term => {
                let mut candidates = find_tokens(&self.templates[0])
                    .into_iter()
                    .filter(|token| renderer.has_topic(token) || *token == TERM_TAG);
                let token = match (candidates.next(), candidates.next()) {
                    (Some(token), None) => token,
                    _ => {
                        return Err(UrlError::InvalidTerm(format!(
                            "term series template must reference exactly one term: {}",
                            self.templates[0]
                        )));
                    }
                };
                let count = renderer.relevant_terms(token, topic)?.len();
                for position in 0..count {
                    match renderer.construct_clause(self.template(position), topic, true, index) {
                        Ok(clause) => {
                            clauses.push(clause);
                            index += 1;
                        }
                        Err(UrlError::NoneValue(_)) => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        Ok(clauses.join(&self.delimiter))
    }
}
