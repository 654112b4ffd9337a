use crate::content::{Extractable, FieldKind, FieldSpec};
use crate::operation::Value;
use crate::utils::GranularDateTime;

/// Bibliographic metadata for one research article
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResearchArticle {
    pub source_url: Option<String>,
    pub rank: Option<i64>,
    pub title: Option<String>,
    pub author_names: Option<Vec<String>>,
    pub publication: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub issue_date: Option<GranularDateTime>,
    pub issue_date_granularity: Option<String>,
    pub first_page: Option<String>,
    pub last_page: Option<String>,
    pub doi: Option<String>,
    pub published_timestamp: Option<GranularDateTime>,
    pub granularity_published: Option<String>,
    pub tzinfo_published: Option<String>,
    pub publisher: Option<String>,
    pub summary: Option<String>,
    pub full_text: Option<String>,
    pub cache_version: Option<String>,
    pub last_extracted: Option<GranularDateTime>,
}

const FIELDS: &[FieldSpec] = &[
    FieldSpec::public("source_url", FieldKind::Text),
    FieldSpec::public("rank", FieldKind::Int),
    FieldSpec::public("title", FieldKind::Text),
    FieldSpec::public("author_names", FieldKind::TextList),
    FieldSpec::public("publication", FieldKind::Text),
    FieldSpec::public("volume", FieldKind::Text),
    FieldSpec::public("issue", FieldKind::Text),
    FieldSpec::public("issue_date", FieldKind::DateTime),
    FieldSpec::public("issue_date_granularity", FieldKind::Granularity),
    FieldSpec::public("first_page", FieldKind::Text),
    FieldSpec::public("last_page", FieldKind::Text),
    FieldSpec::public("doi", FieldKind::Text),
    FieldSpec::public("published_timestamp", FieldKind::DateTime),
    FieldSpec::public("granularity_published", FieldKind::Granularity),
    FieldSpec::public("tzinfo_published", FieldKind::Text),
    FieldSpec::public("publisher", FieldKind::Text),
    FieldSpec::public("summary", FieldKind::Text),
    FieldSpec::public("full_text", FieldKind::Text),
    FieldSpec::private("_cache_version", FieldKind::Text),
    FieldSpec::private("_last_extracted", FieldKind::DateTime),
];

fn text(value: Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s),
        _ => None,
    }
}

fn datetime(value: Value) -> Option<GranularDateTime> {
    match value {
        Value::DateTime(dt) => Some(dt),
        _ => None,
    }
}

fn texts(value: Value) -> Option<Vec<String>> {
    match value {
        Value::List(items) => Some(items.into_iter().map(|item| item.to_string()).collect()),
        _ => None,
    }
}

impl Extractable for ResearchArticle {
    const MODEL: &'static str = "research_article";
    const FIELDS: &'static [FieldSpec] = FIELDS;

    fn get(&self, field: &str) -> Value {
        match field {
            "source_url" => Value::from(self.source_url.clone()),
            "rank" => Value::from(self.rank),
            "title" => Value::from(self.title.clone()),
            "author_names" => self.author_names.clone().map_or(Value::Null, Value::from),
            "publication" => Value::from(self.publication.clone()),
            "volume" => Value::from(self.volume.clone()),
            "issue" => Value::from(self.issue.clone()),
            "issue_date" => Value::from(self.issue_date),
            "issue_date_granularity" => Value::from(self.issue_date_granularity.clone()),
            "first_page" => Value::from(self.first_page.clone()),
            "last_page" => Value::from(self.last_page.clone()),
            "doi" => Value::from(self.doi.clone()),
            "published_timestamp" => Value::from(self.published_timestamp),
            "granularity_published" => Value::from(self.granularity_published.clone()),
            "tzinfo_published" => Value::from(self.tzinfo_published.clone()),
            "publisher" => Value::from(self.publisher.clone()),
            "summary" => Value::from(self.summary.clone()),
            "full_text" => Value::from(self.full_text.clone()),
            "_cache_version" => Value::from(self.cache_version.clone()),
            "_last_extracted" => Value::from(self.last_extracted),
            _ => Value::Null,
        }
    }

    fn put(&mut self, field: &str, value: Value) {
        match field {
            "source_url" => self.source_url = text(value),
            "rank" => {
                self.rank = match value {
                    Value::Int(rank) => Some(rank),
                    _ => None,
                }
            }
            "title" => self.title = text(value),
            "author_names" => self.author_names = texts(value),
            "publication" => self.publication = text(value),
            "volume" => self.volume = text(value),
            "issue" => self.issue = text(value),
            "issue_date" => self.issue_date = datetime(value),
            "issue_date_granularity" => self.issue_date_granularity = text(value),
            "first_page" => self.first_page = text(value),
            "last_page" => self.last_page = text(value),
            "doi" => self.doi = text(value),
            "published_timestamp" => self.published_timestamp = datetime(value),
            "granularity_published" => self.granularity_published = text(value),
            "tzinfo_published" => self.tzinfo_published = text(value),
            "publisher" => self.publisher = text(value),
            "summary" => self.summary = text(value),
            "full_text" => self.full_text = text(value),
            "_cache_version" => self.cache_version = text(value),
            "_last_extracted" => self.last_extracted = datetime(value),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentError, MODEL_KEY};
    use crate::operation::AssemblyContext;
    use std::collections::HashMap;

    fn article() -> ResearchArticle {
        let mut content = AssemblyContext::new();
        content.insert("source_url".into(), Value::from("https://journals.example.org/a/1"));
        content.insert("rank".into(), Value::Int(3));
        content.insert("title".into(), Value::from("Housing First"));
        content.insert("author_names".into(), Value::from(vec!["Ann Lee", "Bo Kim"]));
        content.insert("volume".into(), Value::Int(12));
        content.insert(
            "issue_date".into(),
            Value::DateTime(GranularDateTime::strptime("March 2019", &["%B %Y"]).unwrap()),
        );
        content.insert("issue_date_granularity".into(), Value::Int(2));
        content.insert("doi".into(), Value::Null);
        ResearchArticle::from_assembly(&content)
    }

    #[test]
    fn assembly_coerces_fields() {
        let article = article();
        assert_eq!(article.volume.as_deref(), Some("12"));
        assert_eq!(article.issue_date_granularity.as_deref(), Some("MONTH"));
        assert_eq!(article.rank(), Some(3));
        assert!(article.doi.is_none());
        assert_eq!(ResearchArticle::field_names().count(), 18);
    }

    #[test]
    fn hash_round_trip_omits_nulls() {
        let mut article = article();
        article.mark_extracted(Some("2019-04-01-01"), GranularDateTime::now());

        let hash: HashMap<String, String> = article.to_hash().into_iter().collect();
        assert_eq!(hash[MODEL_KEY], "research_article");
        assert_eq!(hash["issue_date"], "2019-03");
        assert!(!hash.contains_key("doi"));

        let restored = ResearchArticle::from_hash(&hash).unwrap();
        assert_eq!(restored, article);
    }

    #[test]
    fn foreign_models_are_rejected() {
        let hash = HashMap::from([(MODEL_KEY.to_string(), "news_story".to_string())]);
        assert!(matches!(
            ResearchArticle::from_hash(&hash),
            Err(ContentError::ModelMismatch { .. })
        ));
    }

    #[test]
    fn merge_overlays_non_null_fields() {
        let mut item = article();
        let source = ResearchArticle {
            title: Some("Housing First: A Review".into()),
            doi: Some("10.1000/xyz".into()),
            ..ResearchArticle::default()
        };

        let conflicts = item.merge_from(&source);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field, "title");
        assert_eq!(item.title.as_deref(), Some("Housing First: A Review"));
        assert_eq!(item.doi.as_deref(), Some("10.1000/xyz"));
        assert_eq!(item.volume.as_deref(), Some("12"));
    }
}
