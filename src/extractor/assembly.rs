//! Record assembly: run each field's configuration against one target.

use indexmap::IndexMap;
use log::{debug, warn};

use crate::browser::Session;
use crate::content::{Extractable, SOURCE_URL_FIELD};
use crate::operation::{AssemblyContext, FieldConfig, OperationContext, Value};

/// Assemble one record from `target`, the page or an item element.
///
/// Preset values (the page URL, a rank) are kept as given. The unique key
/// is extracted first so later fields can refer back to it, then the
/// remaining model fields in declaration order. A field whose extraction
/// fails is logged with the partial record and left unset; a field with no
/// configuration is null.
pub async fn assemble<M: Extractable>(
    fields: &IndexMap<String, FieldConfig>,
    session: &dyn Session,
    target: &Value,
    index: usize,
    preset: AssemblyContext,
    label: &str,
) -> M {
    let mut content = preset;

    if !content.contains_key(SOURCE_URL_FIELD) {
        extract_field(fields, SOURCE_URL_FIELD, session, target, index, &mut content, label).await;
    }

    for field in M::field_names() {
        if content.contains_key(field) {
            continue;
        }
        extract_field(fields, field, session, target, index, &mut content, label).await;
    }

    M::from_assembly(&content)
}

async fn extract_field(
    fields: &IndexMap<String, FieldConfig>,
    field: &str,
    session: &dyn Session,
    target: &Value,
    index: usize,
    content: &mut AssemblyContext,
    label: &str,
) {
    let Some(config) = fields.get(field) else {
        debug!("{label}: no configuration for field '{field}'");
        content.insert(field.to_string(), Value::Null);
        return;
    };

    let result = {
        let ctx = OperationContext::new(session, content, label);
        config.execute(target.clone(), index, &ctx).await
    };

    match result {
        Ok(value) => {
            content.insert(field.to_string(), value);
        }
        Err(e) => warn!("{label}: failed to extract '{field}' (record so far: {content:?}): {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::StaticSession;
    use crate::content::ResearchArticle;
    use std::collections::HashMap;

    const PAGE: &str = r#"<html><body>
        <h1 class="title">Housing First</h1>
        <span class="author">A. Author</span><span class="author">B. Author</span>
    </body></html>"#;

    fn fields(yaml: &str) -> IndexMap<String, FieldConfig> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        value
            .as_mapping()
            .unwrap()
            .iter()
            .map(|(k, v)| {
                let name = k.as_str().unwrap();
                (name.to_string(), FieldConfig::from_value(name, v).unwrap())
            })
            .collect()
    }

    #[tokio::test]
    async fn failed_fields_are_left_unset() {
        let url = "https://example.org/article";
        let session =
            StaticSession::with_fixtures(HashMap::from([(url.to_string(), PAGE.to_string())]));
        session.set_implicit_wait(std::time::Duration::ZERO);
        session.navigate(url).await.unwrap();

        let fields = fields(
            r#"
title:
  class_name: title
  getattr: text
author_names:
  class_name: author
  is_multiple: true
  getattr: text
doi:
  class_name: doi
  getattr: text
publisher: Example Press
"#,
        );
        let preset = AssemblyContext::from([(SOURCE_URL_FIELD.to_string(), Value::from(url))]);
        let article: ResearchArticle =
            assemble(&fields, &session, &Value::Page, 1, preset, "test").await;

        assert_eq!(article.source_url.as_deref(), Some(url));
        assert_eq!(article.title.as_deref(), Some("Housing First"));
        assert_eq!(
            article.author_names,
            Some(vec!["A. Author".to_string(), "B. Author".to_string()])
        );
        assert_eq!(article.publisher.as_deref(), Some("Example Press"));
        assert!(article.doi.is_none());
        assert!(article.summary.is_none());
    }
}
