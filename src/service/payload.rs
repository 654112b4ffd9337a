//! Community payloads: a map of resource path to JSON object, plus a `root`
//! entry naming the community resource.
//!
//! A relation is either nested JSON or a string path looked up in the
//! payload, so `"problem": "/problems/homelessness"` and
//! `"problem": {"name": "Homelessness"}` are equivalent.

use serde_json::Value;

use super::{ServiceError, ServiceResult};
use crate::url::{SearchData, SearchTerms};

pub const ROOT_KEY: &str = "root";
pub const PROBLEM_TOPIC: &str = "problem";
pub const ORG_TOPIC: &str = "org";
pub const GEO_TOPIC: &str = "geo";

const NAME_KEY: &str = "name";
const ABBREV_KEY: &str = "abbrev";
const LEVELS_KEY: &str = "levels";
const PATH_PARENT_KEY: &str = "path_parent";

/// Geo levels that are never qualified by their parent
const TOP_GEO_LEVELS: [&str; 2] = ["country", "subdivision1"];

/// Related JSON for `field` of `base`. Strings are payload keys; arrays of
/// strings are lists of payload keys with missing entries dropped. Missing
/// fields, missing keys and nulls yield `None`.
#[must_use]
pub fn get_related_json(base: &Value, field: &str, payload: &Value) -> Option<Value> {
    match base.get(field)? {
        Value::Null => None,
        Value::String(key) => payload.get(key).filter(|v| !v.is_null()).cloned(),
        Value::Array(items) if items.first().is_some_and(Value::is_string) => Some(Value::Array(
            items
                .iter()
                .filter_map(|item| item.as_str().and_then(|key| payload.get(key)).cloned())
                .collect(),
        )),
        nested => Some(nested.clone()),
    }
}

fn text(object: &Value, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `[name, abbrev]`, or just the name when there is no abbreviation
fn name_terms(object: &Value) -> Option<Vec<String>> {
    let name = text(object, NAME_KEY)?;
    Some(match text(object, ABBREV_KEY) {
        Some(abbrev) => vec![name, abbrev],
        None => vec![name],
    })
}

fn into_terms(mut terms: Vec<String>) -> SearchTerms {
    if terms.len() == 1 {
        SearchTerms::One(terms.remove(0))
    } else {
        SearchTerms::Many(terms)
    }
}

/// Highest level a geo belongs to: the first key of a `levels` object or
/// the first entry of a `levels` list
fn max_level(geo: &Value) -> Option<String> {
    match geo.get(LEVELS_KEY)? {
        Value::Object(levels) => levels.keys().next().cloned(),
        Value::Array(levels) => levels.first().and_then(Value::as_str).map(str::to_string),
        Value::String(level) => Some(level.clone()),
        _ => None,
    }
}

/// Geo terms for a community.
///
/// Top-level geos and geos without a parent use their own terms. Others
/// pair each of their terms with each of the parent's, e.g.
/// `["Austin, Texas", "Austin, TX"]`.
#[must_use]
pub fn derive_geo_terms(community: &Value, payload: &Value) -> Option<SearchTerms> {
    let geo = get_related_json(community, GEO_TOPIC, payload)?;
    let terms = name_terms(&geo)?;

    let is_top_level = max_level(&geo).is_some_and(|level| TOP_GEO_LEVELS.contains(&level.as_str()));
    let parent_terms = get_related_json(&geo, PATH_PARENT_KEY, payload).and_then(|p| name_terms(&p));
    let Some(parent_terms) = parent_terms.filter(|_| !is_top_level) else {
        return Some(into_terms(terms));
    };

    let paired = terms
        .iter()
        .flat_map(|term| parent_terms.iter().map(move |parent| format!("{term}, {parent}")))
        .collect();
    Some(SearchTerms::Many(paired))
}

/// Search data `{problem, org, geo}` for the community named by the
/// payload's `root`
pub fn derive_search_data(payload: &Value) -> ServiceResult<SearchData> {
    if !payload.is_object() {
        return Err(ServiceError::Payload("payload must be a JSON object".into()));
    }
    let community = get_related_json(payload, ROOT_KEY, payload)
        .filter(Value::is_object)
        .ok_or_else(|| ServiceError::Payload(format!("'{ROOT_KEY}' names no community object")))?;

    let name = |topic: &str| {
        get_related_json(&community, topic, payload)
            .and_then(|related| text(&related, NAME_KEY))
            .map(SearchTerms::One)
    };

    Ok(SearchData::new()
        .with(PROBLEM_TOPIC, name(PROBLEM_TOPIC))
        .with(ORG_TOPIC, name(ORG_TOPIC))
        .with(GEO_TOPIC, derive_geo_terms(&community, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(geo: Value, extra: Value) -> Value {
        let mut payload = json!({
            "/communities/homelessness/us/tx?org=None": {
                "name": "Homelessness in Texas, U.S.",
                "problem": "/problems/homelessness",
                "org": null,
                "geo": geo
            },
            "/problems/homelessness": {"name": "Homelessness"},
            "root": "/communities/homelessness/us/tx?org=None"
        });
        if let (Some(target), Value::Object(extra)) = (payload.as_object_mut(), extra) {
            target.extend(extra);
        }
        payload
    }

    #[test]
    fn geo_without_parent_uses_own_terms() {
        let payload = payload(
            json!("/geos/us/tx"),
            json!({"/geos/us/tx": {"name": "Texas", "abbrev": "TX", "path_parent": "/geos/us"}}),
        );
        let search = derive_search_data(&payload).unwrap();
        assert_eq!(
            serde_json::to_value(&search).unwrap(),
            json!({"problem": "Homelessness", "org": null, "geo": ["Texas", "TX"]})
        );
    }

    #[test]
    fn nested_geo_pairs_with_parent_terms() {
        let payload = payload(
            json!("/geos/us/tx/austin"),
            json!({
                "/geos/us/tx/austin": {
                    "name": "Austin",
                    "levels": {"place": {}},
                    "path_parent": "/geos/us/tx"
                },
                "/geos/us/tx": {"name": "Texas", "abbrev": "TX"}
            }),
        );
        let community = get_related_json(&payload, ROOT_KEY, &payload).unwrap();
        assert_eq!(
            derive_geo_terms(&community, &payload),
            Some(SearchTerms::Many(vec!["Austin, Texas".into(), "Austin, TX".into()]))
        );
    }

    #[test]
    fn top_level_geo_ignores_parent() {
        let payload = payload(
            json!({"name": "Texas", "abbrev": "TX", "levels": ["subdivision1"], "path_parent": "/geos/us"}),
            json!({"/geos/us": {"name": "United States", "abbrev": "US"}}),
        );
        let community = get_related_json(&payload, ROOT_KEY, &payload).unwrap();
        assert_eq!(
            derive_geo_terms(&community, &payload),
            Some(SearchTerms::Many(vec!["Texas".into(), "TX".into()]))
        );
    }

    #[test]
    fn missing_root_is_rejected() {
        assert!(matches!(
            derive_search_data(&json!({"root": "/nowhere"})),
            Err(ServiceError::Payload(_))
        ));
        assert!(matches!(derive_search_data(&json!([1, 2])), Err(ServiceError::Payload(_))));
    }

    #[test]
    fn related_lists_drop_missing_keys() {
        let payload = json!({"/a": {"name": "A"}, "base": {"items": ["/a", "/missing"]}});
        let base = &payload["base"];
        assert_eq!(
            get_related_json(base, "items", &payload),
            Some(json!([{"name": "A"}]))
        );
        assert_eq!(get_related_json(base, "absent", &payload), None);
    }
}
