//! Property tests for status aggregation and cache key encoding

use contextualize::cache::{CacheKey, FieldValue};
use contextualize::extraction::ExtractionStatus;
use proptest::prelude::*;

fn status() -> impl Strategy<Value = ExtractionStatus> {
    prop::sample::select(ExtractionStatus::ALL.to_vec())
}

/// Terms free of display delimiters, including non-ASCII letters and the
/// empty string
fn term() -> impl Strategy<Value = String> {
    "[\\p{L}\\p{N}._/-]{0,12}"
}

fn field_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Null),
        term().prop_map(FieldValue::Text),
        prop::collection::vec(term(), 0..5).prop_map(FieldValue::List),
    ]
}

proptest! {
    #[test]
    fn aggregate_ignores_order(mut statuses in prop::collection::vec(status(), 1..12)) {
        let forward = ExtractionStatus::aggregate(statuses.iter().copied());
        statuses.reverse();
        prop_assert_eq!(forward, ExtractionStatus::aggregate(statuses.iter().copied()));
    }

    #[test]
    fn aggregate_is_completed_only_when_all_are(statuses in prop::collection::vec(status(), 1..12)) {
        let overall = ExtractionStatus::aggregate(statuses.iter().copied());
        let all_completed = statuses.iter().all(|s| *s == ExtractionStatus::Completed);
        prop_assert_eq!(overall == Some(ExtractionStatus::Completed), all_completed);
    }

    #[test]
    fn aggregate_reports_progress_when_any_member_has_results(
        statuses in prop::collection::vec(status(), 1..12)
    ) {
        let overall = ExtractionStatus::aggregate(statuses.iter().copied()).unwrap();
        let any_results = statuses.iter().any(|s| *s >= ExtractionStatus::Preliminary);
        if any_results {
            prop_assert!(overall >= ExtractionStatus::Preliminary);
        } else {
            prop_assert_eq!(Some(overall), statuses.iter().copied().max());
        }
    }

    #[test]
    fn aggregate_of_one_is_itself(status in status()) {
        prop_assert_eq!(ExtractionStatus::aggregate([status]), Some(status));
    }

    #[test]
    fn cache_keys_decode_to_themselves(
        qualifiers in prop::collection::vec("[a-z]{1,8}", 0..3),
        fields in prop::collection::vec(("[a-z_]{1,8}", field_value()), 0..4),
    ) {
        prop_assume!(!qualifiers.is_empty() || !fields.is_empty());
        let key = CacheKey::new(qualifiers, fields).unwrap();
        prop_assert_eq!(&CacheKey::from_bytes(&key.to_bytes()).unwrap(), &key);
        prop_assert_eq!(&CacheKey::decode(&key.display()).unwrap(), &key);
    }
}
