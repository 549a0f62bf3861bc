//! Property-based tests for record metadata merging.
//!
//! Checks the caller-overrides-default rule for arbitrary combinations of
//! set, unset, and empty tags.

use proptest::{prelude::*, test_runner::Config as ProptestConfig};
use tributary_core::{Record, RecordMeta};

fn proptest_config() -> ProptestConfig {
    ProptestConfig { cases: 128, failure_persistence: None, ..ProptestConfig::default() }
}

/// A tag is unset, explicitly empty, or carries a short identifier.
fn tag_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![Just(None), Just(Some(String::new())), "[a-z0-9_]{1,12}".prop_map(Some),]
}

fn meta_strategy() -> impl Strategy<Value = RecordMeta> {
    (tag_strategy(), tag_strategy(), tag_strategy(), tag_strategy()).prop_map(
        |(host, source, index, sourcetype)| RecordMeta { host, source, index, sourcetype },
    )
}

fn expected(own: &Option<String>, default: &Option<String>) -> Option<String> {
    match own {
        Some(value) if !value.is_empty() => Some(value.clone()),
        _ => default.clone().filter(|value| !value.is_empty()),
    }
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn caller_tags_always_win(own in meta_strategy(), defaults in meta_strategy()) {
        let merged = own.merged_over(&defaults);

        prop_assert_eq!(merged.host, expected(&own.host, &defaults.host));
        prop_assert_eq!(merged.source, expected(&own.source, &defaults.source));
        prop_assert_eq!(merged.index, expected(&own.index, &defaults.index));
        prop_assert_eq!(merged.sourcetype, expected(&own.sourcetype, &defaults.sourcetype));
    }

    #[test]
    fn merged_meta_never_contains_empty_strings(
        own in meta_strategy(),
        defaults in meta_strategy(),
    ) {
        let merged = own.merged_over(&defaults);

        for tag in [&merged.host, &merged.source, &merged.index, &merged.sourcetype] {
            prop_assert!(tag.as_deref() != Some(""));
        }
    }

    #[test]
    fn merging_over_empty_defaults_is_identity_for_set_tags(own in meta_strategy()) {
        let merged = own.merged_over(&RecordMeta::default());
        let again = merged.merged_over(&RecordMeta::default());

        prop_assert_eq!(merged, again);
    }

    #[test]
    fn records_survive_a_json_round_trip(own in meta_strategy(), n in any::<i64>()) {
        let record = Record::new(serde_json::json!({ "n": n })).with_meta(own);

        let encoded = serde_json::to_string(&record).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let decoded: Record =
            serde_json::from_str(&encoded).map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(decoded.payload(), record.payload());
    }
}
