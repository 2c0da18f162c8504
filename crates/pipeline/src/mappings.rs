//! Mapping derivation engine
//!
//! Deduces the per-survey field-mapping tables from a raw schema payload:
//! a code-to-label table per mapped field plus a flat key-fields table for
//! fields whose role is "one selected value" rather than "many codes".

use qualtrics_etl_common::errors::Result;
use qualtrics_etl_common::qualtrics::QuestionDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Field tags that participate in mapping derivation
pub const MAPPING_ALLOWED_TAGS: &[&str] = &[
    "ServiceType",
    "Facility",
    "Satisfaction",
    "Gender",
    "ParticipantType",
];

/// Dynamically named fields with this prefix are always allowed
pub const DYNAMIC_TAG_PREFIX: &str = "Ab_";

/// The one categorical field stored as a key field instead of a table
pub const SERVICE_TYPE_TAG: &str = "ServiceType";

/// Derived mapping tables for one survey
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMappings {
    /// Field tag -> single selected display label
    pub key_fields: BTreeMap<String, String>,

    /// Field tag -> (recode-or-choice key -> display label)
    pub mappings: BTreeMap<String, BTreeMap<String, String>>,
}

impl FieldMappings {
    pub fn is_empty(&self) -> bool {
        self.key_fields.is_empty() && self.mappings.is_empty()
    }

    /// The derived service-type label, empty when the field was absent
    pub fn service_type(&self) -> &str {
        self.key_fields
            .get(SERVICE_TYPE_TAG)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// JSON shape stored in the surveys `field_mapping` column
    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(Into::into)
    }
}

/// Whether a field tag participates in mapping derivation
fn is_allowed_tag(tag: &str) -> bool {
    MAPPING_ALLOWED_TAGS.contains(&tag) || tag.starts_with(DYNAMIC_TAG_PREFIX)
}

/// Display label for one choice value
///
/// Choices arrive either as objects carrying a `Display` label or as bare
/// scalars; a missing label resolves to the empty string.
fn choice_display(choice: &Value) -> String {
    match choice {
        Value::Object(obj) => obj.get("Display").map(scalar_string).unwrap_or_default(),
        other => scalar_string(other),
    }
}

/// Stringify a scalar JSON value the way mapping keys and labels need it
fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Derive the normalized mapping tables from a schema's question table
///
/// Questions iterate in sorted-key order, which makes derivation
/// idempotent: the same payload always yields the same tables. Mapping
/// keys prefer the question's recode value over the raw choice key,
/// resolved per choice (a question may recode only some of its choices).
pub fn derive_field_mappings(questions: &BTreeMap<String, QuestionDefinition>) -> FieldMappings {
    let mut derived = FieldMappings::default();

    for (question_id, question) in questions {
        let Some(tag) = question.data_export_tag.as_deref() else {
            debug!(question_id = %question_id, "Question has no export tag, skipping");
            continue;
        };

        if !is_allowed_tag(tag) {
            continue;
        }

        let Some(choices) = &question.choices else {
            debug!(question_id = %question_id, tag = %tag, "Question has no choices, skipping");
            continue;
        };

        if tag == SERVICE_TYPE_TAG {
            // Single selected value: choice "1" when it carries a label,
            // otherwise the first choice with a non-empty label
            let display = choices
                .get("1")
                .map(choice_display)
                .filter(|label| !label.is_empty())
                .or_else(|| {
                    choices
                        .values()
                        .map(choice_display)
                        .find(|label| !label.is_empty())
                })
                .or_else(|| choices.values().next().map(choice_display));

            if let Some(display) = display {
                derived.key_fields.insert(tag.to_string(), display);
            } else {
                warn!(question_id = %question_id, "ServiceType question has no choices");
            }
            continue;
        }

        let mut table = BTreeMap::new();
        for (choice_key, choice_value) in choices {
            let mapping_key = question
                .recode_values
                .as_ref()
                .and_then(|recodes| recodes.get(choice_key))
                .map(scalar_string)
                .unwrap_or_else(|| choice_key.clone());

            table.insert(mapping_key, choice_display(choice_value));
        }

        if table.is_empty() {
            warn!(question_id = %question_id, tag = %tag, "Derived empty mapping, skipping field");
            continue;
        }

        derived.mappings.insert(tag.to_string(), table);
    }

    derived
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn question(
        tag: Option<&str>,
        choices: Option<Value>,
        recodes: Option<Value>,
    ) -> QuestionDefinition {
        serde_json::from_value(json!({
            "DataExportTag": tag,
            "Choices": choices,
            "RecodeValues": recodes,
        }))
        .unwrap()
    }

    fn questions(entries: Vec<(&str, QuestionDefinition)>) -> BTreeMap<String, QuestionDefinition> {
        entries
            .into_iter()
            .map(|(id, q)| (id.to_string(), q))
            .collect()
    }

    #[test]
    fn test_service_type_becomes_key_field() {
        let schema = questions(vec![(
            "QID1",
            question(
                Some("ServiceType"),
                Some(json!({"1": {"Display": "Inpatient"}, "2": {"Display": "Outpatient"}})),
                None,
            ),
        )]);

        let derived = derive_field_mappings(&schema);
        assert_eq!(derived.key_fields["ServiceType"], "Inpatient");
        assert!(!derived.mappings.contains_key("ServiceType"));
        assert_eq!(derived.service_type(), "Inpatient");
    }

    #[test]
    fn test_service_type_falls_back_to_first_choice() {
        let schema = questions(vec![(
            "QID1",
            question(
                Some("ServiceType"),
                Some(json!({"3": {"Display": "Community"}, "4": {"Display": "Home"}})),
                None,
            ),
        )]);

        let derived = derive_field_mappings(&schema);
        assert_eq!(derived.key_fields["ServiceType"], "Community");
    }

    #[test]
    fn test_service_type_skips_unlabeled_first_choice() {
        let schema = questions(vec![(
            "QID1",
            question(
                Some("ServiceType"),
                Some(json!({"1": {"Display": ""}, "2": {"Display": "Outpatient"}})),
                None,
            ),
        )]);

        let derived = derive_field_mappings(&schema);
        assert_eq!(derived.key_fields["ServiceType"], "Outpatient");
    }

    #[test]
    fn test_recode_values_win_per_choice() {
        // Only choice "1" is recoded; choice "2" keeps its raw key
        let schema = questions(vec![(
            "QID2",
            question(
                Some("Facility"),
                Some(json!({"1": {"Display": "North"}, "2": {"Display": "South"}})),
                Some(json!({"1": 10})),
            ),
        )]);

        let derived = derive_field_mappings(&schema);
        let table = &derived.mappings["Facility"];
        assert_eq!(table["10"], "North");
        assert_eq!(table["2"], "South");
    }

    #[test]
    fn test_scalar_choices_are_stringified() {
        let schema = questions(vec![(
            "QID3",
            question(Some("Satisfaction"), Some(json!({"1": "Happy", "2": 5})), None),
        )]);

        let derived = derive_field_mappings(&schema);
        let table = &derived.mappings["Satisfaction"];
        assert_eq!(table["1"], "Happy");
        assert_eq!(table["2"], "5");
    }

    #[test]
    fn test_irrelevant_questions_are_skipped() {
        let schema = questions(vec![
            ("QID1", question(None, Some(json!({"1": "x"})), None)),
            ("QID2", question(Some("FreeText"), Some(json!({"1": "x"})), None)),
            ("QID3", question(Some("Gender"), None, None)),
            ("QID4", question(Some("Facility"), Some(json!({})), None)),
        ]);

        let derived = derive_field_mappings(&schema);
        assert!(derived.is_empty());
    }

    #[test]
    fn test_dynamic_prefix_family_is_allowed() {
        let schema = questions(vec![(
            "QID5",
            question(
                Some("Ab_Clinic"),
                Some(json!({"1": {"Display": "Yes"}, "2": {"Display": "No"}})),
                None,
            ),
        )]);

        let derived = derive_field_mappings(&schema);
        assert_eq!(derived.mappings["Ab_Clinic"].len(), 2);
    }

    #[test]
    fn test_derivation_is_idempotent() {
        let schema = questions(vec![
            (
                "QID1",
                question(
                    Some("ServiceType"),
                    Some(json!({"1": {"Display": "Inpatient"}})),
                    None,
                ),
            ),
            (
                "QID2",
                question(
                    Some("Gender"),
                    Some(json!({"1": {"Display": "Female"}, "2": {"Display": "Male"}})),
                    Some(json!({"2": 9})),
                ),
            ),
        ]);

        let first = derive_field_mappings(&schema);
        let second = derive_field_mappings(&schema);

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first.to_json().unwrap()).unwrap(),
            serde_json::to_string(&second.to_json().unwrap()).unwrap()
        );
    }

    #[test]
    fn test_empty_schema_derives_empty_tables() {
        let derived = derive_field_mappings(&BTreeMap::new());
        assert!(derived.is_empty());
        assert_eq!(derived.service_type(), "");
    }
}
