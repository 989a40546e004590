//! Field-by-field change tracking
//!
//! Mutators describe their entity as a flat list of named JSON values via
//! [`FieldSet`]; [`diff`] compares two versions and yields one
//! [`FieldChange`] per field whose value differs. Every update path uses this
//! to produce its per-field audit rows.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// An entity that can be compared field by field
pub trait FieldSet {
    /// Subject type recorded in the audit trail ("project", "matrix_entry", ...)
    const SUBJECT_TYPE: &'static str;

    /// Audited fields with their current values
    fn fields(&self) -> Vec<(&'static str, Value)>;

    /// All audited fields as a JSON object, for creation/deletion details
    fn snapshot(&self) -> Value {
        Value::Object(
            self.fields()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        )
    }
}

/// One changed field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Field name
    pub field: String,
    /// Value before the mutation
    pub old: Value,
    /// Value after the mutation
    pub new: Value,
}

/// Compare two versions of an entity, in field declaration order
#[must_use]
pub fn diff<T: FieldSet>(before: &T, after: &T) -> Vec<FieldChange> {
    let old: BTreeMap<&'static str, Value> = before.fields().into_iter().collect();

    after
        .fields()
        .into_iter()
        .filter_map(|(field, new)| {
            let old = old.get(field).cloned().unwrap_or(Value::Null);
            (old != new).then(|| FieldChange {
                field: field.to_string(),
                old,
                new,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Clone)]
    struct Widget {
        name: String,
        size: u32,
        note: Option<String>,
    }

    impl FieldSet for Widget {
        const SUBJECT_TYPE: &'static str = "widget";

        fn fields(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("name", json!(self.name)),
                ("size", json!(self.size)),
                ("note", json!(self.note)),
            ]
        }
    }

    #[test]
    fn diff_reports_only_changed_fields() {
        let before = Widget {
            name: "a".into(),
            size: 1,
            note: None,
        };
        let mut after = before.clone();
        after.size = 2;
        after.note = Some("x".into());

        let changes = diff(&before, &after);
        assert_eq!(
            changes,
            vec![
                FieldChange {
                    field: "size".into(),
                    old: json!(1),
                    new: json!(2)
                },
                FieldChange {
                    field: "note".into(),
                    old: Value::Null,
                    new: json!("x")
                },
            ]
        );
    }

    #[test]
    fn diff_of_identical_is_empty() {
        let w = Widget {
            name: "a".into(),
            size: 1,
            note: None,
        };
        assert!(diff(&w, &w.clone()).is_empty());
    }

    #[test]
    fn snapshot_is_object_of_fields() {
        let w = Widget {
            name: "a".into(),
            size: 3,
            note: None,
        };
        assert_eq!(w.snapshot(), json!({"name": "a", "size": 3, "note": null}));
    }
}
