/*!
 * Deep Merge
 *
 * Recursive JSON merge used by partial settings updates. Only keys present
 * in the incoming payload are overwritten; nested untouched keys survive.
 */

use serde_json::Value;

/// Merge `incoming` into `base`, recursing through objects. Non-object
/// values (including arrays and null) replace the base value wholesale.
pub fn deep_merge(base: Value, incoming: Value) -> Value {
    match (base, incoming) {
        (Value::Object(mut base_map), Value::Object(incoming_map)) => {
            for (key, incoming_value) in incoming_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, incoming_value),
                    None => incoming_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, incoming) => incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_preserves_sibling_keys() {
        let base = json!({
            "notification_settings": {"reminder_hours_before": 24, "reminder_timing_mode": "hours_before"},
            "receipt_settings": {"show_stamp": true}
        });
        let incoming = json!({
            "notification_settings": {"reminder_hours_before": 48}
        });

        let merged = deep_merge(base, incoming);
        assert_eq!(merged["notification_settings"]["reminder_hours_before"], 48);
        assert_eq!(
            merged["notification_settings"]["reminder_timing_mode"],
            "hours_before"
        );
        assert_eq!(merged["receipt_settings"]["show_stamp"], true);
    }

    #[test]
    fn test_merge_subset_is_identity() {
        let base = json!({
            "booking_restriction_settings": {"step_size_minutes": 30, "allow_patient_deletion": true}
        });
        let subset = json!({
            "booking_restriction_settings": {"step_size_minutes": 30}
        });

        assert_eq!(deep_merge(base.clone(), subset), base);
    }

    #[test]
    fn test_merge_replaces_scalars_and_arrays() {
        let base = json!({"a": [1, 2, 3], "b": "old"});
        let incoming = json!({"a": [9], "b": "new"});
        let merged = deep_merge(base, incoming);
        assert_eq!(merged, json!({"a": [9], "b": "new"}));
    }

    #[test]
    fn test_merge_inserts_new_keys() {
        let base = json!({"a": {"x": 1}});
        let incoming = json!({"a": {"y": 2}, "c": true});
        let merged = deep_merge(base, incoming);
        assert_eq!(merged, json!({"a": {"x": 1, "y": 2}, "c": true}));
    }
}
