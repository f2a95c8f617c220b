use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// Open key-value map backing every `*_json` column and audit snapshot.
pub type Metadata = IndexMap<String, Value>;

/// Captures any serializable record as a flat map for audit snapshots.
pub fn snapshot<T: Serialize>(record: &T) -> Result<Metadata, serde_json::Error> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => {
            let mut wrapped = Metadata::new();
            wrapped.insert("value".to_string(), other);
            Ok(wrapped)
        }
    }
}

/// Applies `overrides` on top of `base`; keys whose override is `null` are removed.
pub fn overlay(base: &Metadata, overrides: &Metadata) -> Metadata {
    let mut merged = base.clone();
    for (key, value) in overrides {
        if value.is_null() {
            merged.shift_remove(key);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn overlay_replaces_and_removes() {
        let base: Metadata = [
            ("serum_type".to_string(), json!("goat")),
            ("primary_volume_ul".to_string(), json!(300.0)),
        ]
        .into_iter()
        .collect();
        let overrides: Metadata = [
            ("primary_volume_ul".to_string(), json!(250.0)),
            ("serum_type".to_string(), Value::Null),
        ]
        .into_iter()
        .collect();

        let merged = overlay(&base, &overrides);
        assert_eq!(merged.get("primary_volume_ul"), Some(&json!(250.0)));
        assert!(!merged.contains_key("serum_type"));
    }

    #[test]
    fn snapshot_wraps_scalars() {
        let map = snapshot(&42).expect("snapshot");
        assert_eq!(map.get("value"), Some(&json!(42)));
    }
}
