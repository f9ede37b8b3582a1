//! Merge service defaults with per-service overrides.

use serde_json::{Map, Value};

/// Merge `overrides` into `defaults`. Overrides win; nested objects are merged key by key,
/// any other value (arrays included) is replaced as a whole.
pub fn merge_config(defaults: Map<String, Value>, overrides: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = defaults;
    for (key, value) in overrides {
        if let (Some(Value::Object(base)), Value::Object(over)) = (merged.get_mut(key), value) {
            let nested = merge_config(std::mem::take(base), over);
            *base = nested;
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn override_wins_and_defaults_survive() {
        let merged = merge_config(
            obj(json!({ "default_qgis_server_url": "http://localhost:8001/ows/", "timeout": 30 })),
            &obj(json!({ "default_qgis_server_url": "http://qgis/ows/", "public_ogc_url_pattern": "$origin$/.*/?$mountpoint$" })),
        );
        assert_eq!(merged["default_qgis_server_url"], json!("http://qgis/ows/"));
        assert_eq!(merged["timeout"], json!(30));
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn nested_objects_merge_arrays_replace() {
        let merged = merge_config(
            obj(json!({ "db": { "host": "a", "port": 5432 }, "layers": [1, 2] })),
            &obj(json!({ "db": { "host": "b" }, "layers": [3] })),
        );
        assert_eq!(merged["db"], json!({ "host": "b", "port": 5432 }));
        assert_eq!(merged["layers"], json!([3]));
    }
}
