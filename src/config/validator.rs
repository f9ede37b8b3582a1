//! Config validation: JSON schema check of the raw document, then semantic checks on the typed config.

use crate::config::GeneratorConfig;
use crate::error::ConfigError;
use jsonschema::JSONSchema;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Validate the raw document against the schema derived from [`GeneratorConfig`].
pub fn validate_schema(doc: &Value) -> Result<(), ConfigError> {
    static COMPILED: OnceLock<Result<JSONSchema, String>> = OnceLock::new();
    let compiled = COMPILED.get_or_init(|| {
        let schema = schemars::schema_for!(GeneratorConfig);
        let schema = serde_json::to_value(&schema).map_err(|e| e.to_string())?;
        JSONSchema::compile(&schema).map_err(|e| e.to_string())
    });
    let compiled = compiled.as_ref().map_err(|e| ConfigError::Schema(e.clone()))?;

    if let Err(errors) = compiled.validate(doc) {
        let messages: Vec<String> = errors
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();
        return Err(ConfigError::Schema(messages.join("; ")));
    }
    Ok(())
}

pub fn validate(config: &GeneratorConfig) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for service in &config.services {
        if service.name.trim().is_empty() {
            return Err(ConfigError::Validation("service name must not be empty".into()));
        }
        if !names.insert(service.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate service: {}",
                service.name
            )));
        }
    }

    let qgs = &config.qgs_writer;
    check_extent("qgs_writer.default_extent", &qgs.default_extent)?;
    if let Some(extent) = &qgs.default_raster_extent {
        check_extent("qgs_writer.default_raster_extent", extent)?;
    }
    if config.config.permissions_file.trim().is_empty() {
        return Err(ConfigError::Validation("config.permissions_file must not be empty".into()));
    }
    Ok(())
}

fn check_extent(field: &str, extent: &[f64; 4]) -> Result<(), ConfigError> {
    let [xmin, ymin, xmax, ymax] = *extent;
    if !(xmin < xmax && ymin < ymax) {
        return Err(ConfigError::Validation(format!(
            "{} must be [xmin, ymin, xmax, ymax] with xmin < xmax and ymin < ymax",
            field
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceEntry;
    use serde_json::json;

    #[test]
    fn schema_rejects_wrong_types() {
        let err = validate_schema(&json!({ "services": { "name": "ogc" } })).unwrap_err();
        assert!(matches!(err, ConfigError::Schema(_)));
        let err = validate_schema(&json!({ "services": [{ "config": {} }] })).unwrap_err();
        assert!(err.to_string().contains("name"), "{}", err);
    }

    #[test]
    fn schema_accepts_minimal_document() {
        validate_schema(&json!({})).unwrap();
        validate_schema(&json!({
            "config": { "config_path": "/tmp/out" },
            "services": [{ "name": "ogc", "config": { "default_ogc_server_url": "http://x" } }],
            "qgs_writer": { "selection_color": [255, 0, 0, 255] }
        }))
        .unwrap();
    }

    #[test]
    fn duplicate_services_are_rejected() {
        let mut config = GeneratorConfig::default();
        config.services = vec![ServiceEntry::new("ogc"), ServiceEntry::new("ogc")];
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate service: ogc"));
    }

    #[test]
    fn inverted_extent_is_rejected() {
        let mut config = GeneratorConfig::default();
        config.qgs_writer.default_extent = [10.0, 0.0, 5.0, 1.0];
        assert!(validate(&config).is_err());
        config.qgs_writer.default_extent = [0.0, 0.0, 5.0, 1.0];
        validate(&config).unwrap();
    }
}
