//! Load the generator config document from disk.

use crate::config::{validate, validate_schema, GeneratorConfig};
use crate::error::ConfigError;
use serde_json::Value;
use std::path::Path;

/// Read, schema-check and validate the config document. Called once per run so edits apply without restart.
pub async fn load_config(path: &Path) -> Result<GeneratorConfig, ConfigError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::debug!(path = %path.display(), "loading generator config");
    parse_config(&raw)
}

pub fn parse_config(raw: &str) -> Result<GeneratorConfig, ConfigError> {
    let doc: Value = serde_json::from_str(raw)?;
    validate_schema(&doc)?;
    let config: GeneratorConfig = serde_json::from_value(doc)?;
    validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn defaults_fill_missing_sections() {
        let config = parse_config(r#"{ "services": [{ "name": "print" }] }"#).unwrap();
        assert_eq!(config.config.config_path, PathBuf::from("/tmp/"));
        assert_eq!(config.config.permissions_file, "permissions.json");
        assert_eq!(config.qgs_writer.selection_color, [255, 255, 0, 255]);
        assert_eq!(config.services[0].name, "print");
        assert!(config.services[0].config.is_empty());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = parse_config("{ services: ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("nope.json")).await.unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[tokio::test]
    async fn loads_document_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configGeneratorConfig.json");
        std::fs::write(
            &path,
            r#"{
                "config": { "config_path": "/srv/config", "config_db_url": "postgres://db/soconfig" },
                "services": [{ "name": "ogc", "config": { "default_ogc_server_url": "http://x" } }],
                "qgs_writer": { "project_output_dir": "/srv/qgs", "wms_service_url": "https://geo.so.ch/wms" }
            }"#,
        )
        .unwrap();
        let config = load_config(&path).await.unwrap();
        assert_eq!(config.config.config_db_url, "postgres://db/soconfig");
        assert_eq!(config.qgs_writer.project_output_dir, PathBuf::from("/srv/qgs"));
        assert_eq!(
            config.services[0].config.get("default_ogc_server_url"),
            Some(&Value::String("http://x".into()))
        );
    }
}
