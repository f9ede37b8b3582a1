//! Generation stages and modes: service configs, permissions and QGIS projects.

use crate::config::GeneratorConfig;
use crate::error::GenerateError;
use crate::permissions::{merge_service_permissions, permissions_document, PermissionIndex};
use crate::qgs;
use crate::report::{LogEntry, StageLog};
use crate::services::{handler_for, service_document};
use crate::store::{ConfigStore, StoreConnector};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ServiceConfigs,
    Permissions,
    Qgs,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ServiceConfigs => "service_configs",
            Stage::Permissions => "permissions",
            Stage::Qgs => "qgs",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages behind `POST /generate_configs`.
pub const CONFIG_STAGES: &[Stage] = &[Stage::ServiceConfigs, Stage::Permissions];

/// What a CLI run generates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    All,
    ServiceConfigs,
    Permissions,
    Qgs,
}

impl Mode {
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            Mode::All => &[Stage::ServiceConfigs, Stage::Permissions, Stage::Qgs],
            Mode::ServiceConfigs => &[Stage::ServiceConfigs],
            Mode::Permissions => &[Stage::Permissions],
            Mode::Qgs => &[Stage::Qgs],
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub files: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct RunReport {
    pub stages: Vec<StageOutcome>,
    pub log: StageLog,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.stages.iter().all(|s| s.error.is_none())
    }

    pub fn failed_stages(&self) -> Vec<&StageOutcome> {
        self.stages.iter().filter(|s| s.error.is_some()).collect()
    }

    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.stages.iter().flat_map(|s| s.files.iter())
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.log.into_entries()
    }
}

/// Runs generation stages against one open store.
pub struct ConfigGenerator<'a> {
    config: &'a GeneratorConfig,
    store: &'a dyn ConfigStore,
}

impl<'a> ConfigGenerator<'a> {
    pub fn new(config: &'a GeneratorConfig, store: &'a dyn ConfigStore) -> Self {
        ConfigGenerator { config, store }
    }

    /// Write `<config_path>/<service>.json` for every configured service the generator knows.
    /// Unknown services and services with missing ConfigDB data are logged and skipped.
    pub async fn generate_service_configs(&self, log: &mut StageLog) -> Result<Vec<PathBuf>, GenerateError> {
        let general = &self.config.config;
        let mut written = Vec::new();
        for entry in &self.config.services {
            let Some(handler) = handler_for(&entry.name) else {
                log.warning(format!("Service '{}' not supported", entry.name));
                continue;
            };
            let doc = match service_document(handler.as_ref(), self.store, entry, general).await {
                Ok(doc) => doc,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    log.error(format!("Skipping service '{}': {}", entry.name, e));
                    continue;
                }
            };
            let filename = format!("{}.json", entry.name);
            log.info(format!("Writing '{}' service config file", filename));
            written.push(write_json(&general.config_path, &filename, &doc).await?);
        }
        Ok(written)
    }

    /// Collect every configured service's permissions per role into one permissions document.
    pub async fn generate_permissions(&self, log: &mut StageLog) -> Result<PathBuf, GenerateError> {
        let principals = self.store.principals().await?;
        let rows = self.store.resource_permissions().await?;
        let mut roles: Vec<String> = principals
            .roles
            .iter()
            .cloned()
            .chain(rows.iter().map(|r| r.role.clone()))
            .collect();
        roles.sort();
        roles.dedup();
        let index = PermissionIndex::new(rows);

        let mut by_role: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
        for entry in &self.config.services {
            let Some(handler) = handler_for(&entry.name) else { continue };
            log.debug(format!("Collecting '{}' permissions", entry.name));
            let permissions = match handler.permissions(self.store, &index, &roles).await {
                Ok(p) => p,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    log.error(format!("Skipping '{}' permissions: {}", entry.name, e));
                    continue;
                }
            };
            for (role, service_permissions) in permissions {
                merge_service_permissions(by_role.entry(role).or_default(), service_permissions);
            }
        }

        let doc = permissions_document(&principals, &by_role)?;
        let general = &self.config.config;
        log.info(format!("Writing '{}' permissions file", general.permissions_file));
        write_json(&general.config_path, &general.permissions_file, &doc).await
    }

    pub async fn generate_qgs_projects(&self, log: &mut StageLog) -> Result<Vec<PathBuf>, GenerateError> {
        qgs::write_projects(self.store, &self.config.qgs_writer, log).await
    }

    pub async fn run_stage(&self, stage: Stage, log: &mut StageLog) -> Result<Vec<PathBuf>, GenerateError> {
        match stage {
            Stage::ServiceConfigs => self.generate_service_configs(log).await,
            Stage::Permissions => Ok(vec![self.generate_permissions(log).await?]),
            Stage::Qgs => self.generate_qgs_projects(log).await,
        }
    }
}

/// Run `stages` in order. A failing stage is reported and the next stage still runs;
/// a lost ConfigDB connection aborts the run.
pub async fn run(
    config: &GeneratorConfig,
    connector: &dyn StoreConnector,
    stages: &[Stage],
) -> Result<RunReport, GenerateError> {
    let store = connector.connect(config).await?;
    let result = run_stages(config, store.as_ref(), stages).await;
    store.close().await;
    result
}

async fn run_stages(
    config: &GeneratorConfig,
    store: &dyn ConfigStore,
    stages: &[Stage],
) -> Result<RunReport, GenerateError> {
    let generator = ConfigGenerator::new(config, store);
    let mut report = RunReport::default();
    for &stage in stages {
        tracing::info!(%stage, "generation stage started");
        match generator.run_stage(stage, &mut report.log).await {
            Ok(files) => report.stages.push(StageOutcome {
                stage,
                files,
                error: None,
            }),
            Err(GenerateError::Store(e)) if e.is_fatal() => {
                report.log.error(format!("ConfigDB connection lost: {}", e));
                return Err(GenerateError::Store(e));
            }
            Err(e) => {
                report.log.error(format!("Stage '{}' failed: {}", stage, e));
                report.stages.push(StageOutcome {
                    stage,
                    files: Vec::new(),
                    error: Some(e.to_string()),
                });
            }
        }
    }
    Ok(report)
}

/// Pretty JSON with sorted keys and a trailing newline.
pub fn to_json_text(value: &Value) -> Result<String, serde_json::Error> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    Ok(text)
}

async fn write_json(dir: &Path, filename: &str, value: &Value) -> Result<PathBuf, GenerateError> {
    let text = to_json_text(value)?;
    tokio::fs::create_dir_all(dir).await.map_err(|source| GenerateError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(filename);
    tokio::fs::write(&path, text).await.map_err(|source| GenerateError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceEntry;
    use crate::error::StoreError;
    use crate::services::fixtures;
    use crate::store::{MemoryConnector, MemoryStore};
    use serde_json::json;

    fn config(dir: &Path, services: &[&str]) -> GeneratorConfig {
        let mut config = GeneratorConfig::default();
        config.config.config_path = dir.to_path_buf();
        config.qgs_writer.project_output_dir = dir.join("qgs");
        config.services = services.iter().map(|s| ServiceEntry::new(*s)).collect();
        config
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn ogc_override_lands_in_service_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), &[]);
        let mut ogc = ServiceEntry::new("ogc");
        ogc.config.insert("default_ogc_server_url".into(), json!("http://x"));
        config.services.push(ogc);

        let report = run(&config, &MemoryConnector::new(fixtures::store()), Mode::ServiceConfigs.stages())
            .await
            .unwrap();
        assert!(report.succeeded());
        let text = std::fs::read_to_string(dir.path().join("ogc.json")).unwrap();
        assert!(text.contains(r#""default_ogc_server_url": "http://x""#));
        assert!(text.ends_with("}\n"));
        let doc: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["service"], json!("ogc"));
        assert_eq!(doc["config"]["default_qgis_server_url"], json!("http://localhost:8001/ows/"));
    }

    #[tokio::test]
    async fn zero_services_write_no_service_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &[]);
        let report = run(&config, &MemoryConnector::new(fixtures::store()), Mode::ServiceConfigs.stages())
            .await
            .unwrap();
        assert!(report.succeeded());
        assert_eq!(report.files().count(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unknown_services_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &["mapViewer", "print"]);
        let report = run(&config, &MemoryConnector::new(fixtures::store()), Mode::ServiceConfigs.stages())
            .await
            .unwrap();
        assert!(report.succeeded());
        assert!(dir.path().join("print.json").exists());
        assert!(!dir.path().join("mapViewer.json").exists());
        assert!(report
            .log
            .entries()
            .iter()
            .any(|e| e.msg == "Service 'mapViewer' not supported"));
    }

    #[tokio::test]
    async fn missing_data_skips_the_service() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &["print", "permalink"]);
        let store = MemoryStore {
            missing: Some("template_qgis rows".into()),
            ..fixtures::store()
        };
        let report = run(&config, &MemoryConnector::new(store), Mode::ServiceConfigs.stages())
            .await
            .unwrap();
        assert!(report.succeeded());
        assert!(!dir.path().join("print.json").exists());
        assert!(dir.path().join("permalink.json").exists());
        assert!(report.log.has_errors());
    }

    #[tokio::test]
    async fn unreachable_configdb_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &["print"]);
        let err = run(&config, &MemoryConnector::unreachable(), Mode::All.stages()).await.unwrap_err();
        assert!(matches!(err, GenerateError::Store(StoreError::Connection(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn runs_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &["ogc", "print", "document", "search", "data"]);
        let connector = MemoryConnector::new(fixtures::store());

        let first = run(&config, &connector, Mode::All.stages()).await.unwrap();
        assert!(first.succeeded());
        let snapshot: Vec<(PathBuf, Vec<u8>)> = first
            .files()
            .map(|p| (p.clone(), std::fs::read(p).unwrap()))
            .collect();
        assert_eq!(snapshot.len(), 5 + 1 + 3);

        let second = run(&config, &connector, Mode::All.stages()).await.unwrap();
        for (path, bytes) in &snapshot {
            assert_eq!(&std::fs::read(path).unwrap(), bytes, "{} changed", path.display());
        }
        assert_eq!(second.files().count(), snapshot.len());
    }

    #[tokio::test]
    async fn granted_resources_appear_under_their_roles() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &["print", "document"]);
        run(&config, &MemoryConnector::new(fixtures::store()), Mode::Permissions.stages())
            .await
            .unwrap();
        let doc = read_json(&dir.path().join("permissions.json"));
        let roles = doc["roles"].as_array().unwrap();
        let role = |name: &str| roles.iter().find(|r| r["role"] == json!(name)).unwrap();

        assert_eq!(role("public")["permissions"]["print_templates"], json!(["A4-Hoch"]));
        assert_eq!(role("afu_edit")["permissions"]["document_templates"], json!(["grundbuch"]));
        assert_eq!(doc["users"][0]["name"], json!("demo"));
        assert_eq!(doc["groups"][0]["roles"], json!(["afu_edit"]));
    }

    #[tokio::test]
    async fn feature_info_and_legend_keep_ogc_layer_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &["featureInfo", "ogc", "legend", "document"]);
        let report = run(&config, &MemoryConnector::new(fixtures::store()), Mode::All.stages())
            .await
            .unwrap();
        assert!(report.succeeded());
        assert!(dir.path().join("featureInfo.json").exists());
        assert!(dir.path().join("legend.json").exists());

        let doc = read_json(&dir.path().join("permissions.json"));
        let roles = doc["roles"].as_array().unwrap();
        let public = roles.iter().find(|r| r["role"] == json!("public")).unwrap();
        assert_eq!(public["permissions"]["wms_services"][0]["name"], json!("somap"));
        assert_eq!(public["permissions"]["wms_services"].as_array().unwrap().len(), 1);
        let afu_edit = roles.iter().find(|r| r["role"] == json!("afu_edit")).unwrap();
        assert_eq!(afu_edit["permissions"]["document_templates"], json!(["grundbuch"]));
    }

    #[tokio::test]
    async fn failing_stage_does_not_stop_later_stages() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "not a directory").unwrap();
        let mut config = config(dir.path(), &["print"]);
        config.qgs_writer.project_output_dir = blocker.join("qgs");
        config.config.config_path = blocker.clone();
        config.config.permissions_file = "permissions.json".into();

        let report = run(&config, &MemoryConnector::new(fixtures::store()), Mode::All.stages())
            .await
            .unwrap();
        assert!(!report.succeeded());
        assert_eq!(report.stages.len(), 3);
        assert_eq!(report.failed_stages().len(), 3);
    }
}
