//! Generator config document types. The JSON schema used for validation is derived from these.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Env variable naming the config document path.
pub const CONFIG_PATH_ENV: &str = "CONFIG_GENERATOR_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "/configGeneratorConfig.json";

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct GeneratorConfig {
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default)]
    pub config: GeneralConfig,
    /// Services to generate, in output order.
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
    #[serde(default)]
    pub qgs_writer: QgsWriterConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct GeneralConfig {
    #[serde(default = "default_config_db_url")]
    pub config_db_url: String,
    /// Output directory for service configs and the permissions file.
    #[serde(default = "default_output_dir")]
    pub config_path: PathBuf,
    #[serde(default = "default_qgis_server_url")]
    pub default_qgis_server_url: String,
    #[serde(default = "default_permissions_file")]
    pub permissions_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            config_db_url: default_config_db_url(),
            config_path: default_output_dir(),
            default_qgis_server_url: default_qgis_server_url(),
            permissions_file: default_permissions_file(),
        }
    }
}

fn default_config_db_url() -> String {
    "postgres://localhost/soconfig".into()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/tmp/")
}

fn default_qgis_server_url() -> String {
    "http://localhost:8001/ows/".into()
}

fn default_permissions_file() -> String {
    "permissions.json".into()
}

/// One configured service: overrides for its config plus any static resources.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ServiceEntry {
    pub name: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub resources: Map<String, Value>,
}

impl ServiceEntry {
    pub fn new(name: impl Into<String>) -> Self {
        ServiceEntry {
            name: name.into(),
            config: Map::new(),
            resources: Map::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct QgsWriterConfig {
    #[serde(default = "default_output_dir")]
    pub project_output_dir: PathBuf,
    /// Directory with `service.qgs` and `<geometry>.qml` overriding the built-in templates.
    #[serde(default)]
    pub template_dir: Option<PathBuf>,
    #[serde(default = "default_extent")]
    pub default_extent: [f64; 4],
    #[serde(default)]
    pub default_raster_extent: Option<[f64; 4]>,
    #[serde(default = "default_selection_color")]
    pub selection_color: [u8; 4],
    #[serde(default)]
    pub wms_service_url: String,
    #[serde(default)]
    pub wfs_service_url: String,
}

impl Default for QgsWriterConfig {
    fn default() -> Self {
        QgsWriterConfig {
            project_output_dir: default_output_dir(),
            template_dir: None,
            default_extent: default_extent(),
            default_raster_extent: None,
            selection_color: default_selection_color(),
            wms_service_url: String::new(),
            wfs_service_url: String::new(),
        }
    }
}

fn default_extent() -> [f64; 4] {
    [2590983.0, 1212806.0, 2646267.0, 1262755.0]
}

fn default_selection_color() -> [u8; 4] {
    [255, 255, 0, 255]
}
