//! SO!MAP config generator: service configs, permissions and QGIS projects from the ConfigDB.

pub mod config;
pub mod error;
pub mod generator;
pub mod handlers;
pub mod permissions;
pub mod qgs;
pub mod report;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;

pub use config::{load_config, parse_config, GeneratorConfig};
pub use error::{ConfigError, GenerateError, QgsError, StoreError};
pub use generator::{run, ConfigGenerator, Mode, RunReport, Stage};
pub use report::{Level, LogEntry, StageLog};
pub use routes::app;
pub use state::AppState;
pub use store::{ConfigStore, MemoryConnector, MemoryStore, PgConnector, StoreConnector};
