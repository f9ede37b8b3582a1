//! Read-only access to the ConfigDB.

pub mod memory;
pub mod pg;
pub mod tree;
pub mod types;

pub use memory::{MemoryConnector, MemoryStore};
pub use pg::{PgConfigStore, PgConnector};
pub use types::*;

use crate::config::GeneratorConfig;
use crate::error::StoreError;
use async_trait::async_trait;

/// Queries the generator runs against the ConfigDB. Results are ordered by name
/// so generated files are deterministic.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// A service with a missing or malformed layer tree lands in `broken`; only
    /// query and connection failures are errors.
    async fn ows_services(&self, ows_type: OwsType) -> Result<OwsServices, StoreError>;

    async fn print_templates(&self) -> Result<Vec<PrintTemplate>, StoreError>;

    async fn document_templates(&self) -> Result<Vec<DocumentTemplate>, StoreError>;

    /// HTML info template of the `template_info` entry named `default`.
    async fn default_info_template(&self) -> Result<Option<String>, StoreError>;

    async fn background_layers(&self) -> Result<Vec<BackgroundLayer>, StoreError>;

    async fn edit_datasets(&self) -> Result<Vec<EditDataset>, StoreError>;

    async fn principals(&self) -> Result<Principals, StoreError>;

    /// All permission rows, highest priority first within a role.
    async fn resource_permissions(&self) -> Result<Vec<PermissionRow>, StoreError>;

    /// Metadata of a database data set's table. `Ok(None)` when the table cannot be inspected.
    async fn table_metadata(&self, data_set: &DataSetRef) -> Result<Option<TableMetadata>, StoreError>;

    /// Release connections at the end of a run.
    async fn close(&self) {}
}

/// Opens a store for one generation run.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, config: &GeneratorConfig) -> Result<Box<dyn ConfigStore>, StoreError>;
}
