//! In-memory ConfigDB, used by tests and dry runs.

use crate::config::GeneratorConfig;
use crate::error::StoreError;
use crate::store::types::*;
use crate::store::{ConfigStore, StoreConnector};
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    pub wms_services: Vec<OwsService>,
    pub wfs_services: Vec<OwsService>,
    /// Services whose layer tree is reported as unusable.
    pub broken_services: Vec<BrokenService>,
    pub print_templates: Vec<PrintTemplate>,
    pub document_templates: Vec<DocumentTemplate>,
    pub default_info_template: Option<String>,
    pub background_layers: Vec<BackgroundLayer>,
    pub edit_datasets: Vec<EditDataset>,
    pub principals: Principals,
    pub permissions: Vec<PermissionRow>,
    /// Keyed by data set name.
    pub tables: HashMap<String, TableMetadata>,
    /// Set to fail every query with `MissingData`.
    pub missing: Option<String>,
}

impl MemoryStore {
    fn check(&self) -> Result<(), StoreError> {
        match &self.missing {
            Some(what) => Err(StoreError::MissingData(what.clone())),
            None => Ok(()),
        }
    }

    /// Grant `resource_id` to `role` (read, priority 0).
    pub fn grant(&mut self, role: &str, resource_id: ResourceId, table_name: &str, resource_name: &str) {
        self.permissions.push(PermissionRow {
            role: role.to_string(),
            resource_id,
            table_name: table_name.to_string(),
            resource_name: resource_name.to_string(),
            read: true,
            write: false,
            priority: 0,
        });
        if !self.principals.roles.iter().any(|r| r == role) {
            self.principals.roles.push(role.to_string());
            self.principals.roles.sort();
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn ows_services(&self, ows_type: OwsType) -> Result<OwsServices, StoreError> {
        self.check()?;
        let mut services = match ows_type {
            OwsType::Wms => self.wms_services.clone(),
            OwsType::Wfs => self.wfs_services.clone(),
        };
        services.sort_by(|a, b| a.name.cmp(&b.name));
        let broken = self
            .broken_services
            .iter()
            .filter(|b| b.ows_type == ows_type)
            .cloned()
            .collect();
        Ok(OwsServices { services, broken })
    }

    async fn print_templates(&self) -> Result<Vec<PrintTemplate>, StoreError> {
        self.check()?;
        Ok(self.print_templates.clone())
    }

    async fn document_templates(&self) -> Result<Vec<DocumentTemplate>, StoreError> {
        self.check()?;
        Ok(self.document_templates.clone())
    }

    async fn default_info_template(&self) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.default_info_template.clone())
    }

    async fn background_layers(&self) -> Result<Vec<BackgroundLayer>, StoreError> {
        self.check()?;
        Ok(self.background_layers.clone())
    }

    async fn edit_datasets(&self) -> Result<Vec<EditDataset>, StoreError> {
        self.check()?;
        Ok(self.edit_datasets.clone())
    }

    async fn principals(&self) -> Result<Principals, StoreError> {
        self.check()?;
        Ok(self.principals.clone())
    }

    async fn resource_permissions(&self) -> Result<Vec<PermissionRow>, StoreError> {
        self.check()?;
        let mut rows = self.permissions.clone();
        rows.sort_by(|a, b| a.role.cmp(&b.role).then(b.priority.cmp(&a.priority)));
        Ok(rows)
    }

    async fn table_metadata(&self, data_set: &DataSetRef) -> Result<Option<TableMetadata>, StoreError> {
        self.check()?;
        Ok(self.tables.get(&data_set.data_set_name).cloned())
    }
}

/// Hands out clones of a [`MemoryStore`], or fails like an unreachable database.
#[derive(Clone, Debug, Default)]
pub struct MemoryConnector {
    pub store: MemoryStore,
    pub unreachable: bool,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        MemoryConnector {
            store,
            unreachable: false,
        }
    }

    pub fn unreachable() -> Self {
        MemoryConnector {
            store: MemoryStore::default(),
            unreachable: true,
        }
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, config: &GeneratorConfig) -> Result<Box<dyn ConfigStore>, StoreError> {
        if self.unreachable {
            return Err(StoreError::Connection(format!(
                "ConfigDB {} unreachable",
                config.config.config_db_url
            )));
        }
        Ok(Box::new(self.store.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_set() -> DataSetRef {
        DataSetRef {
            view_oid: 30,
            data_set_oid: 31,
            data_source_oid: 1,
            connection_type: ConnectionType::Database,
            connection: "postgresql://geo@geodb/edit".into(),
            data_set_name: "afu.gewaesser".into(),
            primary_key: None,
            geometry_column: None,
        }
    }

    #[tokio::test]
    async fn missing_data_fails_every_query() {
        let mut store = MemoryStore::default();
        store.tables.insert("afu.gewaesser".into(), TableMetadata::default());
        assert!(store.table_metadata(&data_set()).await.unwrap().is_some());

        store.missing = Some("ConfigDB rows".into());
        assert!(matches!(
            store.table_metadata(&data_set()).await,
            Err(StoreError::MissingData(_))
        ));
        assert!(matches!(store.principals().await, Err(StoreError::MissingData(_))));
    }

    #[tokio::test]
    async fn broken_services_are_listed_per_type() {
        let store = MemoryStore {
            broken_services: vec![BrokenService {
                ows_type: OwsType::Wms,
                name: "broken".into(),
                reason: "missing data: no root layer".into(),
            }],
            ..Default::default()
        };
        let wms = store.ows_services(OwsType::Wms).await.unwrap();
        assert!(wms.services.is_empty());
        assert_eq!(wms.broken[0].name, "broken");
        assert!(store.ows_services(OwsType::Wfs).await.unwrap().broken.is_empty());
    }
}
