use super::{qwc_schema, RolePermissions, ServiceHandler};
use crate::config::ServiceEntry;
use crate::error::StoreError;
use crate::permissions::PermissionIndex;
use crate::store::{ConfigStore, EditDataset, TableMetadata};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

const DATA_TABLES: &[&str] = &[
    "data_set_edit",
    "data_set_view",
    "data_set",
    "data_source",
    "data_set_view_attributes",
];

pub struct DataService;

/// Input constraints the data service derives from a column type.
fn constraints(data_type: &str) -> Option<Value> {
    match data_type {
        "smallint" => Some(json!({ "min": -32768, "max": 32767 })),
        "integer" => Some(json!({ "min": -2147483648i64, "max": 2147483647i64 })),
        "double precision" | "real" => Some(json!({ "pattern": "[0-9]+([\\.,][0-9]+)?" })),
        _ => None,
    }
}

fn dataset_resource(dataset: &EditDataset, meta: &TableMetadata) -> Value {
    let (schema, table_name) = dataset.data_set.schema_and_table();
    let fields: Vec<Value> = dataset
        .attributes
        .iter()
        .map(|a| {
            let data_type = meta.column_types.get(&a.name).map(String::as_str).unwrap_or("text");
            let mut field = json!({ "name": a.name, "data_type": data_type });
            if let Some(c) = constraints(data_type) {
                field["constraints"] = c;
            }
            field
        })
        .collect();
    let primary_key = dataset.data_set.primary_key.clone().or_else(|| meta.primary_key.clone());

    let mut resource = json!({
        "name": dataset.name,
        "db_url": dataset.data_set.connection,
        "schema": schema,
        "table_name": table_name,
        "primary_key": primary_key,
        "fields": fields,
    });
    if let Some(geometry) = &meta.geometry {
        resource["geometry"] = json!({
            "geometry_column": geometry.column,
            "geometry_type": geometry.geometry_type,
            "srid": geometry.srid,
        });
    }
    resource
}

#[async_trait]
impl ServiceHandler for DataService {
    fn name(&self) -> &str {
        "data"
    }

    fn schema_url(&self) -> String {
        qwc_schema("data")
    }

    async fn resources(
        &self,
        store: &dyn ConfigStore,
        _entry: &ServiceEntry,
        _config: &Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError> {
        let mut datasets = Vec::new();
        for dataset in store.edit_datasets().await? {
            match store.table_metadata(&dataset.data_set).await? {
                Some(meta) => datasets.push(dataset_resource(&dataset, &meta)),
                None => tracing::warn!(dataset = %dataset.name, "no table metadata, skipping dataset"),
            }
        }
        let mut resources = Map::new();
        resources.insert("datasets".into(), Value::Array(datasets));
        Ok(resources)
    }

    async fn permissions(
        &self,
        store: &dyn ConfigStore,
        index: &PermissionIndex,
        roles: &[String],
    ) -> Result<RolePermissions, StoreError> {
        let datasets = store.edit_datasets().await?;
        let mut permissions = RolePermissions::new();
        for role in roles {
            let grants = index.grants(role, DATA_TABLES);
            let writable: HashSet<&str> = index
                .resource_permissions(role, "data_set_edit")
                .into_iter()
                .filter(|p| p.write)
                .map(|p| p.resource_name.as_str())
                .collect();

            let mut dataset_permissions = Vec::new();
            for dataset in &datasets {
                let ds = &dataset.data_set;
                if ![dataset.gdi_oid, ds.view_oid, ds.data_set_oid, ds.data_source_oid]
                    .into_iter()
                    .all(|id| grants.any(id))
                {
                    continue;
                }
                let attributes: Vec<&str> = dataset
                    .attributes
                    .iter()
                    .filter(|a| grants.owns(a.gdi_oid))
                    .map(|a| a.name.as_str())
                    .collect();
                let writable = writable.contains(dataset.name.as_str());
                if attributes.is_empty() && !writable {
                    continue;
                }
                dataset_permissions.push(json!({
                    "name": dataset.name,
                    "attributes": attributes,
                    "writable": writable,
                    "creatable": writable,
                    "readable": true,
                    "updatable": writable,
                    "deletable": writable,
                }));
            }
            let mut role_permissions = Map::new();
            role_permissions.insert("data_datasets".into(), Value::Array(dataset_permissions));
            permissions.insert(role.clone(), role_permissions);
        }
        Ok(permissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures;

    #[tokio::test]
    async fn dataset_fields_use_column_types() {
        let store = fixtures::store();
        let resources = DataService
            .resources(&store, &ServiceEntry::new("data"), &Map::new())
            .await
            .unwrap();
        let dataset = &resources["datasets"][0];
        assert_eq!(dataset["schema"], json!("afu"));
        assert_eq!(dataset["table_name"], json!("gewaesser"));
        assert_eq!(dataset["primary_key"], json!("ogc_fid"));
        assert_eq!(dataset["fields"][0]["data_type"], json!("integer"));
        assert_eq!(dataset["fields"][0]["constraints"]["max"], json!(2147483647i64));
        assert_eq!(dataset["fields"][1], json!({ "name": "name", "data_type": "character varying" }));
        assert_eq!(dataset["geometry"]["srid"], json!(2056));
    }

    #[tokio::test]
    async fn dataset_without_metadata_is_skipped() {
        let mut store = fixtures::store();
        store.tables.clear();
        let resources = DataService
            .resources(&store, &ServiceEntry::new("data"), &Map::new())
            .await
            .unwrap();
        assert_eq!(resources["datasets"], json!([]));
    }

    #[tokio::test]
    async fn write_grant_makes_dataset_writable() {
        let store = fixtures::store();
        let index = PermissionIndex::new(store.resource_permissions().await.unwrap());
        let roles = vec!["afu_edit".to_string(), "public".to_string()];
        let perms = DataService.permissions(&store, &index, &roles).await.unwrap();

        let public = &perms["public"]["data_datasets"][0];
        assert_eq!(public["attributes"], json!(["gnrso", "name"]));
        assert_eq!(public["writable"], json!(false));

        let afu = &perms["afu_edit"]["data_datasets"][0];
        assert_eq!(afu["attributes"], json!([]));
        assert_eq!(afu["writable"], json!(true));
        assert_eq!(afu["deletable"], json!(true));
    }
}
