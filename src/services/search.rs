use super::{RolePermissions, ServiceHandler};
use crate::config::ServiceEntry;
use crate::error::StoreError;
use crate::permissions::{PermissionIndex, PUBLIC_ROLE};
use crate::store::{ConfigStore, EditDataset};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

pub struct SearchService;

/// Facets every search config starts with: (name, filter word, default).
const BUILTIN_FACETS: &[(&str, &str, bool)] = &[("foreground", "Karte", true), ("background", "Hintergrundkarte", false)];

fn searchable(dataset: &EditDataset) -> Option<&str> {
    if dataset.searchable == 0 {
        return None;
    }
    dataset.facet.as_deref()
}

#[async_trait]
impl ServiceHandler for SearchService {
    fn name(&self) -> &str {
        "search"
    }

    fn schema_url(&self) -> String {
        "https://github.com/qwc-services/qwc-fulltext-search-service/raw/master/schemas/qwc-search-service.json".into()
    }

    async fn resources(
        &self,
        store: &dyn ConfigStore,
        _entry: &ServiceEntry,
        _config: &Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError> {
        let index = PermissionIndex::new(store.resource_permissions().await?);
        let granted = index.all_resource_ids(&["data_set_edit"]);

        let mut facets: Vec<Value> = BUILTIN_FACETS
            .iter()
            .map(|(name, filter_word, default)| json!({ "name": name, "filter_word": filter_word, "default": default }))
            .collect();
        let mut seen = HashSet::new();
        for dataset in store.edit_datasets().await? {
            if !granted.contains(&dataset.gdi_oid) {
                continue;
            }
            let Some(facet) = searchable(&dataset) else { continue };
            if !seen.insert((facet.to_string(), dataset.filter_word.clone())) {
                continue;
            }
            facets.push(json!({
                "name": facet,
                "filter_word": dataset.filter_word,
                "default": dataset.searchable == 2,
            }));
        }

        let mut resources = Map::new();
        resources.insert("facets".into(), Value::Array(facets));
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
            let mut facets: Vec<String> = Vec::new();
            if role == PUBLIC_ROLE {
                facets.extend(BUILTIN_FACETS.iter().map(|(name, _, _)| name.to_string()));
            }
            let ids = index.resource_ids(role, &["data_set_edit"]);
            for facet in datasets
                .iter()
                .filter(|d| ids.contains(&d.gdi_oid))
                .filter_map(searchable)
            {
                if !facets.iter().any(|f| f == facet) {
                    facets.push(facet.to_string());
                }
            }
            let mut role_permissions = Map::new();
            role_permissions.insert("solr_facets".into(), json!(facets));
            permissions.insert(role.clone(), role_permissions);
        }
        Ok(permissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures;

    #[test]
    fn schema_points_at_fulltext_search_service() {
        assert_eq!(
            SearchService.schema_url(),
            "https://github.com/qwc-services/qwc-fulltext-search-service/raw/master/schemas/qwc-search-service.json"
        );
    }

    #[tokio::test]
    async fn facets_are_deduplicated_by_filter_word() {
        let mut store = fixtures::store();
        let mut twin = store.edit_datasets[0].clone();
        twin.gdi_oid = 401;
        twin.name = "afu.gewaesser_twin".into();
        store.edit_datasets.push(twin.clone());
        twin.gdi_oid = 402;
        twin.filter_word = Some("Bach".into());
        twin.searchable = 1;
        store.edit_datasets.push(twin);
        store.grant("public", 401, "data_set_edit", "afu.gewaesser_twin");
        store.grant("public", 402, "data_set_edit", "afu.gewaesser_twin");

        let resources = SearchService
            .resources(&store, &ServiceEntry::new("search"), &Map::new())
            .await
            .unwrap();
        let facets = resources["facets"].as_array().unwrap();
        assert_eq!(facets.len(), 4);
        assert_eq!(facets[0], json!({ "name": "foreground", "filter_word": "Karte", "default": true }));
        assert_eq!(facets[2], json!({ "name": "gewaesser", "filter_word": "Gewässer", "default": true }));
        assert_eq!(facets[3]["filter_word"], json!("Bach"));
        assert_eq!(facets[3]["default"], json!(false));
    }

    #[tokio::test]
    async fn public_role_always_gets_builtin_facets() {
        let store = fixtures::store();
        let index = PermissionIndex::new(store.resource_permissions().await.unwrap());
        let roles = vec!["afu_edit".to_string(), "public".to_string()];
        let perms = SearchService.permissions(&store, &index, &roles).await.unwrap();
        assert_eq!(perms["public"]["solr_facets"], json!(["foreground", "background", "gewaesser"]));
        // afu_edit holds a write grant on the edit dataset
        assert_eq!(perms["afu_edit"]["solr_facets"], json!(["gewaesser"]));
    }
}
