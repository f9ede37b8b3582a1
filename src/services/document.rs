use super::{qwc_schema, RolePermissions, ServiceHandler};
use crate::config::ServiceEntry;
use crate::error::StoreError;
use crate::permissions::PermissionIndex;
use crate::store::ConfigStore;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::Path;

pub struct DocumentService;

/// Report file name without its extension (`grundbuch.jrxml` -> `grundbuch`).
fn report_stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
}

#[async_trait]
impl ServiceHandler for DocumentService {
    fn name(&self) -> &str {
        "document"
    }

    fn schema_url(&self) -> String {
        qwc_schema("document")
    }

    async fn resources(
        &self,
        store: &dyn ConfigStore,
        _entry: &ServiceEntry,
        _config: &Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError> {
        let templates: Vec<Value> = store
            .document_templates()
            .await?
            .iter()
            .map(|t| json!({ "template": t.name, "report_filename": report_stem(&t.report_filename) }))
            .collect();
        let mut resources = Map::new();
        resources.insert("document_templates".into(), Value::Array(templates));
        Ok(resources)
    }

    async fn permissions(
        &self,
        store: &dyn ConfigStore,
        index: &PermissionIndex,
        roles: &[String],
    ) -> Result<RolePermissions, StoreError> {
        let templates = store.document_templates().await?;
        let mut permissions = RolePermissions::new();
        for role in roles {
            let ids = index.resource_ids(role, &["template"]);
            let permitted: Vec<&str> = templates
                .iter()
                .filter(|t| ids.contains(&t.gdi_oid))
                .map(|t| t.name.as_str())
                .collect();
            let mut role_permissions = Map::new();
            role_permissions.insert("document_templates".into(), json!(permitted));
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
    fn report_extension_is_dropped() {
        assert_eq!(report_stem("grundbuch.jrxml"), "grundbuch");
        assert_eq!(report_stem("plan"), "plan");
    }

    #[tokio::test]
    async fn restricted_template_only_for_role() {
        let store = fixtures::store();
        let resources = DocumentService
            .resources(&store, &ServiceEntry::new("document"), &Map::new())
            .await
            .unwrap();
        assert_eq!(
            resources["document_templates"],
            json!([{ "template": "grundbuch", "report_filename": "grundbuch" }])
        );

        let index = PermissionIndex::new(store.resource_permissions().await.unwrap());
        let roles = vec!["afu_edit".to_string(), "public".to_string()];
        let perms = DocumentService.permissions(&store, &index, &roles).await.unwrap();
        assert_eq!(perms["afu_edit"]["document_templates"], json!(["grundbuch"]));
        assert_eq!(perms["public"]["document_templates"], json!([]));
    }
}
