use super::{qwc_schema, RolePermissions, ServiceHandler};
use crate::config::ServiceEntry;
use crate::error::StoreError;
use crate::permissions::PermissionIndex;
use crate::store::ConfigStore;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub struct PrintService;

#[async_trait]
impl ServiceHandler for PrintService {
    fn name(&self) -> &str {
        "print"
    }

    fn schema_url(&self) -> String {
        qwc_schema("print")
    }

    async fn resources(
        &self,
        store: &dyn ConfigStore,
        _entry: &ServiceEntry,
        _config: &Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError> {
        let templates: Vec<Value> = store
            .print_templates()
            .await?
            .into_iter()
            .map(|t| json!({ "template": t.name }))
            .collect();
        let mut resources = Map::new();
        resources.insert("print_templates".into(), Value::Array(templates));
        Ok(resources)
    }

    async fn permissions(
        &self,
        store: &dyn ConfigStore,
        index: &PermissionIndex,
        roles: &[String],
    ) -> Result<RolePermissions, StoreError> {
        let templates = store.print_templates().await?;
        let mut permissions = RolePermissions::new();
        for role in roles {
            let ids = index.resource_ids(role, &["template"]);
            let permitted: Vec<&str> = templates
                .iter()
                .filter(|t| ids.contains(&t.gdi_oid))
                .map(|t| t.name.as_str())
                .collect();
            let mut role_permissions = Map::new();
            role_permissions.insert("print_templates".into(), json!(permitted));
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
    async fn templates_and_permissions() {
        let store = fixtures::store();
        let resources = PrintService
            .resources(&store, &ServiceEntry::new("print"), &Map::new())
            .await
            .unwrap();
        assert_eq!(resources["print_templates"], json!([{ "template": "A4-Hoch" }]));

        let index = PermissionIndex::new(store.resource_permissions().await.unwrap());
        let roles = vec!["afu_edit".to_string(), "public".to_string()];
        let perms = PrintService.permissions(&store, &index, &roles).await.unwrap();
        assert_eq!(perms["public"]["print_templates"], json!(["A4-Hoch"]));
        assert_eq!(perms["afu_edit"]["print_templates"], json!([]));
    }
}
