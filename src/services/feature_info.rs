//! FeatureInfo service: WMS layer trees with attribute aliases, info templates and feature reports.

use super::ogc::with_trailing_slash;
use super::{ows_services, qwc_schema, RolePermissions, ServiceHandler};
use crate::config::{GeneralConfig, ServiceEntry};
use crate::error::StoreError;
use crate::permissions::PermissionIndex;
use crate::store::*;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub struct FeatureInfoService;

/// Alias of an attribute and its JSON sub attribute aliases. A JSON alias looks like
/// `{"alias": "Adresse", "json_attrs": [{"name": "plz", "alias": "PLZ"}]}`.
fn attribute_aliases(layer: &str, attribute: &Attribute) -> Option<(String, Vec<Value>)> {
    let raw = attribute.alias.as_deref().filter(|a| !a.is_empty())?;
    if !raw.starts_with('{') {
        return Some((raw.to_string(), Vec::new()));
    }
    let parsed: Map<String, Value> = match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(layer, attribute = %attribute.name, error = %e, "alias is not valid JSON");
            return Some((raw.to_string(), Vec::new()));
        }
    };
    let alias = match parsed.get("alias") {
        Some(Value::String(alias)) if !alias.is_empty() => alias.clone(),
        Some(Value::String(_)) | Some(Value::Null) => attribute.name.clone(),
        _ => raw.to_string(),
    };
    let json_aliases = parsed
        .get("json_attrs")
        .and_then(Value::as_array)
        .map(|attrs| {
            attrs
                .iter()
                .map(|attr| {
                    let name = attr.get("name").cloned().unwrap_or(Value::Null);
                    let alias = attr
                        .get("alias")
                        .filter(|a| a.as_str().is_some_and(|s| !s.is_empty()))
                        .cloned()
                        .unwrap_or_else(|| name.clone());
                    json!({ "name": name, "alias": alias })
                })
                .collect()
        })
        .unwrap_or_default();
    Some((alias, json_aliases))
}

fn info_template(info: &InfoTemplate, data_set: &DataSetRef) -> Value {
    let mut template = Map::new();
    template.insert("type".into(), json!(info.kind.as_str()));
    match &info.kind {
        // always queried from the default QGIS server
        InfoKind::Wms => {}
        InfoKind::Sql(sql) => {
            if data_set.connection_type == ConnectionType::Database {
                template.insert("db_url".into(), json!(data_set.connection));
            }
            template.insert("sql".into(), json!(sql));
        }
        InfoKind::Module(module) => {
            template.insert("module".into(), json!(module));
        }
    }
    template.insert("template".into(), json!(info.template));
    Value::Object(template)
}

fn info_layer(node: &LayerNode) -> Value {
    let mut layer = Map::new();
    layer.insert("name".into(), json!(node.name));
    match &node.kind {
        LayerKind::Group(_) => layer.insert("type".into(), json!("layergroup")),
        LayerKind::Data(_) => layer.insert("type".into(), json!("layer")),
    };
    if let Some(title) = &node.title {
        layer.insert("title".into(), json!(title));
    }
    match &node.kind {
        LayerKind::Group(group) => {
            layer.insert("layers".into(), group.children.iter().map(info_layer).collect());
            if group.facade {
                layer.insert("hide_sublayers".into(), json!(true));
            }
        }
        LayerKind::Data(data) => {
            let mut attributes = Vec::with_capacity(data.attributes.len() + 1);
            let mut display_field = None;
            for attr in &data.attributes {
                let mut attribute = Map::new();
                attribute.insert("name".into(), json!(attr.name));
                if let Some((alias, json_aliases)) = attribute_aliases(&node.name, attr) {
                    attribute.insert("alias".into(), json!(alias));
                    if !json_aliases.is_empty() {
                        attribute.insert("json_attribute_aliases".into(), Value::Array(json_aliases));
                    }
                }
                if let Some(format) = &attr.format {
                    attribute.insert("format".into(), json!(format));
                }
                // the last flagged attribute wins
                if attr.display_field {
                    display_field = Some(&attr.name);
                }
                attributes.push(Value::Object(attribute));
            }
            if data.data_set.connection_type == ConnectionType::Database {
                attributes.push(json!({ "name": "geometry" }));
            }
            layer.insert("attributes".into(), Value::Array(attributes));

            if let Some(info) = &data.info_template {
                layer.insert("info_template".into(), info_template(info, &data.data_set));
            }
            if let Some(field) = display_field {
                layer.insert("display_field".into(), json!(field));
            }
            if let Some(report) = &data.feature_report {
                layer.insert("feature_report".into(), json!(report));
            }
        }
    }
    Value::Object(layer)
}

#[async_trait]
impl ServiceHandler for FeatureInfoService {
    fn name(&self) -> &str {
        "featureInfo"
    }

    fn service(&self) -> &str {
        "feature-info"
    }

    fn schema_url(&self) -> String {
        qwc_schema("feature-info")
    }

    fn default_config(&self, general: &GeneralConfig) -> Map<String, Value> {
        let mut config = Map::new();
        config.insert(
            "default_qgis_server_url".into(),
            json!(with_trailing_slash(&general.default_qgis_server_url)),
        );
        config
    }

    async fn store_config(&self, store: &dyn ConfigStore) -> Result<Map<String, Value>, StoreError> {
        let mut config = Map::new();
        if let Some(template) = store.default_info_template().await? {
            config.insert("default_info_template".into(), json!(template));
        }
        Ok(config)
    }

    async fn resources(
        &self,
        store: &dyn ConfigStore,
        _entry: &ServiceEntry,
        _config: &Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError> {
        let services: Vec<Value> = ows_services(store, OwsType::Wms)
            .await?
            .iter()
            .map(|wms| json!({ "name": wms.name, "root_layer": info_layer(&wms.root_layer) }))
            .collect();
        let mut resources = Map::new();
        resources.insert("wms_services".into(), Value::Array(services));
        Ok(resources)
    }

    /// WMS layers are granted through the ogc service and feature reports through
    /// the document service, so both lists stay empty here.
    async fn permissions(
        &self,
        _store: &dyn ConfigStore,
        _index: &PermissionIndex,
        roles: &[String],
    ) -> Result<RolePermissions, StoreError> {
        Ok(roles
            .iter()
            .map(|role| {
                let mut permissions = Map::new();
                permissions.insert("wms_services".into(), json!([]));
                permissions.insert("document_templates".into(), json!([]));
                (role.clone(), permissions)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{fixtures, service_document};

    fn with_info(mut store: MemoryStore) -> MemoryStore {
        let LayerKind::Group(root) = &mut store.wms_services[0].root_layer.kind else { panic!("root is a group") };
        let LayerKind::Group(facade) = &mut root.children[0].kind else { panic!("facade is a group") };
        let LayerKind::Data(gewaesser) = &mut facade.children[0].kind else { panic!("data expected") };
        gewaesser.attributes[1].alias =
            Some(r#"{"alias": "Name", "json_attrs": [{"name": "de", "alias": "Deutsch"}, {"name": "fr"}]}"#.into());
        gewaesser.attributes[1].display_field = true;
        gewaesser.attributes[0].format = Some("{:,}".into());
        gewaesser.info_template = Some(InfoTemplate {
            kind: InfoKind::Sql(Some("SELECT * FROM afu.gewaesser WHERE ogc_fid = :fid".into())),
            template: Some("<b>{{ feature.name }}</b>".into()),
        });
        gewaesser.feature_report = Some("gewaesser_report.pdf".into());
        store.default_info_template = Some("<table></table>".into());
        store
    }

    #[tokio::test]
    async fn layer_tree_carries_aliases_templates_and_reports() {
        let store = with_info(fixtures::store());
        let resources = FeatureInfoService
            .resources(&store, &ServiceEntry::new("featureInfo"), &Map::new())
            .await
            .unwrap();
        let root = &resources["wms_services"][0]["root_layer"];
        assert_eq!(resources["wms_services"][0]["name"], json!("somap"));
        assert_eq!(root["type"], json!("layergroup"));
        assert_eq!(root["layers"][0]["hide_sublayers"], json!(true));

        let gewaesser = &root["layers"][0]["layers"][0];
        assert_eq!(
            gewaesser["attributes"],
            json!([
                { "name": "gnrso", "alias": "Gewässernummer", "format": "{:,}" },
                {
                    "name": "name",
                    "alias": "Name",
                    "json_attribute_aliases": [
                        { "name": "de", "alias": "Deutsch" },
                        { "name": "fr", "alias": "fr" }
                    ]
                },
                { "name": "geometry" }
            ])
        );
        assert_eq!(gewaesser["display_field"], json!("name"));
        assert_eq!(gewaesser["feature_report"], json!("gewaesser_report.pdf"));
        assert_eq!(
            gewaesser["info_template"],
            json!({
                "type": "sql",
                "db_url": "postgresql://geo@geodb/edit",
                "sql": "SELECT * FROM afu.gewaesser WHERE ogc_fid = :fid",
                "template": "<b>{{ feature.name }}</b>"
            })
        );

        // raster layers have no geometry attribute
        let ortho = &root["layers"][2];
        assert_eq!(ortho["name"], json!("ortho"));
        assert_eq!(ortho["attributes"], json!([]));
        assert!(ortho.get("info_template").is_none());
    }

    #[test]
    fn malformed_json_alias_is_kept_verbatim() {
        let mut attr = fixtures::attr(1, "adresse", Some("{not json"));
        assert_eq!(attribute_aliases("l", &attr), Some(("{not json".into(), vec![])));
        attr.alias = Some(r#"{"alias": ""}"#.into());
        assert_eq!(attribute_aliases("l", &attr), Some(("adresse".into(), vec![])));
        attr.alias = Some(String::new());
        assert_eq!(attribute_aliases("l", &attr), None);
    }

    #[test]
    fn module_and_wms_templates() {
        let data_set = fixtures::data_set(30, "afu.gewaesser");
        let module = InfoTemplate {
            kind: InfoKind::Module(Some("gewaesser_info".into())),
            template: None,
        };
        assert_eq!(
            info_template(&module, &data_set),
            json!({ "type": "module", "module": "gewaesser_info", "template": null })
        );
        let wms = InfoTemplate {
            kind: InfoKind::Wms,
            template: Some("<p/>".into()),
        };
        assert_eq!(info_template(&wms, &data_set), json!({ "type": "wms", "template": "<p/>" }));
    }

    #[tokio::test]
    async fn document_uses_feature_info_service_name_and_default_template() {
        let store = with_info(fixtures::store());
        let doc = service_document(&FeatureInfoService, &store, &ServiceEntry::new("featureInfo"), &GeneralConfig::default())
            .await
            .unwrap();
        assert_eq!(doc["service"], json!("feature-info"));
        assert_eq!(
            doc["$schema"],
            json!("https://github.com/qwc-services/qwc-feature-info-service/raw/master/schemas/qwc-feature-info-service.json")
        );
        assert_eq!(doc["config"]["default_info_template"], json!("<table></table>"));
        assert_eq!(doc["config"]["default_qgis_server_url"], json!("http://localhost:8001/ows/"));

        let mut entry = ServiceEntry::new("featureInfo");
        entry.config.insert("default_info_template".into(), json!("<div/>"));
        let doc = service_document(&FeatureInfoService, &store, &entry, &GeneralConfig::default())
            .await
            .unwrap();
        assert_eq!(doc["config"]["default_info_template"], json!("<div/>"));
    }

    #[tokio::test]
    async fn permissions_are_empty_lists_for_every_role() {
        let store = fixtures::store();
        let index = PermissionIndex::new(store.resource_permissions().await.unwrap());
        let roles = vec!["afu_edit".to_string(), "public".to_string()];
        let perms = FeatureInfoService.permissions(&store, &index, &roles).await.unwrap();
        assert_eq!(perms.len(), 2);
        assert_eq!(
            Value::Object(perms["public"].clone()),
            json!({ "wms_services": [], "document_templates": [] })
        );
    }
}
