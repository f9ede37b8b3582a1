//! OGC service: WMS layer trees and WFS layer lists proxied in front of QGIS Server.

use super::{ows_services, qwc_schema, RolePermissions, ServiceHandler};
use crate::config::{GeneralConfig, ServiceEntry};
use crate::error::StoreError;
use crate::permissions::{Grants, PermissionIndex};
use crate::store::*;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

const WMS_TABLES: &[&str] = &[
    "wms_wfs",
    "ows_layer",
    "data_set_view",
    "data_set",
    "data_source",
    "data_set_view_attributes",
    "background_layer",
    "template",
];

const WFS_TABLES: &[&str] = &[
    "wms_wfs",
    "ows_layer",
    "data_set_view",
    "data_set",
    "data_source",
    "data_set_view_attributes",
];

pub struct OgcService;

/// `url` with exactly one trailing slash.
pub fn with_trailing_slash(url: &str) -> String {
    format!("{}/", url.trim_end_matches('/'))
}

fn print_url(base: &str, wms: &str) -> String {
    let path = format!("{}_print", wms);
    match url::Url::parse(base).and_then(|u| u.join(&path)) {
        Ok(u) => u.to_string(),
        Err(_) => format!("{}{}", base, path),
    }
}

/// Entry of `resources.<key>` in the config document whose `name` is `name`.
fn entry_resource<'a>(entry: &'a ServiceEntry, key: &str, name: &str) -> Option<&'a Map<String, Value>> {
    entry
        .resources
        .get(key)?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .find(|cfg| cfg.get("name").and_then(Value::as_str) == Some(name))
}

fn wms_layer(node: &LayerNode, facade: bool) -> Value {
    let mut layer = Map::new();
    layer.insert("name".into(), json!(node.name));
    if let Some(title) = &node.title {
        layer.insert("title".into(), json!(title));
    }
    match &node.kind {
        LayerKind::Group(group) => {
            layer.insert("type".into(), json!("layergroup"));
            let in_facade = group.facade || facade;
            let sublayers: Vec<Value> = group.children.iter().map(|c| wms_layer(c, in_facade)).collect();
            layer.insert("layers".into(), Value::Array(sublayers));
            if group.facade {
                layer.insert("hide_sublayers".into(), json!(true));
            }
        }
        LayerKind::Data(data) => {
            layer.insert("type".into(), json!("layer"));
            let queryable = match data.data_set.connection_type {
                ConnectionType::Database => {
                    let mut attributes: Vec<&str> = data.attributes.iter().map(|a| a.name.as_str()).collect();
                    attributes.push("geometry");
                    let queryable = !attributes.is_empty();
                    layer.insert("attributes".into(), json!(attributes));
                    queryable
                }
                ConnectionType::Directory => true,
            };
            layer.insert("queryable".into(), json!(queryable));
            if facade && data.transparency != 0 {
                layer.insert("opacity".into(), json!(100 - data.transparency));
            }
        }
    }
    Value::Object(layer)
}

/// Vector data layers below `node` in layer order.
fn data_layers<'a>(node: &'a LayerNode, out: &mut Vec<(&'a LayerNode, &'a DataLayer)>) {
    match &node.kind {
        LayerKind::Group(group) => group.children.iter().for_each(|c| data_layers(c, out)),
        LayerKind::Data(data) if data.data_set.connection_type == ConnectionType::Database => out.push((node, data)),
        LayerKind::Data(_) => {}
    }
}

async fn primary_key(store: &dyn ConfigStore, layer: &LayerNode, data: &DataLayer) -> Result<Option<String>, StoreError> {
    if let Some(pk) = &data.data_set.primary_key {
        return Ok(Some(pk.clone()));
    }
    let pk = store
        .table_metadata(&data.data_set)
        .await?
        .and_then(|meta| meta.primary_key);
    if pk.is_none() {
        tracing::warn!(layer = %layer.name, "could not find primary key");
    }
    Ok(pk)
}

fn layer_is_permitted(node: &LayerNode, data: &DataLayer, grants: &Grants) -> bool {
    let ds = &data.data_set;
    grants.owns(node.gdi_oid)
        && grants.owns(ds.view_oid)
        && grants.owns(ds.data_set_oid)
        // data sources may be granted publicly only
        && grants.any(ds.data_source_oid)
}

fn permitted_attributes(data: &DataLayer, grants: &Grants) -> Vec<String> {
    let mut attributes: Vec<String> = data
        .attributes
        .iter()
        .filter(|a| grants.owns(a.gdi_oid))
        .map(|a| a.name.clone())
        .collect();
    attributes.push("geometry".into());
    attributes
}

/// Flat list of permitted WMS layers; a group is listed before its sub layers when any is permitted.
fn wms_layer_permissions(node: &LayerNode, grants: &Grants) -> Vec<Value> {
    match &node.kind {
        LayerKind::Group(group) => {
            let sublayers: Vec<Value> = group
                .children
                .iter()
                .flat_map(|c| wms_layer_permissions(c, grants))
                .collect();
            if sublayers.is_empty() {
                return sublayers;
            }
            let mut layers = vec![json!({ "name": node.name })];
            layers.extend(sublayers);
            layers
        }
        LayerKind::Data(data) if layer_is_permitted(node, data, grants) => {
            let mut layer = json!({ "name": node.name });
            if data.data_set.connection_type == ConnectionType::Database {
                layer["attributes"] = json!(permitted_attributes(data, grants));
            }
            vec![layer]
        }
        LayerKind::Data(_) => Vec::new(),
    }
}

impl OgcService {
    async fn wms_services(
        &self,
        store: &dyn ConfigStore,
        entry: &ServiceEntry,
        config: &Map<String, Value>,
    ) -> Result<Vec<Value>, StoreError> {
        let base = with_trailing_slash(
            config
                .get("default_qgis_server_url")
                .and_then(Value::as_str)
                .unwrap_or("http://localhost:8001/ows/"),
        );
        let print_templates: Vec<String> = store.print_templates().await?.into_iter().map(|t| t.name).collect();
        let print_layers: Vec<String> = store.background_layers().await?.into_iter().map(|l| l.name).collect();

        let mut services = Vec::new();
        for wms in ows_services(store, OwsType::Wms).await? {
            let online_resources = entry_resource(entry, "wms_services", &wms.name)
                .and_then(|cfg| cfg.get("online_resources").cloned())
                .unwrap_or_else(|| json!({}));
            services.push(json!({
                "name": wms.name,
                "online_resources": online_resources,
                "root_layer": wms_layer(&wms.root_layer, false),
                "print_url": print_url(&base, &wms.name),
                "print_templates": print_templates,
                "internal_print_layers": print_layers,
            }));
        }
        Ok(services)
    }

    async fn wfs_services(&self, store: &dyn ConfigStore, entry: &ServiceEntry) -> Result<Vec<Value>, StoreError> {
        let mut services = Vec::new();
        for wfs in ows_services(store, OwsType::Wfs).await? {
            let mut found = Vec::new();
            data_layers(&wfs.root_layer, &mut found);
            let mut layers = Vec::with_capacity(found.len());
            for (node, data) in found {
                let mut attributes: Vec<String> = primary_key(store, node, data).await?.into_iter().collect();
                attributes.extend(data.attributes.iter().map(|a| a.name.clone()));
                attributes.push("geometry".into());
                layers.push(json!({ "name": node.name, "attributes": attributes }));
            }
            let online_resource = entry_resource(entry, "wfs_services", &wfs.name)
                .and_then(|cfg| cfg.get("online_resource").cloned())
                .unwrap_or(Value::Null);
            services.push(json!({
                "name": wfs.name,
                "online_resource": online_resource,
                "layers": layers,
            }));
        }
        Ok(services)
    }
}

#[async_trait]
impl ServiceHandler for OgcService {
    fn name(&self) -> &str {
        "ogc"
    }

    fn schema_url(&self) -> String {
        qwc_schema("ogc")
    }

    fn default_config(&self, general: &GeneralConfig) -> Map<String, Value> {
        let mut config = Map::new();
        config.insert(
            "default_qgis_server_url".into(),
            json!(with_trailing_slash(&general.default_qgis_server_url)),
        );
        config
    }

    async fn resources(
        &self,
        store: &dyn ConfigStore,
        entry: &ServiceEntry,
        config: &Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError> {
        let mut resources = Map::new();
        resources.insert("wms_services".into(), Value::Array(self.wms_services(store, entry, config).await?));
        resources.insert("wfs_services".into(), Value::Array(self.wfs_services(store, entry).await?));
        Ok(resources)
    }

    async fn permissions(
        &self,
        store: &dyn ConfigStore,
        index: &PermissionIndex,
        roles: &[String],
    ) -> Result<RolePermissions, StoreError> {
        let wms_services = ows_services(store, OwsType::Wms).await?;
        let wfs_services = ows_services(store, OwsType::Wfs).await?;
        let print_templates = store.print_templates().await?;
        let background_layers = store.background_layers().await?;

        let mut permissions = RolePermissions::new();
        for role in roles {
            let grants = index.grants(role, WMS_TABLES);
            let mut wms_permissions = Vec::new();
            for wms in wms_services.iter().filter(|s| grants.any(s.gdi_oid)) {
                let mut layers = wms_layer_permissions(&wms.root_layer, &grants);
                layers.extend(
                    background_layers
                        .iter()
                        .filter(|l| grants.owns(l.gdi_oid))
                        .map(|l| json!({ "name": l.name })),
                );
                let templates: Vec<&str> = print_templates
                    .iter()
                    .filter(|t| grants.owns(t.gdi_oid))
                    .map(|t| t.name.as_str())
                    .collect();
                if layers.is_empty() && templates.is_empty() {
                    continue;
                }
                let mut wms_permission = json!({ "name": wms.name, "layers": layers });
                if !templates.is_empty() {
                    wms_permission["print_templates"] = json!(templates);
                }
                wms_permissions.push(wms_permission);
            }

            let grants = index.grants(role, WFS_TABLES);
            let mut wfs_permissions = Vec::new();
            for wfs in wfs_services.iter().filter(|s| grants.any(s.gdi_oid)) {
                let mut found = Vec::new();
                data_layers(&wfs.root_layer, &mut found);
                let layers: Vec<Value> = found
                    .into_iter()
                    .filter(|(node, data)| layer_is_permitted(node, data, &grants))
                    .map(|(node, data)| json!({ "name": node.name, "attributes": permitted_attributes(data, &grants) }))
                    .collect();
                if !layers.is_empty() {
                    wfs_permissions.push(json!({ "name": wfs.name, "layers": layers }));
                }
            }

            let mut role_permissions = Map::new();
            role_permissions.insert("wms_services".into(), Value::Array(wms_permissions));
            role_permissions.insert("wfs_services".into(), Value::Array(wfs_permissions));
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
    fn trailing_slash_is_normalized() {
        assert_eq!(with_trailing_slash("http://qgis/ows"), "http://qgis/ows/");
        assert_eq!(with_trailing_slash("http://qgis/ows//"), "http://qgis/ows/");
        assert_eq!(print_url("http://qgis/ows/", "somap"), "http://qgis/ows/somap_print");
    }

    #[tokio::test]
    async fn wms_tree_carries_facade_and_attributes() {
        let store = fixtures::store();
        let mut entry = ServiceEntry::new("ogc");
        entry.resources = json!({
            "wms_services": [{ "name": "somap", "online_resources": { "service": "https://geo.so.ch/ows/somap" } }]
        })
        .as_object()
        .cloned()
        .unwrap();
        let config = OgcService.default_config(&GeneralConfig::default());
        let resources = OgcService.resources(&store, &entry, &config).await.unwrap();

        let wms = &resources["wms_services"][0];
        assert_eq!(wms["print_url"], json!("http://localhost:8001/ows/somap_print"));
        assert_eq!(wms["online_resources"]["service"], json!("https://geo.so.ch/ows/somap"));
        assert_eq!(wms["print_templates"], json!(["A4-Hoch"]));
        assert_eq!(wms["internal_print_layers"], json!(["hintergrund"]));

        let root = &wms["root_layer"];
        assert_eq!(root["type"], json!("layergroup"));
        let facade = &root["layers"][0];
        assert_eq!(facade["hide_sublayers"], json!(true));
        assert_eq!(facade["layers"][0]["opacity"], json!(80));
        assert_eq!(facade["layers"][0]["attributes"], json!(["gnrso", "name", "geometry"]));
        let strassen = &root["layers"][1];
        assert!(strassen.get("opacity").is_none());
        let ortho = &root["layers"][2];
        assert_eq!(ortho["queryable"], json!(true));
        assert!(ortho.get("attributes").is_none());
    }

    #[tokio::test]
    async fn wfs_layers_start_with_primary_key() {
        let store = fixtures::store();
        let resources = OgcService
            .resources(&store, &ServiceEntry::new("ogc"), &Map::new())
            .await
            .unwrap();
        let layers = &resources["wfs_services"][0]["layers"];
        assert_eq!(layers[0]["attributes"], json!(["ogc_fid", "gnrso", "name", "geometry"]));
        // no table metadata for strassen
        assert_eq!(layers[1]["attributes"], json!(["typ", "geometry"]));
        assert_eq!(resources["wfs_services"][0]["online_resource"], Value::Null);
    }

    #[tokio::test]
    async fn role_permissions_add_to_public() {
        let store = fixtures::store();
        let index = PermissionIndex::new(store.resource_permissions().await.unwrap());
        let roles = vec!["afu_edit".to_string(), "public".to_string()];
        let perms = OgcService.permissions(&store, &index, &roles).await.unwrap();

        let public = &perms["public"]["wms_services"][0];
        let names: Vec<&str> = public["layers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["somap", "wasser", "gewaesser", "ortho", "hintergrund"]);
        assert_eq!(public["print_templates"], json!(["A4-Hoch"]));

        let afu = &perms["afu_edit"]["wms_services"][0];
        assert_eq!(
            afu["layers"],
            json!([{ "name": "somap" }, { "name": "strassen", "attributes": ["typ", "geometry"] }])
        );
        assert!(afu.get("print_templates").is_none());
        assert_eq!(perms["afu_edit"]["wfs_services"][0]["layers"][0]["name"], json!("strassen"));
    }

    #[tokio::test]
    async fn broken_service_is_left_out() {
        let mut store = fixtures::store();
        store.broken_services.push(BrokenService {
            ows_type: OwsType::Wms,
            name: "broken".into(),
            reason: "missing data: no root layer".into(),
        });
        let resources = OgcService
            .resources(&store, &ServiceEntry::new("ogc"), &Map::new())
            .await
            .unwrap();
        let names: Vec<&str> = resources["wms_services"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["somap"]);
        assert_eq!(resources["wfs_services"][0]["name"], json!("somap_wfs"));
    }
}
