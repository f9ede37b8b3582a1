use super::ogc::with_trailing_slash;
use super::{ows_services, qwc_schema, RolePermissions, ServiceHandler};
use crate::config::{GeneralConfig, ServiceEntry};
use crate::error::StoreError;
use crate::permissions::PermissionIndex;
use crate::store::*;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub struct LegendService;

/// Custom legend images are listed for data layers and facade groups only;
/// sub layers of a facade are not shown on their own.
fn legend_layer(node: &LayerNode) -> Value {
    let mut layer = Map::new();
    layer.insert("name".into(), json!(node.name));
    let legend_image = match &node.kind {
        LayerKind::Group(group) => {
            layer.insert("type".into(), json!("layergroup"));
            layer.insert("layers".into(), group.children.iter().map(legend_layer).collect());
            if !group.facade {
                None
            } else {
                layer.insert("hide_sublayers".into(), json!(true));
                node.legend_image.as_ref()
            }
        }
        LayerKind::Data(_) => {
            layer.insert("type".into(), json!("layer"));
            node.legend_image.as_ref()
        }
    };
    if let Some(image) = legend_image {
        layer.insert("legend_image".into(), json!(image));
    }
    Value::Object(layer)
}

#[async_trait]
impl ServiceHandler for LegendService {
    fn name(&self) -> &str {
        "legend"
    }

    fn schema_url(&self) -> String {
        qwc_schema("legend")
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
        _entry: &ServiceEntry,
        _config: &Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError> {
        let services: Vec<Value> = ows_services(store, OwsType::Wms)
            .await?
            .iter()
            .map(|wms| json!({ "name": wms.name, "root_layer": legend_layer(&wms.root_layer) }))
            .collect();
        let mut resources = Map::new();
        resources.insert("wms_services".into(), Value::Array(services));
        Ok(resources)
    }

    /// WMS layers are granted through the ogc service.
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
                (role.clone(), permissions)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures;

    #[tokio::test]
    async fn legend_images_on_data_layers_and_facades() {
        let mut store = fixtures::store();
        let LayerKind::Group(root) = &mut store.wms_services[0].root_layer.kind else { panic!("root is a group") };
        root.children[0].legend_image = Some("wasser.png".into());
        root.children[1].legend_image = Some("strassen_legende.png".into());
        store.wms_services[0].root_layer.legend_image = Some("ignored.png".into());

        let resources = LegendService
            .resources(&store, &ServiceEntry::new("legend"), &Map::new())
            .await
            .unwrap();
        let root = &resources["wms_services"][0]["root_layer"];
        assert_eq!(root["name"], json!("somap"));
        // only facade groups carry a legend image
        assert!(root.get("legend_image").is_none());
        assert_eq!(
            root["layers"][0],
            json!({
                "name": "wasser",
                "type": "layergroup",
                "hide_sublayers": true,
                "legend_image": "wasser.png",
                "layers": [{ "name": "gewaesser", "type": "layer" }]
            })
        );
        assert_eq!(
            root["layers"][1],
            json!({ "name": "strassen", "type": "layer", "legend_image": "strassen_legende.png" })
        );
    }

    #[tokio::test]
    async fn permissions_leave_wms_services_to_ogc() {
        let store = fixtures::store();
        let index = PermissionIndex::new(store.resource_permissions().await.unwrap());
        let perms = LegendService
            .permissions(&store, &index, &["public".to_string()])
            .await
            .unwrap();
        assert_eq!(Value::Object(perms["public"].clone()), json!({ "wms_services": [] }));
        assert_eq!(
            LegendService.schema_url(),
            "https://github.com/qwc-services/qwc-legend-service/raw/master/schemas/qwc-legend-service.json"
        );
    }
}
