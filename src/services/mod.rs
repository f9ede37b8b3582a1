//! Service handlers: each builds one service's resources and per-role permissions from the ConfigDB.

mod data;
mod document;
mod feature_info;
mod legend;
mod ogc;
mod passthrough;
mod print;
mod search;

pub use data::DataService;
pub use document::DocumentService;
pub use feature_info::FeatureInfoService;
pub use legend::LegendService;
pub use ogc::OgcService;
pub use passthrough::PassthroughService;
pub use print::PrintService;
pub use search::SearchService;

use crate::config::{merge_config, GeneralConfig, ServiceEntry};
use crate::error::StoreError;
use crate::permissions::PermissionIndex;
use crate::store::{ConfigStore, OwsService, OwsServices, OwsType};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Permissions of one service, keyed by role name.
pub type RolePermissions = BTreeMap<String, Map<String, Value>>;

#[async_trait]
pub trait ServiceHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Value of the document's `service` key.
    fn service(&self) -> &str {
        self.name()
    }

    /// JSON schema URL written as `$schema` of the service config.
    fn schema_url(&self) -> String;

    /// Config defaults the entry's `config` object is merged over.
    fn default_config(&self, _general: &GeneralConfig) -> Map<String, Value> {
        Map::new()
    }

    /// Config defaults read from the ConfigDB, layered over [`ServiceHandler::default_config`].
    async fn store_config(&self, _store: &dyn ConfigStore) -> Result<Map<String, Value>, StoreError> {
        Ok(Map::new())
    }

    /// The `resources` object of the service config. `config` is the merged config.
    async fn resources(
        &self,
        store: &dyn ConfigStore,
        entry: &ServiceEntry,
        config: &Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError>;

    /// Permissions for each of `roles`. Services without permissions return nothing.
    async fn permissions(
        &self,
        _store: &dyn ConfigStore,
        _index: &PermissionIndex,
        _roles: &[String],
    ) -> Result<RolePermissions, StoreError> {
        Ok(RolePermissions::new())
    }
}

/// Services that only carry static config and resources from the config document.
pub const PASSTHROUGH_SERVICES: &[&str] = &[
    "agdi", "saml-auth", "ccc", "elevation", "landreg", "mapinfo", "permalink", "plotinfo",
];

/// Handler for a configured service name, `None` if the generator does not know it.
pub fn handler_for(name: &str) -> Option<Box<dyn ServiceHandler>> {
    let handler: Box<dyn ServiceHandler> = match name {
        "ogc" => Box::new(OgcService),
        "print" => Box::new(PrintService),
        "document" => Box::new(DocumentService),
        "search" => Box::new(SearchService),
        "data" => Box::new(DataService),
        "featureInfo" => Box::new(FeatureInfoService),
        "legend" => Box::new(LegendService),
        other => {
            let known = PASSTHROUGH_SERVICES.iter().find(|s| **s == other)?;
            Box::new(PassthroughService::new(*known))
        }
    };
    Some(handler)
}

/// Complete service config document: `$schema`, `service`, merged `config` and `resources`.
pub async fn service_document(
    handler: &dyn ServiceHandler,
    store: &dyn ConfigStore,
    entry: &ServiceEntry,
    general: &GeneralConfig,
) -> Result<Value, StoreError> {
    let mut defaults = handler.default_config(general);
    defaults.extend(handler.store_config(store).await?);
    let config = merge_config(defaults, &entry.config);
    let resources = handler.resources(store, entry, &config).await?;
    Ok(json!({
        "$schema": handler.schema_url(),
        "service": handler.service(),
        "config": config,
        "resources": resources,
    }))
}

/// Usable services of one type; broken ones are logged and left out.
async fn ows_services(store: &dyn ConfigStore, ows_type: OwsType) -> Result<Vec<OwsService>, StoreError> {
    let OwsServices { services, broken } = store.ows_services(ows_type).await?;
    for b in broken {
        tracing::warn!(service = %b.name, reason = %b.reason, "skipping {} service", ows_type.as_str());
    }
    Ok(services)
}

fn qwc_schema(service: &str) -> String {
    format!(
        "https://github.com/qwc-services/qwc-{0}-service/raw/master/schemas/qwc-{0}-service.json",
        service
    )
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
