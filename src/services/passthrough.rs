use super::{qwc_schema, ServiceHandler};
use crate::config::ServiceEntry;
use crate::error::StoreError;
use crate::store::ConfigStore;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Service whose config and resources come from the config document alone.
pub struct PassthroughService {
    name: &'static str,
}

impl PassthroughService {
    pub fn new(name: &'static str) -> Self {
        PassthroughService { name }
    }
}

#[async_trait]
impl ServiceHandler for PassthroughService {
    fn name(&self) -> &str {
        self.name
    }

    fn schema_url(&self) -> String {
        qwc_schema(self.name)
    }

    async fn resources(
        &self,
        _store: &dyn ConfigStore,
        entry: &ServiceEntry,
        _config: &Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError> {
        Ok(entry.resources.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn resources_are_copied_verbatim() {
        let mut entry = ServiceEntry::new("elevation");
        entry.resources.insert("datasets".into(), json!([{ "name": "dtm", "path": "/geodata/dtm.tif" }]));
        let resources = PassthroughService::new("elevation")
            .resources(&MemoryStore::default(), &entry, &Map::new())
            .await
            .unwrap();
        assert_eq!(resources, entry.resources);
    }
}
