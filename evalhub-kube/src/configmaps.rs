//! core/v1 ConfigMap endpoints

use crate::error::Result;
use crate::resources::ConfigMap;
use crate::{KubeClient, require};
use tracing::debug;

impl KubeClient {
    fn config_maps_url(&self, namespace: &str) -> String {
        format!("{}/api/v1/namespaces/{}/configmaps", self.base_url, namespace)
    }

    /// Create a ConfigMap in `config_map.metadata.namespace`
    pub async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        require("namespace", &config_map.metadata.namespace)?;
        require("name", &config_map.metadata.name)?;

        debug!(
            namespace = %config_map.metadata.namespace,
            name = %config_map.metadata.name,
            "creating config map"
        );
        let url = self.config_maps_url(&config_map.metadata.namespace);
        let response = self
            .authorized(self.client.post(&url))
            .json(config_map)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        require("namespace", namespace)?;
        require("name", name)?;

        let url = format!("{}/{}", self.config_maps_url(namespace), name);
        let response = self.authorized(self.client.delete(&url)).send().await?;

        self.handle_empty_response(response).await
    }
}
