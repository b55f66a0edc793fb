//! batch/v1 Job endpoints

use crate::error::Result;
use crate::resources::{DeleteOptions, Job};
use crate::{KubeClient, require};
use tracing::debug;

impl KubeClient {
    fn jobs_url(&self, namespace: &str) -> String {
        format!(
            "{}/apis/batch/v1/namespaces/{}/jobs",
            self.base_url, namespace
        )
    }

    /// Create a Job in `job.metadata.namespace`
    pub async fn create_job(&self, job: &Job) -> Result<Job> {
        require("namespace", &job.metadata.namespace)?;
        require("name", &job.metadata.name)?;

        debug!(namespace = %job.metadata.namespace, name = %job.metadata.name, "creating job");
        let url = self.jobs_url(&job.metadata.namespace);
        let response = self
            .authorized(self.client.post(&url))
            .json(job)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Delete a Job with background propagation
    pub async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        require("namespace", namespace)?;
        require("name", name)?;

        debug!(namespace, name, "deleting job");
        let url = format!("{}/{}", self.jobs_url(namespace), name);
        let response = self
            .authorized(self.client.delete(&url))
            .json(&DeleteOptions::background())
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
