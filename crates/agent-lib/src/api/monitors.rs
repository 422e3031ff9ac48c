//! Batch monitor upsert.

use tracing::debug;

use super::{CronitorClient, Monitor, MonitorDescriptor, CRONITOR_VERSION_HEADER};
use crate::errors::{AgentError, Result};

impl CronitorClient {
    /// PUT the whole batch of monitors in one request. A cluster with
    /// thousands of CronJobs still produces a single call here.
    pub(super) async fn put_monitors_request(
        &self,
        monitors: &[MonitorDescriptor],
    ) -> Result<Vec<Monitor>> {
        let url = format!("{}/monitors?auto-discover=1", self.monitor_api_url());

        debug!(url = %url, count = monitors.len(), "sending monitor upsert");

        if self.dry_run() {
            return Ok(Vec::new());
        }

        let response = self
            .http()
            .put(&url)
            .basic_auth(self.api_key(), Some(""))
            .header("Content-Type", "application/json")
            .header("User-Agent", self.user_agent())
            .header("Cronitor-Version", CRONITOR_VERSION_HEADER)
            .json(&monitors)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() != 200 && status.as_u16() != 201 {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::RemoteRejected {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let monitors: Vec<Monitor> = response.json().await?;
        debug!(returned = monitors.len(), "monitor upsert accepted");
        Ok(monitors)
    }
}

#[cfg(test)]
mod tests {
    use super::super::CronitorClient;
    use crate::annotations::ResolvedConfig;
    use crate::api::MonitorDescriptor;
    use k8s_openapi::api::batch::v1::CronJob;

    #[tokio::test]
    async fn dry_run_suppresses_the_request() {
        let client = CronitorClient::new(
            "apikey123",
            "cronitor-kubernetes/0.4.0",
            // an address nothing listens on: a real request would error
            Some("http://127.0.0.1:1".to_string()),
            true,
        )
        .unwrap();

        let descriptor =
            MonitorDescriptor::from_cronjob(&CronJob::default(), &ResolvedConfig::default());
        let monitors = client.put_monitors_request(&[descriptor]).await.unwrap();
        assert!(monitors.is_empty());
    }
}
