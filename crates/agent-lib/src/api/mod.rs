//! Cronitor API client.
//!
//! Three outbound surfaces: batch monitor upsert, telemetry pings, and
//! the presigned log upload. The [`CronitorApi`] trait is the seam the
//! collection and the event pipeline depend on; [`CronitorClient`] is the
//! reqwest-backed implementation.

mod descriptor;
mod logs;
mod monitors;
mod telemetry;

pub use descriptor::{MonitorDescriptor, Rule};
pub use logs::is_dns_failure;
pub use telemetry::{
    job_reason_to_state, pod_reason_to_state, TelemetryEvent, TelemetryState,
};

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::errors::{AgentError, Result};

/// Pinned wire-format version sent on every monitor API request.
const CRONITOR_VERSION_HEADER: &str = "2020-10-27";

/// Production hosts, overridden together by `--hostname-override`.
const DEFAULT_MONITOR_HOST: &str = "https://cronitor.io";
const DEFAULT_TELEMETRY_HOST: &str = "https://cronitor.link";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A monitor object as returned by the upsert endpoint. Only the fields
/// the agent inspects are deserialized.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Monitor {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub schedule: Option<String>,
}

/// Outbound operations against Cronitor.
#[async_trait]
pub trait CronitorApi: Send + Sync {
    /// Create-or-update monitors, one HTTP request for the whole batch.
    async fn put_monitors(&self, monitors: &[MonitorDescriptor]) -> Result<Vec<Monitor>>;

    /// Send a single telemetry ping.
    async fn send_telemetry(&self, event: &TelemetryEvent) -> Result<()>;

    /// Upload logs for a terminal event: presign, gzipped PUT, then a
    /// follow-up `logs`-state ping.
    async fn ship_logs(&self, event: &TelemetryEvent, logs: &str) -> Result<()>;
}

/// HTTP client for the Cronitor monitor and telemetry APIs.
pub struct CronitorClient {
    http: reqwest::Client,
    api_key: String,
    user_agent: String,
    hostname_override: Option<String>,
    dry_run: bool,
}

impl CronitorClient {
    pub fn new(
        api_key: impl Into<String>,
        user_agent: impl Into<String>,
        hostname_override: Option<String>,
        dry_run: bool,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let hostname_override = hostname_override.filter(|host| !host.is_empty());
        if let Some(host) = &hostname_override {
            Url::parse(host).map_err(|err| {
                AgentError::ConfigInvalid(format!("invalid hostname override \"{host}\": {err}"))
            })?;
        }

        Ok(Self {
            http,
            api_key: api_key.into(),
            user_agent: user_agent.into(),
            hostname_override,
            dry_run,
        })
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Base URL for the monitor-management API.
    fn monitor_api_url(&self) -> String {
        match &self.hostname_override {
            Some(host) => format!("{host}/api"),
            None => format!("{DEFAULT_MONITOR_HOST}/api"),
        }
    }

    /// Base URL for the telemetry API. Distinct host in production,
    /// collapsed onto the override when one is set.
    fn telemetry_url(&self) -> String {
        match &self.hostname_override {
            Some(host) => host.clone(),
            None => DEFAULT_TELEMETRY_HOST.to_string(),
        }
    }

    fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn api_key(&self) -> &str {
        &self.api_key
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

#[async_trait]
impl CronitorApi for CronitorClient {
    async fn put_monitors(&self, monitors: &[MonitorDescriptor]) -> Result<Vec<Monitor>> {
        self.put_monitors_request(monitors).await
    }

    async fn send_telemetry(&self, event: &TelemetryEvent) -> Result<()> {
        self.send_telemetry_request(event).await
    }

    async fn ship_logs(&self, event: &TelemetryEvent, logs: &str) -> Result<()> {
        self.ship_logs_request(event, logs).await
    }
}
