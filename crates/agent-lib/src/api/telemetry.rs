//! Telemetry pings and the event-reason translation table.

use std::fmt;

use tracing::debug;

use super::CronitorClient;
use crate::errors::{AgentError, Result};

/// The verb of a telemetry ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryState {
    Run,
    Complete,
    Fail,
    Ok,
    Logs,
}

impl TelemetryState {
    /// Terminal states gate log fetching.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TelemetryState::Complete | TelemetryState::Fail)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryState::Run => "run",
            TelemetryState::Complete => "complete",
            TelemetryState::Fail => "fail",
            TelemetryState::Ok => "ok",
            TelemetryState::Logs => "logs",
        }
    }
}

impl fmt::Display for TelemetryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a Job event reason to a telemetry state.
pub fn job_reason_to_state(reason: &str) -> Result<TelemetryState> {
    match reason {
        "SuccessfulCreate" => Ok(TelemetryState::Run),
        "Completed" => Ok(TelemetryState::Complete),
        "BackoffLimitExceeded" => Ok(TelemetryState::Fail),
        other => Err(AgentError::UnknownEventReason {
            kind: "job",
            reason: other.to_string(),
        }),
    }
}

/// Maps a Pod event reason to a telemetry state.
pub fn pod_reason_to_state(reason: &str) -> Result<TelemetryState> {
    match reason {
        "Started" => Ok(TelemetryState::Run),
        "BackOff" => Ok(TelemetryState::Fail),
        other => Err(AgentError::UnknownEventReason {
            kind: "pod",
            reason: other.to_string(),
        }),
    }
}

/// One state transition for one execution attempt, ready to send.
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    /// Cronitor monitor key of the owning CronJob
    pub monitor_key: String,
    pub state: TelemetryState,
    pub message: String,
    /// The Job UID: stable across pod retries of the same run
    pub series: String,
    pub exit_code: Option<i32>,
    pub env: String,
    /// Kubernetes node the pod ran on
    pub host: String,
    /// Event timestamp, epoch seconds
    pub stamp: Option<i64>,
    pub metric: Option<String>,
}

impl TelemetryEvent {
    /// Query parameters for the ping URL. `state` is always present;
    /// everything else is omitted when empty.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("state", self.state.to_string())];
        if !self.message.is_empty() {
            pairs.push(("message", self.message.clone()));
        }
        if !self.series.is_empty() {
            pairs.push(("series", self.series.clone()));
        }
        if let Some(code) = self.exit_code {
            pairs.push(("exit_code", code.to_string()));
        }
        if !self.env.is_empty() {
            pairs.push(("env", self.env.clone()));
        }
        if !self.host.is_empty() {
            pairs.push(("host", self.host.clone()));
        }
        if let Some(stamp) = self.stamp {
            pairs.push(("stamp", stamp.to_string()));
        }
        if let Some(metric) = &self.metric {
            pairs.push(("metric", metric.clone()));
        }
        pairs
    }
}

impl CronitorClient {
    pub(super) async fn send_telemetry_request(&self, event: &TelemetryEvent) -> Result<()> {
        if self.dry_run() {
            return Ok(());
        }

        let url = format!(
            "{}/ping/{}/{}",
            self.telemetry_url(),
            self.api_key(),
            event.monitor_key
        );

        debug!(series = %event.series, state = %event.state, "sending telemetry ping");

        let response = self
            .http()
            .post(&url)
            .query(&event.query_pairs())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::RemoteRejected {
                url,
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}
