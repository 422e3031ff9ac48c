//! Log shipping: presign, gzipped upload, follow-up `logs` ping.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;
use tracing::{debug, info};

use super::{CronitorClient, TelemetryEvent, TelemetryState, CRONITOR_VERSION_HEADER};
use crate::errors::{AgentError, Result};

/// Code points of log text carried on the follow-up ping message.
const LOG_MESSAGE_LIMIT: usize = 2000;

#[derive(Debug, Deserialize)]
struct PresignResponse {
    #[serde(default)]
    url: String,
}

fn gzip_log_data(logs: &str) -> Vec<u8> {
    if logs.is_empty() {
        return Vec::new();
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    // writing into a Vec cannot fail
    let _ = encoder.write_all(logs.as_bytes());
    encoder.finish().unwrap_or_default()
}

/// True for resolution failures against the log host, which historically
/// may not exist and is only worth a debug line.
pub fn is_dns_failure(err: &AgentError) -> bool {
    match err {
        AgentError::RemoteUnreachable(inner) => {
            let text = format!("{inner:?}").to_lowercase();
            text.contains("dns") || text.contains("no such host")
        }
        _ => false,
    }
}

impl CronitorClient {
    /// Ships the log body for a terminal event. The state ping for the
    /// event has already been sent by the time this runs.
    pub(super) async fn ship_logs_request(
        &self,
        event: &TelemetryEvent,
        logs: &str,
    ) -> Result<()> {
        if logs.is_empty() {
            return Ok(());
        }
        if self.dry_run() {
            return Ok(());
        }

        let presign_url = format!("{}/logs/presign", self.monitor_api_url());
        let body = serde_json::json!({
            "job_key": event.monitor_key,
            "series": event.series,
        });

        let response = self
            .http()
            .post(&presign_url)
            .basic_auth(self.api_key(), Some(""))
            .header("Content-Type", "application/json")
            .header("User-Agent", self.user_agent())
            .header("Cronitor-Version", CRONITOR_VERSION_HEADER)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::RemoteRejected {
                url: presign_url,
                status: status.as_u16(),
                body,
            });
        }

        let presign: PresignResponse = response.json().await?;
        if presign.url.is_empty() {
            return Err(AgentError::PresignMissingUrl {
                series: event.series.clone(),
            });
        }

        // No custom headers here: the presigned URL governs what was signed.
        let upload = self
            .http()
            .put(&presign.url)
            .body(gzip_log_data(logs))
            .send()
            .await?;

        let status = upload.status();
        if !status.is_success() {
            let body = upload.text().await.unwrap_or_default();
            return Err(AgentError::RemoteRejected {
                url: presign.url,
                status: status.as_u16(),
                body,
            });
        }

        debug!(series = %event.series, bytes = logs.len(), "log data uploaded");

        let mut logs_event = event.clone();
        logs_event.state = TelemetryState::Logs;
        logs_event.metric = Some(format!("length:{}", logs.len()));
        logs_event.message = logs.chars().take(LOG_MESSAGE_LIMIT).collect();
        self.send_telemetry_request(&logs_event).await?;

        info!(series = %event.series, "logs shipped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::CronitorClient;
    use std::io::Read;

    #[test]
    fn gzip_round_trips() {
        let compressed = gzip_log_data("hello from the job\n");
        let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
        let mut out = String::new();
        decoder.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello from the job\n");
    }

    #[test]
    fn empty_logs_produce_no_bytes() {
        assert!(gzip_log_data("").is_empty());
    }

    #[tokio::test]
    async fn empty_logs_skip_the_request_entirely() {
        let client = CronitorClient::new(
            "apikey123",
            "cronitor-kubernetes/0.4.0",
            // an address nothing listens on: a real request would error
            Some("http://127.0.0.1:1".to_string()),
            false,
        )
        .unwrap();

        let event = TelemetryEvent {
            monitor_key: "cj-abc".to_string(),
            state: TelemetryState::Complete,
            message: String::new(),
            series: "job-uid".to_string(),
            exit_code: None,
            env: String::new(),
            host: String::new(),
            stamp: None,
            metric: None,
        };
        assert!(client.ship_logs_request(&event, "").await.is_ok());
    }
}
