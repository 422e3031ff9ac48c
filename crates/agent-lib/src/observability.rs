//! Prometheus metrics for the agent.

use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    events_seen: IntCounter,
    events_discarded: IntCounterVec,
    pings_sent: IntCounter,
    ping_errors: IntCounter,
    monitors_tracked: IntGauge,
    monitor_sync_errors: IntCounter,
    logs_shipped: IntCounter,
    log_ship_errors: IntCounter,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            events_seen: register_int_counter!(
                "cronitor_agent_events_seen_total",
                "Kubernetes events received from the watch stream"
            )
            .expect("Failed to register events_seen_total"),

            events_discarded: register_int_counter_vec!(
                "cronitor_agent_events_discarded_total",
                "Events dropped by the filtering ladder, by gate",
                &["reason"]
            )
            .expect("Failed to register events_discarded_total"),

            pings_sent: register_int_counter!(
                "cronitor_agent_pings_sent_total",
                "Telemetry pings delivered to Cronitor"
            )
            .expect("Failed to register pings_sent_total"),

            ping_errors: register_int_counter!(
                "cronitor_agent_ping_errors_total",
                "Telemetry pings that failed to send"
            )
            .expect("Failed to register ping_errors_total"),

            monitors_tracked: register_int_gauge!(
                "cronitor_agent_monitors_tracked",
                "CronJobs currently tracked by the collection"
            )
            .expect("Failed to register monitors_tracked"),

            monitor_sync_errors: register_int_counter!(
                "cronitor_agent_monitor_sync_errors_total",
                "Monitor upserts rejected or unreachable"
            )
            .expect("Failed to register monitor_sync_errors_total"),

            logs_shipped: register_int_counter!(
                "cronitor_agent_logs_shipped_total",
                "Log payloads uploaded for terminal events"
            )
            .expect("Failed to register logs_shipped_total"),

            log_ship_errors: register_int_counter!(
                "cronitor_agent_log_ship_errors_total",
                "Log uploads that failed"
            )
            .expect("Failed to register log_ship_errors_total"),
        }
    }
}

/// Lightweight handle to the global metrics instance. Multiple clones
/// share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &'static AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn inc_event_seen(&self) {
        self.inner().events_seen.inc();
    }

    pub fn inc_event_discarded(&self, reason: &str) {
        self.inner()
            .events_discarded
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_ping_sent(&self) {
        self.inner().pings_sent.inc();
    }

    pub fn inc_ping_error(&self) {
        self.inner().ping_errors.inc();
    }

    pub fn set_monitors_tracked(&self, count: usize) {
        self.inner().monitors_tracked.set(count as i64);
    }

    pub fn inc_monitor_sync_error(&self) {
        self.inner().monitor_sync_errors.inc();
    }

    pub fn inc_logs_shipped(&self) {
        self.inner().logs_shipped.inc();
    }

    pub fn inc_log_ship_error(&self) {
        self.inner().log_ship_errors.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_once() {
        let first = AgentMetrics::new();
        let second = AgentMetrics::new();
        first.inc_event_seen();
        second.inc_event_seen();
        first.set_monitors_tracked(3);
        assert_eq!(first.inner().monitors_tracked.get(), 3);
        assert!(first.inner().events_seen.get() >= 2);
    }
}
