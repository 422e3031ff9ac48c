//! Conversion of a CronJob and its resolved configuration into the
//! monitor payload the Cronitor API accepts.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::CronJob;
use serde::Serialize;

use crate::annotations::ResolvedConfig;

/// One assertion rule attached to a monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub rule_type: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_unit: Option<String>,
}

/// The monitor object sent to the upsert endpoint. Field order matches
/// the serialized key order the API documents; unset optional fields are
/// omitted entirely.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorDescriptor {
    pub key: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub note: String,
    /// Serialized JSON map, not a nested object
    pub metadata: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub schedule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
}

impl MonitorDescriptor {
    /// Builds the monitor payload. Schedule and timezone come from the
    /// CronJob spec; everything else from the resolved configuration.
    pub fn from_cronjob(cronjob: &CronJob, config: &ResolvedConfig) -> Self {
        let spec = cronjob.spec.as_ref();

        let mut metadata = BTreeMap::new();
        if let Some(policy) = spec
            .and_then(|s| s.concurrency_policy.as_ref())
            .filter(|p| !p.is_empty())
        {
            metadata.insert("concurrencyPolicy", policy.clone());
        }
        if let Some(deadline) = spec.and_then(|s| s.starting_deadline_seconds) {
            metadata.insert("startingDeadlineSeconds", deadline.to_string());
        }

        MonitorDescriptor {
            key: config.monitor_key.clone(),
            name: config.monitor_name.clone(),
            note: config.note.clone(),
            metadata: serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string()),
            type_: "job".to_string(),
            schedule: spec.map(|s| s.schedule.clone()).unwrap_or_default(),
            timezone: spec.and_then(|s| s.time_zone.clone()),
            tags: config.tags.clone(),
            notify: config.notify.clone(),
            group: config.group.clone(),
            grace_seconds: (config.grace_seconds >= 0).then_some(config.grace_seconds),
            rules: config
                .duration_rules
                .iter()
                .map(|rule| Rule {
                    rule_type: "metric.duration".to_string(),
                    value: rule.value.clone(),
                    time_unit: rule.time_unit.clone(),
                })
                .collect(),
        }
    }
}
