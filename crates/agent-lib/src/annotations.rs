//! Annotation parsing for watched CronJobs.
//!
//! Everything Cronitor-specific that a user can express on a CronJob lives
//! in the `k8s.cronitor.io/` annotation keyspace. This module resolves
//! those annotations, together with the chart-provided process environment,
//! into a [`ResolvedConfig`]. Resolution is pure: no I/O, no caching, a
//! fresh result on every observation of the object.

use k8s_openapi::api::batch::v1::CronJob;
use sha1::{Digest, Sha1};

use crate::errors::{AgentError, Result};

/// Maximum length Cronitor accepts for monitor names and tags.
const MAX_NAME_LENGTH: usize = 100;

/// Annotation keys, preferred name first where a legacy alias exists.
pub mod keys {
    pub const INCLUDE: &str = "k8s.cronitor.io/include";
    pub const EXCLUDE: &str = "k8s.cronitor.io/exclude";
    pub const ENVIRONMENT: &str = "k8s.cronitor.io/env";
    pub const TAGS: &str = "k8s.cronitor.io/tags";
    pub const KEY: &str = "k8s.cronitor.io/key";
    pub const LEGACY_ID: &str = "k8s.cronitor.io/cronitor-id";
    pub const NAME: &str = "k8s.cronitor.io/name";
    pub const LEGACY_NAME: &str = "k8s.cronitor.io/cronitor-name";
    pub const GROUP: &str = "k8s.cronitor.io/group";
    pub const LEGACY_GROUP: &str = "k8s.cronitor.io/cronitor-group";
    pub const NOTIFY: &str = "k8s.cronitor.io/notify";
    pub const LEGACY_NOTIFY: &str = "k8s.cronitor.io/cronitor-notify";
    pub const GRACE_SECONDS: &str = "k8s.cronitor.io/grace-seconds";
    pub const LEGACY_GRACE_SECONDS: &str = "k8s.cronitor.io/cronitor-grace-seconds";
    pub const KEY_INFERENCE: &str = "k8s.cronitor.io/key-inference";
    pub const LEGACY_ID_INFERENCE: &str = "k8s.cronitor.io/id-inference";
    pub const NAME_PREFIX: &str = "k8s.cronitor.io/name-prefix";
    pub const LOG_COMPLETE_EVENT: &str = "k8s.cronitor.io/log-complete-event";
    pub const SEND_POD_START_EVENT: &str = "k8s.cronitor.io/send-pod-start-event";
    pub const NOTE: &str = "k8s.cronitor.io/note";
    pub const METRIC_DURATION: &str = "k8s.cronitor.io/metric.duration";
}

/// Process-wide inclusion default, from `DEFAULT_BEHAVIOR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultBehavior {
    #[default]
    Include,
    Exclude,
}

impl DefaultBehavior {
    /// Parses the `DEFAULT_BEHAVIOR` environment value. Empty means include.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "include" | "" => Ok(DefaultBehavior::Include),
            "exclude" => Ok(DefaultBehavior::Exclude),
            other => Err(AgentError::ConfigInvalid(format!(
                "invalid DEFAULT_BEHAVIOR value of \"{other}\" provided"
            ))),
        }
    }
}

/// Chart-provided settings read from the process environment once at
/// startup and passed to every resolution.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnv {
    pub default_behavior: DefaultBehavior,
    pub default_env: String,
    pub extra_tags: Vec<String>,
}

impl ProcessEnv {
    pub fn new(
        default_behavior: DefaultBehavior,
        default_env: impl Into<String>,
        extra_tags: Vec<String>,
    ) -> Self {
        Self {
            default_behavior,
            default_env: default_env.into(),
            extra_tags,
        }
    }
}

/// One parsed `metric.duration` rule expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationRule {
    /// `"<op> <number>"`, e.g. `"< 5"`
    pub value: String,
    /// `seconds` / `minutes` / `hours`, when the token carried a unit
    pub time_unit: Option<String>,
}

/// Everything the rest of the agent needs to know about one CronJob.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub included: bool,
    pub monitor_key: String,
    pub monitor_name: String,
    pub group: String,
    pub tags: Vec<String>,
    pub notify: Vec<String>,
    /// `-1` means unset and is omitted from the monitor payload
    pub grace_seconds: i64,
    pub timezone: Option<String>,
    pub environment: String,
    pub note: String,
    pub duration_rules: Vec<DurationRule>,
    pub log_complete_event: bool,
    pub send_pod_start_event: bool,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            included: false,
            monitor_key: String::new(),
            monitor_name: String::new(),
            group: String::new(),
            tags: Vec::new(),
            notify: Vec::new(),
            grace_seconds: -1,
            timezone: None,
            environment: String::new(),
            note: String::new(),
            duration_rules: Vec::new(),
            log_complete_event: false,
            send_pod_start_event: false,
        }
    }
}

/// Resolves a CronJob's annotations against the process environment.
pub struct CronitorConfigParser<'a> {
    cronjob: &'a CronJob,
    env: &'a ProcessEnv,
}

impl<'a> CronitorConfigParser<'a> {
    pub fn new(cronjob: &'a CronJob, env: &'a ProcessEnv) -> Self {
        Self { cronjob, env }
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.cronjob
            .metadata
            .annotations
            .as_ref()
            .and_then(|map| map.get(key))
            .map(String::as_str)
    }

    /// Preferred key wins over the legacy alias when both are present.
    fn annotation_with_alias(&self, preferred: &str, legacy: &str) -> Option<&str> {
        self.annotation(preferred)
            .filter(|v| !v.is_empty())
            .or_else(|| self.annotation(legacy).filter(|v| !v.is_empty()))
    }

    fn namespace(&self) -> &str {
        self.cronjob.metadata.namespace.as_deref().unwrap_or("")
    }

    fn name(&self) -> &str {
        self.cronjob.metadata.name.as_deref().unwrap_or("")
    }

    fn uid(&self) -> &str {
        self.cronjob.metadata.uid.as_deref().unwrap_or("")
    }

    pub fn included(&self) -> Result<bool> {
        match self.env.default_behavior {
            DefaultBehavior::Exclude => match self.annotation(keys::INCLUDE) {
                None => Ok(false),
                Some(raw) => parse_annotation_bool(keys::INCLUDE, raw),
            },
            DefaultBehavior::Include => match self.annotation(keys::EXCLUDE) {
                None => Ok(true),
                Some(raw) => Ok(!parse_annotation_bool(keys::EXCLUDE, raw)?),
            },
        }
    }

    pub fn environment(&self) -> String {
        match self.annotation(keys::ENVIRONMENT) {
            Some(env) if !env.is_empty() => env.to_string(),
            _ => self.env.default_env.clone(),
        }
    }

    fn specified_monitor_key(&self) -> Option<&str> {
        self.annotation_with_alias(keys::KEY, keys::LEGACY_ID)
    }

    /// The monitor key: an explicit annotation, a hash of the name when
    /// name-inference is requested, or the CronJob's Kubernetes UID.
    pub fn monitor_key(&self) -> String {
        if let Some(key) = self.specified_monitor_key() {
            return key.to_string();
        }

        let inference = self
            .annotation_with_alias(keys::KEY_INFERENCE, keys::LEGACY_ID_INFERENCE)
            .unwrap_or("k8s");
        match inference {
            "name" => hash_from_name(&self.monitor_name()),
            _ => self.uid().to_string(),
        }
    }

    fn specified_monitor_name(&self) -> Option<&str> {
        self.annotation_with_alias(keys::NAME, keys::LEGACY_NAME)
    }

    /// The monitor name, namespace-prefixed unless overridden.
    pub fn monitor_name(&self) -> String {
        let name = match self.specified_monitor_name() {
            Some(specified) => specified.to_string(),
            None => match self.annotation(keys::NAME_PREFIX).unwrap_or("namespace") {
                "namespace" | "" => format!("{}/{}", self.namespace(), self.name()),
                "none" => self.name().to_string(),
                prefix => format!("{}{}", prefix, self.name()),
            },
        };
        truncate_middle(&name, MAX_NAME_LENGTH)
    }

    /// Synthetic tags first, then chart-wide tags, then annotation tags.
    pub fn tags(&self) -> Vec<String> {
        let mut tags = vec![
            "kubernetes".to_string(),
            truncate_end(
                &format!("kubernetes-namespace:{}", self.namespace()),
                MAX_NAME_LENGTH,
            ),
        ];

        for value in &self.env.extra_tags {
            tags.push(truncate_end(value.trim(), MAX_NAME_LENGTH));
        }

        if let Some(list) = self.annotation(keys::TAGS).filter(|v| !v.is_empty()) {
            for value in list.split(',') {
                tags.push(truncate_end(value.trim(), MAX_NAME_LENGTH));
            }
        }

        tags
    }

    pub fn notify(&self) -> Vec<String> {
        match self.annotation_with_alias(keys::NOTIFY, keys::LEGACY_NOTIFY) {
            Some(list) => list.split(',').map(|v| v.trim().to_string()).collect(),
            None => Vec::new(),
        }
    }

    pub fn group(&self) -> String {
        self.annotation_with_alias(keys::GROUP, keys::LEGACY_GROUP)
            .unwrap_or("")
            .to_string()
    }

    pub fn note(&self) -> String {
        self.annotation(keys::NOTE).unwrap_or("").to_string()
    }

    /// Grace period in seconds, `-1` when absent or unparseable.
    pub fn grace_seconds(&self) -> i64 {
        self.annotation_with_alias(keys::GRACE_SECONDS, keys::LEGACY_GRACE_SECONDS)
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(-1)
    }

    /// Parses the `metric.duration` annotation into rule expressions.
    /// Tokens that fail structural validation are skipped.
    pub fn duration_rules(&self) -> Vec<DurationRule> {
        let Some(raw) = self.annotation(keys::METRIC_DURATION) else {
            return Vec::new();
        };

        raw.split(',').filter_map(parse_duration_rule).collect()
    }

    pub fn log_complete_event(&self) -> Result<bool> {
        match self.annotation(keys::LOG_COMPLETE_EVENT) {
            None => Ok(false),
            Some(raw) => parse_annotation_bool(keys::LOG_COMPLETE_EVENT, raw),
        }
    }

    pub fn send_pod_start_event(&self) -> Result<bool> {
        match self.annotation(keys::SEND_POD_START_EVENT) {
            None => Ok(false),
            Some(raw) => parse_annotation_bool(keys::SEND_POD_START_EVENT, raw),
        }
    }

    pub fn schedule(&self) -> String {
        self.cronjob
            .spec
            .as_ref()
            .map(|spec| spec.schedule.clone())
            .unwrap_or_default()
    }

    pub fn timezone(&self) -> Option<String> {
        self.cronjob
            .spec
            .as_ref()
            .and_then(|spec| spec.time_zone.clone())
    }

    /// Resolves the full configuration. Malformed boolean annotations
    /// surface as [`AgentError::ConfigInvalid`]; callers treat that as
    /// excluded.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        Ok(ResolvedConfig {
            included: self.included()?,
            monitor_key: self.monitor_key(),
            monitor_name: self.monitor_name(),
            group: self.group(),
            tags: self.tags(),
            notify: self.notify(),
            grace_seconds: self.grace_seconds(),
            timezone: self.timezone(),
            environment: self.environment(),
            note: self.note(),
            duration_rules: self.duration_rules(),
            log_complete_event: self.log_complete_event()?,
            send_pod_start_event: self.send_pod_start_event()?,
        })
    }
}

fn parse_annotation_bool(key: &str, raw: &str) -> Result<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        other => Err(AgentError::ConfigInvalid(format!(
            "annotation {key} has invalid boolean value \"{other}\""
        ))),
    }
}

fn parse_duration_rule(token: &str) -> Option<DurationRule> {
    let parts: Vec<&str> = token.split_whitespace().collect();
    let (op, number, unit) = match parts.as_slice() {
        [op, number] => (*op, *number, None),
        [op, number, unit] => (*op, *number, Some(*unit)),
        _ => return None,
    };

    if op != "<" && op != ">" {
        return None;
    }
    if number.parse::<f64>().is_err() {
        return None;
    }

    let time_unit = match unit {
        None => None,
        Some(raw) => Some(normalize_time_unit(raw)?),
    };

    Some(DurationRule {
        value: format!("{op} {number}"),
        time_unit,
    })
}

fn normalize_time_unit(raw: &str) -> Option<String> {
    match raw.to_ascii_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => Some("seconds".to_string()),
        "m" | "min" | "mins" | "minute" | "minutes" => Some("minutes".to_string()),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some("hours".to_string()),
        _ => None,
    }
}

fn hash_from_name(name: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(name.as_bytes());
    hex::encode(hasher.finalize())
}

/// Middle-ellipsis truncation, measured in code points.
fn truncate_middle(value: &str, max: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= max {
        return value.to_string();
    }
    let head = max / 2;
    let tail = max - head - 1;
    let mut out: String = chars[..head].iter().collect();
    out.push('…');
    out.extend(&chars[chars.len() - tail..]);
    out
}

/// Cut-with-ellipsis truncation, measured in code points.
fn truncate_end(value: &str, max: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= max {
        return value.to_string();
    }
    let mut out: String = chars[..max - 1].iter().collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn cronjob_with_annotations(annotations: &[(&str, &str)]) -> CronJob {
        let mut cronjob = CronJob::default();
        cronjob.metadata.name = Some("test-cronjob".to_string());
        cronjob.metadata.namespace = Some("default".to_string());
        cronjob.metadata.uid = Some("a4892036-090f-4019-8bd1-98bfe0a9034c".to_string());
        cronjob.metadata.annotations = Some(
            annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
        let mut spec = k8s_openapi::api::batch::v1::CronJobSpec::default();
        spec.schedule = "*/1 * * * *".to_string();
        cronjob.spec = Some(spec);
        cronjob
    }

    fn include_env() -> ProcessEnv {
        ProcessEnv::new(DefaultBehavior::Include, "", Vec::new())
    }

    #[test]
    fn default_behavior_parsing() {
        assert_eq!(DefaultBehavior::parse("").unwrap(), DefaultBehavior::Include);
        assert_eq!(
            DefaultBehavior::parse("include").unwrap(),
            DefaultBehavior::Include
        );
        assert_eq!(
            DefaultBehavior::parse("exclude").unwrap(),
            DefaultBehavior::Exclude
        );
        assert!(DefaultBehavior::parse("sometimes").is_err());
    }

    #[test]
    fn included_by_default() {
        let cronjob = cronjob_with_annotations(&[]);
        let env = include_env();
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert!(parser.included().unwrap());
    }

    #[test]
    fn exclude_annotation_overrides_include_default() {
        let cronjob = cronjob_with_annotations(&[(keys::EXCLUDE, "true")]);
        let env = include_env();
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert!(!parser.included().unwrap());

        let cronjob = cronjob_with_annotations(&[(keys::EXCLUDE, "false")]);
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert!(parser.included().unwrap());
    }

    #[test]
    fn include_annotation_overrides_exclude_default() {
        let env = ProcessEnv::new(DefaultBehavior::Exclude, "", Vec::new());

        let cronjob = cronjob_with_annotations(&[]);
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert!(!parser.included().unwrap());

        let cronjob = cronjob_with_annotations(&[(keys::INCLUDE, "true")]);
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert!(parser.included().unwrap());

        let cronjob = cronjob_with_annotations(&[(keys::INCLUDE, "false")]);
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert!(!parser.included().unwrap());
    }

    #[test]
    fn malformed_inclusion_annotation_is_an_error() {
        let cronjob = cronjob_with_annotations(&[(keys::EXCLUDE, "yes please")]);
        let env = include_env();
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert!(parser.included().is_err());
    }

    #[test]
    fn monitor_key_defaults_to_uid() {
        let cronjob = cronjob_with_annotations(&[]);
        let env = include_env();
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(parser.monitor_key(), "a4892036-090f-4019-8bd1-98bfe0a9034c");
    }

    #[test]
    fn monitor_key_prefers_annotation_over_legacy() {
        let cronjob = cronjob_with_annotations(&[
            (keys::KEY, "preferred-key"),
            (keys::LEGACY_ID, "legacy-key"),
        ]);
        let env = include_env();
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(parser.monitor_key(), "preferred-key");
    }

    #[test]
    fn legacy_id_annotation_still_works() {
        let cronjob = cronjob_with_annotations(&[(keys::LEGACY_ID, "legacy-key")]);
        let env = include_env();
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(parser.monitor_key(), "legacy-key");
    }

    #[test]
    fn name_inference_hashes_the_monitor_name() {
        let cronjob = cronjob_with_annotations(&[(keys::KEY_INFERENCE, "name")]);
        let env = include_env();
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(parser.monitor_key(), hash_from_name("default/test-cronjob"));
        // hex sha1 is always 40 chars
        assert_eq!(parser.monitor_key().len(), 40);
    }

    #[test]
    fn monitor_name_prefixes_namespace_by_default() {
        let cronjob = cronjob_with_annotations(&[]);
        let env = include_env();
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(parser.monitor_name(), "default/test-cronjob");
    }

    #[test]
    fn monitor_name_prefix_rules() {
        let env = include_env();

        let cronjob = cronjob_with_annotations(&[(keys::NAME_PREFIX, "none")]);
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(parser.monitor_name(), "test-cronjob");

        let cronjob = cronjob_with_annotations(&[(keys::NAME_PREFIX, "prod-")]);
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(parser.monitor_name(), "prod-test-cronjob");
    }

    #[test]
    fn specified_name_wins_over_prefix() {
        let cronjob = cronjob_with_annotations(&[
            (keys::NAME, "my-name"),
            (keys::NAME_PREFIX, "prod-"),
        ]);
        let env = include_env();
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(parser.monitor_name(), "my-name");
    }

    #[test]
    fn long_names_truncate_in_the_middle() {
        let long = "x".repeat(150);
        let cronjob = cronjob_with_annotations(&[(keys::NAME, &long)]);
        let env = include_env();
        let parser = CronitorConfigParser::new(&cronjob, &env);
        let name = parser.monitor_name();
        assert_eq!(name.chars().count(), 100);
        assert!(name.contains('…'));
        assert!(name.starts_with('x'));
        assert!(name.ends_with('x'));
    }

    #[test]
    fn tags_merge_env_and_annotation() {
        let cronjob = cronjob_with_annotations(&[(keys::TAGS, "from-anno, spaced ")]);
        let env = ProcessEnv::new(
            DefaultBehavior::Include,
            "",
            vec!["from-chart".to_string()],
        );
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(
            parser.tags(),
            vec![
                "kubernetes",
                "kubernetes-namespace:default",
                "from-chart",
                "from-anno",
                "spaced",
            ]
        );
    }

    #[test]
    fn environment_annotation_beats_default_env() {
        let env = ProcessEnv::new(DefaultBehavior::Include, "staging", Vec::new());

        let cronjob = cronjob_with_annotations(&[]);
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(parser.environment(), "staging");

        let cronjob = cronjob_with_annotations(&[(keys::ENVIRONMENT, "production")]);
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(parser.environment(), "production");
    }

    #[test]
    fn grace_seconds_sentinel() {
        let env = include_env();

        let cronjob = cronjob_with_annotations(&[]);
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(parser.grace_seconds(), -1);

        let cronjob = cronjob_with_annotations(&[(keys::GRACE_SECONDS, "0")]);
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(parser.grace_seconds(), 0);

        let cronjob = cronjob_with_annotations(&[(keys::GRACE_SECONDS, "sixty")]);
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(parser.grace_seconds(), -1);

        let cronjob = cronjob_with_annotations(&[(keys::LEGACY_GRACE_SECONDS, "30")]);
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(parser.grace_seconds(), 30);
    }

    #[test]
    fn duration_rules_parse_and_skip_invalid_tokens() {
        let cronjob = cronjob_with_annotations(&[(
            keys::METRIC_DURATION,
            "< 5 seconds, > 10, nonsense, <= 3, < abc",
        )]);
        let env = include_env();
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert_eq!(
            parser.duration_rules(),
            vec![
                DurationRule {
                    value: "< 5".to_string(),
                    time_unit: Some("seconds".to_string()),
                },
                DurationRule {
                    value: "> 10".to_string(),
                    time_unit: None,
                },
            ]
        );
    }

    #[test]
    fn event_flags_default_to_false() {
        let cronjob = cronjob_with_annotations(&[]);
        let env = include_env();
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert!(!parser.log_complete_event().unwrap());
        assert!(!parser.send_pod_start_event().unwrap());

        let cronjob = cronjob_with_annotations(&[
            (keys::LOG_COMPLETE_EVENT, "true"),
            (keys::SEND_POD_START_EVENT, "maybe"),
        ]);
        let parser = CronitorConfigParser::new(&cronjob, &env);
        assert!(parser.log_complete_event().unwrap());
        assert!(parser.send_pod_start_event().is_err());
    }

    #[test]
    fn resolve_produces_a_full_config() {
        let cronjob = cronjob_with_annotations(&[
            (keys::ENVIRONMENT, "production"),
            (keys::GROUP, "batch"),
            (keys::NOTIFY, "devops-slack, pagerduty"),
        ]);
        let env = include_env();
        let config = CronitorConfigParser::new(&cronjob, &env).resolve().unwrap();
        assert!(config.included);
        assert_eq!(config.monitor_key, "a4892036-090f-4019-8bd1-98bfe0a9034c");
        assert_eq!(config.monitor_name, "default/test-cronjob");
        assert_eq!(config.group, "batch");
        assert_eq!(config.notify, vec!["devops-slack", "pagerduty"]);
        assert_eq!(config.environment, "production");
        assert_eq!(config.grace_seconds, -1);
    }
}
