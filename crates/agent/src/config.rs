//! Command-line and environment configuration.

use agent_lib::{DefaultBehavior, ProcessEnv};
use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

/// Kubernetes agent for Cronitor.io
#[derive(Parser)]
#[command(name = "cronitor-kubernetes")]
pub struct Cli {
    /// Path to a kubeconfig to use; in-cluster credentials when empty
    #[arg(long, global = true, default_value = "")]
    pub kubeconfig: String,

    /// Cronitor.io API key
    #[arg(long, global = true, env = "CRONITOR_API_KEY", default_value = "")]
    pub apikey: String,

    /// Minimum log level to print for the agent (DEBUG, INFO, WARN, ERROR)
    #[arg(long, global = true, default_value = "")]
    pub log_level: String,

    /// App hostname to use (mainly for testing)
    #[arg(long, global = true, hide = true)]
    pub hostname_override: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the configured agent version
    Version,
    /// Run the cronitor-kubernetes agent against a Kubernetes cluster
    Agent(AgentArgs),
}

#[derive(Args)]
pub struct AgentArgs {
    /// Dry run, do not actually send updates to Cronitor
    #[arg(long)]
    pub dryrun: bool,

    /// Collect and archive the logs from each CronJob run upon completion or failure
    #[arg(long, env = "CRONITOR_AGENT_SHIP_LOGS")]
    pub ship_logs: bool,

    /// Restrict the agent to a single namespace; cluster-wide when empty
    #[arg(long, default_value = "")]
    pub namespace: String,

    /// Only process events for pods whose name matches this regular expression
    #[arg(long, env = "CRONITOR_AGENT_POD_FILTER")]
    pub pod_filter: Option<String>,

    /// Port for the health and metrics listener
    #[arg(long, default_value_t = 8080)]
    pub health_port: u16,
}

/// Settings that only exist as environment variables, set by the Helm
/// chart rather than on the command line.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvSettings {
    #[serde(default)]
    pub default_behavior: String,
    #[serde(default)]
    pub default_env: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub app_version: String,
}

impl EnvSettings {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        Ok(settings.try_deserialize().unwrap_or_default())
    }
}

/// The agent's own version: `APP_VERSION` when the chart sets it, the
/// crate version otherwise.
pub fn version(settings: &EnvSettings) -> String {
    if settings.app_version.is_empty() {
        env!("CARGO_PKG_VERSION").to_string()
    } else {
        settings.app_version.clone()
    }
}

/// Builds the per-process environment passed into annotation resolution.
/// An unrecognized `DEFAULT_BEHAVIOR` is fatal here.
pub fn process_env(settings: &EnvSettings) -> Result<ProcessEnv> {
    let default_behavior = DefaultBehavior::parse(&settings.default_behavior)?;
    let extra_tags = settings
        .tags
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect();
    Ok(ProcessEnv::new(
        default_behavior,
        settings.default_env.clone(),
        extra_tags,
    ))
}

/// Rejects missing, placeholder, and structurally invalid API keys.
pub fn validate_api_key(apikey: &str) -> Result<()> {
    if apikey.is_empty() {
        bail!(
            "a valid api key is required. Provide via --apikey or the CRONITOR_API_KEY \
             environment variable"
        );
    }
    if apikey == "<api key>" {
        bail!(
            "a valid api key is required. You used the string '<api key>' as the api key, \
             which is invalid"
        );
    }
    let valid = regex::Regex::new(r"[\w0-9]+").expect("api key pattern");
    if !valid.is_match(apikey) {
        bail!(
            "you have provided an invalid API key. Cronitor API keys are comprised only of \
             number and letter characters"
        );
    }
    Ok(())
}

/// Case-sensitive log level mapping; empty defaults to INFO.
pub fn tracing_filter(log_level: &str) -> Result<tracing_subscriber::EnvFilter> {
    let level = match log_level {
        "" | "INFO" => "info",
        "DEBUG" => "debug",
        "WARN" => "warn",
        "ERROR" => "error",
        other => bail!("invalid log level: {other}"),
    };
    Ok(tracing_subscriber::EnvFilter::new(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_validation() {
        assert!(validate_api_key("").is_err());
        assert!(validate_api_key("<api key>").is_err());
        assert!(validate_api_key("!!!").is_err());
        assert!(validate_api_key("apikey123").is_ok());
    }

    #[test]
    fn log_levels_are_case_sensitive() {
        assert!(tracing_filter("").is_ok());
        assert!(tracing_filter("DEBUG").is_ok());
        assert!(tracing_filter("ERROR").is_ok());
        assert!(tracing_filter("debug").is_err());
        assert!(tracing_filter("TRACE").is_err());
    }

    #[test]
    fn process_env_splits_tags() {
        let settings = EnvSettings {
            default_behavior: "exclude".to_string(),
            default_env: "production".to_string(),
            tags: "team-a, team-b,,".to_string(),
            app_version: String::new(),
        };
        let env = process_env(&settings).unwrap();
        assert_eq!(env.default_behavior, DefaultBehavior::Exclude);
        assert_eq!(env.default_env, "production");
        assert_eq!(env.extra_tags, vec!["team-a", "team-b"]);
    }

    #[test]
    fn unknown_default_behavior_is_fatal() {
        let settings = EnvSettings {
            default_behavior: "sometimes".to_string(),
            ..Default::default()
        };
        assert!(process_env(&settings).is_err());
    }
}
