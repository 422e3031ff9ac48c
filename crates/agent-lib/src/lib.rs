//! Core library for the cronitor-kubernetes agent.
//!
//! This crate provides the core functionality for:
//! - Resolving Cronitor configuration from CronJob annotations
//! - Syncing monitors to the Cronitor API (batch upsert)
//! - Watching CronJob lifecycle changes
//! - Translating cluster events into telemetry pings and shipped logs
//! - Health checks and observability

pub mod annotations;
pub mod api;
pub mod collector;
pub mod errors;
pub mod health;
pub mod normalizer;
pub mod observability;

pub use annotations::{
    CronitorConfigParser, DefaultBehavior, ProcessEnv, ResolvedConfig,
};
pub use api::{CronitorApi, CronitorClient, MonitorDescriptor, TelemetryEvent, TelemetryState};
pub use collector::{
    BatchApiVersion, CronJobCollection, CronJobWatcher, EventPipeline, EventPipelineConfig,
    KubeOrchestrator, OrchestratorClient,
};
pub use errors::{AgentError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use observability::AgentMetrics;
