//! The controller loop: tracked CronJob collection, the CronJob watcher
//! that maintains it, the event pipeline that turns cluster events into
//! telemetry, and the Kubernetes client seam they all read through.

pub mod collection;
pub mod cronjob_watcher;
pub mod event_pipeline;
pub mod kube;

pub use collection::CronJobCollection;
pub use cronjob_watcher::CronJobWatcher;
pub use event_pipeline::{EventPipeline, EventPipelineConfig};
pub use kube::{
    preferred_batch_api_version, BatchApiVersion, KubeOrchestrator, OrchestratorClient,
};
