//! The event pipeline: consumes the cluster's event stream, filters out
//! stale and uninteresting events, walks pod→job→CronJob ownership
//! against the tracked collection, and dispatches telemetry pings
//! through a bounded worker pool.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use futures::TryStreamExt;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use regex::Regex;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};

use crate::annotations::{CronitorConfigParser, ProcessEnv, ResolvedConfig};
use crate::api::{
    is_dns_failure, job_reason_to_state, pod_reason_to_state, CronitorApi, TelemetryEvent,
    TelemetryState,
};
use crate::collector::collection::CronJobCollection;
use crate::collector::kube::OrchestratorClient;
use crate::errors::{AgentError, Result};
use crate::observability::AgentMetrics;

/// Default width of the worker pool.
const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Job,
    Pod,
}

pub struct EventPipelineConfig {
    /// Worker pool width; the sole backpressure lever
    pub workers: usize,
    /// Fetch and upload pod logs on terminal events
    pub ship_logs: bool,
    /// Only pods whose name matches participate
    pub pod_filter: Option<Regex>,
    /// One namespace, or cluster-wide when unset
    pub namespace: Option<String>,
}

impl Default for EventPipelineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            ship_logs: false,
            pod_filter: None,
            namespace: None,
        }
    }
}

/// Everything correlation resolves for one event.
struct Correlated {
    pod: Pod,
    job: Job,
    cronjob: CronJob,
}

pub struct EventPipeline {
    collection: Arc<CronJobCollection>,
    api: Arc<dyn CronitorApi>,
    orchestrator: Arc<dyn OrchestratorClient>,
    env: ProcessEnv,
    config: EventPipelineConfig,
    /// Epoch seconds of the most recent watch (re)start; events older
    /// than this are reconnect replays and are dropped.
    watch_start: AtomicI64,
    workers: Arc<Semaphore>,
    metrics: AgentMetrics,
}

impl EventPipeline {
    pub fn new(
        collection: Arc<CronJobCollection>,
        api: Arc<dyn CronitorApi>,
        orchestrator: Arc<dyn OrchestratorClient>,
        env: ProcessEnv,
        config: EventPipelineConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.workers));
        Self {
            collection,
            api,
            orchestrator,
            env,
            config,
            watch_start: AtomicI64::new(chrono::Utc::now().timestamp()),
            workers,
            metrics: AgentMetrics::new(),
        }
    }

    /// Consumes the cluster's event stream until shutdown or permanent
    /// stream failure.
    pub async fn run(self: Arc<Self>, client: Client, shutdown: broadcast::Receiver<()>) {
        let api: Api<Event> = match &self.config.namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        let stream = watcher(api, watcher::Config::default()).default_backoff();
        self.consume(stream, shutdown).await;
    }

    /// Stream-consumption loop, separated from [`run`] so tests can feed
    /// a synthetic stream.
    pub async fn consume<S>(self: Arc<Self>, stream: S, mut shutdown: broadcast::Receiver<()>)
    where
        S: futures::Stream<Item = std::result::Result<watcher::Event<Event>, watcher::Error>>,
    {
        info!(workers = self.config.workers, "the event pipeline is starting");
        self.watch_start
            .store(chrono::Utc::now().timestamp(), Ordering::SeqCst);

        futures::pin_mut!(stream);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("the event pipeline is stopping");
                    break;
                }
                item = stream.try_next() => match item {
                    Ok(Some(watcher::Event::Restarted(events))) => {
                        self.watch_start
                            .store(chrono::Utc::now().timestamp(), Ordering::SeqCst);
                        debug!(replayed = events.len(), "event watch (re)started");
                        for event in events {
                            Arc::clone(&self).dispatch(event).await;
                        }
                    }
                    Ok(Some(watcher::Event::Applied(event))) => {
                        Arc::clone(&self).dispatch(event).await
                    }
                    Ok(Some(watcher::Event::Deleted(_))) => {}
                    Ok(None) => {
                        warn!("the event watch stream ended");
                        break;
                    }
                    Err(err) => {
                        error!(error = %err, "the event watch stream failed");
                        break;
                    }
                }
            }
        }

        // Wait for in-flight workers before returning.
        let _drain = self.workers.acquire_many(self.config.workers as u32).await;
        info!("the event pipeline has drained");
    }

    /// Blocks on a worker slot, then processes the event concurrently.
    /// Saturation here is what paces the watch stream.
    async fn dispatch(self: Arc<Self>, event: Event) {
        let Ok(permit) = self.workers.clone().acquire_owned().await else {
            return;
        };
        tokio::spawn(async move {
            let _permit = permit;
            self.handle_event(event).await;
        });
    }

    async fn handle_event(&self, event: Event) {
        self.metrics.inc_event_seen();

        let kind = match event.involved_object.kind.as_deref() {
            Some("Job") => EventKind::Job,
            Some("Pod") => EventKind::Pod,
            _ => return,
        };
        let namespace = event
            .involved_object
            .namespace
            .clone()
            .unwrap_or_default();
        let name = event.involved_object.name.clone().unwrap_or_default();

        if kind == EventKind::Pod {
            if let Some(filter) = &self.config.pod_filter {
                if !filter.is_match(&name) {
                    self.metrics.inc_event_discarded("pod_filter");
                    debug!(namespace = %namespace, name = %name, "pod name did not match filter");
                    return;
                }
            }
        }

        let Some(stamp) = event.last_timestamp.as_ref().map(|t| t.0.timestamp()) else {
            debug!(namespace = %namespace, name = %name, "event without a last timestamp; discarded");
            return;
        };
        let watch_start = self.watch_start.load(Ordering::SeqCst);
        if stamp < watch_start {
            self.metrics.inc_event_discarded("stale");
            info!(
                namespace = %namespace,
                name = %name,
                event_timestamp = stamp,
                watch_started = watch_start,
                "discarding event from before the watch started"
            );
            return;
        }

        // Unmapped reasons are dropped before any API call is spent on
        // them: the cluster emits far more reasons than we translate.
        let reason = event.reason.as_deref().unwrap_or("");
        let state = match kind {
            EventKind::Job => job_reason_to_state(reason),
            EventKind::Pod => pod_reason_to_state(reason),
        };
        let Ok(state) = state else {
            self.metrics.inc_event_discarded("reason");
            return;
        };

        let correlated = match kind {
            EventKind::Job => self.correlate_job_event(&namespace, &name).await,
            EventKind::Pod => self.correlate_pod_event(&namespace, &name).await,
        };
        let correlated = match correlated {
            Ok(Some(correlated)) => correlated,
            Ok(None) => {
                self.metrics.inc_event_discarded("unwatched");
                return;
            }
            Err(err) if err.is_not_found() => {
                self.metrics.inc_event_discarded("not_found");
                debug!(
                    namespace = %namespace,
                    name = %name,
                    error = %err,
                    "related object not found, probably a stale event"
                );
                return;
            }
            Err(err) => {
                warn!(
                    namespace = %namespace,
                    name = %name,
                    error = %err,
                    "could not fetch objects related to event"
                );
                return;
            }
        };

        let config = match CronitorConfigParser::new(&correlated.cronjob, &self.env).resolve() {
            Ok(config) => config,
            Err(err) => {
                error!(
                    namespace = %namespace,
                    name = %name,
                    error = %err,
                    "could not resolve cronjob annotations for event"
                );
                return;
            }
        };

        // A Job's SuccessfulCreate already pinged `run` for this series;
        // the pod-level Started is opt-in.
        if kind == EventKind::Pod
            && state == TelemetryState::Run
            && !config.send_pod_start_event
        {
            self.metrics.inc_event_discarded("pod_start_suppressed");
            debug!(namespace = %namespace, name = %name, "pod start event suppressed");
            return;
        }

        info!(
            namespace = %namespace,
            name = %name,
            kind = ?kind,
            reason = %reason,
            message = event.message.as_deref().unwrap_or(""),
            "processing event"
        );

        let logs = if state.is_terminal() && self.config.ship_logs {
            self.fetch_logs(&correlated.pod).await
        } else {
            String::new()
        };

        let telemetry = self.build_telemetry(&event, state, stamp, &correlated, &config);
        if let Err(err) = self.api.send_telemetry(&telemetry).await {
            self.metrics.inc_ping_error();
            error!(
                namespace = %namespace,
                name = %name,
                series = %telemetry.series,
                error = %err,
                "failed to send telemetry ping"
            );
        } else {
            self.metrics.inc_ping_sent();
        }

        // The worker never waits on log shipping: presign and upload run
        // in their own task, after the state ping has gone out.
        if self.config.ship_logs && !logs.is_empty() {
            let api = Arc::clone(&self.api);
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                match api.ship_logs(&telemetry, &logs).await {
                    Ok(()) => metrics.inc_logs_shipped(),
                    Err(err) if is_dns_failure(&err) => {
                        debug!(series = %telemetry.series, error = %err, "log host not resolvable");
                    }
                    Err(err) => {
                        metrics.inc_log_ship_error();
                        error!(
                            series = %telemetry.series,
                            error = %err,
                            "unexpected error sending log data"
                        );
                    }
                }
            });
        }
    }

    /// Job event: one GET of the job, one LIST of its pods. The job's
    /// first owner reference must be a tracked CronJob.
    async fn correlate_job_event(
        &self,
        namespace: &str,
        job_name: &str,
    ) -> Result<Option<Correlated>> {
        let job = self.orchestrator.get_job(namespace, job_name).await?;
        let Some(cronjob) = self.tracked_owner(&job).await? else {
            return Ok(None);
        };

        let pods = self.orchestrator.pods_for_job(namespace, job_name).await?;
        let Some(pod) = pods.into_iter().next() else {
            debug!(namespace = %namespace, job = %job_name, "no pod matching job found");
            return Ok(None);
        };

        Ok(Some(Correlated { pod, job, cronjob }))
    }

    /// Pod event: one GET of the pod, one GET of its owning job. Same
    /// tracked-CronJob check.
    async fn correlate_pod_event(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<Option<Correlated>> {
        let pod = self.orchestrator.get_pod(namespace, pod_name).await?;

        let job_ref = pod
            .metadata
            .owner_references
            .iter()
            .flatten()
            .find(|reference| reference.kind == "Job");
        let Some(job_ref) = job_ref else {
            // Not owned by any job at all: not a CronJob pod, not an error.
            debug!(namespace = %namespace, name = %pod_name, "pod does not belong to a job; discarded");
            return Ok(None);
        };

        let job = self.orchestrator.get_job(namespace, &job_ref.name).await?;
        let Some(cronjob) = self.tracked_owner(&job).await? else {
            return Ok(None);
        };

        Ok(Some(Correlated { pod, job, cronjob }))
    }

    /// Resolves the job's first owner reference against the tracked set.
    async fn tracked_owner(&self, job: &Job) -> Result<Option<CronJob>> {
        let Some(owner) = job
            .metadata
            .owner_references
            .as_ref()
            .and_then(|references| references.first())
        else {
            return Ok(None);
        };
        if owner.kind != "CronJob" {
            return Err(AgentError::OwnerChainInvalid {
                expected: "CronJob",
                got: owner.kind.clone(),
            });
        }
        Ok(self.collection.get(&owner.uid).await)
    }

    /// Logs are best-effort: the pod may be gone, or logs simply absent.
    async fn fetch_logs(&self, pod: &Pod) -> String {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("");
        let name = pod.metadata.name.as_deref().unwrap_or("");
        match self.orchestrator.pod_logs(namespace, name).await {
            Ok(logs) => logs,
            Err(err) => {
                debug!(
                    namespace = %namespace,
                    name = %name,
                    error = %err,
                    "could not fetch pod logs"
                );
                String::new()
            }
        }
    }

    fn build_telemetry(
        &self,
        event: &Event,
        state: TelemetryState,
        stamp: i64,
        correlated: &Correlated,
        config: &ResolvedConfig,
    ) -> TelemetryEvent {
        let job_name = correlated.job.metadata.name.as_deref().unwrap_or("");

        // In log-complete mode the monitor must not be auto-closed by the
        // container exit, so completion is reported as a `logs` ping.
        let (state, message) = if config.log_complete_event && state == TelemetryState::Complete
        {
            (
                TelemetryState::Logs,
                format!("Job {job_name} is completed with status complete"),
            )
        } else {
            (state, event.message.clone().unwrap_or_default())
        };

        TelemetryEvent {
            monitor_key: config.monitor_key.clone(),
            state,
            message,
            series: correlated.job.metadata.uid.clone().unwrap_or_default(),
            exit_code: None,
            env: config.environment.clone(),
            host: correlated
                .pod
                .spec
                .as_ref()
                .and_then(|spec| spec.node_name.clone())
                .unwrap_or_default(),
            stamp: Some(stamp),
            metric: None,
        }
    }
}
