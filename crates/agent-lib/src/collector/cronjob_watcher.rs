//! Watches CronJob add/update/delete activity and keeps the collection
//! in sync.

use std::sync::Arc;

use futures::TryStreamExt;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::batch::v1beta1;
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::annotations::CronitorConfigParser;
use crate::collector::collection::CronJobCollection;
use crate::collector::kube::BatchApiVersion;
use crate::normalizer;
use crate::observability::AgentMetrics;

pub struct CronJobWatcher {
    collection: Arc<CronJobCollection>,
    client: Client,
    namespace: Option<String>,
    batch_api: BatchApiVersion,
}

fn schedule_of(cronjob: &CronJob) -> Option<&str> {
    cronjob.spec.as_ref().map(|spec| spec.schedule.as_str())
}

fn timezone_of(cronjob: &CronJob) -> Option<&str> {
    cronjob
        .spec
        .as_ref()
        .and_then(|spec| spec.time_zone.as_deref())
}

fn included_or_false(collection: &CronJobCollection, cronjob: &CronJob) -> bool {
    match CronitorConfigParser::new(cronjob, collection.process_env()).included() {
        Ok(included) => included,
        Err(err) => {
            error!(
                namespace = cronjob.metadata.namespace.as_deref().unwrap_or(""),
                name = cronjob.metadata.name.as_deref().unwrap_or(""),
                error = %err,
                "could not resolve cronjob annotations; treating as excluded"
            );
            false
        }
    }
}

/// The watch stream does not distinguish adds from updates; tracked
/// membership does. The tracked snapshot is the "old" object for update
/// comparisons.
pub(crate) async fn on_applied(collection: &CronJobCollection, cronjob: CronJob) {
    let uid = cronjob.metadata.uid.clone().unwrap_or_default();
    match collection.get(&uid).await {
        Some(old) => on_update(collection, old, cronjob).await,
        None => on_add(collection, cronjob).await,
    }
}

pub(crate) async fn on_add(collection: &CronJobCollection, cronjob: CronJob) {
    if !included_or_false(collection, &cronjob) {
        return;
    }
    sync(collection, cronjob).await;
}

pub(crate) async fn on_update(collection: &CronJobCollection, old: CronJob, new: CronJob) {
    let was_included = included_or_false(collection, &old);
    let now_included = included_or_false(collection, &new);

    match (was_included, now_included) {
        (false, true) => sync(collection, new).await,
        (true, false) => collection.remove(&old).await,
        (true, true) => {
            // Only the fields Cronitor actually schedules on force a
            // re-sync; everything else is advisory.
            let changed = schedule_of(&old) != schedule_of(&new)
                || timezone_of(&old) != timezone_of(&new);
            if changed {
                sync(collection, new).await;
            } else {
                debug!(
                    uid = new.metadata.uid.as_deref().unwrap_or(""),
                    "cronjob update without schedule or timezone change; ignored"
                );
            }
        }
        (false, false) => {}
    }
}

pub(crate) async fn on_deleted(collection: &CronJobCollection, cronjob: CronJob) {
    if included_or_false(collection, &cronjob) {
        collection.remove(&cronjob).await;
    }
}

/// Steady-state upsert failure is logged and leaves the object
/// untracked; the watcher keeps running.
async fn sync(collection: &CronJobCollection, cronjob: CronJob) {
    let namespace = cronjob.metadata.namespace.clone().unwrap_or_default();
    let name = cronjob.metadata.name.clone().unwrap_or_default();
    let uid = cronjob.metadata.uid.clone().unwrap_or_default();
    if let Err(err) = collection.add(cronjob).await {
        AgentMetrics::new().inc_monitor_sync_error();
        error!(
            namespace = %namespace,
            name = %name,
            uid = %uid,
            error = %err,
            "error adding cronjob to Cronitor"
        );
    }
}

impl CronJobWatcher {
    pub fn new(
        collection: Arc<CronJobCollection>,
        client: Client,
        namespace: Option<String>,
        batch_api: BatchApiVersion,
    ) -> Self {
        Self {
            collection,
            client,
            namespace,
            batch_api,
        }
    }

    /// Runs until the shutdown signal fires or the watch stream fails
    /// permanently. Stream failure is logged and the task returns; the
    /// orchestrator restarts the pod.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) {
        info!("the CronJob watcher is starting");
        match self.batch_api {
            BatchApiVersion::V1 => {
                let api: Api<CronJob> = match &self.namespace {
                    Some(ns) => Api::namespaced(self.client.clone(), ns),
                    None => Api::all(self.client.clone()),
                };
                let stream = watcher(api, watcher::Config::default()).default_backoff();
                self.consume(stream, shutdown).await;
            }
            BatchApiVersion::V1beta1 => {
                let api: Api<v1beta1::CronJob> = match &self.namespace {
                    Some(ns) => Api::namespaced(self.client.clone(), ns),
                    None => Api::all(self.client.clone()),
                };
                let stream = watcher(api, watcher::Config::default())
                    .default_backoff()
                    .map_ok(|event| match event {
                        watcher::Event::Applied(cronjob) => {
                            watcher::Event::Applied(normalizer::cronjob_v1beta1_to_v1(cronjob))
                        }
                        watcher::Event::Deleted(cronjob) => {
                            watcher::Event::Deleted(normalizer::cronjob_v1beta1_to_v1(cronjob))
                        }
                        watcher::Event::Restarted(cronjobs) => watcher::Event::Restarted(
                            cronjobs
                                .into_iter()
                                .map(normalizer::cronjob_v1beta1_to_v1)
                                .collect(),
                        ),
                    });
                self.consume(stream, shutdown).await;
            }
        }
    }

    async fn consume<S>(&self, stream: S, mut shutdown: broadcast::Receiver<()>)
    where
        S: futures::Stream<Item = std::result::Result<watcher::Event<CronJob>, watcher::Error>>,
    {
        futures::pin_mut!(stream);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("the CronJob watcher is stopping");
                    return;
                }
                item = stream.try_next() => match item {
                    Ok(Some(event)) => self.handle(event).await,
                    Ok(None) => {
                        warn!("the CronJob watch stream ended");
                        return;
                    }
                    Err(err) => {
                        error!(error = %err, "the CronJob watch stream failed");
                        return;
                    }
                }
            }
        }
    }

    async fn handle(&self, event: watcher::Event<CronJob>) {
        match event {
            watcher::Event::Applied(cronjob) => on_applied(&self.collection, cronjob).await,
            watcher::Event::Deleted(cronjob) => on_deleted(&self.collection, cronjob).await,
            watcher::Event::Restarted(cronjobs) => {
                for cronjob in cronjobs {
                    on_applied(&self.collection, cronjob).await;
                }
            }
        }
    }
}
