//! The authoritative set of watched CronJobs.
//!
//! Keyed by Kubernetes UID. A CronJob is only ever inserted after its
//! monitor has been upserted successfully, so every tracked UID is known
//! to exist in Cronitor.

use std::collections::HashMap;
use std::sync::Arc;

use k8s_openapi::api::batch::v1::CronJob;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::annotations::{CronitorConfigParser, ProcessEnv};
use crate::api::{CronitorApi, MonitorDescriptor};
use crate::collector::kube::OrchestratorClient;
use crate::errors::Result;
use crate::observability::AgentMetrics;

pub struct CronJobCollection {
    api: Arc<dyn CronitorApi>,
    env: ProcessEnv,
    cronjobs: RwLock<HashMap<String, CronJob>>,
    metrics: AgentMetrics,
}

fn uid_of(cronjob: &CronJob) -> String {
    cronjob.metadata.uid.clone().unwrap_or_default()
}

impl CronJobCollection {
    pub fn new(api: Arc<dyn CronitorApi>, env: ProcessEnv) -> Self {
        Self {
            api,
            env,
            cronjobs: RwLock::new(HashMap::new()),
            metrics: AgentMetrics::new(),
        }
    }

    pub fn process_env(&self) -> &ProcessEnv {
        &self.env
    }

    /// Upserts the CronJob's monitor and starts tracking it. On upsert
    /// failure the CronJob is NOT tracked and the error propagates.
    pub async fn add(&self, cronjob: CronJob) -> Result<()> {
        let config = CronitorConfigParser::new(&cronjob, &self.env).resolve()?;
        let descriptor = MonitorDescriptor::from_cronjob(&cronjob, &config);
        self.api.put_monitors(&[descriptor]).await?;

        let uid = uid_of(&cronjob);
        info!(
            namespace = cronjob.metadata.namespace.as_deref().unwrap_or(""),
            name = cronjob.metadata.name.as_deref().unwrap_or(""),
            uid = %uid,
            "cronjob added to Cronitor"
        );

        let mut cronjobs = self.cronjobs.write().await;
        cronjobs.insert(uid, cronjob);
        self.metrics.set_monitors_tracked(cronjobs.len());
        Ok(())
    }

    /// Stops tracking locally. The monitor stays in Cronitor.
    pub async fn remove(&self, cronjob: &CronJob) {
        let mut cronjobs = self.cronjobs.write().await;
        cronjobs.remove(&uid_of(cronjob));
        self.metrics.set_monitors_tracked(cronjobs.len());
        info!(
            namespace = cronjob.metadata.namespace.as_deref().unwrap_or(""),
            name = cronjob.metadata.name.as_deref().unwrap_or(""),
            "cronjob no longer watched (still present in Cronitor)"
        );
    }

    pub async fn is_tracked(&self, uid: &str) -> bool {
        self.cronjobs.read().await.contains_key(uid)
    }

    pub async fn get(&self, uid: &str) -> Option<CronJob> {
        self.cronjobs.read().await.get(uid).cloned()
    }

    pub async fn uids(&self) -> Vec<String> {
        self.cronjobs.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.cronjobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cronjobs.read().await.is_empty()
    }

    /// Lists every CronJob in scope and registers the included ones with
    /// Cronitor in a single batch upsert. Failure leaves the collection
    /// empty and is fatal for startup.
    pub async fn load_all(
        &self,
        orchestrator: &dyn OrchestratorClient,
        namespace: Option<&str>,
    ) -> Result<usize> {
        let discovered = orchestrator.list_cron_jobs(namespace).await?;
        let discovered_count = discovered.len();

        let mut included = Vec::new();
        for cronjob in discovered {
            match CronitorConfigParser::new(&cronjob, &self.env).resolve() {
                Ok(config) if config.included => included.push((cronjob, config)),
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        namespace = cronjob.metadata.namespace.as_deref().unwrap_or(""),
                        name = cronjob.metadata.name.as_deref().unwrap_or(""),
                        error = %err,
                        "skipping cronjob with invalid annotations"
                    );
                }
            }
        }

        if !included.is_empty() {
            let descriptors: Vec<MonitorDescriptor> = included
                .iter()
                .map(|(cronjob, config)| MonitorDescriptor::from_cronjob(cronjob, config))
                .collect();
            self.api.put_monitors(&descriptors).await?;
        }

        let mut cronjobs = self.cronjobs.write().await;
        for (cronjob, _) in included {
            cronjobs.insert(uid_of(&cronjob), cronjob);
        }
        self.metrics.set_monitors_tracked(cronjobs.len());

        info!(
            discovered = discovered_count,
            included = cronjobs.len(),
            "existing CronJobs have loaded"
        );
        Ok(cronjobs.len())
    }
}
