//! Kubernetes API access for the collector.
//!
//! The [`OrchestratorClient`] trait is the seam the collection and the
//! event pipeline read the cluster through; [`KubeOrchestrator`] is the
//! kube-rs implementation. It also owns the choice between the two batch
//! API versions the cluster may serve for CronJobs.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::batch::v1beta1;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::api::{Api, ListParams, LogParams};
use kube::Client;

use crate::errors::{AgentError, Result};
use crate::normalizer;

/// Which CronJob resource version the server should be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchApiVersion {
    V1,
    V1beta1,
}

/// Extracts the leading digits of a version component, tolerating the
/// suffixes real apiservers report, like `25+` or `19.alpha-2`.
fn parse_version_component(raw: &str) -> Option<u64> {
    let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// `batch/v1` for server 1.24 and above, `batch/v1beta1` below.
pub fn preferred_batch_api_version(info: &Info) -> Result<BatchApiVersion> {
    let major = parse_version_component(&info.major);
    let minor = parse_version_component(&info.minor);
    match (major, minor) {
        (Some(major), Some(minor)) => {
            if (major, minor) >= (1, 24) {
                Ok(BatchApiVersion::V1)
            } else {
                Ok(BatchApiVersion::V1beta1)
            }
        }
        _ => Err(AgentError::VersionUnsupported {
            version: format!("{}.{}", info.major, info.minor),
        }),
    }
}

/// Typed reads against the cluster, as the core consumes them.
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job>;

    /// Pods spawned by a job, matched by the `job-name` label.
    async fn pods_for_job(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>>;

    /// Full log text of a pod, drained to a string.
    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String>;

    /// All CronJobs in scope, normalized to the `batch/v1` shape.
    async fn list_cron_jobs(&self, namespace: Option<&str>) -> Result<Vec<CronJob>>;
}

/// kube-rs backed orchestrator client.
pub struct KubeOrchestrator {
    client: Client,
    batch_api: BatchApiVersion,
}

impl KubeOrchestrator {
    /// Queries the apiserver version to pick the CronJob resource version.
    pub async fn new(client: Client) -> Result<Self> {
        let info = client.apiserver_version().await?;
        let batch_api = preferred_batch_api_version(&info)?;
        Ok(Self { client, batch_api })
    }

    pub fn batch_api_version(&self) -> BatchApiVersion {
        self.batch_api
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

#[async_trait]
impl OrchestratorClient for KubeOrchestrator {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.get(name).await.map_err(|err| {
            if is_not_found(&err) {
                AgentError::PodNotFound {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    source: err,
                }
            } else {
                err.into()
            }
        })
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        jobs.get(name).await.map_err(|err| {
            if is_not_found(&err) {
                AgentError::JobNotFound {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    source: err,
                }
            } else {
                err.into()
            }
        })
    }

    async fn pods_for_job(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("job-name={job_name}"));
        let list = pods.list(&params).await?;
        Ok(list.items)
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let logs = pods.logs(name, &LogParams::default()).await?;
        Ok(logs)
    }

    async fn list_cron_jobs(&self, namespace: Option<&str>) -> Result<Vec<CronJob>> {
        match self.batch_api {
            BatchApiVersion::V1 => {
                let api: Api<CronJob> = match namespace {
                    Some(ns) => Api::namespaced(self.client.clone(), ns),
                    None => Api::all(self.client.clone()),
                };
                Ok(api.list(&ListParams::default()).await?.items)
            }
            BatchApiVersion::V1beta1 => {
                let api: Api<v1beta1::CronJob> = match namespace {
                    Some(ns) => Api::namespaced(self.client.clone(), ns),
                    None => Api::all(self.client.clone()),
                };
                let list = api.list(&ListParams::default()).await?;
                Ok(list
                    .items
                    .into_iter()
                    .map(normalizer::cronjob_v1beta1_to_v1)
                    .collect())
            }
        }
    }
}
