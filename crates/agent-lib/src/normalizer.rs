//! Projection of the legacy `batch/v1beta1` CronJob shape onto
//! `batch/v1`, so the rest of the agent only ever sees one shape.

use k8s_openapi::api::batch::{v1, v1beta1};

/// Copies the shared fields of a `v1beta1` CronJob into the `v1` shape.
///
/// The job template subtree is discarded: whenever Job information is
/// needed, the Job itself is fetched from the API server instead of being
/// reconstructed from the template.
pub fn cronjob_v1beta1_to_v1(old: v1beta1::CronJob) -> v1::CronJob {
    let spec = old.spec.map(|spec| v1::CronJobSpec {
        schedule: spec.schedule,
        time_zone: spec.time_zone,
        starting_deadline_seconds: spec.starting_deadline_seconds,
        concurrency_policy: spec.concurrency_policy,
        suspend: spec.suspend,
        job_template: v1::JobTemplateSpec::default(),
        successful_jobs_history_limit: spec.successful_jobs_history_limit,
        failed_jobs_history_limit: spec.failed_jobs_history_limit,
    });

    let status = old.status.map(|status| v1::CronJobStatus {
        active: status.active,
        last_schedule_time: status.last_schedule_time,
        last_successful_time: status.last_successful_time,
    });

    v1::CronJob {
        metadata: old.metadata,
        spec,
        status,
    }
}
