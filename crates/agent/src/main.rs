//! cronitor-kubernetes - mirrors CronJob lifecycles into Cronitor.
//!
//! This binary runs inside the cluster, registers every watched CronJob
//! as a Cronitor monitor, and translates Job/Pod lifecycle events into
//! telemetry pings.

use std::sync::Arc;

use agent_lib::{
    health::components, ComponentHealth, CronJobCollection, CronJobWatcher, CronitorClient,
    EventPipeline, EventPipelineConfig, HealthRegistry,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*};

mod api;
mod config;

use crate::config::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = config::tracing_filter(&cli.log_level)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();

    let settings = config::EnvSettings::load()?;

    match cli.command {
        Command::Version => {
            println!("cronitor-kubernetes {}", config::version(&settings));
            Ok(())
        }
        Command::Agent(_) => run_agent(cli, settings).await,
    }
}

async fn run_agent(cli: Cli, settings: config::EnvSettings) -> Result<()> {
    let Command::Agent(args) = &cli.command else {
        unreachable!("run_agent is only called for the agent subcommand");
    };

    config::validate_api_key(&cli.apikey)?;
    let process_env = config::process_env(&settings)?;

    let pod_filter = args
        .pod_filter
        .as_deref()
        .filter(|pattern| !pattern.is_empty())
        .map(regex::Regex::new)
        .transpose()
        .context("invalid --pod-filter regular expression")?;

    let version = config::version(&settings);
    info!(version = %version, "starting cronitor-kubernetes agent");

    let cronitor = Arc::new(CronitorClient::new(
        cli.apikey.clone(),
        format!("cronitor-kubernetes/{version}"),
        cli.hostname_override.clone(),
        args.dryrun,
    )?);

    let client = if cli.kubeconfig.is_empty() {
        info!("no kubeconfig provided, defaulting to in-cluster...");
        kube::Client::try_default().await?
    } else {
        let kubeconfig = kube::config::Kubeconfig::read_from(&cli.kubeconfig)?;
        let kube_config = kube::Config::from_custom_kubeconfig(
            kubeconfig,
            &kube::config::KubeConfigOptions::default(),
        )
        .await?;
        kube::Client::try_from(kube_config)?
    };

    let orchestrator = Arc::new(
        agent_lib::KubeOrchestrator::new(client.clone())
            .await
            .context("could not determine the Kubernetes server version")?,
    );
    let namespace = (!args.namespace.is_empty()).then(|| args.namespace.clone());

    // Startup blocks on one batch upsert of every included CronJob;
    // failure here is fatal.
    let collection = Arc::new(CronJobCollection::new(cronitor.clone(), process_env.clone()));
    collection
        .load_all(orchestrator.as_ref(), namespace.as_deref())
        .await
        .map_err(|err| {
            anyhow!(
                "failed to sync cronjobs to Cronitor: {err} (if this persists, check that the \
                 API key is an SDK key, not a telemetry key)"
            )
        })?;

    let health = HealthRegistry::new();
    health.register(components::CRONJOB_WATCHER).await;
    health.register(components::EVENT_PIPELINE).await;
    health.register(components::CRONITOR_API).await;
    health.set_ready(true).await;

    let state = Arc::new(api::AppState::new(health.clone()));
    let api_handle = tokio::spawn(api::serve(args.health_port, state));

    let (shutdown_tx, _) = broadcast::channel(1);

    let watcher = CronJobWatcher::new(
        collection.clone(),
        client.clone(),
        namespace.clone(),
        orchestrator.batch_api_version(),
    );
    let mut watcher_handle = tokio::spawn(watcher.run(shutdown_tx.subscribe()));

    let pipeline = Arc::new(EventPipeline::new(
        collection.clone(),
        cronitor.clone(),
        orchestrator.clone(),
        process_env.clone(),
        EventPipelineConfig {
            ship_logs: args.ship_logs,
            pod_filter,
            namespace: namespace.clone(),
            ..Default::default()
        },
    ));
    let mut pipeline_handle = tokio::spawn(pipeline.run(client.clone(), shutdown_tx.subscribe()));

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt signal to exit");
        }
        _ = sigterm.recv() => {
            info!("received termination signal to exit");
        }
        _ = &mut watcher_handle => {
            health
                .set_health(
                    components::CRONJOB_WATCHER,
                    ComponentHealth::unhealthy("the CronJob watcher stopped unexpectedly"),
                )
                .await;
            bail!("the CronJob watcher stopped unexpectedly");
        }
        _ = &mut pipeline_handle => {
            health
                .set_health(
                    components::EVENT_PIPELINE,
                    ComponentHealth::unhealthy("the event pipeline stopped unexpectedly"),
                )
                .await;
            bail!("the event pipeline stopped unexpectedly");
        }
    }

    // Graceful exit: close the watches, drain in-flight workers.
    let _ = shutdown_tx.send(());
    let _ = watcher_handle.await;
    let _ = pipeline_handle.await;
    api_handle.abort();

    info!("shutdown complete");
    Ok(())
}
