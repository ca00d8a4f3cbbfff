mod config;
mod k8s;
mod logging;

use clap::Parser;
use error_stack::Report;
use tokio_util::sync::CancellationToken;

use crate::config::Cli;
use crate::k8s::deployment::revision;
use crate::k8s::rollout::rollout_progress;
use crate::k8s::DeploymentClient;
use crate::k8s::KubernetesError;
use crate::k8s::RolloutWatcher;
use crate::k8s::StatusPrinter;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() {
    setup_global_hooks();

    let cli = Cli::parse();
    logging::init();

    if let Err(report) = run(cli).await {
        eprintln!("kuberoll: {report}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Report<KubernetesError>> {
    let client = k8s::init_kube_client(cli.kubeconfig, cli.context).await?;

    let deployments = DeploymentClient::new(client.clone(), &cli.namespace);

    let deployment = deployments.get(&cli.deployment).await?;
    println!(
        "deployment {:?} current generation: {}",
        cli.deployment,
        deployment.metadata.generation.unwrap_or(0)
    );

    let deployment = deployments.restart(&cli.deployment).await?;
    println!(
        "deployment {:?} new generation: {}",
        cli.deployment,
        deployment.metadata.generation.unwrap_or(0)
    );
    match revision(&deployment) {
        Ok(revision) => tracing::debug!("controller revision after restart: {revision}"),
        Err(report) => tracing::warn!("could not read controller revision: {report}"),
    }

    let mut printer = StatusPrinter::new();
    let progress = rollout_progress(&deployment)?;
    if let Some(line) = printer.observe(&progress) {
        println!("{line}");
    }
    if progress.done || cli.no_wait {
        return Ok(());
    }

    let cancellation_token = CancellationToken::new();
    spawn_signal_handler(cancellation_token.clone());

    RolloutWatcher::new(client, &cli.namespace, &cli.deployment)
        .run(&mut printer, cancellation_token)
        .await
}

/// Cancel the rollout watch on SIGINT/SIGTERM so the process can exit
/// cleanly instead of being killed mid-request.
fn spawn_signal_handler(cancellation_token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::signal;
            use tokio::signal::unix::SignalKind;

            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            let mut sigint =
                signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, stopping rollout watch");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, stopping rollout watch");
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
            tracing::info!("Received Ctrl+C, stopping rollout watch");
        }

        cancellation_token.cancel();
    });
}
