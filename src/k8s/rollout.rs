use error_stack::Report;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::DeploymentCondition;
use k8s_openapi::api::apps::v1::DeploymentStatus;
use kube::runtime::watcher::watcher;
use kube::runtime::watcher::Config;
use kube::runtime::WatchStreamExt;
use kube::Api;
use kube::Client;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::k8s::types::KubernetesError;
use crate::k8s::types::RolloutProgress;

/// Condition type the deployment controller reports rollout progress under.
const PROGRESSING_CONDITION: &str = "Progressing";

/// Reason the controller sets on that condition when it gave up.
const TIMED_OUT_REASON: &str = "ProgressDeadlineExceeded";

/// Interpret a deployment's status into a progress line, the way
/// `kubectl rollout status` reports it. Absent numeric fields read as zero.
///
/// # Errors
///
/// - [`KubernetesError::ProgressDeadlineExceeded`] when the controller gave
///   up on the rollout
pub(crate) fn rollout_progress(
    deployment: &Deployment,
) -> Result<RolloutProgress, Report<KubernetesError>> {
    let name = deployment.metadata.name.as_deref().unwrap_or_default();
    let generation = deployment.metadata.generation.unwrap_or(0);
    let default_status = DeploymentStatus::default();
    let status = deployment.status.as_ref().unwrap_or(&default_status);
    let observed_generation = status.observed_generation.unwrap_or(0);

    if generation > observed_generation {
        return Ok(RolloutProgress {
            message: "Waiting for deployment spec update to be observed...".to_string(),
            done: false,
        });
    }

    if let Some(condition) = progressing_condition(status) {
        if condition.reason.as_deref() == Some(TIMED_OUT_REASON) {
            return Err(Report::new(KubernetesError::ProgressDeadlineExceeded {
                name: name.to_string(),
            }));
        }
    }

    let updated = status.updated_replicas.unwrap_or(0);
    let total = status.replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);
    let desired = deployment.spec.as_ref().and_then(|spec| spec.replicas);

    if let Some(desired) = desired {
        if updated < desired {
            return Ok(RolloutProgress {
                message: format!(
                    "Waiting for deployment {name:?} rollout to finish: {updated} out of {desired} new replicas have been updated..."
                ),
                done: false,
            });
        }
    }

    if total > updated {
        return Ok(RolloutProgress {
            message: format!(
                "Waiting for deployment {name:?} rollout to finish: {} old replicas are pending termination...",
                total - updated
            ),
            done: false,
        });
    }

    if available < updated {
        return Ok(RolloutProgress {
            message: format!(
                "Waiting for deployment {name:?} rollout to finish: {available} of {updated} updated replicas are available..."
            ),
            done: false,
        });
    }

    Ok(RolloutProgress {
        message: format!("deployment {name:?} successfully rolled over"),
        done: true,
    })
}

fn progressing_condition(status: &DeploymentStatus) -> Option<&DeploymentCondition> {
    status
        .conditions
        .as_ref()?
        .iter()
        .find(|condition| condition.type_ == PROGRESSING_CONDITION)
}

/// Suppresses consecutive duplicate progress lines.
pub(crate) struct StatusPrinter {
    last: Option<String>,
}

impl StatusPrinter {
    pub(crate) fn new() -> Self {
        Self { last: None }
    }

    /// Returns the line to print when it differs from the previous one.
    pub(crate) fn observe(&mut self, progress: &RolloutProgress) -> Option<String> {
        if self.last.as_deref() == Some(progress.message.as_str()) {
            return None;
        }
        self.last = Some(progress.message.clone());
        self.last.clone()
    }
}

/// Follows a single deployment until its rollout completes or fails.
pub(crate) struct RolloutWatcher {
    api: Api<Deployment>,
    name: String,
}

impl RolloutWatcher {
    pub(crate) fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
        }
    }

    /// Re-evaluate the rollout on every applied watch event, printing each
    /// distinct progress line, until the rollout settles or the token is
    /// cancelled.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::WatchFailed`] if the watch stream fails or ends
    /// - [`KubernetesError::ProgressDeadlineExceeded`] if the controller gave up
    /// - [`KubernetesError::Interrupted`] when cancelled by a signal
    #[tracing::instrument(skip(self, printer, cancellation_token), fields(deployment = %self.name))]
    pub(crate) async fn run(
        &self,
        printer: &mut StatusPrinter,
        cancellation_token: CancellationToken,
    ) -> Result<(), Report<KubernetesError>> {
        info!("Starting rollout watch");

        let config = Config::default().fields(&format!("metadata.name={}", self.name));
        let mut stream = watcher(self.api.clone(), config).applied_objects().boxed();

        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!("Rollout watch cancelled");
                    return Err(Report::new(KubernetesError::Interrupted));
                }
                event = stream.next() => {
                    let deployment = match event {
                        Some(Ok(deployment)) => deployment,
                        Some(Err(err)) => {
                            return Err(Report::new(err).change_context(
                                KubernetesError::WatchFailed {
                                    message: format!(
                                        "watch stream error for deployment {}",
                                        self.name
                                    ),
                                },
                            ));
                        }
                        None => {
                            return Err(Report::new(KubernetesError::WatchFailed {
                                message: "watch stream ended unexpectedly".to_string(),
                            }));
                        }
                    };

                    let progress = rollout_progress(&deployment)?;
                    if let Some(line) = printer.observe(&progress) {
                        println!("{line}");
                    }
                    if progress.done {
                        info!("Rollout complete");
                        return Ok(());
                    }
                }
            }
        }
    }
}
