use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::PostParams;
use kube::Api;
use kube::Client;

use crate::k8s::types::KubernetesError;

/// Pod template annotation whose value forces a new rollout when changed.
const RESTART_ANNOTATION: &str = "date";

/// Revision counter maintained by the deployment controller.
const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

/// Bounds for retrying updates rejected with an optimistic-concurrency
/// conflict. Each retry starts over from a fresh read.
const CONFLICT_RETRIES: u32 = 5;
const CONFLICT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Typed access to the deployments of a single namespace.
pub(crate) struct DeploymentClient {
    api: Api<Deployment>,
    namespace: String,
}

impl DeploymentClient {
    pub(crate) fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }

    /// Fetch a deployment, normalizing the not-found case.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::DeploymentNotFound`] when the API server returns 404
    /// - [`KubernetesError::RequestFailed`] for any other API error
    pub(crate) async fn get(&self, name: &str) -> Result<Deployment, Report<KubernetesError>> {
        match self.api.get(name).await {
            Ok(deployment) => Ok(deployment),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                Err(Report::new(KubernetesError::DeploymentNotFound {
                    name: name.to_string(),
                    namespace: self.namespace.clone(),
                }))
            }
            Err(err) => Err(
                Report::new(err).change_context(KubernetesError::RequestFailed {
                    message: format!("failed to get deployment {name}"),
                }),
            ),
        }
    }

    /// Stamp a fresh restart annotation onto the pod template and write the
    /// deployment back, forcing the controller to roll new pods.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::RequestFailed`] when the update fails, including
    ///   conflict-retry exhaustion
    pub(crate) async fn restart(&self, name: &str) -> Result<Deployment, Report<KubernetesError>> {
        let mut attempt = 0;
        loop {
            let mut deployment = self.get(name).await?;
            stamp_restart_annotation(&mut deployment, &Utc::now().timestamp().to_string())?;

            match self
                .api
                .replace(name, &PostParams::default(), &deployment)
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(err) if is_conflict(&err) && attempt < CONFLICT_RETRIES => {
                    attempt += 1;
                    tracing::debug!("conflict updating deployment {name}, retry attempt {attempt}");
                    tokio::time::sleep(CONFLICT_RETRY_DELAY).await;
                }
                Err(err) => {
                    return Err(
                        Report::new(err).change_context(KubernetesError::RequestFailed {
                            message: format!("failed to update deployment {name}"),
                        }),
                    )
                }
            }
        }
    }
}

/// Parse the controller revision annotation. Missing reads as revision 0.
///
/// # Errors
///
/// - [`KubernetesError::AnnotationParseError`] if the value is not an integer
pub(crate) fn revision(deployment: &Deployment) -> Result<i64, Report<KubernetesError>> {
    let Some(value) = deployment
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(REVISION_ANNOTATION))
    else {
        return Ok(0);
    };

    value
        .parse::<i64>()
        .change_context(KubernetesError::AnnotationParseError {
            message: format!("invalid revision value: {value}"),
        })
}

/// Overwrite the restart annotation, initializing the template annotation
/// map when absent. Sibling annotations are preserved.
fn stamp_restart_annotation(
    deployment: &mut Deployment,
    stamp: &str,
) -> Result<(), Report<KubernetesError>> {
    let spec = deployment.spec.as_mut().ok_or_else(|| {
        Report::new(KubernetesError::RequestFailed {
            message: "deployment has no spec".to_string(),
        })
    })?;

    let metadata = spec.template.metadata.get_or_insert_with(Default::default);
    let annotations = metadata.annotations.get_or_insert_with(BTreeMap::new);
    annotations.insert(RESTART_ANNOTATION.to_string(), stamp.to_string());

    Ok(())
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409)
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn deployment_with_template_annotations(
        annotations: Option<BTreeMap<String, String>>,
    ) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        annotations,
                        ..Default::default()
                    }),
                    spec: None,
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    fn template_annotations(deployment: &Deployment) -> &BTreeMap<String, String> {
        deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .metadata
            .as_ref()
            .unwrap()
            .annotations
            .as_ref()
            .unwrap()
    }

    #[test]
    fn stamp_initializes_missing_annotation_map() {
        let mut deployment = deployment_with_template_annotations(None);

        stamp_restart_annotation(&mut deployment, "1700000000").unwrap();

        let annotations = template_annotations(&deployment);
        assert_eq!(
            annotations.get(RESTART_ANNOTATION),
            Some(&"1700000000".to_string())
        );
    }

    #[test]
    fn stamp_overwrites_previous_value_and_keeps_siblings() {
        let mut annotations = BTreeMap::new();
        annotations.insert(RESTART_ANNOTATION.to_string(), "1600000000".to_string());
        annotations.insert("team".to_string(), "payments".to_string());
        let mut deployment = deployment_with_template_annotations(Some(annotations));

        stamp_restart_annotation(&mut deployment, "1700000000").unwrap();

        let annotations = template_annotations(&deployment);
        assert_eq!(
            annotations.get(RESTART_ANNOTATION),
            Some(&"1700000000".to_string())
        );
        assert_eq!(annotations.get("team"), Some(&"payments".to_string()));
    }

    #[test]
    fn stamp_requires_a_spec() {
        let mut deployment = Deployment::default();
        assert!(stamp_restart_annotation(&mut deployment, "1700000000").is_err());
    }

    #[test]
    fn revision_defaults_to_zero() {
        assert_eq!(revision(&Deployment::default()).unwrap(), 0);
    }

    #[test]
    fn revision_parses_annotation() {
        let mut annotations = BTreeMap::new();
        annotations.insert(REVISION_ANNOTATION.to_string(), "7".to_string());
        let deployment = Deployment {
            metadata: ObjectMeta {
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(revision(&deployment).unwrap(), 7);
    }

    #[test]
    fn revision_rejects_garbage() {
        let mut annotations = BTreeMap::new();
        annotations.insert(REVISION_ANNOTATION.to_string(), "seven".to_string());
        let deployment = Deployment {
            metadata: ObjectMeta {
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(revision(&deployment).is_err());
    }
}
