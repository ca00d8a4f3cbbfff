use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;

use crate::k8s::types::KubernetesError;

/// Build a Kubernetes client.
///
/// An explicit kubeconfig path wins over the default loading chain; the
/// context override selects a non-current context in either case.
///
/// # Errors
///
/// - [`KubernetesError::ConnectionFailed`] if the kubeconfig cannot be
///   read or the client cannot be constructed from it
pub(crate) async fn init_kube_client(
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
) -> Result<Client, Report<KubernetesError>> {
    let options = KubeConfigOptions {
        context,
        ..KubeConfigOptions::default()
    };

    let client = match kubeconfig {
        Some(kubeconfig_path) => {
            // Load kubeconfig from the specified file
            let kubeconfig = Kubeconfig::read_from(&kubeconfig_path).change_context(
                KubernetesError::ConnectionFailed {
                    message: format!(
                        "failed to read kubeconfig file: {}",
                        kubeconfig_path.display()
                    ),
                },
            )?;

            let config = Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .change_context(KubernetesError::ConnectionFailed {
                    message: format!(
                        "failed to create config from kubeconfig: {}",
                        kubeconfig_path.display()
                    ),
                })?;

            Client::try_from(config).change_context(KubernetesError::ConnectionFailed {
                message: "failed to create Kubernetes client from custom kubeconfig".to_string(),
            })?
        }
        None if options.context.is_some() => {
            let config = Config::from_kubeconfig(&options).await.change_context(
                KubernetesError::ConnectionFailed {
                    message: format!(
                        "failed to load kubeconfig for context {:?}",
                        options.context.as_deref().unwrap_or_default()
                    ),
                },
            )?;

            Client::try_from(config).change_context(KubernetesError::ConnectionFailed {
                message: "failed to create Kubernetes client".to_string(),
            })?
        }
        None => {
            // Use default configuration (in-cluster or ~/.kube/config)
            Client::try_default()
                .await
                .change_context(KubernetesError::ConnectionFailed {
                    message: "failed to create Kubernetes client".to_string(),
                })?
        }
    };

    Ok(client)
}
