use thiserror::Error;

/// One evaluation of a deployment's rollout: a human readable progress
/// line and whether the rollout has settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RolloutProgress {
    pub message: String,
    pub done: bool,
}

/// Errors that can occur while driving a deployment rollout.
#[derive(Debug, Error)]
pub(crate) enum KubernetesError {
    #[error("failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[error("deployment {name} in namespace {namespace} not found")]
    DeploymentNotFound { name: String, namespace: String },
    #[error("request to Kubernetes API failed: {message}")]
    RequestFailed { message: String },
    #[error("failed to parse annotation: {message}")]
    AnnotationParseError { message: String },
    #[error("failed to watch deployment: {message}")]
    WatchFailed { message: String },
    #[error("deployment {name:?} exceeded its progress deadline")]
    ProgressDeadlineExceeded { name: String },
    #[error("rollout watch interrupted")]
    Interrupted,
}
