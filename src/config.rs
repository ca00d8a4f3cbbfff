use std::path::PathBuf;

use clap::Parser;

/// Trigger a rolling restart of a Kubernetes Deployment and wait for the
/// rollout to complete.
#[derive(Parser)]
#[command(name = "kuberoll", about, version)]
pub(crate) struct Cli {
    #[arg(
        short = 'n',
        long,
        env = "KUBEROLL_NAMESPACE",
        default_value = "default",
        help = "Namespace that hosts the deployment"
    )]
    pub namespace: String,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(long, help = "Kubeconfig context to use instead of the current one")]
    pub context: Option<String>,

    #[arg(
        short = 'W',
        long = "no-wait",
        help = "Do not wait for the rollout to finish"
    )]
    pub no_wait: bool,

    #[arg(value_name = "DEPLOYMENT", help = "Deployment to restart")]
    pub deployment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let cli = Cli::try_parse_from(["kuberoll", "web"]).unwrap();
        assert_eq!(cli.namespace, "default");
        assert_eq!(cli.deployment, "web");
        assert!(cli.context.is_none());
        assert!(!cli.no_wait);
    }

    #[test]
    fn parse_full_surface() {
        let cli = Cli::try_parse_from([
            "kuberoll",
            "-n",
            "staging",
            "--kubeconfig",
            "/tmp/kubeconfig",
            "--context",
            "prod",
            "-W",
            "web",
        ])
        .unwrap();

        assert_eq!(cli.namespace, "staging");
        assert_eq!(cli.kubeconfig, Some(PathBuf::from("/tmp/kubeconfig")));
        assert_eq!(cli.context.as_deref(), Some("prod"));
        assert!(cli.no_wait);
        assert_eq!(cli.deployment, "web");
    }

    #[test]
    fn deployment_name_is_required() {
        assert!(Cli::try_parse_from(["kuberoll"]).is_err());
    }

    #[test]
    fn no_wait_has_a_short_flag() {
        let cli = Cli::try_parse_from(["kuberoll", "--no-wait", "web"]).unwrap();
        assert!(cli.no_wait);
    }
}
