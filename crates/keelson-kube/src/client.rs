//! Kubernetes client construction

use kube::config::KubeConfigOptions;
use kube::{Client, Config};

use crate::error::{KubeError, Result};

/// Build a client from the kubeconfig, selecting `context` when given
///
/// Without a context the configuration is inferred: the local kubeconfig's
/// current context first, then the in-cluster service account.
pub async fn default_client(context: Option<&str>) -> Result<Client> {
    let config = match context.filter(|c| !c.is_empty()) {
        Some(context) => {
            tracing::debug!(context, "loading kubeconfig context");
            let options = KubeConfigOptions {
                context: Some(context.to_string()),
                ..Default::default()
            };
            Config::from_kubeconfig(&options)
                .await
                .map_err(|e| KubeError::InvalidConfig(format!("kubeconfig context {context}: {e}")))?
        }
        None => Config::infer()
            .await
            .map_err(|e| KubeError::InvalidConfig(e.to_string()))?,
    };

    Ok(Client::try_from(config)?)
}
