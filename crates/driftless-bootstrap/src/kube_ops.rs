//! The Kubernetes calls the installer makes, behind a trait so the install
//! sequence can run against an in-memory cluster.

use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use driftless_common::{DriftError, DriftResult};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Namespace, Node, Secret, Service},
};
use kube::{
    api::{ListParams, ObjectMeta, Patch, PatchParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Api, Client, Config,
};
use tracing::debug;

const FIELD_MANAGER: &str = "driftless";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    /// `(type, status)` pairs as reported by the node.
    pub conditions: Vec<(String, String)>,
}

impl NodeInfo {
    pub fn is_ready(&self) -> bool {
        self.conditions
            .iter()
            .any(|(kind, status)| kind == "Ready" && status == "True")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeploymentStatus {
    pub replicas: i32,
    pub ready_replicas: i32,
}

impl DeploymentStatus {
    pub fn is_ready(&self) -> bool {
        self.ready_replicas >= self.replicas
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecretSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub string_data: BTreeMap<String, String>,
}

#[async_trait]
pub trait KubeOps: Send + Sync {
    async fn list_nodes(&self) -> anyhow::Result<Vec<NodeInfo>>;

    async fn namespace_exists(&self, name: &str) -> anyhow::Result<bool>;

    async fn create_namespace(&self, name: &str) -> anyhow::Result<()>;

    /// `None` when the deployment does not exist yet.
    async fn deployment_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<DeploymentStatus>>;

    /// Creates or replaces the secret.
    async fn apply_secret(&self, namespace: &str, secret: &SecretSpec) -> anyhow::Result<()>;

    /// First load balancer ingress of a service, IP preferred over hostname.
    async fn service_ingress(&self, namespace: &str, name: &str) -> anyhow::Result<Option<String>>;
}

/// [`KubeOps`] over a `kube` client.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connects with the kubeconfig a provider returned.
    pub async fn from_kubeconfig(kubeconfig: &[u8]) -> DriftResult<Self> {
        let contents = std::str::from_utf8(kubeconfig)
            .map_err(|e| DriftError::validation("kubeconfig", format!("not utf-8: {e}")))?;
        let kubeconfig = Kubeconfig::from_yaml(contents)
            .map_err(|e| DriftError::validation("kubeconfig", e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| DriftError::validation("kubeconfig", e.to_string()))?;
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl KubeOps for KubeClient {
    async fn list_nodes(&self) -> anyhow::Result<Vec<NodeInfo>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .context("listing nodes")?;
        Ok(list
            .items
            .into_iter()
            .map(|node| NodeInfo {
                name: node.metadata.name.unwrap_or_default(),
                conditions: node
                    .status
                    .and_then(|s| s.conditions)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| (c.type_, c.status))
                    .collect(),
            })
            .collect())
    }

    async fn namespace_exists(&self, name: &str) -> anyhow::Result<bool> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        Ok(namespaces.get_opt(name).await?.is_some())
    }

    async fn create_namespace(&self, name: &str) -> anyhow::Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match namespaces.create(&PostParams::default(), &namespace).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                debug!(namespace = name, "namespace appeared concurrently");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("creating namespace {name}")),
        }
    }

    async fn deployment_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<DeploymentStatus>> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let Some(deployment) = deployments.get_opt(name).await? else {
            return Ok(None);
        };
        let replicas = deployment.spec.and_then(|s| s.replicas).unwrap_or(1);
        let ready_replicas = deployment
            .status
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        Ok(Some(DeploymentStatus {
            replicas,
            ready_replicas,
        }))
    }

    async fn apply_secret(&self, namespace: &str, secret: &SecretSpec) -> anyhow::Result<()> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let object = Secret {
            metadata: ObjectMeta {
                name: Some(secret.name.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(secret.labels.clone()),
                ..Default::default()
            },
            string_data: Some(secret.string_data.clone()),
            ..Default::default()
        };
        let params = PatchParams::apply(FIELD_MANAGER).force();
        secrets
            .patch(&secret.name, &params, &Patch::Apply(&object))
            .await
            .with_context(|| format!("applying secret {namespace}/{}", secret.name))?;
        Ok(())
    }

    async fn service_ingress(&self, namespace: &str, name: &str) -> anyhow::Result<Option<String>> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let Some(service) = services.get_opt(name).await? else {
            return Ok(None);
        };
        let ingress = service
            .status
            .and_then(|s| s.load_balancer)
            .and_then(|lb| lb.ingress)
            .unwrap_or_default();
        Ok(ingress
            .into_iter()
            .find_map(|i| i.ip.filter(|ip| !ip.is_empty()).or(i.hostname.filter(|h| !h.is_empty()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(conditions: &[(&str, &str)]) -> NodeInfo {
        NodeInfo {
            name: "ip-10-0-1-12".into(),
            conditions: conditions
                .iter()
                .map(|(k, s)| (k.to_string(), s.to_string()))
                .collect(),
        }
    }

    #[test]
    fn node_needs_a_true_ready_condition() {
        assert!(node(&[("MemoryPressure", "False"), ("Ready", "True")]).is_ready());
        assert!(!node(&[("Ready", "False")]).is_ready());
        assert!(!node(&[("Ready", "Unknown")]).is_ready());
        assert!(!node(&[]).is_ready());
    }

    #[test]
    fn deployment_ready_when_all_replicas_are() {
        let ready = |replicas, ready_replicas| {
            DeploymentStatus {
                replicas,
                ready_replicas,
            }
            .is_ready()
        };
        assert!(ready(2, 2));
        assert!(!ready(2, 1));
        assert!(ready(0, 0));
    }
}
