//! In-memory cluster and package installer that record every mutation.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    helm::{HelmRelease, PackageInstaller},
    installer::CORE_DEPLOYMENTS,
    kube_ops::{DeploymentStatus, KubeOps, NodeInfo, SecretSpec},
};

#[derive(Default)]
struct ClusterState {
    nodes: Vec<NodeInfo>,
    namespaces: BTreeSet<String>,
    deployments: BTreeMap<(String, String), DeploymentStatus>,
    secrets: BTreeMap<(String, String), SecretSpec>,
    services: BTreeMap<(String, String), Option<String>>,
}

#[derive(Default)]
pub struct FakeKube {
    state: Mutex<ClusterState>,
    mutations: Mutex<Vec<String>>,
    failing: Mutex<Option<String>>,
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

impl FakeKube {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_node(&self, name: &str, ready: bool) {
        let status = if ready { "True" } else { "False" };
        self.state.lock().nodes.push(NodeInfo {
            name: name.to_string(),
            conditions: vec![("Ready".to_string(), status.to_string())],
        });
    }

    pub fn add_namespace(&self, name: &str) {
        self.state.lock().namespaces.insert(name.to_string());
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state.lock().namespaces.contains(name)
    }

    pub fn set_deployment(&self, namespace: &str, name: &str, status: DeploymentStatus) {
        self.state
            .lock()
            .deployments
            .insert(key(namespace, name), status);
    }

    pub fn set_service(&self, namespace: &str, name: &str, ingress: Option<&str>) {
        self.state
            .lock()
            .services
            .insert(key(namespace, name), ingress.map(str::to_string));
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<SecretSpec> {
        self.state.lock().secrets.get(&key(namespace, name)).cloned()
    }

    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().clone()
    }

    /// Operations whose name starts with `prefix` fail until [`FakeKube::heal`].
    pub fn fail_on(&self, prefix: &str) {
        *self.failing.lock() = Some(prefix.to_string());
    }

    pub fn heal(&self) {
        *self.failing.lock() = None;
    }

    fn check(&self, op: &str) -> anyhow::Result<()> {
        if matches!(&*self.failing.lock(), Some(prefix) if op.starts_with(prefix.as_str())) {
            bail!("injected failure: {op}");
        }
        Ok(())
    }

    fn mutate(&self, op: &str, target: &str) -> anyhow::Result<()> {
        self.mutations.lock().push(format!("{op} {target}"));
        self.check(op)
    }
}

#[async_trait]
impl KubeOps for FakeKube {
    async fn list_nodes(&self) -> anyhow::Result<Vec<NodeInfo>> {
        self.check("list_nodes")?;
        Ok(self.state.lock().nodes.clone())
    }

    async fn namespace_exists(&self, name: &str) -> anyhow::Result<bool> {
        self.check("namespace_exists")?;
        Ok(self.has_namespace(name))
    }

    async fn create_namespace(&self, name: &str) -> anyhow::Result<()> {
        self.mutate("create_namespace", name)?;
        self.add_namespace(name);
        Ok(())
    }

    async fn deployment_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<DeploymentStatus>> {
        self.check("deployment_status")?;
        Ok(self.state.lock().deployments.get(&key(namespace, name)).copied())
    }

    async fn apply_secret(&self, namespace: &str, secret: &SecretSpec) -> anyhow::Result<()> {
        self.mutate("apply_secret", &format!("{namespace}/{}", secret.name))?;
        self.state
            .lock()
            .secrets
            .insert(key(namespace, &secret.name), secret.clone());
        Ok(())
    }

    async fn service_ingress(&self, namespace: &str, name: &str) -> anyhow::Result<Option<String>> {
        self.check("service_ingress")?;
        Ok(self
            .state
            .lock()
            .services
            .get(&key(namespace, name))
            .cloned()
            .flatten())
    }
}

/// Records releases and brings the core deployments up in the paired
/// [`FakeKube`] the way the real chart would.
pub struct FakeHelm {
    kube: Arc<FakeKube>,
    releases: Mutex<Vec<HelmRelease>>,
    unready: Mutex<BTreeSet<String>>,
}

impl FakeHelm {
    pub fn new(kube: Arc<FakeKube>) -> Self {
        Self {
            kube,
            releases: Mutex::new(Vec::new()),
            unready: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn releases(&self) -> Vec<HelmRelease> {
        self.releases.lock().clone()
    }

    /// The named deployment is created but never reaches ready replicas.
    pub fn leave_unready(&self, deployment: &str) {
        self.unready.lock().insert(deployment.to_string());
    }
}

#[async_trait]
impl PackageInstaller for FakeHelm {
    async fn upgrade_install(&self, release: &HelmRelease) -> anyhow::Result<()> {
        if !self.kube.has_namespace(&release.namespace) {
            bail!("namespace {} not found", release.namespace);
        }
        self.releases.lock().push(release.clone());
        let unready = self.unready.lock().clone();
        for name in CORE_DEPLOYMENTS {
            let ready_replicas = if unready.contains(name) { 0 } else { 1 };
            self.kube.set_deployment(
                &release.namespace,
                name,
                DeploymentStatus {
                    replicas: 1,
                    ready_replicas,
                },
            );
        }
        Ok(())
    }
}
