//! Installs the GitOps controller (Argo CD) into a freshly reconciled cluster.
//!
//! The sequence is: a ready node, the namespace, the chart, the core
//! deployments. Any failure there aborts the install. Registry and repository
//! credentials come last and only degrade the report when they fail.

use std::{collections::BTreeMap, env};

use driftless_common::{
    poll_until,
    project::{GitOpsConfig, GitRepository},
    settings::PollSettings,
    DriftError, DriftResult, OpContext, ResourceKind, StepOutcome, UpstreamContext,
};
use tracing::{info, warn};

use crate::{
    helm::{HelmRelease, PackageInstaller},
    kube_ops::{KubeOps, SecretSpec},
};

pub const RELEASE_NAME: &str = "argocd";
pub const CHART: &str = "argo-cd";
pub const CHART_REPOSITORY: &str = "https://argoproj.github.io/argo-helm";

/// Deployments that must report ready replicas before the install counts as
/// done. The application controller runs as a stateful set and is not listed.
pub const CORE_DEPLOYMENTS: [&str; 4] = [
    "argocd-server",
    "argocd-repo-server",
    "argocd-redis",
    "argocd-applicationset-controller",
];

const SECRET_TYPE_LABEL: &str = "argocd.argoproj.io/secret-type";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstallReport {
    pub namespace: String,
    pub release: String,
    /// One entry per best-effort step that ran.
    pub best_effort: Vec<StepOutcome>,
}

impl InstallReport {
    pub fn is_degraded(&self) -> bool {
        self.best_effort.iter().any(StepOutcome::is_degraded)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.best_effort.iter().filter_map(StepOutcome::warning).collect()
    }
}

pub struct GitOpsInstaller<'a> {
    kube: &'a dyn KubeOps,
    packages: &'a dyn PackageInstaller,
    config: &'a GitOpsConfig,
    poll: PollSettings,
}

impl<'a> GitOpsInstaller<'a> {
    pub fn new(
        kube: &'a dyn KubeOps,
        packages: &'a dyn PackageInstaller,
        config: &'a GitOpsConfig,
        poll: PollSettings,
    ) -> Self {
        Self {
            kube,
            packages,
            config,
            poll,
        }
    }

    pub async fn install(&self, ctx: &OpContext) -> DriftResult<InstallReport> {
        let namespace = self.config.namespace.as_str();

        self.wait_for_ready_node(ctx).await?;
        self.ensure_namespace(ctx, namespace).await?;

        let release = HelmRelease {
            name: RELEASE_NAME.to_string(),
            chart: CHART.to_string(),
            repository: CHART_REPOSITORY.to_string(),
            version: self.config.chart_version.clone(),
            namespace: namespace.to_string(),
            values: Vec::new(),
        };
        ctx.track(ResourceKind::GitOpsController, "install", RELEASE_NAME, async {
            self.packages
                .upgrade_install(&release)
                .await
                .upstream(ResourceKind::GitOpsController, RELEASE_NAME, "helm upgrade --install")
        })
        .await?;

        self.wait_for_core_deployments(ctx, namespace).await?;

        let mut best_effort = Vec::new();
        if !self.config.public_registries.is_empty() {
            match self.apply_registry_secrets(ctx, namespace).await {
                Err(e) if e.is_cancelled() => return Err(e),
                result => best_effort.push(StepOutcome::best_effort("public registry access", result)),
            }
        }
        if let Some(repository) = &self.config.repository {
            match self.apply_repository_secret(ctx, namespace, repository).await {
                Err(e) if e.is_cancelled() => return Err(e),
                result => best_effort.push(StepOutcome::best_effort("git repository credentials", result)),
            }
        }

        let report = InstallReport {
            namespace: namespace.to_string(),
            release: RELEASE_NAME.to_string(),
            best_effort,
        };
        if report.is_degraded() {
            warn!(warnings = ?report.warnings(), "gitops controller installed with warnings");
        } else {
            info!(namespace, "gitops controller installed");
        }
        Ok(report)
    }

    async fn wait_for_ready_node(&self, ctx: &OpContext) -> DriftResult<()> {
        info!("waiting for a ready node");
        let kube = self.kube;
        poll_until(ctx, "a ready node", self.poll.node_ready(), move || async move {
            match kube.list_nodes().await {
                Ok(nodes) => nodes.iter().any(|n| n.is_ready()),
                Err(e) => {
                    warn!(error = %e, "listing nodes failed, retrying");
                    false
                }
            }
        })
        .await
    }

    async fn ensure_namespace(&self, ctx: &OpContext, namespace: &str) -> DriftResult<()> {
        let exists = self
            .kube
            .namespace_exists(namespace)
            .await
            .upstream(ResourceKind::Namespace, namespace, "get")?;
        if exists {
            return Ok(());
        }
        ctx.track(ResourceKind::Namespace, "create", namespace, async {
            self.kube
                .create_namespace(namespace)
                .await
                .upstream(ResourceKind::Namespace, namespace, "create")
        })
        .await
    }

    async fn wait_for_core_deployments(&self, ctx: &OpContext, namespace: &str) -> DriftResult<()> {
        info!(namespace, "waiting for gitops controller deployments");
        let kube = self.kube;
        poll_until(
            ctx,
            "gitops controller deployments",
            self.poll.deployment_ready(),
            move || async move {
                for name in CORE_DEPLOYMENTS {
                    match kube.deployment_status(namespace, name).await {
                        Ok(Some(status)) if status.is_ready() => {}
                        Ok(_) => return false,
                        Err(e) => {
                            warn!(deployment = name, error = %e, "reading deployment failed, retrying");
                            return false;
                        }
                    }
                }
                true
            },
        )
        .await
    }

    async fn apply_registry_secrets(&self, ctx: &OpContext, namespace: &str) -> DriftResult<()> {
        for registry in &self.config.public_registries {
            let secret = registry_secret(registry);
            self.apply_secret(ctx, namespace, &secret).await?;
        }
        Ok(())
    }

    async fn apply_repository_secret(
        &self,
        ctx: &OpContext,
        namespace: &str,
        repository: &GitRepository,
    ) -> DriftResult<()> {
        let secret = repository_secret(repository)?;
        self.apply_secret(ctx, namespace, &secret).await
    }

    async fn apply_secret(&self, ctx: &OpContext, namespace: &str, secret: &SecretSpec) -> DriftResult<()> {
        ctx.track(ResourceKind::Secret, "apply", &secret.name, async {
            self.kube
                .apply_secret(namespace, secret)
                .await
                .upstream(ResourceKind::Secret, &secret.name, "apply")
        })
        .await
    }
}

/// Kubernetes object names allow lowercase alphanumerics and `-`.
fn secret_name(prefix: &str, source: &str) -> String {
    let mut name: String = source
        .trim_start_matches("oci://")
        .trim_start_matches("https://")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    name = name.trim_matches('-').to_string();
    let mut full = format!("{prefix}-{name}");
    full.truncate(63);
    full.trim_end_matches('-').to_string()
}

fn registry_secret(registry: &str) -> SecretSpec {
    let url = registry.trim_start_matches("oci://").to_string();
    SecretSpec {
        name: secret_name("registry", &url),
        labels: BTreeMap::from([(SECRET_TYPE_LABEL.to_string(), "repository".to_string())]),
        string_data: BTreeMap::from([
            ("type".to_string(), "helm".to_string()),
            ("name".to_string(), url.clone()),
            ("url".to_string(), url),
            ("enableOCI".to_string(), "true".to_string()),
        ]),
    }
}

fn repository_secret(repository: &GitRepository) -> DriftResult<SecretSpec> {
    let mut string_data = BTreeMap::from([
        ("type".to_string(), "git".to_string()),
        ("url".to_string(), repository.url.clone()),
    ]);
    if let Some(username) = &repository.username {
        string_data.insert("username".to_string(), username.clone());
    }
    if let Some(password_env) = &repository.password_env {
        let password = env::var(password_env).map_err(|_| {
            DriftError::validation(
                "gitops.repository.password_env",
                format!("environment variable `{password_env}` is not set"),
            )
        })?;
        string_data.insert("password".to_string(), password);
    }
    Ok(SecretSpec {
        name: secret_name("repo", &repository.url),
        labels: BTreeMap::from([(SECRET_TYPE_LABEL.to_string(), "repository".to_string())]),
        string_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeHelm, FakeKube};
    use driftless_common::settings::PollSettings;
    use std::{sync::Arc, time::Duration};

    fn gitops() -> GitOpsConfig {
        GitOpsConfig {
            namespace: "argocd".into(),
            chart_version: "7.7.0".into(),
            repository: None,
            public_registries: Vec::new(),
        }
    }

    fn cluster() -> (Arc<FakeKube>, FakeHelm) {
        let kube = FakeKube::new();
        kube.add_node("ip-10-0-1-12", true);
        let helm = FakeHelm::new(kube.clone());
        (kube, helm)
    }

    #[tokio::test(start_paused = true)]
    async fn installs_into_a_ready_cluster() {
        let (kube, helm) = cluster();
        let config = gitops();
        let installer = GitOpsInstaller::new(kube.as_ref(), &helm, &config, PollSettings::default());

        let report = installer.install(&OpContext::default()).await.unwrap();

        assert!(!report.is_degraded());
        assert!(report.best_effort.is_empty());
        assert!(kube.has_namespace("argocd"));
        assert_eq!(helm.releases()[0].version, "7.7.0");
        assert_eq!(
            kube.mutations(),
            vec!["create_namespace argocd".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn existing_namespace_is_left_alone() {
        let (kube, helm) = cluster();
        kube.add_namespace("argocd");
        let config = gitops();
        let installer = GitOpsInstaller::new(kube.as_ref(), &helm, &config, PollSettings::default());

        installer.install(&OpContext::default()).await.unwrap();

        assert!(kube.mutations().is_empty());
        assert_eq!(helm.releases().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_a_node_to_turn_ready() {
        let kube = FakeKube::new();
        kube.add_node("ip-10-0-1-12", false);
        let helm = FakeHelm::new(kube.clone());
        let config = gitops();

        let later = kube.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(42)).await;
            later.add_node("ip-10-0-2-7", true);
        });

        let started = tokio::time::Instant::now();
        let installer = GitOpsInstaller::new(kube.as_ref(), &helm, &config, PollSettings::default());
        installer.install(&OpContext::default()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(42));
    }

    #[tokio::test(start_paused = true)]
    async fn no_ready_node_times_out_before_installing() {
        let kube = FakeKube::new();
        kube.add_node("ip-10-0-1-12", false);
        let helm = FakeHelm::new(kube.clone());
        let config = gitops();
        let installer = GitOpsInstaller::new(kube.as_ref(), &helm, &config, PollSettings::default());

        let err = installer.install(&OpContext::default()).await.unwrap_err();

        match err {
            DriftError::Timeout { timeout, .. } => assert_eq!(timeout, Duration::from_secs(300)),
            other => panic!("expected timeout, got {other}"),
        }
        assert!(helm.releases().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deployments_that_never_become_ready_time_out() {
        let (kube, helm) = cluster();
        helm.leave_unready("argocd-repo-server");
        let config = gitops();
        let installer = GitOpsInstaller::new(kube.as_ref(), &helm, &config, PollSettings::default());

        let err = installer.install(&OpContext::default()).await.unwrap_err();
        assert!(err.is_timeout(), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn failing_credentials_only_degrade_the_report() {
        let (kube, helm) = cluster();
        kube.fail_on("apply_secret");
        let config = GitOpsConfig {
            public_registries: vec!["oci://ghcr.io/nebari-dev".into()],
            repository: Some(GitRepository {
                url: "https://github.com/example/platform.git".into(),
                username: Some("bot".into()),
                password_env: None,
            }),
            ..gitops()
        };
        let installer = GitOpsInstaller::new(kube.as_ref(), &helm, &config, PollSettings::default());

        let report = installer.install(&OpContext::default()).await.unwrap();

        assert!(report.is_degraded());
        let warnings = report.warnings();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("public registry access:"));
        assert!(warnings[1].starts_with("git repository credentials:"));
    }

    #[tokio::test(start_paused = true)]
    async fn credentials_are_written_as_repository_secrets() {
        let (kube, helm) = cluster();
        let config = GitOpsConfig {
            public_registries: vec!["oci://ghcr.io/nebari-dev".into()],
            repository: Some(GitRepository {
                url: "https://github.com/example/platform.git".into(),
                username: None,
                password_env: None,
            }),
            ..gitops()
        };
        let installer = GitOpsInstaller::new(kube.as_ref(), &helm, &config, PollSettings::default());

        let report = installer.install(&OpContext::default()).await.unwrap();

        assert_eq!(report.best_effort, vec![StepOutcome::Completed, StepOutcome::Completed]);
        let registry = kube.secret("argocd", "registry-ghcr-io-nebari-dev").unwrap();
        assert_eq!(registry.string_data["enableOCI"], "true");
        assert_eq!(registry.labels[SECRET_TYPE_LABEL], "repository");
        let repo = kube
            .secret("argocd", "repo-github-com-example-platform-git")
            .unwrap();
        assert_eq!(repo.string_data["type"], "git");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_password_variable_degrades() {
        let (kube, helm) = cluster();
        let config = GitOpsConfig {
            repository: Some(GitRepository {
                url: "https://github.com/example/platform.git".into(),
                username: Some("bot".into()),
                password_env: Some("DRIFTLESS_TEST_UNSET_GIT_PASSWORD".into()),
            }),
            ..gitops()
        };
        let installer = GitOpsInstaller::new(kube.as_ref(), &helm, &config, PollSettings::default());

        let report = installer.install(&OpContext::default()).await.unwrap();
        assert!(report.warnings()[0].contains("DRIFTLESS_TEST_UNSET_GIT_PASSWORD"));
    }

    #[test]
    fn secret_names_are_valid_object_names() {
        assert_eq!(
            secret_name("registry", "ghcr.io/Nebari-Dev"),
            "registry-ghcr-io-nebari-dev"
        );
        let long = secret_name("repo", &"x".repeat(100));
        assert!(long.len() <= 63);
    }
}
