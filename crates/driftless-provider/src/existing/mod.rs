//! The `existing` provider adopts a cluster someone else runs. It owns no
//! cloud resources: reconcile and destroy only report, and the kubeconfig is
//! read from disk.

use async_trait::async_trait;
use driftless_common::{
    project::{ExistingSettings, ProjectConfig, EXISTING_PROVIDER},
    DriftError, DriftResult, OpContext, ResourceKind, UpstreamContext,
};
use kube::config::Kubeconfig;
use tracing::{info, warn};

use crate::provider::{DestroyOptions, Provider, Summary};

#[derive(Debug, Default, Clone, Copy)]
pub struct ExistingProvider;

impl ExistingProvider {
    /// Reads the kubeconfig and, when a context is configured, makes it the
    /// current one.
    fn load(settings: &ExistingSettings) -> DriftResult<Kubeconfig> {
        let path = settings.kubeconfig.display().to_string();
        let mut kubeconfig = Kubeconfig::read_from(&settings.kubeconfig)
            .map_err(anyhow::Error::from)
            .upstream(ResourceKind::Kubeconfig, &path, "read")?;
        if let Some(context) = &settings.context {
            if !kubeconfig.contexts.iter().any(|c| &c.name == context) {
                return Err(DriftError::validation(
                    "existing.context",
                    format!("context `{context}` is not defined in {path}"),
                ));
            }
            kubeconfig.current_context = Some(context.clone());
        }
        Ok(kubeconfig)
    }
}

#[async_trait]
impl Provider for ExistingProvider {
    fn name(&self) -> &str {
        EXISTING_PROVIDER
    }

    fn validate(&self, config: &ProjectConfig) -> DriftResult<()> {
        config.validate()?;
        let settings = config.existing()?;
        if !settings.kubeconfig.is_file() {
            return Err(DriftError::validation(
                "existing.kubeconfig",
                format!("{} does not exist", settings.kubeconfig.display()),
            ));
        }
        Ok(())
    }

    async fn reconcile(&self, ctx: &OpContext, config: &ProjectConfig) -> DriftResult<()> {
        self.validate(config)?;
        let kubeconfig = Self::load(config.existing()?)?;
        let context = kubeconfig.current_context.unwrap_or_default();
        info!(project = %config.project_name, context = %context, "using existing cluster");
        ctx.info(ResourceKind::ManagedCluster, "adopt", &context);
        Ok(())
    }

    async fn destroy(
        &self,
        ctx: &OpContext,
        config: &ProjectConfig,
        _options: &DestroyOptions,
    ) -> DriftResult<()> {
        warn!(project = %config.project_name, "existing clusters are not destroyed by driftless");
        ctx.warning(
            ResourceKind::ManagedCluster,
            "destroy",
            "the cluster is managed outside driftless and was left untouched",
        );
        Ok(())
    }

    async fn kubeconfig(&self, _ctx: &OpContext, config: &ProjectConfig) -> DriftResult<Vec<u8>> {
        let kubeconfig = Self::load(config.existing()?)?;
        Ok(serde_yaml::to_string(&kubeconfig)?.into_bytes())
    }

    async fn summary(&self, _ctx: &OpContext, config: &ProjectConfig) -> DriftResult<Summary> {
        let settings = config.existing()?;
        let kubeconfig = Self::load(settings)?;
        Ok(vec![
            ("provider".into(), EXISTING_PROVIDER.into()),
            ("project".into(), config.project_name.clone()),
            (
                "kubeconfig".into(),
                settings.kubeconfig.display().to_string(),
            ),
            (
                "context".into(),
                kubeconfig.current_context.unwrap_or_else(|| "none".into()),
            ),
            (
                "contexts".into(),
                kubeconfig
                    .contexts
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
- name: dev
  cluster:
    server: https://dev.example.test
- name: prod
  cluster:
    server: https://prod.example.test
contexts:
- name: dev
  context:
    cluster: dev
    user: admin
- name: prod
  context:
    cluster: prod
    user: admin
users:
- name: admin
  user:
    token: abc
"#;

    fn project(path: &std::path::Path, context: Option<&str>) -> ProjectConfig {
        let mut yaml = format!(
            "project_name: adopted\nprovider: existing\nexisting:\n  kubeconfig: {}\n",
            path.display()
        );
        if let Some(context) = context {
            yaml.push_str(&format!("  context: {context}\n"));
        }
        ProjectConfig::from_yaml_str(&yaml).unwrap()
    }

    fn kubeconfig_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(KUBECONFIG.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn selects_the_configured_context() {
        let file = kubeconfig_file();
        let config = project(file.path(), Some("prod"));
        let bytes = ExistingProvider
            .kubeconfig(&OpContext::default(), &config)
            .await
            .unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_slice(&bytes).unwrap();
        assert_eq!(parsed["current-context"].as_str(), Some("prod"));
    }

    #[tokio::test]
    async fn rejects_unknown_context() {
        let file = kubeconfig_file();
        let config = project(file.path(), Some("staging"));
        let err = ExistingProvider
            .kubeconfig(&OpContext::default(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, DriftError::Validation { .. }));
    }

    #[tokio::test]
    async fn reconcile_and_destroy_touch_nothing() {
        let file = kubeconfig_file();
        let config = project(file.path(), None);
        let ctx = OpContext::default();
        ExistingProvider.reconcile(&ctx, &config).await.unwrap();
        ExistingProvider
            .destroy(&ctx, &config, &DestroyOptions::default())
            .await
            .unwrap();
        let summary = ExistingProvider.summary(&ctx, &config).await.unwrap();
        assert!(summary.contains(&("context".to_string(), "dev".to_string())));
        assert!(summary.contains(&("contexts".to_string(), "dev, prod".to_string())));
    }
}
