//! The capability contract every backend implements, and the registry that
//! binds backends to the names used in project configuration.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use driftless_common::{
    project::ProjectConfig,
    registry::Registry,
    settings::{DestroySettings, Settings},
    DriftResult, OpContext,
};

use crate::{
    aws::{cli::CliClientFactory, AwsProvider},
    existing::ExistingProvider,
};

/// Ordered key/value pairs describing a deployment.
pub type Summary = Vec<(String, String)>;

pub type ProviderRegistry = Registry<dyn Provider>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyOptions {
    /// Attempt every step and report all failures at the end instead of
    /// aborting on the first one.
    pub force: bool,
    pub sweep_passes: u32,
    pub sweep_interval: Duration,
}

impl Default for DestroyOptions {
    fn default() -> Self {
        DestroyOptions::from_settings(&DestroySettings::default(), false)
    }
}

impl DestroyOptions {
    pub fn from_settings(settings: &DestroySettings, force: bool) -> Self {
        Self {
            force,
            sweep_passes: settings.sweep_passes,
            sweep_interval: settings.sweep_interval(),
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Checks everything that can be checked without calling the cloud.
    fn validate(&self, config: &ProjectConfig) -> DriftResult<()>;

    /// Drives the cloud towards `config`. Running it twice against an
    /// unchanged cloud performs no mutating call the second time.
    async fn reconcile(&self, ctx: &OpContext, config: &ProjectConfig) -> DriftResult<()>;

    async fn destroy(
        &self,
        ctx: &OpContext,
        config: &ProjectConfig,
        options: &DestroyOptions,
    ) -> DriftResult<()>;

    async fn kubeconfig(&self, ctx: &OpContext, config: &ProjectConfig) -> DriftResult<Vec<u8>>;

    async fn summary(&self, ctx: &OpContext, config: &ProjectConfig) -> DriftResult<Summary>;
}

/// Registers every provider shipped with driftless.
pub fn default_providers(settings: &Settings) -> DriftResult<ProviderRegistry> {
    let registry = ProviderRegistry::new("provider");
    let aws = AwsProvider::new(Arc::new(CliClientFactory), settings.poll.clone());
    registry.register(aws.name().to_string(), Arc::new(aws))?;
    let existing = ExistingProvider;
    registry.register(existing.name().to_string(), Arc::new(existing))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftless_common::DriftError;

    #[test]
    fn default_registry_lists_shipped_providers() {
        let registry = default_providers(&Settings::default()).unwrap();
        assert_eq!(registry.list(), vec!["aws", "existing"]);
        assert!(matches!(
            registry.get("gcp").err(),
            Some(DriftError::NotRegistered { .. })
        ));
    }

    #[test]
    fn destroy_options_follow_settings() {
        let options = DestroyOptions::from_settings(
            &DestroySettings {
                sweep_passes: 5,
                sweep_interval_secs: 2,
            },
            true,
        );
        assert!(options.force);
        assert_eq!(options.sweep_passes, 5);
        assert_eq!(options.sweep_interval, Duration::from_secs(2));
        assert!(!DestroyOptions::default().force);
    }
}
