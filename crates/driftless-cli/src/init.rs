use std::{path::Path, sync::Arc};

use driftless_common::{
    settings::{get_config, Settings, CONFIG_INSTANCE},
    OpContext, ProjectConfig, TracingSink,
};
use driftless_dns::{default_backends, DnsReconciler};
use driftless_provider::{default_providers, Provider};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    cli::Cli,
    error::{DriftCliError, DriftCliResult},
};

pub fn init_config(cli: &Cli) -> DriftCliResult<&'static Settings> {
    let settings = Settings::load(cli.settings.as_deref())
        .map_err(|e| DriftCliError::InitConfig(e.to_string()))?;
    CONFIG_INSTANCE
        .set(settings)
        .map_err(|_| DriftCliError::InitConfig("config already initialized".to_string()))?;
    Ok(get_config()?)
}

pub fn load_project(path: &Path) -> DriftCliResult<ProjectConfig> {
    debug!(path = %path.display(), "loading project configuration");
    ProjectConfig::load(path).map_err(|source| DriftCliError::Project {
        path: path.display().to_string(),
        source,
    })
}

/// Context for one invocation. The first Ctrl-C cancels it; the running step
/// finishes and nothing new starts.
pub fn operation_context() -> OpContext {
    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current step");
            on_interrupt.cancel();
        }
    });
    OpContext::new(token, Arc::new(TracingSink))
}

/// Looks the project's provider up in the built-in registry and validates the
/// project against it.
pub fn provider_for(
    project: &ProjectConfig,
    settings: &Settings,
) -> DriftCliResult<Arc<dyn Provider>> {
    let providers = default_providers(settings)?;
    let provider = providers.get(&project.provider)?;
    provider.validate(project)?;
    Ok(provider)
}

/// The DNS reconciler for the project, when both `dns` and `domain` are set.
pub fn dns_for(project: &ProjectConfig) -> DriftCliResult<Option<DnsReconciler>> {
    let (Some(dns), Some(domain)) = (&project.dns, &project.domain) else {
        return Ok(None);
    };
    let backends = default_backends()?;
    Ok(Some(DnsReconciler::from_config(&backends, dns, domain)?))
}
