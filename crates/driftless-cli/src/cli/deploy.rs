use clap::Parser;
use colored::Colorize;
use driftless_bootstrap::{wait_for_endpoint, GitOpsInstaller, HelmCli, KubeClient};
use driftless_common::{settings::Settings, OpContext, ProjectConfig};
use tracing::{info, warn};

use super::ProjectArgs;
use crate::{
    error::DriftCliResult,
    init::{dns_for, load_project, operation_context, provider_for},
};

#[derive(Parser, Debug, Clone)]
pub struct DeployArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Skip installing the GitOps controller
    #[arg(long, default_value_t = false)]
    pub skip_bootstrap: bool,

    /// Skip pointing DNS records at the ingress
    #[arg(long, default_value_t = false)]
    pub skip_dns: bool,
}

pub async fn run(args: DeployArgs, config: &Settings) -> DriftCliResult<()> {
    let project = load_project(&args.project.config)?;
    let provider = provider_for(&project, config)?;
    let dns = if args.skip_dns { None } else { dns_for(&project)? };
    let ctx = operation_context();

    info!(project = %project.project_name, provider = %project.provider, "deploying");
    provider.reconcile(&ctx, &project).await?;
    println!("{} infrastructure for {}", "reconciled".green(), project.project_name);

    let needs_cluster = (!args.skip_bootstrap && project.gitops.is_some()) || dns.is_some();
    if !needs_cluster {
        return Ok(());
    }
    let kubeconfig = provider.kubeconfig(&ctx, &project).await?;
    let kube = KubeClient::from_kubeconfig(&kubeconfig).await?;

    if !args.skip_bootstrap {
        bootstrap(&ctx, &project, config, &kube, &kubeconfig).await?;
    }

    if let (Some(dns), Some(dns_config)) = (dns, &project.dns) {
        let endpoint = wait_for_endpoint(
            &ctx,
            &kube,
            &dns_config.ingress_namespace,
            &dns_config.ingress_service,
            config.poll.endpoint(),
        )
        .await?;
        let outcomes = dns.ensure(&ctx, &endpoint).await?;
        for outcome in outcomes {
            println!(
                "{} {} {} ({:?})",
                "dns".cyan(),
                outcome.record_type,
                outcome.name,
                outcome.change
            );
        }
    }
    Ok(())
}

async fn bootstrap(
    ctx: &OpContext,
    project: &ProjectConfig,
    config: &Settings,
    kube: &KubeClient,
    kubeconfig: &[u8],
) -> DriftCliResult<()> {
    let Some(gitops) = &project.gitops else {
        return Ok(());
    };
    let helm = HelmCli::new(kubeconfig)?;
    let installer = GitOpsInstaller::new(kube, &helm, gitops, config.poll.clone());
    let report = installer.install(ctx).await?;
    println!(
        "{} gitops controller in namespace {}",
        "installed".green(),
        report.namespace
    );
    for warning in report.warnings() {
        warn!("{warning}");
        println!("{} {}", "warning:".yellow(), warning);
    }
    Ok(())
}
