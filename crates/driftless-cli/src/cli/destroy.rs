use clap::Parser;
use colored::Colorize;
use driftless_common::settings::Settings;
use driftless_provider::DestroyOptions;
use tracing::{info, warn};

use super::ProjectArgs;
use crate::{
    error::DriftCliResult,
    init::{dns_for, load_project, operation_context, provider_for},
};

#[derive(Parser, Debug, Clone)]
pub struct DestroyArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Keep going past failures and report them all at the end
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

pub async fn run(args: DestroyArgs, config: &Settings) -> DriftCliResult<()> {
    let project = load_project(&args.project.config)?;
    let provider = provider_for(&project, config)?;
    let dns = dns_for(&project)?;
    let options = DestroyOptions::from_settings(&config.destroy, args.force);
    let ctx = operation_context();

    info!(project = %project.project_name, force = args.force, "destroying");
    if let Some(dns) = dns {
        match dns.destroy(&ctx).await {
            Ok(deleted) => info!(deleted, "dns records removed"),
            Err(e) if args.force && !e.is_cancelled() => {
                warn!(error = %e, "dns cleanup failed, continuing");
            }
            Err(e) => return Err(e.into()),
        }
    }

    provider.destroy(&ctx, &project, &options).await?;
    println!("{} {}", "destroyed".green(), project.project_name);
    Ok(())
}
