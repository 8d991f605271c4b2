use clap::Parser;
use console::style;
use driftless_common::settings::Settings;

use super::ProjectArgs;
use crate::{
    error::DriftCliResult,
    init::{dns_for, load_project, provider_for},
};

#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub project: ProjectArgs,
}

pub fn run(args: ValidateArgs, config: &Settings) -> DriftCliResult<()> {
    let project = load_project(&args.project.config)?;
    provider_for(&project, config)?;
    dns_for(&project)?;
    println!(
        "{} {} ({})",
        style("valid").green().bold(),
        args.project.config.display(),
        project.provider
    );
    Ok(())
}
