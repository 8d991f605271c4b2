use clap::Parser;
use colored::Colorize;
use driftless_common::settings::Settings;

use super::ProjectArgs;
use crate::{
    error::DriftCliResult,
    init::{load_project, operation_context, provider_for},
};

#[derive(Parser, Debug, Clone)]
pub struct SummaryArgs {
    #[command(flatten)]
    pub project: ProjectArgs,
}

pub async fn run(args: SummaryArgs, config: &Settings) -> DriftCliResult<()> {
    let project = load_project(&args.project.config)?;
    let provider = provider_for(&project, config)?;
    let summary = provider.summary(&operation_context(), &project).await?;

    let width = summary.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in summary {
        println!("{}  {}", format!("{key:width$}").bold(), value);
    }
    Ok(())
}
