use std::{io::Write, path::PathBuf};

use clap::Parser;
use driftless_common::settings::Settings;
use tracing::info;

use super::ProjectArgs;
use crate::{
    error::DriftCliResult,
    init::{load_project, operation_context, provider_for},
};

#[derive(Parser, Debug, Clone)]
pub struct KubeconfigArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn run(args: KubeconfigArgs, config: &Settings) -> DriftCliResult<()> {
    let project = load_project(&args.project.config)?;
    let provider = provider_for(&project, config)?;
    let kubeconfig = provider.kubeconfig(&operation_context(), &project).await?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, &kubeconfig)?;
            info!(path = %path.display(), "kubeconfig written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&kubeconfig)?;
            stdout.flush()?;
        }
    }
    Ok(())
}
