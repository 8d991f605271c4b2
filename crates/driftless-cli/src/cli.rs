use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use driftless_common::util::tracing::setup_tracing;
use log::LevelFilter;

use crate::{error::DriftCliResult, init::init_config};

mod deploy;
mod destroy;
mod info;
mod kubeconfig;
mod providers;
mod summary;
mod validate;

#[derive(Debug, Parser)]
#[command(name = "dl", version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[clap(short('l'), long, value_name("LEVEL"), default_value("info"))]
    pub log_level: LevelFilter,

    /// Tool settings file layered over the defaults
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

/// Location of the project configuration.
#[derive(Debug, Args, Clone)]
pub struct ProjectArgs {
    #[arg(short, long, default_value = "driftless-config.yaml")]
    pub config: PathBuf,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    #[command(about = "Create or update the deployment", alias = "up")]
    Deploy(deploy::DeployArgs),
    #[command(about = "Tear the deployment down", alias = "down")]
    Destroy(destroy::DestroyArgs),
    #[command(about = "Print or save the cluster kubeconfig")]
    Kubeconfig(kubeconfig::KubeconfigArgs),
    #[command(about = "Describe the deployed resources")]
    Summary(summary::SummaryArgs),
    #[command(about = "Check the project configuration without calling the cloud")]
    Validate(validate::ValidateArgs),
    #[command(about = "List registered providers and DNS backends")]
    Providers,
    #[command(about = "Show version information")]
    Info,
}

pub async fn exec() -> DriftCliResult {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    setup_tracing(Some(cli.log_level))?;
    let cfg = init_config(&cli)?;

    match cli.cmd {
        Command::Deploy(args) => deploy::run(args, cfg).await?,
        Command::Destroy(args) => destroy::run(args, cfg).await?,
        Command::Kubeconfig(args) => kubeconfig::run(args, cfg).await?,
        Command::Summary(args) => summary::run(args, cfg).await?,
        Command::Validate(args) => validate::run(args, cfg)?,
        Command::Providers => providers::run(cfg)?,
        Command::Info => info::run(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_force_destroy() {
        let cli = Cli::try_parse_from(["dl", "-l", "debug", "destroy", "--force", "-c", "demo.yaml"])
            .unwrap();
        assert_eq!(cli.log_level, LevelFilter::Debug);
        match cli.cmd {
            Command::Destroy(args) => {
                assert!(args.force);
                assert_eq!(args.project.config, PathBuf::from("demo.yaml"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn kubeconfig_defaults_to_stdout() {
        let cli = Cli::try_parse_from(["dl", "kubeconfig"]).unwrap();
        match cli.cmd {
            Command::Kubeconfig(args) => {
                assert!(args.output.is_none());
                assert_eq!(args.project.config, PathBuf::from("driftless-config.yaml"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
