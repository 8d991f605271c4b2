use driftless_common::DriftError;
use thiserror::Error;

pub type DriftCliResult<T = (), E = DriftCliError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum DriftCliError {
    #[error("Unable to initialize config: {0}")]
    InitConfig(String),
    #[error("Unable to load project {path}: {source}")]
    Project { path: String, source: DriftError },
    #[error("Unable to run command: {0}")]
    Command(#[from] clap::error::Error),
    #[error(transparent)]
    Drift(#[from] DriftError),
    #[error("Unable to write output: {0}")]
    Output(#[from] std::io::Error),
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<anyhow::Error> for DriftCliError {
    fn from(error: anyhow::Error) -> Self {
        DriftCliError::Runtime(format!("{error:#}"))
    }
}

impl DriftCliError {
    /// Process exit status: 130 after an interrupt, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            DriftCliError::Drift(e) | DriftCliError::Project { source: e, .. } if e.is_cancelled() => 130,
            _ => 1,
        }
    }
}
