use std::{
    env,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

use anyhow::anyhow;
use config::{Environment, File};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::{
    error::{DriftError, DriftResult},
    poller::WaitSpec,
};

pub static CONFIG_INSTANCE: OnceLock<Settings> = OnceLock::new();

/// Interval and timeouts for every readiness wait.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollSettings {
    pub interval_secs: u64,
    pub slow_interval_secs: u64,
    pub node_ready_timeout_secs: u64,
    pub deployment_ready_timeout_secs: u64,
    pub cluster_ready_timeout_secs: u64,
    pub resource_ready_timeout_secs: u64,
    pub endpoint_timeout_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            slow_interval_secs: 20,
            node_ready_timeout_secs: 300,
            deployment_ready_timeout_secs: 300,
            cluster_ready_timeout_secs: 1800,
            resource_ready_timeout_secs: 900,
            endpoint_timeout_secs: 600,
        }
    }
}

impl PollSettings {
    pub fn node_ready(&self) -> WaitSpec {
        WaitSpec::secs(self.interval_secs, self.node_ready_timeout_secs)
    }

    pub fn deployment_ready(&self) -> WaitSpec {
        WaitSpec::secs(self.interval_secs, self.deployment_ready_timeout_secs)
    }

    /// Control plane creation, upgrade and deletion.
    pub fn cluster_ready(&self) -> WaitSpec {
        WaitSpec::secs(self.slow_interval_secs, self.cluster_ready_timeout_secs)
    }

    /// Node groups, filesystems, NAT gateways and similar.
    pub fn resource_ready(&self) -> WaitSpec {
        WaitSpec::secs(self.slow_interval_secs, self.resource_ready_timeout_secs)
    }

    pub fn endpoint(&self) -> WaitSpec {
        WaitSpec::secs(self.interval_secs, self.endpoint_timeout_secs)
    }
}

/// Orphan sweep tuning for `destroy`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DestroySettings {
    pub sweep_passes: u32,
    pub sweep_interval_secs: u64,
}

impl Default for DestroySettings {
    fn default() -> Self {
        Self {
            sweep_passes: 3,
            sweep_interval_secs: 15,
        }
    }
}

impl DestroySettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: LevelFilter,

    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,

    #[serde(default)]
    pub poll: PollSettings,

    #[serde(default)]
    pub destroy: DestroySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            working_directory: default_working_directory(),
            poll: PollSettings::default(),
            destroy: DestroySettings::default(),
        }
    }
}

pub fn get_config() -> DriftResult<&'static Settings> {
    CONFIG_INSTANCE
        .get()
        .ok_or_else(|| DriftError::Runtime(anyhow!("settings have not been initialized")))
}

impl Settings {
    /// Layers `config`, `config/default`, `config.<RUN_MODE>`, the user config
    /// directory, an explicit settings file and `DRIFTLESS__*` variables.
    pub fn load(settings_file: Option<&Path>) -> DriftResult<Self> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let mut s = config::Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config.{}", run_mode)).required(false));
        if let Some(dir) = dirs::config_dir() {
            let user = dir.join("driftless").join("config");
            s = s.add_source(File::with_name(&user.to_string_lossy()).required(false));
        }
        if let Some(file) = settings_file {
            s = s.add_source(File::from(file));
        }
        let s = s
            .add_source(Environment::with_prefix("DRIFTLESS").separator("__"))
            .build()?;

        let cfg = s.try_deserialize()?;
        Ok(cfg)
    }
}

fn default_log_level() -> LevelFilter {
    LevelFilter::Info
}

fn default_working_directory() -> PathBuf {
    env::temp_dir().join("driftless")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "log_level: debug\ndestroy:\n  sweep_passes: 5\npoll:\n  node_ready_timeout_secs: 60"
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.log_level, LevelFilter::Debug);
        assert_eq!(settings.destroy.sweep_passes, 5);
        assert_eq!(settings.destroy.sweep_interval_secs, 15);
        assert_eq!(settings.poll.node_ready().timeout, Duration::from_secs(60));
        assert_eq!(settings.poll.deployment_ready_timeout_secs, 300);
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.destroy.sweep_passes, 3);
        assert_eq!(settings.poll.node_ready().timeout, Duration::from_secs(300));
        assert_eq!(
            settings.poll.deployment_ready().timeout,
            Duration::from_secs(300)
        );
    }
}
