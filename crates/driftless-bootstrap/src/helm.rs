use std::io::Write;

use async_trait::async_trait;
use driftless_common::{util::command::stream_command_output, DriftResult};
use tempfile::NamedTempFile;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmRelease {
    pub name: String,
    pub chart: String,
    pub repository: String,
    pub version: String,
    pub namespace: String,
    /// `--set key=value` pairs.
    pub values: Vec<(String, String)>,
}

#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Installs the release, or upgrades it in place when it exists.
    async fn upgrade_install(&self, release: &HelmRelease) -> anyhow::Result<()>;
}

/// Runs the `helm` binary against a kubeconfig kept in a temporary file for
/// the lifetime of this value.
pub struct HelmCli {
    kubeconfig: NamedTempFile,
}

impl HelmCli {
    pub fn new(kubeconfig: &[u8]) -> DriftResult<Self> {
        let mut file = NamedTempFile::new()?;
        file.write_all(kubeconfig)?;
        file.flush()?;
        Ok(Self { kubeconfig: file })
    }

    fn args(&self, release: &HelmRelease) -> Vec<String> {
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            release.name.clone(),
            release.chart.clone(),
            "--repo".to_string(),
            release.repository.clone(),
            "--version".to_string(),
            release.version.clone(),
            "--namespace".to_string(),
            release.namespace.clone(),
            "--kubeconfig".to_string(),
            self.kubeconfig.path().display().to_string(),
        ];
        for (key, value) in &release.values {
            args.push("--set".to_string());
            args.push(format!("{key}={value}"));
        }
        args
    }
}

#[async_trait]
impl PackageInstaller for HelmCli {
    async fn upgrade_install(&self, release: &HelmRelease) -> anyhow::Result<()> {
        info!(
            release = %release.name,
            chart = %release.chart,
            version = %release.version,
            "installing helm release"
        );
        let args = self.args(release);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        stream_command_output("helm", &args, [("HELM_NAMESPACE", release.namespace.as_str())]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_upgrade_install_arguments() {
        let helm = HelmCli::new(b"apiVersion: v1\nkind: Config\n").unwrap();
        let release = HelmRelease {
            name: "argocd".into(),
            chart: "argo-cd".into(),
            repository: "https://argoproj.github.io/argo-helm".into(),
            version: "7.7.0".into(),
            namespace: "argocd".into(),
            values: vec![("configs.params.server\\.insecure".into(), "true".into())],
        };

        let args = helm.args(&release);
        assert_eq!(&args[..4], ["upgrade", "--install", "argocd", "argo-cd"]);
        let kubeconfig = args.iter().position(|a| a == "--kubeconfig").unwrap();
        assert_eq!(
            std::fs::read_to_string(&args[kubeconfig + 1]).unwrap(),
            "apiVersion: v1\nkind: Config\n"
        );
        assert_eq!(args.last().unwrap(), "configs.params.server\\.insecure=true");
    }
}
