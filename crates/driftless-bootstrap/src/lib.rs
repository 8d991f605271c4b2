pub mod endpoint;
pub mod fake;
pub mod helm;
pub mod installer;
pub mod kube_ops;

pub use endpoint::wait_for_endpoint;
pub use helm::{HelmCli, HelmRelease, PackageInstaller};
pub use installer::{GitOpsInstaller, InstallReport, CORE_DEPLOYMENTS};
pub use kube_ops::{DeploymentStatus, KubeClient, KubeOps, NodeInfo, SecretSpec};
