//! Project configuration: what a deployment should look like.
//!
//! The top level is parsed from YAML and then resolved into a closed union of
//! known provider settings. Unknown providers keep their raw subtree so the
//! registry, not this module, decides which provider names exist. Anything
//! the engine depends on is strongly typed; unknown top-level keys are kept in
//! `extra` and otherwise ignored.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{DriftError, DriftResult};

pub const AWS_PROVIDER: &str = "aws";
pub const EXISTING_PROVIDER: &str = "existing";

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfig {
    pub project_name: String,
    pub provider: String,
    pub domain: Option<String>,
    pub dns: Option<DnsConfig>,
    pub gitops: Option<GitOpsConfig>,
    pub settings: ProviderSettings,
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderSettings {
    Aws(AwsSettings),
    Existing(ExistingSettings),
    Other { name: String, raw: Option<Value> },
}

#[derive(Debug, Deserialize)]
struct RawProjectConfig {
    project_name: String,
    provider: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    dns: Option<DnsConfig>,
    #[serde(default)]
    gitops: Option<GitOpsConfig>,
    #[serde(flatten)]
    rest: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AwsSettings {
    pub region: String,
    pub kubernetes_version: String,
    #[serde(default = "default_vpc_cidr")]
    pub vpc_cidr_block: String,
    #[serde(default)]
    pub availability_zones: Vec<String>,
    #[serde(default)]
    pub eks_kms_arn: Option<String>,
    #[serde(default = "default_true")]
    pub endpoint_public_access: bool,
    #[serde(default)]
    pub endpoint_private_access: bool,
    #[serde(default = "default_log_types")]
    pub enabled_log_types: Vec<String>,
    #[serde(default)]
    pub permissions_boundary: Option<String>,
    #[serde(default = "default_node_groups")]
    pub node_groups: BTreeMap<String, NodeGroupSettings>,
    #[serde(default)]
    pub efs: StorageSettings,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl AwsSettings {
    /// Configured zones, or the first two zones of the region.
    pub fn zones(&self) -> Vec<String> {
        if self.availability_zones.is_empty() {
            vec![format!("{}a", self.region), format!("{}b", self.region)]
        } else {
            self.availability_zones.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NodeGroupSettings {
    pub instance: String,
    #[serde(default)]
    pub min_nodes: u32,
    #[serde(default = "default_max_nodes")]
    pub max_nodes: u32,
    #[serde(default)]
    pub gpu: bool,
    #[serde(default)]
    pub spot: bool,
    #[serde(default = "default_disk_size")]
    pub disk_size: u32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
}

impl NodeGroupSettings {
    pub fn new(instance: &str, min_nodes: u32, max_nodes: u32) -> Self {
        Self {
            instance: instance.to_string(),
            min_nodes,
            max_nodes,
            gpu: false,
            spot: false,
            disk_size: default_disk_size(),
            labels: BTreeMap::new(),
            taints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    pub effect: TaintEffect,
}

impl fmt::Display for Taint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}:{}", self.key, v, self.effect),
            None => write!(f, "{}:{}", self.key, self.effect),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

impl TaintEffect {
    /// Spelling used by the EKS API.
    pub fn api_name(&self) -> &'static str {
        match self {
            TaintEffect::NoSchedule => "NO_SCHEDULE",
            TaintEffect::PreferNoSchedule => "PREFER_NO_SCHEDULE",
            TaintEffect::NoExecute => "NO_EXECUTE",
        }
    }

    pub fn from_api_name(name: &str) -> Option<Self> {
        match name {
            "NO_SCHEDULE" => Some(TaintEffect::NoSchedule),
            "PREFER_NO_SCHEDULE" => Some(TaintEffect::PreferNoSchedule),
            "NO_EXECUTE" => Some(TaintEffect::NoExecute),
            _ => None,
        }
    }
}

impl fmt::Display for TaintEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaintEffect::NoSchedule => "NoSchedule",
            TaintEffect::PreferNoSchedule => "PreferNoSchedule",
            TaintEffect::NoExecute => "NoExecute",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThroughputMode {
    Bursting,
    Provisioned,
    Elastic,
}

impl ThroughputMode {
    pub fn api_name(&self) -> &'static str {
        match self {
            ThroughputMode::Bursting => "bursting",
            ThroughputMode::Provisioned => "provisioned",
            ThroughputMode::Elastic => "elastic",
        }
    }

    pub fn from_api_name(name: &str) -> Option<Self> {
        match name {
            "bursting" => Some(ThroughputMode::Bursting),
            "provisioned" => Some(ThroughputMode::Provisioned),
            "elastic" => Some(ThroughputMode::Elastic),
            _ => None,
        }
    }
}

impl fmt::Display for ThroughputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub encrypted: bool,
    #[serde(default = "default_throughput_mode")]
    pub throughput_mode: ThroughputMode,
    #[serde(default)]
    pub provisioned_throughput_mibps: Option<f64>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            encrypted: true,
            throughput_mode: default_throughput_mode(),
            provisioned_throughput_mibps: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ExistingSettings {
    pub kubeconfig: PathBuf,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DnsConfig {
    pub provider: String,
    pub zone: String,
    #[serde(default)]
    pub proxied: bool,
    #[serde(default = "default_ingress_namespace")]
    pub ingress_namespace: String,
    #[serde(default = "default_ingress_service")]
    pub ingress_service: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GitOpsConfig {
    #[serde(default = "default_gitops_namespace")]
    pub namespace: String,
    #[serde(default = "default_chart_version")]
    pub chart_version: String,
    #[serde(default)]
    pub repository: Option<GitRepository>,
    #[serde(default)]
    pub public_registries: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GitRepository {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Environment variable holding the password or token.
    #[serde(default)]
    pub password_env: Option<String>,
}

impl ProjectConfig {
    pub fn load(path: &Path) -> DriftResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> DriftResult<Self> {
        let raw: RawProjectConfig = serde_yaml::from_str(contents)?;
        let config = Self::resolve(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn resolve(mut raw: RawProjectConfig) -> DriftResult<Self> {
        let settings = match raw.provider.as_str() {
            AWS_PROVIDER => {
                let value = raw.rest.remove(AWS_PROVIDER).ok_or_else(|| {
                    DriftError::validation(AWS_PROVIDER, "provider `aws` requires an `aws` block")
                })?;
                ProviderSettings::Aws(serde_yaml::from_value(value)?)
            }
            EXISTING_PROVIDER => {
                let value = raw.rest.remove(EXISTING_PROVIDER).ok_or_else(|| {
                    DriftError::validation(
                        EXISTING_PROVIDER,
                        "provider `existing` requires an `existing` block",
                    )
                })?;
                ProviderSettings::Existing(serde_yaml::from_value(value)?)
            }
            other => ProviderSettings::Other {
                name: other.to_string(),
                raw: raw.rest.remove(other),
            },
        };

        Ok(ProjectConfig {
            project_name: raw.project_name,
            provider: raw.provider,
            domain: raw.domain,
            dns: raw.dns,
            gitops: raw.gitops,
            settings,
            extra: raw.rest,
        })
    }

    /// Rejects configurations that cannot be reconciled. Runs before any
    /// API call is made.
    pub fn validate(&self) -> DriftResult<()> {
        validate_project_name(&self.project_name)?;
        if self.provider.trim().is_empty() {
            return Err(DriftError::validation("provider", "must not be empty"));
        }
        if self.dns.is_some() && self.domain.is_none() {
            return Err(DriftError::validation(
                "domain",
                "a domain is required when `dns` is configured",
            ));
        }
        if let Some(gitops) = &self.gitops {
            if gitops.namespace.trim().is_empty() {
                return Err(DriftError::validation("gitops.namespace", "must not be empty"));
            }
        }
        match &self.settings {
            ProviderSettings::Aws(aws) => validate_aws(aws),
            ProviderSettings::Existing(existing) => {
                if existing.kubeconfig.as_os_str().is_empty() {
                    return Err(DriftError::validation(
                        "existing.kubeconfig",
                        "must point at a kubeconfig file",
                    ));
                }
                Ok(())
            }
            ProviderSettings::Other { .. } => Ok(()),
        }
    }

    pub fn aws(&self) -> DriftResult<&AwsSettings> {
        match &self.settings {
            ProviderSettings::Aws(aws) => Ok(aws),
            _ => Err(DriftError::validation(
                AWS_PROVIDER,
                format!("project `{}` is not configured for aws", self.project_name),
            )),
        }
    }

    pub fn existing(&self) -> DriftResult<&ExistingSettings> {
        match &self.settings {
            ProviderSettings::Existing(existing) => Ok(existing),
            _ => Err(DriftError::validation(
                EXISTING_PROVIDER,
                format!(
                    "project `{}` is not configured for an existing cluster",
                    self.project_name
                ),
            )),
        }
    }
}

fn validate_project_name(name: &str) -> DriftResult<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let starts_with_letter = name.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    if !(3..=32).contains(&name.len()) || !valid_chars || !starts_with_letter || name.ends_with('-')
    {
        return Err(DriftError::validation(
            "project_name",
            format!(
                "`{name}` must be 3-32 lowercase letters, digits or hyphens, \
                 start with a letter and not end with a hyphen"
            ),
        ));
    }
    Ok(())
}

fn validate_aws(aws: &AwsSettings) -> DriftResult<()> {
    if aws.region.trim().is_empty() {
        return Err(DriftError::validation("aws.region", "must not be empty"));
    }
    parse_version(&aws.kubernetes_version).ok_or_else(|| {
        DriftError::validation(
            "aws.kubernetes_version",
            format!("`{}` is not a MAJOR.MINOR version", aws.kubernetes_version),
        )
    })?;
    let net: Ipv4Net = aws.vpc_cidr_block.parse().map_err(|_| {
        DriftError::validation(
            "aws.vpc_cidr_block",
            format!("`{}` is not an IPv4 CIDR block", aws.vpc_cidr_block),
        )
    })?;
    if net.prefix_len() > 24 {
        return Err(DriftError::validation(
            "aws.vpc_cidr_block",
            "prefix must be /24 or larger to fit one subnet per zone",
        ));
    }
    if aws.zones().len() < 2 {
        return Err(DriftError::validation(
            "aws.availability_zones",
            "at least two availability zones are required",
        ));
    }
    if aws.node_groups.is_empty() {
        return Err(DriftError::validation(
            "aws.node_groups",
            "at least one node group is required",
        ));
    }
    for (name, group) in &aws.node_groups {
        let field = format!("aws.node_groups.{name}");
        if group.instance.trim().is_empty() {
            return Err(DriftError::validation(field, "instance must not be empty"));
        }
        if group.max_nodes == 0 || group.min_nodes > group.max_nodes {
            return Err(DriftError::validation(
                field,
                format!(
                    "min_nodes ({}) must not exceed max_nodes ({}), and max_nodes must be at least 1",
                    group.min_nodes, group.max_nodes
                ),
            ));
        }
    }
    if aws.efs.throughput_mode == ThroughputMode::Provisioned
        && aws.efs.provisioned_throughput_mibps.is_none()
    {
        return Err(DriftError::validation(
            "aws.efs.provisioned_throughput_mibps",
            "required when throughput_mode is provisioned",
        ));
    }
    Ok(())
}

/// Parses `MAJOR.MINOR` (a patch component is ignored).
pub fn parse_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().trim_start_matches('v').split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

fn default_true() -> bool {
    true
}

fn default_vpc_cidr() -> String {
    "10.10.0.0/16".to_string()
}

fn default_log_types() -> Vec<String> {
    vec!["api".to_string(), "audit".to_string()]
}

fn default_max_nodes() -> u32 {
    1
}

fn default_disk_size() -> u32 {
    50
}

fn default_throughput_mode() -> ThroughputMode {
    ThroughputMode::Bursting
}

fn default_node_groups() -> BTreeMap<String, NodeGroupSettings> {
    BTreeMap::from([
        ("general".to_string(), NodeGroupSettings::new("m5.2xlarge", 1, 1)),
        ("user".to_string(), NodeGroupSettings::new("m5.xlarge", 0, 5)),
        ("worker".to_string(), NodeGroupSettings::new("m5.xlarge", 0, 5)),
    ])
}

fn default_ingress_namespace() -> String {
    "ingress-nginx".to_string()
}

fn default_ingress_service() -> String {
    "ingress-nginx-controller".to_string()
}

fn default_gitops_namespace() -> String {
    "argocd".to_string()
}

fn default_chart_version() -> String {
    "7.7.0".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const AWS_CONFIG: &str = r#"
project_name: nebari
provider: aws
domain: nebari.example.com
dns:
  provider: cloudflare
  zone: example.com
aws:
  region: us-west-2
  kubernetes_version: "1.30"
  node_groups:
    general:
      instance: m5.2xlarge
      min_nodes: 1
      max_nodes: 1
    gpu:
      instance: g4dn.xlarge
      max_nodes: 4
      gpu: true
      taints:
        - key: nvidia.com/gpu
          effect: NoSchedule
custom_key: kept
"#;

    #[test]
    fn resolves_aws_settings() {
        let config = ProjectConfig::from_yaml_str(AWS_CONFIG).unwrap();
        assert_eq!(config.project_name, "nebari");
        let aws = config.aws().unwrap();
        assert_eq!(aws.region, "us-west-2");
        assert_eq!(aws.vpc_cidr_block, "10.10.0.0/16");
        assert_eq!(aws.zones(), vec!["us-west-2a", "us-west-2b"]);
        assert_eq!(aws.node_groups.len(), 2);
        let gpu = &aws.node_groups["gpu"];
        assert!(gpu.gpu);
        assert_eq!(gpu.min_nodes, 0);
        assert_eq!(gpu.taints[0].effect, TaintEffect::NoSchedule);
        assert!(aws.efs.encrypted);
        assert!(config.extra.contains_key("custom_key"));
        assert_eq!(config.dns.as_ref().unwrap().zone, "example.com");
    }

    #[test]
    fn unknown_provider_names_are_deferred_to_the_registry() {
        let config = ProjectConfig::from_yaml_str(
            "project_name: demo\nprovider: gcp\ngcp:\n  project: my-project\n",
        )
        .unwrap();
        match &config.settings {
            ProviderSettings::Other { name, raw } => {
                assert_eq!(name, "gcp");
                assert!(raw.is_some());
            }
            other => panic!("unexpected settings {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_project_names() {
        for name in ["", "ab", "Upper", "9lives", "trailing-", "has_underscore"] {
            let yaml = format!("project_name: \"{name}\"\nprovider: gcp\n");
            let err = ProjectConfig::from_yaml_str(&yaml).unwrap_err();
            assert!(
                matches!(err, DriftError::Validation { ref field, .. } if field == "project_name"),
                "{name} accepted: {err}"
            );
        }
    }

    #[test]
    fn rejects_missing_provider_block() {
        let err = ProjectConfig::from_yaml_str("project_name: demo\nprovider: aws\n").unwrap_err();
        assert!(matches!(err, DriftError::Validation { ref field, .. } if field == "aws"));
    }

    #[test]
    fn rejects_inverted_scaling_bounds() {
        let yaml = AWS_CONFIG.replace("max_nodes: 4", "min_nodes: 5\n      max_nodes: 4");
        let err = ProjectConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("aws.node_groups.gpu"));
    }

    #[test]
    fn rejects_bad_cidr() {
        let yaml = AWS_CONFIG.replace(
            "  region: us-west-2",
            "  region: us-west-2\n  vpc_cidr_block: 10.0.0.0/28",
        );
        let err = ProjectConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("aws.vpc_cidr_block"));
    }

    #[test]
    fn dns_requires_domain() {
        let yaml = AWS_CONFIG.replace("domain: nebari.example.com\n", "");
        let err = ProjectConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, DriftError::Validation { ref field, .. } if field == "domain"));
    }

    #[test]
    fn parses_versions() {
        assert_eq!(parse_version("1.30"), Some((1, 30)));
        assert_eq!(parse_version("v1.29.3"), Some((1, 29)));
        assert_eq!(parse_version("latest"), None);
    }
}
