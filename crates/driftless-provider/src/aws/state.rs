//! Snapshots of discovered AWS resources and the desired shape of each kind.
//!
//! Snapshots are produced fresh by discovery and never mutated; a changed
//! resource is read back as a new value.

use std::collections::{BTreeMap, BTreeSet};

use driftless_common::{
    project::{Taint, ThroughputMode},
    tags::Tags,
};

/// Lifecycle status shared by EKS (`ACTIVE`) and EFS (`available`) resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceStatus {
    Creating,
    Active,
    Updating,
    Deleting,
    Deleted,
    Failed,
    Other(String),
}

impl ResourceStatus {
    pub fn from_api(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "CREATING" | "PENDING" => ResourceStatus::Creating,
            "ACTIVE" | "AVAILABLE" => ResourceStatus::Active,
            "UPDATING" => ResourceStatus::Updating,
            "DELETING" => ResourceStatus::Deleting,
            "DELETED" => ResourceStatus::Deleted,
            "FAILED" | "CREATE_FAILED" | "DELETE_FAILED" | "DEGRADED" | "ERROR" => {
                ResourceStatus::Failed
            }
            _ => ResourceStatus::Other(status.to_string()),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ResourceStatus::Active)
    }

    /// Deletion has been requested or has completed.
    pub fn is_going_away(&self) -> bool {
        matches!(self, ResourceStatus::Deleting | ResourceStatus::Deleted)
    }
}

// ---- network ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vpc {
    pub id: String,
    pub cidr_block: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub id: String,
    pub vpc_id: String,
    pub availability_zone: String,
    pub cidr_block: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternetGateway {
    pub id: String,
    pub vpc_id: Option<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    pub id: String,
    pub vpc_id: String,
    pub association_ids: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatGateway {
    pub id: String,
    pub vpc_id: String,
    pub status: ResourceStatus,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticIp {
    pub allocation_id: String,
    pub association_id: Option<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkState {
    pub vpc: Vpc,
    pub subnets: Vec<Subnet>,
    pub internet_gateway: Option<InternetGateway>,
    pub route_table: Option<RouteTable>,
}

impl NetworkState {
    /// Zones covered by the subnets, sorted.
    pub fn availability_zones(&self) -> Vec<String> {
        let zones: BTreeSet<_> = self
            .subnets
            .iter()
            .map(|s| s.availability_zone.clone())
            .collect();
        zones.into_iter().collect()
    }

    pub fn subnet_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.subnets.iter().map(|s| s.id.clone()).collect();
        ids.sort();
        ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub cidr_block: String,
    pub availability_zones: Vec<String>,
    pub tags: Tags,
}

// ---- identity ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleState {
    pub name: String,
    pub arn: String,
    pub trusted_service: String,
    pub permissions_boundary: Option<String>,
    pub managed_policies: BTreeSet<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSpec {
    pub name: String,
    pub path: String,
    pub trusted_service: String,
    pub permissions_boundary: Option<String>,
    pub managed_policies: BTreeSet<String>,
    pub tags: Tags,
}

// ---- managed cluster ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterState {
    pub name: String,
    pub arn: String,
    pub status: ResourceStatus,
    pub version: String,
    pub role_arn: String,
    pub subnet_ids: Vec<String>,
    pub kms_key_arn: Option<String>,
    pub endpoint_public_access: bool,
    pub endpoint_private_access: bool,
    pub enabled_log_types: BTreeSet<String>,
    pub endpoint: Option<String>,
    pub certificate_authority: Option<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub name: String,
    pub version: String,
    pub role_arn: String,
    pub subnet_ids: Vec<String>,
    pub kms_key_arn: Option<String>,
    pub endpoint_public_access: bool,
    pub endpoint_private_access: bool,
    pub enabled_log_types: BTreeSet<String>,
    pub tags: Tags,
}

// ---- node pools ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scaling {
    pub min: u32,
    pub max: u32,
    pub desired: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePoolState {
    pub name: String,
    pub status: ResourceStatus,
    pub instance_type: String,
    pub gpu: bool,
    pub spot: bool,
    pub disk_size: u32,
    pub scaling: Scaling,
    pub labels: BTreeMap<String, String>,
    pub taints: BTreeSet<Taint>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePoolSpec {
    pub name: String,
    pub instance_type: String,
    pub gpu: bool,
    pub spot: bool,
    pub disk_size: u32,
    pub min_size: u32,
    pub max_size: u32,
    pub labels: BTreeMap<String, String>,
    pub taints: BTreeSet<Taint>,
    pub subnet_ids: Vec<String>,
    pub node_role_arn: String,
    pub tags: Tags,
}

// ---- shared storage ----

#[derive(Debug, Clone, PartialEq)]
pub struct FileSystem {
    pub id: String,
    pub status: ResourceStatus,
    pub encrypted: bool,
    pub throughput_mode: ThroughputMode,
    pub provisioned_throughput_mibps: Option<f64>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTarget {
    pub id: String,
    pub file_system_id: String,
    pub subnet_id: String,
    pub status: ResourceStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageState {
    pub file_system: FileSystem,
    pub mount_targets: Vec<MountTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageSpec {
    pub encrypted: bool,
    pub throughput_mode: ThroughputMode,
    pub provisioned_throughput_mibps: Option<f64>,
    pub subnet_ids: Vec<String>,
    pub tags: Tags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_eks_and_efs() {
        assert!(ResourceStatus::from_api("ACTIVE").is_active());
        assert!(ResourceStatus::from_api("available").is_active());
        assert!(ResourceStatus::from_api("deleting").is_going_away());
        assert_eq!(
            ResourceStatus::from_api("CREATE_FAILED"),
            ResourceStatus::Failed
        );
        assert_eq!(
            ResourceStatus::from_api("odd"),
            ResourceStatus::Other("odd".to_string())
        );
    }
}
