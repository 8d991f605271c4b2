//! Narrow capability traits over the AWS API surfaces the reconcilers use.
//!
//! Every list call is scoped by the cluster tag pair. Implementations return
//! `anyhow` errors; the reconcilers attach resource context.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use driftless_common::{
    project::{AwsSettings, Taint, ThroughputMode},
    tags::{ClusterTags, Tags},
    DriftResult,
};

use super::state::{
    ClusterSpec, ClusterState, ElasticIp, FileSystem, InternetGateway, MountTarget, NatGateway,
    NodePoolSpec, NodePoolState, RoleSpec, RoleState, RouteTable, Scaling, StorageSpec, Subnet,
    Vpc,
};

/// One in-place change to a managed cluster. Each variant is one API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterUpdate {
    Version(String),
    EndpointAccess { public: bool, private: bool },
    Logging { enable: Vec<String>, disable: Vec<String> },
}

impl ClusterUpdate {
    pub fn field(&self) -> &'static str {
        match self {
            ClusterUpdate::Version(_) => "kubernetes_version",
            ClusterUpdate::EndpointAccess { .. } => "endpoint_access",
            ClusterUpdate::Logging { .. } => "logging",
        }
    }
}

/// One in-place change to a node pool. Each variant is one API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodePoolUpdate {
    Scaling(Scaling),
    Labels {
        add: BTreeMap<String, String>,
        remove: Vec<String>,
    },
    Taints {
        add: Vec<Taint>,
        remove: Vec<Taint>,
    },
}

impl NodePoolUpdate {
    pub fn field(&self) -> &'static str {
        match self {
            NodePoolUpdate::Scaling(_) => "scaling",
            NodePoolUpdate::Labels { .. } => "labels",
            NodePoolUpdate::Taints { .. } => "taints",
        }
    }
}

#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn list_vpcs(&self, tags: &ClusterTags) -> Result<Vec<Vpc>>;
    async fn create_vpc(&self, cidr_block: &str, tags: &Tags) -> Result<Vpc>;
    async fn delete_vpc(&self, vpc_id: &str) -> Result<()>;
    /// Adds or overwrites tags on any EC2 resource.
    async fn tag_resource(&self, resource_id: &str, tags: &Tags) -> Result<()>;

    async fn list_subnets(&self, tags: &ClusterTags) -> Result<Vec<Subnet>>;
    async fn create_subnet(
        &self,
        vpc_id: &str,
        availability_zone: &str,
        cidr_block: &str,
        tags: &Tags,
    ) -> Result<Subnet>;
    async fn delete_subnet(&self, subnet_id: &str) -> Result<()>;

    async fn list_internet_gateways(&self, tags: &ClusterTags) -> Result<Vec<InternetGateway>>;
    /// Creates the gateway and attaches it to `vpc_id`.
    async fn create_internet_gateway(&self, vpc_id: &str, tags: &Tags) -> Result<InternetGateway>;
    /// Detaches the gateway if attached, then deletes it.
    async fn delete_internet_gateway(&self, gateway: &InternetGateway) -> Result<()>;

    async fn list_route_tables(&self, tags: &ClusterTags) -> Result<Vec<RouteTable>>;
    /// Creates a table with a default route through `gateway_id`, associated
    /// with every subnet in `subnet_ids`.
    async fn create_route_table(
        &self,
        vpc_id: &str,
        gateway_id: &str,
        subnet_ids: &[String],
        tags: &Tags,
    ) -> Result<RouteTable>;
    /// Removes the associations, then deletes the table.
    async fn delete_route_table(&self, table: &RouteTable) -> Result<()>;

    async fn list_nat_gateways(&self, tags: &ClusterTags) -> Result<Vec<NatGateway>>;
    async fn delete_nat_gateway(&self, gateway_id: &str) -> Result<()>;

    async fn list_elastic_ips(&self, tags: &ClusterTags) -> Result<Vec<ElasticIp>>;
    async fn release_elastic_ip(&self, address: &ElasticIp) -> Result<()>;
}

#[async_trait]
pub trait IamApi: Send + Sync {
    async fn get_role(&self, name: &str) -> Result<Option<RoleState>>;
    async fn list_roles(&self, path_prefix: &str) -> Result<Vec<RoleState>>;
    /// Creates the role with its trust policy, boundary and tags. Managed
    /// policies are attached separately.
    async fn create_role(&self, spec: &RoleSpec) -> Result<RoleState>;
    /// `None` removes the boundary.
    async fn set_permissions_boundary(&self, role: &str, boundary: Option<&str>) -> Result<()>;
    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()>;
    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()>;
    async fn delete_role(&self, role: &str) -> Result<()>;
}

#[async_trait]
pub trait EksApi: Send + Sync {
    async fn list_clusters(&self, tags: &ClusterTags) -> Result<Vec<ClusterState>>;
    async fn describe_cluster(&self, name: &str) -> Result<Option<ClusterState>>;
    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<ClusterState>;
    async fn update_cluster(&self, name: &str, update: &ClusterUpdate) -> Result<()>;
    async fn tag_resource(&self, arn: &str, tags: &Tags) -> Result<()>;
    async fn delete_cluster(&self, name: &str) -> Result<()>;

    async fn list_node_pools(&self, cluster: &str) -> Result<Vec<NodePoolState>>;
    async fn describe_node_pool(&self, cluster: &str, name: &str)
        -> Result<Option<NodePoolState>>;
    async fn create_node_pool(&self, cluster: &str, spec: &NodePoolSpec) -> Result<NodePoolState>;
    async fn update_node_pool(&self, cluster: &str, name: &str, update: &NodePoolUpdate)
        -> Result<()>;
    async fn delete_node_pool(&self, cluster: &str, name: &str) -> Result<()>;
}

#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn list_file_systems(&self, tags: &ClusterTags) -> Result<Vec<FileSystem>>;
    async fn create_file_system(&self, spec: &StorageSpec) -> Result<FileSystem>;
    async fn update_throughput(
        &self,
        file_system_id: &str,
        mode: ThroughputMode,
        provisioned_mibps: Option<f64>,
    ) -> Result<()>;
    async fn delete_file_system(&self, file_system_id: &str) -> Result<()>;

    async fn list_mount_targets(&self, file_system_id: &str) -> Result<Vec<MountTarget>>;
    async fn create_mount_target(&self, file_system_id: &str, subnet_id: &str)
        -> Result<MountTarget>;
    async fn delete_mount_target(&self, mount_target_id: &str) -> Result<()>;
}

/// The client set one reconciliation pass runs against.
#[derive(Clone)]
pub struct AwsClients {
    pub network: Arc<dyn NetworkApi>,
    pub iam: Arc<dyn IamApi>,
    pub eks: Arc<dyn EksApi>,
    pub storage: Arc<dyn StorageApi>,
}

/// Builds the clients for a region and credential set.
pub trait AwsClientFactory: Send + Sync {
    fn clients(&self, settings: &AwsSettings) -> DriftResult<AwsClients>;
}
