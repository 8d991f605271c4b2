//! In-memory AWS used by the tests. Every call is recorded, mutations apply
//! immediately, and any call can be made to fail on demand.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use driftless_common::{
    project::{AwsSettings, ThroughputMode},
    tags::{ClusterTags, Tags},
    DriftResult,
};
use parking_lot::{Mutex, MutexGuard};

use super::{
    clients::{
        AwsClientFactory, AwsClients, ClusterUpdate, EksApi, IamApi, NetworkApi, NodePoolUpdate,
        StorageApi,
    },
    state::{
        ClusterSpec, ClusterState, ElasticIp, FileSystem, InternetGateway, MountTarget,
        NatGateway, NodePoolSpec, NodePoolState, ResourceStatus, RoleSpec, RoleState, RouteTable,
        Scaling, StorageSpec, Subnet, Vpc,
    },
};

const ACCOUNT: &str = "123456789012";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub target: String,
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        [
            "create_", "delete_", "update_", "tag_", "attach_", "detach_", "set_", "release_",
        ]
        .iter()
        .any(|prefix| self.op.starts_with(prefix))
    }
}

impl std::fmt::Display for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.op, self.target)
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub vpcs: BTreeMap<String, Vpc>,
    pub subnets: BTreeMap<String, Subnet>,
    pub internet_gateways: BTreeMap<String, InternetGateway>,
    pub route_tables: BTreeMap<String, RouteTable>,
    pub nat_gateways: BTreeMap<String, NatGateway>,
    pub elastic_ips: BTreeMap<String, ElasticIp>,
    /// Role name to (path, state).
    pub roles: BTreeMap<String, (String, RoleState)>,
    pub clusters: BTreeMap<String, ClusterState>,
    /// (cluster, pool) to state.
    pub node_pools: BTreeMap<(String, String), NodePoolState>,
    pub file_systems: BTreeMap<String, FileSystem>,
    pub mount_targets: BTreeMap<String, MountTarget>,
    next_id: u64,
}

impl FakeState {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:04}", self.next_id)
    }
}

#[derive(Debug, Default)]
pub struct FakeCloud {
    state: Mutex<FakeState>,
    calls: Mutex<Vec<Call>>,
    failing: Mutex<BTreeSet<String>>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn clients(self: &Arc<Self>) -> AwsClients {
        AwsClients {
            network: self.clone(),
            iam: self.clone(),
            eks: self.clone(),
            storage: self.clone(),
        }
    }

    pub fn factory(self: &Arc<Self>) -> Arc<dyn AwsClientFactory> {
        Arc::new(FakeFactory(self.clone()))
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Makes every call of `op` on `target` fail. `*` matches any target.
    pub fn fail_on(&self, op: &str, target: &str) {
        self.failing.lock().insert(format!("{op} {target}"));
    }

    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    fn record(&self, op: &'static str, target: &str) -> Result<()> {
        self.calls.lock().push(Call {
            op,
            target: target.to_string(),
        });
        let failing = self.failing.lock();
        if failing.contains(&format!("{op} {target}")) || failing.contains(&format!("{op} *")) {
            bail!("injected failure: {op} {target}");
        }
        Ok(())
    }
}

struct FakeFactory(Arc<FakeCloud>);

impl AwsClientFactory for FakeFactory {
    fn clients(&self, _settings: &AwsSettings) -> DriftResult<AwsClients> {
        Ok(self.0.clients())
    }
}

fn owned<'a, T: Clone + 'a>(
    items: impl IntoIterator<Item = &'a T>,
    tags: &ClusterTags,
    tags_of: impl Fn(&T) -> &Tags,
) -> Vec<T> {
    items
        .into_iter()
        .filter(|item| tags.owns(tags_of(item)))
        .cloned()
        .collect()
}

#[async_trait]
impl NetworkApi for FakeCloud {
    async fn list_vpcs(&self, tags: &ClusterTags) -> Result<Vec<Vpc>> {
        self.record("list_vpcs", tags.cluster())?;
        Ok(owned(self.state.lock().vpcs.values(), tags, |v| &v.tags))
    }

    async fn create_vpc(&self, cidr_block: &str, tags: &Tags) -> Result<Vpc> {
        self.record("create_vpc", cidr_block)?;
        let mut state = self.state.lock();
        let vpc = Vpc {
            id: state.id("vpc"),
            cidr_block: cidr_block.to_string(),
            tags: tags.clone(),
        };
        state.vpcs.insert(vpc.id.clone(), vpc.clone());
        Ok(vpc)
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        self.record("delete_vpc", vpc_id)?;
        let mut state = self.state.lock();
        if state.subnets.values().any(|s| s.vpc_id == vpc_id) {
            bail!("DependencyViolation: vpc {vpc_id} still has subnets");
        }
        state
            .vpcs
            .remove(vpc_id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("InvalidVpcID.NotFound: {vpc_id}"))
    }

    async fn tag_resource(&self, resource_id: &str, tags: &Tags) -> Result<()> {
        self.record("tag_resource", resource_id)?;
        let mut state = self.state.lock();
        let target = if let Some(v) = state.vpcs.get_mut(resource_id) {
            &mut v.tags
        } else if let Some(s) = state.subnets.get_mut(resource_id) {
            &mut s.tags
        } else {
            bail!("InvalidID: {resource_id}");
        };
        target.extend(tags.clone());
        Ok(())
    }

    async fn list_subnets(&self, tags: &ClusterTags) -> Result<Vec<Subnet>> {
        self.record("list_subnets", tags.cluster())?;
        Ok(owned(self.state.lock().subnets.values(), tags, |s| &s.tags))
    }

    async fn create_subnet(
        &self,
        vpc_id: &str,
        availability_zone: &str,
        cidr_block: &str,
        tags: &Tags,
    ) -> Result<Subnet> {
        self.record("create_subnet", availability_zone)?;
        let mut state = self.state.lock();
        let subnet = Subnet {
            id: state.id("subnet"),
            vpc_id: vpc_id.to_string(),
            availability_zone: availability_zone.to_string(),
            cidr_block: cidr_block.to_string(),
            tags: tags.clone(),
        };
        state.subnets.insert(subnet.id.clone(), subnet.clone());
        Ok(subnet)
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        self.record("delete_subnet", subnet_id)?;
        self.state
            .lock()
            .subnets
            .remove(subnet_id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("InvalidSubnetID.NotFound: {subnet_id}"))
    }

    async fn list_internet_gateways(&self, tags: &ClusterTags) -> Result<Vec<InternetGateway>> {
        self.record("list_internet_gateways", tags.cluster())?;
        Ok(owned(
            self.state.lock().internet_gateways.values(),
            tags,
            |g| &g.tags,
        ))
    }

    async fn create_internet_gateway(&self, vpc_id: &str, tags: &Tags) -> Result<InternetGateway> {
        self.record("create_internet_gateway", vpc_id)?;
        let mut state = self.state.lock();
        let gateway = InternetGateway {
            id: state.id("igw"),
            vpc_id: Some(vpc_id.to_string()),
            tags: tags.clone(),
        };
        state
            .internet_gateways
            .insert(gateway.id.clone(), gateway.clone());
        Ok(gateway)
    }

    async fn delete_internet_gateway(&self, gateway: &InternetGateway) -> Result<()> {
        self.record("delete_internet_gateway", &gateway.id)?;
        self.state.lock().internet_gateways.remove(&gateway.id);
        Ok(())
    }

    async fn list_route_tables(&self, tags: &ClusterTags) -> Result<Vec<RouteTable>> {
        self.record("list_route_tables", tags.cluster())?;
        Ok(owned(self.state.lock().route_tables.values(), tags, |t| {
            &t.tags
        }))
    }

    async fn create_route_table(
        &self,
        vpc_id: &str,
        _gateway_id: &str,
        subnet_ids: &[String],
        tags: &Tags,
    ) -> Result<RouteTable> {
        self.record("create_route_table", vpc_id)?;
        let mut state = self.state.lock();
        let association_ids = subnet_ids.iter().map(|_| state.id("rtbassoc")).collect();
        let table = RouteTable {
            id: state.id("rtb"),
            vpc_id: vpc_id.to_string(),
            association_ids,
            tags: tags.clone(),
        };
        state.route_tables.insert(table.id.clone(), table.clone());
        Ok(table)
    }

    async fn delete_route_table(&self, table: &RouteTable) -> Result<()> {
        self.record("delete_route_table", &table.id)?;
        self.state.lock().route_tables.remove(&table.id);
        Ok(())
    }

    async fn list_nat_gateways(&self, tags: &ClusterTags) -> Result<Vec<NatGateway>> {
        self.record("list_nat_gateways", tags.cluster())?;
        Ok(owned(self.state.lock().nat_gateways.values(), tags, |g| {
            &g.tags
        }))
    }

    async fn delete_nat_gateway(&self, gateway_id: &str) -> Result<()> {
        self.record("delete_nat_gateway", gateway_id)?;
        let mut state = self.state.lock();
        let gateway = state
            .nat_gateways
            .get_mut(gateway_id)
            .ok_or_else(|| anyhow!("NatGatewayNotFound: {gateway_id}"))?;
        gateway.status = ResourceStatus::Deleted;
        Ok(())
    }

    async fn list_elastic_ips(&self, tags: &ClusterTags) -> Result<Vec<ElasticIp>> {
        self.record("list_elastic_ips", tags.cluster())?;
        Ok(owned(self.state.lock().elastic_ips.values(), tags, |a| {
            &a.tags
        }))
    }

    async fn release_elastic_ip(&self, address: &ElasticIp) -> Result<()> {
        self.record("release_elastic_ip", &address.allocation_id)?;
        self.state.lock().elastic_ips.remove(&address.allocation_id);
        Ok(())
    }
}

#[async_trait]
impl IamApi for FakeCloud {
    async fn get_role(&self, name: &str) -> Result<Option<RoleState>> {
        self.record("get_role", name)?;
        Ok(self.state.lock().roles.get(name).map(|(_, r)| r.clone()))
    }

    async fn list_roles(&self, path_prefix: &str) -> Result<Vec<RoleState>> {
        self.record("list_roles", path_prefix)?;
        Ok(self
            .state
            .lock()
            .roles
            .values()
            .filter(|(path, _)| path.starts_with(path_prefix))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn create_role(&self, spec: &RoleSpec) -> Result<RoleState> {
        self.record("create_role", &spec.name)?;
        let mut state = self.state.lock();
        if state.roles.contains_key(&spec.name) {
            bail!("EntityAlreadyExists: {}", spec.name);
        }
        let role = RoleState {
            name: spec.name.clone(),
            arn: format!("arn:aws:iam::{ACCOUNT}:role{}{}", spec.path, spec.name),
            trusted_service: spec.trusted_service.clone(),
            permissions_boundary: spec.permissions_boundary.clone(),
            managed_policies: BTreeSet::new(),
            tags: spec.tags.clone(),
        };
        state
            .roles
            .insert(spec.name.clone(), (spec.path.clone(), role.clone()));
        Ok(role)
    }

    async fn set_permissions_boundary(&self, role: &str, boundary: Option<&str>) -> Result<()> {
        self.record("set_permissions_boundary", role)?;
        let mut state = self.state.lock();
        let (_, r) = state
            .roles
            .get_mut(role)
            .ok_or_else(|| anyhow!("NoSuchEntity: {role}"))?;
        r.permissions_boundary = boundary.map(str::to_string);
        Ok(())
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        self.record("attach_role_policy", role)?;
        let mut state = self.state.lock();
        let (_, r) = state
            .roles
            .get_mut(role)
            .ok_or_else(|| anyhow!("NoSuchEntity: {role}"))?;
        r.managed_policies.insert(policy_arn.to_string());
        Ok(())
    }

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        self.record("detach_role_policy", role)?;
        let mut state = self.state.lock();
        let (_, r) = state
            .roles
            .get_mut(role)
            .ok_or_else(|| anyhow!("NoSuchEntity: {role}"))?;
        r.managed_policies.remove(policy_arn);
        Ok(())
    }

    async fn delete_role(&self, role: &str) -> Result<()> {
        self.record("delete_role", role)?;
        let mut state = self.state.lock();
        match state.roles.get(role) {
            None => bail!("NoSuchEntity: {role}"),
            Some((_, r)) if !r.managed_policies.is_empty() => {
                bail!("DeleteConflict: {role} still has attached policies")
            }
            Some(_) => {
                state.roles.remove(role);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl EksApi for FakeCloud {
    async fn list_clusters(&self, tags: &ClusterTags) -> Result<Vec<ClusterState>> {
        self.record("list_clusters", tags.cluster())?;
        Ok(owned(self.state.lock().clusters.values(), tags, |c| {
            &c.tags
        }))
    }

    async fn describe_cluster(&self, name: &str) -> Result<Option<ClusterState>> {
        self.record("describe_cluster", name)?;
        Ok(self.state.lock().clusters.get(name).cloned())
    }

    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<ClusterState> {
        self.record("create_cluster", &spec.name)?;
        let mut state = self.state.lock();
        if state.clusters.contains_key(&spec.name) {
            bail!("ResourceInUseException: cluster {} exists", spec.name);
        }
        let cluster = ClusterState {
            name: spec.name.clone(),
            arn: format!("arn:aws:eks:us-west-2:{ACCOUNT}:cluster/{}", spec.name),
            status: ResourceStatus::Active,
            version: spec.version.clone(),
            role_arn: spec.role_arn.clone(),
            subnet_ids: spec.subnet_ids.clone(),
            kms_key_arn: spec.kms_key_arn.clone(),
            endpoint_public_access: spec.endpoint_public_access,
            endpoint_private_access: spec.endpoint_private_access,
            enabled_log_types: spec.enabled_log_types.clone(),
            endpoint: Some(format!("https://{}.eks.example.test", spec.name)),
            certificate_authority: Some("ZmFrZS1jYQ==".to_string()),
            tags: spec.tags.clone(),
        };
        state.clusters.insert(spec.name.clone(), cluster.clone());
        Ok(cluster)
    }

    async fn update_cluster(&self, name: &str, update: &ClusterUpdate) -> Result<()> {
        self.record("update_cluster", &format!("{name} {}", update.field()))?;
        let mut state = self.state.lock();
        let cluster = state
            .clusters
            .get_mut(name)
            .ok_or_else(|| anyhow!("ResourceNotFoundException: {name}"))?;
        match update {
            ClusterUpdate::Version(version) => cluster.version = version.clone(),
            ClusterUpdate::EndpointAccess { public, private } => {
                cluster.endpoint_public_access = *public;
                cluster.endpoint_private_access = *private;
            }
            ClusterUpdate::Logging { enable, disable } => {
                cluster.enabled_log_types.extend(enable.iter().cloned());
                for t in disable {
                    cluster.enabled_log_types.remove(t);
                }
            }
        }
        Ok(())
    }

    async fn tag_resource(&self, arn: &str, tags: &Tags) -> Result<()> {
        self.record("tag_resource", arn)?;
        let mut state = self.state.lock();
        let cluster = state
            .clusters
            .values_mut()
            .find(|c| c.arn == arn)
            .ok_or_else(|| anyhow!("ResourceNotFoundException: {arn}"))?;
        cluster.tags.extend(tags.clone());
        Ok(())
    }

    async fn delete_cluster(&self, name: &str) -> Result<()> {
        self.record("delete_cluster", name)?;
        let mut state = self.state.lock();
        if state.node_pools.keys().any(|(cluster, _)| cluster == name) {
            bail!("ResourceInUseException: cluster {name} has node groups attached");
        }
        state
            .clusters
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| anyhow!("ResourceNotFoundException: {name}"))
    }

    async fn list_node_pools(&self, cluster: &str) -> Result<Vec<NodePoolState>> {
        self.record("list_node_pools", cluster)?;
        Ok(self
            .state
            .lock()
            .node_pools
            .iter()
            .filter(|((c, _), _)| c == cluster)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn describe_node_pool(
        &self,
        cluster: &str,
        name: &str,
    ) -> Result<Option<NodePoolState>> {
        self.record("describe_node_pool", name)?;
        Ok(self
            .state
            .lock()
            .node_pools
            .get(&(cluster.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_node_pool(&self, cluster: &str, spec: &NodePoolSpec) -> Result<NodePoolState> {
        self.record("create_node_pool", &spec.name)?;
        let pool = NodePoolState {
            name: spec.name.clone(),
            status: ResourceStatus::Active,
            instance_type: spec.instance_type.clone(),
            gpu: spec.gpu,
            spot: spec.spot,
            disk_size: spec.disk_size,
            scaling: Scaling {
                min: spec.min_size,
                max: spec.max_size,
                desired: spec.min_size,
            },
            labels: spec.labels.clone(),
            taints: spec.taints.clone(),
            tags: spec.tags.clone(),
        };
        self.state
            .lock()
            .node_pools
            .insert((cluster.to_string(), spec.name.clone()), pool.clone());
        Ok(pool)
    }

    async fn update_node_pool(
        &self,
        cluster: &str,
        name: &str,
        update: &NodePoolUpdate,
    ) -> Result<()> {
        self.record("update_node_pool", &format!("{name} {}", update.field()))?;
        let mut state = self.state.lock();
        let pool = state
            .node_pools
            .get_mut(&(cluster.to_string(), name.to_string()))
            .ok_or_else(|| anyhow!("ResourceNotFoundException: {name}"))?;
        match update {
            NodePoolUpdate::Scaling(scaling) => pool.scaling = *scaling,
            NodePoolUpdate::Labels { add, remove } => {
                pool.labels.extend(add.clone());
                for key in remove {
                    pool.labels.remove(key);
                }
            }
            NodePoolUpdate::Taints { add, remove } => {
                pool.taints.extend(add.iter().cloned());
                for taint in remove {
                    pool.taints.remove(taint);
                }
            }
        }
        Ok(())
    }

    async fn delete_node_pool(&self, cluster: &str, name: &str) -> Result<()> {
        self.record("delete_node_pool", name)?;
        self.state
            .lock()
            .node_pools
            .remove(&(cluster.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| anyhow!("ResourceNotFoundException: {name}"))
    }
}

#[async_trait]
impl StorageApi for FakeCloud {
    async fn list_file_systems(&self, tags: &ClusterTags) -> Result<Vec<FileSystem>> {
        self.record("list_file_systems", tags.cluster())?;
        Ok(owned(self.state.lock().file_systems.values(), tags, |f| {
            &f.tags
        }))
    }

    async fn create_file_system(&self, spec: &StorageSpec) -> Result<FileSystem> {
        self.record("create_file_system", "")?;
        let mut state = self.state.lock();
        let fs = FileSystem {
            id: state.id("fs"),
            status: ResourceStatus::Active,
            encrypted: spec.encrypted,
            throughput_mode: spec.throughput_mode,
            provisioned_throughput_mibps: spec.provisioned_throughput_mibps,
            tags: spec.tags.clone(),
        };
        state.file_systems.insert(fs.id.clone(), fs.clone());
        Ok(fs)
    }

    async fn update_throughput(
        &self,
        file_system_id: &str,
        mode: ThroughputMode,
        provisioned_mibps: Option<f64>,
    ) -> Result<()> {
        self.record("update_throughput", file_system_id)?;
        let mut state = self.state.lock();
        let fs = state
            .file_systems
            .get_mut(file_system_id)
            .ok_or_else(|| anyhow!("FileSystemNotFound: {file_system_id}"))?;
        fs.throughput_mode = mode;
        fs.provisioned_throughput_mibps = provisioned_mibps;
        Ok(())
    }

    async fn delete_file_system(&self, file_system_id: &str) -> Result<()> {
        self.record("delete_file_system", file_system_id)?;
        let mut state = self.state.lock();
        if state
            .mount_targets
            .values()
            .any(|m| m.file_system_id == file_system_id)
        {
            bail!("FileSystemInUse: {file_system_id} has mount targets");
        }
        state
            .file_systems
            .remove(file_system_id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("FileSystemNotFound: {file_system_id}"))
    }

    async fn list_mount_targets(&self, file_system_id: &str) -> Result<Vec<MountTarget>> {
        self.record("list_mount_targets", file_system_id)?;
        Ok(self
            .state
            .lock()
            .mount_targets
            .values()
            .filter(|m| m.file_system_id == file_system_id)
            .cloned()
            .collect())
    }

    async fn create_mount_target(
        &self,
        file_system_id: &str,
        subnet_id: &str,
    ) -> Result<MountTarget> {
        self.record("create_mount_target", subnet_id)?;
        let mut state = self.state.lock();
        let target = MountTarget {
            id: state.id("fsmt"),
            file_system_id: file_system_id.to_string(),
            subnet_id: subnet_id.to_string(),
            status: ResourceStatus::Active,
        };
        state.mount_targets.insert(target.id.clone(), target.clone());
        Ok(target)
    }

    async fn delete_mount_target(&self, mount_target_id: &str) -> Result<()> {
        self.record("delete_mount_target", mount_target_id)?;
        self.state.lock().mount_targets.remove(mount_target_id);
        Ok(())
    }
}
