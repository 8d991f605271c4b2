//! Teardown in reverse dependency order, followed by the orphan sweep.
//!
//! Order: shared storage (mount targets, then filesystem), node pools,
//! managed cluster, IAM roles, then the network itself (NAT gateways,
//! elastic IPs, subnets, internet gateways, route tables, VPCs).
//!
//! In strict mode the first failure aborts the sequence. In force mode every
//! step is attempted and failures are collected. The sweep then re-discovers
//! everything carrying the cluster tags and deletes what is left, a bounded
//! number of times.

use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
};

use driftless_common::{
    poll_until, DriftError, DriftResult, OpContext, ResourceFailure, ResourceKind, ResourceRef,
    UpstreamContext,
};
use tracing::{info, warn};

use super::{
    cluster, iam, node_pools,
    state::{
        ClusterState, ElasticIp, FileSystem, InternetGateway, NatGateway, ResourceStatus,
        RoleState, RouteTable, StorageState, Subnet, Vpc,
    },
    storage, AwsSession,
};
use crate::{provider::DestroyOptions, reconcile::Discovered};

struct Teardown<'a> {
    ctx: &'a OpContext,
    force: bool,
    failures: Vec<ResourceFailure>,
}

impl<'a> Teardown<'a> {
    fn new(ctx: &'a OpContext, force: bool) -> Self {
        Self {
            ctx,
            force,
            failures: Vec::new(),
        }
    }

    /// Runs one step. `Ok(None)` means the step failed and force mode
    /// recorded the failure.
    async fn step<T, F>(
        &mut self,
        resource: ResourceRef,
        action: &str,
        fut: F,
    ) -> DriftResult<Option<T>>
    where
        F: Future<Output = DriftResult<T>>,
    {
        match self
            .ctx
            .track(resource.kind, action, &resource.identity, fut)
            .await
        {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_cancelled() || !self.force => Err(e),
            Err(e) => {
                warn!(resource = %resource, action, error = %e, "destroy step failed, continuing");
                self.failures.push(ResourceFailure::new(resource, e));
                Ok(None)
            }
        }
    }
}

pub async fn run(s: &AwsSession<'_>, options: &DestroyOptions) -> DriftResult<()> {
    let mut teardown = Teardown::new(s.ctx, options.force);
    let identity = s.tags.describe();

    // shared storage
    let found = teardown
        .step(
            ResourceRef::new(ResourceKind::SharedStorage, &identity),
            "discover",
            storage::discover(s),
        )
        .await?;
    if let Some(Discovered::Found(state)) = found {
        let resource = ResourceRef::new(ResourceKind::SharedStorage, &state.file_system.id);
        teardown
            .step(resource, "delete", storage::delete(s, &state))
            .await?;
    }

    // node pools, then the control plane
    let found = teardown
        .step(
            ResourceRef::new(ResourceKind::ManagedCluster, &identity),
            "discover",
            cluster::discover(s),
        )
        .await?;
    if let Some(Discovered::Found(state)) = found {
        delete_cluster(s, &mut teardown, &state).await?;
    }

    // identity roles
    for name in [
        iam::cluster_role_name(s.tags.cluster()),
        iam::node_role_name(s.tags.cluster()),
    ] {
        let resource = ResourceRef::new(ResourceKind::IdentityRole, &name);
        let found = teardown
            .step(resource.clone(), "discover", async {
                s.clients
                    .iam
                    .get_role(&name)
                    .await
                    .upstream(ResourceKind::IdentityRole, &name, "get")
            })
            .await?
            .flatten();
        match found {
            Some(role) if s.tags.owns(&role.tags) => {
                teardown
                    .step(resource, "delete", iam::delete(s, &role))
                    .await?;
            }
            Some(_) => warn!(role = %name, "role is not managed by driftless, leaving it alone"),
            None => {}
        }
    }

    delete_network(s, &mut teardown).await?;

    let mut failures = teardown.failures;
    let survivors = sweep(s, options).await?;
    let mut seen: BTreeSet<ResourceRef> = failures.iter().map(|f| f.resource.clone()).collect();
    for survivor in survivors {
        if seen.insert(survivor.resource.clone()) {
            failures.push(survivor);
        }
    }

    if failures.is_empty() {
        info!(cluster = s.tags.cluster(), "destroy complete");
        return Ok(());
    }
    Err(DriftError::Aggregate {
        operation: "destroy".to_string(),
        failures,
    })
}

async fn delete_cluster(
    s: &AwsSession<'_>,
    teardown: &mut Teardown<'_>,
    state: &ClusterState,
) -> DriftResult<()> {
    let eks = &s.clients.eks;
    let name = state.name.as_str();

    let pools = teardown
        .step(
            ResourceRef::new(ResourceKind::NodePool, name),
            "discover",
            node_pools::discover(s, name),
        )
        .await?
        .unwrap_or_default();

    let mut deleting = Vec::new();
    for (pool, pool_state) in &pools {
        let resource = ResourceRef::new(ResourceKind::NodePool, pool);
        if pool_state.status.is_going_away() {
            deleting.push(pool_state.name.as_str());
            continue;
        }
        let deleted = teardown
            .step(resource, "delete", async {
                eks.delete_node_pool(name, &pool_state.name)
                    .await
                    .upstream(ResourceKind::NodePool, pool, "delete")
            })
            .await?;
        if deleted.is_some() {
            deleting.push(pool_state.name.as_str());
        }
    }
    for pool in deleting {
        teardown
            .step(
                ResourceRef::new(ResourceKind::NodePool, pool),
                "wait for deletion",
                node_pools::wait_deleted(s, name, pool),
            )
            .await?;
    }

    teardown
        .step(
            ResourceRef::new(ResourceKind::ManagedCluster, name),
            "delete",
            async {
                if !state.status.is_going_away() {
                    eks.delete_cluster(name)
                        .await
                        .upstream(ResourceKind::ManagedCluster, name, "delete")?;
                }
                cluster::wait_deleted(s, name).await
            },
        )
        .await?;
    Ok(())
}

async fn delete_network(s: &AwsSession<'_>, teardown: &mut Teardown<'_>) -> DriftResult<()> {
    let net = &s.clients.network;
    let identity = s.tags.describe();

    let gateways = listed(
        teardown,
        ResourceKind::NatGateway,
        &identity,
        net.list_nat_gateways(s.tags),
        |g: &NatGateway| s.tags.owns(&g.tags) && !g.status.is_going_away(),
    )
    .await?;
    let mut deleted_any = false;
    for gateway in &gateways {
        let resource = ResourceRef::new(ResourceKind::NatGateway, &gateway.id);
        deleted_any |= teardown
            .step(resource, "delete", async {
                net.delete_nat_gateway(&gateway.id)
                    .await
                    .upstream(ResourceKind::NatGateway, &gateway.id, "delete")
            })
            .await?
            .is_some();
    }
    if deleted_any {
        let tags = s.tags;
        teardown
            .step(
                ResourceRef::new(ResourceKind::NatGateway, &identity),
                "wait for deletion",
                poll_until(
                    s.ctx,
                    "nat gateways to be deleted",
                    s.poll.resource_ready(),
                    move || async move {
                        net.list_nat_gateways(tags).await.is_ok_and(|all| {
                            all.iter()
                                .filter(|g| tags.owns(&g.tags))
                                .all(|g| g.status == ResourceStatus::Deleted)
                        })
                    },
                ),
            )
            .await?;
    }

    let addresses = listed(
        teardown,
        ResourceKind::ElasticIp,
        &identity,
        net.list_elastic_ips(s.tags),
        |a: &ElasticIp| s.tags.owns(&a.tags),
    )
    .await?;
    for address in &addresses {
        let resource = ResourceRef::new(ResourceKind::ElasticIp, &address.allocation_id);
        teardown
            .step(resource, "release", async {
                net.release_elastic_ip(address).await.upstream(
                    ResourceKind::ElasticIp,
                    &address.allocation_id,
                    "release",
                )
            })
            .await?;
    }

    let subnets = listed(
        teardown,
        ResourceKind::Subnet,
        &identity,
        net.list_subnets(s.tags),
        |sn: &Subnet| s.tags.owns(&sn.tags),
    )
    .await?;
    for subnet in &subnets {
        let resource = ResourceRef::new(ResourceKind::Subnet, &subnet.id);
        teardown
            .step(resource, "delete", async {
                net.delete_subnet(&subnet.id)
                    .await
                    .upstream(ResourceKind::Subnet, &subnet.id, "delete")
            })
            .await?;
    }

    let gateways = listed(
        teardown,
        ResourceKind::InternetGateway,
        &identity,
        net.list_internet_gateways(s.tags),
        |g: &InternetGateway| s.tags.owns(&g.tags),
    )
    .await?;
    for gateway in &gateways {
        let resource = ResourceRef::new(ResourceKind::InternetGateway, &gateway.id);
        teardown
            .step(resource, "delete", async {
                net.delete_internet_gateway(gateway).await.upstream(
                    ResourceKind::InternetGateway,
                    &gateway.id,
                    "delete",
                )
            })
            .await?;
    }

    let tables = listed(
        teardown,
        ResourceKind::RouteTable,
        &identity,
        net.list_route_tables(s.tags),
        |t: &RouteTable| s.tags.owns(&t.tags),
    )
    .await?;
    for table in &tables {
        let resource = ResourceRef::new(ResourceKind::RouteTable, &table.id);
        teardown
            .step(resource, "delete", async {
                net.delete_route_table(table)
                    .await
                    .upstream(ResourceKind::RouteTable, &table.id, "delete")
            })
            .await?;
    }

    let vpcs = listed(
        teardown,
        ResourceKind::Vpc,
        &identity,
        net.list_vpcs(s.tags),
        |v: &Vpc| s.tags.owns(&v.tags),
    )
    .await?;
    for vpc in &vpcs {
        let resource = ResourceRef::new(ResourceKind::Vpc, &vpc.id);
        teardown
            .step(resource, "delete", async {
                net.delete_vpc(&vpc.id)
                    .await
                    .upstream(ResourceKind::Vpc, &vpc.id, "delete")
            })
            .await?;
    }
    Ok(())
}

/// Lists one network kind as a teardown step, keeping owned entries.
async fn listed<T, F>(
    teardown: &mut Teardown<'_>,
    kind: ResourceKind,
    identity: &str,
    list: F,
    keep: impl Fn(&T) -> bool,
) -> DriftResult<Vec<T>>
where
    F: Future<Output = anyhow::Result<Vec<T>>>,
{
    let all = teardown
        .step(ResourceRef::new(kind, identity), "list", async {
            list.await.upstream(kind, identity, "list")
        })
        .await?
        .unwrap_or_default();
    Ok(all.into_iter().filter(|item| keep(item)).collect())
}

/// A tagged resource found by the sweep.
#[derive(Debug, Clone)]
enum Leftover {
    Storage(StorageState),
    NodePool {
        cluster: String,
        name: String,
        status: ResourceStatus,
    },
    Cluster(ClusterState),
    Role(RoleState),
    NatGateway(NatGateway),
    ElasticIp(ElasticIp),
    Subnet(Subnet),
    InternetGateway(InternetGateway),
    RouteTable(RouteTable),
    Vpc(Vpc),
}

impl Leftover {
    fn resource(&self) -> ResourceRef {
        match self {
            Leftover::Storage(state) => {
                ResourceRef::new(ResourceKind::SharedStorage, &state.file_system.id)
            }
            Leftover::NodePool { name, .. } => ResourceRef::new(ResourceKind::NodePool, name),
            Leftover::Cluster(c) => ResourceRef::new(ResourceKind::ManagedCluster, &c.name),
            Leftover::Role(r) => ResourceRef::new(ResourceKind::IdentityRole, &r.name),
            Leftover::NatGateway(g) => ResourceRef::new(ResourceKind::NatGateway, &g.id),
            Leftover::ElasticIp(a) => ResourceRef::new(ResourceKind::ElasticIp, &a.allocation_id),
            Leftover::Subnet(sn) => ResourceRef::new(ResourceKind::Subnet, &sn.id),
            Leftover::InternetGateway(g) => ResourceRef::new(ResourceKind::InternetGateway, &g.id),
            Leftover::RouteTable(t) => ResourceRef::new(ResourceKind::RouteTable, &t.id),
            Leftover::Vpc(v) => ResourceRef::new(ResourceKind::Vpc, &v.id),
        }
    }

    /// Already being deleted; the next pass will look again.
    fn is_going_away(&self) -> bool {
        match self {
            Leftover::Storage(state) => state.file_system.status.is_going_away(),
            Leftover::NodePool { status, .. } => status.is_going_away(),
            Leftover::Cluster(c) => c.status.is_going_away(),
            Leftover::NatGateway(g) => g.status.is_going_away(),
            _ => false,
        }
    }

    /// Starts the deletion without waiting for it to finish.
    async fn delete(&self, s: &AwsSession<'_>) -> DriftResult<()> {
        let resource = self.resource();
        let id = resource.identity.as_str();
        let c = s.clients;
        match self {
            Leftover::Storage(state) => {
                for target in &state.mount_targets {
                    if !target.status.is_going_away() {
                        c.storage
                            .delete_mount_target(&target.id)
                            .await
                            .upstream(ResourceKind::MountTarget, &target.id, "delete")?;
                    }
                }
                c.storage
                    .delete_file_system(id)
                    .await
                    .upstream(resource.kind, id, "delete")
            }
            Leftover::NodePool { cluster, name, .. } => c
                .eks
                .delete_node_pool(cluster, name)
                .await
                .upstream(resource.kind, id, "delete"),
            Leftover::Cluster(_) => c
                .eks
                .delete_cluster(id)
                .await
                .upstream(resource.kind, id, "delete"),
            Leftover::Role(role) => iam::delete(s, role).await,
            Leftover::NatGateway(_) => c
                .network
                .delete_nat_gateway(id)
                .await
                .upstream(resource.kind, id, "delete"),
            Leftover::ElasticIp(address) => c
                .network
                .release_elastic_ip(address)
                .await
                .upstream(resource.kind, id, "release"),
            Leftover::Subnet(_) => c
                .network
                .delete_subnet(id)
                .await
                .upstream(resource.kind, id, "delete"),
            Leftover::InternetGateway(gateway) => c
                .network
                .delete_internet_gateway(gateway)
                .await
                .upstream(resource.kind, id, "delete"),
            Leftover::RouteTable(table) => c
                .network
                .delete_route_table(table)
                .await
                .upstream(resource.kind, id, "delete"),
            Leftover::Vpc(_) => c
                .network
                .delete_vpc(id)
                .await
                .upstream(resource.kind, id, "delete"),
        }
    }
}

/// One tag-filtered discovery pass over every kind, in teardown order.
/// Listing failures are returned next to whatever could be listed.
async fn inventory(s: &AwsSession<'_>) -> (Vec<Leftover>, Vec<ResourceFailure>) {
    let mut found = Vec::new();
    let mut failures = Vec::new();
    let identity = s.tags.describe();
    let c = s.clients;
    let tags = s.tags;
    let mut failed = |kind: ResourceKind, e: anyhow::Error| {
        failures.push(ResourceFailure::new(
            ResourceRef::new(kind, &identity),
            DriftError::upstream(kind, &identity, "list", e),
        ))
    };

    match c.storage.list_file_systems(tags).await {
        Ok(all) => {
            for fs in all
                .into_iter()
                .filter(|fs: &FileSystem| tags.owns(&fs.tags) && fs.status != ResourceStatus::Deleted)
            {
                // without its mount targets the file system cannot be deleted
                match c.storage.list_mount_targets(&fs.id).await {
                    Ok(mount_targets) => found.push(Leftover::Storage(StorageState {
                        file_system: fs,
                        mount_targets,
                    })),
                    Err(e) => failed(ResourceKind::MountTarget, e),
                }
            }
        }
        Err(e) => failed(ResourceKind::SharedStorage, e),
    }

    match c.eks.list_clusters(tags).await {
        Ok(all) => {
            let clusters: Vec<ClusterState> =
                all.into_iter().filter(|cl| tags.owns(&cl.tags)).collect();
            for cluster in &clusters {
                match c.eks.list_node_pools(&cluster.name).await {
                    Ok(pools) => found.extend(pools.into_iter().filter(|p| tags.owns(&p.tags)).map(
                        |p| Leftover::NodePool {
                            cluster: cluster.name.clone(),
                            name: p.name,
                            status: p.status,
                        },
                    )),
                    Err(e) => failed(ResourceKind::NodePool, e),
                }
            }
            found.extend(clusters.into_iter().map(Leftover::Cluster));
        }
        Err(e) => failed(ResourceKind::ManagedCluster, e),
    }

    match c.iam.list_roles(&iam::role_path(tags.cluster())).await {
        Ok(all) => found.extend(
            all.into_iter()
                .filter(|r| tags.owns(&r.tags))
                .map(Leftover::Role),
        ),
        Err(e) => failed(ResourceKind::IdentityRole, e),
    }

    let net = &c.network;
    match net.list_nat_gateways(tags).await {
        Ok(all) => found.extend(
            all.into_iter()
                .filter(|g| tags.owns(&g.tags) && g.status != ResourceStatus::Deleted)
                .map(Leftover::NatGateway),
        ),
        Err(e) => failed(ResourceKind::NatGateway, e),
    }
    match net.list_elastic_ips(tags).await {
        Ok(all) => found.extend(
            all.into_iter()
                .filter(|a| tags.owns(&a.tags))
                .map(Leftover::ElasticIp),
        ),
        Err(e) => failed(ResourceKind::ElasticIp, e),
    }
    match net.list_subnets(tags).await {
        Ok(all) => found.extend(
            all.into_iter()
                .filter(|sn| tags.owns(&sn.tags))
                .map(Leftover::Subnet),
        ),
        Err(e) => failed(ResourceKind::Subnet, e),
    }
    match net.list_internet_gateways(tags).await {
        Ok(all) => found.extend(
            all.into_iter()
                .filter(|g| tags.owns(&g.tags))
                .map(Leftover::InternetGateway),
        ),
        Err(e) => failed(ResourceKind::InternetGateway, e),
    }
    match net.list_route_tables(tags).await {
        Ok(all) => found.extend(
            all.into_iter()
                .filter(|t| tags.owns(&t.tags))
                .map(Leftover::RouteTable),
        ),
        Err(e) => failed(ResourceKind::RouteTable, e),
    }
    match net.list_vpcs(tags).await {
        Ok(all) => found.extend(
            all.into_iter()
                .filter(|v| tags.owns(&v.tags))
                .map(Leftover::Vpc),
        ),
        Err(e) => failed(ResourceKind::Vpc, e),
    }

    (found, failures)
}

/// Repeats discovery and deletion up to `sweep_passes` times, then checks
/// once more. Returns one failure per resource that is still present, with
/// the last error seen for it. Errors for resources that eventually went
/// away are dropped.
async fn sweep(s: &AwsSession<'_>, options: &DestroyOptions) -> DriftResult<Vec<ResourceFailure>> {
    if options.sweep_passes == 0 {
        return Ok(Vec::new());
    }
    let mut last_errors: BTreeMap<ResourceRef, DriftError> = BTreeMap::new();

    for pass in 1..=options.sweep_passes {
        if pass > 1 {
            s.ctx
                .sleep("orphan sweep interval", options.sweep_interval)
                .await?;
        }
        let (leftovers, listing) = inventory(s).await;
        if leftovers.is_empty() && listing.is_empty() {
            return Ok(Vec::new());
        }
        info!(pass, remaining = leftovers.len(), "orphan sweep");
        for failure in listing {
            last_errors.insert(failure.resource, failure.error);
        }
        for leftover in &leftovers {
            if leftover.is_going_away() {
                continue;
            }
            let resource = leftover.resource();
            match s
                .ctx
                .track(resource.kind, "sweep", &resource.identity, leftover.delete(s))
                .await
            {
                Ok(()) => {
                    last_errors.remove(&resource);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    last_errors.insert(resource, e);
                }
            }
        }
    }

    s.ctx
        .sleep("orphan sweep interval", options.sweep_interval)
        .await?;
    let (remaining, listing) = inventory(s).await;
    let mut survivors: Vec<ResourceFailure> = remaining
        .iter()
        .map(|leftover| {
            let resource = leftover.resource();
            let error = last_errors.remove(&resource).unwrap_or_else(|| {
                DriftError::upstream(
                    resource.kind,
                    &resource.identity,
                    "sweep",
                    anyhow::anyhow!(
                        "still present after {} sweep passes",
                        options.sweep_passes
                    ),
                )
            });
            ResourceFailure::new(resource, error)
        })
        .collect();
    survivors.extend(listing);
    Ok(survivors)
}
