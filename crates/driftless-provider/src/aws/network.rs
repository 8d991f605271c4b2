//! VPC with one public subnet per availability zone, an internet gateway and
//! a single route table.

use driftless_common::{
    project::AwsSettings,
    tags::{missing_tags, ClusterTags},
    DriftError, DriftResult, ResourceKind, UpstreamContext,
};
use ipnet::Ipv4Net;
use tracing::{debug, info};

use super::{
    state::{InternetGateway, NetworkSpec, NetworkState, RouteTable, Subnet, Vpc},
    AwsSession,
};
use crate::reconcile::{Discovered, Immutables};

const SUBNET_PREFIX_BITS: u8 = 4;
const MAX_SUBNET_PREFIX: u8 = 28;

pub fn desired(aws: &AwsSettings, tags: &ClusterTags) -> DriftResult<NetworkSpec> {
    let mut availability_zones = aws.zones();
    availability_zones.sort();
    availability_zones.dedup();
    Ok(NetworkSpec {
        cidr_block: normalize_cidr(&aws.vpc_cidr_block)?,
        availability_zones,
        tags: tags.with_extra(&aws.tags),
    })
}

fn normalize_cidr(cidr: &str) -> DriftResult<String> {
    let net: Ipv4Net = cidr.parse().map_err(|_| {
        DriftError::validation("aws.vpc_cidr_block", format!("`{cidr}` is not an IPv4 CIDR block"))
    })?;
    Ok(net.trunc().to_string())
}

/// Carves `count` equally sized subnets out of `cidr`, in order.
pub fn subnet_cidrs(cidr: &str, count: usize) -> DriftResult<Vec<String>> {
    let net: Ipv4Net = normalize_cidr(cidr)?
        .parse()
        .map_err(|_| DriftError::validation("aws.vpc_cidr_block", "invalid CIDR"))?;
    let prefix = (net.prefix_len() + SUBNET_PREFIX_BITS).min(MAX_SUBNET_PREFIX);
    let cidrs: Vec<String> = net
        .subnets(prefix)
        .map_err(|e| DriftError::validation("aws.vpc_cidr_block", e.to_string()))?
        .take(count)
        .map(|s| s.to_string())
        .collect();
    if cidrs.len() < count {
        return Err(DriftError::validation(
            "aws.availability_zones",
            format!("{cidr} cannot hold {count} subnets of /{prefix}"),
        ));
    }
    Ok(cidrs)
}

pub async fn discover(s: &AwsSession<'_>) -> DriftResult<Discovered<NetworkState>> {
    let identity = s.tags.describe();
    let net = &s.clients.network;

    let vpcs: Vec<Vpc> = net
        .list_vpcs(s.tags)
        .await
        .upstream(ResourceKind::Vpc, &identity, "list")?
        .into_iter()
        .filter(|v| s.tags.owns(&v.tags))
        .collect();
    let vpc = match Discovered::from_matches(ResourceKind::Network, &identity, vpcs, |v| {
        v.id.clone()
    })? {
        Discovered::Found(vpc) => vpc,
        Discovered::NotFound => return Ok(Discovered::NotFound),
    };

    let mut subnets: Vec<Subnet> = net
        .list_subnets(s.tags)
        .await
        .upstream(ResourceKind::Subnet, &identity, "list")?
        .into_iter()
        .filter(|sn| sn.vpc_id == vpc.id && s.tags.owns(&sn.tags))
        .collect();
    subnets.sort_by(|a, b| a.availability_zone.cmp(&b.availability_zone));

    let gateways: Vec<InternetGateway> = net
        .list_internet_gateways(s.tags)
        .await
        .upstream(ResourceKind::InternetGateway, &identity, "list")?
        .into_iter()
        .filter(|g| g.vpc_id.as_deref() == Some(vpc.id.as_str()) && s.tags.owns(&g.tags))
        .collect();
    let internet_gateway =
        Discovered::from_matches(ResourceKind::InternetGateway, &vpc.id, gateways, |g| {
            g.id.clone()
        })?
        .into_option();

    let tables: Vec<RouteTable> = net
        .list_route_tables(s.tags)
        .await
        .upstream(ResourceKind::RouteTable, &identity, "list")?
        .into_iter()
        .filter(|t| t.vpc_id == vpc.id && s.tags.owns(&t.tags))
        .collect();
    let route_table =
        Discovered::from_matches(ResourceKind::RouteTable, &vpc.id, tables, |t| t.id.clone())?
            .into_option();

    Ok(Discovered::Found(NetworkState {
        vpc,
        subnets,
        internet_gateway,
        route_table,
    }))
}

pub async fn reconcile(
    s: &AwsSession<'_>,
    spec: &NetworkSpec,
    actual: Discovered<NetworkState>,
) -> DriftResult<NetworkState> {
    match actual {
        Discovered::NotFound => create(s, spec).await,
        Discovered::Found(state) => update(s, spec, state).await,
    }
}

async fn create(s: &AwsSession<'_>, spec: &NetworkSpec) -> DriftResult<NetworkState> {
    let identity = s.tags.describe();
    let cidrs = subnet_cidrs(&spec.cidr_block, spec.availability_zones.len())?;

    s.ctx
        .track(ResourceKind::Network, "create", &identity, async {
            let vpc = s
                .clients
                .network
                .create_vpc(&spec.cidr_block, &spec.tags)
                .await
                .upstream(ResourceKind::Vpc, &identity, "create")?;
            info!(vpc = %vpc.id, cidr = %spec.cidr_block, "created vpc");
            complete(s, spec, &vpc.id, true, None, true, &cidrs).await
        })
        .await?;

    read_back(s).await
}

async fn update(
    s: &AwsSession<'_>,
    spec: &NetworkSpec,
    actual: NetworkState,
) -> DriftResult<NetworkState> {
    let vpc_id = actual.vpc.id.clone();
    let actual_cidr = normalize_cidr(&actual.vpc.cidr_block)?;
    let mut immutables = Immutables::new(ResourceKind::Network, &vpc_id).field(
        "cidr_block",
        actual_cidr.as_str(),
        spec.cidr_block.as_str(),
    );
    if !actual.subnets.is_empty() {
        immutables = immutables.field(
            "availability_zones",
            &actual.availability_zones().join(","),
            &spec.availability_zones.join(","),
        );
    }
    immutables.finish()?;

    let mut changed = false;
    let missing = missing_tags(&actual.vpc.tags, &spec.tags);
    if !missing.is_empty() {
        s.ctx
            .track(ResourceKind::Vpc, "tag", &vpc_id, async {
                s.clients
                    .network
                    .tag_resource(&vpc_id, &missing)
                    .await
                    .upstream(ResourceKind::Vpc, &vpc_id, "tag")
            })
            .await?;
        changed = true;
    }

    let needs_subnets = actual.subnets.is_empty();
    let needs_gateway = actual.internet_gateway.is_none();
    let needs_routes = actual.route_table.is_none();
    if needs_subnets || needs_gateway || needs_routes {
        let cidrs = subnet_cidrs(&spec.cidr_block, spec.availability_zones.len())?;
        s.ctx
            .track(ResourceKind::Network, "complete", &vpc_id, async {
                complete(
                    s,
                    spec,
                    &vpc_id,
                    needs_subnets,
                    actual.internet_gateway.as_ref().map(|g| g.id.clone()),
                    needs_routes,
                    &cidrs,
                )
                .await
            })
            .await?;
        changed = true;
    }

    if changed {
        read_back(s).await
    } else {
        debug!(vpc = %vpc_id, "network unchanged");
        Ok(actual)
    }
}

/// Creates whichever of subnets, gateway and route table are missing.
async fn complete(
    s: &AwsSession<'_>,
    spec: &NetworkSpec,
    vpc_id: &str,
    create_subnets: bool,
    gateway_id: Option<String>,
    create_routes: bool,
    cidrs: &[String],
) -> DriftResult<()> {
    let net = &s.clients.network;

    if create_subnets {
        for (zone, cidr) in spec.availability_zones.iter().zip(cidrs) {
            let subnet = net
                .create_subnet(vpc_id, zone, cidr, &spec.tags)
                .await
                .upstream(ResourceKind::Subnet, vpc_id, "create")?;
            debug!(subnet = %subnet.id, zone = %zone, cidr = %cidr, "created subnet");
        }
    }

    let gateway_id = match gateway_id {
        Some(id) => id,
        None => {
            let gateway = net
                .create_internet_gateway(vpc_id, &spec.tags)
                .await
                .upstream(ResourceKind::InternetGateway, vpc_id, "create")?;
            gateway.id
        }
    };

    if create_routes {
        let mut subnet_ids: Vec<String> = net
            .list_subnets(s.tags)
            .await
            .upstream(ResourceKind::Subnet, vpc_id, "list")?
            .into_iter()
            .filter(|sn| sn.vpc_id == vpc_id)
            .map(|sn| sn.id)
            .collect();
        subnet_ids.sort();
        net.create_route_table(vpc_id, &gateway_id, &subnet_ids, &spec.tags)
            .await
            .upstream(ResourceKind::RouteTable, vpc_id, "create")?;
    }
    Ok(())
}

async fn read_back(s: &AwsSession<'_>) -> DriftResult<NetworkState> {
    match discover(s).await? {
        Discovered::Found(state) => Ok(state),
        Discovered::NotFound => Err(DriftError::upstream(
            ResourceKind::Network,
            s.tags.describe(),
            "read back",
            anyhow::anyhow!("the network is not visible after creation"),
        )),
    }
}
