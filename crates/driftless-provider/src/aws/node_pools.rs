//! EKS managed node groups, reconciled as a set keyed by pool name.
//!
//! Pools are independent once the cluster exists, so every pool is
//! reconciled concurrently and failures are aggregated instead of cancelling
//! the siblings.

use std::collections::{BTreeMap, BTreeSet};

use driftless_common::{
    poll_for,
    project::AwsSettings,
    tags::{node_pool_name, ClusterTags},
    DriftError, DriftResult, ResourceFailure, ResourceKind, ResourceRef, UpstreamContext,
};
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::{
    clients::NodePoolUpdate,
    iam::Roles,
    state::{NetworkState, NodePoolSpec, NodePoolState, ResourceStatus, Scaling},
    AwsSession,
};
use crate::reconcile::{Discovered, Immutables};

pub type NodePools = BTreeMap<String, NodePoolState>;

pub fn desired(
    aws: &AwsSettings,
    tags: &ClusterTags,
    network: &NetworkState,
    roles: &Roles,
) -> BTreeMap<String, NodePoolSpec> {
    aws.node_groups
        .iter()
        .map(|(name, group)| {
            let spec = NodePoolSpec {
                name: name.clone(),
                instance_type: group.instance.clone(),
                gpu: group.gpu,
                spot: group.spot,
                disk_size: group.disk_size,
                min_size: group.min_nodes,
                max_size: group.max_nodes,
                labels: group.labels.clone(),
                taints: group.taints.iter().cloned().collect(),
                subnet_ids: network.subnet_ids(),
                node_role_arn: roles.node.arn.clone(),
                tags: tags.for_node_pool(name, &aws.tags),
            };
            (name.clone(), spec)
        })
        .collect()
}

/// Every managed pool of `cluster`, keyed by pool name.
pub async fn discover(s: &AwsSession<'_>, cluster: &str) -> DriftResult<NodePools> {
    let pools = s
        .clients
        .eks
        .list_node_pools(cluster)
        .await
        .upstream(ResourceKind::NodePool, cluster, "list")?;
    Ok(pools
        .into_iter()
        .filter(|p| s.tags.owns(&p.tags))
        .map(|p| {
            let key = node_pool_name(&p.tags).unwrap_or(&p.name).to_string();
            (key, p)
        })
        .collect())
}

enum Plan<'a> {
    Reconcile(&'a NodePoolSpec, Discovered<NodePoolState>),
    Delete(NodePoolState),
}

pub async fn reconcile(
    s: &AwsSession<'_>,
    cluster: &str,
    desired: &BTreeMap<String, NodePoolSpec>,
    mut actual: NodePools,
) -> DriftResult<NodePools> {
    let mut plans: Vec<(String, Plan)> = desired
        .iter()
        .map(|(name, spec)| {
            let found = actual
                .remove(name)
                .map_or(Discovered::NotFound, Discovered::Found);
            (name.clone(), Plan::Reconcile(spec, found))
        })
        .collect();
    plans.extend(
        actual
            .into_iter()
            .map(|(name, state)| (name, Plan::Delete(state))),
    );

    let results = join_all(plans.into_iter().map(|(name, plan)| async move {
        let result = match plan {
            Plan::Reconcile(spec, found) => reconcile_one(s, cluster, spec, found).await.map(Some),
            Plan::Delete(state) => delete_one(s, cluster, &state.name).await.map(|_| None),
        };
        (name, result)
    }))
    .await;

    let mut pools = NodePools::new();
    let mut failures = Vec::new();
    for (name, result) in results {
        match result {
            Ok(Some(state)) => {
                pools.insert(name, state);
            }
            Ok(None) => {}
            Err(e) => failures.push(ResourceFailure::new(
                ResourceRef::new(ResourceKind::NodePool, name),
                e,
            )),
        }
    }

    if let Some(pos) = failures.iter().position(|f| f.error.is_cancelled()) {
        return Err(failures.swap_remove(pos).error);
    }
    if !failures.is_empty() {
        return Err(DriftError::Aggregate {
            operation: "node pool reconciliation".to_string(),
            failures,
        });
    }
    Ok(pools)
}

pub async fn reconcile_one(
    s: &AwsSession<'_>,
    cluster: &str,
    spec: &NodePoolSpec,
    actual: Discovered<NodePoolState>,
) -> DriftResult<NodePoolState> {
    let name = spec.name.as_str();
    let eks = &s.clients.eks;

    let actual = match actual {
        Discovered::NotFound => {
            return s
                .ctx
                .track(ResourceKind::NodePool, "create", name, async {
                    eks.create_node_pool(cluster, spec)
                        .await
                        .upstream(ResourceKind::NodePool, name, "create")?;
                    info!(cluster, pool = name, instance = %spec.instance_type, "creating node pool");
                    wait_active(s, cluster, name).await
                })
                .await;
        }
        Discovered::Found(actual) => actual,
    };

    Immutables::new(ResourceKind::NodePool, name)
        .field("instance_type", &actual.instance_type, &spec.instance_type)
        .field("gpu", &actual.gpu, &spec.gpu)
        .field("spot", &actual.spot, &spec.spot)
        .field("disk_size", &actual.disk_size, &spec.disk_size)
        .finish()?;

    let updates = updates(&actual, spec);
    if updates.is_empty() {
        debug!(pool = name, "node pool unchanged");
        return Ok(actual);
    }
    if actual.status != ResourceStatus::Active {
        wait_active(s, cluster, name).await?;
    }

    for update in &updates {
        let action = format!("update {}", update.field());
        s.ctx
            .track(ResourceKind::NodePool, &action, name, async {
                eks.update_node_pool(cluster, name, update)
                    .await
                    .upstream(ResourceKind::NodePool, name, &action)?;
                wait_active(s, cluster, name).await.map(|_| ())
            })
            .await?;
    }
    wait_active(s, cluster, name).await
}

fn updates(actual: &NodePoolState, spec: &NodePoolSpec) -> Vec<NodePoolUpdate> {
    let mut updates = Vec::new();

    if actual.scaling.min != spec.min_size || actual.scaling.max != spec.max_size {
        updates.push(NodePoolUpdate::Scaling(Scaling {
            min: spec.min_size,
            max: spec.max_size,
            desired: actual.scaling.desired.clamp(spec.min_size, spec.max_size),
        }));
    }

    if actual.labels != spec.labels {
        let add = spec
            .labels
            .iter()
            .filter(|(k, v)| actual.labels.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let remove = actual
            .labels
            .keys()
            .filter(|k| !spec.labels.contains_key(*k))
            .cloned()
            .collect();
        updates.push(NodePoolUpdate::Labels { add, remove });
    }

    if actual.taints != spec.taints {
        let add = spec.taints.difference(&actual.taints).cloned().collect();
        let remove = actual.taints.difference(&spec.taints).cloned().collect();
        updates.push(NodePoolUpdate::Taints { add, remove });
    }

    updates
}

pub async fn delete_one(s: &AwsSession<'_>, cluster: &str, name: &str) -> DriftResult<()> {
    s.ctx
        .track(ResourceKind::NodePool, "delete", name, async {
            s.clients
                .eks
                .delete_node_pool(cluster, name)
                .await
                .upstream(ResourceKind::NodePool, name, "delete")?;
            wait_deleted(s, cluster, name).await
        })
        .await
}

pub async fn wait_active(
    s: &AwsSession<'_>,
    cluster: &str,
    name: &str,
) -> DriftResult<NodePoolState> {
    let eks = &s.clients.eks;
    let what = format!("node pool {name} to become active");
    poll_for(s.ctx, &what, s.poll.resource_ready(), move || async move {
        match eks.describe_node_pool(cluster, name).await {
            Ok(Some(pool)) if pool.status.is_active() => Some(Ok(pool)),
            Ok(Some(pool)) if pool.status == ResourceStatus::Failed => {
                Some(Err(DriftError::upstream(
                    ResourceKind::NodePool,
                    name,
                    "wait for active",
                    anyhow::anyhow!("node pool entered a failed state"),
                )))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(pool = name, error = %e, "describe failed while waiting");
                None
            }
        }
    })
    .await?
}

pub async fn wait_deleted(s: &AwsSession<'_>, cluster: &str, name: &str) -> DriftResult<()> {
    let eks = &s.clients.eks;
    let what = format!("node pool {name} to be deleted");
    poll_for(s.ctx, &what, s.poll.resource_ready(), move || async move {
        match eks.describe_node_pool(cluster, name).await {
            Ok(None) => Some(()),
            Ok(Some(_)) => None,
            Err(e) => {
                warn!(pool = name, error = %e, "describe failed while waiting");
                None
            }
        }
    })
    .await
}

/// Names of the GPU pools.
pub fn gpu_pools(pools: &NodePools) -> BTreeSet<&str> {
    pools
        .iter()
        .filter(|(_, p)| p.gpu)
        .map(|(name, _)| name.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftless_common::project::{Taint, TaintEffect};

    fn state() -> NodePoolState {
        NodePoolState {
            name: "general".to_string(),
            status: ResourceStatus::Active,
            instance_type: "m5.xlarge".to_string(),
            gpu: false,
            spot: false,
            disk_size: 50,
            scaling: Scaling {
                min: 1,
                max: 3,
                desired: 3,
            },
            labels: BTreeMap::from([("team".to_string(), "a".to_string())]),
            taints: BTreeSet::new(),
            tags: Default::default(),
        }
    }

    fn spec() -> NodePoolSpec {
        NodePoolSpec {
            name: "general".to_string(),
            instance_type: "m5.xlarge".to_string(),
            gpu: false,
            spot: false,
            disk_size: 50,
            min_size: 1,
            max_size: 3,
            labels: BTreeMap::from([("team".to_string(), "a".to_string())]),
            taints: BTreeSet::new(),
            subnet_ids: vec![],
            node_role_arn: String::new(),
            tags: Default::default(),
        }
    }

    #[test]
    fn identical_pools_need_no_update() {
        assert!(updates(&state(), &spec()).is_empty());
    }

    #[test]
    fn scaling_clamps_the_desired_size() {
        let mut spec = spec();
        spec.max_size = 2;
        assert_eq!(
            updates(&state(), &spec),
            vec![NodePoolUpdate::Scaling(Scaling {
                min: 1,
                max: 2,
                desired: 2
            })]
        );
    }

    #[test]
    fn labels_and_taints_are_separate_calls() {
        let mut spec = spec();
        spec.labels = BTreeMap::from([("tier".to_string(), "gpu".to_string())]);
        let taint = Taint {
            key: "dedicated".to_string(),
            value: None,
            effect: TaintEffect::NoSchedule,
        };
        spec.taints.insert(taint.clone());

        let updates = updates(&state(), &spec);
        assert_eq!(updates.len(), 2);
        assert_eq!(
            updates[0],
            NodePoolUpdate::Labels {
                add: BTreeMap::from([("tier".to_string(), "gpu".to_string())]),
                remove: vec!["team".to_string()],
            }
        );
        assert_eq!(
            updates[1],
            NodePoolUpdate::Taints {
                add: vec![taint],
                remove: vec![],
            }
        );
    }
}
