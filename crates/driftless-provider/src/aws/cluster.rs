//! The EKS control plane.

use driftless_common::{
    poll_for,
    project::{parse_version, AwsSettings},
    tags::{missing_tags, ClusterTags},
    DriftError, DriftResult, ResourceKind, UpstreamContext,
};
use tracing::{debug, info, warn};

use super::{
    clients::ClusterUpdate,
    iam::Roles,
    state::{ClusterSpec, ClusterState, NetworkState, ResourceStatus},
    AwsSession,
};
use crate::reconcile::{Discovered, Immutables};

pub fn desired(
    aws: &AwsSettings,
    tags: &ClusterTags,
    network: &NetworkState,
    roles: &Roles,
) -> ClusterSpec {
    ClusterSpec {
        name: tags.cluster().to_string(),
        version: aws.kubernetes_version.clone(),
        role_arn: roles.cluster.arn.clone(),
        subnet_ids: network.subnet_ids(),
        kms_key_arn: aws.eks_kms_arn.clone(),
        endpoint_public_access: aws.endpoint_public_access,
        endpoint_private_access: aws.endpoint_private_access,
        enabled_log_types: aws.enabled_log_types.iter().cloned().collect(),
        tags: tags.with_extra(&aws.tags),
    }
}

pub async fn discover(s: &AwsSession<'_>) -> DriftResult<Discovered<ClusterState>> {
    let identity = s.tags.describe();
    let clusters: Vec<ClusterState> = s
        .clients
        .eks
        .list_clusters(s.tags)
        .await
        .upstream(ResourceKind::ManagedCluster, &identity, "list")?
        .into_iter()
        .filter(|c| s.tags.owns(&c.tags))
        .collect();
    Discovered::from_matches(ResourceKind::ManagedCluster, &identity, clusters, |c| {
        c.name.clone()
    })
}

pub async fn reconcile(
    s: &AwsSession<'_>,
    spec: &ClusterSpec,
    actual: Discovered<ClusterState>,
) -> DriftResult<ClusterState> {
    let actual = match actual {
        Discovered::NotFound => return create(s, spec).await,
        Discovered::Found(actual) => actual,
    };
    let name = actual.name.clone();

    let mut subnet_ids = actual.subnet_ids.clone();
    subnet_ids.sort();
    Immutables::new(ResourceKind::ManagedCluster, &name)
        .field("role_arn", &actual.role_arn, &spec.role_arn)
        .field("subnet_ids", &subnet_ids.join(","), &spec.subnet_ids.join(","))
        .debug_field("kms_key_arn", &actual.kms_key_arn, &spec.kms_key_arn)
        .finish()?;
    check_version(&name, &actual.version, &spec.version)?;

    let updates = updates(&actual, spec);
    let tags = missing_tags(&actual.tags, &spec.tags);
    if updates.is_empty() && tags.is_empty() && actual.status.is_active() {
        debug!(cluster = %name, "managed cluster unchanged");
        return Ok(actual);
    }

    match actual.status {
        ResourceStatus::Active => {}
        ResourceStatus::Creating | ResourceStatus::Updating => {
            wait_active(s, &name).await?;
        }
        ref other => {
            return Err(DriftError::upstream(
                ResourceKind::ManagedCluster,
                &name,
                "reconcile",
                anyhow::anyhow!("cluster is {other:?} and cannot be updated"),
            ))
        }
    }

    let eks = &s.clients.eks;
    if !tags.is_empty() {
        s.ctx
            .track(ResourceKind::ManagedCluster, "tag", &name, async {
                eks.tag_resource(&actual.arn, &tags)
                    .await
                    .upstream(ResourceKind::ManagedCluster, &name, "tag")
            })
            .await?;
    }

    for update in &updates {
        let action = format!("update {}", update.field());
        s.ctx
            .track(ResourceKind::ManagedCluster, &action, &name, async {
                eks.update_cluster(&name, update)
                    .await
                    .upstream(ResourceKind::ManagedCluster, &name, &action)?;
                wait_active(s, &name).await.map(|_| ())
            })
            .await?;
        info!(cluster = %name, field = update.field(), "updated managed cluster");
    }

    wait_active(s, &name).await
}

async fn create(s: &AwsSession<'_>, spec: &ClusterSpec) -> DriftResult<ClusterState> {
    let name = spec.name.as_str();
    s.ctx
        .track(ResourceKind::ManagedCluster, "create", name, async {
            s.clients
                .eks
                .create_cluster(spec)
                .await
                .upstream(ResourceKind::ManagedCluster, name, "create")?;
            info!(cluster = name, version = %spec.version, "creating managed cluster");
            wait_active(s, name).await
        })
        .await
}

/// Field groups that differ, one update call each.
fn updates(actual: &ClusterState, spec: &ClusterSpec) -> Vec<ClusterUpdate> {
    let mut updates = Vec::new();
    if actual.version != spec.version {
        updates.push(ClusterUpdate::Version(spec.version.clone()));
    }
    if actual.endpoint_public_access != spec.endpoint_public_access
        || actual.endpoint_private_access != spec.endpoint_private_access
    {
        updates.push(ClusterUpdate::EndpointAccess {
            public: spec.endpoint_public_access,
            private: spec.endpoint_private_access,
        });
    }
    if actual.enabled_log_types != spec.enabled_log_types {
        let enable = spec
            .enabled_log_types
            .difference(&actual.enabled_log_types)
            .cloned()
            .collect();
        let disable = actual
            .enabled_log_types
            .difference(&spec.enabled_log_types)
            .cloned()
            .collect();
        updates.push(ClusterUpdate::Logging { enable, disable });
    }
    updates
}

fn check_version(name: &str, actual: &str, desired: &str) -> DriftResult<()> {
    let (Some(have), Some(want)) = (parse_version(actual), parse_version(desired)) else {
        return Err(DriftError::validation(
            "aws.kubernetes_version",
            format!("cannot compare versions `{actual}` and `{desired}` of cluster {name}"),
        ));
    };
    if want < have {
        return Err(DriftError::validation(
            "aws.kubernetes_version",
            format!("cluster {name} runs {actual}; downgrading to {desired} is not supported"),
        ));
    }
    Ok(())
}

/// Polls until the cluster reports ACTIVE and returns the fresh snapshot.
pub async fn wait_active(s: &AwsSession<'_>, name: &str) -> DriftResult<ClusterState> {
    let eks = &s.clients.eks;
    let what = format!("managed cluster {name} to become active");
    poll_for(s.ctx, &what, s.poll.cluster_ready(), move || async move {
        match eks.describe_cluster(name).await {
            Ok(Some(cluster)) if cluster.status.is_active() => Some(Ok(cluster)),
            Ok(Some(cluster)) if cluster.status == ResourceStatus::Failed => {
                Some(Err(DriftError::upstream(
                    ResourceKind::ManagedCluster,
                    name,
                    "wait for active",
                    anyhow::anyhow!("cluster entered the FAILED state"),
                )))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(cluster = name, error = %e, "describe failed while waiting");
                None
            }
        }
    })
    .await?
}

/// Polls until the cluster no longer exists.
pub async fn wait_deleted(s: &AwsSession<'_>, name: &str) -> DriftResult<()> {
    let eks = &s.clients.eks;
    let what = format!("managed cluster {name} to be deleted");
    poll_for(s.ctx, &what, s.poll.cluster_ready(), move || async move {
        match eks.describe_cluster(name).await {
            Ok(None) => Some(()),
            Ok(Some(_)) => None,
            Err(e) => {
                warn!(cluster = name, error = %e, "describe failed while waiting");
                None
            }
        }
    })
    .await
}
