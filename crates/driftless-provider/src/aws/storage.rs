//! Shared EFS filesystem with one mount target per network subnet.

use std::collections::BTreeSet;

use driftless_common::{
    poll_for,
    project::AwsSettings,
    tags::ClusterTags,
    DriftError, DriftResult, ResourceKind, UpstreamContext,
};
use tracing::{debug, info, warn};

use super::{
    state::{FileSystem, NetworkState, ResourceStatus, StorageSpec, StorageState},
    AwsSession,
};
use crate::reconcile::{Discovered, Immutables};

/// `None` when shared storage is disabled.
pub fn desired(aws: &AwsSettings, tags: &ClusterTags, network: &NetworkState) -> Option<StorageSpec> {
    aws.efs.enabled.then(|| StorageSpec {
        encrypted: aws.efs.encrypted,
        throughput_mode: aws.efs.throughput_mode,
        provisioned_throughput_mibps: aws.efs.provisioned_throughput_mibps,
        subnet_ids: network.subnet_ids(),
        tags: tags.with_extra(&aws.tags),
    })
}

pub async fn discover(s: &AwsSession<'_>) -> DriftResult<Discovered<StorageState>> {
    let identity = s.tags.describe();
    let storage = &s.clients.storage;
    let file_systems: Vec<FileSystem> = storage
        .list_file_systems(s.tags)
        .await
        .upstream(ResourceKind::SharedStorage, &identity, "list")?
        .into_iter()
        .filter(|fs| s.tags.owns(&fs.tags) && fs.status != ResourceStatus::Deleted)
        .collect();
    let file_system = match Discovered::from_matches(
        ResourceKind::SharedStorage,
        &identity,
        file_systems,
        |fs| fs.id.clone(),
    )? {
        Discovered::Found(fs) => fs,
        Discovered::NotFound => return Ok(Discovered::NotFound),
    };
    let mount_targets = storage
        .list_mount_targets(&file_system.id)
        .await
        .upstream(ResourceKind::MountTarget, &file_system.id, "list")?;
    Ok(Discovered::Found(StorageState {
        file_system,
        mount_targets,
    }))
}

pub async fn reconcile(
    s: &AwsSession<'_>,
    spec: Option<&StorageSpec>,
    actual: Discovered<StorageState>,
) -> DriftResult<Option<StorageState>> {
    let Some(spec) = spec else {
        if let Discovered::Found(state) = actual {
            let id = state.file_system.id.as_str();
            warn!(file_system = id, "shared storage is disabled but still exists; leaving it in place");
            s.ctx.warning(
                ResourceKind::SharedStorage,
                "skip",
                &format!("{id} is disabled in the configuration but still exists; run destroy to remove it"),
            );
            return Ok(Some(state));
        }
        return Ok(None);
    };

    let storage = &s.clients.storage;
    let (file_system, mount_targets, mut changed) = match actual {
        Discovered::NotFound => {
            let identity = s.tags.describe();
            let fs = s
                .ctx
                .track(ResourceKind::SharedStorage, "create", &identity, async {
                    let fs = storage
                        .create_file_system(spec)
                        .await
                        .upstream(ResourceKind::SharedStorage, &identity, "create")?;
                    info!(file_system = %fs.id, "creating shared storage");
                    wait_available(s, &fs.id).await
                })
                .await?;
            (fs, Vec::new(), true)
        }
        Discovered::Found(state) => {
            let fs = state.file_system;
            Immutables::new(ResourceKind::SharedStorage, &fs.id)
                .field("encrypted", &fs.encrypted, &spec.encrypted)
                .finish()?;
            (fs, state.mount_targets, false)
        }
    };
    let id = file_system.id.as_str();

    if throughput_differs(&file_system, spec) {
        s.ctx
            .track(ResourceKind::SharedStorage, "update throughput", id, async {
                storage
                    .update_throughput(id, spec.throughput_mode, spec.provisioned_throughput_mibps)
                    .await
                    .upstream(ResourceKind::SharedStorage, id, "update throughput")
            })
            .await?;
        changed = true;
    }

    let mounted: BTreeSet<&str> = mount_targets.iter().map(|m| m.subnet_id.as_str()).collect();
    let missing: Vec<&String> = spec
        .subnet_ids
        .iter()
        .filter(|subnet| !mounted.contains(subnet.as_str()))
        .collect();
    for subnet in missing {
        s.ctx
            .track(ResourceKind::MountTarget, "create", subnet, async {
                storage
                    .create_mount_target(id, subnet)
                    .await
                    .upstream(ResourceKind::MountTarget, subnet, "create")
            })
            .await?;
        changed = true;
    }

    if !changed {
        debug!(file_system = id, "shared storage unchanged");
        return Ok(Some(StorageState {
            file_system,
            mount_targets,
        }));
    }
    match discover(s).await? {
        Discovered::Found(state) => Ok(Some(state)),
        Discovered::NotFound => Err(DriftError::upstream(
            ResourceKind::SharedStorage,
            id,
            "read back",
            anyhow::anyhow!("the filesystem is not visible after reconciliation"),
        )),
    }
}

fn throughput_differs(actual: &FileSystem, spec: &StorageSpec) -> bool {
    actual.throughput_mode != spec.throughput_mode
        || (spec.provisioned_throughput_mibps.is_some()
            && actual.provisioned_throughput_mibps != spec.provisioned_throughput_mibps)
}

/// Deletes every mount target, waits for them to go away, then deletes the
/// filesystem and waits for it to disappear.
pub async fn delete(s: &AwsSession<'_>, state: &StorageState) -> DriftResult<()> {
    let storage = &s.clients.storage;
    let id = state.file_system.id.as_str();
    for target in &state.mount_targets {
        if target.status.is_going_away() {
            continue;
        }
        storage
            .delete_mount_target(&target.id)
            .await
            .upstream(ResourceKind::MountTarget, &target.id, "delete")?;
    }
    let what = format!("mount targets of {id} to be deleted");
    poll_for(s.ctx, &what, s.poll.resource_ready(), move || async move {
        match storage.list_mount_targets(id).await {
            Ok(targets) => targets.is_empty().then_some(()),
            Err(e) => {
                warn!(file_system = id, error = %e, "listing mount targets failed while waiting");
                None
            }
        }
    })
    .await?;

    storage
        .delete_file_system(id)
        .await
        .upstream(ResourceKind::SharedStorage, id, "delete")?;
    let tags = s.tags;
    let what = format!("filesystem {id} to be deleted");
    poll_for(s.ctx, &what, s.poll.resource_ready(), move || async move {
        match storage.list_file_systems(tags).await {
            Ok(all) => (!all
                .iter()
                .any(|fs| fs.id == id && fs.status != ResourceStatus::Deleted))
            .then_some(()),
            Err(e) => {
                warn!(file_system = id, error = %e, "listing filesystems failed while waiting");
                None
            }
        }
    })
    .await
}

async fn wait_available(s: &AwsSession<'_>, id: &str) -> DriftResult<FileSystem> {
    let storage = &s.clients.storage;
    let tags = s.tags;
    let what = format!("filesystem {id} to become available");
    poll_for(s.ctx, &what, s.poll.resource_ready(), move || async move {
        match storage.list_file_systems(tags).await {
            Ok(all) => all
                .into_iter()
                .find(|fs| fs.id == id && fs.status.is_active()),
            Err(e) => {
                warn!(file_system = id, error = %e, "listing filesystems failed while waiting");
                None
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftless_common::project::ThroughputMode;

    fn fs(mode: ThroughputMode, mibps: Option<f64>) -> FileSystem {
        FileSystem {
            id: "fs-1".to_string(),
            status: ResourceStatus::Active,
            encrypted: true,
            throughput_mode: mode,
            provisioned_throughput_mibps: mibps,
            tags: Default::default(),
        }
    }

    fn spec(mode: ThroughputMode, mibps: Option<f64>) -> StorageSpec {
        StorageSpec {
            encrypted: true,
            throughput_mode: mode,
            provisioned_throughput_mibps: mibps,
            subnet_ids: vec![],
            tags: Default::default(),
        }
    }

    #[test]
    fn throughput_comparison() {
        assert!(!throughput_differs(
            &fs(ThroughputMode::Bursting, None),
            &spec(ThroughputMode::Bursting, None)
        ));
        assert!(throughput_differs(
            &fs(ThroughputMode::Bursting, None),
            &spec(ThroughputMode::Elastic, None)
        ));
        assert!(throughput_differs(
            &fs(ThroughputMode::Provisioned, Some(64.0)),
            &spec(ThroughputMode::Provisioned, Some(128.0))
        ));
    }
}
