//! Service roles assumed by the EKS control plane and by the worker nodes.

use std::collections::BTreeSet;

use driftless_common::{
    project::AwsSettings, tags::ClusterTags, DriftError, DriftResult, ResourceKind,
    UpstreamContext,
};
use tracing::debug;

use super::{
    state::{RoleSpec, RoleState},
    AwsSession,
};
use crate::reconcile::{Discovered, Immutables};

const CLUSTER_SERVICE: &str = "eks.amazonaws.com";
const NODE_SERVICE: &str = "ec2.amazonaws.com";

const CLUSTER_POLICIES: &[&str] = &["arn:aws:iam::aws:policy/AmazonEKSClusterPolicy"];
const NODE_POLICIES: &[&str] = &[
    "arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy",
    "arn:aws:iam::aws:policy/AmazonEKS_CNI_Policy",
    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly",
];
const STORAGE_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AmazonEFSCSIDriverPolicy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roles {
    pub cluster: RoleState,
    pub node: RoleState,
}

/// Every role of a project lives under this path, which is what the orphan
/// sweep lists.
pub fn role_path(project: &str) -> String {
    format!("/driftless/{project}/")
}

pub fn cluster_role_name(project: &str) -> String {
    format!("{project}-eks-cluster-role")
}

pub fn node_role_name(project: &str) -> String {
    format!("{project}-eks-node-role")
}

/// Cluster role first, node role second.
pub fn desired(aws: &AwsSettings, tags: &ClusterTags) -> [RoleSpec; 2] {
    let project = tags.cluster();
    let role = |name: String, service: &str, policies: &[&str]| RoleSpec {
        name,
        path: role_path(project),
        trusted_service: service.to_string(),
        permissions_boundary: aws.permissions_boundary.clone(),
        managed_policies: policies.iter().map(|p| p.to_string()).collect(),
        tags: tags.with_extra(&aws.tags),
    };

    let mut node = role(node_role_name(project), NODE_SERVICE, NODE_POLICIES);
    if aws.efs.enabled {
        node.managed_policies.insert(STORAGE_POLICY.to_string());
    }
    [
        role(cluster_role_name(project), CLUSTER_SERVICE, CLUSTER_POLICIES),
        node,
    ]
}

pub async fn discover(s: &AwsSession<'_>, name: &str) -> DriftResult<Discovered<RoleState>> {
    let role = s
        .clients
        .iam
        .get_role(name)
        .await
        .upstream(ResourceKind::IdentityRole, name, "get")?;
    match role {
        None => Ok(Discovered::NotFound),
        Some(role) if s.tags.owns(&role.tags) => Ok(Discovered::Found(role)),
        Some(_) => Err(DriftError::validation(
            format!("iam role {name}"),
            format!(
                "a role with this name exists but is not tagged {}; refusing to adopt it",
                s.tags.describe()
            ),
        )),
    }
}

pub async fn reconcile(
    s: &AwsSession<'_>,
    spec: &RoleSpec,
    actual: Discovered<RoleState>,
) -> DriftResult<RoleState> {
    let iam = &s.clients.iam;
    let name = spec.name.as_str();

    let attached = match actual {
        Discovered::NotFound => {
            s.ctx
                .track(ResourceKind::IdentityRole, "create", name, async {
                    iam.create_role(spec)
                        .await
                        .upstream(ResourceKind::IdentityRole, name, "create")
                })
                .await?
        }
        Discovered::Found(role) => {
            Immutables::new(ResourceKind::IdentityRole, name)
                .field("trusted_service", &role.trusted_service, &spec.trusted_service)
                .finish()?;
            role
        }
    };

    let mut changed = false;

    if attached.permissions_boundary != spec.permissions_boundary {
        let boundary = spec.permissions_boundary.as_deref();
        s.ctx
            .track(ResourceKind::IdentityRole, "set permissions boundary", name, async {
                iam.set_permissions_boundary(name, boundary)
                    .await
                    .upstream(ResourceKind::IdentityRole, name, "set permissions boundary")
            })
            .await?;
        changed = true;
    }

    let (attach, detach) = policy_changes(&attached.managed_policies, &spec.managed_policies);
    if !attach.is_empty() || !detach.is_empty() {
        s.ctx
            .track(ResourceKind::IdentityRole, "update policies", name, async {
                for policy in &attach {
                    iam.attach_role_policy(name, policy)
                        .await
                        .upstream(ResourceKind::IdentityRole, name, "attach policy")?;
                }
                for policy in &detach {
                    iam.detach_role_policy(name, policy)
                        .await
                        .upstream(ResourceKind::IdentityRole, name, "detach policy")?;
                }
                Ok(())
            })
            .await?;
        changed = true;
    }

    if !changed {
        debug!(role = name, "role unchanged");
        return Ok(attached);
    }
    iam.get_role(name)
        .await
        .upstream(ResourceKind::IdentityRole, name, "read back")?
        .ok_or_else(|| {
            DriftError::upstream(
                ResourceKind::IdentityRole,
                name,
                "read back",
                anyhow::anyhow!("the role is not visible after reconciliation"),
            )
        })
}

/// Reconciles the cluster and node roles in that order.
pub async fn reconcile_all(s: &AwsSession<'_>, specs: &[RoleSpec; 2]) -> DriftResult<Roles> {
    let [cluster_spec, node_spec] = specs;
    let actual = discover(s, &cluster_spec.name).await?;
    let cluster = reconcile(s, cluster_spec, actual).await?;
    let actual = discover(s, &node_spec.name).await?;
    let node = reconcile(s, node_spec, actual).await?;
    Ok(Roles { cluster, node })
}

/// Detaches every managed policy, then deletes the role.
pub async fn delete(s: &AwsSession<'_>, role: &RoleState) -> DriftResult<()> {
    let iam = &s.clients.iam;
    let name = role.name.as_str();
    for policy in &role.managed_policies {
        iam.detach_role_policy(name, policy)
            .await
            .upstream(ResourceKind::IdentityRole, name, "detach policy")?;
    }
    iam.delete_role(name)
        .await
        .upstream(ResourceKind::IdentityRole, name, "delete")
}

fn policy_changes(
    actual: &BTreeSet<String>,
    desired: &BTreeSet<String>,
) -> (Vec<String>, Vec<String>) {
    let attach = desired.difference(actual).cloned().collect();
    let detach = actual.difference(desired).cloned().collect();
    (attach, detach)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_diff_is_symmetric() {
        let actual: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let desired: BTreeSet<String> = ["b", "c"].iter().map(|s| s.to_string()).collect();
        let (attach, detach) = policy_changes(&actual, &desired);
        assert_eq!(attach, vec!["c"]);
        assert_eq!(detach, vec!["a"]);
    }

    #[test]
    fn storage_adds_the_csi_policy_to_the_node_role() {
        let config = driftless_common::ProjectConfig::from_yaml_str(
            "project_name: demo\nprovider: aws\naws:\n  region: us-east-1\n  kubernetes_version: \"1.30\"\n  efs:\n    enabled: true\n",
        )
        .unwrap();
        let tags = ClusterTags::new("demo");
        let [cluster, node] = desired(config.aws().unwrap(), &tags);
        assert_eq!(cluster.name, "demo-eks-cluster-role");
        assert_eq!(cluster.path, "/driftless/demo/");
        assert!(node.managed_policies.contains(STORAGE_POLICY));
        assert_eq!(node.managed_policies.len(), 4);
    }
}
