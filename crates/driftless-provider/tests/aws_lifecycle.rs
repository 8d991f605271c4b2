use std::{collections::BTreeSet, sync::Arc, time::Duration};

use driftless_common::{
    project::{AwsSettings, NodeGroupSettings, ProjectConfig, ProviderSettings, ThroughputMode},
    settings::PollSettings,
    DriftError, OpContext, ResourceKind, ResourceRef,
};
use driftless_provider::{
    aws::{fake::FakeCloud, AwsProvider},
    DestroyOptions, Provider,
};

const PROJECT: &str = r#"
project_name: demo
provider: aws
aws:
  region: us-west-2
  kubernetes_version: "1.30"
  node_groups:
    general:
      instance: m5.xlarge
      min_nodes: 1
      max_nodes: 3
    gpu:
      instance: g4dn.xlarge
      gpu: true
      max_nodes: 2
      taints:
        - key: nvidia.com/gpu
          effect: NoSchedule
  efs:
    enabled: true
"#;

fn project() -> ProjectConfig {
    ProjectConfig::from_yaml_str(PROJECT).unwrap()
}

fn aws_mut(config: &mut ProjectConfig) -> &mut AwsSettings {
    match &mut config.settings {
        ProviderSettings::Aws(aws) => aws,
        other => panic!("not an aws project: {other:?}"),
    }
}

fn provider(cloud: &Arc<FakeCloud>) -> AwsProvider {
    AwsProvider::new(cloud.factory(), PollSettings::default())
}

fn mutations(cloud: &FakeCloud) -> Vec<String> {
    cloud.mutations().iter().map(ToString::to_string).collect()
}

fn sorted_mutations(cloud: &FakeCloud) -> Vec<String> {
    let mut all = mutations(cloud);
    all.sort();
    all
}

async fn deployed() -> (Arc<FakeCloud>, AwsProvider, ProjectConfig) {
    let cloud = FakeCloud::new();
    let aws = provider(&cloud);
    let config = project();
    aws.reconcile(&OpContext::default(), &config).await.unwrap();
    cloud.clear_calls();
    (cloud, aws, config)
}

#[tokio::test(start_paused = true)]
async fn first_reconcile_creates_every_kind() {
    let cloud = FakeCloud::new();
    provider(&cloud)
        .reconcile(&OpContext::default(), &project())
        .await
        .unwrap();

    let ops: BTreeSet<&str> = cloud.mutations().iter().map(|c| c.op).collect();
    for op in [
        "create_vpc",
        "create_subnet",
        "create_internet_gateway",
        "create_route_table",
        "create_role",
        "attach_role_policy",
        "create_cluster",
        "create_node_pool",
        "create_file_system",
        "create_mount_target",
    ] {
        assert!(ops.contains(op), "missing {op} in {ops:?}");
    }

    let state = cloud.state();
    assert_eq!(state.vpcs.len(), 1);
    assert_eq!(state.subnets.len(), 2);
    assert_eq!(state.roles.len(), 2);
    assert_eq!(state.node_pools.len(), 2);
    assert_eq!(state.mount_targets.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn second_reconcile_is_a_no_op() {
    let (cloud, aws, config) = deployed().await;
    aws.reconcile(&OpContext::default(), &config).await.unwrap();
    assert!(
        cloud.mutations().is_empty(),
        "unexpected mutations: {:?}",
        mutations(&cloud)
    );
}

#[tokio::test(start_paused = true)]
async fn immutable_network_change_is_rejected_without_mutation() {
    let (cloud, aws, mut config) = deployed().await;
    aws_mut(&mut config).vpc_cidr_block = "10.20.0.0/16".to_string();

    let err = aws
        .reconcile(&OpContext::default(), &config)
        .await
        .unwrap_err();
    match err {
        DriftError::ImmutableFieldViolation {
            kind,
            field,
            actual,
            desired,
            ..
        } => {
            assert_eq!(kind, ResourceKind::Network);
            assert_eq!(field, "cidr_block");
            assert_eq!(actual, "10.10.0.0/16");
            assert_eq!(desired, "10.20.0.0/16");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(cloud.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn immutable_node_pool_change_names_the_pool() {
    let (cloud, aws, mut config) = deployed().await;
    aws_mut(&mut config)
        .node_groups
        .get_mut("general")
        .unwrap()
        .instance = "m5.4xlarge".to_string();

    let err = aws
        .reconcile(&OpContext::default(), &config)
        .await
        .unwrap_err();
    let DriftError::Aggregate { failures, .. } = err else {
        panic!("expected an aggregate error, got {err}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].resource,
        ResourceRef::new(ResourceKind::NodePool, "general")
    );
    assert!(matches!(
        &failures[0].error,
        DriftError::ImmutableFieldViolation { field, .. } if field == "instance_type"
    ));
    assert!(cloud.mutations().is_empty());
}

fn file_system_id(cloud: &FakeCloud) -> String {
    cloud.state().file_systems.keys().next().unwrap().clone()
}

#[tokio::test(start_paused = true)]
async fn cluster_encryption_key_cannot_be_added_in_place() {
    let (cloud, aws, mut config) = deployed().await;
    let key = "arn:aws:kms:us-west-2:123456789012:key/1234abcd";
    aws_mut(&mut config).eks_kms_arn = Some(key.to_string());

    let err = aws
        .reconcile(&OpContext::default(), &config)
        .await
        .unwrap_err();
    match err {
        DriftError::ImmutableFieldViolation {
            kind,
            identity,
            field,
            actual,
            desired,
        } => {
            assert_eq!(kind, ResourceKind::ManagedCluster);
            assert_eq!(identity, "demo");
            assert_eq!(field, "kms_key_arn");
            assert_eq!(actual, "None");
            assert_eq!(desired, format!("Some({key:?})"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(cloud.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn storage_encryption_cannot_be_turned_off() {
    let (cloud, aws, mut config) = deployed().await;
    let id = file_system_id(&cloud);
    aws_mut(&mut config).efs.encrypted = false;

    let err = aws
        .reconcile(&OpContext::default(), &config)
        .await
        .unwrap_err();
    match err {
        DriftError::ImmutableFieldViolation {
            kind,
            identity,
            field,
            actual,
            desired,
        } => {
            assert_eq!(kind, ResourceKind::SharedStorage);
            assert_eq!(identity, id);
            assert_eq!(field, "encrypted");
            assert_eq!(actual, "true");
            assert_eq!(desired, "false");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(cloud.mutations().is_empty());
    assert!(cloud.state().file_systems[&id].encrypted);
}

#[tokio::test(start_paused = true)]
async fn role_trust_cannot_be_changed_in_place() {
    let (cloud, aws, config) = deployed().await;
    cloud
        .state()
        .roles
        .get_mut("demo-eks-node-role")
        .unwrap()
        .1
        .trusted_service = "lambda.amazonaws.com".to_string();

    let err = aws
        .reconcile(&OpContext::default(), &config)
        .await
        .unwrap_err();
    match err {
        DriftError::ImmutableFieldViolation {
            kind,
            identity,
            field,
            actual,
            desired,
        } => {
            assert_eq!(kind, ResourceKind::IdentityRole);
            assert_eq!(identity, "demo-eks-node-role");
            assert_eq!(field, "trusted_service");
            assert_eq!(actual, "lambda.amazonaws.com");
            assert_eq!(desired, "ec2.amazonaws.com");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(cloud.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn storage_throughput_is_updated_in_place() {
    let (cloud, aws, mut config) = deployed().await;
    let id = file_system_id(&cloud);
    {
        let efs = &mut aws_mut(&mut config).efs;
        efs.throughput_mode = ThroughputMode::Provisioned;
        efs.provisioned_throughput_mibps = Some(128.0);
    }

    aws.reconcile(&OpContext::default(), &config).await.unwrap();
    assert_eq!(mutations(&cloud), vec![format!("update_throughput {id}")]);
    {
        let state = cloud.state();
        let fs = &state.file_systems[&id];
        assert_eq!(fs.throughput_mode, ThroughputMode::Provisioned);
        assert_eq!(fs.provisioned_throughput_mibps, Some(128.0));
    }

    cloud.clear_calls();
    aws.reconcile(&OpContext::default(), &config).await.unwrap();
    assert!(cloud.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn role_boundary_and_policy_drift_is_corrected() {
    let (cloud, aws, mut config) = deployed().await;
    let boundary = "arn:aws:iam::123456789012:policy/platform-boundary";
    aws_mut(&mut config).permissions_boundary = Some(boundary.to_string());
    {
        let mut state = cloud.state();
        let (_, role) = state.roles.get_mut("demo-eks-cluster-role").unwrap();
        role.managed_policies.clear();
        role.managed_policies
            .insert("arn:aws:iam::aws:policy/AdministratorAccess".to_string());
    }

    aws.reconcile(&OpContext::default(), &config).await.unwrap();
    assert_eq!(
        sorted_mutations(&cloud),
        vec![
            "attach_role_policy demo-eks-cluster-role",
            "detach_role_policy demo-eks-cluster-role",
            "set_permissions_boundary demo-eks-cluster-role",
            "set_permissions_boundary demo-eks-node-role",
        ]
    );
    {
        let state = cloud.state();
        let (_, role) = &state.roles["demo-eks-cluster-role"];
        assert_eq!(role.permissions_boundary.as_deref(), Some(boundary));
        assert_eq!(
            role.managed_policies,
            BTreeSet::from(["arn:aws:iam::aws:policy/AmazonEKSClusterPolicy".to_string()])
        );
    }

    cloud.clear_calls();
    aws.reconcile(&OpContext::default(), &config).await.unwrap();
    assert!(cloud.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failing_pool_does_not_stop_its_siblings() {
    let (cloud, aws, mut config) = deployed().await;
    cloud
        .state()
        .node_pools
        .remove(&("demo".to_string(), "gpu".to_string()));
    aws_mut(&mut config)
        .node_groups
        .get_mut("general")
        .unwrap()
        .max_nodes = 5;
    cloud.fail_on("create_node_pool", "gpu");

    let err = aws
        .reconcile(&OpContext::default(), &config)
        .await
        .unwrap_err();
    let DriftError::Aggregate { failures, .. } = err else {
        panic!("expected an aggregate error, got {err}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].resource,
        ResourceRef::new(ResourceKind::NodePool, "gpu")
    );

    assert_eq!(
        sorted_mutations(&cloud),
        vec!["create_node_pool gpu", "update_node_pool general scaling"]
    );
    let state = cloud.state();
    let general = &state.node_pools[&("demo".to_string(), "general".to_string())];
    assert_eq!(general.scaling.max, 5);
}

#[tokio::test(start_paused = true)]
async fn mutable_changes_issue_exactly_the_needed_updates() {
    let (cloud, aws, mut config) = deployed().await;
    {
        let settings = aws_mut(&mut config);
        settings.kubernetes_version = "1.31".to_string();
        settings.endpoint_private_access = true;
        let general = settings.node_groups.get_mut("general").unwrap();
        general.max_nodes = 5;
        general
            .labels
            .insert("workload".to_string(), "general".to_string());
    }

    aws.reconcile(&OpContext::default(), &config).await.unwrap();
    assert_eq!(
        sorted_mutations(&cloud),
        vec![
            "update_cluster demo endpoint_access",
            "update_cluster demo kubernetes_version",
            "update_node_pool general labels",
            "update_node_pool general scaling",
        ]
    );

    cloud.clear_calls();
    aws.reconcile(&OpContext::default(), &config).await.unwrap();
    assert!(cloud.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn node_pool_set_converges() {
    let cloud = FakeCloud::new();
    let aws = provider(&cloud);
    let mut config = project();
    {
        let settings = aws_mut(&mut config);
        settings.node_groups.remove("gpu");
        settings.node_groups.insert(
            "legacy".to_string(),
            NodeGroupSettings::new("m4.large", 1, 1),
        );
    }
    aws.reconcile(&OpContext::default(), &config).await.unwrap();
    cloud.clear_calls();

    aws.reconcile(&OpContext::default(), &project())
        .await
        .unwrap();
    assert_eq!(
        sorted_mutations(&cloud),
        vec!["create_node_pool gpu", "delete_node_pool legacy"]
    );
    let pools: Vec<String> = cloud
        .state()
        .node_pools
        .keys()
        .map(|(_, pool)| pool.clone())
        .collect();
    assert_eq!(pools, vec!["general", "gpu"]);
}

#[tokio::test(start_paused = true)]
async fn summary_and_kubeconfig_reflect_the_deployment() {
    let (_cloud, aws, config) = deployed().await;
    let ctx = OpContext::default();

    let summary = aws.summary(&ctx, &config).await.unwrap();
    let get = |key: &str| {
        summary
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    };
    assert_eq!(get("cluster").as_deref(), Some("demo"));
    assert_eq!(get("node_pools").as_deref(), Some("general, gpu"));
    assert_eq!(get("gpu_pools").as_deref(), Some("gpu"));
    assert!(get("shared_storage").unwrap().starts_with("fs-"));

    let kubeconfig = aws.kubeconfig(&ctx, &config).await.unwrap();
    let parsed: serde_yaml::Value = serde_yaml::from_slice(&kubeconfig).unwrap();
    assert_eq!(parsed["current-context"].as_str(), Some("demo"));
}

#[tokio::test(start_paused = true)]
async fn kubeconfig_before_deploy_is_an_error() {
    let cloud = FakeCloud::new();
    let err = provider(&cloud)
        .kubeconfig(&OpContext::default(), &project())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("driftless:cluster=demo"));
}

#[tokio::test(start_paused = true)]
async fn destroy_removes_everything() {
    let (cloud, aws, config) = deployed().await;
    aws.destroy(&OpContext::default(), &config, &DestroyOptions::default())
        .await
        .unwrap();

    let state = cloud.state();
    assert!(state.vpcs.is_empty());
    assert!(state.subnets.is_empty());
    assert!(state.internet_gateways.is_empty());
    assert!(state.route_tables.is_empty());
    assert!(state.roles.is_empty());
    assert!(state.clusters.is_empty());
    assert!(state.node_pools.is_empty());
    assert!(state.file_systems.is_empty());
    assert!(state.mount_targets.is_empty());
}

#[tokio::test(start_paused = true)]
async fn force_destroy_continues_and_reports_exactly_the_failures() {
    let (cloud, aws, config) = deployed().await;
    cloud.fail_on("delete_node_pool", "gpu");

    let options = DestroyOptions {
        force: true,
        sweep_passes: 3,
        sweep_interval: Duration::from_secs(15),
    };
    let err = aws
        .destroy(&OpContext::default(), &config, &options)
        .await
        .unwrap_err();

    let failed: BTreeSet<ResourceRef> = err.failed_resources().into_iter().cloned().collect();
    assert_eq!(
        failed,
        BTreeSet::from([
            ResourceRef::new(ResourceKind::NodePool, "gpu"),
            ResourceRef::new(ResourceKind::ManagedCluster, "demo"),
        ])
    );
    assert_eq!(err.failed_resources().len(), 2);

    let state = cloud.state();
    assert!(state.file_systems.is_empty());
    assert!(state.roles.is_empty());
    assert!(state.vpcs.is_empty());
    assert!(state.subnets.is_empty());
    assert_eq!(state.node_pools.len(), 1);
    assert_eq!(state.clusters.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn force_destroy_sweep_cleans_up_once_the_failure_clears() {
    let (cloud, aws, config) = deployed().await;
    cloud.fail_on("delete_role", "*");

    let options = DestroyOptions {
        force: true,
        ..DestroyOptions::default()
    };
    let ctx = OpContext::default();
    let first = aws.destroy(&ctx, &config, &options).await.unwrap_err();
    assert_eq!(first.failed_resources().len(), 2);

    cloud.heal();
    aws.destroy(&ctx, &config, &options).await.unwrap();
    assert!(cloud.state().roles.is_empty());
}

#[tokio::test(start_paused = true)]
async fn strict_destroy_stops_at_the_first_failure() {
    let (cloud, aws, config) = deployed().await;
    cloud.fail_on("delete_file_system", "*");

    let err = aws
        .destroy(&OpContext::default(), &config, &DestroyOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DriftError::Upstream {
            kind: ResourceKind::SharedStorage,
            ..
        }
    ));

    let ops: BTreeSet<&str> = cloud.mutations().iter().map(|c| c.op).collect();
    assert!(!ops.contains("delete_node_pool"));
    assert!(!ops.contains("delete_cluster"));
    assert!(!ops.contains("delete_vpc"));
    assert_eq!(cloud.state().clusters.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unlistable_mount_targets_are_reported_and_keep_the_file_system() {
    let (cloud, aws, config) = deployed().await;
    cloud.fail_on("list_mount_targets", "*");

    let options = DestroyOptions {
        force: true,
        ..DestroyOptions::default()
    };
    let err = aws
        .destroy(&OpContext::default(), &config, &options)
        .await
        .unwrap_err();

    assert!(
        err.failed_resources()
            .iter()
            .any(|r| r.kind == ResourceKind::MountTarget),
        "unexpected failures: {err}"
    );
    let ops: BTreeSet<&str> = cloud.mutations().iter().map(|c| c.op).collect();
    assert!(!ops.contains("delete_file_system"));
    assert_eq!(cloud.state().file_systems.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unmanaged_role_with_the_same_name_is_not_adopted() {
    let (cloud, aws, config) = deployed().await;
    cloud
        .state()
        .roles
        .get_mut("demo-eks-node-role")
        .unwrap()
        .1
        .tags
        .clear();

    let err = aws
        .reconcile(&OpContext::default(), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, DriftError::Validation { .. }));
    assert!(cloud.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelled_reconcile_makes_no_calls_after_cancellation() {
    let cloud = FakeCloud::new();
    let ctx = OpContext::default();
    ctx.cancellation().cancel();

    let err = provider(&cloud)
        .reconcile(&ctx, &project())
        .await
        .unwrap_err();
    assert!(err.is_cancelled(), "unexpected error: {err}");
    assert!(cloud.mutations().is_empty());
}
