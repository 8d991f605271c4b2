//! The `aws` provider: VPC, IAM roles, EKS control plane, managed node
//! groups and EFS, reconciled in that order and destroyed in reverse.

pub mod cli;
pub mod clients;
pub mod cluster;
pub mod destroy;
pub mod fake;
pub mod iam;
pub mod kubeconfig;
pub mod network;
pub mod node_pools;
pub mod state;
pub mod storage;

use std::sync::Arc;

use async_trait::async_trait;
use driftless_common::{
    project::{ProjectConfig, AWS_PROVIDER},
    settings::PollSettings,
    tags::ClusterTags,
    DriftError, DriftResult, OpContext, ResourceKind,
};
use tracing::info;

use self::clients::{AwsClientFactory, AwsClients};
use crate::{
    provider::{DestroyOptions, Provider, Summary},
    reconcile::Discovered,
};

/// Everything one pass needs, borrowed for its duration.
pub struct AwsSession<'a> {
    pub ctx: &'a OpContext,
    pub clients: &'a AwsClients,
    pub tags: &'a ClusterTags,
    pub poll: &'a PollSettings,
}

pub struct AwsProvider {
    factory: Arc<dyn AwsClientFactory>,
    poll: PollSettings,
}

impl AwsProvider {
    pub fn new(factory: Arc<dyn AwsClientFactory>, poll: PollSettings) -> Self {
        Self { factory, poll }
    }

    fn session<'a>(
        &'a self,
        ctx: &'a OpContext,
        clients: &'a AwsClients,
        tags: &'a ClusterTags,
    ) -> AwsSession<'a> {
        AwsSession {
            ctx,
            clients,
            tags,
            poll: &self.poll,
        }
    }
}

#[async_trait]
impl Provider for AwsProvider {
    fn name(&self) -> &str {
        AWS_PROVIDER
    }

    fn validate(&self, config: &ProjectConfig) -> DriftResult<()> {
        config.validate()?;
        let aws = config.aws()?;
        let tags = ClusterTags::new(&config.project_name);
        let spec = network::desired(aws, &tags)?;
        network::subnet_cidrs(&spec.cidr_block, spec.availability_zones.len())?;
        Ok(())
    }

    async fn reconcile(&self, ctx: &OpContext, config: &ProjectConfig) -> DriftResult<()> {
        self.validate(config)?;
        let aws = config.aws()?;
        let clients = self.factory.clients(aws)?;
        let tags = ClusterTags::new(&config.project_name);
        let s = self.session(ctx, &clients, &tags);

        let network_spec = network::desired(aws, &tags)?;
        let actual = network::discover(&s).await?;
        let network = network::reconcile(&s, &network_spec, actual).await?;

        let roles = iam::reconcile_all(&s, &iam::desired(aws, &tags)).await?;

        let cluster_spec = cluster::desired(aws, &tags, &network, &roles);
        let actual = cluster::discover(&s).await?;
        let cluster = cluster::reconcile(&s, &cluster_spec, actual).await?;

        let pool_specs = node_pools::desired(aws, &tags, &network, &roles);
        let actual = node_pools::discover(&s, &cluster.name).await?;
        let pools = node_pools::reconcile(&s, &cluster.name, &pool_specs, actual).await?;

        let storage_spec = storage::desired(aws, &tags, &network);
        let actual = storage::discover(&s).await?;
        let storage = storage::reconcile(&s, storage_spec.as_ref(), actual).await?;

        info!(
            project = %config.project_name,
            vpc = %network.vpc.id,
            cluster = %cluster.name,
            version = %cluster.version,
            node_pools = pools.len(),
            shared_storage = storage.is_some(),
            "aws deployment reconciled"
        );
        Ok(())
    }

    async fn destroy(
        &self,
        ctx: &OpContext,
        config: &ProjectConfig,
        options: &DestroyOptions,
    ) -> DriftResult<()> {
        config.validate()?;
        let aws = config.aws()?;
        let clients = self.factory.clients(aws)?;
        let tags = ClusterTags::new(&config.project_name);
        let s = self.session(ctx, &clients, &tags);
        destroy::run(&s, options).await
    }

    async fn kubeconfig(&self, ctx: &OpContext, config: &ProjectConfig) -> DriftResult<Vec<u8>> {
        let aws = config.aws()?;
        let clients = self.factory.clients(aws)?;
        let tags = ClusterTags::new(&config.project_name);
        let s = self.session(ctx, &clients, &tags);
        match cluster::discover(&s).await? {
            Discovered::Found(cluster) => kubeconfig::render(&cluster, &aws.region),
            Discovered::NotFound => Err(DriftError::upstream(
                ResourceKind::Kubeconfig,
                tags.describe(),
                "fetch",
                anyhow::anyhow!("no managed cluster found; run deploy first"),
            )),
        }
    }

    async fn summary(&self, ctx: &OpContext, config: &ProjectConfig) -> DriftResult<Summary> {
        let aws = config.aws()?;
        let clients = self.factory.clients(aws)?;
        let tags = ClusterTags::new(&config.project_name);
        let s = self.session(ctx, &clients, &tags);

        let mut summary: Summary = vec![
            ("provider".into(), AWS_PROVIDER.into()),
            ("project".into(), config.project_name.clone()),
            ("region".into(), aws.region.clone()),
        ];
        match network::discover(&s).await? {
            Discovered::Found(network) => {
                summary.push(("vpc".into(), network.vpc.id.clone()));
                summary.push(("subnets".into(), network.subnet_ids().join(", ")));
            }
            Discovered::NotFound => summary.push(("vpc".into(), "not found".into())),
        }
        match cluster::discover(&s).await? {
            Discovered::Found(cluster) => {
                let pools = node_pools::discover(&s, &cluster.name).await?;
                let gpu: Vec<&str> = node_pools::gpu_pools(&pools).into_iter().collect();
                summary.push(("cluster".into(), cluster.name.clone()));
                summary.push(("status".into(), format!("{:?}", cluster.status)));
                summary.push(("kubernetes_version".into(), cluster.version.clone()));
                summary.push((
                    "endpoint".into(),
                    cluster.endpoint.clone().unwrap_or_else(|| "pending".into()),
                ));
                summary.push((
                    "node_pools".into(),
                    pools.keys().cloned().collect::<Vec<_>>().join(", "),
                ));
                if !gpu.is_empty() {
                    summary.push(("gpu_pools".into(), gpu.join(", ")));
                }
            }
            Discovered::NotFound => summary.push(("cluster".into(), "not found".into())),
        }
        let storage = match storage::discover(&s).await? {
            Discovered::Found(state) => state.file_system.id,
            Discovered::NotFound if aws.efs.enabled => "not found".into(),
            Discovered::NotFound => "disabled".into(),
        };
        summary.push(("shared_storage".into(), storage));
        Ok(summary)
    }
}
