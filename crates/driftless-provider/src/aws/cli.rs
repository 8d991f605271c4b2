//! AWS clients backed by the `aws` command line tool.
//!
//! Every call runs `aws <service> <operation> --region <region> --output json`
//! and decodes stdout. Credentials and profiles come from the environment the
//! way the CLI resolves them.

use std::{collections::BTreeSet, sync::Arc};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use driftless_common::{
    project::{AwsSettings, Taint, TaintEffect, ThroughputMode},
    tags::{ClusterTags, Tags, CLUSTER_TAG},
    util::command::run_command,
    DriftError, DriftResult,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::trace;

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

const AWS: &str = "aws";
const GPU_AMI: &str = "AL2_x86_64_GPU";
const STANDARD_AMI: &str = "AL2_x86_64";

/// Builds CLI-backed clients for the configured region.
pub struct CliClientFactory;

impl AwsClientFactory for CliClientFactory {
    fn clients(&self, settings: &AwsSettings) -> DriftResult<AwsClients> {
        if settings.region.trim().is_empty() {
            return Err(DriftError::validation("aws.region", "must not be empty"));
        }
        let cli = Arc::new(AwsCli {
            region: settings.region.clone(),
        });
        Ok(AwsClients {
            network: cli.clone(),
            iam: cli.clone(),
            eks: cli.clone(),
            storage: cli,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AwsCli {
    region: String,
}

impl AwsCli {
    async fn output(&self, service: &str, op: &str, args: &[String]) -> Result<String> {
        let mut argv: Vec<&str> = vec![service, op];
        argv.extend(args.iter().map(String::as_str));
        argv.extend(["--region", self.region.as_str(), "--output", "json"]);
        let out = run_command(AWS, &argv, [("AWS_PAGER", "")]).await?;
        trace!(service, op, stdout = %out.stdout, "aws response");
        Ok(out.stdout)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        service: &str,
        op: &str,
        args: &[String],
    ) -> Result<T> {
        let stdout = self.output(service, op, args).await?;
        serde_json::from_str(&stdout)
            .with_context(|| format!("decoding `aws {service} {op}` output"))
    }

    /// For operations whose output is not needed.
    async fn exec(&self, service: &str, op: &str, args: &[String]) -> Result<()> {
        self.output(service, op, args).await.map(|_| ())
    }

    /// `Ok(None)` when the call failed with `not_found` in the error text.
    async fn call_optional<T: DeserializeOwned>(
        &self,
        service: &str,
        op: &str,
        args: &[String],
        not_found: &str,
    ) -> Result<Option<T>> {
        match self.call(service, op, args).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if format!("{e:#}").contains(not_found) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ---- tags ----

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    key: String,
    value: String,
}

fn tag_list(tags: &Tags) -> Vec<Tag> {
    tags.iter()
        .map(|(k, v)| Tag {
            key: k.clone(),
            value: v.clone(),
        })
        .collect()
}

fn tag_map(tags: Vec<Tag>) -> Tags {
    tags.into_iter().map(|t| (t.key, t.value)).collect()
}

fn ec2_filters(flag: &str, tags: &ClusterTags) -> Vec<String> {
    let mut out = vec![flag.to_string()];
    out.extend(
        tags.filters()
            .iter()
            .map(|(k, v)| format!("Name=tag:{k},Values={v}")),
    );
    out
}

fn tag_specification(resource_type: &str, tags: &Tags) -> Result<String> {
    Ok(serde_json::to_string(&json!([{
        "ResourceType": resource_type,
        "Tags": tag_list(tags),
    }]))?)
}

// ---- ec2 ----

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiVpc {
    vpc_id: String,
    cidr_block: String,
    #[serde(default)]
    tags: Vec<Tag>,
}

impl From<ApiVpc> for Vpc {
    fn from(v: ApiVpc) -> Self {
        Vpc {
            id: v.vpc_id,
            cidr_block: v.cidr_block,
            tags: tag_map(v.tags),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiSubnet {
    subnet_id: String,
    vpc_id: String,
    availability_zone: String,
    cidr_block: String,
    #[serde(default)]
    tags: Vec<Tag>,
}

impl From<ApiSubnet> for Subnet {
    fn from(s: ApiSubnet) -> Self {
        Subnet {
            id: s.subnet_id,
            vpc_id: s.vpc_id,
            availability_zone: s.availability_zone,
            cidr_block: s.cidr_block,
            tags: tag_map(s.tags),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiAttachment {
    vpc_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiInternetGateway {
    internet_gateway_id: String,
    #[serde(default)]
    attachments: Vec<ApiAttachment>,
    #[serde(default)]
    tags: Vec<Tag>,
}

impl From<ApiInternetGateway> for InternetGateway {
    fn from(g: ApiInternetGateway) -> Self {
        InternetGateway {
            id: g.internet_gateway_id,
            vpc_id: g.attachments.into_iter().next().map(|a| a.vpc_id),
            tags: tag_map(g.tags),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiAssociation {
    route_table_association_id: String,
    #[serde(default)]
    main: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiRouteTable {
    route_table_id: String,
    vpc_id: String,
    #[serde(default)]
    associations: Vec<ApiAssociation>,
    #[serde(default)]
    tags: Vec<Tag>,
}

impl From<ApiRouteTable> for RouteTable {
    fn from(t: ApiRouteTable) -> Self {
        RouteTable {
            id: t.route_table_id,
            vpc_id: t.vpc_id,
            association_ids: t
                .associations
                .into_iter()
                .filter(|a| !a.main)
                .map(|a| a.route_table_association_id)
                .collect(),
            tags: tag_map(t.tags),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiNatGateway {
    nat_gateway_id: String,
    vpc_id: String,
    state: String,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiAddress {
    allocation_id: String,
    association_id: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Vpcs {
    vpcs: Vec<ApiVpc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatedVpc {
    vpc: ApiVpc,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Subnets {
    subnets: Vec<ApiSubnet>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatedSubnet {
    subnet: ApiSubnet,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InternetGateways {
    internet_gateways: Vec<ApiInternetGateway>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatedInternetGateway {
    internet_gateway: ApiInternetGateway,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RouteTables {
    route_tables: Vec<ApiRouteTable>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatedRouteTable {
    route_table: ApiRouteTable,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Associated {
    association_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NatGateways {
    nat_gateways: Vec<ApiNatGateway>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Addresses {
    addresses: Vec<ApiAddress>,
}

#[async_trait]
impl NetworkApi for AwsCli {
    async fn list_vpcs(&self, tags: &ClusterTags) -> Result<Vec<Vpc>> {
        let out: Vpcs = self
            .call("ec2", "describe-vpcs", &ec2_filters("--filters", tags))
            .await?;
        Ok(out.vpcs.into_iter().map(Vpc::from).collect())
    }

    async fn create_vpc(&self, cidr_block: &str, tags: &Tags) -> Result<Vpc> {
        let out: CreatedVpc = self
            .call(
                "ec2",
                "create-vpc",
                &args([
                    "--cidr-block",
                    cidr_block,
                    "--tag-specifications",
                    &tag_specification("vpc", tags)?,
                ]),
            )
            .await?;
        let vpc = Vpc::from(out.vpc);
        for attribute in ["--enable-dns-support", "--enable-dns-hostnames"] {
            self.exec(
                "ec2",
                "modify-vpc-attribute",
                &args(["--vpc-id", &vpc.id, attribute, r#"{"Value":true}"#]),
            )
            .await?;
        }
        Ok(vpc)
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        self.exec("ec2", "delete-vpc", &args(["--vpc-id", vpc_id])).await
    }

    async fn tag_resource(&self, resource_id: &str, tags: &Tags) -> Result<()> {
        let tags = serde_json::to_string(&tag_list(tags))?;
        self.exec(
            "ec2",
            "create-tags",
            &args(["--resources", resource_id, "--tags", &tags]),
        )
        .await
    }

    async fn list_subnets(&self, tags: &ClusterTags) -> Result<Vec<Subnet>> {
        let out: Subnets = self
            .call("ec2", "describe-subnets", &ec2_filters("--filters", tags))
            .await?;
        Ok(out.subnets.into_iter().map(Subnet::from).collect())
    }

    async fn create_subnet(
        &self,
        vpc_id: &str,
        availability_zone: &str,
        cidr_block: &str,
        tags: &Tags,
    ) -> Result<Subnet> {
        let out: CreatedSubnet = self
            .call(
                "ec2",
                "create-subnet",
                &args([
                    "--vpc-id",
                    vpc_id,
                    "--availability-zone",
                    availability_zone,
                    "--cidr-block",
                    cidr_block,
                    "--tag-specifications",
                    &tag_specification("subnet", tags)?,
                ]),
            )
            .await?;
        let subnet = Subnet::from(out.subnet);
        self.exec(
            "ec2",
            "modify-subnet-attribute",
            &args(["--subnet-id", &subnet.id, "--map-public-ip-on-launch"]),
        )
        .await?;
        Ok(subnet)
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        self.exec("ec2", "delete-subnet", &args(["--subnet-id", subnet_id]))
            .await
    }

    async fn list_internet_gateways(&self, tags: &ClusterTags) -> Result<Vec<InternetGateway>> {
        let out: InternetGateways = self
            .call(
                "ec2",
                "describe-internet-gateways",
                &ec2_filters("--filters", tags),
            )
            .await?;
        Ok(out
            .internet_gateways
            .into_iter()
            .map(InternetGateway::from)
            .collect())
    }

    async fn create_internet_gateway(&self, vpc_id: &str, tags: &Tags) -> Result<InternetGateway> {
        let out: CreatedInternetGateway = self
            .call(
                "ec2",
                "create-internet-gateway",
                &args([
                    "--tag-specifications",
                    &tag_specification("internet-gateway", tags)?,
                ]),
            )
            .await?;
        let mut gateway = InternetGateway::from(out.internet_gateway);
        self.exec(
            "ec2",
            "attach-internet-gateway",
            &args(["--internet-gateway-id", &gateway.id, "--vpc-id", vpc_id]),
        )
        .await?;
        gateway.vpc_id = Some(vpc_id.to_string());
        Ok(gateway)
    }

    async fn delete_internet_gateway(&self, gateway: &InternetGateway) -> Result<()> {
        if let Some(vpc_id) = &gateway.vpc_id {
            self.exec(
                "ec2",
                "detach-internet-gateway",
                &args(["--internet-gateway-id", &gateway.id, "--vpc-id", vpc_id]),
            )
            .await?;
        }
        self.exec(
            "ec2",
            "delete-internet-gateway",
            &args(["--internet-gateway-id", &gateway.id]),
        )
        .await
    }

    async fn list_route_tables(&self, tags: &ClusterTags) -> Result<Vec<RouteTable>> {
        let out: RouteTables = self
            .call("ec2", "describe-route-tables", &ec2_filters("--filters", tags))
            .await?;
        Ok(out.route_tables.into_iter().map(RouteTable::from).collect())
    }

    async fn create_route_table(
        &self,
        vpc_id: &str,
        gateway_id: &str,
        subnet_ids: &[String],
        tags: &Tags,
    ) -> Result<RouteTable> {
        let out: CreatedRouteTable = self
            .call(
                "ec2",
                "create-route-table",
                &args([
                    "--vpc-id",
                    vpc_id,
                    "--tag-specifications",
                    &tag_specification("route-table", tags)?,
                ]),
            )
            .await?;
        let mut table = RouteTable::from(out.route_table);
        self.exec(
            "ec2",
            "create-route",
            &args([
                "--route-table-id",
                &table.id,
                "--destination-cidr-block",
                "0.0.0.0/0",
                "--gateway-id",
                gateway_id,
            ]),
        )
        .await?;
        for subnet in subnet_ids {
            let associated: Associated = self
                .call(
                    "ec2",
                    "associate-route-table",
                    &args(["--route-table-id", &table.id, "--subnet-id", subnet]),
                )
                .await?;
            table.association_ids.push(associated.association_id);
        }
        Ok(table)
    }

    async fn delete_route_table(&self, table: &RouteTable) -> Result<()> {
        for association in &table.association_ids {
            self.exec(
                "ec2",
                "disassociate-route-table",
                &args(["--association-id", association]),
            )
            .await?;
        }
        self.exec(
            "ec2",
            "delete-route-table",
            &args(["--route-table-id", &table.id]),
        )
        .await
    }

    async fn list_nat_gateways(&self, tags: &ClusterTags) -> Result<Vec<NatGateway>> {
        // describe-nat-gateways spells its filter flag in the singular
        let out: NatGateways = self
            .call("ec2", "describe-nat-gateways", &ec2_filters("--filter", tags))
            .await?;
        Ok(out
            .nat_gateways
            .into_iter()
            .map(|g| NatGateway {
                id: g.nat_gateway_id,
                vpc_id: g.vpc_id,
                status: ResourceStatus::from_api(&g.state),
                tags: tag_map(g.tags),
            })
            .collect())
    }

    async fn delete_nat_gateway(&self, gateway_id: &str) -> Result<()> {
        self.exec(
            "ec2",
            "delete-nat-gateway",
            &args(["--nat-gateway-id", gateway_id]),
        )
        .await
    }

    async fn list_elastic_ips(&self, tags: &ClusterTags) -> Result<Vec<ElasticIp>> {
        let out: Addresses = self
            .call("ec2", "describe-addresses", &ec2_filters("--filters", tags))
            .await?;
        Ok(out
            .addresses
            .into_iter()
            .map(|a| ElasticIp {
                allocation_id: a.allocation_id,
                association_id: a.association_id,
                tags: tag_map(a.tags),
            })
            .collect())
    }

    async fn release_elastic_ip(&self, address: &ElasticIp) -> Result<()> {
        if let Some(association) = &address.association_id {
            self.exec(
                "ec2",
                "disassociate-address",
                &args(["--association-id", association]),
            )
            .await?;
        }
        self.exec(
            "ec2",
            "release-address",
            &args(["--allocation-id", &address.allocation_id]),
        )
        .await
    }
}

// ---- iam ----

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiBoundary {
    permissions_boundary_arn: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiRole {
    role_name: String,
    arn: String,
    #[serde(default)]
    assume_role_policy_document: Value,
    permissions_boundary: Option<ApiBoundary>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RoleOutput {
    role: ApiRole,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Roles {
    roles: Vec<ApiRole>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiAttachedPolicy {
    policy_arn: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AttachedPolicies {
    attached_policies: Vec<ApiAttachedPolicy>,
}

/// The first service principal in a trust policy. The CLI decodes the
/// URL-encoded document, but older versions return it as a string.
fn trusted_service(document: &Value) -> String {
    let document = match document {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or(Value::Null),
        other => other.clone(),
    };
    let service = &document["Statement"][0]["Principal"]["Service"];
    match service {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

fn trust_policy(service: &str) -> Result<String> {
    Ok(serde_json::to_string(&json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole",
        }],
    }))?)
}

impl AwsCli {
    async fn attached_policies(&self, role: &str) -> Result<BTreeSet<String>> {
        let out: AttachedPolicies = self
            .call(
                "iam",
                "list-attached-role-policies",
                &args(["--role-name", role]),
            )
            .await?;
        Ok(out
            .attached_policies
            .into_iter()
            .map(|p| p.policy_arn)
            .collect())
    }

    async fn role_state(&self, role: ApiRole) -> Result<RoleState> {
        let managed_policies = self.attached_policies(&role.role_name).await?;
        Ok(RoleState {
            trusted_service: trusted_service(&role.assume_role_policy_document),
            permissions_boundary: role.permissions_boundary.map(|b| b.permissions_boundary_arn),
            managed_policies,
            tags: tag_map(role.tags),
            name: role.role_name,
            arn: role.arn,
        })
    }
}

#[async_trait]
impl IamApi for AwsCli {
    async fn get_role(&self, name: &str) -> Result<Option<RoleState>> {
        let out: Option<RoleOutput> = self
            .call_optional("iam", "get-role", &args(["--role-name", name]), "NoSuchEntity")
            .await?;
        match out {
            Some(out) => Ok(Some(self.role_state(out.role).await?)),
            None => Ok(None),
        }
    }

    async fn list_roles(&self, path_prefix: &str) -> Result<Vec<RoleState>> {
        // list-roles omits tags, so each role is read again
        let out: Roles = self
            .call("iam", "list-roles", &args(["--path-prefix", path_prefix]))
            .await?;
        let mut roles = Vec::with_capacity(out.roles.len());
        for role in out.roles {
            if let Some(role) = self.get_role(&role.role_name).await? {
                roles.push(role);
            }
        }
        Ok(roles)
    }

    async fn create_role(&self, spec: &RoleSpec) -> Result<RoleState> {
        let mut argv = args([
            "--role-name",
            &spec.name,
            "--path",
            &spec.path,
            "--assume-role-policy-document",
            &trust_policy(&spec.trusted_service)?,
            "--tags",
            &serde_json::to_string(&tag_list(&spec.tags))?,
        ]);
        if let Some(boundary) = &spec.permissions_boundary {
            argv.extend(args(["--permissions-boundary", boundary]));
        }
        let out: RoleOutput = self.call("iam", "create-role", &argv).await?;
        self.role_state(out.role).await
    }

    async fn set_permissions_boundary(&self, role: &str, boundary: Option<&str>) -> Result<()> {
        match boundary {
            Some(boundary) => {
                self.exec(
                    "iam",
                    "put-role-permissions-boundary",
                    &args(["--role-name", role, "--permissions-boundary", boundary]),
                )
                .await
            }
            None => {
                self.exec(
                    "iam",
                    "delete-role-permissions-boundary",
                    &args(["--role-name", role]),
                )
                .await
            }
        }
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        self.exec(
            "iam",
            "attach-role-policy",
            &args(["--role-name", role, "--policy-arn", policy_arn]),
        )
        .await
    }

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        self.exec(
            "iam",
            "detach-role-policy",
            &args(["--role-name", role, "--policy-arn", policy_arn]),
        )
        .await
    }

    async fn delete_role(&self, role: &str) -> Result<()> {
        self.exec("iam", "delete-role", &args(["--role-name", role]))
            .await
    }
}

// ---- eks ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiVpcConfig {
    #[serde(default)]
    subnet_ids: Vec<String>,
    #[serde(default)]
    endpoint_public_access: bool,
    #[serde(default)]
    endpoint_private_access: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyProvider {
    key_arn: String,
}

#[derive(Deserialize)]
struct ApiEncryption {
    provider: ApiKeyProvider,
}

#[derive(Deserialize)]
struct ApiLogSetup {
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    enabled: bool,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ApiLogging {
    #[serde(default)]
    cluster_logging: Vec<ApiLogSetup>,
}

#[derive(Deserialize)]
struct ApiCertificate {
    data: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCluster {
    name: String,
    arn: String,
    status: String,
    version: String,
    role_arn: String,
    resources_vpc_config: ApiVpcConfig,
    #[serde(default)]
    encryption_config: Vec<ApiEncryption>,
    #[serde(default)]
    logging: ApiLogging,
    endpoint: Option<String>,
    certificate_authority: Option<ApiCertificate>,
    #[serde(default)]
    tags: Tags,
}

impl From<ApiCluster> for ClusterState {
    fn from(c: ApiCluster) -> Self {
        let mut subnet_ids = c.resources_vpc_config.subnet_ids;
        subnet_ids.sort();
        ClusterState {
            name: c.name,
            arn: c.arn,
            status: ResourceStatus::from_api(&c.status),
            version: c.version,
            role_arn: c.role_arn,
            subnet_ids,
            kms_key_arn: c.encryption_config.into_iter().next().map(|e| e.provider.key_arn),
            endpoint_public_access: c.resources_vpc_config.endpoint_public_access,
            endpoint_private_access: c.resources_vpc_config.endpoint_private_access,
            enabled_log_types: c
                .logging
                .cluster_logging
                .into_iter()
                .filter(|setup| setup.enabled)
                .flat_map(|setup| setup.types)
                .collect(),
            endpoint: c.endpoint.filter(|e| !e.is_empty()),
            certificate_authority: c.certificate_authority.and_then(|ca| ca.data),
            tags: c.tags,
        }
    }
}

#[derive(Deserialize)]
struct ClusterOutput {
    cluster: ApiCluster,
}

#[derive(Deserialize)]
struct ClusterNames {
    clusters: Vec<String>,
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiScaling {
    min_size: u32,
    max_size: u32,
    desired_size: u32,
}

#[derive(Deserialize, Serialize)]
struct ApiTaint {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    effect: String,
}

impl From<&Taint> for ApiTaint {
    fn from(t: &Taint) -> Self {
        ApiTaint {
            key: t.key.clone(),
            value: t.value.clone(),
            effect: t.effect.api_name().to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiNodeGroup {
    nodegroup_name: String,
    status: String,
    #[serde(default)]
    instance_types: Vec<String>,
    #[serde(default)]
    ami_type: String,
    #[serde(default)]
    capacity_type: String,
    #[serde(default)]
    disk_size: u32,
    scaling_config: ApiScaling,
    #[serde(default)]
    labels: Tags,
    #[serde(default)]
    taints: Vec<ApiTaint>,
    #[serde(default)]
    tags: Tags,
}

impl From<ApiNodeGroup> for NodePoolState {
    fn from(g: ApiNodeGroup) -> Self {
        NodePoolState {
            name: g.nodegroup_name,
            status: ResourceStatus::from_api(&g.status),
            instance_type: g.instance_types.into_iter().next().unwrap_or_default(),
            gpu: g.ami_type.contains("GPU"),
            spot: g.capacity_type.eq_ignore_ascii_case("SPOT"),
            disk_size: g.disk_size,
            scaling: Scaling {
                min: g.scaling_config.min_size,
                max: g.scaling_config.max_size,
                desired: g.scaling_config.desired_size,
            },
            labels: g.labels,
            taints: g
                .taints
                .into_iter()
                .filter_map(|t| {
                    Some(Taint {
                        effect: TaintEffect::from_api_name(&t.effect)?,
                        key: t.key,
                        value: t.value,
                    })
                })
                .collect(),
            tags: g.tags,
        }
    }
}

#[derive(Deserialize)]
struct NodeGroupOutput {
    nodegroup: ApiNodeGroup,
}

#[derive(Deserialize)]
struct NodeGroupNames {
    nodegroups: Vec<String>,
}

#[async_trait]
impl EksApi for AwsCli {
    async fn list_clusters(&self, tags: &ClusterTags) -> Result<Vec<ClusterState>> {
        // EKS cannot filter by tag server side
        let names: ClusterNames = self.call("eks", "list-clusters", &[]).await?;
        let mut clusters = Vec::new();
        for name in names.clusters {
            if let Some(cluster) = self.describe_cluster(&name).await? {
                if tags.owns(&cluster.tags) {
                    clusters.push(cluster);
                }
            }
        }
        Ok(clusters)
    }

    async fn describe_cluster(&self, name: &str) -> Result<Option<ClusterState>> {
        let out: Option<ClusterOutput> = self
            .call_optional(
                "eks",
                "describe-cluster",
                &args(["--name", name]),
                "ResourceNotFoundException",
            )
            .await?;
        Ok(out.map(|o| ClusterState::from(o.cluster)))
    }

    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<ClusterState> {
        let vpc_config = json!({
            "subnetIds": spec.subnet_ids,
            "endpointPublicAccess": spec.endpoint_public_access,
            "endpointPrivateAccess": spec.endpoint_private_access,
        });
        let logging = json!({
            "clusterLogging": [{ "types": spec.enabled_log_types, "enabled": true }],
        });
        let mut argv = args([
            "--name",
            &spec.name,
            "--kubernetes-version",
            &spec.version,
            "--role-arn",
            &spec.role_arn,
            "--resources-vpc-config",
            &vpc_config.to_string(),
            "--logging",
            &logging.to_string(),
            "--tags",
            &serde_json::to_string(&spec.tags)?,
        ]);
        if let Some(key) = &spec.kms_key_arn {
            let encryption = json!([{ "resources": ["secrets"], "provider": { "keyArn": key } }]);
            argv.extend(args(["--encryption-config", &encryption.to_string()]));
        }
        let out: ClusterOutput = self.call("eks", "create-cluster", &argv).await?;
        Ok(out.cluster.into())
    }

    async fn update_cluster(&self, name: &str, update: &ClusterUpdate) -> Result<()> {
        match update {
            ClusterUpdate::Version(version) => {
                self.exec(
                    "eks",
                    "update-cluster-version",
                    &args(["--name", name, "--kubernetes-version", version]),
                )
                .await
            }
            ClusterUpdate::EndpointAccess { public, private } => {
                let config = json!({
                    "endpointPublicAccess": public,
                    "endpointPrivateAccess": private,
                });
                self.exec(
                    "eks",
                    "update-cluster-config",
                    &args(["--name", name, "--resources-vpc-config", &config.to_string()]),
                )
                .await
            }
            ClusterUpdate::Logging { enable, disable } => {
                let mut setups = Vec::new();
                if !enable.is_empty() {
                    setups.push(json!({ "types": enable, "enabled": true }));
                }
                if !disable.is_empty() {
                    setups.push(json!({ "types": disable, "enabled": false }));
                }
                let logging = json!({ "clusterLogging": setups });
                self.exec(
                    "eks",
                    "update-cluster-config",
                    &args(["--name", name, "--logging", &logging.to_string()]),
                )
                .await
            }
        }
    }

    async fn tag_resource(&self, arn: &str, tags: &Tags) -> Result<()> {
        self.exec(
            "eks",
            "tag-resource",
            &args(["--resource-arn", arn, "--tags", &serde_json::to_string(tags)?]),
        )
        .await
    }

    async fn delete_cluster(&self, name: &str) -> Result<()> {
        self.exec("eks", "delete-cluster", &args(["--name", name]))
            .await
    }

    async fn list_node_pools(&self, cluster: &str) -> Result<Vec<NodePoolState>> {
        let names: NodeGroupNames = self
            .call("eks", "list-nodegroups", &args(["--cluster-name", cluster]))
            .await?;
        let mut pools = Vec::new();
        for name in names.nodegroups {
            if let Some(pool) = self.describe_node_pool(cluster, &name).await? {
                pools.push(pool);
            }
        }
        Ok(pools)
    }

    async fn describe_node_pool(
        &self,
        cluster: &str,
        name: &str,
    ) -> Result<Option<NodePoolState>> {
        let out: Option<NodeGroupOutput> = self
            .call_optional(
                "eks",
                "describe-nodegroup",
                &args(["--cluster-name", cluster, "--nodegroup-name", name]),
                "ResourceNotFoundException",
            )
            .await?;
        Ok(out.map(|o| NodePoolState::from(o.nodegroup)))
    }

    async fn create_node_pool(&self, cluster: &str, spec: &NodePoolSpec) -> Result<NodePoolState> {
        let scaling = ApiScaling {
            min_size: spec.min_size,
            max_size: spec.max_size,
            desired_size: spec.min_size,
        };
        let taints: Vec<ApiTaint> = spec.taints.iter().map(ApiTaint::from).collect();
        let disk_size = spec.disk_size.to_string();
        let mut argv = args([
            "--cluster-name",
            cluster,
            "--nodegroup-name",
            &spec.name,
            "--instance-types",
            &spec.instance_type,
            "--ami-type",
            if spec.gpu { GPU_AMI } else { STANDARD_AMI },
            "--capacity-type",
            if spec.spot { "SPOT" } else { "ON_DEMAND" },
            "--disk-size",
            &disk_size,
            "--scaling-config",
            &serde_json::to_string(&scaling)?,
            "--node-role",
            &spec.node_role_arn,
            "--labels",
            &serde_json::to_string(&spec.labels)?,
            "--tags",
            &serde_json::to_string(&spec.tags)?,
        ]);
        if !taints.is_empty() {
            argv.extend(args(["--taints", &serde_json::to_string(&taints)?]));
        }
        argv.push("--subnets".to_string());
        argv.extend(spec.subnet_ids.iter().cloned());
        let out: NodeGroupOutput = self.call("eks", "create-nodegroup", &argv).await?;
        Ok(out.nodegroup.into())
    }

    async fn update_node_pool(
        &self,
        cluster: &str,
        name: &str,
        update: &NodePoolUpdate,
    ) -> Result<()> {
        let (flag, value) = match update {
            NodePoolUpdate::Scaling(scaling) => (
                "--scaling-config",
                serde_json::to_string(&ApiScaling {
                    min_size: scaling.min,
                    max_size: scaling.max,
                    desired_size: scaling.desired,
                })?,
            ),
            NodePoolUpdate::Labels { add, remove } => (
                "--labels",
                json!({ "addOrUpdateLabels": add, "removeLabels": remove }).to_string(),
            ),
            NodePoolUpdate::Taints { add, remove } => {
                let add: Vec<ApiTaint> = add.iter().map(ApiTaint::from).collect();
                let remove: Vec<ApiTaint> = remove.iter().map(ApiTaint::from).collect();
                (
                    "--taints",
                    json!({ "addOrUpdateTaints": add, "removeTaints": remove }).to_string(),
                )
            }
        };
        self.exec(
            "eks",
            "update-nodegroup-config",
            &args(["--cluster-name", cluster, "--nodegroup-name", name, flag, &value]),
        )
        .await
    }

    async fn delete_node_pool(&self, cluster: &str, name: &str) -> Result<()> {
        self.exec(
            "eks",
            "delete-nodegroup",
            &args(["--cluster-name", cluster, "--nodegroup-name", name]),
        )
        .await
    }
}

// ---- efs ----

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiFileSystem {
    file_system_id: String,
    life_cycle_state: String,
    #[serde(default)]
    encrypted: bool,
    #[serde(default)]
    throughput_mode: String,
    provisioned_throughput_in_mibps: Option<f64>,
    #[serde(default)]
    tags: Vec<Tag>,
}

impl TryFrom<ApiFileSystem> for FileSystem {
    type Error = anyhow::Error;

    fn try_from(fs: ApiFileSystem) -> Result<Self> {
        let throughput_mode = ThroughputMode::from_api_name(&fs.throughput_mode)
            .ok_or_else(|| anyhow!("unknown throughput mode `{}`", fs.throughput_mode))?;
        Ok(FileSystem {
            id: fs.file_system_id,
            status: ResourceStatus::from_api(&fs.life_cycle_state),
            encrypted: fs.encrypted,
            throughput_mode,
            provisioned_throughput_mibps: fs.provisioned_throughput_in_mibps,
            tags: tag_map(fs.tags),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileSystems {
    file_systems: Vec<ApiFileSystem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiMountTarget {
    mount_target_id: String,
    file_system_id: String,
    subnet_id: String,
    life_cycle_state: String,
}

impl From<ApiMountTarget> for MountTarget {
    fn from(m: ApiMountTarget) -> Self {
        MountTarget {
            id: m.mount_target_id,
            file_system_id: m.file_system_id,
            subnet_id: m.subnet_id,
            status: ResourceStatus::from_api(&m.life_cycle_state),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MountTargets {
    mount_targets: Vec<ApiMountTarget>,
}

#[async_trait]
impl StorageApi for AwsCli {
    async fn list_file_systems(&self, tags: &ClusterTags) -> Result<Vec<FileSystem>> {
        // describe-file-systems has no tag filter
        let out: FileSystems = self.call("efs", "describe-file-systems", &[]).await?;
        out.file_systems
            .into_iter()
            .map(FileSystem::try_from)
            .filter(|fs| fs.as_ref().map_or(true, |fs| tags.owns(&fs.tags)))
            .collect()
    }

    async fn create_file_system(&self, spec: &StorageSpec) -> Result<FileSystem> {
        let cluster = spec
            .tags
            .get(CLUSTER_TAG)
            .ok_or_else(|| anyhow!("storage spec is missing the {CLUSTER_TAG} tag"))?;
        let token = format!("driftless-{cluster}");
        let mut argv = args([
            "--creation-token",
            &token,
            "--throughput-mode",
            spec.throughput_mode.api_name(),
            "--tags",
            &serde_json::to_string(&tag_list(&spec.tags))?,
        ]);
        let encrypted = if spec.encrypted { "--encrypted" } else { "--no-encrypted" };
        argv.push(encrypted.to_string());
        if let Some(mibps) = spec.provisioned_throughput_mibps {
            argv.extend(args(["--provisioned-throughput-in-mibps", &mibps.to_string()]));
        }
        let out: ApiFileSystem = self.call("efs", "create-file-system", &argv).await?;
        out.try_into()
    }

    async fn update_throughput(
        &self,
        file_system_id: &str,
        mode: ThroughputMode,
        provisioned_mibps: Option<f64>,
    ) -> Result<()> {
        let mut argv = args([
            "--file-system-id",
            file_system_id,
            "--throughput-mode",
            mode.api_name(),
        ]);
        if let Some(mibps) = provisioned_mibps {
            argv.extend(args(["--provisioned-throughput-in-mibps", &mibps.to_string()]));
        }
        self.exec("efs", "update-file-system", &argv).await
    }

    async fn delete_file_system(&self, file_system_id: &str) -> Result<()> {
        self.exec(
            "efs",
            "delete-file-system",
            &args(["--file-system-id", file_system_id]),
        )
        .await
    }

    async fn list_mount_targets(&self, file_system_id: &str) -> Result<Vec<MountTarget>> {
        let out: MountTargets = self
            .call(
                "efs",
                "describe-mount-targets",
                &args(["--file-system-id", file_system_id]),
            )
            .await?;
        Ok(out.mount_targets.into_iter().map(MountTarget::from).collect())
    }

    async fn create_mount_target(
        &self,
        file_system_id: &str,
        subnet_id: &str,
    ) -> Result<MountTarget> {
        let out: ApiMountTarget = self
            .call(
                "efs",
                "create-mount-target",
                &args(["--file-system-id", file_system_id, "--subnet-id", subnet_id]),
            )
            .await?;
        Ok(out.into())
    }

    async fn delete_mount_target(&self, mount_target_id: &str) -> Result<()> {
        self.exec(
            "efs",
            "delete-mount-target",
            &args(["--mount-target-id", mount_target_id]),
        )
        .await
    }
}
