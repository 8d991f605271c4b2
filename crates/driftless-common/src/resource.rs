use std::fmt;

/// Every kind of object driftless discovers, reconciles, deletes or waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Network,
    Vpc,
    Subnet,
    InternetGateway,
    RouteTable,
    NatGateway,
    ElasticIp,
    IdentityRole,
    ManagedCluster,
    NodePool,
    SharedStorage,
    MountTarget,
    DnsRecord,
    Node,
    Namespace,
    Deployment,
    Service,
    Secret,
    GitOpsController,
    Kubeconfig,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "internet-gateway",
            ResourceKind::RouteTable => "route-table",
            ResourceKind::NatGateway => "nat-gateway",
            ResourceKind::ElasticIp => "elastic-ip",
            ResourceKind::IdentityRole => "iam-role",
            ResourceKind::ManagedCluster => "managed-cluster",
            ResourceKind::NodePool => "node-pool",
            ResourceKind::SharedStorage => "shared-storage",
            ResourceKind::MountTarget => "mount-target",
            ResourceKind::DnsRecord => "dns-record",
            ResourceKind::Node => "node",
            ResourceKind::Namespace => "namespace",
            ResourceKind::Deployment => "deployment",
            ResourceKind::Service => "service",
            ResourceKind::Secret => "secret",
            ResourceKind::GitOpsController => "gitops-controller",
            ResourceKind::Kubeconfig => "kubeconfig",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete resource: its kind plus whatever identifies it to an operator
/// (cloud id, name, or the tag identity used to look it up).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub identity: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, identity: impl Into<String>) -> Self {
        Self {
            kind,
            identity: identity.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.identity)
    }
}
