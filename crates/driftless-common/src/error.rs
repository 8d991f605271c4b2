use std::{fmt::Display, time::Duration};

use crate::resource::{ResourceKind, ResourceRef};

pub type DriftResult<T = (), E = DriftError> = Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum DriftError {
    #[error(
        "{kind} {identity}: field `{field}` cannot be changed in place \
         (actual: {actual}, desired: {desired}); destroy and recreate the resource to change it"
    )]
    ImmutableFieldViolation {
        kind: ResourceKind,
        identity: String,
        field: String,
        actual: String,
        desired: String,
    },
    #[error(
        "{kind} {identity}: discovery found {} resources where at most one was expected ({})",
        .ids.len(),
        .ids.join(", ")
    )]
    AmbiguousState {
        kind: ResourceKind,
        identity: String,
        ids: Vec<String>,
    },
    #[error("no {registry} registered under the name `{name}`")]
    NotRegistered { registry: &'static str, name: String },
    #[error("{registry} `{name}` is already registered")]
    AlreadyRegistered { registry: &'static str, name: String },
    #[error("timed out waiting for {what} after {elapsed:?} (timeout {timeout:?}); retry later")]
    Timeout {
        what: String,
        elapsed: Duration,
        timeout: Duration,
    },
    #[error("cancelled while waiting for {what} after {elapsed:?} (timeout {timeout:?})")]
    Cancelled {
        what: String,
        elapsed: Duration,
        timeout: Duration,
    },
    #[error("{kind} {identity}: {action} failed: {source:#}")]
    Upstream {
        kind: ResourceKind,
        identity: String,
        action: String,
        source: anyhow::Error,
    },
    #[error("{operation} failed for {} resource(s):\n{}", .failures.len(), format_failures(.failures))]
    Aggregate {
        operation: String,
        failures: Vec<ResourceFailure>,
    },
    #[error("invalid configuration at `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Runtime error: {0:#}")]
    Runtime(#[from] anyhow::Error),
    #[error("Command error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Failed to run command: {0}")]
    FailedToRunCommand(String),
    /// Any error originating from the `kube-rs` crate
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },
    #[error("Invalid Json: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("Invalid Yaml: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },
}

/// One failed step of a multi-resource operation.
#[derive(Debug)]
pub struct ResourceFailure {
    pub resource: ResourceRef,
    pub error: DriftError,
}

impl ResourceFailure {
    pub fn new(resource: ResourceRef, error: DriftError) -> Self {
        Self { resource, error }
    }
}

fn format_failures(failures: &[ResourceFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  - {}: {}", f.resource, f.error))
        .collect::<Vec<_>>()
        .join("\n")
}

impl DriftError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        DriftError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn immutable(
        kind: ResourceKind,
        identity: impl Into<String>,
        field: impl Into<String>,
        actual: impl Display,
        desired: impl Display,
    ) -> Self {
        DriftError::ImmutableFieldViolation {
            kind,
            identity: identity.into(),
            field: field.into(),
            actual: actual.to_string(),
            desired: desired.to_string(),
        }
    }

    pub fn upstream(
        kind: ResourceKind,
        identity: impl Into<String>,
        action: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        DriftError::Upstream {
            kind,
            identity: identity.into(),
            action: action.into(),
            source: source.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DriftError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DriftError::Cancelled { .. })
    }

    /// Resources named by an aggregate error, empty for every other variant.
    pub fn failed_resources(&self) -> Vec<&ResourceRef> {
        match self {
            DriftError::Aggregate { failures, .. } => failures.iter().map(|f| &f.resource).collect(),
            _ => Vec::new(),
        }
    }
}

/// Attaches resource context to a failed client call.
pub trait UpstreamContext<T> {
    fn upstream(self, kind: ResourceKind, identity: &str, action: &str) -> DriftResult<T>;
}

impl<T> UpstreamContext<T> for anyhow::Result<T> {
    fn upstream(self, kind: ResourceKind, identity: &str, action: &str) -> DriftResult<T> {
        self.map_err(|source| DriftError::upstream(kind, identity, action, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immutable_violation_names_field_and_values() {
        let err = DriftError::immutable(
            ResourceKind::Network,
            "vpc-123 (driftless:cluster=demo)",
            "cidr_block",
            "10.10.0.0/16",
            "10.20.0.0/16",
        );
        let msg = err.to_string();
        assert!(msg.contains("network vpc-123"));
        assert!(msg.contains("`cidr_block`"));
        assert!(msg.contains("actual: 10.10.0.0/16"));
        assert!(msg.contains("desired: 10.20.0.0/16"));
    }

    #[test]
    fn aggregate_lists_every_failure() {
        let err = DriftError::Aggregate {
            operation: "destroy".to_string(),
            failures: vec![
                ResourceFailure::new(
                    ResourceRef::new(ResourceKind::NodePool, "gpu"),
                    DriftError::validation("x", "boom"),
                ),
                ResourceFailure::new(
                    ResourceRef::new(ResourceKind::Vpc, "vpc-1"),
                    DriftError::validation("y", "bang"),
                ),
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("destroy failed for 2 resource(s)"));
        assert!(msg.contains("node-pool gpu"));
        assert!(msg.contains("vpc vpc-1"));
        assert_eq!(err.failed_resources().len(), 2);
    }

    #[test]
    fn upstream_context_keeps_source() {
        let res: anyhow::Result<()> = Err(anyhow::anyhow!("throttled"));
        let err = res
            .upstream(ResourceKind::ManagedCluster, "demo", "describe")
            .unwrap_err();
        assert!(err.to_string().contains("managed-cluster demo: describe failed: throttled"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
