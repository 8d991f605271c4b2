use driftless_common::{DriftError, DriftResult, ResourceKind};
use serde_json::json;

use super::state::ClusterState;

/// Renders a kubeconfig for `cluster` that authenticates through
/// `aws eks get-token`.
pub fn render(cluster: &ClusterState, region: &str) -> DriftResult<Vec<u8>> {
    let (Some(endpoint), Some(ca)) = (&cluster.endpoint, &cluster.certificate_authority) else {
        return Err(DriftError::upstream(
            ResourceKind::Kubeconfig,
            &cluster.name,
            "render",
            anyhow::anyhow!("the cluster has no endpoint yet (status {:?})", cluster.status),
        ));
    };
    let name = cluster.name.as_str();
    let user = format!("{name}-admin");

    let config = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "current-context": name,
        "clusters": [{
            "name": name,
            "cluster": {
                "server": endpoint,
                "certificate-authority-data": ca,
            },
        }],
        "contexts": [{
            "name": name,
            "context": { "cluster": name, "user": user },
        }],
        "users": [{
            "name": user,
            "user": {
                "exec": {
                    "apiVersion": "client.authentication.k8s.io/v1beta1",
                    "command": "aws",
                    "args": ["eks", "get-token", "--cluster-name", name, "--region", region],
                    "interactiveMode": "Never",
                },
            },
        }],
    });
    Ok(serde_yaml::to_string(&config)?.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::state::ResourceStatus;

    fn cluster(endpoint: Option<&str>) -> ClusterState {
        ClusterState {
            name: "demo".to_string(),
            arn: "arn:aws:eks:us-west-2:123:cluster/demo".to_string(),
            status: ResourceStatus::Active,
            version: "1.30".to_string(),
            role_arn: String::new(),
            subnet_ids: vec![],
            kms_key_arn: None,
            endpoint_public_access: true,
            endpoint_private_access: false,
            enabled_log_types: Default::default(),
            endpoint: endpoint.map(str::to_string),
            certificate_authority: Some("Q0EK".to_string()),
            tags: Default::default(),
        }
    }

    #[test]
    fn renders_exec_authenticated_kubeconfig() {
        let bytes = render(&cluster(Some("https://abc.eks.amazonaws.com")), "us-west-2").unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_slice(&bytes).unwrap();
        assert_eq!(parsed["current-context"].as_str(), Some("demo"));
        assert_eq!(
            parsed["clusters"][0]["cluster"]["server"].as_str(),
            Some("https://abc.eks.amazonaws.com")
        );
        let exec = &parsed["users"][0]["user"]["exec"];
        assert_eq!(exec["command"].as_str(), Some("aws"));
        assert_eq!(exec["args"][3].as_str(), Some("demo"));
    }

    #[test]
    fn pending_clusters_have_no_kubeconfig() {
        assert!(render(&cluster(None), "us-west-2").is_err());
    }
}
