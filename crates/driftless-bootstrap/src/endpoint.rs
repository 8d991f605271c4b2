use driftless_common::{poll_for, DriftResult, OpContext, WaitSpec};
use tracing::{info, warn};

use crate::kube_ops::KubeOps;

/// Waits until the ingress service's load balancer reports an address and
/// returns it (an IP or a hostname).
pub async fn wait_for_endpoint(
    ctx: &OpContext,
    kube: &dyn KubeOps,
    namespace: &str,
    service: &str,
    spec: WaitSpec,
) -> DriftResult<String> {
    info!(namespace, service, "waiting for the load balancer endpoint");
    let what = format!("load balancer address of {namespace}/{service}");
    let endpoint = poll_for(ctx, &what, spec, move || async move {
        match kube.service_ingress(namespace, service).await {
            Ok(address) => address,
            Err(e) => {
                warn!(service, error = %e, "reading service failed, retrying");
                None
            }
        }
    })
    .await?;
    info!(service, endpoint = %endpoint, "load balancer endpoint assigned");
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeKube;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn returns_the_address_once_assigned() {
        let kube = FakeKube::new();
        kube.set_service("ingress", "traefik", None);
        let later = kube.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(90)).await;
            later.set_service("ingress", "traefik", Some("a1b2.elb.amazonaws.com"));
        });

        let endpoint = wait_for_endpoint(
            &OpContext::default(),
            kube.as_ref(),
            "ingress",
            "traefik",
            WaitSpec::secs(5, 600),
        )
        .await
        .unwrap();
        assert_eq!(endpoint, "a1b2.elb.amazonaws.com");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_service_times_out() {
        let kube = FakeKube::new();
        let err = wait_for_endpoint(
            &OpContext::default(),
            kube.as_ref(),
            "ingress",
            "traefik",
            WaitSpec::secs(5, 60),
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());
    }
}
