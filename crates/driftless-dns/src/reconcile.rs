//! Converges the root and wildcard records of a deployment's domain onto the
//! ingress endpoint.

use std::sync::Arc;

use driftless_common::{
    project::DnsConfig, DriftResult, OpContext, ResourceKind, UpstreamContext,
};
use tracing::{debug, info};

use crate::{
    backend::{DnsBackend, DnsRegistry},
    record::{validate_domain, RecordSpec, RecordType},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordChange {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureOutcome {
    pub name: String,
    pub record_type: RecordType,
    pub change: RecordChange,
    pub duplicates_removed: usize,
}

/// Makes `spec` the only record of its name and type in `zone`.
///
/// A record that already matches is kept; otherwise the first listed record is
/// updated in place. Every other record of the same name and type is deleted
/// before the kept record is written. Nothing is written when exactly one
/// matching record exists.
pub async fn ensure_record(
    ctx: &OpContext,
    backend: &dyn DnsBackend,
    zone: &str,
    spec: &RecordSpec,
) -> DriftResult<EnsureOutcome> {
    let identity = format!("{} {}", spec.record_type, spec.name);
    let existing = backend
        .list_records(zone, &spec.name, spec.record_type)
        .await
        .upstream(ResourceKind::DnsRecord, &identity, "list")?;

    let keep = existing
        .iter()
        .position(|r| spec.matches(r))
        .or_else(|| (!existing.is_empty()).then_some(0));

    let mut duplicates_removed = 0;
    for (i, duplicate) in existing.iter().enumerate() {
        if Some(i) == keep {
            continue;
        }
        ctx.track(ResourceKind::DnsRecord, "delete duplicate", &identity, async {
            backend
                .delete_record(zone, &duplicate.id)
                .await
                .upstream(ResourceKind::DnsRecord, &identity, "delete")
        })
        .await?;
        duplicates_removed += 1;
    }

    let change = match keep {
        Some(i) if spec.matches(&existing[i]) => RecordChange::Unchanged,
        Some(i) => {
            let id = existing[i].id.clone();
            ctx.track(ResourceKind::DnsRecord, "update", &identity, async {
                backend
                    .update_record(zone, &id, spec)
                    .await
                    .upstream(ResourceKind::DnsRecord, &identity, "update")
            })
            .await?;
            RecordChange::Updated
        }
        None => {
            ctx.track(ResourceKind::DnsRecord, "create", &identity, async {
                backend
                    .create_record(zone, spec)
                    .await
                    .upstream(ResourceKind::DnsRecord, &identity, "create")
            })
            .await?;
            RecordChange::Created
        }
    };

    debug!(record = %identity, ?change, duplicates_removed, "dns record converged");
    Ok(EnsureOutcome {
        name: spec.name.clone(),
        record_type: spec.record_type,
        change,
        duplicates_removed,
    })
}

/// Deletes every `A` and `CNAME` record under `names`. Missing records are not
/// an error. Returns how many records were deleted.
pub async fn destroy_records(
    ctx: &OpContext,
    backend: &dyn DnsBackend,
    zone: &str,
    names: &[String],
) -> DriftResult<usize> {
    let mut deleted = 0;
    for name in names {
        for record_type in RecordType::ALL {
            let identity = format!("{record_type} {name}");
            let existing = backend
                .list_records(zone, name, record_type)
                .await
                .upstream(ResourceKind::DnsRecord, &identity, "list")?;
            for record in existing {
                ctx.track(ResourceKind::DnsRecord, "delete", &identity, async {
                    backend
                        .delete_record(zone, &record.id)
                        .await
                        .upstream(ResourceKind::DnsRecord, &identity, "delete")
                })
                .await?;
                deleted += 1;
            }
        }
    }
    Ok(deleted)
}

/// DNS records of one deployment: the domain itself and its wildcard.
pub struct DnsReconciler {
    backend: Arc<dyn DnsBackend>,
    zone: String,
    domain: String,
    proxied: bool,
}

impl DnsReconciler {
    pub fn new(
        backend: Arc<dyn DnsBackend>,
        zone: &str,
        domain: &str,
        proxied: bool,
    ) -> DriftResult<Self> {
        validate_domain(domain, zone)?;
        Ok(Self {
            backend,
            zone: zone.trim_end_matches('.').to_ascii_lowercase(),
            domain: domain.trim_end_matches('.').to_ascii_lowercase(),
            proxied,
        })
    }

    /// Looks the configured backend up in `registry`.
    pub fn from_config(registry: &DnsRegistry, config: &DnsConfig, domain: &str) -> DriftResult<Self> {
        let backend = registry.get(&config.provider)?;
        Self::new(backend, &config.zone, domain, config.proxied)
    }

    pub fn names(&self) -> Vec<String> {
        vec![self.domain.clone(), format!("*.{}", self.domain)]
    }

    /// Points both names at `endpoint`. Records of the other type under the
    /// same names are removed first, since a name cannot carry both.
    pub async fn ensure(&self, ctx: &OpContext, endpoint: &str) -> DriftResult<Vec<EnsureOutcome>> {
        let endpoint = endpoint.trim();
        let record_type = RecordType::for_endpoint(endpoint)?;
        let stale = match record_type {
            RecordType::A => RecordType::Cname,
            RecordType::Cname => RecordType::A,
        };

        let mut outcomes = Vec::new();
        for name in self.names() {
            let identity = format!("{stale} {name}");
            let conflicting = self
                .backend
                .list_records(&self.zone, &name, stale)
                .await
                .upstream(ResourceKind::DnsRecord, &identity, "list")?;
            for record in conflicting {
                ctx.track(ResourceKind::DnsRecord, "delete", &identity, async {
                    self.backend
                        .delete_record(&self.zone, &record.id)
                        .await
                        .upstream(ResourceKind::DnsRecord, &identity, "delete")
                })
                .await?;
            }

            let spec = RecordSpec {
                name,
                record_type,
                content: endpoint.to_string(),
                proxied: self.proxied,
            };
            outcomes.push(ensure_record(ctx, self.backend.as_ref(), &self.zone, &spec).await?);
        }
        info!(
            backend = self.backend.name(),
            domain = %self.domain,
            endpoint,
            "dns records converged"
        );
        Ok(outcomes)
    }

    pub async fn destroy(&self, ctx: &OpContext) -> DriftResult<usize> {
        destroy_records(ctx, self.backend.as_ref(), &self.zone, &self.names()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeDns;
    use driftless_common::DriftError;

    const ZONE: &str = "example.com";
    const DOMAIN: &str = "nebari.example.com";
    const WILDCARD: &str = "*.nebari.example.com";

    fn reconciler(fake: &Arc<FakeDns>) -> DnsReconciler {
        DnsReconciler::new(fake.clone(), ZONE, DOMAIN, false).unwrap()
    }

    #[tokio::test]
    async fn fresh_zone_gets_root_and_wildcard_a_records() {
        let fake = FakeDns::new();
        let ctx = OpContext::default();

        let outcomes = reconciler(&fake).ensure(&ctx, "203.0.113.42").await.unwrap();

        assert!(outcomes.iter().all(|o| o.change == RecordChange::Created));
        assert_eq!(
            fake.mutations(),
            vec![
                format!("create A {DOMAIN} 203.0.113.42"),
                format!("create A {WILDCARD} 203.0.113.42"),
            ]
        );
    }

    #[tokio::test]
    async fn converged_records_cause_no_writes() {
        let fake = FakeDns::new();
        let ctx = OpContext::default();
        let dns = reconciler(&fake);
        dns.ensure(&ctx, "203.0.113.42").await.unwrap();
        fake.clear_calls();

        let outcomes = dns.ensure(&ctx, "203.0.113.42").await.unwrap();

        assert!(outcomes.iter().all(|o| o.change == RecordChange::Unchanged));
        assert!(fake.mutations().is_empty());
    }

    #[tokio::test]
    async fn new_endpoint_updates_in_place() {
        let fake = FakeDns::new();
        let ctx = OpContext::default();
        let dns = reconciler(&fake);
        dns.ensure(&ctx, "203.0.113.42").await.unwrap();
        fake.clear_calls();

        dns.ensure(&ctx, "203.0.113.99").await.unwrap();

        let mutations = fake.mutations();
        assert_eq!(mutations.len(), 2);
        assert!(mutations.iter().all(|c| c.starts_with("update A")));
        assert_eq!(fake.records(DOMAIN)[0].content, "203.0.113.99");
    }

    #[tokio::test]
    async fn duplicates_beyond_the_first_are_deleted() {
        let fake = FakeDns::new();
        let ctx = OpContext::default();
        fake.seed(ZONE, DOMAIN, RecordType::A, "198.51.100.1");
        let keep = fake.seed(ZONE, DOMAIN, RecordType::A, "203.0.113.42");
        let extra = fake.seed(ZONE, DOMAIN, RecordType::A, "198.51.100.2");

        let spec = RecordSpec {
            name: DOMAIN.into(),
            record_type: RecordType::A,
            content: "203.0.113.42".into(),
            proxied: false,
        };
        let outcome = ensure_record(&ctx, fake.as_ref(), ZONE, &spec).await.unwrap();

        assert_eq!(outcome.change, RecordChange::Unchanged);
        assert_eq!(outcome.duplicates_removed, 2);
        let remaining = fake.records(DOMAIN);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, keep);
        assert!(fake.mutations().contains(&format!("delete {extra}")));
    }

    #[tokio::test]
    async fn duplicates_are_deleted_before_the_kept_record_is_updated() {
        let fake = FakeDns::new();
        let ctx = OpContext::default();
        let first = fake.seed(ZONE, DOMAIN, RecordType::A, "198.51.100.1");
        let second = fake.seed(ZONE, DOMAIN, RecordType::A, "198.51.100.2");

        let spec = RecordSpec {
            name: DOMAIN.into(),
            record_type: RecordType::A,
            content: "203.0.113.42".into(),
            proxied: false,
        };
        let outcome = ensure_record(&ctx, fake.as_ref(), ZONE, &spec).await.unwrap();
        assert_eq!(outcome.change, RecordChange::Updated);
        assert_eq!(
            fake.mutations(),
            vec![
                format!("delete {second}"),
                format!("update A {DOMAIN} 203.0.113.42"),
            ]
        );
        assert_eq!(fake.records(DOMAIN)[0].id, first);
    }

    #[tokio::test]
    async fn failed_duplicate_delete_leaves_the_kept_record_untouched() {
        let fake = FakeDns::new();
        let ctx = OpContext::default();
        fake.seed(ZONE, DOMAIN, RecordType::A, "198.51.100.1");
        let second = fake.seed(ZONE, DOMAIN, RecordType::A, "198.51.100.2");
        fake.fail_on(&format!("delete {second}"));

        let spec = RecordSpec {
            name: DOMAIN.into(),
            record_type: RecordType::A,
            content: "203.0.113.42".into(),
            proxied: false,
        };
        let err = ensure_record(&ctx, fake.as_ref(), ZONE, &spec).await.unwrap_err();

        assert!(matches!(err, DriftError::Upstream { kind: ResourceKind::DnsRecord, .. }));
        assert_eq!(fake.mutations(), vec![format!("delete {second}")]);
        let contents: Vec<String> = fake.records(DOMAIN).into_iter().map(|r| r.content).collect();
        assert_eq!(contents, vec!["198.51.100.1", "198.51.100.2"]);
    }

    #[tokio::test]
    async fn hostname_endpoint_replaces_a_records_with_cname() {
        let fake = FakeDns::new();
        let ctx = OpContext::default();
        let dns = reconciler(&fake);
        dns.ensure(&ctx, "203.0.113.42").await.unwrap();

        dns.ensure(&ctx, "lb-1.elb.amazonaws.com").await.unwrap();

        let records = fake.records(DOMAIN);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_type, RecordType::Cname);
        assert_eq!(records[0].content, "lb-1.elb.amazonaws.com");
    }

    #[tokio::test]
    async fn lookalike_domain_is_rejected_before_any_call() {
        let fake = FakeDns::new();
        let err = DnsReconciler::new(fake.clone(), ZONE, "evilexample.com", false)
            .err()
            .unwrap();
        assert!(matches!(err, DriftError::Validation { .. }));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn destroy_treats_absent_records_as_success() {
        let fake = FakeDns::new();
        let ctx = OpContext::default();
        let dns = reconciler(&fake);

        assert_eq!(dns.destroy(&ctx).await.unwrap(), 0);

        dns.ensure(&ctx, "203.0.113.42").await.unwrap();
        fake.seed(ZONE, WILDCARD, RecordType::Cname, "stale.example.net");
        assert_eq!(dns.destroy(&ctx).await.unwrap(), 3);
        assert!(fake.records(DOMAIN).is_empty());
        assert!(fake.records(WILDCARD).is_empty());
    }

    #[tokio::test]
    async fn backend_failures_name_the_record() {
        let fake = FakeDns::new();
        let ctx = OpContext::default();
        fake.fail_on("create A *.");

        let err = reconciler(&fake).ensure(&ctx, "203.0.113.42").await.unwrap_err();
        match err {
            DriftError::Upstream { kind, identity, .. } => {
                assert_eq!(kind, ResourceKind::DnsRecord);
                assert_eq!(identity, format!("A {WILDCARD}"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
