use std::sync::Arc;

use async_trait::async_trait;
use driftless_common::{DriftResult, Registry};

use crate::{
    cloudflare::{CloudflareDns, CLOUDFLARE_BACKEND},
    record::{DnsRecord, RecordSpec, RecordType},
};

/// One DNS provider API. Calls address records by zone name; resolving the
/// provider's own zone identifier is the backend's concern.
#[async_trait]
pub trait DnsBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn list_records(
        &self,
        zone: &str,
        name: &str,
        record_type: RecordType,
    ) -> anyhow::Result<Vec<DnsRecord>>;

    async fn create_record(&self, zone: &str, spec: &RecordSpec) -> anyhow::Result<DnsRecord>;

    async fn update_record(&self, zone: &str, id: &str, spec: &RecordSpec) -> anyhow::Result<()>;

    async fn delete_record(&self, zone: &str, id: &str) -> anyhow::Result<()>;
}

pub type DnsRegistry = Registry<dyn DnsBackend>;

/// Registry holding every built-in backend.
pub fn default_backends() -> DriftResult<DnsRegistry> {
    let registry = DnsRegistry::new("dns backend");
    registry.register(CLOUDFLARE_BACKEND, Arc::new(CloudflareDns::from_env()?))?;
    Ok(registry)
}
