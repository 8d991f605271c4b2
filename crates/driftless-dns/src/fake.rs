//! In-memory DNS backend that records every call.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    backend::DnsBackend,
    record::{DnsRecord, RecordSpec, RecordType},
};

pub const FAKE_BACKEND: &str = "fake";

#[derive(Default)]
struct Zone {
    records: Vec<(String, DnsRecord)>,
    next_id: usize,
}

#[derive(Default)]
pub struct FakeDns {
    zone: Mutex<Zone>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<Option<String>>,
}

impl FakeDns {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a record directly, bypassing the call log.
    pub fn seed(&self, zone: &str, name: &str, record_type: RecordType, content: &str) -> String {
        let mut state = self.zone.lock();
        state.next_id += 1;
        let id = format!("rec-{:04}", state.next_id);
        state.records.push((
            zone.to_string(),
            DnsRecord {
                id: id.clone(),
                name: name.to_string(),
                record_type,
                content: content.to_string(),
                proxied: false,
            },
        ));
        id
    }

    pub fn records(&self, name: &str) -> Vec<DnsRecord> {
        self.zone
            .lock()
            .records
            .iter()
            .filter(|(_, r)| r.name == name)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Calls other than listings.
    pub fn mutations(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| !c.starts_with("list "))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Calls whose log line starts with `prefix` fail until [`FakeDns::heal`].
    pub fn fail_on(&self, prefix: &str) {
        *self.failing.lock() = Some(prefix.to_string());
    }

    pub fn heal(&self) {
        *self.failing.lock() = None;
    }

    fn record(&self, call: String) -> anyhow::Result<()> {
        let fail = matches!(&*self.failing.lock(), Some(prefix) if call.starts_with(prefix.as_str()));
        self.calls.lock().push(call.clone());
        if fail {
            bail!("injected failure: {call}");
        }
        Ok(())
    }
}

#[async_trait]
impl DnsBackend for FakeDns {
    fn name(&self) -> &str {
        FAKE_BACKEND
    }

    async fn list_records(
        &self,
        zone: &str,
        name: &str,
        record_type: RecordType,
    ) -> anyhow::Result<Vec<DnsRecord>> {
        self.record(format!("list {record_type} {name}"))?;
        Ok(self
            .zone
            .lock()
            .records
            .iter()
            .filter(|(z, r)| z == zone && r.name == name && r.record_type == record_type)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn create_record(&self, zone: &str, spec: &RecordSpec) -> anyhow::Result<DnsRecord> {
        self.record(format!(
            "create {} {} {}",
            spec.record_type, spec.name, spec.content
        ))?;
        let mut state = self.zone.lock();
        state.next_id += 1;
        let record = DnsRecord {
            id: format!("rec-{:04}", state.next_id),
            name: spec.name.clone(),
            record_type: spec.record_type,
            content: spec.content.clone(),
            proxied: spec.proxied,
        };
        state.records.push((zone.to_string(), record.clone()));
        Ok(record)
    }

    async fn update_record(&self, zone: &str, id: &str, spec: &RecordSpec) -> anyhow::Result<()> {
        self.record(format!(
            "update {} {} {}",
            spec.record_type, spec.name, spec.content
        ))?;
        let mut state = self.zone.lock();
        let Some((_, record)) = state
            .records
            .iter_mut()
            .find(|(z, r)| z == zone && r.id == id)
        else {
            bail!("record {id} does not exist");
        };
        record.content = spec.content.clone();
        record.proxied = spec.proxied;
        Ok(())
    }

    async fn delete_record(&self, zone: &str, id: &str) -> anyhow::Result<()> {
        self.record(format!("delete {id}"))?;
        let mut state = self.zone.lock();
        let before = state.records.len();
        state.records.retain(|(z, r)| !(z == zone && r.id == id));
        if state.records.len() == before {
            bail!("record {id} does not exist");
        }
        Ok(())
    }
}
