//! Cloudflare v4 API backend.
//!
//! The API token is read from `CLOUDFLARE_TOKEN` on every request, so a
//! registry can be built before credentials are present. Zone ids are looked
//! up by zone name once and cached.

use std::{collections::BTreeMap, env, time::Duration};

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use driftless_common::{DriftError, DriftResult};
use parking_lot::Mutex;
use reqwest::{Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::{
    backend::DnsBackend,
    record::{DnsRecord, RecordSpec, RecordType},
};

pub const CLOUDFLARE_BACKEND: &str = "cloudflare";
pub const TOKEN_ENV: &str = "CLOUDFLARE_TOKEN";
const API_URL_ENV: &str = "CLOUDFLARE_API_URL";
const DEFAULT_API_URL: &str = "https://api.cloudflare.com/client/v4";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Cloudflare's "automatic" TTL.
const AUTO_TTL: u32 = 1;

pub struct CloudflareDns {
    client: Client,
    base_url: String,
    zone_ids: Mutex<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiRecord {
    id: String,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    content: String,
    #[serde(default)]
    proxied: bool,
}

#[derive(Debug, Serialize)]
struct RecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    content: &'a str,
    proxied: bool,
    ttl: u32,
}

impl<'a> From<&'a RecordSpec> for RecordBody<'a> {
    fn from(spec: &'a RecordSpec) -> Self {
        Self {
            record_type: spec.record_type.as_str(),
            name: &spec.name,
            content: &spec.content,
            proxied: spec.proxied,
            ttl: AUTO_TTL,
        }
    }
}

impl ApiRecord {
    fn into_record(self) -> Option<DnsRecord> {
        let record_type = RecordType::from_api(&self.record_type)?;
        Some(DnsRecord {
            id: self.id,
            name: self.name,
            record_type,
            content: self.content,
            proxied: self.proxied,
        })
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> anyhow::Result<T> {
    if !envelope.success {
        let errors = envelope
            .errors
            .iter()
            .map(|e| format!("{} ({})", e.message, e.code))
            .collect::<Vec<_>>()
            .join("; ");
        bail!("cloudflare api error: {errors}");
    }
    envelope
        .result
        .ok_or_else(|| anyhow!("cloudflare api returned no result"))
}

impl CloudflareDns {
    pub fn new(base_url: impl Into<String>) -> DriftResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("driftless/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DriftError::Runtime(anyhow!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            zone_ids: Mutex::new(BTreeMap::new()),
        })
    }

    /// Uses `CLOUDFLARE_API_URL` when set, the public API otherwise.
    pub fn from_env() -> DriftResult<Self> {
        let base_url = env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        Self::new(base_url)
    }

    fn request(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        let token = env::var(TOKEN_ENV)
            .with_context(|| format!("{TOKEN_ENV} must be set to use the cloudflare backend"))?;
        Ok(self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> anyhow::Result<T> {
        let response = request.send().await.context("cloudflare request failed")?;
        let status = response.status();
        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("unreadable cloudflare response (http {status})"))?;
        unwrap_envelope(envelope)
    }

    async fn zone_id(&self, zone: &str) -> anyhow::Result<String> {
        if let Some(id) = self.zone_ids.lock().get(zone) {
            return Ok(id.clone());
        }
        let request = self.request(Method::GET, "/zones")?.query(&[("name", zone)]);
        let zones: Vec<Zone> = self.send(request).await?;
        let id = match zones.as_slice() {
            [only] => only.id.clone(),
            [] => bail!("zone `{zone}` was not found in the cloudflare account"),
            _ => bail!("zone name `{zone}` matched {} zones", zones.len()),
        };
        debug!(zone, id = %id, "resolved cloudflare zone");
        self.zone_ids.lock().insert(zone.to_string(), id.clone());
        Ok(id)
    }
}

#[async_trait]
impl DnsBackend for CloudflareDns {
    fn name(&self) -> &str {
        CLOUDFLARE_BACKEND
    }

    async fn list_records(
        &self,
        zone: &str,
        name: &str,
        record_type: RecordType,
    ) -> anyhow::Result<Vec<DnsRecord>> {
        let zone_id = self.zone_id(zone).await?;
        let request = self
            .request(Method::GET, &format!("/zones/{zone_id}/dns_records"))?
            .query(&[("name", name), ("type", record_type.as_str())]);
        let records: Vec<ApiRecord> = self.send(request).await?;
        Ok(records
            .into_iter()
            .filter_map(ApiRecord::into_record)
            .filter(|r| r.record_type == record_type)
            .collect())
    }

    async fn create_record(&self, zone: &str, spec: &RecordSpec) -> anyhow::Result<DnsRecord> {
        let zone_id = self.zone_id(zone).await?;
        let request = self
            .request(Method::POST, &format!("/zones/{zone_id}/dns_records"))?
            .json(&RecordBody::from(spec));
        let created: ApiRecord = self.send(request).await?;
        created
            .into_record()
            .ok_or_else(|| anyhow!("cloudflare created a record of an unexpected type"))
    }

    async fn update_record(&self, zone: &str, id: &str, spec: &RecordSpec) -> anyhow::Result<()> {
        let zone_id = self.zone_id(zone).await?;
        let request = self
            .request(Method::PUT, &format!("/zones/{zone_id}/dns_records/{id}"))?
            .json(&RecordBody::from(spec));
        let _: ApiRecord = self.send(request).await?;
        Ok(())
    }

    async fn delete_record(&self, zone: &str, id: &str) -> anyhow::Result<()> {
        let zone_id = self.zone_id(zone).await?;
        let request = self.request(Method::DELETE, &format!("/zones/{zone_id}/dns_records/{id}"))?;
        let _: serde_json::Value = self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_record_listing() {
        let body = r#"{
            "success": true,
            "errors": [],
            "messages": [],
            "result": [
                {"id": "r1", "name": "nebari.example.com", "type": "A",
                 "content": "203.0.113.42", "proxied": false, "ttl": 1},
                {"id": "r2", "name": "nebari.example.com", "type": "TXT",
                 "content": "v=spf1", "proxied": false, "ttl": 1}
            ]
        }"#;
        let envelope: Envelope<Vec<ApiRecord>> = serde_json::from_str(body).unwrap();
        let records: Vec<_> = unwrap_envelope(envelope)
            .unwrap()
            .into_iter()
            .filter_map(ApiRecord::into_record)
            .collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_type, RecordType::A);
        assert_eq!(records[0].content, "203.0.113.42");
    }

    #[test]
    fn api_errors_surface_their_messages() {
        let body = r#"{
            "success": false,
            "errors": [{"code": 9109, "message": "Invalid access token"}],
            "result": null
        }"#;
        let envelope: Envelope<Vec<Zone>> = serde_json::from_str(body).unwrap();
        let err = unwrap_envelope(envelope).unwrap_err();
        assert!(err.to_string().contains("Invalid access token (9109)"));
    }

    #[test]
    fn request_body_uses_automatic_ttl() {
        let spec = RecordSpec {
            name: "*.nebari.example.com".into(),
            record_type: RecordType::Cname,
            content: "lb.example.net".into(),
            proxied: true,
        };
        let body = serde_json::to_value(RecordBody::from(&spec)).unwrap();
        assert_eq!(body["type"], "CNAME");
        assert_eq!(body["ttl"], 1);
        assert_eq!(body["proxied"], true);
    }
}
