use std::{fmt, net::IpAddr};

use driftless_common::{DriftError, DriftResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordType {
    A,
    Cname,
}

impl RecordType {
    pub const ALL: [RecordType; 2] = [RecordType::A, RecordType::Cname];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Cname => "CNAME",
        }
    }

    pub fn from_api(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "A" => Some(RecordType::A),
            "CNAME" => Some(RecordType::Cname),
            _ => None,
        }
    }

    /// An IPv4 endpoint gets an `A` record, a hostname gets a `CNAME`.
    /// IPv6 literals are rejected since no `AAAA` record is managed.
    pub fn for_endpoint(endpoint: &str) -> DriftResult<Self> {
        let endpoint = endpoint.trim();
        match endpoint.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => Ok(RecordType::A),
            Ok(IpAddr::V6(_)) => Err(DriftError::validation(
                "dns.endpoint",
                format!("`{endpoint}` is an IPv6 address; only IPv4 and hostnames are supported"),
            )),
            Err(_) if is_hostname(endpoint) => Ok(RecordType::Cname),
            Err(_) => Err(DriftError::validation(
                "dns.endpoint",
                format!("`{endpoint}` is neither an IPv4 address nor a hostname"),
            )),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_hostname(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 253
        && value.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub id: String,
    pub name: String,
    pub record_type: RecordType,
    pub content: String,
    pub proxied: bool,
}

/// The desired content of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSpec {
    pub name: String,
    pub record_type: RecordType,
    pub content: String,
    pub proxied: bool,
}

impl RecordSpec {
    pub fn matches(&self, record: &DnsRecord) -> bool {
        record.content == self.content && record.proxied == self.proxied
    }
}

fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// The domain must be the zone itself or a dot-separated subdomain of it.
/// `evilexample.com` is not inside `example.com`.
pub fn validate_domain(domain: &str, zone: &str) -> DriftResult<()> {
    let (domain, zone) = (normalize(domain), normalize(zone));
    if zone.is_empty() || !is_hostname(&zone) {
        return Err(DriftError::validation(
            "dns.zone",
            format!("`{zone}` is not a valid zone name"),
        ));
    }
    if !is_hostname(&domain) {
        return Err(DriftError::validation(
            "domain",
            format!("`{domain}` is not a valid domain name"),
        ));
    }
    if domain == zone || domain.ends_with(&format!(".{zone}")) {
        return Ok(());
    }
    Err(DriftError::validation(
        "domain",
        format!("`{domain}` is not inside the DNS zone `{zone}`"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_follows_the_endpoint() {
        assert_eq!(RecordType::for_endpoint("203.0.113.42").unwrap(), RecordType::A);
        assert_eq!(
            RecordType::for_endpoint("a1b2.elb.us-west-2.amazonaws.com").unwrap(),
            RecordType::Cname
        );
        assert!(RecordType::for_endpoint("2001:db8::1").is_err());
        assert!(RecordType::for_endpoint("not a host").is_err());
        assert!(RecordType::for_endpoint("").is_err());
    }

    #[test]
    fn domain_must_sit_inside_the_zone() {
        assert!(validate_domain("example.com", "example.com").is_ok());
        assert!(validate_domain("nebari.example.com", "example.com").is_ok());
        assert!(validate_domain("Nebari.Example.com.", "example.com").is_ok());
        assert!(validate_domain("evilexample.com", "example.com").is_err());
        assert!(validate_domain("example.org", "example.com").is_err());
        assert!(validate_domain("nebari.example.com", "").is_err());
    }
}
