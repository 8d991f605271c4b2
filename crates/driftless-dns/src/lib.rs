pub mod backend;
pub mod cloudflare;
pub mod fake;
pub mod reconcile;
pub mod record;

pub use backend::{default_backends, DnsBackend, DnsRegistry};
pub use reconcile::{destroy_records, ensure_record, DnsReconciler, EnsureOutcome, RecordChange};
pub use record::{validate_domain, DnsRecord, RecordSpec, RecordType};
