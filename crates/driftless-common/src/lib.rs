pub mod context;
pub mod error;
pub mod outcome;
pub mod poller;
pub mod project;
pub mod registry;
pub mod resource;
pub mod settings;
pub mod tags;
pub mod util;

// Re-exports
pub use ::tracing::{self, debug, error, info, trace, warn};
pub use context::{OpContext, Severity, StatusEvent, StatusSink, TracingSink};
pub use error::{DriftError, DriftResult, ResourceFailure, UpstreamContext};
pub use outcome::StepOutcome;
pub use poller::{poll_for, poll_until, WaitSpec};
pub use project::ProjectConfig;
pub use registry::Registry;
pub use resource::{ResourceKind, ResourceRef};
pub use tags::ClusterTags;
