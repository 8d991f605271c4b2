use tracing::warn;

use crate::error::DriftResult;

/// Result of a step whose failure must not abort the surrounding operation.
///
/// Ordinary steps return `DriftResult`; best-effort steps return this instead
/// so the downgrade from error to warning is visible in the signature.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Degraded { step: String, warning: String },
}

impl StepOutcome {
    pub fn best_effort(step: &str, result: DriftResult<()>) -> Self {
        match result {
            Ok(()) => StepOutcome::Completed,
            Err(e) => {
                warn!(step, error = %e, "best-effort step failed, continuing");
                StepOutcome::Degraded {
                    step: step.to_string(),
                    warning: e.to_string(),
                }
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, StepOutcome::Degraded { .. })
    }

    pub fn warning(&self) -> Option<String> {
        match self {
            StepOutcome::Completed => None,
            StepOutcome::Degraded { step, warning } => Some(format!("{step}: {warning}")),
        }
    }
}
