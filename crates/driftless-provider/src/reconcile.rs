//! Shared vocabulary of the discover -> diff -> reconcile cycle.

use std::fmt::Display;

use driftless_common::{DriftError, DriftResult, ResourceKind};

/// Outcome of a discovery query. Absence is the trigger for creation, never
/// an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Discovered<T> {
    Found(T),
    NotFound,
}

impl<T> Discovered<T> {
    /// Collapses the matches of a singleton kind. More than one match means
    /// the environment is ambiguous and nothing may be touched.
    pub fn from_matches(
        kind: ResourceKind,
        identity: &str,
        mut matches: Vec<T>,
        id: impl Fn(&T) -> String,
    ) -> DriftResult<Self> {
        match matches.len() {
            0 => Ok(Discovered::NotFound),
            1 => Ok(matches.pop().map_or(Discovered::NotFound, Discovered::Found)),
            _ => Err(DriftError::AmbiguousState {
                kind,
                identity: identity.to_string(),
                ids: matches.iter().map(id).collect(),
            }),
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Discovered::Found(t) => Some(t),
            Discovered::NotFound => None,
        }
    }
}

/// Compares immutable fields and reports the first one that differs.
///
/// ```ignore
/// Immutables::new(ResourceKind::Network, "vpc-1")
///     .field("cidr_block", &actual.cidr_block, &desired.cidr_block)
///     .finish()?;
/// ```
pub struct Immutables<'a> {
    kind: ResourceKind,
    identity: &'a str,
    violation: Option<DriftError>,
}

impl<'a> Immutables<'a> {
    pub fn new(kind: ResourceKind, identity: &'a str) -> Self {
        Self {
            kind,
            identity,
            violation: None,
        }
    }

    pub fn field<T>(mut self, name: &str, actual: &T, desired: &T) -> Self
    where
        T: PartialEq + Display + ?Sized,
    {
        if self.violation.is_none() && actual != desired {
            self.violation = Some(DriftError::immutable(
                self.kind,
                self.identity,
                name,
                actual,
                desired,
            ));
        }
        self
    }

    /// Like [`Immutables::field`] for values without a `Display` impl.
    pub fn debug_field<T>(mut self, name: &str, actual: &T, desired: &T) -> Self
    where
        T: PartialEq + std::fmt::Debug,
    {
        if self.violation.is_none() && actual != desired {
            self.violation = Some(DriftError::immutable(
                self.kind,
                self.identity,
                name,
                format!("{actual:?}"),
                format!("{desired:?}"),
            ));
        }
        self
    }

    pub fn finish(self) -> DriftResult<()> {
        match self.violation {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton_discovery() {
        let none: Discovered<String> =
            Discovered::from_matches(ResourceKind::Vpc, "demo", vec![], |s: &String| s.clone()).unwrap();
        assert_eq!(none, Discovered::NotFound);

        let one = Discovered::from_matches(ResourceKind::Vpc, "demo", vec!["vpc-1"], |s| {
            s.to_string()
        })
        .unwrap();
        assert_eq!(one, Discovered::Found("vpc-1"));

        let err = Discovered::from_matches(
            ResourceKind::Vpc,
            "demo",
            vec!["vpc-1", "vpc-2"],
            |s| s.to_string(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("vpc-1, vpc-2"));
    }

    #[test]
    fn first_immutable_difference_wins() {
        let err = Immutables::new(ResourceKind::NodePool, "gpu")
            .field("instance_type", "g4dn.xlarge", "g4dn.xlarge")
            .field("disk_size", &50, &100)
            .field("spot", &false, &true)
            .finish()
            .unwrap_err();
        match err {
            DriftError::ImmutableFieldViolation { field, actual, desired, .. } => {
                assert_eq!(field, "disk_size");
                assert_eq!(actual, "50");
                assert_eq!(desired, "100");
            }
            other => panic!("unexpected error {other}"),
        }

        Immutables::new(ResourceKind::NodePool, "gpu")
            .debug_field("zones", &vec!["a"], &vec!["a"])
            .finish()
            .unwrap();
    }
}
