//! Tag scheme used to address every resource driftless creates.
//!
//! Nothing about a deployment is stored locally. Each run finds its resources
//! again by the pair of tags below, so a resource without the management
//! marker is invisible to driftless even when its name looks familiar.

use std::collections::BTreeMap;

pub const CLUSTER_TAG: &str = "driftless:cluster";
pub const MANAGED_BY_TAG: &str = "driftless:managed-by";
pub const MANAGED_BY_VALUE: &str = "driftless";
pub const NODE_POOL_TAG: &str = "driftless:node-pool";

pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTags {
    cluster: String,
}

impl ClusterTags {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// The mandatory pair, used verbatim as discovery filters.
    pub fn filters(&self) -> [(&'static str, &str); 2] {
        [
            (CLUSTER_TAG, self.cluster.as_str()),
            (MANAGED_BY_TAG, MANAGED_BY_VALUE),
        ]
    }

    pub fn required(&self) -> Tags {
        self.filters()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// User supplied tags plus the mandatory pair. The mandatory pair always
    /// wins so a user tag cannot detach a resource from its cluster.
    pub fn with_extra(&self, extra: &Tags) -> Tags {
        let mut tags = extra.clone();
        tags.extend(self.required());
        tags
    }

    pub fn for_node_pool(&self, pool: &str, extra: &Tags) -> Tags {
        let mut tags = self.with_extra(extra);
        tags.insert(NODE_POOL_TAG.to_string(), pool.to_string());
        tags
    }

    /// True only when both mandatory tags are present with this cluster's values.
    pub fn owns(&self, tags: &Tags) -> bool {
        self.filters()
            .iter()
            .all(|(k, v)| tags.get(*k).map(String::as_str) == Some(*v))
    }

    /// Short description of the lookup, used in error messages.
    pub fn describe(&self) -> String {
        format!("{}={}", CLUSTER_TAG, self.cluster)
    }
}

pub fn node_pool_name(tags: &Tags) -> Option<&str> {
    tags.get(NODE_POOL_TAG).map(String::as_str)
}

/// User tags that differ from `actual`, ignoring the mandatory pair.
pub fn missing_tags(actual: &Tags, desired: &Tags) -> Tags {
    desired
        .iter()
        .filter(|(k, v)| actual.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mandatory_pair_overrides_user_tags() {
        let tags = ClusterTags::new("demo");
        let mut extra = Tags::new();
        extra.insert(CLUSTER_TAG.to_string(), "other".to_string());
        extra.insert("team".to_string(), "data".to_string());

        let merged = tags.with_extra(&extra);
        assert_eq!(merged.get(CLUSTER_TAG).unwrap(), "demo");
        assert_eq!(merged.get(MANAGED_BY_TAG).unwrap(), MANAGED_BY_VALUE);
        assert_eq!(merged.get("team").unwrap(), "data");
    }

    #[test]
    fn unmanaged_resources_are_not_owned() {
        let tags = ClusterTags::new("demo");
        let mut found = Tags::new();
        found.insert(CLUSTER_TAG.to_string(), "demo".to_string());
        assert!(!tags.owns(&found));

        found.insert(MANAGED_BY_TAG.to_string(), MANAGED_BY_VALUE.to_string());
        assert!(tags.owns(&found));
        assert!(!ClusterTags::new("demo2").owns(&found));
    }

    #[test]
    fn node_pool_tag_round_trips() {
        let tags = ClusterTags::new("demo").for_node_pool("gpu", &Tags::new());
        assert_eq!(node_pool_name(&tags), Some("gpu"));
    }

    #[test]
    fn missing_tags_only_reports_differences() {
        let mut actual = Tags::new();
        actual.insert("a".to_string(), "1".to_string());
        let mut desired = actual.clone();
        desired.insert("b".to_string(), "2".to_string());
        desired.insert("a".to_string(), "1".to_string());

        let missing = missing_tags(&actual, &desired);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing.get("b").unwrap(), "2");
    }
}
