use serde::{Deserialize, Serialize};

use crate::types::{GeoNode, NodeRole};

/// Partial node update; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateNodeRequest {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub role: Option<NodeRole>,
    #[serde(default)]
    pub namespace_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub repos_max_capacity: Option<u32>,
    #[serde(default)]
    pub files_max_capacity: Option<u32>,
}

impl UpdateNodeRequest {
    pub fn apply(self, node: &mut GeoNode) {
        if let Some(enabled) = self.enabled {
            node.enabled = enabled;
        }
        if let Some(role) = self.role {
            node.role = role;
        }
        if let Some(namespace_ids) = self.namespace_ids {
            node.namespace_ids = namespace_ids;
        }
        if let Some(capacity) = self.repos_max_capacity {
            node.repos_max_capacity = capacity;
        }
        if let Some(capacity) = self.files_max_capacity {
            node.files_max_capacity = capacity;
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NodeResponse {
    #[serde(flatten)]
    pub node: GeoNode,
    pub url: String,
    /// Whether this is the node the responding installation runs as.
    pub current: bool,
}

impl NodeResponse {
    #[must_use]
    pub fn new(node: GeoNode, current_url: &str) -> Self {
        let url = node.url();
        let current = url.trim_end_matches('/').eq_ignore_ascii_case(current_url.trim_end_matches('/'));
        Self { node, url, current }
    }
}
