use serde::{Deserialize, Serialize};

use graft_core::ConsistencyPolicy;

/// Pipeline-wide settings. Requests may override the consistency policy
/// per call; everything else is fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Page size when a paginated query names none.
    pub per_page: u64,
    /// Attach denormalized `<field>_name` display fields for resolved
    /// references.
    pub add_ref_name_field: bool,
    /// Separator between compound unique-name components.
    pub compound_key_separator: String,
    /// Default behavior for search-propagation failures.
    pub policy: ConsistencyPolicy,
    /// Depth cap for the member-expansion traversal.
    pub member_depth_limit: usize,
    /// Reported as the `source` of posted notifications.
    pub source: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            per_page: 20,
            add_ref_name_field: true,
            compound_key_separator: "_".into(),
            policy: ConsistencyPolicy::Relaxed,
            member_depth_limit: 8,
            source: None,
        }
    }
}
