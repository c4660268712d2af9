use serde::{Deserialize, Serialize};

/// How secondary-store (search) failures are treated after a successful
/// primary commit. A per-request value, defaulted from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyPolicy {
    /// Search-propagation failure is downgraded to a warning; the mutation
    /// is still reported successful.
    #[default]
    Relaxed,
    /// Search-propagation failure fails the mutation.
    Strict,
}

/// Error severity per the pipeline's two-tier scheme: warnings surface as
/// successful-shaped responses, errors abort the current item's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Failures surfaced by the mutation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("schema validation failed for '{category}': {detail}")]
    Schema { category: String, detail: String },

    #[error("unknown category '{0}'")]
    UnknownCategory(String),

    #[error("a {category} named '{name}' already exists")]
    DuplicateName { category: String, name: String },

    #[error("referenced {category} item '{id}' does not exist")]
    DanglingReference { category: String, id: String },

    #[error("item is referenced by {category} item '{id}' and cannot be deleted")]
    ReferencedByOthers { category: String, id: String },

    #[error("no record found")]
    NotFound,

    #[error("{category} item '{uuid}' does not exist")]
    TargetMissing { category: String, uuid: String },

    #[error("statement build failed: {0}")]
    Statement(String),

    #[error("graph store: {0}")]
    Graph(String),

    #[error("search index: {0}")]
    Search(String),

    #[error("cache: {0}")]
    Cache(String),

    #[error("notification sink: {0}")]
    Notification(String),
}

impl PipelineError {
    /// Classify this failure under the given policy.
    pub fn severity(&self, policy: ConsistencyPolicy) -> Severity {
        match self {
            PipelineError::NotFound => Severity::Warning,
            PipelineError::Search(_) => match policy {
                ConsistencyPolicy::Strict => Severity::Error,
                ConsistencyPolicy::Relaxed => Severity::Warning,
            },
            // Cache and notification propagation never fail a mutation.
            PipelineError::Cache(_) | PipelineError::Notification(_) => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn is_fatal(&self, policy: ConsistencyPolicy) -> bool {
        self.severity(policy) == Severity::Error
    }
}
