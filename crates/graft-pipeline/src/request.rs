use serde::Serialize;
use serde_json::{json, Value};

use graft_core::actor::{Actor, Procedure};
use graft_core::field::FieldMap;
use graft_core::ConsistencyPolicy;
use graft_cypher::Statement;

use crate::notify::SubscriberRouting;

/// Which of the three mutation families a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

/// The mutation itself.
#[derive(Debug, Clone)]
pub enum MutationOp {
    Create { payload: FieldMap },
    Update { uuid: String, change: FieldMap },
    Delete { uuid: String, force: bool },
}

impl MutationOp {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationOp::Create { .. } => MutationKind::Create,
            MutationOp::Update { .. } => MutationKind::Update,
            MutationOp::Delete { .. } => MutationKind::Delete,
        }
    }
}

/// A single-item mutation request.
#[derive(Debug, Clone)]
pub struct MutationRequest {
    pub category: String,
    pub op: MutationOp,
    pub actor: Actor,
    pub procedure: Procedure,
    /// Overrides the configured consistency policy for this request.
    pub policy: Option<ConsistencyPolicy>,
    pub subscriber: Option<SubscriberRouting>,
}

impl MutationRequest {
    pub fn create(category: impl Into<String>, payload: FieldMap, actor: Actor) -> Self {
        Self {
            category: category.into(),
            op: MutationOp::Create { payload },
            actor,
            procedure: Procedure::default(),
            policy: None,
            subscriber: None,
        }
    }

    pub fn update(
        category: impl Into<String>,
        uuid: impl Into<String>,
        change: FieldMap,
        actor: Actor,
    ) -> Self {
        Self {
            category: category.into(),
            op: MutationOp::Update {
                uuid: uuid.into(),
                change,
            },
            actor,
            procedure: Procedure::default(),
            policy: None,
            subscriber: None,
        }
    }

    pub fn delete(category: impl Into<String>, uuid: impl Into<String>, actor: Actor) -> Self {
        Self {
            category: category.into(),
            op: MutationOp::Delete {
                uuid: uuid.into(),
                force: false,
            },
            actor,
            procedure: Procedure::default(),
            policy: None,
            subscriber: None,
        }
    }

    /// Delete even when other nodes still reference this one.
    pub fn forced(mut self) -> Self {
        if let MutationOp::Delete { force, .. } = &mut self.op {
            *force = true;
        }
        self
    }

    pub fn with_procedure(mut self, procedure: Procedure) -> Self {
        self.procedure = procedure;
        self
    }

    pub fn with_policy(mut self, policy: ConsistencyPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_subscriber(mut self, subscriber: SubscriberRouting) -> Self {
        self.subscriber = Some(subscriber);
        self
    }
}

/// Minimal acknowledgement of an applied mutation: the identifier only.
/// Full entities are reconstructed on subsequent read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationAck {
    pub uuid: String,
}

/// Applied, or the reserved "not found" outcome (delete misses).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied(MutationAck),
    NotFound,
}

impl MutationOutcome {
    pub fn uuid(&self) -> Option<&str> {
        match self {
            MutationOutcome::Applied(ack) => Some(&ack.uuid),
            MutationOutcome::NotFound => None,
        }
    }

    /// Wire shape: `{"uuid": ...}` on success, the reserved empty object on
    /// a miss.
    pub fn to_response(&self) -> Value {
        match self {
            MutationOutcome::Applied(ack) => json!({ "uuid": ack.uuid }),
            MutationOutcome::NotFound => json!({}),
        }
    }
}

/// A read request: point lookup, scan, label scan, or paginated scan.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub category: String,
    pub uuid: Option<String>,
    /// Comma-split status allow-list overriding the soft-delete predicate.
    pub status_filter: Option<Vec<String>>,
    pub sort: Option<String>,
    pub ascending: bool,
    /// 1-based page number; presence turns pagination on.
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    /// Tag/subcategory labels to scan instead of the category itself.
    pub labels: Option<Vec<String>>,
    /// Replace reference ids with the cached referenced records.
    pub resolve_references: bool,
}

impl QueryRequest {
    pub fn by_id(category: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            uuid: Some(uuid.into()),
            ..Default::default()
        }
    }

    pub fn list(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ..Default::default()
        }
    }

    pub fn paginated(mut self, page: u64, per_page: Option<u64>) -> Self {
        self.page = Some(page);
        self.per_page = per_page;
        self
    }
}

/// Structured read results.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    One(Option<FieldMap>),
    Many(Vec<FieldMap>),
    Page { count: u64, results: Vec<FieldMap> },
}

impl QueryResult {
    /// Wire shape; a point-lookup miss is the reserved empty object.
    pub fn to_response(&self) -> Value {
        match self {
            QueryResult::One(Some(fields)) => Value::Object(fields.clone()),
            QueryResult::One(None) => json!({}),
            QueryResult::Many(items) => {
                Value::Array(items.iter().cloned().map(Value::Object).collect())
            }
            QueryResult::Page { count, results } => json!({
                "count": count,
                "results": results.iter().cloned().map(Value::Object).collect::<Vec<_>>(),
            }),
        }
    }
}

/// Per-item outcome of a loop execution: success with the identifier, or an
/// error record that never aborts sibling items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LoopOutcome {
    Applied {
        uuid: String,
    },
    Failed {
        category: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        uuid: Option<String>,
        error: String,
    },
}

impl LoopOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, LoopOutcome::Applied { .. })
    }
}

/// Pipeline stages of a single-item mutation, in order. `Failed` is
/// reachable from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Received,
    FieldsAssigned,
    StatementsBuilt,
    PrimaryCommitted,
    SecondaryPropagated,
    Completed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::FieldsAssigned => "fields_assigned",
            Stage::StatementsBuilt => "statements_built",
            Stage::PrimaryCommitted => "primary_committed",
            Stage::SecondaryPropagated => "secondary_propagated",
            Stage::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Working state of one mutation as it moves through the stages. Hooks see
/// and may adjust it between field assignment and statement building.
#[derive(Debug, Clone)]
pub struct MutationContext {
    pub category: String,
    pub kind: MutationKind,
    pub uuid: String,
    /// The full field snapshot being written.
    pub fields: FieldMap,
    /// Prior snapshot, present for update/delete. Never persisted; kept for
    /// diffing, cache eviction, and notification payloads.
    pub fields_old: Option<FieldMap>,
    /// The incoming change-set of an update.
    pub change: Option<FieldMap>,
    /// `fields` with object values flattened for graph storage.
    pub stringified_fields: FieldMap,
    pub statements: Vec<Statement>,
    pub stage: Stage,
}

impl MutationContext {
    pub fn new(category: impl Into<String>, kind: MutationKind, uuid: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            kind,
            uuid: uuid.into(),
            fields: FieldMap::new(),
            fields_old: None,
            change: None,
            stringified_fields: FieldMap::new(),
            statements: Vec::new(),
            stage: Stage::Received,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcome_responses() {
        let applied = MutationOutcome::Applied(MutationAck { uuid: "u1".into() });
        assert_eq!(applied.to_response(), json!({"uuid": "u1"}));
        assert_eq!(MutationOutcome::NotFound.to_response(), json!({}));
    }

    #[test]
    fn forced_only_applies_to_delete() {
        let request = MutationRequest::delete("Software", "u1", Actor::system()).forced();
        assert!(matches!(request.op, MutationOp::Delete { force: true, .. }));

        let request =
            MutationRequest::create("Software", FieldMap::new(), Actor::system()).forced();
        assert!(matches!(request.op, MutationOp::Create { .. }));
    }

    #[test]
    fn loop_outcome_serialization() {
        let ok = LoopOutcome::Applied { uuid: "u1".into() };
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"uuid": "u1"}));

        let failed = LoopOutcome::Failed {
            category: "Software".into(),
            uuid: None,
            error: "boom".into(),
        };
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"category": "Software", "error": "boom"})
        );
    }

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::Received < Stage::PrimaryCommitted);
        assert!(Stage::PrimaryCommitted < Stage::Completed);
    }
}
