use serde::{Deserialize, Serialize};

/// Whether a mutation was issued by a human, an agent, or the system itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorKind {
    Human,
    Agent,
    System,
}

/// The principal behind a mutation. `System` actors are internal callers
/// whose writes never produce notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub kind: ActorKind,
}

impl Actor {
    pub fn human(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ActorKind::Human,
        }
    }

    pub fn system() -> Self {
        Self {
            id: "system".into(),
            kind: ActorKind::System,
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind == ActorKind::System
    }
}

/// Per-request opt-outs for individual pipeline steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    /// Skip the duplicate unique-name check on create.
    #[serde(default)]
    pub ignore_unique_check: bool,
    /// Suppress the notification post even when the category declares one.
    #[serde(default)]
    pub ignore_notification: bool,
    /// Skip category-specific pre/post hooks.
    #[serde(default)]
    pub ignore_hooks: bool,
}
