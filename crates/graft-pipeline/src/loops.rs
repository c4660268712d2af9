//! Loop execution: many independent single-item mutations, each running the
//! full pipeline. One item's failure never touches its siblings; the caller
//! gets a per-item outcome list instead of an aborted batch.

use tracing::warn;

use graft_core::field::FieldMap;
use graft_core::{Actor, Procedure};

use crate::orchestrator::ItemService;
use crate::request::{LoopOutcome, MutationOutcome, MutationRequest};

impl ItemService {
    /// Create each payload independently.
    pub async fn loop_create(
        &self,
        category: &str,
        payloads: Vec<FieldMap>,
        actor: Actor,
        procedure: Procedure,
    ) -> Vec<LoopOutcome> {
        let mut outcomes = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let request = MutationRequest::create(category, payload, actor.clone())
                .with_procedure(procedure.clone());
            outcomes.push(self.run_one(category, None, request).await);
        }
        outcomes
    }

    /// Update each target independently.
    pub async fn loop_update(
        &self,
        category: &str,
        changes: Vec<(String, FieldMap)>,
        actor: Actor,
        procedure: Procedure,
    ) -> Vec<LoopOutcome> {
        let mut outcomes = Vec::with_capacity(changes.len());
        for (uuid, change) in changes {
            let request = MutationRequest::update(category, uuid.clone(), change, actor.clone())
                .with_procedure(procedure.clone());
            outcomes.push(self.run_one(category, Some(uuid), request).await);
        }
        outcomes
    }

    /// Delete each target independently.
    pub async fn loop_delete(
        &self,
        category: &str,
        uuids: Vec<String>,
        force: bool,
        actor: Actor,
        procedure: Procedure,
    ) -> Vec<LoopOutcome> {
        let mut outcomes = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            let mut request = MutationRequest::delete(category, uuid.clone(), actor.clone())
                .with_procedure(procedure.clone());
            if force {
                request = request.forced();
            }
            outcomes.push(self.run_one(category, Some(uuid), request).await);
        }
        outcomes
    }

    async fn run_one(
        &self,
        category: &str,
        uuid: Option<String>,
        request: MutationRequest,
    ) -> LoopOutcome {
        match self.mutate(request).await {
            Ok(MutationOutcome::Applied(ack)) => LoopOutcome::Applied { uuid: ack.uuid },
            Ok(MutationOutcome::NotFound) => LoopOutcome::Failed {
                category: category.to_owned(),
                uuid,
                error: "no record found".into(),
            },
            Err(err) => {
                warn!(category, error = %err, "loop item failed");
                LoopOutcome::Failed {
                    category: category.to_owned(),
                    uuid,
                    error: err.to_string(),
                }
            }
        }
    }
}
