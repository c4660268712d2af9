//! Batch execution: many items of one category in a single primary commit.
//!
//! Field assignment runs per item and any failure there aborts the whole
//! batch before anything is written. After the commit, secondary
//! propagation failures degrade to warnings exactly as in the single-item
//! pipeline, but never roll the batch back.

use serde_json::Value;
use tracing::{debug, warn};

use graft_core::field::{self, reserved, FieldMap};
use graft_core::{Actor, PipelineError, Procedure};
use graft_cypher::builder;

use crate::notify::{Notification, NotificationAction};
use crate::orchestrator::ItemService;
use crate::request::{MutationContext, MutationKind};
use crate::transform::{self, node_from_row};

/// Outcome of a committed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchResult {
    /// Identifiers of the items written or removed.
    pub uuids: Vec<String>,
    /// Non-fatal trouble encountered after the commit, one line per event.
    pub warnings: Vec<String>,
}

impl ItemService {
    /// Create many items at once. The node writes collapse into one
    /// `UNWIND` merge; relationship writes follow per item in the same
    /// transaction.
    pub async fn batch_create(
        &self,
        category: &str,
        payloads: Vec<FieldMap>,
        actor: Actor,
        procedure: Procedure,
    ) -> Result<BatchResult, PipelineError> {
        let schema = self.schema(category)?.clone();
        let references = self.registry().references(category);

        let mut contexts = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            self.validate_payload(category, payload)?;
            let fields = self
                .assembler()
                .create_fields(category, payload, &procedure)
                .await?;
            let uuid = field::as_str(&fields, reserved::UUID)
                .unwrap_or_default()
                .to_owned();
            let mut ctx = MutationContext::new(category, MutationKind::Create, uuid);
            ctx.fields = fields;
            if !procedure.ignore_hooks {
                if let Some(hook) = self.hook(category) {
                    hook.pre_process(&mut ctx).await?;
                }
            }
            ctx.stringified_fields =
                transform::to_storage_form(self.registry(), category, &ctx.fields)?;
            contexts.push(ctx);
        }

        // batched nodes share the category label set; per-item tags do not
        // apply here
        let labels = self.registry().ancestors(category);
        let items: Vec<Value> = contexts
            .iter()
            .map(|ctx| Value::Object(ctx.stringified_fields.clone()))
            .collect();
        let mut statements = vec![builder::batch_merge_nodes(&labels, items)?];
        for ctx in &contexts {
            for descriptor in &references {
                if let Some(statement) =
                    builder::relationship_merge(category, descriptor, &ctx.uuid, &ctx.fields)?
                {
                    statements.push(statement);
                }
            }
        }
        self.graph().execute_all(&statements).await?;
        debug!(category, items = contexts.len(), "batch create committed");

        let mut result = BatchResult::default();
        result.uuids = contexts.iter().map(|ctx| ctx.uuid.clone()).collect();

        if let Some(search) = &schema.search {
            let docs: Vec<FieldMap> = contexts.iter().map(|ctx| ctx.fields.clone()).collect();
            if let Err(err) = self.search().batch_upsert(&search.index, &docs).await {
                push_warning(&mut result, category, &err);
            }
        }
        for ctx in &contexts {
            if let Err(err) = self.cache().put(&ctx.fields).await {
                push_warning(&mut result, category, &err);
            }
        }
        if schema.notification && !actor.is_system() && !procedure.ignore_notification {
            let notifications: Vec<Notification> = contexts
                .iter()
                .map(|ctx| batch_notification(category, &actor, NotificationAction::Create, ctx))
                .collect();
            if let Err(err) = self.notifier().post_batch(&notifications).await {
                push_warning(&mut result, category, &err);
            }
        }
        Ok(result)
    }

    /// Update many items at once. Any missing target aborts the batch
    /// before the commit.
    pub async fn batch_update(
        &self,
        category: &str,
        changes: Vec<(String, FieldMap)>,
        actor: Actor,
        procedure: Procedure,
    ) -> Result<BatchResult, PipelineError> {
        let schema = self.schema(category)?.clone();

        let mut contexts = Vec::with_capacity(changes.len());
        for (uuid, change) in &changes {
            let rows = self
                .graph()
                .execute(&builder::node_by_id(category, uuid)?)
                .await?;
            let old = rows.first().and_then(node_from_row).ok_or_else(|| {
                PipelineError::TargetMissing {
                    category: category.to_owned(),
                    uuid: uuid.clone(),
                }
            })?;
            let fields = self
                .assembler()
                .update_fields(category, uuid, &old, change, &procedure)
                .await?;
            self.validate_payload(category, &fields)?;
            let mut ctx = MutationContext::new(category, MutationKind::Update, uuid);
            ctx.fields = fields;
            ctx.fields_old = Some(transform::to_structured_form(self.registry(), category, &old));
            ctx.change = Some(change.clone());
            ctx.stringified_fields =
                transform::to_storage_form(self.registry(), category, &ctx.fields)?;
            contexts.push(ctx);
        }

        let labels = self.registry().ancestors(category);
        let items: Vec<Value> = contexts
            .iter()
            .map(|ctx| Value::Object(ctx.stringified_fields.clone()))
            .collect();
        let statements = vec![builder::batch_merge_nodes(&labels, items)?];
        self.graph().execute_all(&statements).await?;
        debug!(category, items = contexts.len(), "batch update committed");

        let mut result = BatchResult::default();
        result.uuids = contexts.iter().map(|ctx| ctx.uuid.clone()).collect();

        if let Some(search) = &schema.search {
            let docs: Vec<FieldMap> = contexts.iter().map(|ctx| ctx.fields.clone()).collect();
            if let Err(err) = self.search().batch_upsert(&search.index, &docs).await {
                push_warning(&mut result, category, &err);
            }
        }
        for ctx in &contexts {
            if let Some(old) = &ctx.fields_old {
                if let Err(err) = self.cache().evict(old).await {
                    push_warning(&mut result, category, &err);
                }
            }
            if let Err(err) = self.cache().put(&ctx.fields).await {
                push_warning(&mut result, category, &err);
            }
        }
        if schema.notification && !actor.is_system() && !procedure.ignore_notification {
            let notifications: Vec<Notification> = contexts
                .iter()
                .map(|ctx| batch_notification(category, &actor, NotificationAction::Update, ctx))
                .collect();
            if let Err(err) = self.notifier().post_batch(&notifications).await {
                push_warning(&mut result, category, &err);
            }
        }
        Ok(result)
    }

    /// Delete many items at once. Targets already gone are reported as
    /// warnings and skipped; the reference-integrity guard still aborts the
    /// whole batch unless `force` is set.
    pub async fn batch_delete(
        &self,
        category: &str,
        uuids: &[String],
        force: bool,
        actor: Actor,
        procedure: Procedure,
    ) -> Result<BatchResult, PipelineError> {
        let schema = self.schema(category)?.clone();

        let mut result = BatchResult::default();
        let mut contexts = Vec::new();
        for uuid in uuids {
            let rows = self
                .graph()
                .execute(&builder::node_with_relations(category, uuid)?)
                .await?;
            let (old, related) = match rows.first().and_then(crate::orchestrator::delete_guard_row)
            {
                Some(parts) => parts,
                None => {
                    warn!(category, uuid = %uuid, "batch delete target not found");
                    result
                        .warnings
                        .push(format!("{category} '{uuid}': no record found"));
                    continue;
                }
            };
            if !force {
                self.guard_delete(uuid, &related)?;
            }
            let old = transform::to_structured_form(self.registry(), category, &old);
            let mut ctx = MutationContext::new(category, MutationKind::Delete, uuid);
            ctx.fields = old.clone();
            ctx.fields_old = Some(old);
            contexts.push(ctx);
        }
        if contexts.is_empty() {
            return Ok(result);
        }

        result.uuids = contexts.iter().map(|ctx| ctx.uuid.clone()).collect();
        let statement = builder::batch_delete_nodes(category, &result.uuids)?;
        self.graph().execute_all(&[statement]).await?;
        debug!(category, items = result.uuids.len(), "batch delete committed");

        if let Some(search) = &schema.search {
            if let Err(err) = self.search().batch_delete(&search.index, &result.uuids).await {
                push_warning(&mut result, category, &err);
            }
        }
        for ctx in &contexts {
            if let Err(err) = self.cache().evict(&ctx.fields).await {
                push_warning(&mut result, category, &err);
            }
        }
        if schema.notification && !actor.is_system() && !procedure.ignore_notification {
            let notifications: Vec<Notification> = contexts
                .iter()
                .map(|ctx| batch_notification(category, &actor, NotificationAction::Delete, ctx))
                .collect();
            if let Err(err) = self.notifier().post_batch(&notifications).await {
                push_warning(&mut result, category, &err);
            }
        }
        Ok(result)
    }

    /// Apply one partial change to many items: set the given fields, remove
    /// the named ones. Identity fields are never part of the change.
    pub async fn batch_set_fields(
        &self,
        category: &str,
        uuids: &[String],
        change: &FieldMap,
        removed: &[String],
    ) -> Result<BatchResult, PipelineError> {
        let schema = self.schema(category)?.clone();

        let mut stringified = transform::to_storage_form(self.registry(), category, change)?;
        stringified.remove(reserved::CATEGORY);
        stringified.remove(reserved::UUID);
        stringified
            .entry(reserved::LAST_UPDATED.to_owned())
            .or_insert_with(|| Value::from(field::now_millis()));

        let statement = builder::batch_set_fields(category, uuids, &stringified, removed)?;
        self.graph().execute_all(&[statement]).await?;
        debug!(category, items = uuids.len(), "batch field change committed");

        let mut result = BatchResult {
            uuids: uuids.to_vec(),
            warnings: Vec::new(),
        };
        if let Some(search) = &schema.search {
            if let Err(err) = self
                .search()
                .batch_set_fields(&search.index, uuids, change, removed)
                .await
            {
                push_warning(&mut result, category, &err);
            }
        }
        // refresh cached snapshots that exist; absent ones reload lazily
        for uuid in uuids {
            let cached = match self.cache().get(category, uuid).await {
                Ok(cached) => cached,
                Err(err) => {
                    push_warning(&mut result, category, &err);
                    continue;
                }
            };
            if let Some(old) = cached {
                let mut fresh = field::merge(&old, change);
                for name in removed {
                    fresh.remove(name);
                }
                fresh.insert(
                    reserved::LAST_UPDATED.into(),
                    stringified[reserved::LAST_UPDATED].clone(),
                );
                if let Err(err) = self.cache().put(&fresh).await {
                    push_warning(&mut result, category, &err);
                }
            }
        }
        Ok(result)
    }
}

fn push_warning(result: &mut BatchResult, category: &str, err: &PipelineError) {
    warn!(category, error = %err, "batch propagation failed");
    result.warnings.push(err.to_string());
}

fn batch_notification(
    category: &str,
    actor: &Actor,
    action: NotificationAction,
    ctx: &MutationContext,
) -> Notification {
    let (new, old, update) = match action {
        NotificationAction::Create => (Some(ctx.fields.clone()), None, None),
        NotificationAction::Update => (
            Some(ctx.fields.clone()),
            ctx.fields_old.clone(),
            ctx.change.clone(),
        ),
        NotificationAction::Delete => (None, ctx.fields_old.clone(), None),
    };
    Notification {
        category: category.to_owned(),
        action,
        user: actor.id.clone(),
        source: None,
        new,
        old,
        update,
        routing: None,
    }
}
