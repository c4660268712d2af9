//! The mutation pipeline itself: field assignment, hooks, statement
//! building, the primary graph commit, and secondary propagation to the
//! search index, the cache, and the notification sink.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use graft_core::field::{self, reserved, FieldMap};
use graft_core::reference::RefPath;
use graft_core::registry::SchemaRegistry;
use graft_core::schema::CategorySchema;
use graft_core::PipelineError;
use graft_cypher::builder::{self, ScanOptions};

use crate::config::PipelineConfig;
use crate::hooks::HookRegistry;
use crate::notify::{Notification, NotificationAction, NotificationSink};
use crate::request::{
    MutationAck, MutationContext, MutationKind, MutationOp, MutationOutcome, MutationRequest,
    QueryRequest, QueryResult, Stage,
};
use crate::stores::{GraphStore, ItemCache, SearchIndex};
use crate::transform::{self, node_from_row, FieldAssembler};

/// Schema-driven item store over a labeled-property graph.
///
/// All collaborators are injected; the service itself holds no mutable
/// state and is cheap to share.
pub struct ItemService {
    registry: Arc<dyn SchemaRegistry>,
    graph: Arc<dyn GraphStore>,
    cache: Arc<dyn ItemCache>,
    search: Arc<dyn SearchIndex>,
    notifier: Arc<dyn NotificationSink>,
    hooks: HookRegistry,
    config: PipelineConfig,
}

impl ItemService {
    pub fn new(
        registry: Arc<dyn SchemaRegistry>,
        graph: Arc<dyn GraphStore>,
        cache: Arc<dyn ItemCache>,
        search: Arc<dyn SearchIndex>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            registry,
            graph,
            cache,
            search,
            notifier,
            hooks: HookRegistry::new(),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &dyn SchemaRegistry {
        self.registry.as_ref()
    }

    pub(crate) fn graph(&self) -> &dyn GraphStore {
        self.graph.as_ref()
    }

    pub(crate) fn cache(&self) -> &dyn ItemCache {
        self.cache.as_ref()
    }

    pub(crate) fn search(&self) -> &dyn SearchIndex {
        self.search.as_ref()
    }

    pub(crate) fn notifier(&self) -> &dyn NotificationSink {
        self.notifier.as_ref()
    }

    pub(crate) fn hook(&self, category: &str) -> Option<&Arc<dyn crate::hooks::CategoryHook>> {
        self.hooks.get(category)
    }

    pub(crate) fn assembler(&self) -> FieldAssembler<'_> {
        FieldAssembler::new(
            self.registry.as_ref(),
            self.graph.as_ref(),
            self.cache.as_ref(),
            &self.config,
        )
    }

    pub(crate) fn schema(&self, category: &str) -> Result<&CategorySchema, PipelineError> {
        self.registry
            .schema(category)
            .ok_or_else(|| PipelineError::UnknownCategory(category.to_owned()))
    }

    /// Run one mutation through the full pipeline.
    ///
    /// A delete whose target is already gone resolves to
    /// [`MutationOutcome::NotFound`] rather than an error; every other
    /// failure before the primary commit aborts with nothing written.
    pub async fn mutate(
        &self,
        request: MutationRequest,
    ) -> Result<MutationOutcome, PipelineError> {
        let category = request.category.clone();
        let policy = request.policy.unwrap_or(self.config.policy);
        self.schema(&category)?;
        debug!(category = %category, kind = ?request.op.kind(), "mutation received");

        let mut ctx = self.assign_fields(&request).await?;
        let ctx = match &mut ctx {
            Some(ctx) => ctx,
            None => {
                warn!(category = %category, "delete target not found");
                return Ok(MutationOutcome::NotFound);
            }
        };
        ctx.stage = Stage::FieldsAssigned;

        if !request.procedure.ignore_hooks {
            if let Some(hook) = self.hooks.get(&category) {
                hook.pre_process(ctx).await?;
            }
        }

        ctx.stringified_fields =
            transform::to_storage_form(self.registry.as_ref(), &category, &ctx.fields)?;
        ctx.statements = self.build_statements(ctx)?;
        ctx.stage = Stage::StatementsBuilt;

        let results = self.graph.execute_all(&ctx.statements).await?;
        if ctx.kind == MutationKind::Delete
            && results.first().map(Vec::len).unwrap_or(0) != 1
        {
            warn!(category = %category, uuid = %ctx.uuid, "delete removed no node");
            return Ok(MutationOutcome::NotFound);
        }
        ctx.stage = Stage::PrimaryCommitted;
        debug!(category = %category, uuid = %ctx.uuid, stage = %ctx.stage, "primary committed");

        if !request.procedure.ignore_hooks {
            if let Some(hook) = self.hooks.get(&category) {
                hook.post_process(ctx).await?;
            }
        }

        // The three propagation branches are independent; cache and
        // notification failures only warn, search failures follow the
        // consistency policy.
        let (search, cache, notify) = tokio::join!(
            self.update_search(ctx),
            self.update_cache(ctx),
            self.post_notification(&request, ctx),
        );
        if let Err(err) = search {
            if err.is_fatal(policy) {
                return Err(err);
            }
            warn!(category = %category, uuid = %ctx.uuid, error = %err, "search propagation failed");
        }
        if let Err(err) = cache {
            warn!(category = %category, uuid = %ctx.uuid, error = %err, "cache propagation failed");
        }
        if let Err(err) = notify {
            warn!(category = %category, uuid = %ctx.uuid, error = %err, "notification failed");
        }
        ctx.stage = Stage::SecondaryPropagated;
        debug!(category = %category, uuid = %ctx.uuid, stage = %ctx.stage, "mutation complete");
        ctx.stage = Stage::Completed;

        Ok(MutationOutcome::Applied(MutationAck {
            uuid: ctx.uuid.clone(),
        }))
    }

    /// Assemble the mutation context, or `None` for a delete whose target
    /// no longer exists.
    async fn assign_fields(
        &self,
        request: &MutationRequest,
    ) -> Result<Option<MutationContext>, PipelineError> {
        let category = &request.category;
        match &request.op {
            MutationOp::Create { payload } => {
                self.validate_payload(category, payload)?;
                let fields = self
                    .assembler()
                    .create_fields(category, payload, &request.procedure)
                    .await?;
                let uuid = field::as_str(&fields, reserved::UUID).unwrap_or_default().to_owned();
                let mut ctx = MutationContext::new(category, MutationKind::Create, uuid);
                ctx.fields = fields;
                Ok(Some(ctx))
            }
            MutationOp::Update { uuid, change } => {
                let statement = builder::node_by_id(category, uuid)?;
                let rows = self.graph.execute(&statement).await?;
                let old = rows.first().and_then(node_from_row).ok_or_else(|| {
                    PipelineError::TargetMissing {
                        category: category.clone(),
                        uuid: uuid.clone(),
                    }
                })?;
                let fields = self
                    .assembler()
                    .update_fields(category, uuid, &old, change, &request.procedure)
                    .await?;
                self.validate_payload(category, &fields)?;
                let mut ctx = MutationContext::new(category, MutationKind::Update, uuid);
                ctx.fields = fields;
                ctx.fields_old =
                    Some(transform::to_structured_form(self.registry.as_ref(), category, &old));
                ctx.change = Some(change.clone());
                Ok(Some(ctx))
            }
            MutationOp::Delete { uuid, force } => {
                let statement = builder::node_with_relations(category, uuid)?;
                let rows = self.graph.execute(&statement).await?;
                let (old, related) = match rows.first().and_then(delete_guard_row) {
                    Some(parts) => parts,
                    None => return Ok(None),
                };
                if !force {
                    self.guard_delete(uuid, &related)?;
                }
                let old = transform::to_structured_form(self.registry.as_ref(), category, &old);
                let mut ctx = MutationContext::new(category, MutationKind::Delete, uuid);
                ctx.fields = old.clone();
                ctx.fields_old = Some(old);
                Ok(Some(ctx))
            }
        }
    }

    pub(crate) fn validate_payload(
        &self,
        category: &str,
        fields: &FieldMap,
    ) -> Result<(), PipelineError> {
        self.registry.validate(category, fields).map_err(|errors| {
            let detail = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            PipelineError::Schema {
                category: category.to_owned(),
                detail,
            }
        })
    }

    /// Reference-integrity guard: refuse the delete while any connected
    /// item still declares a reference to this one.
    pub(crate) fn guard_delete(
        &self,
        uuid: &str,
        related: &[FieldMap],
    ) -> Result<(), PipelineError> {
        for item in related {
            let item_category = match field::as_str(item, reserved::CATEGORY) {
                Some(category) => category.to_owned(),
                None => continue,
            };
            let structured =
                transform::to_structured_form(self.registry.as_ref(), &item_category, item);
            for descriptor in self.registry.references(&item_category) {
                if descriptor
                    .path
                    .reference_ids(&structured)
                    .iter()
                    .any(|id| id == uuid)
                {
                    return Err(PipelineError::ReferencedByOthers {
                        category: item_category,
                        id: field::as_str(item, reserved::UUID).unwrap_or_default().to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    fn build_statements(
        &self,
        ctx: &MutationContext,
    ) -> Result<Vec<graft_cypher::Statement>, PipelineError> {
        let labels = builder::node_labels(&self.registry.ancestors(&ctx.category), &ctx.fields);
        let references = self.registry.references(&ctx.category);
        let statements = match ctx.kind {
            MutationKind::Create => builder::build_create(
                &labels,
                &ctx.category,
                &references,
                &ctx.uuid,
                &ctx.fields,
                &ctx.stringified_fields,
            )?,
            MutationKind::Update => builder::build_update(
                &labels,
                &ctx.category,
                &references,
                &ctx.uuid,
                &ctx.fields,
                ctx.change.as_ref().unwrap_or(&ctx.fields),
                &ctx.stringified_fields,
            )?,
            MutationKind::Delete => vec![builder::build_delete(&ctx.category, &ctx.uuid)?],
        };
        Ok(statements)
    }

    async fn update_search(&self, ctx: &MutationContext) -> Result<(), PipelineError> {
        let search = match self.schema(&ctx.category)?.search.clone() {
            Some(search) => search,
            None => return Ok(()),
        };
        match ctx.kind {
            MutationKind::Create => {
                self.search
                    .upsert(&search.index, &ctx.fields, false, search.upsert)
                    .await
            }
            MutationKind::Update => {
                self.search
                    .upsert(&search.index, &ctx.fields, true, false)
                    .await
            }
            MutationKind::Delete => self.search.delete(&search.index, &ctx.uuid).await,
        }
    }

    async fn update_cache(&self, ctx: &MutationContext) -> Result<(), PipelineError> {
        match ctx.kind {
            MutationKind::Create => self.cache.put(&ctx.fields).await,
            MutationKind::Update => {
                if let Some(old) = &ctx.fields_old {
                    self.cache.evict(old).await?;
                }
                self.cache.put(&ctx.fields).await
            }
            MutationKind::Delete => {
                let old = ctx.fields_old.as_ref().unwrap_or(&ctx.fields);
                self.cache.evict(old).await
            }
        }
    }

    async fn post_notification(
        &self,
        request: &MutationRequest,
        ctx: &MutationContext,
    ) -> Result<(), PipelineError> {
        if request.actor.is_system()
            || request.procedure.ignore_notification
            || !self.schema(&ctx.category)?.notification
        {
            return Ok(());
        }
        let notification = build_notification(request, ctx, self.config.source.clone());
        self.notifier.post(&notification).await
    }

    /// Run a read request: point lookup, scan, label scan, or page.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResult, PipelineError> {
        let category = &request.category;
        self.schema(category)?;

        if let Some(uuid) = &request.uuid {
            let rows = self.graph.execute(&builder::node_by_id(category, uuid)?).await?;
            let item = match rows.first().and_then(node_from_row) {
                Some(item) => {
                    let mut item =
                        transform::to_structured_form(self.registry.as_ref(), category, &item);
                    if request.resolve_references {
                        self.expand_references(category, &mut item).await?;
                    }
                    Some(item)
                }
                None => None,
            };
            return Ok(QueryResult::One(item));
        }

        if let Some(labels) = &request.labels {
            let rows = self.graph.execute(&builder::nodes_by_labels(labels)?).await?;
            return Ok(QueryResult::Many(self.structure_rows(category, &rows)));
        }

        let options = ScanOptions {
            status_filter: request.status_filter.clone(),
            sort: request.sort.clone(),
            ascending: request.ascending,
        };
        if let Some(page) = request.page {
            let per_page = request.per_page.unwrap_or(self.config.per_page);
            let skip = page.saturating_sub(1) * per_page;
            let statement = builder::nodes_paginated(category, &options, skip, per_page)?;
            let rows = self.graph.execute(&statement).await?;
            let record = rows.first().and_then(Value::as_object);
            let count = record
                .and_then(|r| r.get("count"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let results = record
                .and_then(|r| r.get("results"))
                .and_then(Value::as_array)
                .map(|items| self.structure_rows(category, items))
                .unwrap_or_default();
            return Ok(QueryResult::Page { count, results });
        }

        let rows = self.graph.execute(&builder::nodes(category, &options)?).await?;
        Ok(QueryResult::Many(self.structure_rows(category, &rows)))
    }

    fn structure_rows(&self, fallback_category: &str, rows: &[Value]) -> Vec<FieldMap> {
        rows.iter()
            .filter_map(node_from_row)
            .map(|item| {
                let category = field::as_str(&item, reserved::CATEGORY)
                    .unwrap_or(fallback_category)
                    .to_owned();
                transform::to_structured_form(self.registry.as_ref(), &category, &item)
            })
            .collect()
    }

    /// Replace top-level reference ids with the referenced records.
    async fn expand_references(
        &self,
        category: &str,
        item: &mut FieldMap,
    ) -> Result<(), PipelineError> {
        let assembler = self.assembler();
        for descriptor in self.registry.references(category) {
            let root = match &descriptor.path {
                RefPath::Field(field) => field.clone(),
                // nested references stay as ids; their records are not
                // addressable without reshaping the payload
                _ => continue,
            };
            let ids = descriptor.path.reference_ids(item);
            if ids.is_empty() {
                continue;
            }
            let mut records = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(record) = assembler
                    .lookup_item(&descriptor.target_category, id)
                    .await?
                {
                    records.push(Value::Object(record));
                }
            }
            if records.len() != ids.len() {
                continue;
            }
            let expanded = match item.get(&root) {
                Some(Value::Array(_)) => Value::Array(records),
                _ => match records.into_iter().next() {
                    Some(record) => record,
                    None => continue,
                },
            };
            item.insert(root, expanded);
        }
        Ok(())
    }

    /// An item with its member tree, following reverse `MemberOf` edges up
    /// to the configured depth. Cycles terminate via the visited set.
    pub async fn item_with_members(
        &self,
        category: &str,
        uuid: &str,
    ) -> Result<Option<Value>, PipelineError> {
        self.schema(category)?;
        let mut visited = HashSet::new();
        self.expand_members(category.to_owned(), uuid.to_owned(), 0, &mut visited)
            .await
    }

    fn expand_members<'a>(
        &'a self,
        category: String,
        uuid: String,
        depth: usize,
        visited: &'a mut HashSet<String>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Value>, PipelineError>> + Send + 'a>> {
        Box::pin(async move {
            if !visited.insert(uuid.clone()) {
                return Ok(None);
            }
            let statement = builder::item_with_members(&category, &uuid)?;
            let rows = self.graph.execute(&statement).await?;
            let record = match rows.first().and_then(member_row) {
                Some(record) => record,
                None => return Ok(None),
            };
            let (node, members) = record;
            let mut out =
                transform::to_structured_form(self.registry.as_ref(), &category, &node);

            let mut children = Vec::new();
            for member in members {
                let member_category = match field::as_str(&member, reserved::CATEGORY) {
                    Some(category) => category.to_owned(),
                    None => continue,
                };
                let member_uuid = match field::as_str(&member, reserved::UUID) {
                    Some(uuid) => uuid.to_owned(),
                    None => continue,
                };
                if depth + 1 >= self.config.member_depth_limit {
                    children.push(Value::Object(transform::to_structured_form(
                        self.registry.as_ref(),
                        &member_category,
                        &member,
                    )));
                    continue;
                }
                if let Some(child) = self
                    .expand_members(member_category, member_uuid, depth + 1, visited)
                    .await?
                {
                    children.push(child);
                }
            }
            out.insert("members".into(), Value::Array(children));
            Ok(Some(Value::Object(out)))
        })
    }

    /// Wipe whole categories: graph nodes, their search indices, and the
    /// entire cache.
    pub async fn purge(&self, categories: &[String]) -> Result<(), PipelineError> {
        self.cache.flush_all().await?;
        let mut purged_indices = HashSet::new();
        for category in categories {
            let schema = self.schema(category)?;
            let index = schema.search.as_ref().map(|s| s.index.clone());
            self.graph.execute(&builder::purge_category(category)?).await?;
            if let Some(index) = index {
                if purged_indices.insert(index.clone()) {
                    self.search.purge(&index).await?;
                }
            }
        }
        Ok(())
    }

    /// Pre-allocate identifiers for clients that assemble payloads offline.
    pub fn generate_ids(&self, count: usize) -> Vec<String> {
        (0..count).map(|_| Uuid::new_v4().to_string()).collect()
    }

    /// Record a subtype edge between category label nodes.
    pub async fn add_subtype_link(&self, base: &str, subtype: &str) -> Result<(), PipelineError> {
        self.schema(base)?;
        self.schema(subtype)?;
        self.graph.execute(&builder::inherit_link(base, subtype)).await?;
        Ok(())
    }

    /// All transitive subtypes of a category, breadth first.
    pub async fn subtype_hierarchy(&self, category: &str) -> Result<Vec<String>, PipelineError> {
        let mut seen = HashSet::new();
        let mut queue = vec![category.to_owned()];
        let mut out = Vec::new();
        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let rows = self.graph.execute(&builder::subtypes_of(&current)).await?;
            for row in &rows {
                if let Some(child) = node_from_row(row)
                    .and_then(|n| field::as_str(&n, reserved::CATEGORY).map(str::to_owned))
                {
                    out.push(child.clone());
                    queue.push(child);
                }
            }
        }
        Ok(out)
    }

    /// The effective schema of a category: own and inherited fields.
    pub fn describe_category(&self, category: &str) -> Result<Value, PipelineError> {
        let schema = self.schema(category)?;
        Ok(json!({
            "category": schema.id,
            "ancestors": self.registry.ancestors(category),
            "schema": schema,
            "references": self.registry.references(category),
        }))
    }
}

/// Split a delete-guard row into the node itself and its connected items.
pub(crate) fn delete_guard_row(row: &Value) -> Option<(FieldMap, Vec<FieldMap>)> {
    let record = row.as_object()?;
    let node = record.get("self").and_then(Value::as_object)?.clone();
    let related = record
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    Some((node, related))
}

/// Split a member-expansion row into the node and its direct members.
fn member_row(row: &Value) -> Option<(FieldMap, Vec<FieldMap>)> {
    let record = row.as_object()?;
    let record = match record.get("item").and_then(Value::as_object) {
        Some(inner) => inner,
        None => record,
    };
    let node = record.get("self").and_then(Value::as_object)?.clone();
    let members = record
        .get("members")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    Some((node, members))
}

fn build_notification(
    request: &MutationRequest,
    ctx: &MutationContext,
    source: Option<String>,
) -> Notification {
    let (action, new, old, update) = match ctx.kind {
        MutationKind::Create => (
            NotificationAction::Create,
            Some(ctx.fields.clone()),
            None,
            None,
        ),
        MutationKind::Update => (
            NotificationAction::Update,
            Some(ctx.fields.clone()),
            ctx.fields_old.clone(),
            ctx.change.clone(),
        ),
        MutationKind::Delete => (
            NotificationAction::Delete,
            None,
            ctx.fields_old.clone(),
            None,
        ),
    };
    Notification {
        category: ctx.category.clone(),
        action,
        user: request.actor.id.clone(),
        source,
        new,
        old,
        update,
        routing: request.subscriber.clone(),
    }
}
