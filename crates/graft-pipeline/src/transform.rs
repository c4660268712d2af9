//! Field assignment between wire payloads and graph-ready snapshots.
//!
//! Graph properties are flat, so object-kind fields travel as JSON strings
//! on the node and are parsed back on read. Create and update assembly also
//! stamps identity and bookkeeping fields, resolves the unique name, and
//! validates declared references.

use serde_json::Value;
use uuid::Uuid;

use graft_core::field::{self, reserved, FieldMap};
use graft_core::reference::Cardinality;
use graft_core::registry::SchemaRegistry;
use graft_core::{PipelineError, Procedure};
use graft_cypher::builder;

use crate::config::PipelineConfig;
use crate::stores::{GraphStore, ItemCache};

/// Flatten object- and array-valued fields the schema declares as objects
/// into JSON strings for node storage.
pub fn to_storage_form(
    registry: &dyn SchemaRegistry,
    category: &str,
    fields: &FieldMap,
) -> Result<FieldMap, PipelineError> {
    let mut out = fields.clone();
    for name in registry.object_fields(category) {
        if let Some(value) = out.get(&name) {
            if value.is_object() || value.is_array() {
                let text = serde_json::to_string(value)
                    .map_err(|e| PipelineError::Statement(e.to_string()))?;
                out.insert(name, Value::String(text));
            }
        }
    }
    Ok(out)
}

/// Undo [`to_storage_form`]: parse stringified object fields back into
/// structure. Unparseable strings are left as they are.
pub fn to_structured_form(
    registry: &dyn SchemaRegistry,
    category: &str,
    fields: &FieldMap,
) -> FieldMap {
    let mut out = fields.clone();
    for name in registry.object_fields(category) {
        if let Some(Value::String(text)) = out.get(&name) {
            if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                out.insert(name, parsed);
            }
        }
    }
    out
}

/// Pull the node field map out of a result row. Stores return either the
/// bare property map or a single-column record wrapping it.
pub fn node_from_row(row: &Value) -> Option<FieldMap> {
    let object = row.as_object()?;
    if object.len() == 1 {
        if let Some(inner) = object.values().next().and_then(Value::as_object) {
            return Some(inner.clone());
        }
    }
    Some(object.clone())
}

/// Assembles the full field snapshot of a mutation before statements are
/// built from it.
pub struct FieldAssembler<'a> {
    registry: &'a dyn SchemaRegistry,
    graph: &'a dyn GraphStore,
    cache: &'a dyn ItemCache,
    config: &'a PipelineConfig,
}

impl<'a> FieldAssembler<'a> {
    pub fn new(
        registry: &'a dyn SchemaRegistry,
        graph: &'a dyn GraphStore,
        cache: &'a dyn ItemCache,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            registry,
            graph,
            cache,
            config,
        }
    }

    /// Build the snapshot for a create: identity, timestamps, sequence
    /// counter, unique name, and reference checks.
    pub async fn create_fields(
        &self,
        category: &str,
        payload: &FieldMap,
        procedure: &Procedure,
    ) -> Result<FieldMap, PipelineError> {
        let mut fields = payload.clone();
        fields.insert(reserved::CATEGORY.into(), Value::String(category.into()));
        if field::as_str(&fields, reserved::UUID).is_none() {
            fields.insert(
                reserved::UUID.into(),
                Value::String(Uuid::new_v4().to_string()),
            );
        }
        let now = field::now_millis();
        fields
            .entry(reserved::CREATED.to_owned())
            .or_insert_with(|| Value::from(now));
        fields.insert(reserved::LAST_UPDATED.into(), Value::from(now));

        self.assign_sequence(category, &mut fields).await?;
        self.assign_unique_name(category, &mut fields).await?;
        self.check_unique(category, &fields, procedure).await?;
        self.resolve_references(category, &mut fields).await?;
        Ok(fields)
    }

    /// Build the snapshot for an update by overlaying the change on the
    /// prior node, then re-deriving everything derived.
    pub async fn update_fields(
        &self,
        category: &str,
        uuid: &str,
        old: &FieldMap,
        change: &FieldMap,
        procedure: &Procedure,
    ) -> Result<FieldMap, PipelineError> {
        let mut base = to_structured_form(self.registry, category, old);
        // graph-internal node id, never part of the snapshot
        base.remove("id");

        let mut fields = field::merge(&base, change);
        fields.insert(reserved::CATEGORY.into(), Value::String(category.into()));
        fields.insert(reserved::UUID.into(), Value::String(uuid.into()));
        if !change.contains_key(reserved::LAST_UPDATED) {
            fields.insert(
                reserved::LAST_UPDATED.into(),
                Value::from(field::now_millis()),
            );
        }

        self.assign_unique_name(category, &mut fields).await?;
        self.check_unique(category, &fields, procedure).await?;
        self.resolve_references(category, &mut fields).await?;
        Ok(fields)
    }

    /// Fill the declared sequence field from the per-category counter,
    /// unless the payload already carries a value.
    async fn assign_sequence(
        &self,
        category: &str,
        fields: &mut FieldMap,
    ) -> Result<(), PipelineError> {
        let seq_field = match self
            .registry
            .schema(category)
            .and_then(|s| s.dynamic_seq_field.clone())
        {
            Some(name) => name,
            None => return Ok(()),
        };
        if fields.get(&seq_field).map(field::is_empty_value) == Some(false) {
            return Ok(());
        }
        let rows = self.graph.execute(&builder::sequence_next(category)).await?;
        let seq = rows
            .first()
            .and_then(sequence_value)
            .ok_or_else(|| PipelineError::Graph("sequence counter returned no value".into()))?;
        fields.insert(seq_field, Value::String(seq));
        Ok(())
    }

    /// Derive `unique_name` from the single unique key, or from the ordered
    /// compound keys with reference components resolved to the referenced
    /// record's name. Missing components are skipped.
    async fn assign_unique_name(
        &self,
        category: &str,
        fields: &mut FieldMap,
    ) -> Result<(), PipelineError> {
        let schema = match self.registry.schema(category) {
            Some(schema) => schema,
            None => return Err(PipelineError::UnknownCategory(category.into())),
        };

        if let Some(key) = schema.unique_keys.first() {
            if let Some(value) = field::as_str(fields, key) {
                let value = value.to_owned();
                fields.insert(reserved::UNIQUE_NAME.into(), Value::String(value));
            }
            return Ok(());
        }

        if schema.compound_keys.is_empty() {
            return Ok(());
        }
        let compound_keys = schema.compound_keys.clone();
        let mut parts = Vec::new();
        for key in &compound_keys {
            if key == reserved::NAME {
                if let Some(name) = field::as_str(fields, reserved::NAME) {
                    parts.push(name.to_owned());
                }
                continue;
            }
            let id = match field::as_str(fields, key) {
                Some(id) if !id.is_empty() => id.to_owned(),
                _ => continue,
            };
            let target = self.compound_target_category(category, key);
            if let Some(record) = self.lookup_item(&target, &id).await? {
                if let Some(name) = field::as_str(&record, reserved::NAME) {
                    parts.push(name.to_owned());
                }
            }
        }
        if !parts.is_empty() {
            fields.insert(
                reserved::UNIQUE_NAME.into(),
                Value::String(parts.join(&self.config.compound_key_separator)),
            );
        }
        Ok(())
    }

    /// Category a compound-key component refers to: the declared reference
    /// target when one matches, else the capitalized field name.
    fn compound_target_category(&self, category: &str, key: &str) -> String {
        self.registry
            .references(category)
            .into_iter()
            .find(|d| d.path.flat_name() == key)
            .map(|d| d.target_category)
            .unwrap_or_else(|| capitalize(key))
    }

    /// Reject a snapshot whose unique name is already taken by a different
    /// item of the same category.
    async fn check_unique(
        &self,
        category: &str,
        fields: &FieldMap,
        procedure: &Procedure,
    ) -> Result<(), PipelineError> {
        if procedure.ignore_unique_check {
            return Ok(());
        }
        let unique_name = match field::as_str(fields, reserved::UNIQUE_NAME) {
            Some(name) => name,
            None => return Ok(()),
        };
        if let Some(existing) = self.cache.get_by_unique_name(category, unique_name).await? {
            if field::as_str(&existing, reserved::UUID) != field::as_str(fields, reserved::UUID) {
                return Err(PipelineError::DuplicateName {
                    category: category.into(),
                    name: unique_name.into(),
                });
            }
        }
        Ok(())
    }

    /// Verify every id a declared reference carries, and denormalize the
    /// referenced record's name into a sibling `<field>_name` field.
    async fn resolve_references(
        &self,
        category: &str,
        fields: &mut FieldMap,
    ) -> Result<(), PipelineError> {
        for descriptor in self.registry.references(category) {
            let ids = descriptor.path.reference_ids(fields);
            if ids.is_empty() {
                continue;
            }
            let mut names = Vec::with_capacity(ids.len());
            for id in &ids {
                let record = self
                    .lookup_item(&descriptor.target_category, id)
                    .await?
                    .ok_or_else(|| PipelineError::DanglingReference {
                        category: descriptor.target_category.clone(),
                        id: id.clone(),
                    })?;
                if let Some(name) = field::as_str(&record, reserved::NAME) {
                    names.push(name.to_owned());
                }
            }
            if self.config.add_ref_name_field && names.len() == ids.len() {
                let display = match descriptor.cardinality {
                    Cardinality::Scalar => names.into_iter().next().map(Value::String),
                    Cardinality::Array => Some(Value::from(names)),
                };
                if let Some(display) = display {
                    fields.insert(format!("{}_name", descriptor.path.flat_name()), display);
                }
            }
        }
        Ok(())
    }

    /// Read-through item lookup: cache first, then the graph (populating
    /// the cache on a hit).
    pub(crate) async fn lookup_item(
        &self,
        category: &str,
        uuid: &str,
    ) -> Result<Option<FieldMap>, PipelineError> {
        if let Some(record) = self.cache.get(category, uuid).await? {
            return Ok(Some(record));
        }
        let statement = builder::node_by_id(category, uuid)?;
        let rows = self.graph.execute(&statement).await?;
        let record = match rows.first().and_then(node_from_row) {
            Some(record) => record,
            None => return Ok(None),
        };
        // records without identity fields are still valid lookup hits
        let _ = self.cache.put(&record).await;
        Ok(Some(record))
    }
}

/// The counter value out of a `sequence_next` row, normalized to a string.
fn sequence_value(row: &Value) -> Option<String> {
    let value = match row {
        Value::Object(record) => record.get("seq").or_else(|| record.values().next())?,
        other => other,
    };
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
