use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::field::FieldMap;
use crate::reference::ReferenceDescriptor;
use crate::schema::{CategorySchema, FieldDef, FieldKind};

/// Error from the schema registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("category already registered: {0}")]
    AlreadyRegistered(String),

    #[error("category not found: {0}")]
    NotFound(String),

    #[error("duplicate field name '{field}' in category '{category}'")]
    DuplicateField { category: String, field: String },
}

/// Validation error for a payload against its category schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "field '{}': {}", self.field, self.message)
    }
}

/// Resolves category metadata for the pipeline. The registry is externally
/// owned and thread-safe; the pipeline only reads from it.
pub trait SchemaRegistry: Send + Sync {
    /// Schema for a category, if registered.
    fn schema(&self, category: &str) -> Option<&CategorySchema>;

    /// The category's ancestor chain, leaf first. Doubles as the node label
    /// set for this category.
    fn ancestors(&self, category: &str) -> Vec<String>;

    /// Validate a payload against the category's declared fields
    /// (including inherited ones).
    fn validate(&self, category: &str, fields: &FieldMap) -> Result<(), Vec<ValidationError>>;

    /// Reference descriptors declared on the category or its ancestors.
    fn references(&self, category: &str) -> Vec<ReferenceDescriptor> {
        let mut out = Vec::new();
        for ancestor in self.ancestors(category) {
            if let Some(schema) = self.schema(&ancestor) {
                out.extend(schema.references.iter().cloned());
            }
        }
        out
    }

    /// Names of object-kind fields, which are serialized to strings for
    /// graph storage.
    fn object_fields(&self, category: &str) -> Vec<String> {
        let mut out = Vec::new();
        for ancestor in self.ancestors(category) {
            if let Some(schema) = self.schema(&ancestor) {
                for field in &schema.fields {
                    if field.kind == FieldKind::Object && !out.contains(&field.name) {
                        out.push(field.name.clone());
                    }
                }
            }
        }
        out
    }
}

/// In-memory registry with parent-chain resolution.
#[derive(Default)]
pub struct MemoryRegistry {
    schemas: HashMap<String, CategorySchema>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema. Fails on a duplicate category id or duplicate
    /// field names within the schema.
    pub fn register(&mut self, schema: CategorySchema) -> Result<(), RegistryError> {
        if self.schemas.contains_key(&schema.id) {
            return Err(RegistryError::AlreadyRegistered(schema.id.clone()));
        }
        let mut seen = HashSet::new();
        for field in &schema.fields {
            if !seen.insert(&field.name) {
                return Err(RegistryError::DuplicateField {
                    category: schema.id.clone(),
                    field: field.name.clone(),
                });
            }
        }
        self.schemas.insert(schema.id.clone(), schema);
        Ok(())
    }

    pub fn list(&self) -> Vec<&CategorySchema> {
        self.schemas.values().collect()
    }

    /// All field definitions for a category, inherited fields included.
    /// Own fields override same-named inherited ones.
    fn collect_fields(&self, category: &str) -> Vec<FieldDef> {
        let mut fields: Vec<FieldDef> = Vec::new();
        let mut chain = self.ancestors(category);
        chain.reverse(); // root first so leaf definitions override
        for ancestor in chain {
            if let Some(schema) = self.schemas.get(&ancestor) {
                for field in &schema.fields {
                    if let Some(pos) = fields.iter().position(|f| f.name == field.name) {
                        fields[pos] = field.clone();
                    } else {
                        fields.push(field.clone());
                    }
                }
            }
        }
        fields
    }
}

impl SchemaRegistry for MemoryRegistry {
    fn schema(&self, category: &str) -> Option<&CategorySchema> {
        self.schemas.get(category)
    }

    fn ancestors(&self, category: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(category.to_owned());
        while let Some(id) = current {
            if chain.contains(&id) {
                break; // defensive against parent cycles
            }
            current = self.schemas.get(&id).and_then(|s| s.parent.clone());
            chain.push(id);
        }
        chain
    }

    fn validate(&self, category: &str, fields: &FieldMap) -> Result<(), Vec<ValidationError>> {
        if !self.schemas.contains_key(category) {
            return Err(vec![ValidationError {
                field: "category".into(),
                message: format!("unknown category: '{category}'"),
            }]);
        }

        let mut errors = Vec::new();
        for field_def in self.collect_fields(category) {
            match fields.get(&field_def.name) {
                None => {
                    if field_def.required {
                        errors.push(ValidationError {
                            field: field_def.name.clone(),
                            message: "required field missing".into(),
                        });
                    }
                }
                Some(value) => {
                    if !matches!(value, Value::Null) && !kind_matches(field_def.kind, value) {
                        errors.push(ValidationError {
                            field: field_def.name.clone(),
                            message: format!(
                                "expected {:?}, got {}",
                                field_def.kind,
                                value_type_name(value)
                            ),
                        });
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Check if a JSON value matches the declared field kind.
fn kind_matches(expected: FieldKind, value: &Value) -> bool {
    match (expected, value) {
        (FieldKind::String, Value::String(_)) => true,
        (FieldKind::Int, Value::Number(n)) => n.is_i64() || n.is_u64(),
        (FieldKind::Float, Value::Number(_)) => true,
        (FieldKind::Bool, Value::Bool(_)) => true,
        // Timestamps arrive as epoch millis or ISO strings
        (FieldKind::Timestamp, Value::Number(n)) => n.is_i64() || n.is_u64(),
        (FieldKind::Timestamp, Value::String(s)) => !s.is_empty(),
        (FieldKind::StringArray, Value::Array(_)) => true,
        (FieldKind::Object, Value::Object(_)) => true,
        // Object fields already flattened for storage pass as strings
        (FieldKind::Object, Value::String(_)) => true,
        (FieldKind::Reference, Value::String(_)) => true,
        (FieldKind::Reference, Value::Array(_)) => true,
        (FieldKind::Reference, Value::Object(_)) => true,
        _ => false,
    }
}

/// Human-readable name for a JSON value variant.
fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
