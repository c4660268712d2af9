use serde::{Deserialize, Serialize};

use crate::reference::ReferenceDescriptor;

/// Supported field kinds for category schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    String,
    Int,
    Float,
    Bool,
    /// Epoch-millisecond integer or ISO string.
    Timestamp,
    StringArray,
    /// Structured value, flattened to a JSON string for graph storage.
    Object,
    /// Id (or id array) of another category's item.
    Reference,
}

/// A field declaration within a category schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }

    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }
}

/// Full-text index settings for a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Index name documents of this category go to.
    pub index: String,
    /// Allow create-on-update upserts.
    #[serde(default)]
    pub upsert: bool,
}

/// A named node type. Immutable after registration with the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySchema {
    pub id: String,
    /// Parent category; the transitive chain forms the node's label set.
    pub parent: Option<String>,
    pub fields: Vec<FieldDef>,
    /// Single declared unique key field (first entry wins, as upstream).
    #[serde(default)]
    pub unique_keys: Vec<String>,
    /// Ordered compound-key components; non-`name` entries hold reference
    /// ids resolved to the referenced record's name.
    #[serde(default)]
    pub compound_keys: Vec<String>,
    /// Field receiving the per-category sequence counter value on create.
    #[serde(default)]
    pub dynamic_seq_field: Option<String>,
    #[serde(default)]
    pub search: Option<SearchConfig>,
    /// Whether mutations of this category post notifications.
    #[serde(default)]
    pub notification: bool,
    #[serde(default)]
    pub references: Vec<ReferenceDescriptor>,
}

impl CategorySchema {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent: None,
            fields: Vec::new(),
            unique_keys: Vec::new(),
            compound_keys: Vec::new(),
            dynamic_seq_field: None,
            search: None,
            notification: false,
            references: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_fields(mut self, fields: Vec<FieldDef>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_unique_key(mut self, key: impl Into<String>) -> Self {
        self.unique_keys.push(key.into());
        self
    }

    pub fn with_compound_keys(mut self, keys: Vec<String>) -> Self {
        self.compound_keys = keys;
        self
    }

    pub fn with_sequence_field(mut self, field: impl Into<String>) -> Self {
        self.dynamic_seq_field = Some(field.into());
        self
    }

    pub fn with_search(mut self, index: impl Into<String>, upsert: bool) -> Self {
        self.search = Some(SearchConfig {
            index: index.into(),
            upsert,
        });
        self
    }

    pub fn with_notification(mut self) -> Self {
        self.notification = true;
        self
    }

    pub fn with_references(mut self, references: Vec<ReferenceDescriptor>) -> Self {
        self.references = references;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Relationship;

    #[test]
    fn schema_serde_round_trip() {
        let schema = CategorySchema::new("PhysicalServer")
            .with_parent("Server")
            .with_fields(vec![
                FieldDef::required("name", FieldKind::String),
                FieldDef::new("model", FieldKind::String),
                FieldDef::new("ip_address", FieldKind::StringArray),
                FieldDef::new("position", FieldKind::Object),
            ])
            .with_unique_key("name")
            .with_search("cmdb", false)
            .with_notification()
            .with_references(vec![ReferenceDescriptor::scalar(
                "operating_system",
                "Software",
                Relationship::new("RUNS"),
            )
            .unwrap()]);
        let json = serde_json::to_string_pretty(&schema).unwrap();
        let back: CategorySchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, back);
    }

    #[test]
    fn builder_defaults() {
        let schema = CategorySchema::new("Software");
        assert!(schema.parent.is_none());
        assert!(schema.search.is_none());
        assert!(!schema.notification);
        assert!(schema.references.is_empty());
    }
}
