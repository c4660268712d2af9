use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::field::{is_empty_value, FieldMap};

/// Error from parsing a reference attribute path.
#[derive(Debug, thiserror::Error)]
pub enum RefPathError {
    #[error("reference path '{path}' has depth {depth}, only 1-3 segments are supported")]
    UnsupportedDepth { path: String, depth: usize },

    #[error("reference path is empty")]
    Empty,
}

/// Where a reference value lives inside an item payload.
///
/// Depth 1 is a plain field, depth 2 a field of a nested object, depth 3 a
/// field of each element of an array of objects. Deeper paths are rejected
/// at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefPath {
    /// `field` — the value is the referenced id (or an array of ids).
    Field(String),
    /// `object.field` — the id is nested one object deep.
    Nested { object: String, field: String },
    /// `array.element.field` — the id sits on each element of an array.
    ArrayElement {
        array: String,
        element: String,
        field: String,
    },
}

impl RefPath {
    /// Parse a dotted attribute path.
    pub fn parse(path: &str) -> Result<Self, RefPathError> {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] => Err(RefPathError::Empty),
            [f] => Ok(RefPath::Field((*f).into())),
            [o, f] => Ok(RefPath::Nested {
                object: (*o).into(),
                field: (*f).into(),
            }),
            [a, e, f] => Ok(RefPath::ArrayElement {
                array: (*a).into(),
                element: (*e).into(),
                field: (*f).into(),
            }),
            more => Err(RefPathError::UnsupportedDepth {
                path: path.into(),
                depth: more.len(),
            }),
        }
    }

    /// The path with dots flattened to underscores, used to name derived
    /// `<path>_name` display fields.
    pub fn flat_name(&self) -> String {
        match self {
            RefPath::Field(f) => f.clone(),
            RefPath::Nested { object, field } => format!("{object}_{field}"),
            RefPath::ArrayElement {
                array,
                element,
                field,
            } => format!("{array}_{element}_{field}"),
        }
    }

    /// The top-level payload field this path roots at.
    pub fn root(&self) -> &str {
        match self {
            RefPath::Field(f) => f,
            RefPath::Nested { object, .. } => object,
            RefPath::ArrayElement { array, .. } => array,
        }
    }

    /// Whether the payload carries a usable value for this path.
    pub fn is_populated(&self, fields: &FieldMap) -> bool {
        fields
            .get(self.root())
            .map(|v| !is_empty_value(v))
            .unwrap_or(false)
    }

    /// Collect the referenced id strings present in the payload.
    pub fn reference_ids(&self, fields: &FieldMap) -> Vec<String> {
        match self {
            RefPath::Field(f) => match fields.get(f) {
                Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect(),
                _ => Vec::new(),
            },
            RefPath::Nested { object, field } => fields
                .get(object)
                .and_then(Value::as_object)
                .and_then(|o| o.get(field))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(|s| vec![s.to_owned()])
                .unwrap_or_default(),
            RefPath::ArrayElement { array, field, .. } => fields
                .get(array)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_object)
                        .filter_map(|o| o.get(field))
                        .filter_map(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// Scalar or array reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    Scalar,
    Array,
}

/// The graph edge a reference maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Edge type name, e.g. `RUNS_ON`.
    pub name: String,
    /// Edge points from the referenced node back at this one.
    #[serde(default)]
    pub reverse: bool,
    /// Copy the sibling fields of the referencing object onto the edge.
    #[serde(default)]
    pub payload_as_edge_props: bool,
}

impl Relationship {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reverse: false,
            payload_as_edge_props: false,
        }
    }
}

/// Schema declaration of a relationship-bearing field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    pub path: RefPath,
    pub target_category: String,
    pub cardinality: Cardinality,
    pub relationship: Relationship,
}

impl ReferenceDescriptor {
    pub fn scalar(
        path: &str,
        target_category: impl Into<String>,
        relationship: Relationship,
    ) -> Result<Self, RefPathError> {
        Ok(Self {
            path: RefPath::parse(path)?,
            target_category: target_category.into(),
            cardinality: Cardinality::Scalar,
            relationship,
        })
    }

    pub fn array(
        path: &str,
        target_category: impl Into<String>,
        relationship: Relationship,
    ) -> Result<Self, RefPathError> {
        Ok(Self {
            path: RefPath::parse(path)?,
            target_category: target_category.into(),
            cardinality: Cardinality::Array,
            relationship,
        })
    }
}
