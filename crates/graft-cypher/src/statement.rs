use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use graft_core::PipelineError;

/// Error from assembling a statement.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("'{0}' is not a valid graph identifier")]
    InvalidIdentifier(String),

    #[error("node statement requires at least one label")]
    EmptyLabels,

    #[error("payload promotion requires a nested reference path: {0}")]
    PayloadPromotionUnsupported(String),

    #[error(transparent)]
    RefPath(#[from] graft_core::RefPathError),
}

impl From<BuildError> for PipelineError {
    fn from(err: BuildError) -> Self {
        PipelineError::Statement(err.to_string())
    }
}

/// A parameterized graph-query statement.
///
/// Payload values only ever travel through `params`; the statement text
/// interpolates nothing but identifiers that passed [`validate_identifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub text: String,
    pub params: Map<String, Value>,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Map::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Accept only `[A-Za-z_][A-Za-z0-9_]*` where an identifier (label,
/// relationship type, property name) must be spliced into statement text.
pub fn validate_identifier(ident: &str) -> Result<&str, BuildError> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(ident)
    } else {
        Err(BuildError::InvalidIdentifier(ident.to_owned()))
    }
}

/// Join a label set into a `:`-separated clause, validating each label.
pub fn label_clause(labels: &[String]) -> Result<String, BuildError> {
    if labels.is_empty() {
        return Err(BuildError::EmptyLabels);
    }
    let mut validated = Vec::with_capacity(labels.len());
    for label in labels {
        validated.push(validate_identifier(label)?);
    }
    Ok(validated.join(":"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identifier_validation() {
        assert!(validate_identifier("PhysicalServer").is_ok());
        assert!(validate_identifier("_internal").is_ok());
        assert!(validate_identifier("RUNS_ON2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("9lives").is_err());
        assert!(validate_identifier("a b").is_err());
        assert!(validate_identifier("n) DETACH DELETE (m").is_err());
    }

    #[test]
    fn label_clause_joins_and_validates() {
        let labels = vec!["PhysicalServer".to_owned(), "Server".to_owned()];
        assert_eq!(label_clause(&labels).unwrap(), "PhysicalServer:Server");
        assert!(matches!(label_clause(&[]), Err(BuildError::EmptyLabels)));
        let bad = vec!["Server".to_owned(), "bad label".to_owned()];
        assert!(matches!(
            label_clause(&bad),
            Err(BuildError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn statement_params_accumulate() {
        let s = Statement::new("RETURN $a, $b")
            .param("a", 1)
            .param("b", json!({"k": "v"}));
        assert_eq!(s.params["a"], json!(1));
        assert_eq!(s.params["b"], json!({"k": "v"}));
    }
}
