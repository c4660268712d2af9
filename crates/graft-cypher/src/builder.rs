//! Builders for every statement shape the mutation pipeline emits.
//!
//! Labels, relationship types, and property names are spliced into the
//! statement text after identifier validation; every payload value travels
//! as a named parameter.

use serde_json::Value;

use graft_core::field::{reserved, string_list, FieldMap};
use graft_core::reference::{Cardinality, RefPath, ReferenceDescriptor};

use crate::statement::{label_clause, validate_identifier, BuildError, Statement};

/// Node label set: the category's ancestor chain plus any ad hoc tags on
/// the payload. Ancestor-scoped queries transparently include subtypes.
pub fn node_labels(ancestors: &[String], fields: &FieldMap) -> Vec<String> {
    let mut labels: Vec<String> = ancestors.to_vec();
    for tag in string_list(fields, reserved::TAGS) {
        if !labels.contains(&tag) {
            labels.push(tag);
        }
    }
    labels
}

/// Merge-by-identifier node upsert. Repeating it with the same identifier
/// and fields yields the same node state as a single execution.
pub fn merge_node(
    labels: &[String],
    uuid: &str,
    stringified_fields: &FieldMap,
) -> Result<Statement, BuildError> {
    let labels = label_clause(labels)?;
    Ok(Statement::new(format!(
        "MERGE (n:{labels} {{uuid: $uuid}}) \
         ON CREATE SET n = $fields \
         ON MATCH SET n = $fields"
    ))
    .param("uuid", uuid)
    .param("fields", Value::Object(stringified_fields.clone())))
}

/// Edge merge for one reference descriptor, or `None` when the payload
/// carries no value for it (no null edges are created).
pub fn relationship_merge(
    category: &str,
    descriptor: &ReferenceDescriptor,
    uuid: &str,
    fields: &FieldMap,
) -> Result<Option<Statement>, BuildError> {
    if !descriptor.path.is_populated(fields) {
        return Ok(None);
    }
    let source = validate_identifier(category)?;
    let target = validate_identifier(&descriptor.target_category)?;
    let rel_type = validate_identifier(&descriptor.relationship.name)?;

    let merge_clause = if descriptor.relationship.reverse {
        format!("MERGE (node)<-[r:{rel_type}]-(ref_node)")
    } else {
        format!("MERGE (node)-[r:{rel_type}]->(ref_node)")
    };

    let statement = match &descriptor.path {
        RefPath::Field(field) => {
            let ids = descriptor.path.reference_ids(fields);
            if ids.is_empty() {
                return Ok(None);
            }
            if descriptor.relationship.payload_as_edge_props {
                return Err(BuildError::PayloadPromotionUnsupported(field.clone()));
            }
            if descriptor.cardinality == Cardinality::Array || ids.len() > 1 {
                Statement::new(format!(
                    "UNWIND $ref_ids AS ref_id \
                     MATCH (node:{source} {{uuid: $uuid}}) \
                     MATCH (ref_node:{target} {{uuid: ref_id}}) \
                     {merge_clause}"
                ))
                .param("uuid", uuid)
                .param("ref_ids", ids)
            } else {
                Statement::new(format!(
                    "MATCH (node:{source} {{uuid: $uuid}}) \
                     MATCH (ref_node:{target} {{uuid: $ref_id}}) \
                     {merge_clause}"
                ))
                .param("uuid", uuid)
                .param("ref_id", ids[0].clone())
            }
        }
        RefPath::Nested { object, .. } => {
            let ids = descriptor.path.reference_ids(fields);
            if ids.is_empty() {
                return Ok(None);
            }
            let mut statement = Statement::new(format!(
                "MATCH (node:{source} {{uuid: $uuid}}) \
                 MATCH (ref_node:{target} {{uuid: $ref_id}}) \
                 {merge_clause}"
            ))
            .param("uuid", uuid)
            .param("ref_id", ids[0].clone());
            if descriptor.relationship.payload_as_edge_props {
                statement.text.push_str(
                    " ON CREATE SET r = $edge_props \
                     ON MATCH SET r = $edge_props",
                );
                let props = fields.get(object).cloned().unwrap_or(Value::Null);
                statement = statement.param("edge_props", props);
            }
            statement
        }
        RefPath::ArrayElement { array, field, .. } => {
            let id_field = validate_identifier(field)?;
            let items = match fields.get(array) {
                Some(Value::Array(items)) if !items.is_empty() => items.clone(),
                _ => return Ok(None),
            };
            let mut statement = Statement::new(format!(
                "UNWIND $ref_items AS ref_item \
                 MATCH (node:{source} {{uuid: $uuid}}) \
                 MATCH (ref_node:{target} {{uuid: ref_item.{id_field}}}) \
                 {merge_clause}"
            ))
            .param("uuid", uuid)
            .param("ref_items", items);
            if descriptor.relationship.payload_as_edge_props {
                statement.text.push_str(
                    " ON CREATE SET r = ref_item \
                     ON MATCH SET r = ref_item",
                );
            }
            statement
        }
    };
    Ok(Some(statement))
}

/// Remove every edge of the descriptor's relationship type incident to the
/// node. Update statement lists run these strictly before the re-merges so
/// stale edges never coexist with new ones.
pub fn relationship_delete(
    category: &str,
    descriptor: &ReferenceDescriptor,
    uuid: &str,
) -> Result<Statement, BuildError> {
    let source = validate_identifier(category)?;
    let rel_type = validate_identifier(&descriptor.relationship.name)?;
    Ok(Statement::new(format!(
        "MATCH (n:{source} {{uuid: $uuid}})-[r:{rel_type}]-() DELETE r"
    ))
    .param("uuid", uuid))
}

/// Statement list for a create: node upsert, then one edge merge per
/// populated reference descriptor.
pub fn build_create(
    labels: &[String],
    category: &str,
    references: &[ReferenceDescriptor],
    uuid: &str,
    fields: &FieldMap,
    stringified_fields: &FieldMap,
) -> Result<Vec<Statement>, BuildError> {
    let mut statements = vec![merge_node(labels, uuid, stringified_fields)?];
    for descriptor in references {
        if let Some(statement) = relationship_merge(category, descriptor, uuid, fields)? {
            statements.push(statement);
        }
    }
    Ok(statements)
}

/// Statement list for an update: node upsert, then for every descriptor
/// whose path appears in the change-set an edge removal followed by the
/// corresponding re-merge against the merged fields.
pub fn build_update(
    labels: &[String],
    category: &str,
    references: &[ReferenceDescriptor],
    uuid: &str,
    fields: &FieldMap,
    change: &FieldMap,
    stringified_fields: &FieldMap,
) -> Result<Vec<Statement>, BuildError> {
    let mut statements = vec![merge_node(labels, uuid, stringified_fields)?];
    for descriptor in references {
        if descriptor.path.is_populated(change) {
            statements.push(relationship_delete(category, descriptor, uuid)?);
        }
    }
    for descriptor in references {
        if let Some(statement) = relationship_merge(category, descriptor, uuid, fields)? {
            statements.push(statement);
        }
    }
    Ok(statements)
}

/// Detach-delete by identifier, returning the deleted node so the caller
/// can detect "not found" from an empty result.
pub fn build_delete(category: &str, uuid: &str) -> Result<Statement, BuildError> {
    let category = validate_identifier(category)?;
    Ok(Statement::new(format!(
        "MATCH (n:{category}) WHERE n.uuid = $uuid DETACH DELETE n RETURN n"
    ))
    .param("uuid", uuid))
}

/// Point query by identifier.
pub fn node_by_id(category: &str, uuid: &str) -> Result<Statement, BuildError> {
    let category = validate_identifier(category)?;
    Ok(Statement::new(format!(
        "MATCH (n:{category}) WHERE n.uuid = $uuid RETURN n"
    ))
    .param("uuid", uuid))
}

/// Node plus everything connected to it, used by the delete
/// reference-integrity guard.
pub fn node_with_relations(category: &str, uuid: &str) -> Result<Statement, BuildError> {
    let category = validate_identifier(category)?;
    Ok(Statement::new(format!(
        "MATCH (n:{category} {{uuid: $uuid}}) \
         OPTIONAL MATCH (n)-[]-(c) \
         WITH n AS self, collect(c) AS items \
         RETURN self, items"
    ))
    .param("uuid", uuid))
}

/// Scan options for list queries.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Status allow-list overriding the default "exclude soft-deleted"
    /// predicate.
    pub status_filter: Option<Vec<String>>,
    /// Sort field, default `lastUpdated`.
    pub sort: Option<String>,
    /// Ascending order; default is descending.
    pub ascending: bool,
}

fn scan_condition(options: &ScanOptions) -> &'static str {
    if options.status_filter.is_some() {
        "WHERE n.status IN $statuses"
    } else {
        "WHERE n.status IS NULL OR n.status <> 'deleted'"
    }
}

fn order_clause(options: &ScanOptions) -> Result<String, BuildError> {
    let sort = options.sort.as_deref().unwrap_or(reserved::LAST_UPDATED);
    let sort = validate_identifier(sort)?;
    let direction = if options.ascending { "ASC" } else { "DESC" };
    Ok(format!("ORDER BY n.{sort} {direction}"))
}

fn apply_status_param(statement: Statement, options: &ScanOptions) -> Statement {
    match &options.status_filter {
        Some(statuses) => statement.param("statuses", statuses.clone()),
        None => statement,
    }
}

/// Unfiltered or status-filtered scan of a category.
pub fn nodes(category: &str, options: &ScanOptions) -> Result<Statement, BuildError> {
    let category = validate_identifier(category)?;
    let condition = scan_condition(options);
    let order = order_clause(options)?;
    let statement = Statement::new(format!(
        "MATCH (n:{category}) {condition} RETURN n {order}"
    ));
    Ok(apply_status_param(statement, options))
}

/// Paginated scan: a count sub-statement and a collected result page,
/// combined into one `{count, results}` row.
pub fn nodes_paginated(
    category: &str,
    options: &ScanOptions,
    skip: u64,
    limit: u64,
) -> Result<Statement, BuildError> {
    let category = validate_identifier(category)?;
    let condition = scan_condition(options);
    let order = order_clause(options)?;
    let statement = Statement::new(format!(
        "MATCH (n:{category}) {condition} \
         WITH count(n) AS cnt \
         MATCH (n:{category}) {condition} \
         WITH n AS n, cnt {order} \
         SKIP $skip LIMIT $limit \
         RETURN {{count: cnt, results: collect(n)}}"
    ))
    .param("skip", skip)
    .param("limit", limit);
    Ok(apply_status_param(statement, options))
}

/// Non-deleted nodes carrying any of the given labels (tag/subcategory
/// queries).
pub fn nodes_by_labels(labels: &[String]) -> Result<Statement, BuildError> {
    if labels.is_empty() {
        return Err(BuildError::EmptyLabels);
    }
    let mut clauses = Vec::with_capacity(labels.len());
    for label in labels {
        clauses.push(format!("n:{}", validate_identifier(label)?));
    }
    let condition = clauses.join(" OR ");
    Ok(Statement::new(format!(
        "MATCH (n) WHERE (n.status IS NULL OR n.status <> 'deleted') AND ({condition}) RETURN n"
    )))
}

/// Atomic merge-and-increment of the category's sequence counter node,
/// returning the new value.
pub fn sequence_next(category: &str) -> Statement {
    Statement::new(
        "MERGE (s:Sequence {category: $category}) \
         ON CREATE SET s.current = 1 \
         ON MATCH SET s.current = s.current + 1 \
         WITH s.current AS seq RETURN seq",
    )
    .param("category", category)
}

/// An item and its non-deleted `MemberOf` children, one level deep.
pub fn item_with_members(category: &str, uuid: &str) -> Result<Statement, BuildError> {
    let category = validate_identifier(category)?;
    Ok(Statement::new(format!(
        "MATCH (n:{category} {{uuid: $uuid}}) \
         OPTIONAL MATCH (n)<-[:MemberOf]-(m) \
         WHERE m.status IS NULL OR m.status <> 'deleted' \
         WITH {{self: n, members: collect(DISTINCT m)}} AS item \
         RETURN item"
    ))
    .param("uuid", uuid))
}

/// One merge statement over a whole batch of serialized payloads.
pub fn batch_merge_nodes(labels: &[String], items: Vec<Value>) -> Result<Statement, BuildError> {
    let labels = label_clause(labels)?;
    Ok(Statement::new(format!(
        "UNWIND $items AS item \
         MERGE (n:{labels} {{uuid: item.uuid}}) \
         ON CREATE SET n = item \
         ON MATCH SET n = item"
    ))
    .param("items", items))
}

/// One detach-delete statement over a batch of identifiers.
pub fn batch_delete_nodes(category: &str, uuids: &[String]) -> Result<Statement, BuildError> {
    let category = validate_identifier(category)?;
    Ok(Statement::new(format!(
        "UNWIND $uuids AS uuid \
         MATCH (n:{category} {{uuid: uuid}}) \
         DETACH DELETE n"
    ))
    .param("uuids", uuids.to_vec()))
}

/// Partial-change fan-out: set the changed fields (and remove the dropped
/// ones) on every node in the identifier list.
pub fn batch_set_fields(
    category: &str,
    uuids: &[String],
    stringified_change: &FieldMap,
    removed: &[String],
) -> Result<Statement, BuildError> {
    let category = validate_identifier(category)?;
    let mut text = format!(
        "UNWIND $uuids AS uuid \
         MATCH (n:{category} {{uuid: uuid}}) \
         SET n += $change"
    );
    if !removed.is_empty() {
        let mut fields = Vec::with_capacity(removed.len());
        for name in removed {
            fields.push(format!("n.{}", validate_identifier(name)?));
        }
        text.push_str(" REMOVE ");
        text.push_str(&fields.join(", "));
    }
    Ok(Statement::new(text)
        .param("uuids", uuids.to_vec())
        .param("change", Value::Object(stringified_change.clone())))
}

/// Remove every node of a category, edges included.
pub fn purge_category(category: &str) -> Result<Statement, BuildError> {
    let category = validate_identifier(category)?;
    Ok(Statement::new(format!(
        "MATCH (n:{category}) DETACH DELETE n"
    )))
}

/// Record a subtype link between two category label nodes.
pub fn inherit_link(base: &str, subtype: &str) -> Statement {
    Statement::new(
        "MERGE (base:CategoryLabel {category: $category}) \
         MERGE (child:CategoryLabel {category: $subtype}) \
         MERGE (child)-[:INHERIT]->(base)",
    )
    .param("category", base)
    .param("subtype", subtype)
}

/// Direct subtypes of a category label node.
pub fn subtypes_of(category: &str) -> Statement {
    Statement::new(
        "MATCH (base:CategoryLabel {category: $category}) \
         MATCH (child)-[:INHERIT]->(base) \
         RETURN child",
    )
    .param("category", category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_core::reference::Relationship;
    use serde_json::json;

    fn fields(v: serde_json::Value) -> FieldMap {
        v.as_object().cloned().unwrap()
    }

    fn chain() -> Vec<String> {
        vec![
            "PhysicalServer".into(),
            "Server".into(),
            "ConfigurationItem".into(),
        ]
    }

    #[test]
    fn labels_are_ancestor_chain_union_tags() {
        let payload = fields(json!({"name": "s1", "tags": ["Rack", "Server"]}));
        let labels = node_labels(&chain(), &payload);
        assert_eq!(
            labels,
            vec!["PhysicalServer", "Server", "ConfigurationItem", "Rack"]
        );
    }

    #[test]
    fn merge_node_shape() {
        let payload = fields(json!({"uuid": "u1", "name": "s1"}));
        let s = merge_node(&chain(), "u1", &payload).unwrap();
        assert!(s
            .text
            .starts_with("MERGE (n:PhysicalServer:Server:ConfigurationItem {uuid: $uuid})"));
        assert!(s.text.contains("ON CREATE SET n = $fields"));
        assert!(s.text.contains("ON MATCH SET n = $fields"));
        assert_eq!(s.params["uuid"], json!("u1"));
        assert_eq!(s.params["fields"]["name"], json!("s1"));
    }

    #[test]
    fn scalar_reference_merge() {
        let descriptor =
            ReferenceDescriptor::scalar("operating_system", "Software", Relationship::new("RUNS"))
                .unwrap();
        let payload = fields(json!({"operating_system": "os-1"}));
        let s = relationship_merge("PhysicalServer", &descriptor, "u1", &payload)
            .unwrap()
            .unwrap();
        assert!(s.text.contains("MATCH (node:PhysicalServer {uuid: $uuid})"));
        assert!(s.text.contains("MATCH (ref_node:Software {uuid: $ref_id})"));
        assert!(s.text.contains("MERGE (node)-[r:RUNS]->(ref_node)"));
        assert_eq!(s.params["ref_id"], json!("os-1"));
    }

    #[test]
    fn array_reference_merge_unwinds() {
        let descriptor =
            ReferenceDescriptor::array("it_service", "ITService", Relationship::new("SUPPORTS"))
                .unwrap();
        let payload = fields(json!({"it_service": ["svc-1", "svc-2"]}));
        let s = relationship_merge("PhysicalServer", &descriptor, "u1", &payload)
            .unwrap()
            .unwrap();
        assert!(s.text.starts_with("UNWIND $ref_ids AS ref_id"));
        assert_eq!(s.params["ref_ids"], json!(["svc-1", "svc-2"]));
    }

    #[test]
    fn reverse_reference_flips_arrow() {
        let mut rel = Relationship::new("MemberOf");
        rel.reverse = true;
        let descriptor = ReferenceDescriptor::scalar("group", "Group", rel).unwrap();
        let payload = fields(json!({"group": "g-1"}));
        let s = relationship_merge("Host", &descriptor, "u1", &payload)
            .unwrap()
            .unwrap();
        assert!(s.text.contains("MERGE (node)<-[r:MemberOf]-(ref_node)"));
    }

    #[test]
    fn nested_reference_promotes_payload_to_edge() {
        let mut rel = Relationship::new("LocatedIn");
        rel.payload_as_edge_props = true;
        let descriptor = ReferenceDescriptor::scalar("position.room", "Room", rel).unwrap();
        let payload = fields(json!({"position": {"room": "room-9", "shelf": 3}}));
        let s = relationship_merge("PhysicalServer", &descriptor, "u1", &payload)
            .unwrap()
            .unwrap();
        assert!(s.text.contains("ON CREATE SET r = $edge_props"));
        assert_eq!(s.params["ref_id"], json!("room-9"));
        assert_eq!(s.params["edge_props"], json!({"room": "room-9", "shelf": 3}));
    }

    #[test]
    fn array_element_reference_merges_per_item() {
        let mut rel = Relationship::new("ConnectedTo");
        rel.payload_as_edge_props = true;
        let descriptor =
            ReferenceDescriptor::array("ports.link.switch", "Switch", rel).unwrap();
        let payload = fields(json!({
            "ports": [{"switch": "sw-1", "port": 1}, {"switch": "sw-2", "port": 2}]
        }));
        let s = relationship_merge("PhysicalServer", &descriptor, "u1", &payload)
            .unwrap()
            .unwrap();
        assert!(s.text.starts_with("UNWIND $ref_items AS ref_item"));
        assert!(s
            .text
            .contains("MATCH (ref_node:Switch {uuid: ref_item.switch})"));
        assert!(s.text.contains("ON MATCH SET r = ref_item"));
    }

    #[test]
    fn absent_reference_emits_no_statement() {
        let descriptor =
            ReferenceDescriptor::scalar("operating_system", "Software", Relationship::new("RUNS"))
                .unwrap();
        let payload = fields(json!({"name": "s1", "operating_system": ""}));
        assert!(relationship_merge("PhysicalServer", &descriptor, "u1", &payload)
            .unwrap()
            .is_none());
    }

    #[test]
    fn update_deletes_changed_edges_before_re_merge() {
        let descriptor =
            ReferenceDescriptor::scalar("operating_system", "Software", Relationship::new("RUNS"))
                .unwrap();
        let change = fields(json!({"operating_system": "os-2"}));
        let merged = fields(json!({"uuid": "u1", "name": "s1", "operating_system": "os-2"}));
        let statements = build_update(
            &chain(),
            "PhysicalServer",
            &[descriptor],
            "u1",
            &merged,
            &change,
            &merged,
        )
        .unwrap();
        assert_eq!(statements.len(), 3);
        assert!(statements[1].text.contains("-[r:RUNS]-() DELETE r"));
        assert!(statements[2].text.contains("MERGE (node)-[r:RUNS]->(ref_node)"));
    }

    #[test]
    fn update_keeps_unchanged_edges() {
        let descriptor =
            ReferenceDescriptor::scalar("operating_system", "Software", Relationship::new("RUNS"))
                .unwrap();
        let change = fields(json!({"model": "b11"}));
        let merged = fields(json!({"uuid": "u1", "model": "b11", "operating_system": "os-1"}));
        let statements = build_update(
            &chain(),
            "PhysicalServer",
            &[descriptor],
            "u1",
            &merged,
            &change,
            &merged,
        )
        .unwrap();
        // no delete statement: the reference path is not in the change-set
        assert_eq!(statements.len(), 2);
        assert!(statements[1].text.contains("MERGE (node)-[r:RUNS]->"));
    }

    #[test]
    fn delete_returns_node_for_miss_detection() {
        let s = build_delete("PhysicalServer", "u1").unwrap();
        assert!(s.text.contains("DETACH DELETE n RETURN n"));
    }

    #[test]
    fn default_scan_excludes_soft_deleted() {
        let s = nodes("PhysicalServer", &ScanOptions::default()).unwrap();
        assert!(s.text.contains("n.status IS NULL OR n.status <> 'deleted'"));
        assert!(s.text.contains("ORDER BY n.lastUpdated DESC"));
    }

    #[test]
    fn status_filter_overrides_default_predicate() {
        let options = ScanOptions {
            status_filter: Some(vec!["active".into(), "retired".into()]),
            ..Default::default()
        };
        let s = nodes("PhysicalServer", &options).unwrap();
        assert!(s.text.contains("WHERE n.status IN $statuses"));
        assert_eq!(s.params["statuses"], json!(["active", "retired"]));
    }

    #[test]
    fn paginated_scan_counts_and_collects() {
        let s = nodes_paginated("PhysicalServer", &ScanOptions::default(), 20, 10).unwrap();
        assert!(s.text.contains("WITH count(n) AS cnt"));
        assert!(s.text.contains("SKIP $skip LIMIT $limit"));
        assert!(s.text.contains("RETURN {count: cnt, results: collect(n)}"));
        assert_eq!(s.params["skip"], json!(20));
        assert_eq!(s.params["limit"], json!(10));
    }

    #[test]
    fn sort_field_is_validated() {
        let options = ScanOptions {
            sort: Some("name) DETACH DELETE (n".into()),
            ..Default::default()
        };
        assert!(matches!(
            nodes("PhysicalServer", &options),
            Err(BuildError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn batch_statements_unwind_parameters() {
        let items = vec![json!({"uuid": "u1"}), json!({"uuid": "u2"})];
        let s = batch_merge_nodes(&chain(), items).unwrap();
        assert!(s.text.starts_with("UNWIND $items AS item"));
        assert!(s.text.contains("MERGE (n:PhysicalServer:Server:ConfigurationItem {uuid: item.uuid})"));

        let s = batch_delete_nodes("PhysicalServer", &["u1".into(), "u2".into()]).unwrap();
        assert!(s.text.contains("DETACH DELETE n"));
        assert_eq!(s.params["uuids"], json!(["u1", "u2"]));
    }

    #[test]
    fn batch_set_fields_removes_validated_names() {
        let change = fields(json!({"model": "b11"}));
        let s = batch_set_fields(
            "PhysicalServer",
            &["u1".into()],
            &change,
            &["asset_id".into()],
        )
        .unwrap();
        assert!(s.text.contains("SET n += $change"));
        assert!(s.text.ends_with("REMOVE n.asset_id"));

        assert!(batch_set_fields("PhysicalServer", &[], &change, &["bad name".into()]).is_err());
    }

    #[test]
    fn sequence_statement_shape() {
        let s = sequence_next("Order");
        assert!(s.text.contains("MERGE (s:Sequence {category: $category})"));
        assert!(s.text.contains("ON MATCH SET s.current = s.current + 1"));
        assert_eq!(s.params["category"], json!("Order"));
    }

    #[test]
    fn member_query_filters_deleted() {
        let s = item_with_members("Group", "g-1").unwrap();
        assert!(s.text.contains("(n)<-[:MemberOf]-(m)"));
        assert!(s.text.contains("m.status IS NULL OR m.status <> 'deleted'"));
    }

    #[test]
    fn label_or_query() {
        let s = nodes_by_labels(&["Software".into(), "Hardware".into()]).unwrap();
        assert!(s.text.contains("(n:Software OR n:Hardware)"));
    }
}
