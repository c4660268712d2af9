use chrono::Utc;
use serde_json::{Map, Value};

/// Dynamic field map of an item. Payloads arrive as JSON and leave as
/// graph-statement parameters, so fields stay in serde_json form end to end.
pub type FieldMap = Map<String, Value>;

/// Field names the pipeline assigns or interprets itself.
pub mod reserved {
    pub const UUID: &str = "uuid";
    pub const CATEGORY: &str = "category";
    pub const NAME: &str = "name";
    pub const UNIQUE_NAME: &str = "unique_name";
    pub const CREATED: &str = "created";
    pub const LAST_UPDATED: &str = "lastUpdated";
    pub const STATUS: &str = "status";
    pub const TAGS: &str = "tags";

    /// `status` value that default queries exclude (soft delete).
    pub const STATUS_DELETED: &str = "deleted";
}

/// Current time as epoch milliseconds, the on-node timestamp representation.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Overlay `change` on top of `base`. Fields absent from `change` keep their
/// prior values; fields present in `change` win.
pub fn merge(base: &FieldMap, change: &FieldMap) -> FieldMap {
    let mut out = base.clone();
    for (k, v) in change {
        out.insert(k.clone(), v.clone());
    }
    out
}

/// String view of a field, if present and a string.
pub fn as_str<'a>(fields: &'a FieldMap, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

/// Collect the string elements of an array-valued field.
pub fn string_list(fields: &FieldMap, key: &str) -> Vec<String> {
    match fields.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}

/// True for the values the pipeline treats as "absent" when deciding whether
/// a declared reference participates in a mutation.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
