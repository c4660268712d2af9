//! Collaborator contracts consumed by the pipeline. The graph store is the
//! system of record; cache and search index are secondary stores that may
//! lag or diverge under the relaxed consistency policy.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use graft_core::field::{as_str, reserved, FieldMap};
use graft_core::PipelineError;
use graft_cypher::Statement;

/// The primary store. Statement execution order within `execute_all` is the
/// statement list order, inside one transaction.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn execute(&self, statement: &Statement) -> Result<Vec<Value>, PipelineError>;

    async fn execute_all(&self, statements: &[Statement]) -> Result<Vec<Vec<Value>>, PipelineError>;
}

/// Read-through cache of item snapshots, keyed by (category, uuid) and by
/// (category, unique_name).
#[async_trait]
pub trait ItemCache: Send + Sync {
    async fn get(&self, category: &str, uuid: &str) -> Result<Option<FieldMap>, PipelineError>;

    async fn get_by_unique_name(
        &self,
        category: &str,
        unique_name: &str,
    ) -> Result<Option<FieldMap>, PipelineError>;

    async fn put(&self, fields: &FieldMap) -> Result<(), PipelineError>;

    async fn evict(&self, fields: &FieldMap) -> Result<(), PipelineError>;

    async fn flush_all(&self) -> Result<(), PipelineError>;
}

/// Full-text index over item documents.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn upsert(
        &self,
        index: &str,
        doc: &FieldMap,
        partial: bool,
        create_on_update: bool,
    ) -> Result<(), PipelineError>;

    async fn delete(&self, index: &str, uuid: &str) -> Result<(), PipelineError>;

    async fn batch_upsert(&self, index: &str, docs: &[FieldMap]) -> Result<(), PipelineError>;

    async fn batch_delete(&self, index: &str, uuids: &[String]) -> Result<(), PipelineError>;

    /// Apply a partial change (set + removed fields) to many documents.
    async fn batch_set_fields(
        &self,
        index: &str,
        uuids: &[String],
        change: &FieldMap,
        removed: &[String],
    ) -> Result<(), PipelineError>;

    /// Drop every document in an index.
    async fn purge(&self, index: &str) -> Result<(), PipelineError>;
}

#[derive(Default)]
struct CacheInner {
    by_id: HashMap<(String, String), FieldMap>,
    by_name: HashMap<(String, String), String>,
}

/// In-memory [`ItemCache`].
#[derive(Default)]
pub struct MemoryCache {
    inner: RwLock<CacheInner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn keys(fields: &FieldMap) -> Option<(String, String, Option<String>)> {
        let category = as_str(fields, reserved::CATEGORY)?.to_owned();
        let uuid = as_str(fields, reserved::UUID)?.to_owned();
        let name = as_str(fields, reserved::UNIQUE_NAME).map(str::to_owned);
        Some((category, uuid, name))
    }
}

#[async_trait]
impl ItemCache for MemoryCache {
    async fn get(&self, category: &str, uuid: &str) -> Result<Option<FieldMap>, PipelineError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_id
            .get(&(category.to_owned(), uuid.to_owned()))
            .cloned())
    }

    async fn get_by_unique_name(
        &self,
        category: &str,
        unique_name: &str,
    ) -> Result<Option<FieldMap>, PipelineError> {
        let inner = self.inner.read().await;
        let uuid = match inner
            .by_name
            .get(&(category.to_owned(), unique_name.to_owned()))
        {
            Some(uuid) => uuid.clone(),
            None => return Ok(None),
        };
        Ok(inner.by_id.get(&(category.to_owned(), uuid)).cloned())
    }

    async fn put(&self, fields: &FieldMap) -> Result<(), PipelineError> {
        let (category, uuid, name) = match Self::keys(fields) {
            Some(keys) => keys,
            None => {
                return Err(PipelineError::Cache(
                    "item without category/uuid cannot be cached".into(),
                ))
            }
        };
        let mut inner = self.inner.write().await;
        if let Some(name) = name {
            inner
                .by_name
                .insert((category.clone(), name), uuid.clone());
        }
        inner.by_id.insert((category, uuid), fields.clone());
        Ok(())
    }

    async fn evict(&self, fields: &FieldMap) -> Result<(), PipelineError> {
        let (category, uuid, name) = match Self::keys(fields) {
            Some(keys) => keys,
            None => return Ok(()),
        };
        let mut inner = self.inner.write().await;
        inner.by_id.remove(&(category.clone(), uuid));
        if let Some(name) = name {
            inner.by_name.remove(&(category, name));
        }
        Ok(())
    }

    async fn flush_all(&self) -> Result<(), PipelineError> {
        let mut inner = self.inner.write().await;
        inner.by_id.clear();
        inner.by_name.clear();
        Ok(())
    }
}
