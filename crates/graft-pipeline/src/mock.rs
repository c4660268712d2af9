//! Scripted and recording collaborators for pipeline tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use graft_core::field::FieldMap;
use graft_core::registry::MemoryRegistry;
use graft_core::reference::{ReferenceDescriptor, Relationship};
use graft_core::schema::{CategorySchema, FieldDef, FieldKind};
use graft_core::PipelineError;
use graft_cypher::Statement;

use crate::notify::{Notification, NotificationSink};
use crate::stores::{GraphStore, SearchIndex};

/// Graph store that records every statement and replays canned row sets in
/// FIFO order (missing scripts yield empty row sets).
#[derive(Default)]
pub struct ScriptedGraph {
    responses: Mutex<VecDeque<Vec<Value>>>,
    pub executed: Mutex<Vec<Statement>>,
    fail: Mutex<Option<String>>,
}

impl ScriptedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, rows: Vec<Value>) {
        self.responses.lock().unwrap().push_back(rows);
    }

    pub fn fail_with(&self, message: &str) {
        *self.fail.lock().unwrap() = Some(message.to_owned());
    }

    pub fn executed_texts(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.text.clone())
            .collect()
    }

    fn run(&self, statement: &Statement) -> Result<Vec<Value>, PipelineError> {
        if let Some(message) = self.fail.lock().unwrap().clone() {
            return Err(PipelineError::Graph(message));
        }
        self.executed.lock().unwrap().push(statement.clone());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

#[async_trait]
impl GraphStore for ScriptedGraph {
    async fn execute(&self, statement: &Statement) -> Result<Vec<Value>, PipelineError> {
        self.run(statement)
    }

    async fn execute_all(
        &self,
        statements: &[Statement],
    ) -> Result<Vec<Vec<Value>>, PipelineError> {
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            results.push(self.run(statement)?);
        }
        Ok(results)
    }
}

/// What a search call looked like, for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchCall {
    Upsert {
        index: String,
        uuid: Option<String>,
        partial: bool,
        create_on_update: bool,
    },
    Delete {
        index: String,
        uuid: String,
    },
    BatchUpsert {
        index: String,
        count: usize,
    },
    BatchDelete {
        index: String,
        uuids: Vec<String>,
    },
    BatchSetFields {
        index: String,
        uuids: Vec<String>,
        removed: Vec<String>,
    },
    Purge {
        index: String,
    },
}

/// Search index that records calls and optionally fails them all.
#[derive(Default)]
pub struct RecordingSearch {
    pub calls: Mutex<Vec<SearchCall>>,
    pub failing: AtomicBool,
}

impl RecordingSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: SearchCall) -> Result<(), PipelineError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PipelineError::Search("index unavailable".into()));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for RecordingSearch {
    async fn upsert(
        &self,
        index: &str,
        doc: &FieldMap,
        partial: bool,
        create_on_update: bool,
    ) -> Result<(), PipelineError> {
        self.record(SearchCall::Upsert {
            index: index.into(),
            uuid: graft_core::field::as_str(doc, "uuid").map(str::to_owned),
            partial,
            create_on_update,
        })
    }

    async fn delete(&self, index: &str, uuid: &str) -> Result<(), PipelineError> {
        self.record(SearchCall::Delete {
            index: index.into(),
            uuid: uuid.into(),
        })
    }

    async fn batch_upsert(&self, index: &str, docs: &[FieldMap]) -> Result<(), PipelineError> {
        self.record(SearchCall::BatchUpsert {
            index: index.into(),
            count: docs.len(),
        })
    }

    async fn batch_delete(&self, index: &str, uuids: &[String]) -> Result<(), PipelineError> {
        self.record(SearchCall::BatchDelete {
            index: index.into(),
            uuids: uuids.to_vec(),
        })
    }

    async fn batch_set_fields(
        &self,
        index: &str,
        uuids: &[String],
        _change: &FieldMap,
        removed: &[String],
    ) -> Result<(), PipelineError> {
        self.record(SearchCall::BatchSetFields {
            index: index.into(),
            uuids: uuids.to_vec(),
            removed: removed.to_vec(),
        })
    }

    async fn purge(&self, index: &str) -> Result<(), PipelineError> {
        self.record(SearchCall::Purge {
            index: index.into(),
        })
    }
}

/// Notification sink that records posts.
#[derive(Default)]
pub struct RecordingNotifier {
    pub posts: Mutex<Vec<Notification>>,
    pub batches: Mutex<Vec<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn post(&self, notification: &Notification) -> Result<(), PipelineError> {
        self.posts.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn post_batch(&self, notifications: &[Notification]) -> Result<(), PipelineError> {
        self.batches.lock().unwrap().push(notifications.to_vec());
        Ok(())
    }
}

/// Registry modeling a small configuration-management domain:
/// `PhysicalServer` inherits `Server`, references `Software` (scalar) and
/// `ITService` (array), carries a search index and notifications; `Order`
/// has a compound key and a sequence field.
pub fn cmdb_registry() -> MemoryRegistry {
    let mut registry = MemoryRegistry::new();
    registry
        .register(
            CategorySchema::new("Server")
                .with_fields(vec![FieldDef::required("name", FieldKind::String)]),
        )
        .unwrap();
    registry
        .register(
            CategorySchema::new("PhysicalServer")
                .with_parent("Server")
                .with_fields(vec![
                    FieldDef::new("model", FieldKind::String),
                    FieldDef::new("ip_address", FieldKind::StringArray),
                    FieldDef::new("position", FieldKind::Object),
                    FieldDef::new("operating_system", FieldKind::Reference),
                    FieldDef::new("it_service", FieldKind::Reference),
                ])
                .with_unique_key("name")
                .with_search("cmdb", false)
                .with_notification()
                .with_references(vec![
                    ReferenceDescriptor::scalar(
                        "operating_system",
                        "Software",
                        Relationship::new("RUNS"),
                    )
                    .unwrap(),
                    ReferenceDescriptor::array(
                        "it_service",
                        "ITService",
                        Relationship::new("SUPPORTS"),
                    )
                    .unwrap(),
                ]),
        )
        .unwrap();
    registry
        .register(
            CategorySchema::new("Software")
                .with_fields(vec![FieldDef::required("name", FieldKind::String)])
                .with_unique_key("name"),
        )
        .unwrap();
    registry
        .register(
            CategorySchema::new("ITService")
                .with_fields(vec![FieldDef::required("name", FieldKind::String)])
                .with_unique_key("name"),
        )
        .unwrap();
    registry
        .register(
            CategorySchema::new("Order")
                .with_fields(vec![
                    FieldDef::required("name", FieldKind::String),
                    FieldDef::new("customer", FieldKind::Reference),
                    FieldDef::new("order_no", FieldKind::String),
                ])
                .with_compound_keys(vec!["name".into(), "customer".into()])
                .with_sequence_field("order_no"),
        )
        .unwrap();
    registry
        .register(
            CategorySchema::new("Customer")
                .with_fields(vec![FieldDef::required("name", FieldKind::String)])
                .with_unique_key("name"),
        )
        .unwrap();
    registry
}

/// A full service wired to scripted/recording collaborators.
pub struct TestRig {
    pub service: crate::orchestrator::ItemService,
    pub graph: Arc<ScriptedGraph>,
    pub cache: Arc<crate::stores::MemoryCache>,
    pub search: Arc<RecordingSearch>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn rig() -> TestRig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let graph = Arc::new(ScriptedGraph::new());
    let cache = Arc::new(crate::stores::MemoryCache::new());
    let search = Arc::new(RecordingSearch::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let service = crate::orchestrator::ItemService::new(
        Arc::new(cmdb_registry()),
        graph.clone(),
        cache.clone(),
        search.clone(),
        notifier.clone(),
    );
    TestRig {
        service,
        graph,
        cache,
        search,
        notifier,
    }
}
