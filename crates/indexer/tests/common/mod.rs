//! In-memory stand-in for the search backend, with enough query support for
//! the ingestion paths: term search, bool/must delete-by-query, counts, and
//! failure injection.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use eosearch_indexer::{BulkBatch, ElasticError, SearchBackend};

/// A stored document.
#[derive(Debug, Clone)]
pub struct Doc {
    pub id: String,
    pub source: Value,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, Vec<Doc>>,
    /// Collection name of every write, in order.
    write_log: Vec<String>,
    /// (collection, field, value) of every search.
    search_log: Vec<(String, String, String)>,
    next_id: u64,
    initialized: bool,
}

#[derive(Default)]
pub struct MockBackend {
    state: Mutex<State>,
    fail_writes: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a connection error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Whether `init_index` ran since the last `delete_index`.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().unwrap().initialized
    }

    pub fn docs(&self, collection: &str) -> Vec<Doc> {
        let state = self.state.lock().unwrap();
        state.collections.get(collection).cloned().unwrap_or_default()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.docs(collection).len()
    }

    /// Collection names of every write, in write order.
    pub fn write_order(&self) -> Vec<String> {
        self.state.lock().unwrap().write_log.clone()
    }

    /// How many searches hit `collection` with a term on `value`.
    pub fn search_count(&self, collection: &str, value: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .search_log
            .iter()
            .filter(|(c, _, v)| c == collection && v == value)
            .count()
    }

    fn check_write(&self) -> Result<(), ElasticError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ElasticError::Connection {
                endpoint: "mock://".to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

/// Flatten a term or bool/must query into (field, value) pairs.
fn term_pairs(query: &Value) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if let Some(term) = query["query"]["term"].as_object() {
        for (field, value) in term {
            if let Some(v) = value.as_str() {
                pairs.push((field.clone(), v.to_string()));
            }
        }
    }
    if let Some(must) = query["query"]["bool"]["must"].as_array() {
        for clause in must {
            if let Some(term) = clause["term"].as_object() {
                for (field, value) in term {
                    if let Some(v) = value.as_str() {
                        pairs.push((field.clone(), v.to_string()));
                    }
                }
            }
        }
    }
    pairs
}

fn matches(source: &Value, pairs: &[(String, String)]) -> bool {
    pairs
        .iter()
        .all(|(field, value)| source[field] == json!(value))
}

#[async_trait]
impl SearchBackend for MockBackend {
    async fn init_index(&self, _mappings: &Value) -> Result<(), ElasticError> {
        self.state.lock().unwrap().initialized = true;
        Ok(())
    }

    async fn delete_index(&self) -> Result<(), ElasticError> {
        let mut state = self.state.lock().unwrap();
        state.collections.clear();
        state.initialized = false;
        Ok(())
    }

    async fn index_doc(
        &self,
        collection: &str,
        body: &Value,
        id: Option<&str>,
    ) -> Result<(), ElasticError> {
        self.check_write()?;
        let mut state = self.state.lock().unwrap();
        state.write_log.push(collection.to_string());
        let id = match id {
            Some(id) => id.to_string(),
            None => {
                state.next_id += 1;
                format!("auto-{}", state.next_id)
            }
        };
        let docs = state.collections.entry(collection.to_string()).or_default();
        if let Some(existing) = docs.iter_mut().find(|d| d.id == id) {
            existing.source = body.clone();
        } else {
            docs.push(Doc { id, source: body.clone() });
        }
        Ok(())
    }

    async fn bulk_perform(&self, batch: &BulkBatch) -> Result<(), ElasticError> {
        self.check_write()?;
        let mut state = self.state.lock().unwrap();
        for op in batch.ops() {
            state.write_log.push(op.collection.clone());
            let id = match &op.id {
                Some(id) => id.clone(),
                None => {
                    state.next_id += 1;
                    format!("auto-{}", state.next_id)
                }
            };
            state
                .collections
                .entry(op.collection.clone())
                .or_default()
                .push(Doc { id, source: op.body.clone() });
        }
        Ok(())
    }

    async fn search(&self, collection: &str, query: &Value) -> Result<Value, ElasticError> {
        let pairs = term_pairs(query);
        let mut state = self.state.lock().unwrap();
        for (field, value) in &pairs {
            state
                .search_log
                .push((collection.to_string(), field.clone(), value.clone()));
        }
        let hits: Vec<Value> = state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| matches(&d.source, &pairs))
                    .map(|d| json!({ "_id": d.id, "_source": d.source }))
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "hits": { "total": hits.len(), "hits": hits } }))
    }

    async fn delete_by_query(&self, collection: &str, query: &Value) -> Result<(), ElasticError> {
        self.check_write()?;
        let pairs = term_pairs(query);
        let mut state = self.state.lock().unwrap();
        if let Some(docs) = state.collections.get_mut(collection) {
            docs.retain(|d| !matches(&d.source, &pairs));
        }
        Ok(())
    }

    async fn count_doc(&self, collection: &str) -> Result<u64, ElasticError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .collections
            .get(collection)
            .map(|docs| docs.len() as u64)
            .unwrap_or(0))
    }
}
