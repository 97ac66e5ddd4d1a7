//! Record store boundary
//!
//! The relay reads profiles and requests through attribute-equality queries
//! and get-by-id, and writes back only small patches (notified flags, seen-by
//! markers). [`InMemoryRecordStore`] backs tests and the standalone node.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use thiserror::Error;

/// Record store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store could not be reached
    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    /// Document does not exist
    #[error("Document not found: {collection}/{id}")]
    NotFound {
        /// Collection name
        collection: String,
        /// Document id
        id: String,
    },

    /// Document body could not be decoded
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Seed data could not be loaded
    #[error("Seed error: {0}")]
    Seed(String),
}

/// Stored document with its id kept outside the body
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Document id
    pub id: String,
    /// Document body (a JSON object)
    pub data: Value,
}

impl Document {
    /// Create a document
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self { id: id.into(), data }
    }

    /// Decode the body, filling `id` from the store when the body lacks one
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        let mut data = self.data.clone();
        if let Value::Object(map) = &mut data {
            map.entry("id").or_insert_with(|| Value::String(self.id.clone()));
        }
        serde_json::from_value(data)
            .map_err(|e| StoreError::InvalidDocument(format!("{}: {}", self.id, e)))
    }

    /// Top-level field accessor
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

/// Attribute-equality filter
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Top-level field name
    pub field: String,
    /// Value the field must equal
    pub value: Value,
}

impl Filter {
    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    fn matches(&self, data: &Value) -> bool {
        data.get(&self.field) == Some(&self.value)
    }
}

/// Remote document store consumed by the relay
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Documents in `collection` matching every filter
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<Document>, StoreError>;

    /// Single document by id
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Shallow-merge `patch` into an existing document
    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<(), StoreError>;
}

/// In-process record store
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    offline: AtomicBool,
}

impl InMemoryRecordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{ "collection": [ { "id": ..., ... }, ... ], ... }`
    pub fn from_seed_value(seed: &Value) -> Result<Self, StoreError> {
        let store = Self::new();
        let collections = seed
            .as_object()
            .ok_or_else(|| StoreError::Seed("seed root must be an object".to_string()))?;

        for (collection, docs) in collections {
            let docs = docs
                .as_array()
                .ok_or_else(|| {
                    StoreError::Seed(format!("collection {} must be an array", collection))
                })?;
            for doc in docs {
                let id = doc
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        StoreError::Seed(format!("document in {} has no string id", collection))
                    })?;
                store.insert(collection, id, doc.clone());
            }
        }

        Ok(store)
    }

    /// Load a JSON seed file
    pub fn from_seed_file<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Seed(format!("{}: {}", path.display(), e)))?;
        let seed: Value = serde_json::from_str(&content)
            .map_err(|e| StoreError::Seed(format!("{}: {}", path.display(), e)))?;
        Self::from_seed_value(&seed)
    }

    /// Insert or replace a document
    pub fn insert(&self, collection: &str, id: &str, data: Value) {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
    }

    /// Simulate an unreachable store
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<Document>, StoreError> {
        self.ensure_online()?;
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        let docs = match collections.get(collection) {
            Some(docs) => docs,
            None => return Ok(Vec::new()),
        };

        Ok(docs
            .iter()
            .filter(|(_, data)| filters.iter().all(|f| f.matches(data)))
            .map(|(id, data)| Document::new(id.clone(), data.clone()))
            .collect())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.ensure_online()?;
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document::new(id, data.clone())))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.ensure_online()?;
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        let data = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        match data {
            Value::Object(map) => {
                for (field, value) in patch {
                    map.insert(field, value);
                }
                Ok(())
            }
            _ => Err(StoreError::InvalidDocument(format!(
                "{}/{} is not an object",
                collection, id
            ))),
        }
    }
}
