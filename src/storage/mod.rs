pub mod backend;
pub mod document;
pub mod sql;
pub mod table;

use crate::definition::{CollectionDefinition, StorageMode};
use crate::error::DyndbError;
use crate::migration::MigrationEngine;
use crate::query::{QueryRequest, QueryResult};
use crate::value::{Record, Value};
use backend::SqliteBackend;
use document::DocumentStore;
use std::sync::Arc;
use table::TableStore;

/// Contract implemented identically by both storage strategies. Every
/// sort, filter and projected field is validated against the definition
/// before anything executes; partial execution against unknown fields
/// never happens.
pub trait CollectionStore: Send + Sync {
    fn initialize_collection(&self, def: &CollectionDefinition) -> Result<(), DyndbError>;
    fn update_schema(
        &self,
        old: &CollectionDefinition,
        new: &CollectionDefinition,
    ) -> Result<(), DyndbError>;
    fn query(
        &self,
        def: &CollectionDefinition,
        request: &QueryRequest,
    ) -> Result<QueryResult, DyndbError>;
    fn get_by_id(&self, def: &CollectionDefinition, id: &str)
        -> Result<Option<Record>, DyndbError>;
    fn create(&self, def: &CollectionDefinition, record: Record) -> Result<Record, DyndbError>;
    fn update(
        &self,
        def: &CollectionDefinition,
        id: &str,
        patch: Record,
    ) -> Result<Record, DyndbError>;
    fn delete(&self, def: &CollectionDefinition, id: &str) -> Result<bool, DyndbError>;
    fn is_unique(
        &self,
        def: &CollectionDefinition,
        field: &str,
        value: &Value,
        exclude_id: Option<&str>,
    ) -> Result<bool, DyndbError>;
}

/// Owns exactly two strategy implementations and dispatches on the
/// collection's storage mode. The mode is fixed at registration time,
/// so this is the single branching point.
pub struct StorageEngine {
    table: TableStore,
    document: DocumentStore,
}

impl StorageEngine {
    pub fn new(
        backend: SqliteBackend,
        migrations: Arc<MigrationEngine>,
    ) -> Result<Self, DyndbError> {
        Ok(Self {
            table: TableStore::new(backend.clone(), migrations),
            document: DocumentStore::new(backend)?,
        })
    }

    pub fn store_for(&self, def: &CollectionDefinition) -> &dyn CollectionStore {
        match def.storage.mode {
            StorageMode::Table => &self.table,
            StorageMode::Document => &self.document,
        }
    }

    pub fn initialize_collection(&self, def: &CollectionDefinition) -> Result<(), DyndbError> {
        self.store_for(def).initialize_collection(def)
    }

    pub fn update_schema(
        &self,
        old: &CollectionDefinition,
        new: &CollectionDefinition,
    ) -> Result<(), DyndbError> {
        self.store_for(new).update_schema(old, new)
    }

    pub fn query(
        &self,
        def: &CollectionDefinition,
        request: &QueryRequest,
    ) -> Result<QueryResult, DyndbError> {
        self.store_for(def).query(def, request)
    }

    pub fn get_by_id(
        &self,
        def: &CollectionDefinition,
        id: &str,
    ) -> Result<Option<Record>, DyndbError> {
        self.store_for(def).get_by_id(def, id)
    }

    pub fn create(&self, def: &CollectionDefinition, record: Record) -> Result<Record, DyndbError> {
        self.store_for(def).create(def, record)
    }

    pub fn update(
        &self,
        def: &CollectionDefinition,
        id: &str,
        patch: Record,
    ) -> Result<Record, DyndbError> {
        self.store_for(def).update(def, id, patch)
    }

    pub fn delete(&self, def: &CollectionDefinition, id: &str) -> Result<bool, DyndbError> {
        self.store_for(def).delete(def, id)
    }

    pub fn is_unique(
        &self,
        def: &CollectionDefinition,
        field: &str,
        value: &Value,
        exclude_id: Option<&str>,
    ) -> Result<bool, DyndbError> {
        self.store_for(def).is_unique(def, field, value, exclude_id)
    }
}

/// Plain-text rendering of a value for error payloads.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::Text(s) => s.to_string(),
        Value::Date(s) => s.to_string(),
        other => other.to_json().to_string(),
    }
}
