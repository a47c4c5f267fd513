pub mod config;
pub mod definition;
pub mod error;
pub mod hooks;
pub mod migration;
pub mod query;
pub mod storage;
pub mod value;

pub use crate::config::DyndbConfig;
pub use crate::definition::{
    CollectionDefinition, CollectionSpec, DefinitionRegistry, FieldDefinition, FieldType,
    RegistryEvent, RegistryListener, StorageConfig, StorageMode,
};
pub use crate::error::{DyndbError, DyndbErrorCode};
pub use crate::query::{QueryRequest, QueryResult};
pub use crate::value::{Record, Value};

use crate::definition::SYSTEM_FIELDS;
use crate::hooks::{EventPublisher, NoopPublisher, NoopValidator, OperationKind, Validator};
use crate::migration::{MigrationEngine, MigrationRecord};
use crate::storage::backend::SqliteBackend;
use crate::storage::StorageEngine;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// One process-scoped dyndb instance: a definition registry, a storage
/// engine over the shared backend, and the collaborator hooks invoked
/// above the engine. Pass it by reference to every consumer; there is no
/// hidden global.
pub struct Dyndb {
    config: DyndbConfig,
    registry: Arc<DefinitionRegistry>,
    engine: Arc<StorageEngine>,
    migrations: Arc<MigrationEngine>,
    validator: Arc<dyn Validator>,
    events: Arc<dyn EventPublisher>,
}

impl Dyndb {
    pub fn open(config: DyndbConfig) -> Result<Self, DyndbError> {
        let backend = SqliteBackend::open(&config)?;
        let migrations = Arc::new(MigrationEngine::new(backend.clone())?);
        let engine = Arc::new(StorageEngine::new(backend, Arc::clone(&migrations))?);
        Ok(Self {
            config,
            registry: Arc::new(DefinitionRegistry::new()),
            engine,
            migrations,
            validator: Arc::new(NoopValidator),
            events: Arc::new(NoopPublisher),
        })
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    pub fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    pub fn migration_history(&self, collection: &str) -> Result<Vec<MigrationRecord>, DyndbError> {
        self.migrations.history(collection)
    }

    /// Declares a collection from an operator-supplied spec. A first
    /// registration creates the physical schema; a later call with the
    /// same name becomes a revision and reconciles it.
    pub fn register_collection(
        &self,
        mut spec: CollectionSpec,
    ) -> Result<Arc<CollectionDefinition>, DyndbError> {
        let def = match self.registry.get(&spec.name) {
            Some(existing) => {
                // A revision that does not restate storage keeps the
                // collection's existing placement.
                if spec.storage == StorageConfig::default() {
                    spec.storage = existing.storage.clone();
                }
                existing.revised(spec)?
            }
            None => {
                if spec.storage == StorageConfig::default() {
                    spec.storage.mode = self.config.default_storage_mode;
                }
                CollectionDefinition::new(spec)?
            }
        };
        self.register_definition(def)
    }

    /// Installs a fully-formed definition (e.g. one deserialized from the
    /// exchange format). The registry enforces the version contract; the
    /// physical schema is reconciled after the snapshot swap.
    pub fn register_definition(
        &self,
        def: CollectionDefinition,
    ) -> Result<Arc<CollectionDefinition>, DyndbError> {
        let previous = self.registry.get(&def.name);
        let stored = self.registry.register(def)?;
        match previous {
            None => self.engine.initialize_collection(&stored)?,
            Some(old) => self.engine.update_schema(&old, &stored)?,
        }
        Ok(stored)
    }

    /// Removes the definition. Stored data stays behind; a definition
    /// change never destroys records.
    pub fn unregister_collection(
        &self,
        name: &str,
    ) -> Result<Arc<CollectionDefinition>, DyndbError> {
        self.registry.unregister(name)
    }

    pub fn definition(&self, name: &str) -> Result<Arc<CollectionDefinition>, DyndbError> {
        self.registry
            .get(name)
            .ok_or_else(|| DyndbError::DefinitionNotFound {
                collection: name.to_string(),
            })
    }

    pub fn list_collections(&self) -> Vec<String> {
        self.registry.list_names()
    }

    pub fn query(
        &self,
        collection: &str,
        request: &QueryRequest,
    ) -> Result<QueryResult, DyndbError> {
        let def = self.definition(collection)?;
        if !def.api.list_enabled {
            return Err(api_disabled(collection, "list"));
        }
        request.validate_with(&def, self.config.max_page_size)?;
        self.engine.query(&def, request)
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, DyndbError> {
        let def = self.definition(collection)?;
        if !def.api.get_enabled {
            return Err(api_disabled(collection, "get"));
        }
        self.engine.get_by_id(&def, id)
    }

    pub fn create(
        &self,
        collection: &str,
        payload: &serde_json::Value,
    ) -> Result<Record, DyndbError> {
        let def = self.definition(collection)?;
        if !def.api.create_enabled {
            return Err(api_disabled(collection, "create"));
        }
        let record = decode_payload(&def, payload, OperationKind::Create)?;
        self.run_validator(&def, &record, OperationKind::Create)?;
        let created = self.engine.create(&def, record)?;
        if def.events.enabled && def.events.on_create {
            self.isolate_publisher(|| self.events.publish_create(&def, &created));
        }
        Ok(created)
    }

    pub fn update(
        &self,
        collection: &str,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<Record, DyndbError> {
        let def = self.definition(collection)?;
        if !def.api.update_enabled {
            return Err(api_disabled(collection, "update"));
        }
        let patch = decode_payload(&def, payload, OperationKind::Update)?;
        self.run_validator(&def, &patch, OperationKind::Update)?;
        let updated = self.engine.update(&def, id, patch)?;
        if def.events.enabled && def.events.on_update {
            self.isolate_publisher(|| self.events.publish_update(&def, &updated));
        }
        Ok(updated)
    }

    pub fn delete(&self, collection: &str, id: &str) -> Result<bool, DyndbError> {
        let def = self.definition(collection)?;
        if !def.api.delete_enabled {
            return Err(api_disabled(collection, "delete"));
        }
        let deleted = self.engine.delete(&def, id)?;
        if deleted && def.events.enabled && def.events.on_delete {
            self.isolate_publisher(|| self.events.publish_delete(&def, id));
        }
        Ok(deleted)
    }

    pub fn is_unique(
        &self,
        collection: &str,
        field: &str,
        value: &serde_json::Value,
        exclude_id: Option<&str>,
    ) -> Result<bool, DyndbError> {
        let def = self.definition(collection)?;
        let field_type = crate::storage::sql::field_type_of(&def, field)?;
        let value = Value::from_json(field_type, value)?;
        self.engine.is_unique(&def, field, &value, exclude_id)
    }

    fn run_validator(
        &self,
        def: &CollectionDefinition,
        record: &Record,
        operation: OperationKind,
    ) -> Result<(), DyndbError> {
        let errors = self.validator.validate(def, record, operation);
        if errors.is_empty() {
            return Ok(());
        }
        let joined = errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(DyndbError::Validation(joined))
    }

    /// Event-hook failures never abort the write that triggered them.
    fn isolate_publisher(&self, publish: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(publish)).is_err() {
            tracing::warn!("event publisher panicked; write already committed");
        }
    }
}

fn api_disabled(collection: &str, operation: &str) -> DyndbError {
    DyndbError::Validation(format!(
        "{operation} API is disabled for collection '{collection}'"
    ))
}

/// Decodes a JSON payload into a typed record under the definition.
/// Schema existence and type checks only; rule enforcement belongs to
/// the external validator.
fn decode_payload(
    def: &CollectionDefinition,
    payload: &serde_json::Value,
    operation: OperationKind,
) -> Result<Record, DyndbError> {
    let Some(object) = payload.as_object() else {
        return Err(DyndbError::Validation(
            "record payload must be a JSON object".into(),
        ));
    };
    let mut record = Record::new();
    for (key, value) in object {
        if SYSTEM_FIELDS.contains(&key.as_str()) {
            return Err(DyndbError::Validation(format!(
                "system field '{key}' is not writable"
            )));
        }
        let Some(field) = def.field(key) else {
            return Err(DyndbError::Validation(format!(
                "unknown field '{key}' in collection '{}'",
                def.name
            )));
        };
        if operation == OperationKind::Update && field.immutable {
            return Err(DyndbError::Validation(format!(
                "field '{key}' is immutable after create"
            )));
        }
        let decoded = Value::from_json(field.field_type, value)?;
        if decoded.is_null() && !field.nullable {
            return Err(DyndbError::Validation(format!(
                "field '{key}' is not nullable"
            )));
        }
        record.insert(key.clone(), decoded);
    }
    if operation == OperationKind::Create {
        for field in &def.fields {
            if record.contains_key(&field.name) {
                continue;
            }
            if let Some(default) = &field.default_value {
                record.insert(
                    field.name.clone(),
                    Value::from_json(field.field_type, default)?,
                );
            } else if !field.nullable {
                return Err(DyndbError::Validation(format!(
                    "missing required field '{}'",
                    field.name
                )));
            }
        }
    }
    Ok(record)
}
