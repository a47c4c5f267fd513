pub mod model;
pub mod registry;

pub use model::{
    ApiConfig, AuthzConfig, CollectionDefinition, CollectionSpec, EventsConfig, FieldDefinition,
    FieldType, ReferenceConfig, StorageConfig, StorageMode, ValidationRules, FIELD_CREATED_AT,
    FIELD_ID, FIELD_UPDATED_AT, SYSTEM_FIELDS,
};
pub use registry::{
    DefinitionRegistry, DefinitionSnapshot, ListenerId, RegistryEvent, RegistryListener,
};
