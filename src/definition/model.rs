use crate::error::DyndbError;
use crate::value::now_millis;
use serde::{Deserialize, Serialize};

pub const FIELD_ID: &str = "id";
pub const FIELD_CREATED_AT: &str = "created_at";
pub const FIELD_UPDATED_AT: &str = "updated_at";

/// Implicit fields present on every collection. Never declared in
/// `CollectionDefinition::fields`, always legal in sort/filter/projection.
pub const SYSTEM_FIELDS: [&str; 3] = [FIELD_ID, FIELD_CREATED_AT, FIELD_UPDATED_AT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    BigInt,
    Double,
    Boolean,
    Date,
    DateTime,
    Json,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::BigInt => "bigint",
            FieldType::Double => "double",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Json => "json",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldType::Integer | FieldType::BigInt | FieldType::Double
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceConfig {
    pub target_collection: String,
    pub target_field: String,
    #[serde(default)]
    pub cascade_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub immutable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_rules: Option<ValidationRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_config: Option<ReferenceConfig>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            immutable: false,
            unique: false,
            default_value: None,
            validation_rules: None,
            enum_values: None,
            reference_config: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Table,
    Document,
}

impl Default for StorageMode {
    fn default() -> Self {
        StorageMode::Table
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default)]
    pub mode: StorageMode,
    /// Physical table name for table-mode collections. Empty means
    /// "derive from the collection name". Ignored in document mode.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub get_enabled: bool,
    pub list_enabled: bool,
    pub create_enabled: bool,
    pub update_enabled: bool,
    pub delete_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            get_enabled: true,
            list_enabled: true,
            create_enabled: true,
            update_enabled: true,
            delete_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthzConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub write_roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsConfig {
    #[serde(default)]
    pub enabled: bool,
    pub on_create: bool,
    pub on_update: bool,
    pub on_delete: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            on_create: true,
            on_update: true,
            on_delete: true,
        }
    }
}

/// Caller-supplied shape of a collection; everything the operator decides.
/// Version and timestamps are assigned by [`CollectionDefinition`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionSpec {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub fields: Vec<FieldDefinition>,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub authz: AuthzConfig,
    pub events: EventsConfig,
}

/// Immutable description of a collection. A change never edits in place;
/// [`CollectionDefinition::revised`] produces the version+1 successor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<FieldDefinition>,
    #[serde(rename = "storageConfig", default)]
    pub storage: StorageConfig,
    #[serde(rename = "apiConfig", default)]
    pub api: ApiConfig,
    #[serde(rename = "authzConfig", default)]
    pub authz: AuthzConfig,
    #[serde(rename = "eventsConfig", default)]
    pub events: EventsConfig,
    pub version: u64,
    #[serde(rename = "createdAt")]
    pub created_at_millis: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at_millis: i64,
}

impl CollectionDefinition {
    pub fn new(spec: CollectionSpec) -> Result<Self, DyndbError> {
        let now = now_millis();
        let def = Self {
            name: spec.name,
            display_name: spec.display_name,
            description: spec.description,
            fields: spec.fields,
            storage: spec.storage,
            api: spec.api,
            authz: spec.authz,
            events: spec.events,
            version: 1,
            created_at_millis: now,
            updated_at_millis: now,
        };
        def.check_invariants()?;
        Ok(def)
    }

    /// Successor definition carrying the new shape at version + 1. The
    /// collection name is identity and cannot change across revisions.
    pub fn revised(&self, spec: CollectionSpec) -> Result<Self, DyndbError> {
        if spec.name != self.name {
            return Err(DyndbError::Validation(format!(
                "revision must keep collection name '{}', got '{}'",
                self.name, spec.name
            )));
        }
        let def = Self {
            name: spec.name,
            display_name: spec.display_name,
            description: spec.description,
            fields: spec.fields,
            storage: spec.storage,
            api: spec.api,
            authz: spec.authz,
            events: spec.events,
            version: self.version + 1,
            created_at_millis: self.created_at_millis,
            updated_at_millis: now_millis(),
        };
        def.check_invariants()?;
        Ok(def)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// True for declared fields and the implicit system fields.
    pub fn has_field(&self, name: &str) -> bool {
        SYSTEM_FIELDS.contains(&name) || self.field(name).is_some()
    }

    pub fn physical_table(&self) -> String {
        if self.storage.table_name.is_empty() {
            format!("c_{}", self.name)
        } else {
            self.storage.table_name.clone()
        }
    }

    fn check_invariants(&self) -> Result<(), DyndbError> {
        if self.name.is_empty() {
            return Err(DyndbError::Validation("collection name is empty".into()));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(DyndbError::Validation(format!(
                "collection name '{}' must be alphanumeric or underscore",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(DyndbError::Validation(format!(
                    "collection '{}' has a field with an empty name",
                    self.name
                )));
            }
            if !field
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(DyndbError::Validation(format!(
                    "field name '{}' must be alphanumeric or underscore",
                    field.name
                )));
            }
            if SYSTEM_FIELDS.contains(&field.name.as_str()) {
                return Err(DyndbError::Validation(format!(
                    "field name '{}' collides with a system field",
                    field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(DyndbError::Validation(format!(
                    "duplicate field name '{}' in collection '{}'",
                    field.name, self.name
                )));
            }
        }
        Ok(())
    }
}
