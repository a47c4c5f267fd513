use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DyndbErrorCode {
    Validation,
    VersionConflict,
    DefinitionNotFound,
    RecordNotFound,
    InvalidQuery,
    UniqueViolation,
    IncompatibleSchemaChange,
    StorageFailure,
    Encode,
    Decode,
}

impl DyndbErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DyndbErrorCode::Validation => "validation",
            DyndbErrorCode::VersionConflict => "version_conflict",
            DyndbErrorCode::DefinitionNotFound => "definition_not_found",
            DyndbErrorCode::RecordNotFound => "record_not_found",
            DyndbErrorCode::InvalidQuery => "invalid_query",
            DyndbErrorCode::UniqueViolation => "unique_violation",
            DyndbErrorCode::IncompatibleSchemaChange => "incompatible_schema_change",
            DyndbErrorCode::StorageFailure => "storage_failure",
            DyndbErrorCode::Encode => "encode",
            DyndbErrorCode::Decode => "decode",
        }
    }
}

#[derive(Debug, Error)]
pub enum DyndbError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("collection '{collection}' version conflict: expected {expected}, got {actual}")]
    VersionConflict {
        collection: String,
        expected: u64,
        actual: u64,
    },
    #[error("collection '{collection}' not found")]
    DefinitionNotFound { collection: String },
    #[error("record '{id}' not found in collection '{collection}'")]
    RecordNotFound { collection: String, id: String },
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },
    #[error("unique constraint violation on field '{field}' in collection '{collection}': {value}")]
    UniqueViolation {
        collection: String,
        field: String,
        value: String,
    },
    #[error(
        "incompatible schema change on field '{field}' in collection '{collection}': {from} -> {to}"
    )]
    IncompatibleSchemaChange {
        collection: String,
        field: String,
        from: String,
        to: String,
    },
    #[error("storage failure")]
    Storage {
        #[source]
        source: rusqlite::Error,
    },
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl DyndbError {
    pub fn code(&self) -> DyndbErrorCode {
        match self {
            DyndbError::Validation(_) => DyndbErrorCode::Validation,
            DyndbError::VersionConflict { .. } => DyndbErrorCode::VersionConflict,
            DyndbError::DefinitionNotFound { .. } => DyndbErrorCode::DefinitionNotFound,
            DyndbError::RecordNotFound { .. } => DyndbErrorCode::RecordNotFound,
            DyndbError::InvalidQuery { .. } => DyndbErrorCode::InvalidQuery,
            DyndbError::UniqueViolation { .. } => DyndbErrorCode::UniqueViolation,
            DyndbError::IncompatibleSchemaChange { .. } => DyndbErrorCode::IncompatibleSchemaChange,
            DyndbError::Storage { .. } => DyndbErrorCode::StorageFailure,
            DyndbError::Encode(_) => DyndbErrorCode::Encode,
            DyndbError::Decode(_) => DyndbErrorCode::Decode,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    pub fn invalid_query(reason: impl Into<String>) -> Self {
        DyndbError::InvalidQuery {
            reason: reason.into(),
        }
    }

    pub fn unknown_field(collection: &str, field: &str) -> Self {
        DyndbError::InvalidQuery {
            reason: format!("unknown field '{field}' in collection '{collection}'"),
        }
    }

    /// True for errors a caller can act on (bad request, constraint hit)
    /// as opposed to backend faults.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            DyndbError::Storage { .. } | DyndbError::Encode(_) | DyndbError::Decode(_)
        )
    }
}

/// Backend errors are logged with full context here; `Display` stays
/// generic so backend internals never leak into external responses.
impl From<rusqlite::Error> for DyndbError {
    fn from(source: rusqlite::Error) -> Self {
        tracing::error!(error = %source, "sqlite backend failure");
        DyndbError::Storage { source }
    }
}

impl From<serde_json::Error> for DyndbError {
    fn from(value: serde_json::Error) -> Self {
        DyndbError::Decode(value.to_string())
    }
}
