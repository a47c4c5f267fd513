//! Collaborator boundary. Validation rules and lifecycle events are
//! owned by external components; this module only defines the interfaces
//! the facade invokes. The storage engine never calls them.

use crate::definition::CollectionDefinition;
use crate::value::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Rule-level validation (min/max, patterns, enums, references) supplied
/// by an external component. Schema existence and type checks are NOT its
/// job; the core performs those itself.
pub trait Validator: Send + Sync {
    fn validate(
        &self,
        def: &CollectionDefinition,
        record: &Record,
        operation: OperationKind,
    ) -> Vec<FieldError>;
}

/// Lifecycle event publication. Implementations own their delivery
/// semantics; a failing publisher must never abort the triggering write,
/// so the facade isolates calls into it.
pub trait EventPublisher: Send + Sync {
    fn publish_create(&self, def: &CollectionDefinition, record: &Record);
    fn publish_update(&self, def: &CollectionDefinition, record: &Record);
    fn publish_delete(&self, def: &CollectionDefinition, id: &str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopValidator;

impl Validator for NoopValidator {
    fn validate(
        &self,
        _def: &CollectionDefinition,
        _record: &Record,
        _operation: OperationKind,
    ) -> Vec<FieldError> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish_create(&self, _def: &CollectionDefinition, _record: &Record) {}
    fn publish_update(&self, _def: &CollectionDefinition, _record: &Record) {}
    fn publish_delete(&self, _def: &CollectionDefinition, _id: &str) {}
}
