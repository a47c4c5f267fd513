use dyndb::definition::{ApiConfig, EventsConfig, StorageConfig, StorageMode};
use dyndb::hooks::{EventPublisher, FieldError, OperationKind, Validator};
use dyndb::{
    CollectionDefinition, CollectionSpec, Dyndb, DyndbConfig, DyndbError, FieldDefinition,
    FieldType, Record, Value,
};
use parking_lot::Mutex;
use std::sync::Arc;

const MODES: [StorageMode; 2] = [StorageMode::Table, StorageMode::Document];

fn accounts_spec(mode: StorageMode) -> CollectionSpec {
    CollectionSpec {
        name: "accounts".into(),
        fields: vec![
            FieldDefinition {
                unique: true,
                immutable: true,
                ..FieldDefinition::new("email", FieldType::Text)
            },
            FieldDefinition {
                nullable: true,
                ..FieldDefinition::new("display_name", FieldType::Text)
            },
            FieldDefinition {
                default_value: Some(serde_json::json!(true)),
                ..FieldDefinition::new("active", FieldType::Boolean)
            },
        ],
        storage: StorageConfig {
            mode,
            table_name: String::new(),
        },
        ..CollectionSpec::default()
    }
}

fn open_accounts(mode: StorageMode) -> Dyndb {
    let db = Dyndb::open(DyndbConfig::default()).expect("open");
    db.register_collection(accounts_spec(mode)).expect("register");
    db
}

fn record_text(record: &Record, field: &str) -> String {
    match record.get(field) {
        Some(Value::Text(s)) => s.to_string(),
        other => panic!("expected text in '{field}', got {other:?}"),
    }
}

#[test]
fn create_get_update_delete_roundtrip() {
    for mode in MODES {
        let db = open_accounts(mode);
        let created = db
            .create("accounts", &serde_json::json!({"email": "a@example.com"}))
            .expect("create");
        let id = record_text(&created, "id");
        assert_eq!(created.get("active"), Some(&Value::Boolean(true)), "{mode:?}");
        assert_eq!(created.get("display_name"), Some(&Value::Null));

        let fetched = db.get("accounts", &id).expect("get").expect("present");
        assert_eq!(record_text(&fetched, "email"), "a@example.com");

        let updated = db
            .update(
                "accounts",
                &id,
                &serde_json::json!({"display_name": "Ada"}),
            )
            .expect("update");
        assert_eq!(record_text(&updated, "display_name"), "Ada");
        assert_eq!(record_text(&updated, "email"), "a@example.com");

        assert!(db.delete("accounts", &id).expect("delete"), "{mode:?}");
        assert!(db.get("accounts", &id).expect("get").is_none());
        assert!(!db.delete("accounts", &id).expect("second delete"));
    }
}

#[test]
fn unique_violation_carries_collection_field_and_value() {
    for mode in MODES {
        let db = open_accounts(mode);
        db.create("accounts", &serde_json::json!({"email": "dup@example.com"}))
            .expect("first");
        let err = db
            .create("accounts", &serde_json::json!({"email": "dup@example.com"}))
            .unwrap_err();
        match err {
            DyndbError::UniqueViolation {
                collection,
                field,
                value,
            } => {
                assert_eq!(collection, "accounts", "{mode:?}");
                assert_eq!(field, "email");
                assert_eq!(value, "dup@example.com");
            }
            other => panic!("{mode:?}: expected unique violation, got {other:?}"),
        }
    }
}

#[test]
fn is_unique_probe_honors_exclusion() {
    for mode in MODES {
        let db = open_accounts(mode);
        let created = db
            .create("accounts", &serde_json::json!({"email": "x@example.com"}))
            .expect("create");
        let id = record_text(&created, "id");

        assert!(!db
            .is_unique("accounts", "email", &serde_json::json!("x@example.com"), None)
            .expect("probe"));
        assert!(db
            .is_unique(
                "accounts",
                "email",
                &serde_json::json!("x@example.com"),
                Some(&id)
            )
            .expect("probe with exclusion"));
        assert!(db
            .is_unique("accounts", "email", &serde_json::json!("y@example.com"), None)
            .expect("probe free value"));
    }
}

#[test]
fn immutable_field_rejected_on_update() {
    for mode in MODES {
        let db = open_accounts(mode);
        let created = db
            .create("accounts", &serde_json::json!({"email": "i@example.com"}))
            .expect("create");
        let id = record_text(&created, "id");
        let err = db
            .update(
                "accounts",
                &id,
                &serde_json::json!({"email": "j@example.com"}),
            )
            .unwrap_err();
        assert_eq!(err.code_str(), "validation", "{mode:?}");
    }
}

#[test]
fn missing_collection_is_a_distinct_error() {
    let db = Dyndb::open(DyndbConfig::default()).expect("open");
    let err = db
        .query("ghosts", &dyndb::QueryRequest::default())
        .unwrap_err();
    assert_eq!(err.code_str(), "definition_not_found");
}

#[test]
fn disabled_api_operations_are_gated() {
    let db = Dyndb::open(DyndbConfig::default()).expect("open");
    db.register_collection(CollectionSpec {
        name: "readonly".into(),
        fields: vec![FieldDefinition {
            nullable: true,
            ..FieldDefinition::new("note", FieldType::Text)
        }],
        api: ApiConfig {
            create_enabled: false,
            delete_enabled: false,
            ..ApiConfig::default()
        },
        ..CollectionSpec::default()
    })
    .expect("register");
    let err = db
        .create("readonly", &serde_json::json!({"note": "n"}))
        .unwrap_err();
    assert_eq!(err.code_str(), "validation");
    let err = db.delete("readonly", "any").unwrap_err();
    assert_eq!(err.code_str(), "validation");
}

#[derive(Default)]
struct RecordingPublisher {
    log: Mutex<Vec<String>>,
}

impl EventPublisher for RecordingPublisher {
    fn publish_create(&self, def: &CollectionDefinition, record: &Record) {
        let id = match record.get("id") {
            Some(Value::Text(s)) => s.to_string(),
            _ => String::new(),
        };
        self.log.lock().push(format!("create:{}:{id}", def.name));
    }
    fn publish_update(&self, def: &CollectionDefinition, _record: &Record) {
        self.log.lock().push(format!("update:{}", def.name));
    }
    fn publish_delete(&self, def: &CollectionDefinition, id: &str) {
        self.log.lock().push(format!("delete:{}:{id}", def.name));
    }
}

#[test]
fn events_publish_only_when_enabled() {
    let publisher = Arc::new(RecordingPublisher::default());
    let db = Dyndb::open(DyndbConfig::default())
        .expect("open")
        .with_event_publisher(publisher.clone());

    let mut with_events = accounts_spec(StorageMode::Table);
    with_events.events = EventsConfig {
        enabled: true,
        ..EventsConfig::default()
    };
    db.register_collection(with_events).expect("register");

    let created = db
        .create("accounts", &serde_json::json!({"email": "e@example.com"}))
        .expect("create");
    let id = record_text(&created, "id");
    db.update("accounts", &id, &serde_json::json!({"display_name": "E"}))
        .expect("update");
    db.delete("accounts", &id).expect("delete");

    let log = publisher.log.lock();
    assert_eq!(log.len(), 3);
    assert_eq!(log[0], format!("create:accounts:{id}"));
    assert_eq!(log[1], "update:accounts");
    assert_eq!(log[2], format!("delete:accounts:{id}"));
}

#[test]
fn panicking_publisher_never_aborts_the_write() {
    struct Bomb;
    impl EventPublisher for Bomb {
        fn publish_create(&self, _def: &CollectionDefinition, _record: &Record) {
            panic!("publisher down");
        }
        fn publish_update(&self, _def: &CollectionDefinition, _record: &Record) {}
        fn publish_delete(&self, _def: &CollectionDefinition, _id: &str) {}
    }
    let db = Dyndb::open(DyndbConfig::default())
        .expect("open")
        .with_event_publisher(Arc::new(Bomb));
    let mut spec = accounts_spec(StorageMode::Table);
    spec.events = EventsConfig {
        enabled: true,
        ..EventsConfig::default()
    };
    db.register_collection(spec).expect("register");
    let created = db
        .create("accounts", &serde_json::json!({"email": "p@example.com"}))
        .expect("create must survive publisher panic");
    let id = record_text(&created, "id");
    assert!(db.get("accounts", &id).expect("get").is_some());
}

struct LengthValidator;

impl Validator for LengthValidator {
    fn validate(
        &self,
        _def: &CollectionDefinition,
        record: &Record,
        _operation: OperationKind,
    ) -> Vec<FieldError> {
        match record.get("email") {
            Some(Value::Text(s)) if s.len() < 6 => vec![FieldError {
                field: "email".into(),
                message: "too short".into(),
            }],
            _ => Vec::new(),
        }
    }
}

#[test]
fn external_validator_errors_surface_as_validation() {
    let db = Dyndb::open(DyndbConfig::default())
        .expect("open")
        .with_validator(Arc::new(LengthValidator));
    db.register_collection(accounts_spec(StorageMode::Table))
        .expect("register");
    let err = db
        .create("accounts", &serde_json::json!({"email": "a@b"}))
        .unwrap_err();
    assert_eq!(err.code_str(), "validation");
    assert!(err.to_string().contains("email: too short"));
}
