use dyndb::definition::{StorageConfig, StorageMode};
use dyndb::migration::MigrationKind;
use dyndb::{
    CollectionSpec, Dyndb, DyndbConfig, FieldDefinition, FieldType, QueryRequest, Value,
};
use tempfile::tempdir;

fn items_fields_v1() -> Vec<FieldDefinition> {
    vec![
        FieldDefinition::new("label", FieldType::Text),
        FieldDefinition::new("qty", FieldType::Integer),
    ]
}

fn register_items(db: &Dyndb, fields: Vec<FieldDefinition>) {
    db.register_collection(CollectionSpec {
        name: "items".into(),
        fields,
        ..CollectionSpec::default()
    })
    .expect("register items");
}

#[test]
fn removing_a_field_deprecates_the_column_without_destroying_data() {
    let dir = tempdir().expect("temp");
    let path = dir.path().join("items.db");
    let db = Dyndb::open(DyndbConfig::at_path(&path)).expect("open");

    register_items(&db, items_fields_v1());
    db.create("items", &serde_json::json!({"label": "keep-me", "qty": 1}))
        .expect("create");

    // v2 drops the label field.
    register_items(
        &db,
        vec![
            FieldDefinition::new("qty", FieldType::Integer),
            FieldDefinition {
                nullable: true,
                ..FieldDefinition::new("note", FieldType::Text)
            },
        ],
    );

    let history = db.migration_history("items").expect("history");
    let kinds: Vec<MigrationKind> = history.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        [
            MigrationKind::CreateTable,
            MigrationKind::AddColumn,
            MigrationKind::DeprecateColumn,
        ]
    );

    // The removed field is gone from the query surface...
    let request = QueryRequest::parse([("filter[label][eq]", "keep-me")]);
    assert_eq!(
        db.query("items", &request).unwrap_err().code_str(),
        "invalid_query"
    );
    let result = db
        .query("items", &QueryRequest::default())
        .expect("query");
    assert!(!result.records[0].contains_key("label"));

    // ...but the data survives under the deprecated column name.
    let conn = rusqlite::Connection::open(&path).expect("raw open");
    let preserved: String = conn
        .query_row("SELECT \"label__deprecated_v1\" FROM \"c_items\"", [], |row| {
            row.get(0)
        })
        .expect("deprecated column readable");
    assert_eq!(preserved, "keep-me");
}

#[test]
fn readded_field_starts_fresh_instead_of_resurrecting_old_values() {
    let db = Dyndb::open(DyndbConfig::default()).expect("open");
    register_items(&db, items_fields_v1());
    let created = db
        .create("items", &serde_json::json!({"label": "old", "qty": 2}))
        .expect("create");
    let Some(Value::Text(id)) = created.get("id").cloned() else {
        panic!("id missing");
    };

    // Remove the label field, then add it back.
    register_items(&db, vec![FieldDefinition::new("qty", FieldType::Integer)]);
    register_items(
        &db,
        vec![
            FieldDefinition::new("qty", FieldType::Integer),
            FieldDefinition {
                nullable: true,
                ..FieldDefinition::new("label", FieldType::Text)
            },
        ],
    );

    let fetched = db.get("items", id.as_str()).expect("get").expect("present");
    assert_eq!(fetched.get("label"), Some(&Value::Null));
}

#[test]
fn widening_retype_converts_in_place() {
    let db = Dyndb::open(DyndbConfig::default()).expect("open");
    register_items(&db, items_fields_v1());
    db.create("items", &serde_json::json!({"label": "a", "qty": 3}))
        .expect("create");

    register_items(
        &db,
        vec![
            FieldDefinition::new("label", FieldType::Text),
            FieldDefinition::new("qty", FieldType::Double),
        ],
    );

    let result = db
        .query("items", &QueryRequest::default())
        .expect("query");
    assert_eq!(result.records[0].get("qty"), Some(&Value::Double(3.0)));

    let history = db.migration_history("items").expect("history");
    assert!(history
        .iter()
        .any(|r| r.kind == MigrationKind::AlterColumnType));
}

#[test]
fn incompatible_retype_rejects_the_change_before_any_ddl() {
    let db = Dyndb::open(DyndbConfig::default()).expect("open");
    register_items(&db, items_fields_v1());
    let before = db.migration_history("items").expect("history").len();

    let err = db
        .register_collection(CollectionSpec {
            name: "items".into(),
            fields: vec![
                FieldDefinition::new("label", FieldType::Text),
                FieldDefinition::new("qty", FieldType::Boolean),
            ],
            ..CollectionSpec::default()
        })
        .unwrap_err();
    assert_eq!(err.code_str(), "incompatible_schema_change");
    assert_eq!(
        db.migration_history("items").expect("history").len(),
        before
    );
}

#[test]
fn migration_log_records_statements_and_checksums() {
    let db = Dyndb::open(DyndbConfig::default()).expect("open");
    register_items(&db, items_fields_v1());
    let history = db.migration_history("items").expect("history");
    assert_eq!(history.len(), 1);
    let create = &history[0];
    assert_eq!(create.collection, "items");
    assert!(create.statement.contains("CREATE TABLE IF NOT EXISTS"));
    assert_eq!(create.checksum_hex.len(), 64);
    assert!(create.executed_at_millis > 0);
}

#[test]
fn document_mode_schema_changes_touch_nothing_physical() {
    let db = Dyndb::open(DyndbConfig::default()).expect("open");
    db.register_collection(CollectionSpec {
        name: "notes".into(),
        fields: vec![FieldDefinition::new("body", FieldType::Text)],
        storage: StorageConfig {
            mode: StorageMode::Document,
            table_name: String::new(),
        },
        ..CollectionSpec::default()
    })
    .expect("register");
    db.create("notes", &serde_json::json!({"body": "hello"}))
        .expect("create");

    db.register_collection(CollectionSpec {
        name: "notes".into(),
        fields: vec![
            FieldDefinition::new("body", FieldType::Text),
            FieldDefinition {
                nullable: true,
                ..FieldDefinition::new("title", FieldType::Text)
            },
        ],
        storage: StorageConfig {
            mode: StorageMode::Document,
            table_name: String::new(),
        },
        ..CollectionSpec::default()
    })
    .expect("revise");

    assert!(db.migration_history("notes").expect("history").is_empty());
    let result = db.query("notes", &QueryRequest::default()).expect("query");
    assert_eq!(result.page.total_count, 1);
    assert_eq!(result.records[0].get("title"), Some(&Value::Null));
}
