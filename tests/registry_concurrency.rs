use dyndb::definition::{
    CollectionDefinition, CollectionSpec, DefinitionRegistry, FieldDefinition, FieldType,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Definition whose shape encodes its version: version v carries exactly
/// the fields field_1 .. field_v. A torn snapshot would break that tie.
fn seeded(registry: &DefinitionRegistry) -> Arc<CollectionDefinition> {
    let def = CollectionDefinition::new(CollectionSpec {
        name: "stock".into(),
        fields: vec![FieldDefinition::new("field_1", FieldType::Integer)],
        ..CollectionSpec::default()
    })
    .expect("valid definition");
    registry.register(def).expect("seed registration")
}

fn revision_fields(version: u64) -> Vec<FieldDefinition> {
    (1..=version)
        .map(|i| FieldDefinition::new(format!("field_{i}"), FieldType::Integer))
        .collect()
}

#[test]
fn version_is_monotonic_across_registrations() {
    let registry = DefinitionRegistry::new();
    let mut current = seeded(&registry);
    for _ in 0..10 {
        let next = current
            .revised(CollectionSpec {
                name: "stock".into(),
                fields: revision_fields(current.version + 1),
                ..CollectionSpec::default()
            })
            .expect("revision");
        let stored = registry.register(next).expect("register");
        assert_eq!(stored.version, current.version + 1);
        current = stored;
    }
    assert_eq!(registry.get("stock").expect("present").version, 11);
}

#[test]
fn concurrent_readers_never_observe_a_torn_definition() {
    const WRITERS: usize = 4;
    const REVISIONS_PER_WRITER: usize = 25;
    const READERS: usize = 4;

    let registry = Arc::new(DefinitionRegistry::new());
    seeded(&registry);
    let done = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for _ in 0..READERS {
        let registry = Arc::clone(&registry);
        let done = Arc::clone(&done);
        handles.push(thread::spawn(move || {
            let mut last_seen = 0u64;
            while !done.load(Ordering::Acquire) {
                let def = registry.get("stock").expect("always present");
                // Snapshot consistency: the field set matches the version.
                assert_eq!(def.fields.len() as u64, def.version);
                for i in 1..=def.version {
                    assert!(def.field(&format!("field_{i}")).is_some());
                }
                // Writes are totally ordered; reads may lag but not rewind.
                assert!(def.version >= last_seen);
                last_seen = def.version;
            }
        }));
    }

    let mut writer_handles = Vec::new();
    for _ in 0..WRITERS {
        let registry = Arc::clone(&registry);
        writer_handles.push(thread::spawn(move || {
            for _ in 0..REVISIONS_PER_WRITER {
                // Optimistic revise-and-retry: a concurrent writer winning
                // the race surfaces as a version conflict, never a lost or
                // interleaved update.
                loop {
                    let current = registry.get("stock").expect("present");
                    let next = current
                        .revised(CollectionSpec {
                            name: "stock".into(),
                            fields: revision_fields(current.version + 1),
                            ..CollectionSpec::default()
                        })
                        .expect("revision");
                    match registry.register(next) {
                        Ok(_) => break,
                        Err(err) => assert_eq!(err.code_str(), "version_conflict"),
                    }
                }
            }
        }));
    }

    for handle in writer_handles {
        handle.join().expect("writer");
    }
    done.store(true, Ordering::Release);
    for handle in handles {
        handle.join().expect("reader");
    }

    let final_def = registry.get("stock").expect("present");
    assert_eq!(
        final_def.version,
        1 + (WRITERS * REVISIONS_PER_WRITER) as u64
    );
}

#[test]
fn unregister_removes_only_the_named_definition() {
    let registry = DefinitionRegistry::new();
    seeded(&registry);
    let other = CollectionDefinition::new(CollectionSpec {
        name: "archive".into(),
        ..CollectionSpec::default()
    })
    .expect("valid definition");
    registry.register(other).expect("register");

    registry.unregister("stock").expect("unregister");
    assert!(registry.get("stock").is_none());
    assert_eq!(registry.list_names(), ["archive"]);

    let err = registry.unregister("stock").unwrap_err();
    assert_eq!(err.code_str(), "definition_not_found");
}
