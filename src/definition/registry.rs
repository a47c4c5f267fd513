use crate::definition::model::CollectionDefinition;
use crate::error::DyndbError;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Point-in-time mapping of all live definitions. Readers always observe a
/// complete snapshot, never a partially-applied write.
pub type DefinitionSnapshot = HashMap<String, Arc<CollectionDefinition>>;

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Registered(Arc<CollectionDefinition>),
    Updated {
        old: Arc<CollectionDefinition>,
        new: Arc<CollectionDefinition>,
    },
    Unregistered {
        name: String,
    },
}

pub trait RegistryListener: Send + Sync {
    fn on_change(&self, event: &RegistryEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ListenerSet {
    next_id: u64,
    entries: Vec<(ListenerId, Arc<dyn RegistryListener>)>,
}

/// Concurrent, versioned store of live collection definitions.
///
/// Reads are lock-free loads of a single swappable snapshot reference.
/// Writes serialize behind one mutex, build the successor snapshot and
/// install it atomically; listeners are notified after the lock is
/// released, in registration order, exactly once per change.
pub struct DefinitionRegistry {
    snapshot: ArcSwap<DefinitionSnapshot>,
    write_lock: Mutex<()>,
    listeners: Mutex<ListenerSet>,
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(DefinitionSnapshot::new()),
            write_lock: Mutex::new(()),
            listeners: Mutex::new(ListenerSet {
                next_id: 0,
                entries: Vec::new(),
            }),
        }
    }

    /// Registers a new collection or installs a revision of an existing one.
    ///
    /// The version contract is enforced here: a re-registration must carry
    /// exactly `existing.version + 1`; the registry never renumbers on the
    /// caller's behalf. A first registration may arrive at any version of
    /// at least 1, so a registry refreshed from an external source of truth
    /// can replay definitions with history.
    pub fn register(
        &self,
        def: CollectionDefinition,
    ) -> Result<Arc<CollectionDefinition>, DyndbError> {
        let def = Arc::new(def);
        let event;
        {
            let _guard = self.write_lock.lock();
            let current = self.snapshot.load_full();
            let existing = current.get(&def.name).cloned();
            match &existing {
                None => {
                    if def.version < 1 {
                        return Err(DyndbError::VersionConflict {
                            collection: def.name.clone(),
                            expected: 1,
                            actual: def.version,
                        });
                    }
                }
                Some(old) => {
                    if def.version != old.version + 1 {
                        return Err(DyndbError::VersionConflict {
                            collection: def.name.clone(),
                            expected: old.version + 1,
                            actual: def.version,
                        });
                    }
                    if def.storage.mode != old.storage.mode {
                        return Err(DyndbError::Validation(format!(
                            "collection '{}' cannot change storage mode after registration",
                            def.name
                        )));
                    }
                }
            }
            let mut next: DefinitionSnapshot = (*current).clone();
            next.insert(def.name.clone(), Arc::clone(&def));
            self.snapshot.store(Arc::new(next));
            event = match existing {
                None => RegistryEvent::Registered(Arc::clone(&def)),
                Some(old) => RegistryEvent::Updated {
                    old,
                    new: Arc::clone(&def),
                },
            };
        }
        tracing::debug!(collection = %def.name, version = def.version, "definition registered");
        self.notify(&event);
        Ok(def)
    }

    pub fn unregister(&self, name: &str) -> Result<Arc<CollectionDefinition>, DyndbError> {
        let removed;
        {
            let _guard = self.write_lock.lock();
            let current = self.snapshot.load_full();
            let Some(def) = current.get(name).cloned() else {
                return Err(DyndbError::DefinitionNotFound {
                    collection: name.to_string(),
                });
            };
            let mut next: DefinitionSnapshot = (*current).clone();
            next.remove(name);
            self.snapshot.store(Arc::new(next));
            removed = def;
        }
        tracing::debug!(collection = %name, "definition unregistered");
        self.notify(&RegistryEvent::Unregistered {
            name: name.to_string(),
        });
        Ok(removed)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CollectionDefinition>> {
        self.snapshot.load().get(name).cloned()
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshot.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }

    pub fn add_listener(&self, listener: Arc<dyn RegistryListener>) -> ListenerId {
        let mut set = self.listeners.lock();
        set.next_id += 1;
        let id = ListenerId(set.next_id);
        set.entries.push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().entries.retain(|(lid, _)| *lid != id);
    }

    /// Fan-out runs outside any lock. A panicking listener is isolated so
    /// the remaining listeners still observe the change.
    fn notify(&self, event: &RegistryEvent) {
        let listeners: Vec<Arc<dyn RegistryListener>> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_change(event))).is_err() {
                tracing::warn!("registry listener panicked during notification");
            }
        }
    }
}
