use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::descriptor::{TypeDescriptor, TypeShape, FIRST_USER_TYPE_ID};
use crate::error::{CodecError, Result};

/// Process-wide mapping between stable ids and type descriptors.
///
/// Registration is copy-on-write: every `register` builds a new immutable
/// snapshot behind the lock, so an in-flight codec call keeps the snapshot it
/// started with for its whole duration. Registration after first use is
/// allowed but expected to be rare.
pub struct TypeRegistry {
    inner: RwLock<Arc<RegistrySnapshot>>,
}

/// An immutable view of the registry, taken once per codec call.
#[derive(Default)]
pub struct RegistrySnapshot {
    by_id: HashMap<u32, Arc<TypeDescriptor>>,
    by_name: HashMap<Arc<str>, u32>,
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(RegistrySnapshot::default())),
        }
    }

    /// Register a type descriptor under its stable id and name.
    ///
    /// Fails with [`CodecError::DuplicateRegistration`] when the id or name
    /// is already bound, or when the id falls inside the reserved range
    /// below [`FIRST_USER_TYPE_ID`].
    pub fn register(&self, descriptor: TypeDescriptor) -> Result<()> {
        if descriptor.stable_id < FIRST_USER_TYPE_ID {
            return Err(CodecError::DuplicateRegistration(format!(
                "stable id {} is inside the reserved range 0..{FIRST_USER_TYPE_ID}",
                descriptor.stable_id
            )));
        }

        let mut guard = self.inner.write().expect("registry lock poisoned");
        if guard.by_id.contains_key(&descriptor.stable_id) {
            return Err(CodecError::DuplicateRegistration(format!(
                "stable id {} is already bound",
                descriptor.stable_id
            )));
        }
        if guard.by_name.contains_key(&descriptor.name) {
            return Err(CodecError::DuplicateRegistration(format!(
                "type name {} is already bound",
                descriptor.name
            )));
        }

        debug!(id = descriptor.stable_id, name = %descriptor.name, "registering type");

        let mut next = RegistrySnapshot {
            by_id: guard.by_id.clone(),
            by_name: guard.by_name.clone(),
        };
        next.by_name
            .insert(descriptor.name.clone(), descriptor.stable_id);
        next.by_id
            .insert(descriptor.stable_id, Arc::new(descriptor));
        *guard = Arc::new(next);
        Ok(())
    }

    /// The snapshot a codec call should hold for its duration.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner.read().expect("registry lock poisoned").clone()
    }

    /// Resolve a descriptor by stable id against the current snapshot.
    pub fn resolve_by_id(&self, id: u32) -> Result<Arc<TypeDescriptor>> {
        self.snapshot().by_id(id).cloned()
    }

    /// Resolve a descriptor by name against the current snapshot.
    pub fn resolve_by_name(&self, name: &str) -> Result<Arc<TypeDescriptor>> {
        self.snapshot().by_name(name).cloned()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrySnapshot {
    /// Look up a descriptor by stable id.
    pub fn by_id(&self, id: u32) -> Result<&Arc<TypeDescriptor>> {
        self.by_id
            .get(&id)
            .ok_or_else(|| CodecError::UnknownType(format!("stable id {id}")))
    }

    /// Look up a descriptor by name.
    pub fn by_name(&self, name: &str) -> Result<&Arc<TypeDescriptor>> {
        match self.by_name.get(name) {
            Some(id) => self.by_id(*id),
            None => Err(CodecError::UnknownType(format!("name {name:?}"))),
        }
    }

    /// True when `id` is registered.
    pub fn contains(&self, id: u32) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// True when `id` equals `ancestor` or reaches it through its `extends`
    /// chain. A malformed cyclic chain terminates false.
    pub fn is_subtype(&self, id: u32, ancestor: u32) -> bool {
        let mut current = id;
        let mut hops = 0usize;
        loop {
            if current == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.by_id.len() {
                return false;
            }
            let parent = match self.by_id.get(&current).map(|d| &d.shape) {
                Some(TypeShape::Object(shape)) => shape.extends,
                _ => None,
            };
            match parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }
}
