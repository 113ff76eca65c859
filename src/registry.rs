use crate::event::Event;
use crate::field::{Access, SerializableField, StateField};
use crate::serializer::{Serializable, Serializer};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Name of a control task, used as the key of permission sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("field `{0}` is already registered")]
    DuplicateField(String),
    #[error("field `{0}` is not registered")]
    MissingField(String),
    #[error("field `{0}` has a different access class or value type")]
    TypeMismatch(String),
    #[error("field `{field}` is already written by task `{owner}`")]
    WriterConflict { field: String, owner: TaskId },
}

struct Entry {
    access: Access,
    handle: Arc<dyn Any + Send + Sync>,
}

/// Catalog of every state field plus the per-task permission sets.
///
/// Populated during single-threaded start-up, then only read. Readable and
/// writable fields keep their registration order, which fixes both the
/// downlink snapshot layout and the uplink field indices.
#[derive(Default)]
pub struct StateFieldRegistry {
    fields: HashMap<String, Entry>,
    readable: Vec<Arc<dyn SerializableField>>,
    writable: Vec<Arc<dyn SerializableField>>,
    readers: HashMap<TaskId, BTreeSet<String>>,
    writers: HashMap<TaskId, BTreeSet<String>>,
}

impl fmt::Debug for StateFieldRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateFieldRegistry")
            .field("fields", &self.fields.len())
            .field("readable", &self.readable.len())
            .field("writable", &self.writable.len())
            .field("readers", &self.readers)
            .field("writers", &self.writers)
            .finish()
    }
}

impl StateFieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn access(&self, name: &str) -> Option<Access> {
        self.fields.get(name).map(|entry| entry.access)
    }

    fn insert(&mut self, name: &str, access: Access, handle: Arc<dyn Any + Send + Sync>) -> Result<(), RegistryError> {
        if self.fields.contains_key(name) {
            return Err(RegistryError::DuplicateField(name.to_string()));
        }
        self.fields.insert(name.to_string(), Entry { access, handle });
        Ok(())
    }

    pub fn create_internal_field<T>(&mut self, name: &str, initial: T) -> Result<Arc<StateField<T>>, RegistryError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let field = Arc::new(StateField::internal(name, initial));
        self.add_internal_field(field.clone())?;
        Ok(field)
    }

    pub fn create_readable_field<T: Serializable>(
        &mut self,
        name: &str,
        serializer: Serializer<T>,
    ) -> Result<Arc<StateField<T>>, RegistryError> {
        let field = Arc::new(StateField::readable(name, serializer));
        self.add_field(field.clone())?;
        Ok(field)
    }

    pub fn create_writable_field<T: Serializable>(
        &mut self,
        name: &str,
        serializer: Serializer<T>,
    ) -> Result<Arc<StateField<T>>, RegistryError> {
        let field = Arc::new(StateField::writable(name, serializer));
        self.add_field(field.clone())?;
        Ok(field)
    }

    pub fn add_internal_field<T>(&mut self, field: Arc<StateField<T>>) -> Result<(), RegistryError>
    where
        T: Clone + Send + Sync + 'static,
    {
        if field.access() != Access::Internal {
            return Err(RegistryError::TypeMismatch(field.name().to_string()));
        }
        let name = field.name().to_string();
        self.insert(&name, Access::Internal, field)
    }

    /// Registers a field built by its owning task, filed by its access class.
    pub fn add_field<T: Serializable>(&mut self, field: Arc<StateField<T>>) -> Result<(), RegistryError> {
        let access = field.access();
        if access == Access::Internal {
            return self.add_internal_field(field);
        }

        let name = field.name().to_string();
        self.insert(&name, access, field.clone())?;
        // writable fields are downlinked too
        self.readable.push(field.clone());
        if access.is_writable() {
            self.writable.push(field);
        }
        Ok(())
    }

    pub fn add_event(&mut self, event: Arc<Event>) -> Result<(), RegistryError> {
        let name = event.name().to_string();
        self.insert(&name, Access::Readable, event.clone())?;
        self.readable.push(event);
        Ok(())
    }

    fn lookup<T: Send + Sync + 'static>(&self, name: &str, accept: impl Fn(Access) -> bool) -> Option<Arc<T>> {
        let entry = self.fields.get(name)?;
        if !accept(entry.access) {
            return None;
        }
        // wrong value type looks the same as a missing field here
        entry.handle.clone().downcast::<T>().ok()
    }

    /// Finds a field of any access class.
    pub fn find_field<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Option<Arc<StateField<T>>> {
        self.lookup(name, |_| true)
    }

    pub fn find_internal_field<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Option<Arc<StateField<T>>> {
        self.lookup(name, |access| access == Access::Internal)
    }

    /// Writable fields are readable too and are found here as well.
    pub fn find_readable_field<T: Serializable>(&self, name: &str) -> Option<Arc<StateField<T>>> {
        self.lookup(name, Access::is_readable)
    }

    pub fn find_writable_field<T: Serializable>(&self, name: &str) -> Option<Arc<StateField<T>>> {
        self.lookup(name, Access::is_writable)
    }

    pub fn find_event(&self, name: &str) -> Option<Arc<Event>> {
        self.lookup(name, |_| true)
    }

    fn require<T>(&self, name: &str, found: Option<Arc<T>>) -> Result<Arc<T>, RegistryError> {
        found.ok_or_else(|| {
            // name exists but class or type did not match
            if self.contains(name) {
                RegistryError::TypeMismatch(name.to_string())
            } else {
                RegistryError::MissingField(name.to_string())
            }
        })
    }

    pub fn require_field<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<StateField<T>>, RegistryError> {
        self.require(name, self.find_field(name))
    }

    pub fn require_internal_field<T: Clone + Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<Arc<StateField<T>>, RegistryError> {
        self.require(name, self.find_internal_field(name))
    }

    pub fn require_readable_field<T: Serializable>(&self, name: &str) -> Result<Arc<StateField<T>>, RegistryError> {
        self.require(name, self.find_readable_field(name))
    }

    pub fn require_writable_field<T: Serializable>(&self, name: &str) -> Result<Arc<StateField<T>>, RegistryError> {
        self.require(name, self.find_writable_field(name))
    }

    /// Readable and writable fields (and events) in registration order.
    pub fn readable_fields(&self) -> &[Arc<dyn SerializableField>] {
        &self.readable
    }

    pub fn writable_fields(&self) -> &[Arc<dyn SerializableField>] {
        &self.writable
    }

    pub fn find_serializable(&self, name: &str) -> Option<&Arc<dyn SerializableField>> {
        self.readable.iter().find(|field| field.name() == name)
    }

    /// 1-based uplink index of a writable field. Index 0 is the terminator.
    pub fn writable_index(&self, name: &str) -> Option<usize> {
        self.writable.iter().position(|field| field.name() == name).map(|i| i + 1)
    }

    /// Total width of a downlink snapshot in bits.
    pub fn snapshot_bits(&self) -> usize {
        self.readable.iter().map(|field| field.bitsize()).sum()
    }

    pub fn add_reader(&mut self, task: &TaskId, name: &str) -> Result<(), RegistryError> {
        if !self.contains(name) {
            return Err(RegistryError::MissingField(name.to_string()));
        }
        self.readers.entry(task.clone()).or_default().insert(name.to_string());
        Ok(())
    }

    /// Grants `task` write access. A field has at most one writer task.
    pub fn add_writer(&mut self, task: &TaskId, name: &str) -> Result<(), RegistryError> {
        if !self.contains(name) {
            return Err(RegistryError::MissingField(name.to_string()));
        }
        if let Some(owner) = self.writer_of(name) {
            if owner != task {
                return Err(RegistryError::WriterConflict {
                    field: name.to_string(),
                    owner: owner.clone(),
                });
            }
        }
        self.writers.entry(task.clone()).or_default().insert(name.to_string());
        Ok(())
    }

    pub fn writer_of(&self, name: &str) -> Option<&TaskId> {
        self.writers
            .iter()
            .find(|(_, names)| names.contains(name))
            .map(|(task, _)| task)
    }

    pub fn can_read(&self, task: &TaskId, name: &str) -> bool {
        self.readers.get(task).is_some_and(|names| names.contains(name))
    }

    pub fn can_write(&self, task: &TaskId, name: &str) -> bool {
        self.writers.get(task).is_some_and(|names| names.contains(name))
    }
}
