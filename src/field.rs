use crate::serializer::{BitArray, Serializable, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::{PoisonError, RwLock};

/// Who may see a field outside the owning process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    /// Process-local, never sent over the radio.
    Internal,
    /// Downlinked in every snapshot.
    Readable,
    /// Downlinked, and settable from the ground through the uplink.
    Writable,
}

impl Access {
    pub fn is_readable(self) -> bool {
        matches!(self, Access::Readable | Access::Writable)
    }

    pub fn is_writable(self) -> bool {
        self == Access::Writable
    }
}

/// A named piece of shared state.
///
/// Handles are shared as `Arc<StateField<T>>` between the registry and the
/// tasks that use them. Every readable or writable field carries the
/// serializer that fixes its wire width.
#[derive(Debug)]
pub struct StateField<T> {
    name: String,
    access: Access,
    value: RwLock<T>,
    serializer: Option<Serializer<T>>,
}

impl<T: Clone + Send + Sync + 'static> StateField<T> {
    pub fn internal(name: impl Into<String>, initial: T) -> Self {
        Self {
            name: name.into(),
            access: Access::Internal,
            value: RwLock::new(initial),
            serializer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn get(&self) -> T {
        self.value.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, value: T) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Mutates the value in place under the write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.value.write().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<T: Serializable> StateField<T> {
    pub fn readable(name: impl Into<String>, serializer: Serializer<T>) -> Self {
        Self::with_serializer(name, Access::Readable, serializer)
    }

    pub fn writable(name: impl Into<String>, serializer: Serializer<T>) -> Self {
        Self::with_serializer(name, Access::Writable, serializer)
    }

    fn with_serializer(name: impl Into<String>, access: Access, serializer: Serializer<T>) -> Self {
        Self {
            name: name.into(),
            access,
            value: RwLock::new(T::default()),
            serializer: Some(serializer),
        }
    }

    pub fn serializer(&self) -> Option<&Serializer<T>> {
        self.serializer.as_ref()
    }
}

/// Type-erased view of a readable or writable field, used by the downlink
/// and uplink codecs which walk fields without knowing their value types.
pub trait SerializableField: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn access(&self) -> Access;

    fn bitsize(&self) -> usize;

    /// Current value, exactly `bitsize()` bits.
    fn serialize(&self) -> BitArray;

    /// Decodes `bits` and stores the value. Returns false, leaving the
    /// value untouched, if the bits are not a valid encoding.
    fn deserialize(&self, bits: &[bool]) -> bool;

    /// Current value in text form.
    fn print(&self) -> String;

    /// Parses text and stores the value. Returns false on a parse error.
    fn set_from_str(&self, text: &str) -> bool;

    /// Encodes a value given in text form without touching the field.
    fn encode_str(&self, text: &str) -> Option<BitArray>;

    /// Decodes bits into text form without touching the field.
    fn print_bits(&self, bits: &[bool]) -> Option<String>;
}

impl<T: Serializable> SerializableField for StateField<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn access(&self) -> Access {
        self.access
    }

    fn bitsize(&self) -> usize {
        self.serializer.as_ref().map_or(0, Serializer::bitsize)
    }

    fn serialize(&self) -> BitArray {
        match &self.serializer {
            Some(sr) => sr.serialize(&self.get()),
            None => BitArray::new(),
        }
    }

    fn deserialize(&self, bits: &[bool]) -> bool {
        match self.serializer.as_ref().and_then(|sr| sr.deserialize(bits)) {
            Some(value) => {
                self.set(value);
                true
            }
            None => false,
        }
    }

    fn print(&self) -> String {
        T::print(&self.get())
    }

    fn set_from_str(&self, text: &str) -> bool {
        match T::parse(text) {
            Some(value) => {
                self.set(value);
                true
            }
            None => false,
        }
    }

    fn encode_str(&self, text: &str) -> Option<BitArray> {
        let sr = self.serializer.as_ref()?;
        T::parse(text).map(|value| sr.serialize(&value))
    }

    fn print_bits(&self, bits: &[bool]) -> Option<String> {
        let sr = self.serializer.as_ref()?;
        sr.deserialize(bits).map(|value| T::print(&value))
    }
}
