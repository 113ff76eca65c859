use crate::field::{Access, SerializableField, StateField};
use crate::serializer::{BitArray, Serializer};
use std::sync::{Arc, PoisonError, RwLock};

/// Width of the cycle stamp at the head of every event.
pub const EVENT_CYCLE_BITS: usize = 32;

/// A readable field recording a set of data fields at the cycle it was signalled.
///
/// The downlinked bits are the 32-bit control cycle number followed by each
/// data field's bits, as captured by the last [`Event::signal`]. Events are
/// downlink-only.
#[derive(Debug)]
pub struct Event {
    name: String,
    data_fields: Vec<Arc<dyn SerializableField>>,
    cycle_no: Arc<StateField<u32>>,
    cycle_serializer: Serializer<u32>,
    captured: RwLock<BitArray>,
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        data_fields: Vec<Arc<dyn SerializableField>>,
        cycle_no: Arc<StateField<u32>>,
    ) -> Self {
        let cycle_serializer = Serializer::<u32>::new(u32::MAX);
        let bitsize = EVENT_CYCLE_BITS + data_fields.iter().map(|f| f.bitsize()).sum::<usize>();
        Self {
            name: name.into(),
            data_fields,
            cycle_no,
            cycle_serializer,
            captured: RwLock::new(vec![false; bitsize]),
        }
    }

    /// Captures the current cycle number and data field values.
    pub fn signal(&self) {
        let mut bits = self.cycle_serializer.serialize(&self.cycle_no.get());
        for field in &self.data_fields {
            bits.extend(field.serialize());
        }
        *self.captured.write().unwrap_or_else(PoisonError::into_inner) = bits;
    }

    pub fn data_fields(&self) -> &[Arc<dyn SerializableField>] {
        &self.data_fields
    }
}

impl SerializableField for Event {
    fn name(&self) -> &str {
        &self.name
    }

    fn access(&self) -> Access {
        Access::Readable
    }

    fn bitsize(&self) -> usize {
        EVENT_CYCLE_BITS + self.data_fields.iter().map(|f| f.bitsize()).sum::<usize>()
    }

    fn serialize(&self) -> BitArray {
        self.captured.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn deserialize(&self, _bits: &[bool]) -> bool {
        false
    }

    fn print(&self) -> String {
        self.print_bits(&self.serialize()).unwrap_or_default()
    }

    fn set_from_str(&self, _text: &str) -> bool {
        false
    }

    fn encode_str(&self, _text: &str) -> Option<BitArray> {
        None
    }

    fn print_bits(&self, bits: &[bool]) -> Option<String> {
        if bits.len() != self.bitsize() {
            return None;
        }
        let cycle = self.cycle_serializer.deserialize(&bits[..EVENT_CYCLE_BITS])?;
        let mut parts = vec![format!("ccno={cycle}")];
        let mut offset = EVENT_CYCLE_BITS;
        for field in &self.data_fields {
            let end = offset + field.bitsize();
            parts.push(format!("{}={}", field.name(), field.print_bits(&bits[offset..end])?));
            offset = end;
        }
        Some(parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_captures_values() {
        let cycle_no = Arc::new(StateField::writable("pan.cycle_no", Serializer::<u32>::new(u32::MAX)));
        let state = Arc::new(StateField::readable("pan.state", Serializer::<u8>::new(10)));
        let event = Event::new("pan.state_change", vec![state.clone() as Arc<dyn SerializableField>], cycle_no.clone());
        assert_eq!(event.bitsize(), 36);

        cycle_no.set(42);
        state.set(7);
        event.signal();
        state.set(2);

        assert_eq!(event.print(), "ccno=42 pan.state=7");
        assert!(!event.deserialize(&event.serialize()));
    }
}
