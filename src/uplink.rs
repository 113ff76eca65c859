//! Ground-to-satellite field updates.
//!
//! An uplink packet is a run of `(index, value)` records packed LSB-first.
//! The index is `ceil(log2(W + 1))` bits wide, where W is the number of
//! writable fields, and selects the i-th registered writable field
//! (1-based). Its value follows in exactly that field's width. Index 0
//! terminates the packet.

use crate::bitstream::BitStream;
use crate::field::{SerializableField, StateField};
use crate::registry::{RegistryError, StateFieldRegistry, TaskId};
use crate::scheduler::ControlTask;
use crate::serializer::{bit_width, push_uint, BitArray, Serializable};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const UPLINK_PTR_FIELD: &str = "uplink.ptr";
pub const UPLINK_LEN_FIELD: &str = "uplink.len";
/// Count of MT messages the radio has delivered.
pub const UPLINK_SEQ_FIELD: &str = "uplink.seq";
/// Value of `uplink.seq` the consumer last processed.
pub const UPLINK_ACK_FIELD: &str = "uplink.ack";

/// Largest mobile-terminated message the modem can hand us.
pub const MAX_UPLINK_SIZE: usize = 270;

/// Width of the record index for a registry with `writable_count` writable fields.
pub fn index_bits(writable_count: usize) -> usize {
    bit_width(writable_count as u64)
}

/// How parsing of an uplink packet ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UplinkOutcome {
    /// A zero index was read.
    Terminated,
    /// Ran out of data at a record boundary.
    Exhausted,
    /// Index larger than the number of writable fields.
    InvalidIndex(u64),
    /// The packet ended partway through a value.
    Truncated { field: String },
    /// The value bits are not a valid encoding for the field.
    DecodeFailed { field: String },
}

impl UplinkOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, UplinkOutcome::Terminated | UplinkOutcome::Exhausted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkReport {
    /// Records applied before parsing stopped.
    pub applied: usize,
    pub outcome: UplinkOutcome,
}

/// Applies the records of an uplink packet to the writable fields in order.
///
/// Records before a malformed one stay applied; nothing after it is.
pub fn apply_uplink(writable: &[Arc<dyn SerializableField>], data: &[u8]) -> UplinkReport {
    let index_size = index_bits(writable.len());
    let mut stream = BitStream::new(data);
    let mut applied = 0;

    let outcome = loop {
        let Some(index) = stream.read_uint(index_size) else {
            break UplinkOutcome::Exhausted;
        };
        if index == 0 {
            break UplinkOutcome::Terminated;
        }
        // indices are 1-based
        let Some(field) = usize::try_from(index - 1).ok().and_then(|i| writable.get(i)) else {
            break UplinkOutcome::InvalidIndex(index);
        };

        let mut bits = vec![false; field.bitsize()];
        if stream.remaining_bits() < bits.len() || stream.next_bits(bits.len(), &mut bits) < bits.len() {
            break UplinkOutcome::Truncated { field: field.name().to_string() };
        }
        // a failed decode leaves the field untouched
        if !field.deserialize(&bits) {
            break UplinkOutcome::DecodeFailed { field: field.name().to_string() };
        }
        debug!("Uplink set {} = {}", field.name(), field.print());
        applied += 1;
    };

    UplinkReport { applied, outcome }
}

/// Control task that applies any uplink the radio has received.
///
/// The radio owns `uplink.ptr`, `uplink.len` and `uplink.seq`. The consumer
/// only writes `uplink.ack`; the radio resets `uplink.len` to 0 once the ack
/// catches up with the sequence number.
#[derive(Debug)]
pub struct UplinkConsumer {
    id: TaskId,
    writable: Vec<Arc<dyn SerializableField>>,
    uplink_ptr: Arc<StateField<Vec<u8>>>,
    uplink_len: Arc<StateField<usize>>,
    uplink_seq: Arc<StateField<u32>>,
    uplink_ack: Arc<StateField<u32>>,
    last_report: Option<UplinkReport>,
}

impl UplinkConsumer {
    /// Creates the `uplink.*` handoff fields. The writable field table is
    /// taken later by [`UplinkConsumer::init`], once every task has
    /// registered its fields.
    pub fn new(registry: &mut StateFieldRegistry) -> Result<Self, RegistryError> {
        let id = TaskId::from("uplink_consumer");
        let uplink_ptr = registry.create_internal_field(UPLINK_PTR_FIELD, vec![0u8; MAX_UPLINK_SIZE])?;
        let uplink_len = registry.create_internal_field(UPLINK_LEN_FIELD, 0usize)?;
        let uplink_seq = registry.create_internal_field(UPLINK_SEQ_FIELD, 0u32)?;
        let uplink_ack = registry.create_internal_field(UPLINK_ACK_FIELD, 0u32)?;
        for name in [UPLINK_PTR_FIELD, UPLINK_LEN_FIELD, UPLINK_SEQ_FIELD] {
            registry.add_reader(&id, name)?;
        }
        registry.add_writer(&id, UPLINK_ACK_FIELD)?;

        Ok(Self {
            id,
            writable: Vec::new(),
            uplink_ptr,
            uplink_len,
            uplink_seq,
            uplink_ack,
            last_report: None,
        })
    }

    pub fn init(&mut self, registry: &StateFieldRegistry) {
        self.writable = registry.writable_fields().to_vec();
    }

    pub fn index_size(&self) -> usize {
        index_bits(self.writable.len())
    }

    pub fn last_report(&self) -> Option<&UplinkReport> {
        self.last_report.as_ref()
    }
}

impl ControlTask for UplinkConsumer {
    fn name(&self) -> &str {
        self.id.as_str()
    }

    fn execute(&mut self) {
        let len = self.uplink_len.get();
        let seq = self.uplink_seq.get();
        // already handled, waiting for the radio to release the buffer
        if len == 0 || seq == self.uplink_ack.get() {
            return;
        }

        let data = self.uplink_ptr.get();
        let report = apply_uplink(&self.writable, &data[..len.min(data.len())]);
        if report.outcome.is_clean() {
            info!("Uplink applied {} field(s)", report.applied);
        } else {
            warn!("Uplink rejected after {} field(s): {:?}", report.applied, report.outcome);
        }

        self.uplink_ack.set(seq);
        self.last_report = Some(report);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UplinkError {
    #[error("`{0}` is not a writable field")]
    UnknownField(String),
    #[error("`{0}` does not hold the given value type")]
    TypeMismatch(String),
    #[error("cannot parse `{value}` for field `{field}`")]
    ParseFailed { field: String, value: String },
    #[error("uplink needs {needed} bytes but only {capacity} are available")]
    TooLarge { needed: usize, capacity: usize },
}

/// Builds uplink packets against a registry's writable field table.
#[derive(Debug)]
pub struct UplinkProducer<'a> {
    registry: &'a StateFieldRegistry,
    index_size: usize,
    bits: BitArray,
}

impl<'a> UplinkProducer<'a> {
    pub fn new(registry: &'a StateFieldRegistry) -> Self {
        Self {
            registry,
            index_size: index_bits(registry.writable_fields().len()),
            bits: BitArray::new(),
        }
    }

    fn index_of(&self, name: &str) -> Result<usize, UplinkError> {
        self.registry
            .writable_index(name)
            .ok_or_else(|| UplinkError::UnknownField(name.to_string()))
    }

    pub fn add_field<T: Serializable>(&mut self, name: &str, value: &T) -> Result<(), UplinkError> {
        let index = self.index_of(name)?;
        let field = self
            .registry
            .find_writable_field::<T>(name)
            .ok_or_else(|| UplinkError::TypeMismatch(name.to_string()))?;
        let value_bits = field
            .serializer()
            .map(|sr| sr.serialize(value))
            .ok_or_else(|| UplinkError::TypeMismatch(name.to_string()))?;

        push_uint(&mut self.bits, index as u64, self.index_size);
        self.bits.extend(value_bits);
        Ok(())
    }

    /// Adds a record whose value is given in the field's text form.
    pub fn add_str(&mut self, name: &str, text: &str) -> Result<(), UplinkError> {
        let index = self.index_of(name)?;
        let field = &self.registry.writable_fields()[index - 1];
        let value_bits = field.encode_str(text).ok_or_else(|| UplinkError::ParseFailed {
            field: name.to_string(),
            value: text.to_string(),
        })?;

        push_uint(&mut self.bits, index as u64, self.index_size);
        self.bits.extend(value_bits);
        Ok(())
    }

    /// Bits of the records added so far, without terminator.
    pub fn bitsize(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Packs the records into at most `capacity` bytes, appending the
    /// terminator when it fits.
    pub fn to_packet(&self, capacity: usize) -> Result<Vec<u8>, UplinkError> {
        let needed = self.bits.len().div_ceil(8);
        if needed > capacity {
            return Err(UplinkError::TooLarge { needed, capacity });
        }

        let with_terminator = (self.bits.len() + self.index_size).div_ceil(8);
        let mut packet = vec![0u8; with_terminator.min(capacity)];
        let mut stream = BitStream::new(packet.as_mut_slice());
        stream.edit_bits(&self.bits);
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::Serializer;

    fn registry_with(count: usize) -> StateFieldRegistry {
        let mut registry = StateFieldRegistry::new();
        for i in 0..count {
            registry
                .create_writable_field(&format!("test.flag{i}"), Serializer::<bool>::new())
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_index_width() {
        assert_eq!(index_bits(1), 1);
        assert_eq!(index_bits(2), 2);
        assert_eq!(index_bits(3), 2);
        assert_eq!(index_bits(4), 3);
        assert_eq!(index_bits(255), 8);
    }

    #[test]
    fn test_invalid_index_stops_parsing() {
        let registry = registry_with(2);
        // index 3 with only two writable fields
        let report = apply_uplink(registry.writable_fields(), &[0b0000_0011]);
        assert_eq!(report, UplinkReport { applied: 0, outcome: UplinkOutcome::InvalidIndex(3) });
    }

    #[test]
    fn test_producer_rejects_unknown_and_mistyped() {
        let registry = registry_with(2);
        let mut producer = UplinkProducer::new(&registry);
        assert_eq!(
            producer.add_field("test.missing", &true),
            Err(UplinkError::UnknownField("test.missing".into()))
        );
        assert_eq!(
            producer.add_field("test.flag0", &3u8),
            Err(UplinkError::TypeMismatch("test.flag0".into()))
        );
        assert!(matches!(producer.add_str("test.flag1", "maybe"), Err(UplinkError::ParseFailed { .. })));
        assert!(producer.is_empty());
    }
}
