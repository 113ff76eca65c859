use crate::bitstream::BitStream;
use crate::field::{SerializableField, StateField};
use crate::registry::{RegistryError, StateFieldRegistry, TaskId};
use crate::scheduler::ControlTask;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

pub const DOWNLINK_PTR_FIELD: &str = "downlink.ptr";
pub const DOWNLINK_SNAP_SIZE_FIELD: &str = "downlink.snap_size";

/// Bytes per radio packet.
pub const DEFAULT_PACKET_SIZE: usize = 70;

/// Number of `packet_size` chunks needed to carry `snap_size` bytes.
pub fn chunk_count(snap_size: usize, packet_size: usize) -> usize {
    snap_size.div_ceil(packet_size.max(1))
}

/// The `packet_size`-byte chunks covering the first `snap_size` bytes of a
/// snapshot buffer. The last chunk carries whatever padding follows.
pub fn snapshot_chunks(buffer: &[u8], snap_size: usize, packet_size: usize) -> impl Iterator<Item = &[u8]> {
    let packet_size = packet_size.max(1);
    // whole packets only, never past the buffer
    let covered = (chunk_count(snap_size, packet_size) * packet_size).min(buffer.len());
    buffer[..covered].chunks(packet_size)
}

/// Snapshot buffer length for `bits` of readable state: a whole number of
/// packets, at least one.
pub fn buffer_len(bits: usize, packet_size: usize) -> usize {
    let packet_size = packet_size.max(1);
    chunk_count(bits.div_ceil(8), packet_size).max(1) * packet_size
}

/// One field recovered from a downlinked snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedField {
    pub name: String,
    /// `None` when the bits were not a valid encoding.
    pub value: Option<String>,
}

/// Walks `data` with the readable field layout and prints every field that
/// is fully present. Stops at the first field the data does not cover.
pub fn decode_snapshot(fields: &[Arc<dyn SerializableField>], data: &[u8]) -> Vec<DecodedField> {
    let mut stream = BitStream::new(data);
    let mut decoded = Vec::with_capacity(fields.len());

    for field in fields {
        let mut bits = vec![false; field.bitsize()];
        // a cut snapshot ends mid-field
        if stream.next_bits(bits.len(), &mut bits) < bits.len() {
            break;
        }
        decoded.push(DecodedField {
            name: field.name().to_string(),
            value: field.print_bits(&bits),
        });
    }
    decoded
}

/// Control task that serializes every readable field into the snapshot
/// buffer once per cycle.
#[derive(Debug)]
pub struct DownlinkProducer {
    id: TaskId,
    packet_size: usize,
    fields: Vec<Arc<dyn SerializableField>>,
    snapshot: Arc<StateField<Vec<u8>>>,
    snap_size: Arc<StateField<usize>>,
}

impl DownlinkProducer {
    pub fn new(registry: &mut StateFieldRegistry, packet_size: usize) -> Result<Self, RegistryError> {
        debug_assert!(packet_size > 0, "Downlink packet size must be nonzero");
        let id = TaskId::from("downlink_producer");
        let snapshot = registry.create_internal_field(DOWNLINK_PTR_FIELD, Vec::<u8>::new())?;
        let snap_size = registry.create_internal_field(DOWNLINK_SNAP_SIZE_FIELD, 0usize)?;
        registry.add_writer(&id, DOWNLINK_PTR_FIELD)?;
        registry.add_writer(&id, DOWNLINK_SNAP_SIZE_FIELD)?;

        Ok(Self {
            id,
            packet_size: packet_size.max(1),
            fields: Vec::new(),
            snapshot,
            snap_size,
        })
    }

    /// Takes the readable field layout and sizes the snapshot buffer. Call
    /// once every task has registered its fields.
    pub fn init(&mut self, registry: &StateFieldRegistry) {
        self.fields = registry.readable_fields().to_vec();
        let len = buffer_len(self.snapshot_bits(), self.packet_size);
        self.snapshot.set(vec![0u8; len]);
        debug!(
            "Downlink snapshot: {} fields, {} bits, {} byte buffer",
            self.fields.len(),
            self.snapshot_bits(),
            len
        );
    }

    pub fn snapshot_bits(&self) -> usize {
        self.fields.iter().map(|field| field.bitsize()).sum()
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    pub fn fields(&self) -> &[Arc<dyn SerializableField>] {
        &self.fields
    }
}

impl ControlTask for DownlinkProducer {
    fn name(&self) -> &str {
        self.id.as_str()
    }

    fn execute(&mut self) {
        let fields = &self.fields;
        // fields packed back to back, no padding between them
        let bits_written = self.snapshot.update(|buffer| {
            let mut stream = BitStream::new(buffer.as_mut_slice());
            fields.iter().map(|field| stream.edit_bits(&field.serialize())).sum::<usize>()
        });
        debug_assert_eq!(bits_written, self.snapshot_bits(), "Snapshot buffer too small");

        // trailing bits of the last byte stay zero
        self.snap_size.set(bits_written.div_ceil(8));
        trace!("Downlink snapshot rebuilt: {} bytes", bits_written.div_ceil(8));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::Serializer;

    #[test]
    fn test_chunking() {
        assert_eq!(chunk_count(0, 70), 0);
        assert_eq!(chunk_count(18, 70), 1);
        assert_eq!(chunk_count(70, 70), 1);
        assert_eq!(chunk_count(71, 70), 2);
        assert_eq!(buffer_len(0, 70), 70);
        assert_eq!(buffer_len(561, 70), 140);

        let buffer = [7u8; 140];
        let chunks: Vec<&[u8]> = snapshot_chunks(&buffer, 71, 70).collect();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|chunk| chunk.len() == 70));
    }

    #[test]
    fn test_snapshot_in_registration_order() {
        let mut registry = StateFieldRegistry::new();
        let a = registry.create_readable_field("test.a", Serializer::<u8>::new(7)).unwrap();
        let b = registry.create_writable_field("test.b", Serializer::<bool>::new()).unwrap();
        let mut producer = DownlinkProducer::new(&mut registry, 4).unwrap();
        producer.init(&registry);

        a.set(5);
        b.set(true);
        producer.execute();

        let snapshot = registry.find_internal_field::<Vec<u8>>(DOWNLINK_PTR_FIELD).unwrap().get();
        assert_eq!(snapshot, vec![0b0000_1101, 0, 0, 0]);
        assert_eq!(registry.find_internal_field::<usize>(DOWNLINK_SNAP_SIZE_FIELD).unwrap().get(), 1);

        let decoded = decode_snapshot(producer.fields(), &snapshot);
        assert_eq!(decoded[0].value.as_deref(), Some("5"));
        assert_eq!(decoded[1].value.as_deref(), Some("true"));
    }
}
