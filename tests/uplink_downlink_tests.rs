use pancore::downlink::{
    chunk_count, decode_snapshot, snapshot_chunks, DownlinkProducer, DOWNLINK_PTR_FIELD, DOWNLINK_SNAP_SIZE_FIELD,
};
use pancore::scheduler::ControlTask;
use pancore::serializer::Serializer;
use pancore::uplink::{
    apply_uplink, UplinkConsumer, UplinkError, UplinkOutcome, UplinkProducer, UplinkReport, UPLINK_ACK_FIELD,
    UPLINK_LEN_FIELD, UPLINK_PTR_FIELD, UPLINK_SEQ_FIELD,
};
use pancore::{BitStream, StateFieldRegistry};

/// Registry with writable fields A (bool) and B (8-bit unsigned).
fn two_field_registry() -> StateFieldRegistry {
    let mut registry = StateFieldRegistry::new();
    registry.create_writable_field("test.a", Serializer::<bool>::new()).unwrap();
    registry.create_writable_field("test.b", Serializer::<u8>::new(255)).unwrap();
    registry
}

fn hand_packed(records: &[(usize, u64)]) -> Vec<u8> {
    let mut buf = vec![0u8; 4];
    let mut stream = BitStream::new(buf.as_mut_slice());
    for &(bits, value) in records {
        stream.write_uint(bits, value);
    }
    buf
}

#[test]
fn test_two_field_uplink_applies_in_order() {
    let registry = two_field_registry();
    // index 1, A = 1, index 2, B = 0x7F, terminator; 2-bit indices
    let packet = hand_packed(&[(2, 1), (1, 1), (2, 2), (8, 0x7F), (2, 0)]);

    let report = apply_uplink(registry.writable_fields(), &packet);
    assert_eq!(report, UplinkReport { applied: 2, outcome: UplinkOutcome::Terminated });
    assert!(registry.find_writable_field::<bool>("test.a").unwrap().get());
    assert_eq!(registry.find_writable_field::<u8>("test.b").unwrap().get(), 0x7F);
}

#[test]
fn test_producer_matches_wire_layout() {
    let registry = two_field_registry();
    let mut producer = UplinkProducer::new(&registry);
    producer.add_field("test.a", &true).unwrap();
    producer.add_str("test.b", "127").unwrap();
    assert_eq!(producer.bitsize(), 13);

    let packet = producer.to_packet(16).unwrap();
    assert_eq!(packet, vec![0xF5, 0x0F]);

    // no room for the terminator: the packet simply ends
    let packet = producer.to_packet(2).unwrap();
    assert_eq!(packet.len(), 2);
    assert!(matches!(producer.to_packet(1), Err(UplinkError::TooLarge { needed: 2, capacity: 1 })));
}

#[test]
fn test_bad_record_stops_processing() {
    let registry = two_field_registry();
    let b = registry.find_writable_field::<u8>("test.b").unwrap();

    // index 2 = 9, then index 3 which does not exist, then index 2 = 200
    let packet = hand_packed(&[(2, 2), (8, 9), (2, 3), (2, 2), (8, 200)]);
    let report = apply_uplink(registry.writable_fields(), &packet);
    assert_eq!(report, UplinkReport { applied: 1, outcome: UplinkOutcome::InvalidIndex(3) });
    assert_eq!(b.get(), 9);
}

#[test]
fn test_value_decode_failure_is_reported() {
    let mut registry = StateFieldRegistry::new();
    registry.create_writable_field("adcs.state", Serializer::<u8>::new(10)).unwrap();
    let state = registry.find_writable_field::<u8>("adcs.state").unwrap();
    state.set(2);

    // 1-bit index, then 15 which fits in 4 bits but exceeds the max of 10
    let packet = hand_packed(&[(1, 1), (4, 15)]);
    let report = apply_uplink(registry.writable_fields(), &packet);
    assert_eq!(
        report.outcome,
        UplinkOutcome::DecodeFailed { field: "adcs.state".into() }
    );
    assert_eq!(report.applied, 0);
    assert_eq!(state.get(), 2);
}

#[test]
fn test_truncated_value() {
    let registry = two_field_registry();
    // index 2 followed by only 6 of B's 8 bits
    let report = apply_uplink(registry.writable_fields(), &[0b1111_1110]);
    assert_eq!(report.outcome, UplinkOutcome::Truncated { field: "test.b".into() });
}

#[test]
fn test_consumer_applies_once_and_acknowledges() {
    let mut registry = two_field_registry();
    let mut consumer = UplinkConsumer::new(&mut registry).unwrap();
    consumer.init(&registry);
    assert_eq!(consumer.index_size(), 2);

    let ptr = registry.find_internal_field::<Vec<u8>>(UPLINK_PTR_FIELD).unwrap();
    let len = registry.find_internal_field::<usize>(UPLINK_LEN_FIELD).unwrap();
    let seq = registry.find_internal_field::<u32>(UPLINK_SEQ_FIELD).unwrap();
    let ack = registry.find_internal_field::<u32>(UPLINK_ACK_FIELD).unwrap();

    // nothing pending
    consumer.execute();
    assert!(consumer.last_report().is_none());

    // what the radio does on delivery
    let mut producer = UplinkProducer::new(&registry);
    producer.add_field("test.b", &42u8).unwrap();
    let packet = producer.to_packet(ptr.get().len()).unwrap();
    ptr.update(|buf| buf[..packet.len()].copy_from_slice(&packet));
    len.set(packet.len());
    seq.set(1);

    consumer.execute();
    let b = registry.find_writable_field::<u8>("test.b").unwrap();
    assert_eq!(b.get(), 42);
    assert_eq!(ack.get(), 1);
    assert_eq!(consumer.last_report().unwrap().applied, 1);
    // the length belongs to the radio
    assert_eq!(len.get(), packet.len());

    // an acknowledged message is not applied twice
    b.set(3);
    consumer.execute();
    assert_eq!(b.get(), 3);
}

#[test]
fn test_snapshot_of_140_bits_is_one_chunk() {
    let mut registry = StateFieldRegistry::new();
    let pos = registry
        .create_readable_field("orbit.pos", Serializer::<[f64; 3]>::new(-1.0e4, 1.0e4, 32))
        .unwrap();
    registry.create_readable_field("pan.cycle_no", Serializer::<u32>::new(u32::MAX)).unwrap();
    registry.create_writable_field("pan.sat_designation", Serializer::<u8>::new(15)).unwrap();
    registry.create_readable_field("pan.state", Serializer::<u8>::new(15)).unwrap();
    registry.create_readable_field("adcs.state", Serializer::<u8>::new(15)).unwrap();
    // 96 + 32 + 4 + 4 + 4
    assert_eq!(registry.readable_fields().len(), 5);
    assert_eq!(registry.snapshot_bits(), 140);

    let mut producer = DownlinkProducer::new(&mut registry, 70).unwrap();
    producer.init(&registry);
    pos.set([1234.5, -42.0, 0.0]);
    producer.execute();

    let snapshot = registry.find_internal_field::<Vec<u8>>(DOWNLINK_PTR_FIELD).unwrap().get();
    let snap_size = registry.find_internal_field::<usize>(DOWNLINK_SNAP_SIZE_FIELD).unwrap().get();
    assert_eq!(snap_size, 18);
    assert_eq!(snapshot.len(), 70);
    assert_eq!(chunk_count(snap_size, 70), 1);
    assert_eq!(snapshot_chunks(&snapshot, snap_size, 70).count(), 1);

    let decoded = decode_snapshot(registry.readable_fields(), &snapshot[..snap_size]);
    assert_eq!(decoded.len(), 5);
    assert_eq!(decoded[0].name, "orbit.pos");
    let values: Vec<f64> = decoded[0]
        .value
        .as_deref()
        .unwrap()
        .split(',')
        .map(|v| v.parse().unwrap())
        .collect();
    assert!((values[0] - 1234.5).abs() < 0.01);
    assert!((values[1] + 42.0).abs() < 0.01);
}

#[test]
fn test_snapshot_spanning_packets() {
    let mut registry = StateFieldRegistry::new();
    for i in 0..20 {
        registry
            .create_readable_field(&format!("test.v{i}"), Serializer::<u32>::new(u32::MAX))
            .unwrap();
    }
    let mut producer = DownlinkProducer::new(&mut registry, 70).unwrap();
    producer.init(&registry);
    producer.execute();

    let snapshot = registry.find_internal_field::<Vec<u8>>(DOWNLINK_PTR_FIELD).unwrap().get();
    let snap_size = registry.find_internal_field::<usize>(DOWNLINK_SNAP_SIZE_FIELD).unwrap().get();
    assert_eq!(snap_size, 80);
    assert_eq!(snapshot.len(), 140);
    let chunks: Vec<&[u8]> = snapshot_chunks(&snapshot, snap_size, 70).collect();
    assert_eq!(chunks.len(), 2);

    // a snapshot cut at the first chunk decodes the fields it covers
    let decoded = decode_snapshot(registry.readable_fields(), chunks[0]);
    assert_eq!(decoded.len(), 17);
}
