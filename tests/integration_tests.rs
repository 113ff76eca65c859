use pancore::downlink::{chunk_count, decode_snapshot};
use pancore::radio::{RadioMode, SimulatedQuake, SimulationConfig, MAX_MT_SIZE};
use pancore::uplink::UplinkProducer;
use pancore::serializer::Quaternion;
use pancore::{FlightAgent, FlightConfig};

fn agent_with(config_json: &str, simulation: SimulationConfig) -> (FlightAgent, SimulatedQuake) {
    let config = FlightConfig::from_json_str(config_json).unwrap();
    let modem = SimulatedQuake::new(simulation);
    let agent = FlightAgent::new(config, modem.clone()).unwrap();
    (agent, modem)
}

#[test]
fn test_flight_snapshot_fits_one_packet() {
    let (agent, _) = agent_with("{}", SimulationConfig::ideal());
    let registry = agent.registry();
    let snap_size = registry.snapshot_bits().div_ceil(8);
    assert_eq!(chunk_count(snap_size, agent.config().radio.packet_size), 1);

    // the clock registers first, so the cycle counter is uplink index 1
    assert_eq!(registry.writable_index("pan.cycle_no"), Some(1));
    assert_eq!(registry.writable_index("adcs.state"), Some(2));
    assert_eq!(registry.writable_index("adcs.ang_rate"), None);
    assert!(registry.find_event("pan.state_event").is_some());
}

#[test]
fn test_uplinked_command_shows_in_later_downlink() {
    let (mut agent, modem) = agent_with(r#"{ "radio": { "max_wait_cycles": 20 } }"#, SimulationConfig::ideal());

    let mut producer = UplinkProducer::new(agent.registry());
    producer.add_str("adcs.state", "7").unwrap();
    producer.add_field("adcs.cmd_attitude", &Quaternion([0.0, 0.0, 0.0, 1.0])).unwrap();
    assert!(modem.queue_uplink(&producer.to_packet(MAX_MT_SIZE).unwrap()));

    agent.run(100);
    assert_eq!(agent.cycle(), 100);
    assert_eq!(agent.registry().find_writable_field::<u8>("adcs.state").unwrap().get(), 7);

    let delivered = modem.take_delivered();
    assert!(delivered.len() >= 2);
    let last = delivered.last().unwrap();
    let decoded = decode_snapshot(agent.registry().readable_fields(), &last.data);
    assert_eq!(decoded.len(), agent.registry().readable_fields().len());

    let value_of = |name: &str| {
        decoded
            .iter()
            .find(|field| field.name == name)
            .and_then(|field| field.value.clone())
    };
    assert_eq!(value_of("adcs.state").as_deref(), Some("7"));
    // snapshots are taken as the radio starts writing them
    assert_eq!(value_of("radio.state").as_deref(), Some("4"));

    // the first snapshot went out before the uplink was applied
    let first = decode_snapshot(agent.registry().readable_fields(), &delivered[0].data);
    let first_state = first.iter().find(|field| field.name == "adcs.state").unwrap();
    assert_eq!(first_state.value.as_deref(), Some("0"));
}

#[test]
fn test_noisy_link_still_delivers() {
    let (mut agent, modem) = agent_with(r#"{ "radio": { "max_wait_cycles": 20 } }"#, SimulationConfig::default());
    agent.run(600);

    assert!(!modem.take_delivered().is_empty());
    assert!(modem.stats().commands_answered > 0);
    assert_eq!(agent.get_stats().cycles_run, 600);
    assert!(matches!(
        agent.radio_mode(),
        RadioMode::Config | RadioMode::Wait | RadioMode::Transceive | RadioMode::Write | RadioMode::Read
    ));
}

#[test]
fn test_ground_can_hold_the_radio() {
    let (mut agent, modem) = agent_with("{}", SimulationConfig::ideal());
    agent.run(5);
    assert_eq!(agent.radio_mode(), RadioMode::Wait);

    let manual = agent.registry().find_writable_field::<bool>("radio.manual").unwrap();
    let force = agent.registry().find_writable_field::<bool>("radio.force_checkin").unwrap();
    manual.set(true);
    force.set(true);
    agent.run(20);
    assert_eq!(agent.radio_mode(), RadioMode::Manual);
    assert!(modem.take_delivered().is_empty());

    manual.set(false);
    agent.run(10);
    assert_eq!(modem.take_delivered().len(), 1);
    assert_eq!(agent.radio_mode(), RadioMode::Wait);
}
