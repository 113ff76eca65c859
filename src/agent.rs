use crate::config::{ConfigError, FlightConfig};
use crate::downlink::DownlinkProducer;
use crate::event::Event;
use crate::fault::Fault;
use crate::field::{SerializableField, StateField};
use crate::radio::{QuakeDriver, QuakeManager, RadioMode};
use crate::registry::{RegistryError, StateFieldRegistry, TaskId};
use crate::scheduler::{ClockManager, ControlLoop, ControlTask, LoopStats, CYCLE_NO_FIELD};
use crate::serializer::{GpsTime, Quaternion, Serializer};
use crate::uplink::UplinkConsumer;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

// Placeholder mission field ranges
const MAX_ADCS_STATE: u8 = 10;
const MAX_PAN_STATE: u8 = 10;
const MAX_SAT_DESIGNATION: u8 = 2;
const MAX_ANG_RATE: f32 = 10.0;
const ANG_RATE_BITS: usize = 4;
const ORBIT_POS_BOUND: f64 = 7.0e6;
const ORBIT_POS_BITS: usize = 28;

const PIKSI_FAULT_PERSISTENCE: u32 = 1000;
const PRESSURIZE_FAULT_PERSISTENCE: u32 = 1;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Creates the mission fields whose owning tasks live outside this crate
/// (attitude control, orbit estimation, GPS, propulsion) so the uplink and
/// downlink layouts are complete. It evaluates the faults it owns each cycle
/// and signals `pan.state_event` whenever `pan.state` changes.
#[derive(Debug)]
pub struct FieldCreatorTask {
    id: TaskId,
    pan_state: Arc<StateField<u8>>,
    state_event: Arc<Event>,
    faults: Vec<Fault>,
    last_pan_state: u8,
}

impl FieldCreatorTask {
    pub fn new(registry: &mut StateFieldRegistry) -> Result<Self, RegistryError> {
        let id = TaskId::from("field_creator");
        let cycle_no = registry.require_field::<u32>(CYCLE_NO_FIELD)?;

        registry.create_writable_field("adcs.state", Serializer::<u8>::new(MAX_ADCS_STATE))?;
        registry.create_writable_field("adcs.cmd_attitude", Serializer::<Quaternion>::new())?;
        registry.create_readable_field("adcs.ang_rate", Serializer::<f32>::new(0.0, MAX_ANG_RATE, ANG_RATE_BITS))?;
        registry.create_writable_field(
            "adcs.min_stable_ang_rate",
            Serializer::<f32>::new(0.0, MAX_ANG_RATE, ANG_RATE_BITS),
        )?;

        let pan_state = registry.create_readable_field("pan.state", Serializer::<u8>::new(MAX_PAN_STATE))?;
        registry.create_readable_field("pan.sat_designation", Serializer::<u8>::new(MAX_SAT_DESIGNATION))?;

        let orbit_pos = || Serializer::<[f64; 3]>::new(-ORBIT_POS_BOUND, ORBIT_POS_BOUND, ORBIT_POS_BITS);
        registry.create_readable_field("orbit.pos", orbit_pos())?;
        registry.create_writable_field("orbit.baseline_pos", orbit_pos())?;
        registry.create_readable_field("piksi.time", Serializer::<GpsTime>::new())?;

        let piksi_fault = Fault::new("piksi.fault", PIKSI_FAULT_PERSISTENCE, cycle_no.clone());
        piksi_fault.add_to_registry(registry)?;
        let pressurize_fault = Fault::new("prop.failed_pressurize", PRESSURIZE_FAULT_PERSISTENCE, cycle_no.clone());
        pressurize_fault.add_to_registry(registry)?;

        let state_event = Arc::new(Event::new(
            "pan.state_event",
            vec![pan_state.clone() as Arc<dyn SerializableField>],
            cycle_no,
        ));
        registry.add_event(state_event.clone())?;

        for name in ["pan.state", "piksi.fault", "prop.failed_pressurize", "pan.state_event"] {
            registry.add_writer(&id, name)?;
        }

        Ok(Self {
            id,
            last_pan_state: pan_state.get(),
            pan_state,
            state_event,
            faults: vec![piksi_fault, pressurize_fault],
        })
    }

    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }
}

impl ControlTask for FieldCreatorTask {
    fn name(&self) -> &str {
        self.id.as_str()
    }

    fn execute(&mut self) {
        for fault in &mut self.faults {
            fault.evaluate();
        }

        let pan_state = self.pan_state.get();
        if pan_state != self.last_pan_state {
            self.state_event.signal();
            self.last_pan_state = pan_state;
        }
    }
}

/// The flight software context: the state registry plus every control task,
/// run in a fixed order once per control cycle.
pub struct FlightAgent {
    config: FlightConfig,
    registry: StateFieldRegistry,
    control_loop: ControlLoop,
    cycle_no: Arc<StateField<u32>>,
    radio_state: Arc<StateField<u8>>,
}

impl FlightAgent {
    pub fn new<D>(config: FlightConfig, driver: D) -> Result<Self, AgentError>
    where
        D: QuakeDriver + Send + 'static,
    {
        config.validate()?;
        let mut registry = StateFieldRegistry::new();

        let clock = ClockManager::new(&mut registry)?;
        let field_creator = FieldCreatorTask::new(&mut registry)?;
        let mut uplink_consumer = UplinkConsumer::new(&mut registry)?;
        let mut downlink_producer = DownlinkProducer::new(&mut registry, config.radio.packet_size)?;
        let quake_manager = QuakeManager::new(&mut registry, &config.radio, driver)?;

        uplink_consumer.init(&registry);
        downlink_producer.init(&registry);

        let cycle_no = registry.require_field::<u32>(CYCLE_NO_FIELD)?;
        let radio_state = registry.require_readable_field::<u8>("radio.state")?;

        let mut control_loop = ControlLoop::new();
        control_loop.add_task(Box::new(clock));
        control_loop.add_task(Box::new(field_creator));
        control_loop.add_task(Box::new(uplink_consumer));
        control_loop.add_task(Box::new(downlink_producer));
        control_loop.add_task(Box::new(quake_manager));

        info!(
            "Flight agent ready: {} fields, {} readable ({} bits), {} writable",
            registry.len(),
            registry.readable_fields().len(),
            registry.snapshot_bits(),
            registry.writable_fields().len()
        );

        Ok(Self {
            config,
            registry,
            control_loop,
            cycle_no,
            radio_state,
        })
    }

    /// Runs one control cycle.
    pub fn step(&mut self) {
        self.control_loop.run_cycle();
    }

    pub fn run(&mut self, cycles: u32) {
        for _ in 0..cycles {
            self.step();
        }
    }

    pub fn registry(&self) -> &StateFieldRegistry {
        &self.registry
    }

    pub fn config(&self) -> &FlightConfig {
        &self.config
    }

    pub fn cycle(&self) -> u32 {
        self.cycle_no.get()
    }

    pub fn radio_mode(&self) -> RadioMode {
        RadioMode::try_from(self.radio_state.get()).unwrap_or(RadioMode::Config)
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.control_loop.task_names()
    }

    pub fn get_stats(&self) -> &LoopStats {
        self.control_loop.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{SimulatedQuake, SimulationConfig};

    #[test]
    fn test_task_order() {
        let agent = FlightAgent::new(FlightConfig::default(), SimulatedQuake::new(SimulationConfig::ideal())).unwrap();
        assert_eq!(
            agent.task_names(),
            ["clock_manager", "field_creator", "uplink_consumer", "downlink_producer", "quake_manager"]
        );
    }

    #[test]
    fn test_pan_state_change_signals_event() {
        let mut agent = FlightAgent::new(FlightConfig::default(), SimulatedQuake::new(SimulationConfig::ideal())).unwrap();
        agent.run(3);
        agent.registry().find_readable_field::<u8>("pan.state").unwrap().set(4);
        agent.step();

        let event = agent.registry().find_event("pan.state_event").unwrap();
        assert_eq!(event.print(), "ccno=4 pan.state=4");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = FlightConfig::default();
        config.radio.packet_size = 0;
        let result = FlightAgent::new(config, SimulatedQuake::new(SimulationConfig::ideal()));
        assert!(matches!(result, Err(AgentError::Config(_))));
    }
}
