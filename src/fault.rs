use crate::field::StateField;
use crate::registry::{RegistryError, StateFieldRegistry};
use crate::serializer::Serializer;
use std::sync::Arc;

/// Largest persistence the ground can command.
pub const MAX_PERSISTENCE: u32 = 65_535;

/// A persistence-gated boolean fault with ground overrides.
///
/// The owning task calls [`Fault::signal`] in each cycle the condition holds
/// and [`Fault::evaluate`] once per cycle. The fault reads true once it has
/// been signalled in more than `persistence` consecutive cycles. The ground
/// can force it with `<name>.override`, mask it with `<name>.suppress` and
/// clear the count with `<name>.unsignal`.
#[derive(Debug)]
pub struct Fault {
    field: Arc<StateField<bool>>,
    suppress: Arc<StateField<bool>>,
    force: Arc<StateField<bool>>,
    unsignal_cmd: Arc<StateField<bool>>,
    persistence: Arc<StateField<u32>>,
    cycle_no: Arc<StateField<u32>>,
    num_consecutive_signals: u32,
    last_signal_cycle: Option<u32>,
    prev_override: bool,
    prev_suppress: bool,
}

impl Fault {
    pub fn new(name: &str, persistence: u32, cycle_no: Arc<StateField<u32>>) -> Self {
        let bool_field = |suffix: &str| Arc::new(StateField::writable(format!("{name}{suffix}"), Serializer::<bool>::new()));

        let persistence_field = Arc::new(StateField::writable(
            format!("{name}.persistence"),
            Serializer::<u32>::new(MAX_PERSISTENCE),
        ));
        persistence_field.set(persistence.min(MAX_PERSISTENCE));

        Self {
            field: bool_field(""),
            suppress: bool_field(".suppress"),
            force: bool_field(".override"),
            unsignal_cmd: bool_field(".unsignal"),
            persistence: persistence_field,
            cycle_no,
            num_consecutive_signals: 0,
            last_signal_cycle: None,
            prev_override: false,
            prev_suppress: false,
        }
    }

    /// Registers the fault flag and its four command fields.
    pub fn add_to_registry(&self, registry: &mut StateFieldRegistry) -> Result<(), RegistryError> {
        registry.add_field(self.field.clone())?;
        registry.add_field(self.suppress.clone())?;
        registry.add_field(self.force.clone())?;
        registry.add_field(self.unsignal_cmd.clone())?;
        registry.add_field(self.persistence.clone())
    }

    pub fn name(&self) -> &str {
        self.field.name()
    }

    /// Counts one signal for the current control cycle. Further signals in
    /// the same cycle are ignored.
    pub fn signal(&mut self) {
        let cycle = self.cycle_no.get();
        if self.last_signal_cycle.map_or(true, |last| cycle > last) {
            self.num_consecutive_signals = self.num_consecutive_signals.saturating_add(1);
            self.last_signal_cycle = Some(cycle);
        }
    }

    pub fn unsignal(&mut self) {
        self.num_consecutive_signals = 0;
    }

    fn process_commands(&mut self) {
        let force = self.force.get();
        let suppress = self.suppress.get();
        if (force && !self.prev_override) || (suppress && !self.prev_suppress) {
            self.unsignal();
        }
        self.prev_override = force;
        self.prev_suppress = suppress;

        if self.unsignal_cmd.get() {
            self.unsignal();
            self.unsignal_cmd.set(false);
        }
    }

    /// Applies pending ground commands and updates the fault flag.
    pub fn evaluate(&mut self) -> bool {
        self.process_commands();

        let faulted = if self.force.get() {
            true
        } else if self.suppress.get() {
            false
        } else {
            self.num_consecutive_signals > self.persistence.get()
        };
        self.field.set(faulted);
        faulted
    }

    /// Last evaluated state.
    pub fn is_faulted(&self) -> bool {
        self.field.get()
    }

    pub fn num_consecutive_signals(&self) -> u32 {
        self.num_consecutive_signals
    }

    pub fn persistence(&self) -> u32 {
        self.persistence.get()
    }

    pub fn set_persistence(&self, persistence: u32) {
        self.persistence.set(persistence.min(MAX_PERSISTENCE));
    }

    pub fn suppress_field(&self) -> &Arc<StateField<bool>> {
        &self.suppress
    }

    pub fn override_field(&self) -> &Arc<StateField<bool>> {
        &self.force
    }

    pub fn unsignal_field(&self) -> &Arc<StateField<bool>> {
        &self.unsignal_cmd
    }
}
