use crate::field::StateField;
use crate::registry::{RegistryError, StateFieldRegistry, TaskId};
use crate::serializer::Serializer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

pub const CYCLE_NO_FIELD: &str = "pan.cycle_no";

/// A unit of flight logic run once per control cycle.
///
/// Tasks must not block: anything that takes longer than a cycle is split
/// into steps and resumed on the next call.
pub trait ControlTask {
    fn name(&self) -> &str;

    fn execute(&mut self);
}

/// Owns the control cycle counter and advances it at the start of each cycle.
#[derive(Debug)]
pub struct ClockManager {
    id: TaskId,
    cycle_no: Arc<StateField<u32>>,
}

impl ClockManager {
    pub fn new(registry: &mut StateFieldRegistry) -> Result<Self, RegistryError> {
        let id = TaskId::from("clock_manager");
        let cycle_no = registry.create_writable_field(CYCLE_NO_FIELD, Serializer::<u32>::new(u32::MAX))?;
        registry.add_writer(&id, CYCLE_NO_FIELD)?;
        Ok(Self { id, cycle_no })
    }

    pub fn cycle_no(&self) -> u32 {
        self.cycle_no.get()
    }
}

impl ControlTask for ClockManager {
    fn name(&self) -> &str {
        self.id.as_str()
    }

    fn execute(&mut self) {
        self.cycle_no.update(|cycle| *cycle = cycle.wrapping_add(1));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoopStats {
    pub cycles_run: u64,
    pub tasks_executed: u64,
}

/// Runs its tasks in insertion order, once each per control cycle.
#[derive(Default)]
pub struct ControlLoop {
    tasks: Vec<Box<dyn ControlTask + Send>>,
    stats: LoopStats,
}

impl ControlLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, task: Box<dyn ControlTask + Send>) {
        self.tasks.push(task);
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|task| task.name()).collect()
    }

    pub fn run_cycle(&mut self) {
        for task in &mut self.tasks {
            task.execute();
            self.stats.tasks_executed += 1;
        }
        self.stats.cycles_run += 1;
        trace!("Control cycle {} complete", self.stats.cycles_run);
    }

    pub fn get_stats(&self) -> &LoopStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ControlTask for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn execute(&mut self) {
            self.log.lock().unwrap().push(self.name);
        }
    }

    #[test]
    fn test_tasks_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut control_loop = ControlLoop::new();
        for name in ["first", "second", "third"] {
            control_loop.add_task(Box::new(Recorder { name, log: log.clone() }));
        }

        control_loop.run_cycle();
        control_loop.run_cycle();

        assert_eq!(*log.lock().unwrap(), ["first", "second", "third", "first", "second", "third"]);
        assert_eq!(control_loop.get_stats().cycles_run, 2);
        assert_eq!(control_loop.get_stats().tasks_executed, 6);
    }

    #[test]
    fn test_clock_manager_counts_cycles() {
        let mut registry = StateFieldRegistry::new();
        let mut clock = ClockManager::new(&mut registry).unwrap();
        clock.execute();
        clock.execute();

        assert_eq!(clock.cycle_no(), 2);
        assert!(registry.can_write(&TaskId::from("clock_manager"), CYCLE_NO_FIELD));
    }
}
