use pancore::fault::{Fault, MAX_PERSISTENCE};
use pancore::serializer::Serializer;
use pancore::{Access, RegistryError, StateField, StateFieldRegistry};
use std::sync::Arc;

fn setup(persistence: u32) -> (StateFieldRegistry, Arc<StateField<u32>>, Fault) {
    let mut registry = StateFieldRegistry::new();
    let cycle_no = registry
        .create_writable_field("pan.cycle_no", Serializer::<u32>::new(u32::MAX))
        .unwrap();
    let fault = Fault::new("piksi.fault", persistence, cycle_no.clone());
    fault.add_to_registry(&mut registry).unwrap();
    (registry, cycle_no, fault)
}

/// Signals once per cycle for `cycles` cycles, evaluating after each.
fn signal_for(fault: &mut Fault, cycle_no: &StateField<u32>, cycles: u32) -> bool {
    let mut faulted = false;
    for _ in 0..cycles {
        cycle_no.update(|c| *c += 1);
        fault.signal();
        faulted = fault.evaluate();
    }
    faulted
}

#[test]
fn test_registers_command_fields() {
    let (registry, _, _) = setup(10);
    for name in ["piksi.fault", "piksi.fault.suppress", "piksi.fault.override", "piksi.fault.unsignal"] {
        assert_eq!(registry.access(name), Some(Access::Writable), "{name}");
        assert!(registry.find_writable_field::<bool>(name).is_some());
    }
    let persistence = registry.find_writable_field::<u32>("piksi.fault.persistence").unwrap();
    assert_eq!(persistence.get(), 10);
    assert_eq!(persistence.serializer().unwrap().bitsize(), 16);
}

#[test]
fn test_persistence_boundary() {
    let (_, cycle_no, mut fault) = setup(5);
    assert!(!signal_for(&mut fault, &cycle_no, 5));
    assert!(signal_for(&mut fault, &cycle_no, 1));
    assert!(fault.is_faulted());
}

#[test]
fn test_zero_persistence_faults_on_first_signal() {
    let (_, cycle_no, mut fault) = setup(0);
    assert!(!fault.evaluate());
    assert!(signal_for(&mut fault, &cycle_no, 1));
}

#[test]
fn test_repeat_signals_in_one_cycle_count_once() {
    let (_, cycle_no, mut fault) = setup(2);
    cycle_no.set(1);
    for _ in 0..10 {
        fault.signal();
    }
    assert!(!fault.evaluate());
    assert_eq!(fault.num_consecutive_signals(), 1);
}

#[test]
fn test_unsignal_resets_count() {
    let (registry, cycle_no, mut fault) = setup(3);
    assert!(!signal_for(&mut fault, &cycle_no, 3));

    fault.unsignal();
    assert!(!signal_for(&mut fault, &cycle_no, 3));

    // ground unsignal clears itself once processed
    let unsignal = registry.find_writable_field::<bool>("piksi.fault.unsignal").unwrap();
    unsignal.set(true);
    assert!(!fault.evaluate());
    assert!(!unsignal.get());
    assert_eq!(fault.num_consecutive_signals(), 0);
    assert!(!signal_for(&mut fault, &cycle_no, 3));
    assert!(signal_for(&mut fault, &cycle_no, 1));
}

#[test]
fn test_ground_override_and_suppress() {
    let (registry, cycle_no, mut fault) = setup(1);
    let suppress = registry.find_writable_field::<bool>("piksi.fault.suppress").unwrap();
    let force = registry.find_writable_field::<bool>("piksi.fault.override").unwrap();

    assert!(signal_for(&mut fault, &cycle_no, 2));
    suppress.set(true);
    assert!(!fault.evaluate());
    // suppress edge reset the count; the condition must persist again
    suppress.set(false);
    assert!(!signal_for(&mut fault, &cycle_no, 1));

    force.set(true);
    assert!(fault.evaluate());
    suppress.set(true);
    assert!(fault.evaluate());
    force.set(false);
    assert!(!fault.evaluate());
}

#[test]
fn test_persistence_is_clamped() {
    let (_, _, fault) = setup(1_000_000);
    assert_eq!(fault.persistence(), MAX_PERSISTENCE);
}

#[test]
fn test_duplicate_fault_names_refused() {
    let (mut registry, cycle_no, _) = setup(1);
    let again = Fault::new("piksi.fault", 1, cycle_no);
    assert_eq!(
        again.add_to_registry(&mut registry),
        Err(RegistryError::DuplicateField("piksi.fault".into()))
    );
}
