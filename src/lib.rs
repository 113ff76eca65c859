//! # Pancore
//!
//! The state and communication core of a small satellite's flight software:
//! a typed shared-state registry, a bit-level codec that packs fields into
//! fixed-size radio packets, and the state machine driving the Quake
//! (Iridium SBD) modem.
//!
//! ## Features
//!
//! - **State registry**: named, access-controlled fields shared between control tasks
//! - **Bit-packed codec**: arbitrary-width fields packed LSB-first with no padding
//! - **Uplink/downlink**: indexed field updates in, full-state snapshots out in 70-byte chunks
//! - **Faults**: persistence-gated flags with ground suppress/override
//! - **Radio link**: cycle-budgeted SBDWB/SBDIX/SBDRB sequencing with error escalation
//! - **Simulated modem**: deterministic error injection for desktop runs and tests
//!
//! ## Quick Start
//!
//! ```rust
//! use pancore::{FlightAgent, FlightConfig};
//! use pancore::radio::{SimulatedQuake, SimulationConfig};
//!
//! let modem = SimulatedQuake::new(SimulationConfig::ideal());
//! let mut agent = FlightAgent::new(FlightConfig::default(), modem.clone()).unwrap();
//!
//! // Configure the modem, then force a check-in from the ground side
//! agent.run(10);
//! agent.registry().find_writable_field::<bool>("radio.force_checkin").unwrap().set(true);
//! agent.run(10);
//!
//! assert!(!modem.take_delivered().is_empty());
//! ```
//!
//! ## Architecture
//!
//! - [`bitstream`] - Bit cursor over a borrowed byte buffer
//! - [`serializer`] / [`field`] - Fixed-width value encodings and state fields
//! - [`registry`] - Field catalog and task permissions
//! - [`fault`] / [`event`] - Persistence-gated faults and cycle-stamped events
//! - [`uplink`] / [`downlink`] - Radio packet codecs
//! - [`radio`] - Modem driver trait, operation sequencer and link state machine
//! - [`scheduler`] - Control task trait and the fixed-cycle loop
//! - [`agent`] - Wiring of the registry and every task

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::new_without_default)]

pub mod agent;
pub mod bitstream;
pub mod config;
pub mod downlink;
pub mod event;
pub mod fault;
pub mod field;
pub mod radio;
pub mod registry;
pub mod scheduler;
pub mod serializer;
pub mod uplink;

// Re-export main public types for convenience
pub use agent::{AgentError, FlightAgent};
pub use bitstream::BitStream;
pub use config::{FlightConfig, RadioConfig};
pub use field::{Access, SerializableField, StateField};
pub use registry::{RegistryError, StateFieldRegistry, TaskId};
pub use serializer::{Serializable, Serializer};
