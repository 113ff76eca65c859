//! The Quake (Iridium SBD) radio link.
//!
//! [`QuakeDriver`] is the modem collaborator, [`QuakeControlTask`] sequences
//! the steps of a single modem operation and [`QuakeManager`] is the link
//! state machine deciding which operation to run each control cycle.

pub mod control;
pub mod driver;
pub mod manager;
pub mod sim;

pub use control::{Progress, QuakeControlTask, QuakeOp};
pub use driver::{QuakeDriver, QuakeError, SbdixResponse, MAX_MO_SIZE, MAX_MT_SIZE};
pub use manager::{QuakeManager, RadioStats};
pub use sim::{DeliveredPacket, SimulatedQuake, SimulationConfig};

use serde::{Deserialize, Serialize};

/// Link state, downlinked as `radio.state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RadioMode {
    Config = 0,
    Wait = 1,
    Transceive = 2,
    Read = 3,
    Write = 4,
    Manual = 5,
}

/// Largest `radio.state` code.
pub const MAX_RADIO_MODE: u8 = RadioMode::Manual as u8;

/// What happened in a cycle, as seen by the link state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioEvent {
    Configured,
    CheckinDue,
    ForcedCheckin,
    ReconfigureDue,
    /// The current downlink chunk has not been written to the modem yet.
    ChunkPending,
    SessionDone { mt_pending: bool, more_data: bool },
    SessionRetry,
    Written,
    ReadDone { more: bool },
    BudgetExhausted,
    Fault,
    ManualRequested,
    ManualReleased,
}

impl RadioMode {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Total transition function. Pairs with no listed transition keep the
    /// current mode.
    pub fn next(self, event: RadioEvent) -> RadioMode {
        use RadioEvent as E;
        use RadioMode as M;

        match (self, event) {
            (M::Manual, E::ManualReleased) => M::Wait,
            (M::Manual, _) => M::Manual,
            (_, E::ManualRequested) => M::Manual,
            (_, E::Fault) => M::Wait,
            (M::Wait, E::BudgetExhausted | E::CheckinDue | E::ForcedCheckin) => M::Transceive,
            (M::Wait, E::ReconfigureDue) => M::Config,
            (_, E::BudgetExhausted) => M::Wait,
            (M::Config, E::Configured) => M::Wait,
            (M::Transceive, E::ChunkPending) => M::Write,
            (M::Transceive, E::SessionDone { mt_pending: true, .. }) => M::Read,
            (M::Transceive, E::SessionDone { more_data: true, .. }) => M::Write,
            (M::Transceive, E::SessionDone { .. }) => M::Wait,
            (M::Write, E::Written) => M::Transceive,
            (M::Read, E::ReadDone { more: true }) => M::Transceive,
            (M::Read, E::ReadDone { more: false }) => M::Wait,
            (mode, _) => mode,
        }
    }
}

impl TryFrom<u8> for RadioMode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(RadioMode::Config),
            1 => Ok(RadioMode::Wait),
            2 => Ok(RadioMode::Transceive),
            3 => Ok(RadioMode::Read),
            4 => Ok(RadioMode::Write),
            5 => Ok(RadioMode::Manual),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for code in 0..=MAX_RADIO_MODE {
            assert_eq!(RadioMode::try_from(code).map(RadioMode::code), Ok(code));
        }
        assert_eq!(RadioMode::try_from(6), Err(6));
    }

    #[test]
    fn test_session_paths() {
        let done = |mt_pending, more_data| RadioEvent::SessionDone { mt_pending, more_data };
        assert_eq!(RadioMode::Transceive.next(done(true, true)), RadioMode::Read);
        assert_eq!(RadioMode::Transceive.next(done(false, true)), RadioMode::Write);
        assert_eq!(RadioMode::Transceive.next(done(false, false)), RadioMode::Wait);
        assert_eq!(RadioMode::Transceive.next(RadioEvent::SessionRetry), RadioMode::Transceive);
        assert_eq!(RadioMode::Read.next(RadioEvent::ReadDone { more: true }), RadioMode::Transceive);
    }

    #[test]
    fn test_manual_and_faults() {
        for mode in [RadioMode::Config, RadioMode::Transceive, RadioMode::Read, RadioMode::Write] {
            assert_eq!(mode.next(RadioEvent::ManualRequested), RadioMode::Manual);
            assert_eq!(mode.next(RadioEvent::Fault), RadioMode::Wait);
            assert_eq!(mode.next(RadioEvent::BudgetExhausted), RadioMode::Wait);
        }
        assert_eq!(RadioMode::Manual.next(RadioEvent::Fault), RadioMode::Manual);
        assert_eq!(RadioMode::Manual.next(RadioEvent::ManualReleased), RadioMode::Wait);
        assert_eq!(RadioMode::Wait.next(RadioEvent::ReconfigureDue), RadioMode::Config);
        assert_eq!(RadioMode::Wait.next(RadioEvent::Written), RadioMode::Wait);
    }
}
