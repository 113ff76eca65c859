use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Modem mobile-originated buffer size in bytes.
pub const MAX_MO_SIZE: usize = 340;
/// Modem mobile-terminated buffer size in bytes.
pub const MAX_MT_SIZE: usize = 270;
/// Number of commands in the modem configuration sequence.
pub const CONFIG_STEPS: usize = 4;

/// `radio.err` value when the last operation succeeded.
pub const NO_ERROR: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum QuakeError {
    #[error("modem did not respond in time")]
    Timeout,
    #[error("checksum mismatch")]
    Crc,
    #[error("message length rejected")]
    WrongLength,
    #[error("unexpected modem response")]
    UnexpectedResponse,
}

impl QuakeError {
    /// Stable nonzero code recorded in `radio.err`.
    pub const fn code(self) -> u8 {
        match self {
            QuakeError::Timeout => 1,
            QuakeError::Crc => 2,
            QuakeError::WrongLength => 3,
            QuakeError::UnexpectedResponse => 4,
        }
    }
}

/// Parsed `+SBDIX` session result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SbdixResponse {
    pub mo_status: u8,
    pub mo_msn: u16,
    pub mt_status: u8,
    pub mt_msn: u16,
    pub mt_length: u16,
    pub mt_queued: u16,
}

impl SbdixResponse {
    /// MO status codes 0..=4 mean the message was transferred.
    pub fn mo_succeeded(&self) -> bool {
        self.mo_status <= 4
    }

    pub fn mt_received(&self) -> bool {
        self.mt_status == 1
    }
}

/// Non-blocking access to the Quake modem.
///
/// Every command is a query (sends the AT command) followed by a read of
/// the response. `WouldBlock` means the port is busy or the response has
/// not arrived yet; the caller retries on a later cycle.
pub trait QuakeDriver {
    /// Sends step `step` of the configuration sequence, `0..CONFIG_STEPS`.
    fn config(&mut self, step: usize) -> nb::Result<(), QuakeError>;

    fn query_sbdwb(&mut self, len: usize) -> nb::Result<(), QuakeError>;

    fn write_sbdwb(&mut self, msg: &[u8]) -> nb::Result<(), QuakeError>;

    fn query_sbdrb(&mut self) -> nb::Result<(), QuakeError>;

    /// Copies the MT message into `buf`, returning its length.
    fn read_sbdrb(&mut self, buf: &mut [u8]) -> nb::Result<usize, QuakeError>;

    fn query_sbdix(&mut self) -> nb::Result<(), QuakeError>;

    fn read_sbdix(&mut self) -> nb::Result<SbdixResponse, QuakeError>;
}
