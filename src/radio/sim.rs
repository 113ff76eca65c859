use super::driver::{QuakeDriver, QuakeError, SbdixResponse, CONFIG_STEPS, MAX_MO_SIZE, MAX_MT_SIZE};
use arrayvec::ArrayString;
use heapless::{Deque, Vec};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

const MAX_QUEUED_UPLINKS: usize = 8;

// Per-command error rates for a marginal link
const TIMEOUT_RATE_PERCENT: f32 = 0.5;
const CRC_RATE_PERCENT: f32 = 0.2;
const NETWORK_LOSS_PERCENT: f32 = 10.0;
const RESPONSE_LATENCY_CYCLES: u32 = 1;

/// SBDIX MO status reported when no network is available.
const MO_STATUS_NO_NETWORK: u8 = 32;

/// Configuration for the simulated modem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub inject_errors: bool,
    /// Cycles of `WouldBlock` before each command is answered.
    pub response_latency_cycles: u32,
    pub timeout_rate_percent: f32,
    pub crc_rate_percent: f32,
    /// Chance that an SBDIX session finds no network.
    pub network_loss_percent: f32,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            inject_errors: true,
            response_latency_cycles: RESPONSE_LATENCY_CYCLES,
            timeout_rate_percent: TIMEOUT_RATE_PERCENT,
            crc_rate_percent: CRC_RATE_PERCENT,
            network_loss_percent: NETWORK_LOSS_PERCENT,
            seed: 0x1234_5678_9ABC_DEF0,
        }
    }
}

impl SimulationConfig {
    /// A modem that answers every command at once and never fails.
    pub fn ideal() -> Self {
        Self {
            inject_errors: false,
            response_latency_cycles: 0,
            ..Self::default()
        }
    }
}

/// An MO message that reached the ground.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredPacket {
    pub mo_msn: u16,
    #[serde(with = "serde_bytes")]
    pub data: std::vec::Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SimulationStats {
    pub commands_answered: u32,
    pub timeouts_injected: u32,
    pub crc_errors_injected: u32,
    pub network_losses: u32,
    pub mo_delivered: u32,
    pub mt_delivered: u32,
}

#[derive(Debug)]
struct ModemState {
    config: SimulationConfig,
    rng_state: u64,
    waited: u32,
    last_command: ArrayString<16>,
    expected_write: Option<usize>,
    mo_buffer: Vec<u8, MAX_MO_SIZE>,
    mt_buffer: Vec<u8, MAX_MT_SIZE>,
    mo_msn: u16,
    mt_msn: u16,
    inbox: Deque<Vec<u8, MAX_MT_SIZE>, MAX_QUEUED_UPLINKS>,
    outbox: std::vec::Vec<DeliveredPacket>,
    stats: SimulationStats,
}

impl ModemState {
    fn random_float(&mut self) -> f32 {
        self.rng_state = self.rng_state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        ((self.rng_state >> 16) & 0xFFFF) as f32 / 65536.0
    }

    fn roll(&mut self, rate_percent: f32) -> bool {
        self.config.inject_errors && self.random_float() * 100.0 < rate_percent
    }

    /// Holds each command for the configured latency, then maybe times out.
    fn answer(&mut self, command: &str) -> nb::Result<(), QuakeError> {
        if self.waited < self.config.response_latency_cycles {
            self.waited += 1;
            return Err(nb::Error::WouldBlock);
        }
        self.waited = 0;
        self.last_command.clear();
        let _ = self.last_command.try_push_str(command);
        self.stats.commands_answered += 1;

        if self.roll(self.config.timeout_rate_percent) {
            self.stats.timeouts_injected += 1;
            return Err(nb::Error::Other(QuakeError::Timeout));
        }
        Ok(())
    }

    fn corrupt(&mut self) -> bool {
        let corrupted = self.roll(self.config.crc_rate_percent);
        if corrupted {
            self.stats.crc_errors_injected += 1;
        }
        corrupted
    }

    fn session(&mut self) -> SbdixResponse {
        if self.roll(self.config.network_loss_percent) {
            self.stats.network_losses += 1;
            return SbdixResponse {
                mo_status: MO_STATUS_NO_NETWORK,
                mo_msn: self.mo_msn,
                mt_status: 2,
                ..SbdixResponse::default()
            };
        }

        self.mo_msn = self.mo_msn.wrapping_add(1);
        self.outbox.push(DeliveredPacket {
            mo_msn: self.mo_msn,
            data: self.mo_buffer.to_vec(),
        });
        self.stats.mo_delivered += 1;

        let mut response = SbdixResponse {
            mo_status: 0,
            mo_msn: self.mo_msn,
            ..SbdixResponse::default()
        };
        if let Some(message) = self.inbox.pop_front() {
            self.mt_msn = self.mt_msn.wrapping_add(1);
            response.mt_status = 1;
            response.mt_msn = self.mt_msn;
            response.mt_length = message.len() as u16;
            response.mt_queued = self.inbox.len() as u16;
            self.mt_buffer = message;
            self.stats.mt_delivered += 1;
        }
        debug!("Simulated SBDIX: {:?}", response);
        response
    }
}

/// A desktop stand-in for the Quake modem.
///
/// Clones share one modem, so a test or the simulator binary can keep a
/// handle to queue uplinks and collect delivered packets while the flight
/// stack owns another.
#[derive(Debug, Clone)]
pub struct SimulatedQuake {
    inner: Arc<Mutex<ModemState>>,
}

impl SimulatedQuake {
    pub fn new(config: SimulationConfig) -> Self {
        let rng_state = config.seed;
        Self {
            inner: Arc::new(Mutex::new(ModemState {
                config,
                rng_state,
                waited: 0,
                last_command: ArrayString::new(),
                expected_write: None,
                mo_buffer: Vec::new(),
                mt_buffer: Vec::new(),
                mo_msn: 0,
                mt_msn: 0,
                inbox: Deque::new(),
                outbox: std::vec::Vec::new(),
                stats: SimulationStats::default(),
            })),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ModemState) -> R) -> R {
        f(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Queues a message for the satellite; it arrives with the next
    /// successful session. Returns false if it is too long or the queue is full.
    pub fn queue_uplink(&self, message: &[u8]) -> bool {
        let Ok(message) = Vec::from_slice(message) else {
            return false;
        };
        self.with_state(|state| state.inbox.push_back(message).is_ok())
    }

    pub fn queued_uplinks(&self) -> usize {
        self.with_state(|state| state.inbox.len())
    }

    /// Removes and returns every packet delivered so far.
    pub fn take_delivered(&self) -> std::vec::Vec<DeliveredPacket> {
        self.with_state(|state| std::mem::take(&mut state.outbox))
    }

    pub fn stats(&self) -> SimulationStats {
        self.with_state(|state| state.stats.clone())
    }

    pub fn last_command(&self) -> String {
        self.with_state(|state| state.last_command.to_string())
    }

    pub fn set_inject_errors(&self, enabled: bool) {
        self.with_state(|state| state.config.inject_errors = enabled);
    }
}

impl QuakeDriver for SimulatedQuake {
    fn config(&mut self, step: usize) -> nb::Result<(), QuakeError> {
        if step >= CONFIG_STEPS {
            return Err(nb::Error::Other(QuakeError::UnexpectedResponse));
        }
        self.with_state(|state| state.answer("AT&K0"))
    }

    fn query_sbdwb(&mut self, len: usize) -> nb::Result<(), QuakeError> {
        self.with_state(|state| {
            state.answer("AT+SBDWB")?;
            if len == 0 || len > MAX_MO_SIZE {
                return Err(nb::Error::Other(QuakeError::WrongLength));
            }
            state.expected_write = Some(len);
            Ok(())
        })
    }

    fn write_sbdwb(&mut self, msg: &[u8]) -> nb::Result<(), QuakeError> {
        self.with_state(|state| {
            state.answer("SBDWB data")?;
            if state.expected_write.take() != Some(msg.len()) {
                return Err(nb::Error::Other(QuakeError::WrongLength));
            }
            if state.corrupt() {
                return Err(nb::Error::Other(QuakeError::Crc));
            }
            state.mo_buffer.clear();
            state
                .mo_buffer
                .extend_from_slice(msg)
                .map_err(|()| nb::Error::Other(QuakeError::WrongLength))
        })
    }

    fn query_sbdrb(&mut self) -> nb::Result<(), QuakeError> {
        self.with_state(|state| state.answer("AT+SBDRB"))
    }

    fn read_sbdrb(&mut self, buf: &mut [u8]) -> nb::Result<usize, QuakeError> {
        self.with_state(|state| {
            state.answer("SBDRB data")?;
            if state.corrupt() {
                return Err(nb::Error::Other(QuakeError::Crc));
            }
            let len = state.mt_buffer.len().min(buf.len());
            buf[..len].copy_from_slice(&state.mt_buffer[..len]);
            Ok(len)
        })
    }

    fn query_sbdix(&mut self) -> nb::Result<(), QuakeError> {
        self.with_state(|state| state.answer("AT+SBDIX"))
    }

    fn read_sbdix(&mut self) -> nb::Result<SbdixResponse, QuakeError> {
        self.with_state(|state| {
            state.answer("+SBDIX")?;
            Ok(state.session())
        })
    }
}
