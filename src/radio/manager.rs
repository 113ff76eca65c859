use super::control::{Progress, QuakeControlTask, QuakeOp};
use super::driver::{QuakeDriver, QuakeError, NO_ERROR};
use super::{RadioEvent, RadioMode, MAX_RADIO_MODE};
use crate::config::RadioConfig;
use crate::downlink::{chunk_count, DOWNLINK_PTR_FIELD, DOWNLINK_SNAP_SIZE_FIELD};
use crate::fault::Fault;
use crate::field::StateField;
use crate::registry::{RegistryError, StateFieldRegistry, TaskId};
use crate::scheduler::{ControlTask, CYCLE_NO_FIELD};
use crate::serializer::Serializer;
use crate::uplink::{UPLINK_ACK_FIELD, UPLINK_LEN_FIELD, UPLINK_PTR_FIELD, UPLINK_SEQ_FIELD};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const STATE_FIELD: &str = "radio.state";
const ERR_FIELD: &str = "radio.err";
const LAST_COMMS_FIELD: &str = "radio.last_comms_ccno";
const CHECKIN_INTERVAL_FIELD: &str = "radio.checkin_interval";
const MANUAL_FIELD: &str = "radio.manual";
const FORCE_CHECKIN_FIELD: &str = "radio.force_checkin";
const FAULT_NAME: &str = "radio.fault";

const MAX_CHECKIN_INTERVAL: u32 = 100_000;
/// Errors or budget escalations without a completed session before
/// `radio.fault` is raised.
const RADIO_FAULT_PERSISTENCE: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RadioStats {
    pub transitions: u32,
    pub sessions_completed: u32,
    pub chunks_sent: u32,
    pub snapshots_sent: u32,
    pub mo_failures: u32,
    pub uplinks_received: u32,
    pub driver_errors: u32,
    pub budget_exhaustions: u32,
}

/// The radio link state machine.
///
/// Each cycle it advances the modem operation belonging to the current
/// mode by one step, and moves between modes on completions, driver errors,
/// ground commands and cycle budgets. Downlink snapshots go out as
/// `packet_size` chunks, one SBDWB + SBDIX pair per chunk. Received MT
/// messages are handed to the uplink consumer through `uplink.ptr`.
#[derive(Debug)]
pub struct QuakeManager<D> {
    id: TaskId,
    config: RadioConfig,
    control: QuakeControlTask<D>,
    mode: RadioMode,

    cycle_no: Arc<StateField<u32>>,
    state: Arc<StateField<u8>>,
    err: Arc<StateField<u8>>,
    last_comms_ccno: Arc<StateField<u32>>,
    checkin_interval: Arc<StateField<u32>>,
    manual: Arc<StateField<bool>>,
    force_checkin: Arc<StateField<bool>>,
    snapshot: Arc<StateField<Vec<u8>>>,
    snap_size: Arc<StateField<usize>>,
    uplink_ptr: Arc<StateField<Vec<u8>>>,
    uplink_len: Arc<StateField<usize>>,
    uplink_seq: Arc<StateField<u32>>,
    uplink_ack: Arc<StateField<u32>>,
    fault: Fault,

    last_checkin_cycle: u32,
    mo_buffer_copy: Vec<u8>,
    mo_idx: usize,
    chunk_total: usize,
    chunk_written: bool,
    unexpected_flag: bool,
    reconfigure_pending: bool,
    stats: RadioStats,
}

impl<D: QuakeDriver> QuakeManager<D> {
    pub fn new(registry: &mut StateFieldRegistry, config: &RadioConfig, driver: D) -> Result<Self, RegistryError> {
        let id = TaskId::from("quake_manager");

        let state = registry.create_readable_field(STATE_FIELD, Serializer::<u8>::new(MAX_RADIO_MODE))?;
        let err = registry.create_readable_field(ERR_FIELD, Serializer::<u8>::new(QuakeError::UnexpectedResponse.code()))?;
        let last_comms_ccno = registry.create_readable_field(LAST_COMMS_FIELD, Serializer::<u32>::new(u32::MAX))?;
        let checkin_interval =
            registry.create_writable_field(CHECKIN_INTERVAL_FIELD, Serializer::<u32>::new(MAX_CHECKIN_INTERVAL))?;
        let manual = registry.create_writable_field(MANUAL_FIELD, Serializer::<bool>::new())?;
        let force_checkin = registry.create_writable_field(FORCE_CHECKIN_FIELD, Serializer::<bool>::new())?;
        checkin_interval.set(config.max_wait_cycles.min(MAX_CHECKIN_INTERVAL));

        let cycle_no = registry.require_field::<u32>(CYCLE_NO_FIELD)?;
        let snapshot = registry.require_internal_field::<Vec<u8>>(DOWNLINK_PTR_FIELD)?;
        let snap_size = registry.require_internal_field::<usize>(DOWNLINK_SNAP_SIZE_FIELD)?;
        let uplink_ptr = registry.require_internal_field::<Vec<u8>>(UPLINK_PTR_FIELD)?;
        let uplink_len = registry.require_internal_field::<usize>(UPLINK_LEN_FIELD)?;
        let uplink_seq = registry.require_internal_field::<u32>(UPLINK_SEQ_FIELD)?;
        let uplink_ack = registry.require_internal_field::<u32>(UPLINK_ACK_FIELD)?;

        let fault = Fault::new(FAULT_NAME, RADIO_FAULT_PERSISTENCE, cycle_no.clone());
        fault.add_to_registry(registry)?;

        for name in [
            STATE_FIELD,
            ERR_FIELD,
            LAST_COMMS_FIELD,
            FORCE_CHECKIN_FIELD,
            UPLINK_PTR_FIELD,
            UPLINK_LEN_FIELD,
            UPLINK_SEQ_FIELD,
            FAULT_NAME,
        ] {
            registry.add_writer(&id, name)?;
        }
        for name in [
            CYCLE_NO_FIELD,
            CHECKIN_INTERVAL_FIELD,
            MANUAL_FIELD,
            DOWNLINK_PTR_FIELD,
            DOWNLINK_SNAP_SIZE_FIELD,
            UPLINK_ACK_FIELD,
        ] {
            registry.add_reader(&id, name)?;
        }

        Ok(Self {
            id,
            config: config.clone(),
            control: QuakeControlTask::new(driver),
            mode: RadioMode::Config,
            last_checkin_cycle: cycle_no.get(),
            cycle_no,
            state,
            err,
            last_comms_ccno,
            checkin_interval,
            manual,
            force_checkin,
            snapshot,
            snap_size,
            uplink_ptr,
            uplink_len,
            uplink_seq,
            uplink_ack,
            fault,
            mo_buffer_copy: Vec::new(),
            mo_idx: 0,
            chunk_total: 1,
            chunk_written: false,
            unexpected_flag: false,
            reconfigure_pending: false,
            stats: RadioStats::default(),
        })
    }

    pub fn mode(&self) -> RadioMode {
        self.mode
    }

    pub fn get_stats(&self) -> &RadioStats {
        &self.stats
    }

    pub fn fault(&self) -> &Fault {
        &self.fault
    }

    /// Index of the next downlink chunk to send.
    pub fn mo_idx(&self) -> usize {
        self.mo_idx
    }

    pub fn unexpected_flag(&self) -> bool {
        self.unexpected_flag
    }

    pub fn reconfigure_pending(&self) -> bool {
        self.reconfigure_pending
    }

    pub fn control(&self) -> &QuakeControlTask<D> {
        &self.control
    }

    pub fn driver(&self) -> &D {
        self.control.driver()
    }

    /// Ground sets the check-in interval, but never past the WAIT budget.
    fn wait_budget(&self) -> u32 {
        self.checkin_interval.get().min(self.config.max_wait_cycles)
    }

    fn no_more_cycles(&self, budget: u32, cycle: u32) -> bool {
        cycle.wrapping_sub(self.last_checkin_cycle) >= budget
    }

    fn transition(&mut self, event: RadioEvent, cycle: u32) {
        let next = self.mode.next(event);
        if next == self.mode {
            return;
        }
        info!("Radio {:?} -> {:?} ({:?}) at cycle {}", self.mode, next, event, cycle);

        self.mode = next;
        self.state.set(next.code());
        self.last_checkin_cycle = cycle;
        self.last_comms_ccno.set(cycle);
        self.stats.transitions += 1;

        match next {
            RadioMode::Wait => {
                // idle modem; an unexpected exit means reconfigure before the next session
                self.control.abort();
                self.reconfigure_pending |= self.unexpected_flag;
                self.unexpected_flag = false;
            }
            RadioMode::Config => self.reconfigure_pending = false,
            // ground owns the modem now
            RadioMode::Manual => self.control.abort(),
            _ => {}
        }
    }

    fn handle_error(&mut self, err: QuakeError, cycle: u32) {
        warn!("Quake error in {:?}: {}", self.mode, err);
        self.err.set(err.code());
        self.unexpected_flag = true;
        self.fault.signal();
        self.stats.driver_errors += 1;
        self.transition(RadioEvent::Fault, cycle);
    }

    /// Leaves the current mode once its budget is spent. Running out of
    /// time in Transceive is normal link loss and is not flagged.
    fn exhaust(&mut self, cycle: u32, unexpected: bool) {
        warn!("Radio {:?} budget exhausted at cycle {}", self.mode, cycle);
        if unexpected {
            self.unexpected_flag = true;
        }
        self.fault.signal();
        self.control.abort();
        self.stats.budget_exhaustions += 1;
        self.transition(RadioEvent::BudgetExhausted, cycle);
    }

    fn dispatch_config(&mut self, cycle: u32) {
        if self.no_more_cycles(self.config.max_config_cycles, cycle) {
            self.exhaust(cycle, true);
            return;
        }
        if self.control.op() != QuakeOp::Config {
            self.control.request(QuakeOp::Config);
        }
        match self.control.execute() {
            Ok(Progress::Complete(QuakeOp::Config)) => {
                self.err.set(NO_ERROR);
                self.transition(RadioEvent::Configured, cycle);
            }
            Ok(_) => {}
            Err(err) => self.handle_error(err, cycle),
        }
    }

    fn dispatch_wait(&mut self, cycle: u32) {
        if self.force_checkin.get() {
            // one-shot command
            self.force_checkin.set(false);
            self.transition(RadioEvent::ForcedCheckin, cycle);
        } else if self.no_more_cycles(self.wait_budget(), cycle) {
            let event = if self.reconfigure_pending {
                RadioEvent::ReconfigureDue
            } else {
                RadioEvent::CheckinDue
            };
            self.transition(event, cycle);
        }
    }

    fn dispatch_transceive(&mut self, cycle: u32) {
        if self.no_more_cycles(self.config.max_transceive_cycles, cycle) {
            self.exhaust(cycle, false);
            return;
        }
        // SBDIX sends whatever is in the MO buffer, so write the chunk first
        if !self.chunk_written {
            self.transition(RadioEvent::ChunkPending, cycle);
            return;
        }
        if self.control.op() == QuakeOp::Idle {
            self.control.request(QuakeOp::Sbdix);
        }
        match self.control.execute() {
            Ok(Progress::Complete(QuakeOp::Sbdix)) => self.finish_session(cycle),
            Ok(_) => {}
            Err(err) => self.handle_error(err, cycle),
        }
    }

    fn finish_session(&mut self, cycle: u32) {
        let response = self.control.sbdix_response();
        // keep the same chunk and try again until the budget runs out
        if !response.mo_succeeded() {
            debug!("SBDIX MO status {}, retrying", response.mo_status);
            self.stats.mo_failures += 1;
            self.transition(RadioEvent::SessionRetry, cycle);
            return;
        }

        self.stats.chunks_sent += 1;
        self.chunk_written = false;
        self.mo_idx += 1;
        // last chunk out, the next write takes a fresh snapshot
        if self.mo_idx >= self.chunk_total {
            self.mo_idx = 0;
            self.stats.snapshots_sent += 1;
        }
        self.err.set(NO_ERROR);

        let mt_pending = response.mt_received();
        let more_data = self.mo_idx != 0;
        // a full round trip with nothing left over clears the fault
        if !mt_pending && !more_data {
            self.stats.sessions_completed += 1;
            self.fault.unsignal();
        }
        self.transition(RadioEvent::SessionDone { mt_pending, more_data }, cycle);
    }

    fn load_snapshot(&mut self) {
        self.mo_buffer_copy = self.snapshot.get();
        self.chunk_total = chunk_count(self.snap_size.get(), self.config.packet_size).max(1);
    }

    fn current_chunk(&self) -> Vec<u8> {
        let packet_size = self.config.packet_size;
        // zero padded past the end of the snapshot
        let mut chunk = vec![0u8; packet_size];
        if let Some(src) = self.mo_buffer_copy.get(self.mo_idx * packet_size..) {
            let len = src.len().min(packet_size);
            chunk[..len].copy_from_slice(&src[..len]);
        }
        chunk
    }

    fn dispatch_write(&mut self, cycle: u32) {
        if self.no_more_cycles(self.config.max_write_cycles, cycle) {
            self.exhaust(cycle, true);
            return;
        }
        if self.control.op() == QuakeOp::Idle {
            // all chunks of one snapshot come from the same cycle
            if self.mo_idx == 0 {
                self.load_snapshot();
            }
            let chunk = self.current_chunk();
            if let Err(err) = self.control.set_downlink_msg(&chunk) {
                self.handle_error(err, cycle);
                return;
            }
            self.control.request(QuakeOp::Sbdwb);
        }
        match self.control.execute() {
            Ok(Progress::Complete(QuakeOp::Sbdwb)) => {
                self.chunk_written = true;
                self.transition(RadioEvent::Written, cycle);
            }
            Ok(_) => {}
            Err(err) => self.handle_error(err, cycle),
        }
    }

    fn dispatch_read(&mut self, cycle: u32) {
        if self.no_more_cycles(self.config.max_read_cycles, cycle) {
            self.exhaust(cycle, true);
            return;
        }
        if self.control.op() == QuakeOp::Idle {
            self.control.request(QuakeOp::Sbdrb);
        }
        match self.control.execute() {
            Ok(Progress::Complete(QuakeOp::Sbdrb)) => {
                self.deliver_uplink();
                // go back for the rest of the snapshot or the next queued MT message
                let more = self.mo_idx != 0 || self.control.sbdix_response().mt_queued > 0;
                self.transition(RadioEvent::ReadDone { more }, cycle);
            }
            Ok(_) => {}
            Err(err) => self.handle_error(err, cycle),
        }
    }

    /// Frees the MT buffer once the consumer has acknowledged it.
    fn release_uplink(&self) {
        if self.uplink_len.get() != 0 && self.uplink_ack.get() == self.uplink_seq.get() {
            self.uplink_len.set(0);
        }
    }

    fn deliver_uplink(&mut self) {
        let message = self.control.mt_message();
        let len = message.len();
        // overwrites any message the consumer never acknowledged
        self.uplink_ptr.update(|buf| {
            if buf.len() < len {
                buf.resize(len, 0);
            }
            buf[..len].copy_from_slice(message);
        });
        self.uplink_len.set(len);
        self.uplink_seq.update(|seq| *seq = seq.wrapping_add(1));
        self.stats.uplinks_received += 1;
        info!("Received {} byte uplink", len);
    }
}

impl<D: QuakeDriver> ControlTask for QuakeManager<D> {
    fn name(&self) -> &str {
        self.id.as_str()
    }

    fn execute(&mut self) {
        let cycle = self.cycle_no.get();
        self.release_uplink();

        // manual overrides every budget and pending command
        if self.manual.get() {
            if self.mode != RadioMode::Manual {
                self.transition(RadioEvent::ManualRequested, cycle);
            }
        } else {
            match self.mode {
                RadioMode::Config => self.dispatch_config(cycle),
                RadioMode::Wait => self.dispatch_wait(cycle),
                RadioMode::Transceive => self.dispatch_transceive(cycle),
                RadioMode::Write => self.dispatch_write(cycle),
                RadioMode::Read => self.dispatch_read(cycle),
                RadioMode::Manual => self.transition(RadioEvent::ManualReleased, cycle),
            }
        }

        // once per cycle, after any signal from the dispatch above
        self.fault.evaluate();
    }
}
