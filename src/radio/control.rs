use super::driver::{QuakeDriver, QuakeError, SbdixResponse, CONFIG_STEPS, MAX_MO_SIZE, MAX_MT_SIZE};
use heapless::Vec;
use tracing::trace;

/// Modem operation in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuakeOp {
    Idle,
    /// Write the MO buffer.
    Sbdwb,
    /// Read the MT buffer.
    Sbdrb,
    /// Run an SBD session.
    Sbdix,
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Idle,
    Pending,
    Complete(QuakeOp),
}

/// Runs one modem operation a step per control cycle.
#[derive(Debug)]
pub struct QuakeControlTask<D> {
    driver: D,
    op: QuakeOp,
    step: usize,
    mo_buffer: Vec<u8, MAX_MO_SIZE>,
    mt_buffer: Vec<u8, MAX_MT_SIZE>,
    sbdix: SbdixResponse,
}

impl<D: QuakeDriver> QuakeControlTask<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            op: QuakeOp::Idle,
            step: 0,
            mo_buffer: Vec::new(),
            mt_buffer: Vec::new(),
            sbdix: SbdixResponse::default(),
        }
    }

    pub fn op(&self) -> QuakeOp {
        self.op
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Starts `op`. Refused while another operation runs, except that
    /// `Config` may always interrupt.
    pub fn request(&mut self, op: QuakeOp) -> bool {
        if self.op != QuakeOp::Idle && op != QuakeOp::Config {
            return false;
        }
        self.op = op;
        self.step = 0;
        true
    }

    /// Drops the current operation.
    pub fn abort(&mut self) {
        self.op = QuakeOp::Idle;
        self.step = 0;
    }

    pub fn set_downlink_msg(&mut self, msg: &[u8]) -> Result<(), QuakeError> {
        self.mo_buffer.clear();
        self.mo_buffer.extend_from_slice(msg).map_err(|()| QuakeError::WrongLength)
    }

    pub fn downlink_msg(&self) -> &[u8] {
        &self.mo_buffer
    }

    /// Last message read with SBDRB.
    pub fn mt_message(&self) -> &[u8] {
        &self.mt_buffer
    }

    pub fn sbdix_response(&self) -> SbdixResponse {
        self.sbdix
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Advances the current operation by at most one step.
    ///
    /// On a driver error the operation is dropped and the error returned.
    pub fn execute(&mut self) -> Result<Progress, QuakeError> {
        let result = match (self.op, self.step) {
            (QuakeOp::Idle, _) => return Ok(Progress::Idle),
            (QuakeOp::Config, step) => self.driver.config(step),
            (QuakeOp::Sbdwb, 0) => self.driver.query_sbdwb(self.mo_buffer.len()),
            (QuakeOp::Sbdwb, _) => self.driver.write_sbdwb(&self.mo_buffer),
            (QuakeOp::Sbdrb, 0) => self.driver.query_sbdrb(),
            (QuakeOp::Sbdrb, _) => self.read_mt(),
            (QuakeOp::Sbdix, 0) => self.driver.query_sbdix(),
            (QuakeOp::Sbdix, _) => self.driver.read_sbdix().map(|response| self.sbdix = response),
        };

        match result {
            Ok(()) => {
                self.step += 1;
                let last_step = if self.op == QuakeOp::Config { CONFIG_STEPS } else { 2 };
                trace!("Quake {:?} step {}/{}", self.op, self.step, last_step);
                if self.step >= last_step {
                    let done = self.op;
                    self.abort();
                    Ok(Progress::Complete(done))
                } else {
                    Ok(Progress::Pending)
                }
            }
            Err(nb::Error::WouldBlock) => Ok(Progress::Pending),
            Err(nb::Error::Other(err)) => {
                self.abort();
                Err(err)
            }
        }
    }

    fn read_mt(&mut self) -> nb::Result<(), QuakeError> {
        let mut buf = [0u8; MAX_MT_SIZE];
        let len = self.driver.read_sbdrb(&mut buf)?;
        self.mt_buffer.clear();
        self.mt_buffer
            .extend_from_slice(&buf[..len.min(MAX_MT_SIZE)])
            .map_err(|()| nb::Error::Other(QuakeError::WrongLength))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::sim::{SimulatedQuake, SimulationConfig};

    fn run_to_completion(task: &mut QuakeControlTask<SimulatedQuake>) -> Result<QuakeOp, QuakeError> {
        for _ in 0..32 {
            if let Progress::Complete(op) = task.execute()? {
                return Ok(op);
            }
        }
        panic!("operation did not complete");
    }

    #[test]
    fn test_request_rules() {
        let mut task = QuakeControlTask::new(SimulatedQuake::new(SimulationConfig::ideal()));
        assert!(task.request(QuakeOp::Sbdix));
        assert!(!task.request(QuakeOp::Sbdwb));
        assert!(task.request(QuakeOp::Config));
        assert_eq!(task.op(), QuakeOp::Config);
        assert_eq!(task.step(), 0);
    }

    #[test]
    fn test_config_takes_all_steps() {
        let mut task = QuakeControlTask::new(SimulatedQuake::new(SimulationConfig::ideal()));
        task.request(QuakeOp::Config);
        for _ in 1..CONFIG_STEPS {
            assert_eq!(task.execute(), Ok(Progress::Pending));
        }
        assert_eq!(task.execute(), Ok(Progress::Complete(QuakeOp::Config)));
        assert_eq!(task.execute(), Ok(Progress::Idle));
    }

    #[test]
    fn test_write_then_session_delivers() {
        let modem = SimulatedQuake::new(SimulationConfig::ideal());
        let mut task = QuakeControlTask::new(modem.clone());

        task.set_downlink_msg(&[0xAB; 70]).unwrap();
        task.request(QuakeOp::Sbdwb);
        assert_eq!(run_to_completion(&mut task), Ok(QuakeOp::Sbdwb));

        task.request(QuakeOp::Sbdix);
        assert_eq!(run_to_completion(&mut task), Ok(QuakeOp::Sbdix));
        assert!(task.sbdix_response().mo_succeeded());

        let delivered = modem.take_delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].data, vec![0xAB; 70]);
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut task = QuakeControlTask::new(SimulatedQuake::new(SimulationConfig::ideal()));
        assert_eq!(task.set_downlink_msg(&[0; MAX_MO_SIZE + 1]), Err(QuakeError::WrongLength));
    }
}
