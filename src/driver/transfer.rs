//! Transfer engine with statum state machine
//!
//! Each unit gets one engine, driven entirely by transport completion
//! callbacks. The machine is moved into the callback of every request it
//! submits, so exactly one request per unit is outstanding at any time.
//!
//! # State Machine
//!
//! ```text
//! Idle ──► ConfigurationPending ──► InterfacePending ──► TransferPending ─┐
//!                 │                  (alternate > 0)          ▲           │
//!                 └───────────────────────────────────────────┘           │
//!                                                             └───────────┘
//!                                                        (every completion)
//! ```
//!
//! Every completion is captured into the unit's ring regardless of its
//! result code, then the next interrupt transfer is submitted. The loop
//! ends when the unit is deactivated, its ring is gone, a submission
//! fails, or the optional consecutive-failure limit is reached.

use super::ring_buffer::{Frame, FrameStore, FrameStoreError, PushOutcome};
use super::unit::DeviceUnit;
use crate::usb::{TransferStatus, TransportError, UsbTransport};
use statum::{machine, state};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Resubmission policy for failed completions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// Stop after this many failed completions in a row. `None` resubmits
    /// forever.
    pub max_consecutive_failures: Option<u32>,
}

#[state]
#[derive(Debug, Clone)]
pub enum TransferState {
    Idle,
    ConfigurationPending,
    InterfacePending,
    TransferPending,
}

#[machine]
pub struct TransferEngine<S: TransferState> {
    unit: Arc<DeviceUnit>,
    transport: Arc<dyn UsbTransport>,
    frames: Arc<FrameStore>,
    policy: RetryPolicy,
    consecutive_failures: u32,
}

impl<S: TransferState> TransferEngine<S> {
    pub fn unit(&self) -> &Arc<DeviceUnit> {
        &self.unit
    }

    // Units freed by detach stop here
    fn still_wanted(&self) -> bool {
        if self.unit.is_active() {
            return true;
        }
        debug!("{} detached, engine stopping", self.unit);
        false
    }
}

impl TransferEngine<Idle> {
    pub fn create(
        unit: Arc<DeviceUnit>,
        transport: Arc<dyn UsbTransport>,
        frames: Arc<FrameStore>,
        policy: RetryPolicy,
    ) -> Self {
        debug!("Creating transfer engine for {}", unit);
        Self::new(unit, transport, frames, policy, 0)
    }

    /// Submit SET_CONFIGURATION. Only the submission result is reported;
    /// everything after it happens in completion callbacks.
    pub fn start(self) -> Result<(), TransportError> {
        let transport = Arc::clone(&self.transport);
        let control = self.unit.pipes.control;
        let value = self.unit.layout.configuration;
        debug!("{}: setting configuration {}", self.unit, value);

        let pending: TransferEngine<ConfigurationPending> = self.transition();
        transport.set_configuration(
            control,
            value,
            Box::new(move |status| pending.on_configured(status)),
        )
    }
}

impl TransferEngine<ConfigurationPending> {
    fn on_configured(self, status: TransferStatus) {
        if !status.is_ok() {
            warn!("{}: set configuration returned {:?}", self.unit, status);
        }
        if !self.still_wanted() {
            return;
        }

        if self.unit.layout.alternate > 0 {
            let transport = Arc::clone(&self.transport);
            let control = self.unit.pipes.control;
            let interface = self.unit.layout.interface;
            let alternate = self.unit.layout.alternate;
            debug!(
                "{}: selecting interface {} alternate {}",
                self.unit, interface, alternate
            );

            let pending: TransferEngine<InterfacePending> = self.transition();
            let unit = Arc::clone(&pending.unit);
            if let Err(e) = transport.set_interface(
                control,
                interface,
                alternate,
                Box::new(move |status| pending.on_interface_selected(status)),
            ) {
                error!("{}: set interface submission failed: {}", unit, e);
            }
        } else {
            let streaming: TransferEngine<TransferPending> = self.transition();
            streaming.submit();
        }
    }
}

impl TransferEngine<InterfacePending> {
    fn on_interface_selected(self, status: TransferStatus) {
        if !status.is_ok() {
            warn!("{}: set interface returned {:?}", self.unit, status);
        }
        if !self.still_wanted() {
            return;
        }
        let streaming: TransferEngine<TransferPending> = self.transition();
        streaming.submit();
    }
}

impl TransferEngine<TransferPending> {
    fn submit(self) {
        let transport = Arc::clone(&self.transport);
        let unit = Arc::clone(&self.unit);
        let pipe = unit.pipes.input;
        let length = unit.payload();

        let submitted = transport.interrupt_in(
            pipe,
            length,
            Box::new(move |status, data: &[u8]| self.on_complete(status, data)),
        );
        if let Err(e) = submitted {
            // Nothing will complete, so input for this unit stops here.
            warn!("{}: interrupt transfer submission failed: {}", unit, e);
        }
    }

    fn on_complete(mut self, status: TransferStatus, data: &[u8]) {
        if !self.still_wanted() {
            return;
        }
        self.unit.record_completion(status.is_ok());

        let frame = Frame::capture(self.unit.next_sequence(), data, self.unit.payload());
        match self.frames.push(self.unit.key, frame) {
            Ok(PushOutcome::Queued) => trace!("{}: frame queued ({} bytes)", self.unit, data.len()),
            Ok(PushOutcome::Dropped) => trace!("{}: ring full, frame dropped", self.unit),
            Err(FrameStoreError::UnitGone(_)) => {
                debug!("{}: ring removed, engine stopping", self.unit);
                return;
            }
            Err(e) => {
                error!("{}: frame store failure, engine stopping: {}", self.unit, e);
                return;
            }
        }

        if status.is_ok() {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            debug!(
                "{}: transfer failed with {:?} ({} in a row)",
                self.unit, status, self.consecutive_failures
            );
            if let Some(limit) = self.policy.max_consecutive_failures {
                if self.consecutive_failures >= limit {
                    warn!(
                        "{}: {} consecutive transfer failures, no longer resubmitting",
                        self.unit, self.consecutive_failures
                    );
                    return;
                }
            }
        }

        self.submit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ring_buffer::UnitKey;
    use crate::driver::unit::{UnitLayout, UnitPipes};
    use crate::protocol::ReportFormat;
    use crate::usb::sim::{self, ControlRequest, SimulatedBus};
    use crate::usb::{DeviceId, EndpointDescriptor};

    struct Rig {
        bus: Arc<SimulatedBus>,
        frames: Arc<FrameStore>,
        unit: Arc<DeviceUnit>,
    }

    fn rig(alternate: u8, policy: RetryPolicy) -> Result<Rig, Box<dyn std::error::Error>> {
        let bus = Arc::new(SimulatedBus::new());
        let device = bus.plug(&sim::wired_pad_with(0x045e, 0x028e, 0x81, 0x01, alternate))?;
        let input = EndpointDescriptor {
            address: 0x81,
            attributes: 0x03,
            max_packet_size: 0x20,
        };
        let pipes = UnitPipes {
            control: bus.open_pipe(device, None)?,
            input: bus.open_pipe(device, Some(&input))?,
            output: bus.open_pipe(device, Some(&input.with_address(0x01)))?,
        };
        let frames = Arc::new(FrameStore::new(7, 10));
        let key = frames.install(0)?;
        let layout = UnitLayout {
            format: ReportFormat::Wired,
            configuration: 1,
            interface: 0,
            alternate,
            input,
            output_candidates: vec![0x01],
        };
        let unit = Arc::new(DeviceUnit::new(device, key, layout, pipes));
        let transport: Arc<dyn UsbTransport> = bus.clone();
        TransferEngine::create(Arc::clone(&unit), transport, Arc::clone(&frames), policy)
            .start()?;
        Ok(Rig { bus, frames, unit })
    }

    fn device(rig: &Rig) -> DeviceId {
        rig.unit.device
    }

    #[test]
    fn configuration_then_streaming() -> Result<(), Box<dyn std::error::Error>> {
        let rig = rig(0, RetryPolicy::default())?;
        assert!(!rig.bus.has_pending_in(device(&rig), 0x81)?);
        assert_eq!(rig.bus.run_control()?, 1);
        assert!(rig.bus.has_pending_in(device(&rig), 0x81)?);

        for n in 0..3u8 {
            assert!(rig.bus.complete_in(device(&rig), 0x81, TransferStatus::Completed, &[n; 20])?);
        }
        let sequences: Vec<u8> = std::iter::from_fn(|| rig.frames.pop(rig.unit.key).ok().flatten())
            .map(|f| f.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(rig.bus.has_pending_in(device(&rig), 0x81)?);
        Ok(())
    }

    #[test]
    fn alternate_setting_inserts_interface_step() -> Result<(), Box<dyn std::error::Error>> {
        let rig = rig(2, RetryPolicy::default())?;
        assert_eq!(rig.bus.run_control()?, 2);
        let log = rig.bus.control_log()?;
        assert_eq!(
            log,
            vec![
                ControlRequest::SetConfiguration {
                    device: device(&rig),
                    value: 1
                },
                ControlRequest::SetInterface {
                    device: device(&rig),
                    interface: 0,
                    alternate: 2
                },
            ]
        );
        assert!(rig.bus.has_pending_in(device(&rig), 0x81)?);
        Ok(())
    }

    #[test]
    fn failed_completions_still_produce_frames() -> Result<(), Box<dyn std::error::Error>> {
        let rig = rig(0, RetryPolicy::default())?;
        rig.bus.run_control()?;
        rig.bus.complete_in(device(&rig), 0x81, TransferStatus::Failed(-5), &[])?;
        let frame = rig.frames.pop(rig.unit.key)?;
        assert_eq!(frame.map(|f| f.length), Some(0));
        assert!(rig.bus.has_pending_in(device(&rig), 0x81)?);
        assert_eq!(rig.unit.failures(), 1);
        Ok(())
    }

    #[test]
    fn failure_limit_stops_resubmission() -> Result<(), Box<dyn std::error::Error>> {
        let policy = RetryPolicy {
            max_consecutive_failures: Some(2),
        };
        let rig = rig(0, policy)?;
        rig.bus.run_control()?;
        rig.bus.complete_in(device(&rig), 0x81, TransferStatus::Failed(-1), &[])?;
        rig.bus.complete_in(device(&rig), 0x81, TransferStatus::Completed, &[0; 20])?;
        rig.bus.complete_in(device(&rig), 0x81, TransferStatus::Failed(-1), &[])?;
        assert!(rig.bus.has_pending_in(device(&rig), 0x81)?);
        rig.bus.complete_in(device(&rig), 0x81, TransferStatus::Failed(-1), &[])?;
        assert!(!rig.bus.has_pending_in(device(&rig), 0x81)?);
        Ok(())
    }

    #[test]
    fn completion_after_free_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
        let rig = rig(0, RetryPolicy::default())?;
        rig.bus.run_control()?;
        rig.frames.remove(rig.unit.key)?;
        rig.bus.complete_in(device(&rig), 0x81, TransferStatus::Completed, &[0; 20])?;
        assert!(!rig.bus.has_pending_in(device(&rig), 0x81)?);

        let fresh = rig.frames.install(0)?;
        assert_eq!(rig.frames.queued(fresh)?, 0);
        Ok(())
    }

    #[test]
    fn deactivated_unit_stops_before_capture() -> Result<(), Box<dyn std::error::Error>> {
        let rig = rig(0, RetryPolicy::default())?;
        rig.bus.run_control()?;
        rig.unit.deactivate();
        rig.bus.complete_in(device(&rig), 0x81, TransferStatus::Completed, &[0; 20])?;
        assert_eq!(rig.frames.queued(rig.unit.key)?, 0);
        assert!(!rig.bus.has_pending_in(device(&rig), 0x81)?);
        Ok(())
    }

    #[test]
    fn stalled_submission_silences_unit() -> Result<(), Box<dyn std::error::Error>> {
        let rig = rig(0, RetryPolicy::default())?;
        rig.bus.run_control()?;
        rig.bus.set_submit_failure(device(&rig), true)?;
        rig.bus.complete_in(device(&rig), 0x81, TransferStatus::Completed, &[0; 20])?;
        assert_eq!(rig.frames.queued(rig.unit.key)?, 1);
        assert!(!rig.bus.has_pending_in(device(&rig), 0x81)?);
        Ok(())
    }
}
