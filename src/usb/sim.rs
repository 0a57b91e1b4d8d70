//! In-process USB bus.
//!
//! Implements [`UsbTransport`] without hardware so the whole pipeline can be
//! driven deterministically: control requests and interrupt-in transfers are
//! queued until the owner completes them with [`SimulatedBus::run_control`]
//! and [`SimulatedBus::complete_in`]. Callbacks are always invoked with the
//! bus lock released, so they may submit the next request re-entrantly.

use super::descriptor::encode;
use super::{
    parse_descriptors, ControlCallback, Descriptor, DeviceId, DeviceMatch,
    EndpointDescriptor, HotplugEvent, PipeId, TransferCallback, TransferStatus, TransportError,
    UsbTransport,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const HOTPLUG_QUEUE: usize = 64;

/// A report written to a device's out pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputWrite {
    pub device: DeviceId,
    pub endpoint: u8,
    pub data: Vec<u8>,
}

/// Control request observed on the bus, kept for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    SetConfiguration { device: DeviceId, value: u8 },
    SetInterface { device: DeviceId, interface: u8, alternate: u8 },
}

struct SimDevice {
    descriptors: Vec<Descriptor>,
    endpoints: HashSet<u8>,
    fail_submissions: bool,
}

struct Pipe {
    device: DeviceId,
    endpoint: Option<u8>,
}

#[derive(Default)]
struct BusState {
    devices: HashMap<DeviceId, SimDevice>,
    next_device: i32,
    pipes: HashMap<PipeId, Pipe>,
    next_pipe: i32,
    pending_in: HashMap<PipeId, (usize, TransferCallback)>,
    pending_control: VecDeque<ControlCallback>,
    control_log: Vec<ControlRequest>,
    written: Vec<OutputWrite>,
    registered: Vec<DeviceMatch>,
    hotplug: Option<mpsc::Sender<HotplugEvent>>,
}

#[derive(Default)]
pub struct SimulatedBus {
    state: Mutex<BusState>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BusState>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::RegistrationFailed("simulated bus lock poisoned".into()))
    }

    /// Receiver for arrival/removal notifications. Replaces any previous one.
    pub fn hotplug_events(&self) -> Result<mpsc::Receiver<HotplugEvent>, TransportError> {
        let (tx, rx) = mpsc::channel(HOTPLUG_QUEUE);
        self.lock()?.hotplug = Some(tx);
        Ok(rx)
    }

    /// Attach a device described by a raw descriptor blob.
    pub fn plug(&self, raw_descriptors: &[u8]) -> Result<DeviceId, TransportError> {
        let descriptors = parse_descriptors(raw_descriptors)?;
        let endpoints = descriptors
            .iter()
            .filter_map(|d| match d {
                Descriptor::Endpoint(ep) => Some(ep.address),
                _ => None,
            })
            .collect();

        let mut state = self.lock()?;
        state.next_device += 1;
        let id = DeviceId(state.next_device);
        state.devices.insert(
            id,
            SimDevice {
                descriptors,
                endpoints,
                fail_submissions: false,
            },
        );
        debug!("Simulated device plugged: {}", id);
        Self::announce(&state, HotplugEvent::Arrived(id));
        Ok(id)
    }

    /// Remove a device. Transfers still pending on its pipes are abandoned
    /// and their callbacks are never run.
    pub fn unplug(&self, device: DeviceId) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        if state.devices.remove(&device).is_none() {
            return Err(TransportError::UnknownDevice(device));
        }
        let orphaned: Vec<PipeId> = state
            .pipes
            .iter()
            .filter(|(_, p)| p.device == device)
            .map(|(id, _)| *id)
            .collect();
        for pipe in orphaned {
            state.pipes.remove(&pipe);
            state.pending_in.remove(&pipe);
        }
        debug!("Simulated device unplugged: {}", device);
        Self::announce(&state, HotplugEvent::Removed(device));
        Ok(())
    }

    fn announce(state: &BusState, event: HotplugEvent) {
        if let Some(tx) = &state.hotplug {
            if let Err(e) = tx.try_send(event) {
                warn!("Dropping hotplug event {:?}: {}", event, e);
            }
        }
    }

    /// Make every later submission on the device's pipes fail.
    pub fn set_submit_failure(&self, device: DeviceId, fail: bool) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        let dev = state
            .devices
            .get_mut(&device)
            .ok_or(TransportError::UnknownDevice(device))?;
        dev.fail_submissions = fail;
        Ok(())
    }

    /// Complete every queued control request successfully, including ones
    /// queued by the completions themselves. Returns how many ran.
    pub fn run_control(&self) -> Result<usize, TransportError> {
        let mut ran = 0;
        loop {
            let next = self.lock()?.pending_control.pop_front();
            match next {
                Some(done) => {
                    done(TransferStatus::Completed);
                    ran += 1;
                }
                None => return Ok(ran),
            }
        }
    }

    /// Complete the pending interrupt-in transfer on `endpoint` of `device`.
    /// Returns false when no transfer was pending there.
    pub fn complete_in(
        &self,
        device: DeviceId,
        endpoint: u8,
        status: TransferStatus,
        data: &[u8],
    ) -> Result<bool, TransportError> {
        let pending = {
            let mut state = self.lock()?;
            let pipe = state
                .pipes
                .iter()
                .find(|(id, p)| {
                    p.device == device
                        && p.endpoint == Some(endpoint)
                        && state.pending_in.contains_key(id)
                })
                .map(|(id, _)| *id);
            pipe.and_then(|pipe| state.pending_in.remove(&pipe))
        };

        match pending {
            Some((length, done)) => {
                let count = data.len().min(length);
                trace!("Completing {} bytes on {} ep {:#04x}", count, device, endpoint);
                done(status, &data[..count]);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn has_pending_in(&self, device: DeviceId, endpoint: u8) -> Result<bool, TransportError> {
        let state = self.lock()?;
        Ok(state.pipes.iter().any(|(id, p)| {
            p.device == device && p.endpoint == Some(endpoint) && state.pending_in.contains_key(id)
        }))
    }

    pub fn open_pipe_count(&self, device: DeviceId) -> Result<usize, TransportError> {
        Ok(self
            .lock()?
            .pipes
            .values()
            .filter(|p| p.device == device)
            .count())
    }

    pub fn written(&self) -> Result<Vec<OutputWrite>, TransportError> {
        Ok(self.lock()?.written.clone())
    }

    pub fn control_log(&self) -> Result<Vec<ControlRequest>, TransportError> {
        Ok(self.lock()?.control_log.clone())
    }

    pub fn registered_matches(&self) -> Result<Vec<DeviceMatch>, TransportError> {
        Ok(self.lock()?.registered.clone())
    }

    fn pipe_device(state: &BusState, pipe: PipeId) -> Result<(DeviceId, Option<u8>), TransportError> {
        let entry = state
            .pipes
            .get(&pipe)
            .ok_or(TransportError::UnknownPipe(pipe))?;
        let failing = state
            .devices
            .get(&entry.device)
            .map(|d| d.fail_submissions)
            .unwrap_or(true);
        if failing {
            return Err(TransportError::SubmitFailed { pipe, code: -1 });
        }
        Ok((entry.device, entry.endpoint))
    }
}

impl UsbTransport for SimulatedBus {
    fn register_driver(&self, matches: &[DeviceMatch]) -> Result<(), TransportError> {
        self.lock()?.registered = matches.to_vec();
        Ok(())
    }

    fn unregister_driver(&self) -> Result<(), TransportError> {
        self.lock()?.registered.clear();
        Ok(())
    }

    fn descriptors(&self, device: DeviceId) -> Result<Vec<Descriptor>, TransportError> {
        self.lock()?
            .devices
            .get(&device)
            .map(|d| d.descriptors.clone())
            .ok_or(TransportError::UnknownDevice(device))
    }

    fn open_pipe(
        &self,
        device: DeviceId,
        endpoint: Option<&EndpointDescriptor>,
    ) -> Result<PipeId, TransportError> {
        let mut state = self.lock()?;
        let dev = state
            .devices
            .get(&device)
            .ok_or(TransportError::UnknownDevice(device))?;
        if let Some(ep) = endpoint {
            if !dev.endpoints.contains(&ep.address) {
                return Err(TransportError::OpenPipeFailed {
                    device,
                    endpoint: ep.address,
                    code: -2,
                });
            }
        }
        state.next_pipe += 1;
        let id = PipeId(state.next_pipe);
        state.pipes.insert(
            id,
            Pipe {
                device,
                endpoint: endpoint.map(|ep| ep.address),
            },
        );
        Ok(id)
    }

    fn close_pipe(&self, pipe: PipeId) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        state.pending_in.remove(&pipe);
        state
            .pipes
            .remove(&pipe)
            .map(|_| ())
            .ok_or(TransportError::UnknownPipe(pipe))
    }

    fn set_configuration(
        &self,
        control: PipeId,
        value: u8,
        done: ControlCallback,
    ) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        let (device, _) = Self::pipe_device(&state, control)?;
        state
            .control_log
            .push(ControlRequest::SetConfiguration { device, value });
        state.pending_control.push_back(done);
        Ok(())
    }

    fn set_interface(
        &self,
        control: PipeId,
        interface: u8,
        alternate: u8,
        done: ControlCallback,
    ) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        let (device, _) = Self::pipe_device(&state, control)?;
        state.control_log.push(ControlRequest::SetInterface {
            device,
            interface,
            alternate,
        });
        state.pending_control.push_back(done);
        Ok(())
    }

    fn interrupt_in(
        &self,
        pipe: PipeId,
        length: usize,
        done: TransferCallback,
    ) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        Self::pipe_device(&state, pipe)?;
        if state.pending_in.contains_key(&pipe) {
            return Err(TransportError::SubmitFailed { pipe, code: -3 });
        }
        state.pending_in.insert(pipe, (length, done));
        Ok(())
    }

    fn interrupt_out(
        &self,
        pipe: PipeId,
        data: Vec<u8>,
        done: ControlCallback,
    ) -> Result<(), TransportError> {
        let (device, endpoint) = {
            let mut state = self.lock()?;
            let (device, endpoint) = Self::pipe_device(&state, pipe)?;
            let endpoint = endpoint.unwrap_or(0);
            state.written.push(OutputWrite {
                device,
                endpoint,
                data,
            });
            (device, endpoint)
        };
        trace!("Output report written to {} ep {:#04x}", device, endpoint);
        done(TransferStatus::Completed);
        Ok(())
    }
}

/// Descriptor blob of a wired pad: one vendor interface with an interrupt-in
/// and an interrupt-out endpoint.
pub fn wired_pad(vendor_id: u16, product_id: u16) -> Vec<u8> {
    wired_pad_with(vendor_id, product_id, 0x81, 0x01, 0)
}

pub fn wired_pad_with(
    vendor_id: u16,
    product_id: u16,
    in_endpoint: u8,
    out_endpoint: u8,
    alternate_setting: u8,
) -> Vec<u8> {
    let mut blob = encode::device(vendor_id, product_id);
    blob.extend(encode::configuration(1, 1, 0x31));
    blob.extend(encode::interface(0, alternate_setting, 2));
    blob.extend([0x11, 0x21, 0x00, 0x01, 0x01, 0x25, 0x81, 0x14, 0x00, 0x00, 0x00, 0x00, 0x13, 0x01, 0x08, 0x00, 0x00]);
    blob.extend(encode::endpoint(in_endpoint, 0x20));
    blob.extend(encode::endpoint(out_endpoint, 0x20));
    blob
}

/// Descriptor blob of a wireless receiver: four controller interfaces
/// (in endpoints 0x81/0x83/0x85/0x87) interleaved with headset interfaces.
pub fn wireless_receiver(vendor_id: u16, product_id: u16) -> Vec<u8> {
    let mut blob = encode::device(vendor_id, product_id);
    blob.extend(encode::configuration(1, 8, 0x129));
    for channel in 0u8..4 {
        let pad_in = 0x81 + channel * 2;
        blob.extend(encode::interface(channel * 2, 0, 2));
        blob.extend(encode::endpoint(pad_in, 0x20));
        blob.extend(encode::endpoint(pad_in & 0x0f, 0x20));

        let headset_in = 0x82 + channel * 2;
        blob.extend(encode::interface(channel * 2 + 1, 0, 2));
        blob.extend(encode::endpoint(headset_in, 0x20));
        blob.extend(encode::endpoint(headset_in & 0x0f, 0x20));
    }
    blob
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn out_pipe_requires_known_endpoint() -> Result<(), TransportError> {
        let bus = SimulatedBus::new();
        let dev = bus.plug(&wired_pad_with(0x045e, 0x028e, 0x81, 0x02, 0))?;
        let ep = EndpointDescriptor {
            address: 0x01,
            attributes: 0x03,
            max_packet_size: 32,
        };
        assert!(bus.open_pipe(dev, Some(&ep)).is_err());
        assert!(bus.open_pipe(dev, Some(&ep.with_address(0x02))).is_ok());
        Ok(())
    }

    #[test]
    fn interrupt_in_completes_once_with_clamped_data() -> Result<(), TransportError> {
        let bus = SimulatedBus::new();
        let dev = bus.plug(&wired_pad(0x045e, 0x028e))?;
        let ep = EndpointDescriptor {
            address: 0x81,
            attributes: 0x03,
            max_packet_size: 32,
        };
        let pipe = bus.open_pipe(dev, Some(&ep))?;
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = Arc::clone(&seen);
        bus.interrupt_in(
            pipe,
            4,
            Box::new(move |_, data| {
                seen_cb.store(data.len(), Ordering::SeqCst);
            }),
        )?;
        assert!(bus.complete_in(dev, 0x81, TransferStatus::Completed, &[1, 2, 3, 4, 5, 6])?);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
        assert!(!bus.complete_in(dev, 0x81, TransferStatus::Completed, &[1])?);
        Ok(())
    }

    #[test]
    fn submissions_complete_only_when_driven() -> Result<(), TransportError> {
        let bus = SimulatedBus::new();
        let dev = bus.plug(&wired_pad(0x045e, 0x028e))?;
        let control = bus.open_pipe(dev, None)?;
        let ep = EndpointDescriptor {
            address: 0x81,
            attributes: 0x03,
            max_packet_size: 32,
        };
        let pipe = bus.open_pipe(dev, Some(&ep))?;
        let fired = Arc::new(AtomicUsize::new(0));

        let on_config = Arc::clone(&fired);
        bus.set_configuration(
            control,
            1,
            Box::new(move |_| {
                on_config.fetch_add(1, Ordering::SeqCst);
            }),
        )?;
        let on_input = Arc::clone(&fired);
        bus.interrupt_in(
            pipe,
            32,
            Box::new(move |_, _: &[u8]| {
                on_input.fetch_add(1, Ordering::SeqCst);
            }),
        )?;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        assert_eq!(bus.run_control()?, 1);
        assert!(bus.complete_in(dev, 0x81, TransferStatus::Completed, &[0; 20])?);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn receiver_blob_lists_four_pad_endpoints() -> Result<(), crate::usb::DescriptorError> {
        let descriptors = parse_descriptors(&wireless_receiver(0x045e, 0x0719))?;
        let pads = descriptors
            .iter()
            .filter(|d| {
                matches!(d, Descriptor::Endpoint(ep) if matches!(ep.address, 0x81 | 0x83 | 0x85 | 0x87))
            })
            .count();
        assert_eq!(pads, 4);
        Ok(())
    }
}
