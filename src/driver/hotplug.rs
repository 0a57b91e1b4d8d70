//! Device lifecycle: probe, attach, pairing and detach.
//!
//! ```text
//! Free ──probe──► ProbeMatched ──attach──► Attached ──detach──► Free
//!                                             │  ▲
//!                          (wireless) paired  ▼  │ unpaired
//!                                            Paired
//! ```
//!
//! Wired pads register a virtual controller as soon as they attach. Wireless
//! receiver channels only do so once a pad pairs, and give the controller
//! back when it unpairs, so one slot can serve many pairing sessions.

use super::registry::Registry;
use super::ring_buffer::FrameStoreError;
use super::transfer::TransferEngine;
use super::unit::{DeviceUnit, UnitLayout, UnitPipes};
use super::{Driver, DriverError};
use crate::pad::{port_setting, PadError, PadHandle, CAPABILITY_MASK};
use crate::protocol::{ids, output, ReportFormat};
use crate::usb::{
    ConfigurationDescriptor, Descriptor, DeviceId, EndpointDescriptor, HotplugEvent,
    InterfaceDescriptor, PipeId, TransportError,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const WIRED_IN_ENDPOINT: u8 = 0x81;
/// Out endpoint addresses seen on wired pads, most common first
pub const WIRED_OUT_ENDPOINTS: [u8; 2] = [0x01, 0x02];
/// One in endpoint per receiver channel
pub const WIRELESS_IN_ENDPOINTS: [u8; 4] = [0x81, 0x83, 0x85, 0x87];
const WIRELESS_CONFIGURATION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeRejection {
    NoFreeSlot,
    MissingDeviceDescriptor,
    Unsupported { vendor_id: u16, product_id: u16 },
}

/// Probe result. A rejection is a normal answer, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Accepted {
        format: ReportFormat,
        name: &'static str,
    },
    Rejected(ProbeRejection),
}

// Attach errors
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    /// The descriptor list has no configuration
    #[error("No configuration descriptor")]
    MissingConfiguration,

    /// The configuration is not followed by an interface
    #[error("No interface descriptor after the configuration")]
    MissingInterface,

    /// The interface declares no endpoint
    #[error("No endpoint descriptor after the interface")]
    MissingEndpoint,

    /// The first endpoint of a wired pad is not its input endpoint
    #[error("Expected input endpoint {expected:#04x}, found {found:#04x}")]
    UnexpectedEndpoint { expected: u8, found: u8 },

    /// Every output endpoint candidate failed to open
    #[error("None of the output endpoints {0:02x?} could be opened")]
    NoOutputEndpoint(Vec<u8>),

    /// A receiver without any channel input endpoint
    #[error("Receiver exposes no usable controller endpoints")]
    NoWirelessEndpoints,

    /// All registry slots are taken
    #[error("No free slot")]
    NoFreeSlot,

    /// Opening pipes or starting transfers failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The unit's ring could not be installed
    #[error("Frame store error: {0}")]
    FrameStore(#[from] FrameStoreError),
}

// Registration errors
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// The slot is free
    #[error("Slot {0} has no unit")]
    EmptySlot(usize),

    /// The subsystem would not create a controller; retried on the next pairing
    #[error("Pad subsystem refused registration: {0}")]
    Refused(PadError),

    /// The controller was created but has no port, so it was removed again
    #[error("No port for the new controller: {0}")]
    Port(PadError),

    /// The subsystem would not remove the controller; the handle is kept
    #[error("Failed to unregister controller: {0}")]
    Unregister(PadError),
}

/// Accept iff a slot is free and the device is in one of the match tables.
pub fn probe_descriptors(descriptors: &[Descriptor], has_free_slot: bool) -> ProbeOutcome {
    if !has_free_slot {
        return ProbeOutcome::Rejected(ProbeRejection::NoFreeSlot);
    }
    let device = descriptors.iter().find_map(|d| match d {
        Descriptor::Device(dev) => Some(*dev),
        _ => None,
    });
    let Some(device) = device else {
        return ProbeOutcome::Rejected(ProbeRejection::MissingDeviceDescriptor);
    };
    match ids::lookup(device.vendor_id, device.product_id) {
        Some((format, entry)) => ProbeOutcome::Accepted {
            format,
            name: entry.name,
        },
        None => ProbeOutcome::Rejected(ProbeRejection::Unsupported {
            vendor_id: device.vendor_id,
            product_id: device.product_id,
        }),
    }
}

fn find_from<T>(
    descriptors: &[Descriptor],
    start: usize,
    pick: impl Fn(&Descriptor) -> Option<T>,
) -> Option<(usize, T)> {
    descriptors
        .iter()
        .enumerate()
        .skip(start)
        .find_map(|(i, d)| pick(d).map(|found| (i, found)))
}

fn configuration(d: &Descriptor) -> Option<ConfigurationDescriptor> {
    match d {
        Descriptor::Configuration(c) => Some(*c),
        _ => None,
    }
}

fn interface(d: &Descriptor) -> Option<InterfaceDescriptor> {
    match d {
        Descriptor::Interface(i) => Some(*i),
        _ => None,
    }
}

fn endpoint(d: &Descriptor) -> Option<EndpointDescriptor> {
    match d {
        Descriptor::Endpoint(e) => Some(*e),
        _ => None,
    }
}

/// First configuration, the first interface after it, and the first
/// endpoint after that, which has to be the pad's input endpoint.
pub fn wired_layout(descriptors: &[Descriptor]) -> Result<UnitLayout, AttachError> {
    let (config_at, config) =
        find_from(descriptors, 0, configuration).ok_or(AttachError::MissingConfiguration)?;
    let (iface_at, iface) =
        find_from(descriptors, config_at + 1, interface).ok_or(AttachError::MissingInterface)?;
    let (_, input) =
        find_from(descriptors, iface_at + 1, endpoint).ok_or(AttachError::MissingEndpoint)?;

    if input.address != WIRED_IN_ENDPOINT {
        return Err(AttachError::UnexpectedEndpoint {
            expected: WIRED_IN_ENDPOINT,
            found: input.address,
        });
    }

    Ok(UnitLayout {
        format: ReportFormat::Wired,
        configuration: config.configuration_value,
        interface: iface.number,
        alternate: iface.alternate_setting,
        input,
        output_candidates: WIRED_OUT_ENDPOINTS.to_vec(),
    })
}

/// One layout per controller channel found anywhere in the descriptor list.
pub fn wireless_layouts(descriptors: &[Descriptor]) -> Vec<UnitLayout> {
    descriptors
        .iter()
        .filter_map(endpoint)
        .filter(|ep| ep.is_in() && WIRELESS_IN_ENDPOINTS.contains(&ep.address))
        .map(|input| UnitLayout {
            format: ReportFormat::Wireless,
            configuration: WIRELESS_CONFIGURATION,
            interface: (input.address.wrapping_sub(1)) & 0x0f,
            alternate: 0,
            input,
            output_candidates: vec![input.address & 0x0f],
        })
        .collect()
}

impl Driver {
    pub fn probe(&self, device: DeviceId) -> Result<ProbeOutcome, DriverError> {
        let has_free_slot = self.lock_registry()?.has_free_slot();
        let descriptors = self.transport.descriptors(device)?;
        let outcome = probe_descriptors(&descriptors, has_free_slot);
        match outcome {
            ProbeOutcome::Accepted { format, name } => {
                info!("Probe matched {} ({}): {}", device, format, name)
            }
            ProbeOutcome::Rejected(reason) => debug!("Probe rejected {}: {:?}", device, reason),
        }
        Ok(outcome)
    }

    /// Bind the device's units to slots and start their transfer engines.
    /// Returns the slots taken.
    pub fn attach(&self, device: DeviceId, format: ReportFormat) -> Result<Vec<usize>, DriverError> {
        let descriptors = self.transport.descriptors(device)?;
        let mut registry = self.lock_registry()?;

        match format {
            ReportFormat::Wired => {
                let layout = wired_layout(&descriptors)?;
                let unit = self.bind_unit(&mut registry, device, layout)?;
                info!("Attached {}", unit);
                if let Err(e) = self.register_slot(&mut registry, unit.slot()) {
                    warn!("{} runs without a virtual controller: {}", unit, e);
                }
                Ok(vec![unit.slot()])
            }
            ReportFormat::Wireless => {
                let layouts = wireless_layouts(&descriptors);
                debug!("{} exposes {} controller channels", device, layouts.len());
                let mut slots = Vec::new();
                for layout in layouts {
                    let address = layout.input.address;
                    match self.bind_unit(&mut registry, device, layout) {
                        Ok(unit) => {
                            info!("Attached {}", unit);
                            slots.push(unit.slot());
                        }
                        Err(e) => warn!("Channel {:#04x} of {} not attached: {}", address, device, e),
                    }
                }
                if slots.is_empty() {
                    return Err(AttachError::NoWirelessEndpoints.into());
                }
                Ok(slots)
            }
        }
    }

    fn bind_unit(
        &self,
        registry: &mut Registry,
        device: DeviceId,
        layout: UnitLayout,
    ) -> Result<Arc<DeviceUnit>, AttachError> {
        let slot = registry.free_slot().ok_or(AttachError::NoFreeSlot)?;
        let pipes = self.open_pipes(device, &layout)?;
        let key = match self.frames.install(slot) {
            Ok(key) => key,
            Err(e) => {
                self.close_pipes(&pipes.all());
                return Err(e.into());
            }
        };

        let unit = Arc::new(DeviceUnit::new(device, key, layout, pipes));
        if !registry.bind(Arc::clone(&unit)) {
            self.discard_unit(&unit);
            return Err(AttachError::NoFreeSlot);
        }

        let engine = TransferEngine::create(
            Arc::clone(&unit),
            Arc::clone(&self.transport),
            Arc::clone(&self.frames),
            self.settings.retry,
        );
        if let Err(e) = engine.start() {
            registry.release(slot);
            self.discard_unit(&unit);
            return Err(e.into());
        }
        Ok(unit)
    }

    fn open_pipes(&self, device: DeviceId, layout: &UnitLayout) -> Result<UnitPipes, AttachError> {
        let control = self.transport.open_pipe(device, None)?;
        let input = match self.transport.open_pipe(device, Some(&layout.input)) {
            Ok(pipe) => pipe,
            Err(e) => {
                self.close_pipes(&[control]);
                return Err(e.into());
            }
        };

        let output = layout.output_candidates.iter().find_map(|&address| {
            let candidate = layout.input.with_address(address);
            match self.transport.open_pipe(device, Some(&candidate)) {
                Ok(pipe) => Some(pipe),
                Err(e) => {
                    debug!("Out endpoint {:#04x} on {} unavailable: {}", address, device, e);
                    None
                }
            }
        });

        match output {
            Some(output) => Ok(UnitPipes {
                control,
                input,
                output,
            }),
            None => {
                self.close_pipes(&[control, input]);
                Err(AttachError::NoOutputEndpoint(
                    layout.output_candidates.clone(),
                ))
            }
        }
    }

    fn close_pipes(&self, pipes: &[PipeId]) {
        for &pipe in pipes {
            if let Err(e) = self.transport.close_pipe(pipe) {
                debug!("Closing {} failed: {}", pipe, e);
            }
        }
    }

    fn discard_unit(&self, unit: &DeviceUnit) {
        unit.deactivate();
        if let Err(e) = self.frames.remove(unit.key) {
            warn!("Could not drop ring of {}: {}", unit, e);
        }
        self.close_pipes(&unit.pipes.all());
    }

    /// Give the unit in `slot` a virtual controller. A no-op returning the
    /// existing handle when it already has one.
    pub(crate) fn register_slot(
        &self,
        registry: &mut Registry,
        slot: usize,
    ) -> Result<PadHandle, RegistrationError> {
        let entry = registry
            .slot_mut(slot)
            .ok_or(RegistrationError::EmptySlot(slot))?;
        let unit = entry
            .unit
            .clone()
            .ok_or(RegistrationError::EmptySlot(slot))?;
        if let Some(handle) = entry.handle {
            debug!("{} already registered as {}", unit, handle);
            return Ok(handle);
        }

        let handle = self
            .pads
            .register(CAPABILITY_MASK)
            .map_err(RegistrationError::Refused)?;
        if let Err(e) = self.pads.set_data_insert_mode(handle, true) {
            warn!("{}: data insert mode not enabled: {}", handle, e);
        }
        let port = match self.pads.port(handle) {
            Ok(port) => port,
            Err(e) => {
                if let Err(undo) = self.pads.unregister(handle) {
                    warn!("Rolling back {} failed: {}", handle, undo);
                }
                return Err(RegistrationError::Port(e));
            }
        };
        if let Err(e) = self
            .pads
            .set_port_setting(port, port_setting::PRESS_ON | port_setting::SENSOR_ON)
        {
            warn!("Port {} settings not applied: {}", port, e);
        }

        entry.handle = Some(handle);
        info!("{} registered as {} on port {}", unit, handle, port);
        self.apply_led(&unit, port);
        Ok(handle)
    }

    /// Drop the virtual controller of `slot`. Returns false when there was
    /// none. On failure the handle is kept.
    pub(crate) fn unregister_slot(
        &self,
        registry: &mut Registry,
        slot: usize,
    ) -> Result<bool, RegistrationError> {
        let entry = registry
            .slot_mut(slot)
            .ok_or(RegistrationError::EmptySlot(slot))?;
        let Some(handle) = entry.handle else {
            return Ok(false);
        };
        self.pads
            .unregister(handle)
            .map_err(RegistrationError::Unregister)?;
        entry.handle = None;
        info!("Slot {} released {}", slot, handle);
        Ok(true)
    }

    pub(crate) fn on_paired(&self, registry: &mut Registry, slot: usize) {
        debug!("Pad paired on slot {}", slot);
        if let Err(e) = self.register_slot(registry, slot) {
            warn!("Pairing on slot {} left it unregistered: {}", slot, e);
        }
    }

    pub(crate) fn on_unpaired(&self, registry: &mut Registry, slot: usize) {
        debug!("Pad unpaired on slot {}", slot);
        if let Err(e) = self.unregister_slot(registry, slot) {
            warn!("Unpairing on slot {} failed: {}", slot, e);
        }
    }

    fn write_output(&self, unit: &DeviceUnit, data: Vec<u8>) -> Result<(), TransportError> {
        let slot = unit.slot();
        self.transport.interrupt_out(
            unit.pipes.output,
            data,
            Box::new(move |status| {
                if !status.is_ok() {
                    debug!("Output report for slot {} failed: {:?}", slot, status);
                }
            }),
        )
    }

    fn apply_led(&self, unit: &DeviceUnit, port: u32) {
        let led = output::led_for_port(port);
        match self.write_output(unit, unit.format().led_command(led)) {
            Ok(()) => debug!("{}: LED pattern {:#04x} for port {}", unit, led, port),
            Err(e) => warn!("{}: LED update failed: {}", unit, e),
        }
    }

    /// Re-send the LED pattern of every registered unit after the pad
    /// subsystem moved controllers between ports.
    pub(crate) fn reapply_leds(&self, registry: &Registry) {
        for (unit, handle) in registry.registered() {
            match self.pads.port(handle) {
                Ok(port) => self.apply_led(&unit, port),
                Err(e) => warn!("{}: no port for {}: {}", unit, handle, e),
            }
        }
    }

    /// Drive both rumble motors of the unit in `slot`.
    pub fn set_rumble(&self, slot: usize, left: u8, right: u8) -> Result<(), DriverError> {
        let registry = self.lock_registry()?;
        let unit = registry
            .slot(slot)
            .and_then(|s| s.unit.clone())
            .ok_or(DriverError::EmptySlot(slot))?;
        self.write_output(&unit, unit.format().rumble_command(left, right))?;
        debug!("{}: rumble {}/{}", unit, left, right);
        Ok(())
    }

    /// Free every slot owned by `device`. Returns how many were freed.
    pub fn detach(&self, device: DeviceId) -> Result<usize, DriverError> {
        let mut registry = self.lock_registry()?;
        let slots = registry.slots_of(device);
        for &slot in &slots {
            self.release_slot(&mut registry, slot);
        }
        if !slots.is_empty() {
            info!("Detached {} ({} slots)", device, slots.len());
        }
        Ok(slots.len())
    }

    /// Free every occupied slot. Safe to call repeatedly.
    pub fn detach_all(&self) -> Result<usize, DriverError> {
        let mut registry = self.lock_registry()?;
        let slots = registry.occupied();
        for &slot in &slots {
            self.release_slot(&mut registry, slot);
        }
        debug!("Detach all freed {} slots", slots.len());
        Ok(slots.len())
    }

    fn release_slot(&self, registry: &mut Registry, slot: usize) {
        if let Err(e) = self.unregister_slot(registry, slot) {
            warn!("Slot {} freed with its controller still registered: {}", slot, e);
        }
        if let Some(unit) = registry.release(slot).and_then(|freed| freed.unit) {
            self.discard_unit(&unit);
            debug!("{} freed", unit);
        }
    }

    /// React to a transport arrival or removal notification.
    pub fn handle_hotplug(&self, event: HotplugEvent) -> Result<(), DriverError> {
        match event {
            HotplugEvent::Arrived(device) => {
                if let ProbeOutcome::Accepted { format, name } = self.probe(device)? {
                    match self.attach(device, format) {
                        Ok(slots) => info!("{} ready in slots {:?}", name, slots),
                        Err(DriverError::LockPoisoned(e)) => {
                            return Err(DriverError::LockPoisoned(e))
                        }
                        Err(e) => error!("Attaching {} ({}) failed: {}", name, device, e),
                    }
                }
            }
            HotplugEvent::Removed(device) => {
                self.detach(device)?;
            }
        }
        Ok(())
    }
}
