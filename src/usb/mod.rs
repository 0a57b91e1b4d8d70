//! USB transport boundary
//!
//! The bridge never talks to a host controller directly. Everything it needs
//! from the USB stack goes through [`UsbTransport`]: descriptor scans, pipe
//! management and asynchronous transfers whose results arrive through
//! one-shot completion callbacks.
//!
//! ```text
//! HotplugEvent ──► Driver ──► UsbTransport::open_pipe / set_configuration
//!                                   │
//!                      completion ◄─┘ (USB completion context)
//! ```
//!
//! Completion callbacks run in a context that must never block. Implementations
//! are free to invoke them from any thread, but control and interrupt-in
//! callbacks must never run inside the call that submitted them: the transfer
//! engine resubmits from its callback, and an inline completion would nest
//! one stack frame per transfer.

pub mod descriptor;
pub mod sim;

pub use descriptor::{
    parse_descriptors, ConfigurationDescriptor, Descriptor, DescriptorError, DeviceDescriptor,
    EndpointDescriptor, InterfaceDescriptor,
};

use std::fmt;

/// Transport-assigned identifier of an attached USB device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub i32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// Transport-assigned identifier of an open pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeId(pub i32);

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipe#{}", self.0)
    }
}

/// Result code handed to a completion callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Failed(i32),
}

impl TransferStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, TransferStatus::Completed)
    }
}

/// Completion for interrupt-in transfers: status plus the received bytes.
/// The slice length is the transferred byte count.
pub type TransferCallback = Box<dyn FnOnce(TransferStatus, &[u8]) + Send + 'static>;

/// Completion for control requests and interrupt-out writes
pub type ControlCallback = Box<dyn FnOnce(TransferStatus) + Send + 'static>;

/// One row of a vendor/product match table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMatch {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: &'static str,
}

/// Hotplug notifications delivered by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugEvent {
    Arrived(DeviceId),
    Removed(DeviceId),
}

// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("Unknown pipe: {0}")]
    UnknownPipe(PipeId),

    #[error("Failed to open pipe on {device} for endpoint {endpoint:#04x}: code {code}")]
    OpenPipeFailed {
        device: DeviceId,
        endpoint: u8,
        code: i32,
    },

    #[error("Transfer submission failed on {pipe}: code {code}")]
    SubmitFailed { pipe: PipeId, code: i32 },

    #[error("Driver registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
}

/// Asynchronous USB host interface used by the bridge.
///
/// Submission calls return as soon as the request is queued; the outcome is
/// only ever observed through the supplied callback, which is invoked exactly
/// once unless the submission itself returned an error. Only
/// [`UsbTransport::interrupt_out`] may complete before it returns.
pub trait UsbTransport: Send + Sync + 'static {
    /// Announce the devices this driver wants to be offered.
    fn register_driver(&self, matches: &[DeviceMatch]) -> Result<(), TransportError>;

    /// Withdraw a previous [`UsbTransport::register_driver`].
    fn unregister_driver(&self) -> Result<(), TransportError>;

    /// All static descriptors of the device, in wire order.
    fn descriptors(&self, device: DeviceId) -> Result<Vec<Descriptor>, TransportError>;

    /// Open the default control pipe (`None`) or a pipe for an endpoint.
    fn open_pipe(
        &self,
        device: DeviceId,
        endpoint: Option<&EndpointDescriptor>,
    ) -> Result<PipeId, TransportError>;

    fn close_pipe(&self, pipe: PipeId) -> Result<(), TransportError>;

    fn set_configuration(
        &self,
        control: PipeId,
        value: u8,
        done: ControlCallback,
    ) -> Result<(), TransportError>;

    fn set_interface(
        &self,
        control: PipeId,
        interface: u8,
        alternate: u8,
        done: ControlCallback,
    ) -> Result<(), TransportError>;

    /// Request up to `length` bytes from an interrupt-in pipe.
    fn interrupt_in(
        &self,
        pipe: PipeId,
        length: usize,
        done: TransferCallback,
    ) -> Result<(), TransportError>;

    /// Write an output report to an interrupt-out pipe.
    fn interrupt_out(
        &self,
        pipe: PipeId,
        data: Vec<u8>,
        done: ControlCallback,
    ) -> Result<(), TransportError>;
}
