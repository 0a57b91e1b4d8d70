//! Virtual controller subsystem boundary
//!
//! Decoded reports leave the bridge through [`PadSubsystem`]. A unit is only
//! visible to games while it holds a [`PadHandle`]; the subsystem assigns it a
//! physical port, and the port number drives the LED pattern shown on the
//! controller.

pub mod loopback;
pub mod report;

pub use report::CanonicalReport;

use std::fmt;

/// Capability mask requested for every registered controller
pub const CAPABILITY_MASK: u32 = 0xFFFF << 1;

/// Port setting flags
pub mod port_setting {
    pub const PRESS_ON: u32 = 0x0000_0002;
    pub const SENSOR_ON: u32 = 0x0000_0004;
}

/// Registration handle of a virtual controller. Only ever constructed for
/// successful registrations, so it is always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PadHandle(pub i32);

impl fmt::Display for PadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pad#{}", self.0)
    }
}

// Pad subsystem errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PadError {
    #[error("Registration refused: code {0}")]
    Refused(i32),

    #[error("Unknown handle: {0}")]
    UnknownHandle(PadHandle),

    #[error("No port assigned to {0}")]
    NoPort(PadHandle),

    #[error("Pad subsystem failure: {0}")]
    Failed(String),
}

/// Operations the bridge needs from the host's controller subsystem.
pub trait PadSubsystem: Send + Sync + 'static {
    fn register(&self, capability: u32) -> Result<PadHandle, PadError>;

    fn unregister(&self, handle: PadHandle) -> Result<(), PadError>;

    /// Route the controller's data into running games, not only the system UI.
    fn set_data_insert_mode(&self, handle: PadHandle, into_game: bool) -> Result<(), PadError>;

    fn port(&self, handle: PadHandle) -> Result<u32, PadError>;

    fn set_port_setting(&self, port: u32, settings: u32) -> Result<(), PadError>;

    fn insert_report(&self, handle: PadHandle, report: &CanonicalReport) -> Result<(), PadError>;

    /// True once after the physical port assignment changed.
    fn take_assignment_change(&self) -> Result<bool, PadError>;
}
