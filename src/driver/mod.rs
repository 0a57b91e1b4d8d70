//! Bridge driver
//!
//! Owns everything the bridge tracks while it runs: the slot registry, the
//! frame store shared with completion callbacks, and the collaborators it
//! talks to.
//!
//! ```text
//!   UsbTransport ──completion──► TransferEngine ──push──► FrameStore
//!        ▲                                                    │
//!        │ hotplug                                          pop
//!        │                                                    ▼
//!   Driver::handle_hotplug ──► Registry ◄──── poll loop ──► decode ──► PadSubsystem
//! ```
//!
//! Two locks exist. The registry lock is held by attach, detach, pairing and
//! the poll tick. The frame store lock is only ever taken for a single push or
//! pop, possibly while the registry lock is held, never the other way round.
//! Completion callbacks touch the frame store only.

pub mod handle;
pub mod hotplug;
pub mod poller;
pub mod registry;
pub mod ring_buffer;
pub mod transfer;
pub mod unit;

pub use handle::DriverHandle;
pub use hotplug::{AttachError, ProbeOutcome, ProbeRejection, RegistrationError};
pub use poller::PollStats;
pub use registry::MAX_SLOTS;
pub use ring_buffer::{Frame, FrameStore, FrameStoreError, PushOutcome, RingBuffer, UnitKey};
pub use transfer::RetryPolicy;

use crate::notify::Notifier;
use crate::pad::{PadError, PadSubsystem};
use crate::protocol::ids;
use crate::usb::{TransportError, UsbTransport};
use registry::Registry;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

const LOADED_MESSAGE: &str = "XPAD bridge loaded";
const UNLOADED_MESSAGE: &str = "XPAD bridge unloaded";

/// Runtime settings for the driver
///
/// Built from the `[driver]` section of the config file, or constructed
/// directly by embedders and tests.
///
/// # Performance Impact
///
/// - `poll_interval_ms`: every tick forwards at most one frame per slot, so a
///   pad producing reports faster than this fills its ring and drops input
/// - `ring_capacity`: larger rings absorb bursts but delay input by up to
///   `ring_capacity` ticks once they fill
/// - `retry`: a limit stops a stalled pad from hammering the bus, at the cost
///   of needing a replug to recover
///
/// # Examples
///
/// ```rust
/// use xpad_bridge::driver::{DriverSettings, RetryPolicy};
///
/// // Fast polling for a single wired pad
/// let responsive = DriverSettings {
///     poll_interval_ms: 4,
///     ring_capacity: 4,
///     ..DriverSettings::default()
/// };
///
/// // Give up on a pad after 50 failed transfers in a row
/// let bounded = DriverSettings {
///     retry: RetryPolicy {
///         max_consecutive_failures: Some(50),
///     },
///     ..DriverSettings::default()
/// };
/// assert_ne!(responsive, bounded);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    /// Poll period in milliseconds
    ///
    /// One frame per occupied slot is drained each tick. Pads report roughly
    /// every 4-8ms, so values above that rely on the ring to absorb the rest.
    pub poll_interval_ms: u64,
    /// Frames buffered per unit before new ones are dropped
    pub ring_capacity: usize,
    /// What to do when interrupt transfers keep failing
    pub retry: RetryPolicy,
    /// Seconds between statistics lines in the log
    pub stats_interval_secs: i64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            ring_capacity: 10,
            retry: RetryPolicy::default(),
            stats_interval_secs: 30,
        }
    }
}

// Driver errors
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// A thread panicked while holding the registry lock
    #[error("Registry lock poisoned: {0}")]
    LockPoisoned(String),

    /// The USB transport rejected a request
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A unit's ring could not be reached, usually because it was detached
    #[error("Frame store error: {0}")]
    FrameStore(#[from] FrameStoreError),

    /// The device could not be attached; nothing of it was kept
    #[error("Attach failed: {0}")]
    Attach(#[from] AttachError),

    /// Registering or dropping a virtual controller failed
    #[error("Registration failed: {0}")]
    Registration(#[from] RegistrationError),

    /// The virtual controller subsystem rejected a call
    #[error("Pad subsystem error: {0}")]
    Pad(#[from] PadError),

    /// The slot is free
    #[error("Slot {0} has no unit")]
    EmptySlot(usize),

    /// A spawned poll or hotplug task panicked or was aborted
    #[error("Task failed: {0}")]
    Task(String),
}

/// Process-scoped driver state, created at start and torn down at stop.
pub struct Driver {
    transport: Arc<dyn UsbTransport>,
    pads: Arc<dyn PadSubsystem>,
    notifier: Arc<dyn Notifier>,
    registry: Mutex<Registry>,
    frames: Arc<FrameStore>,
    settings: DriverSettings,
}

impl Driver {
    pub fn new(
        transport: Arc<dyn UsbTransport>,
        pads: Arc<dyn PadSubsystem>,
        notifier: Arc<dyn Notifier>,
        settings: DriverSettings,
    ) -> Self {
        info!("Creating driver with settings: {:?}", settings);
        let frames = Arc::new(FrameStore::new(MAX_SLOTS, settings.ring_capacity));
        Self {
            transport,
            pads,
            notifier,
            registry: Mutex::new(Registry::new()),
            frames,
            settings,
        }
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn frames(&self) -> &Arc<FrameStore> {
        &self.frames
    }

    pub(crate) fn lock_registry(&self) -> Result<MutexGuard<'_, Registry>, DriverError> {
        self.registry
            .lock()
            .map_err(|e| DriverError::LockPoisoned(e.to_string()))
    }

    /// Hand the match tables to the transport and announce the bridge.
    pub fn start(&self) -> Result<(), DriverError> {
        let matches = ids::all_matches();
        self.transport.register_driver(&matches)?;
        info!("Registered {} device matches with the transport", matches.len());
        self.notifier.notify(LOADED_MESSAGE);
        Ok(())
    }

    /// Free every unit, withdraw the match tables and announce the stop.
    pub fn stop(&self) -> Result<(), DriverError> {
        let detached = self.detach_all()?;
        info!("Stopping driver, {} units detached", detached);
        if let Err(e) = self.transport.unregister_driver() {
            warn!("Failed to withdraw device matches: {}", e);
        }
        self.notifier.notify(UNLOADED_MESSAGE);
        Ok(())
    }

    /// Slots currently holding a unit.
    pub fn connected_slots(&self) -> Result<Vec<usize>, DriverError> {
        Ok(self.lock_registry()?.occupied())
    }

    /// Pad handle of the unit in `slot`, if it is registered.
    pub fn handle_of(&self, slot: usize) -> Result<Option<crate::pad::PadHandle>, DriverError> {
        Ok(self
            .lock_registry()?
            .slot(slot)
            .and_then(|s| s.handle))
    }
}
