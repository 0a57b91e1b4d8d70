//! In-process pad subsystem that records everything it is told.
//!
//! Ports are handed out lowest-free-first, the way a console assigns
//! controller numbers. Report history is bounded per handle.

use super::{CanonicalReport, PadError, PadHandle, PadSubsystem};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, trace};

pub const MAX_PORTS: u32 = 7;
const HISTORY_PER_HANDLE: usize = 256;

#[derive(Default)]
struct LoopbackState {
    next_handle: i32,
    ports: BTreeMap<PadHandle, u32>,
    into_game: HashMap<PadHandle, bool>,
    port_settings: HashMap<u32, u32>,
    history: HashMap<PadHandle, VecDeque<CanonicalReport>>,
    refuse_registration: bool,
    fail_port_queries: bool,
    assignment_changed: bool,
    register_calls: usize,
    unregister_calls: usize,
}

#[derive(Default)]
pub struct LoopbackPads {
    state: Mutex<LoopbackState>,
}

impl LoopbackPads {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LoopbackState>, PadError> {
        self.state
            .lock()
            .map_err(|e| PadError::Failed(format!("loopback state poisoned: {}", e)))
    }

    /// Make later registrations fail with [`PadError::Refused`].
    pub fn refuse_registrations(&self, refuse: bool) -> Result<(), PadError> {
        self.lock()?.refuse_registration = refuse;
        Ok(())
    }

    /// Make port lookups fail with [`PadError::NoPort`] even for live handles.
    pub fn fail_port_queries(&self, fail: bool) -> Result<(), PadError> {
        self.lock()?.fail_port_queries = fail;
        Ok(())
    }

    /// Move a registered controller to another port and raise the
    /// assignment-changed signal.
    pub fn reassign_port(&self, handle: PadHandle, port: u32) -> Result<(), PadError> {
        let mut state = self.lock()?;
        let slot = state
            .ports
            .get_mut(&handle)
            .ok_or(PadError::UnknownHandle(handle))?;
        *slot = port;
        state.assignment_changed = true;
        info!("{} moved to port {}", handle, port);
        Ok(())
    }

    pub fn register_calls(&self) -> Result<usize, PadError> {
        Ok(self.lock()?.register_calls)
    }

    pub fn unregister_calls(&self) -> Result<usize, PadError> {
        Ok(self.lock()?.unregister_calls)
    }

    pub fn active_handles(&self) -> Result<Vec<PadHandle>, PadError> {
        Ok(self.lock()?.ports.keys().copied().collect())
    }

    pub fn is_in_game_mode(&self, handle: PadHandle) -> Result<bool, PadError> {
        Ok(self
            .lock()?
            .into_game
            .get(&handle)
            .copied()
            .unwrap_or(false))
    }

    pub fn port_setting(&self, port: u32) -> Result<Option<u32>, PadError> {
        Ok(self.lock()?.port_settings.get(&port).copied())
    }

    /// Reports received for `handle`, oldest first.
    pub fn reports(&self, handle: PadHandle) -> Result<Vec<CanonicalReport>, PadError> {
        Ok(self
            .lock()?
            .history
            .get(&handle)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default())
    }

    pub fn last_report(&self, handle: PadHandle) -> Result<Option<CanonicalReport>, PadError> {
        Ok(self
            .lock()?
            .history
            .get(&handle)
            .and_then(|h| h.back().copied()))
    }
}

impl PadSubsystem for LoopbackPads {
    fn register(&self, capability: u32) -> Result<PadHandle, PadError> {
        let mut state = self.lock()?;
        state.register_calls += 1;
        if state.refuse_registration {
            return Err(PadError::Refused(-1));
        }
        let port = (0..MAX_PORTS)
            .find(|p| !state.ports.values().any(|used| used == p))
            .ok_or(PadError::Refused(-2))?;
        let handle = PadHandle(state.next_handle);
        state.next_handle += 1;
        state.ports.insert(handle, port);
        debug!(
            "Registered {} on port {} with capability {:#x}",
            handle, port, capability
        );
        Ok(handle)
    }

    fn unregister(&self, handle: PadHandle) -> Result<(), PadError> {
        let mut state = self.lock()?;
        state.unregister_calls += 1;
        state
            .ports
            .remove(&handle)
            .ok_or(PadError::UnknownHandle(handle))?;
        state.into_game.remove(&handle);
        state.history.remove(&handle);
        debug!("Unregistered {}", handle);
        Ok(())
    }

    fn set_data_insert_mode(&self, handle: PadHandle, into_game: bool) -> Result<(), PadError> {
        let mut state = self.lock()?;
        if !state.ports.contains_key(&handle) {
            return Err(PadError::UnknownHandle(handle));
        }
        state.into_game.insert(handle, into_game);
        Ok(())
    }

    fn port(&self, handle: PadHandle) -> Result<u32, PadError> {
        let state = self.lock()?;
        if state.fail_port_queries {
            return Err(PadError::NoPort(handle));
        }
        state
            .ports
            .get(&handle)
            .copied()
            .ok_or(PadError::NoPort(handle))
    }

    fn set_port_setting(&self, port: u32, settings: u32) -> Result<(), PadError> {
        self.lock()?.port_settings.insert(port, settings);
        Ok(())
    }

    fn insert_report(&self, handle: PadHandle, report: &CanonicalReport) -> Result<(), PadError> {
        let mut state = self.lock()?;
        if !state.ports.contains_key(&handle) {
            return Err(PadError::UnknownHandle(handle));
        }
        let history = state.history.entry(handle).or_default();
        if history.back() != Some(report) {
            trace!("{} report changed: {:?}", handle, report.words);
        }
        if history.len() == HISTORY_PER_HANDLE {
            history.pop_front();
        }
        history.push_back(*report);
        Ok(())
    }

    fn take_assignment_change(&self) -> Result<bool, PadError> {
        let mut state = self.lock()?;
        Ok(std::mem::take(&mut state.assignment_changed))
    }
}
