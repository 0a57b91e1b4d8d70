//! Poll loop: ring buffers in, canonical reports out.
//!
//! Every tick takes the registry lock once, pops at most one frame per
//! connected slot, decodes it and forwards the result. Slots without a frame
//! get the neutral report so no button stays stuck while input stalls. After
//! all slots, a port reassignment reported by the pad subsystem triggers an
//! LED refresh.

use super::{Driver, DriverError, FrameStoreError};
use crate::pad::CanonicalReport;
use crate::protocol::Decoded;
use chrono::Local;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// What one tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollStats {
    pub frames: usize,
    pub reports: usize,
    pub neutral: usize,
    pub ignored: usize,
    pub presence: usize,
    pub led_refreshes: usize,
}

impl PollStats {
    fn absorb(&mut self, other: &PollStats) {
        self.frames += other.frames;
        self.reports += other.reports;
        self.neutral += other.neutral;
        self.ignored += other.ignored;
        self.presence += other.presence;
        self.led_refreshes += other.led_refreshes;
    }
}

impl Driver {
    /// Run one poll tick.
    pub fn poll_once(&self) -> Result<PollStats, DriverError> {
        let mut stats = PollStats::default();
        let mut registry = self.lock_registry()?;

        for slot in registry.occupied() {
            let Some(unit) = registry.slot(slot).and_then(|s| s.unit.clone()) else {
                continue;
            };

            let frame = match self.frames.pop(unit.key) {
                Ok(frame) => frame,
                Err(FrameStoreError::UnitGone(_)) => {
                    debug!("{}: ring gone, skipping", unit);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let decoded = match frame {
                Some(frame) => {
                    stats.frames += 1;
                    trace!("{}: frame {} ({} bytes)", unit, frame.sequence, frame.length);
                    unit.format().decode(frame.bytes())
                }
                None => {
                    stats.neutral += 1;
                    Decoded::Input(CanonicalReport::neutral())
                }
            };

            match decoded {
                Decoded::Input(report) => {
                    let handle = registry.slot(slot).and_then(|s| s.handle);
                    if let Some(handle) = handle {
                        match self.pads.insert_report(handle, &report) {
                            Ok(()) => stats.reports += 1,
                            Err(e) => warn!("{}: report not delivered to {}: {}", unit, handle, e),
                        }
                    }
                }
                Decoded::Paired => {
                    stats.presence += 1;
                    self.on_paired(&mut registry, slot);
                }
                Decoded::Unpaired => {
                    stats.presence += 1;
                    self.on_unpaired(&mut registry, slot);
                }
                Decoded::Ignored => stats.ignored += 1,
            }
        }

        match self.pads.take_assignment_change() {
            Ok(true) => {
                info!("Controller ports reassigned, refreshing LEDs");
                self.reapply_leds(&registry);
                stats.led_refreshes += 1;
            }
            Ok(false) => {}
            Err(e) => warn!("Could not query port assignment: {}", e),
        }

        Ok(stats)
    }
}

/// Poll until cancelled. A poisoned lock ends the loop with an error.
pub async fn run_poll_loop(
    driver: Arc<Driver>,
    cancel: CancellationToken,
) -> Result<(), DriverError> {
    let settings = driver.settings().clone();
    info!(
        "Starting poll loop with {}ms interval",
        settings.poll_interval_ms
    );

    let mut interval_timer = tokio::time::interval(tokio::time::Duration::from_millis(
        settings.poll_interval_ms.max(1),
    ));
    interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // Stats for performance monitoring
    let mut cycles: u64 = 0;
    let mut totals = PollStats::default();
    let mut last_stats_time = Local::now();
    let stats_interval = chrono::Duration::seconds(settings.stats_interval_secs.max(1));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Poll loop cancelled after {} cycles", cycles);
                return Ok(());
            }
            _ = interval_timer.tick() => {}
        }

        let stats = match driver.poll_once() {
            Ok(stats) => stats,
            Err(e) => {
                error!("Poll loop stopping: {}", e);
                return Err(e);
            }
        };
        totals.absorb(&stats);
        cycles += 1;

        let now = Local::now();
        if now - last_stats_time > stats_interval {
            let elapsed_seconds = (now - last_stats_time).num_seconds().max(1);
            info!(
                "Poll stats: {} cycles, {} frames, {} reports, {} neutral in {} seconds",
                cycles, totals.frames, totals.reports, totals.neutral, elapsed_seconds
            );
            info!(
                "Average: {:.2} frames/sec, {} ignored, {} pairing events, {} LED refreshes",
                totals.frames as f64 / elapsed_seconds as f64,
                totals.ignored,
                totals.presence,
                totals.led_refreshes
            );

            cycles = 0;
            totals = PollStats::default();
            last_stats_time = now;
        }
    }
}
