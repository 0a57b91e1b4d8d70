//! Capture replay through the simulated bus.
//!
//! A capture is a text file with one raw frame per line, written as hex bytes
//! (`00 14 00 10 ...` or `001400...`). `#` starts a comment; blank lines are
//! skipped. The replayer plays the frames in a loop on the device's first
//! in-endpoint, completing whatever transfer the driver has pending.

use crate::protocol::buttons::bits;
use crate::protocol::{wireless, PadInput, ReportFormat};
use crate::usb::sim::{self, SimulatedBus};
use crate::usb::{DeviceId, TransferStatus, TransportError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Microsoft wired pad and wireless receiver ids used for simulated devices
pub const REPLAY_WIRED_ID: (u16, u16) = (0x045e, 0x028e);
pub const REPLAY_RECEIVER_ID: (u16, u16) = (0x045e, 0x0719);

/// In-endpoint of the wired pad, and of channel 0 on a receiver
const REPLAY_ENDPOINT: u8 = 0x81;

// Capture errors
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Failed to read capture {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Line {line}: invalid hex {token:?}: {source}")]
    InvalidHex {
        line: usize,
        token: String,
        source: hex::FromHexError,
    },

    #[error("Capture contains no frames")]
    Empty,
}

/// Parse capture text into frames.
pub fn parse_capture(text: &str) -> Result<Vec<Vec<u8>>, CaptureError> {
    let mut frames = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let content = raw.split('#').next().unwrap_or("");
        let digits: String = content.split_whitespace().collect();
        if digits.is_empty() {
            continue;
        }
        let frame = hex::decode(&digits).map_err(|source| CaptureError::InvalidHex {
            line,
            token: digits.clone(),
            source,
        })?;
        frames.push(frame);
    }

    if frames.is_empty() {
        return Err(CaptureError::Empty);
    }
    Ok(frames)
}

pub fn load_capture(path: &Path) -> Result<Vec<Vec<u8>>, CaptureError> {
    let text = std::fs::read_to_string(path).map_err(|source| CaptureError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let frames = parse_capture(&text)?;
    info!("Loaded {} frames from {}", frames.len(), path.display());
    Ok(frames)
}

/// A short built-in capture: A, then B with a half-pulled right trigger,
/// then a full left stick push, each followed by a released frame.
pub fn demo_capture(format: ReportFormat) -> Vec<Vec<u8>> {
    let presses = [
        PadInput {
            buttons: bits::A,
            ..PadInput::centered()
        },
        PadInput {
            buttons: bits::B,
            right_trigger: 0x80,
            ..PadInput::centered()
        },
        PadInput {
            left: (i16::MAX, -1),
            ..PadInput::centered()
        },
    ];
    presses
        .iter()
        .flat_map(|input| [format.encode_input(input), format.encode_input(&PadInput::centered())])
        .collect()
}

/// Plug a simulated device of `format` into the bus.
pub fn plug_device(bus: &SimulatedBus, format: ReportFormat) -> Result<DeviceId, TransportError> {
    let blob = match format {
        ReportFormat::Wired => sim::wired_pad(REPLAY_WIRED_ID.0, REPLAY_WIRED_ID.1),
        ReportFormat::Wireless => sim::wireless_receiver(REPLAY_RECEIVER_ID.0, REPLAY_RECEIVER_ID.1),
    };
    bus.plug(&blob)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub delivered: u64,
    /// Ticks where no transfer was pending yet
    pub idle: u64,
}

pub struct Replayer {
    bus: Arc<SimulatedBus>,
    device: DeviceId,
    format: ReportFormat,
    frames: Vec<Vec<u8>>,
    interval: Duration,
    position: usize,
    paired: bool,
    stats: ReplayStats,
}

impl Replayer {
    pub fn new(
        bus: Arc<SimulatedBus>,
        device: DeviceId,
        format: ReportFormat,
        frames: Vec<Vec<u8>>,
        interval: Duration,
    ) -> Self {
        Self {
            bus,
            device,
            format,
            frames,
            interval,
            position: 0,
            // wired pads register on attach, receivers wait for presence
            paired: format == ReportFormat::Wired,
            stats: ReplayStats::default(),
        }
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    /// Finish pending control requests, then complete the pending in-transfer
    /// with the next frame. A receiver gets its pairing frame first.
    pub fn step(&mut self) -> Result<bool, TransportError> {
        self.bus.run_control()?;

        let frame = if self.paired {
            match self.frames.get(self.position) {
                Some(frame) => frame.clone(),
                None => return Ok(false),
            }
        } else {
            wireless::presence_frame(true).to_vec()
        };

        let delivered = self
            .bus
            .complete_in(self.device, REPLAY_ENDPOINT, TransferStatus::Completed, &frame)?;
        if !delivered {
            self.stats.idle += 1;
            return Ok(false);
        }

        if self.paired {
            trace!("Replayed frame {} on {}", self.position, self.device);
            self.position = (self.position + 1) % self.frames.len();
        } else {
            debug!("Pairing frame delivered to {}", self.device);
            self.paired = true;
        }
        self.stats.delivered += 1;
        Ok(true)
    }

    /// Step every interval until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ReplayStats, TransportError> {
        info!(
            "Replaying {} {} frames every {:?} on {}",
            self.frames.len(),
            self.format,
            self.interval,
            self.device
        );
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }
            self.step()?;
        }
        info!(
            "Replay stopped: {} frames delivered, {} idle ticks",
            self.stats.delivered, self.stats.idle
        );
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Decoded;
    use crate::usb::{EndpointDescriptor, UsbTransport};
    use std::sync::Mutex;

    #[test]
    fn parses_spaced_and_packed_lines() -> Result<(), CaptureError> {
        let frames = parse_capture(
            "# header comment\n\n00 14 00 10\n0a0B  # trailing\n   \n",
        )?;
        assert_eq!(frames, vec![vec![0x00, 0x14, 0x00, 0x10], vec![0x0a, 0x0b]]);
        Ok(())
    }

    #[test]
    fn reports_the_offending_line() {
        assert!(matches!(
            parse_capture("00 14\n0g 00"),
            Err(CaptureError::InvalidHex { line: 2, .. })
        ));
        assert!(matches!(
            parse_capture("00 1"),
            Err(CaptureError::InvalidHex {
                line: 1,
                source: hex::FromHexError::OddLength,
                ..
            })
        ));
        assert!(matches!(parse_capture("# nothing\n"), Err(CaptureError::Empty)));
    }

    #[test]
    fn demo_capture_decodes_in_both_formats() {
        for format in [ReportFormat::Wired, ReportFormat::Wireless] {
            let frames = demo_capture(format);
            assert_eq!(frames.len(), 6);
            assert!(frames
                .iter()
                .all(|f| matches!(format.decode(f), Decoded::Input(_))));
        }
    }

    fn capture_in(
        bus: &SimulatedBus,
        device: DeviceId,
        seen: Arc<Mutex<Vec<Vec<u8>>>>,
    ) -> Result<(), TransportError> {
        let ep = EndpointDescriptor {
            address: REPLAY_ENDPOINT,
            attributes: 0x03,
            max_packet_size: 32,
        };
        let pipe = bus.open_pipe(device, Some(&ep))?;
        bus.interrupt_in(
            pipe,
            32,
            Box::new(move |_, data: &[u8]| {
                if let Ok(mut seen) = seen.lock() {
                    seen.push(data.to_vec());
                }
            }),
        )
    }

    #[test]
    fn receiver_gets_pairing_frame_first() -> Result<(), Box<dyn std::error::Error>> {
        let bus = Arc::new(SimulatedBus::new());
        let device = plug_device(&bus, ReportFormat::Wireless)?;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut replayer = Replayer::new(
            Arc::clone(&bus),
            device,
            ReportFormat::Wireless,
            vec![vec![1, 2, 3]],
            Duration::from_millis(1),
        );

        assert!(!replayer.step()?);
        capture_in(&bus, device, Arc::clone(&seen))?;
        assert!(replayer.step()?);
        capture_in(&bus, device, Arc::clone(&seen))?;
        assert!(replayer.step()?);

        let seen = seen.lock().map_err(|e| e.to_string())?;
        assert_eq!(seen[0], wireless::presence_frame(true).to_vec());
        assert_eq!(seen[1], vec![1, 2, 3]);
        assert_eq!(replayer.stats(), ReplayStats { delivered: 2, idle: 1 });
        Ok(())
    }
}
