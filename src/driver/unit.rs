//! One logical controller: a wired pad, or one channel of a wireless receiver.

use super::ring_buffer::UnitKey;
use crate::protocol::ReportFormat;
use crate::usb::{DeviceId, EndpointDescriptor, PipeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

/// Where a unit lives on its device, resolved from descriptors before any
/// pipe is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitLayout {
    pub format: ReportFormat,
    pub configuration: u8,
    pub interface: u8,
    pub alternate: u8,
    pub input: EndpointDescriptor,
    /// Out endpoint addresses to try, in order
    pub output_candidates: Vec<u8>,
}

impl UnitLayout {
    pub fn payload(&self) -> usize {
        usize::from(self.input.max_packet_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitPipes {
    pub control: PipeId,
    pub input: PipeId,
    pub output: PipeId,
}

impl UnitPipes {
    pub fn all(&self) -> [PipeId; 3] {
        [self.control, self.input, self.output]
    }
}

#[derive(Debug)]
pub struct DeviceUnit {
    pub device: DeviceId,
    pub key: UnitKey,
    pub layout: UnitLayout,
    pub pipes: UnitPipes,
    sequence: AtomicU8,
    completions: AtomicU64,
    failures: AtomicU64,
    active: AtomicBool,
}

impl DeviceUnit {
    pub fn new(device: DeviceId, key: UnitKey, layout: UnitLayout, pipes: UnitPipes) -> Self {
        Self {
            device,
            key,
            layout,
            pipes,
            sequence: AtomicU8::new(0),
            completions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            active: AtomicBool::new(true),
        }
    }

    pub fn slot(&self) -> usize {
        self.key.slot
    }

    pub fn format(&self) -> ReportFormat {
        self.layout.format
    }

    pub fn payload(&self) -> usize {
        self.layout.payload()
    }

    /// Sequence number for the next captured frame, starting at 1.
    pub fn next_sequence(&self) -> u8 {
        self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    pub fn record_completion(&self, succeeded: bool) {
        self.completions.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn completions(&self) -> u64 {
        self.completions.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop the transfer engine at its next completion.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl fmt::Display for DeviceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} unit in slot {} ({} ep {:#04x})",
            self.layout.format,
            self.key.slot,
            self.device,
            self.layout.input.address
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> DeviceUnit {
        let layout = UnitLayout {
            format: ReportFormat::Wired,
            configuration: 1,
            interface: 0,
            alternate: 0,
            input: EndpointDescriptor {
                address: 0x81,
                attributes: 0x03,
                max_packet_size: 0x20,
            },
            output_candidates: vec![0x01, 0x02],
        };
        let pipes = UnitPipes {
            control: PipeId(1),
            input: PipeId(2),
            output: PipeId(3),
        };
        DeviceUnit::new(
            DeviceId(1),
            UnitKey {
                slot: 0,
                generation: 1,
            },
            layout,
            pipes,
        )
    }

    #[test]
    fn sequence_starts_at_one_and_wraps() {
        let unit = unit();
        assert_eq!(unit.next_sequence(), 1);
        for _ in 0..254 {
            unit.next_sequence();
        }
        assert_eq!(unit.next_sequence(), 0);
        assert_eq!(unit.next_sequence(), 1);
    }

    #[test]
    fn deactivate_is_sticky() {
        let unit = unit();
        assert!(unit.is_active());
        unit.deactivate();
        unit.deactivate();
        assert!(!unit.is_active());
        assert_eq!(unit.payload(), 0x20);
    }
}
