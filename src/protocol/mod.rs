//! Xbox 360 wire protocol
//!
//! Pure functions only: frame bytes in, [`Decoded`] out. Which decoder runs is
//! fixed per unit by its [`ReportFormat`], chosen once at attach time from the
//! match tables.

pub mod buttons;
pub mod ids;
pub mod output;
pub mod wired;
pub mod wireless;

pub use buttons::PadInput;

use crate::pad::CanonicalReport;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire format spoken by a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Wired,
    Wireless,
}

/// Result of decoding one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Input(CanonicalReport),
    /// Wireless pad synced with its receiver channel
    Paired,
    /// Wireless pad left its receiver channel
    Unpaired,
    /// Not an input report; nothing to forward
    Ignored,
}

impl ReportFormat {
    pub fn decode(self, frame: &[u8]) -> Decoded {
        match self {
            ReportFormat::Wired => wired::decode(frame),
            ReportFormat::Wireless => wireless::decode(frame),
        }
    }

    pub fn led_command(self, led: u8) -> Vec<u8> {
        match self {
            ReportFormat::Wired => output::wired_led(led),
            ReportFormat::Wireless => output::wireless_led(led),
        }
    }

    pub fn rumble_command(self, left: u8, right: u8) -> Vec<u8> {
        match self {
            ReportFormat::Wired => output::wired_rumble(left, right),
            ReportFormat::Wireless => output::wireless_rumble(left, right),
        }
    }

    /// Encode an input report the way this format carries it.
    pub fn encode_input(self, input: &PadInput) -> Vec<u8> {
        match self {
            ReportFormat::Wired => wired::encode(input).to_vec(),
            ReportFormat::Wireless => wireless::encode(input).to_vec(),
        }
    }

    /// Wireless pads only become controllers once paired.
    pub fn registers_on_attach(self) -> bool {
        matches!(self, ReportFormat::Wired)
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Wired => write!(f, "wired"),
            ReportFormat::Wireless => write!(f, "wireless"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wired_units_never_see_presence_frames() {
        let paired = wireless::presence_frame(true);
        assert_eq!(ReportFormat::Wired.decode(&paired), Decoded::Ignored);
        assert_eq!(ReportFormat::Wireless.decode(&paired), Decoded::Paired);
    }

    #[test]
    fn commands_follow_format() {
        assert_eq!(ReportFormat::Wired.led_command(0x06).len(), 3);
        assert_eq!(ReportFormat::Wireless.led_command(0x06).len(), 4);
        assert_eq!(ReportFormat::Wired.rumble_command(0, 0).len(), 8);
        assert_eq!(ReportFormat::Wireless.rumble_command(0, 0).len(), 7);
    }

    #[test]
    fn format_parses_from_config_text() -> Result<(), toml::de::Error> {
        #[derive(Deserialize)]
        struct Holder {
            format: ReportFormat,
        }
        let holder: Holder = toml::from_str("format = \"wireless\"")?;
        assert_eq!(holder.format, ReportFormat::Wireless);
        Ok(())
    }
}
