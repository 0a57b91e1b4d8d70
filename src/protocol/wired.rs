//! Wired pad input report.
//!
//! ```text
//!  0      1     2..3     4     5     6..13                 14..19
//! +-----+-----+-------+-----+-----+---------------------+----------+
//! | cmd | len | btns  | LT  | RT  | lx  ly  rx  ry (LE) | reserved |
//! +-----+-----+-------+-----+-----+---------------------+----------+
//! ```

use super::buttons::{self, PadInput};
use super::Decoded;

pub const INPUT_COMMAND: u8 = 0x00;
pub const INPUT_SIZE: u8 = 0x14;
pub const REPORT_LEN: usize = INPUT_SIZE as usize;

const BUTTONS_AT: usize = 2;

/// Extract the input fields, or `None` when the header is not an input report.
pub fn parse(frame: &[u8]) -> Option<PadInput> {
    match frame {
        [INPUT_COMMAND, INPUT_SIZE, ..] => PadInput::read(frame, BUTTONS_AT),
        _ => None,
    }
}

pub fn decode(frame: &[u8]) -> Decoded {
    parse(frame)
        .map(|input| Decoded::Input(buttons::to_canonical(&input)))
        .unwrap_or(Decoded::Ignored)
}

/// Serialize an input report; used by the simulated bus and capture tooling.
pub fn encode(input: &PadInput) -> [u8; REPORT_LEN] {
    let mut out = [0u8; REPORT_LEN];
    out[0] = INPUT_COMMAND;
    out[1] = INPUT_SIZE;
    out[2..4].copy_from_slice(&input.buttons.to_le_bytes());
    out[4] = input.left_trigger;
    out[5] = input.right_trigger;
    out[6..8].copy_from_slice(&input.left.0.to_le_bytes());
    out[8..10].copy_from_slice(&input.left.1.to_le_bytes());
    out[10..12].copy_from_slice(&input.right.0.to_le_bytes());
    out[12..14].copy_from_slice(&input.right.1.to_le_bytes());
    out
}
