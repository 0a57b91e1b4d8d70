//! Wireless receiver frames.
//!
//! Each receiver endpoint carries one pad. Besides input reports the channel
//! carries presence frames announcing that a pad synced or dropped off:
//!
//! ```text
//!  0      1        2..3      4     5     6..17
//! +------+--------+--------+-----+-----+----------------------------+
//! | kind | sub    | rsvd   | cmd | len | btns LT RT lx ly rx ry     |
//! +------+--------+--------+-----+-----+----------------------------+
//!  0x00   0x01     input report
//!  0x08   0x80     pad paired    (rest of the frame ignored)
//!  0x08   0x00     pad unpaired  (rest of the frame ignored)
//! ```

use super::buttons::{self, PadInput};
use super::Decoded;

pub const FRAME_LEN: usize = 29;

pub const PRESENCE_KIND: u8 = 0x08;
pub const PRESENCE_PAIRED: u8 = 0x80;
pub const PRESENCE_UNPAIRED: u8 = 0x00;

pub const INPUT_SUBTYPE: u8 = 0x01;
pub const INPUT_COMMAND: u8 = 0x00;
pub const INPUT_SIZE: u8 = 0x13;

const BUTTONS_AT: usize = 6;

/// Presence frames are recognized from the first two bytes alone, before
/// any input header check.
pub fn classify_presence(frame: &[u8]) -> Option<Decoded> {
    match frame {
        [PRESENCE_KIND, PRESENCE_PAIRED, ..] => Some(Decoded::Paired),
        [PRESENCE_KIND, PRESENCE_UNPAIRED, ..] => Some(Decoded::Unpaired),
        _ => None,
    }
}

pub fn parse(frame: &[u8]) -> Option<PadInput> {
    match frame {
        [_, INPUT_SUBTYPE, _, _, INPUT_COMMAND, INPUT_SIZE, ..] => {
            PadInput::read(frame, BUTTONS_AT)
        }
        _ => None,
    }
}

pub fn decode(frame: &[u8]) -> Decoded {
    if let Some(presence) = classify_presence(frame) {
        return presence;
    }
    parse(frame)
        .map(|input| Decoded::Input(buttons::to_canonical(&input)))
        .unwrap_or(Decoded::Ignored)
}

pub fn encode(input: &PadInput) -> [u8; FRAME_LEN] {
    let mut out = [0u8; FRAME_LEN];
    out[0] = 0x00;
    out[1] = INPUT_SUBTYPE;
    out[4] = INPUT_COMMAND;
    out[5] = INPUT_SIZE;
    out[6..8].copy_from_slice(&input.buttons.to_le_bytes());
    out[8] = input.left_trigger;
    out[9] = input.right_trigger;
    out[10..12].copy_from_slice(&input.left.0.to_le_bytes());
    out[12..14].copy_from_slice(&input.left.1.to_le_bytes());
    out[14..16].copy_from_slice(&input.right.0.to_le_bytes());
    out[16..18].copy_from_slice(&input.right.1.to_le_bytes());
    out
}

pub fn presence_frame(paired: bool) -> [u8; FRAME_LEN] {
    let mut out = [0u8; FRAME_LEN];
    out[0] = PRESENCE_KIND;
    out[1] = if paired {
        PRESENCE_PAIRED
    } else {
        PRESENCE_UNPAIRED
    };
    out
}
