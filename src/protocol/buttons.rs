//! Button and axis mapping shared by both report formats.

use crate::pad::report::{digital1, digital2, offset, system, CanonicalReport, PRESSURE_MAX};

/// Source button bits (little-endian 16-bit bitmask)
pub mod bits {
    pub const DPAD_UP: u16 = 0x0001;
    pub const DPAD_DOWN: u16 = 0x0002;
    pub const DPAD_LEFT: u16 = 0x0004;
    pub const DPAD_RIGHT: u16 = 0x0008;
    pub const START: u16 = 0x0010;
    pub const BACK: u16 = 0x0020;
    pub const LEFT_STICK: u16 = 0x0040;
    pub const RIGHT_STICK: u16 = 0x0080;
    pub const LEFT_SHOULDER: u16 = 0x0100;
    pub const RIGHT_SHOULDER: u16 = 0x0200;
    pub const GUIDE: u16 = 0x0400;
    pub const A: u16 = 0x1000;
    pub const B: u16 = 0x2000;
    pub const X: u16 = 0x4000;
    pub const Y: u16 = 0x8000;
}

/// Fields common to both wire formats once the header is stripped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PadInput {
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub left: (i16, i16),
    pub right: (i16, i16),
}

impl PadInput {
    /// Sticks at rest and nothing pressed. Y = -1 is the raw value that maps
    /// onto the 0x80 center after inversion.
    pub fn centered() -> Self {
        Self {
            left: (0, -1),
            right: (0, -1),
            ..Self::default()
        }
    }

    /// Read buttons, triggers and sticks starting at `at` (buttons offset).
    pub(crate) fn read(frame: &[u8], at: usize) -> Option<Self> {
        let body = frame.get(at..at + 12)?;
        let word = |i: usize| i16::from_le_bytes([body[i], body[i + 1]]);
        Some(Self {
            buttons: u16::from_le_bytes([body[0], body[1]]),
            left_trigger: body[2],
            right_trigger: body[3],
            left: (word(4), word(6)),
            right: (word(8), word(10)),
        })
    }
}

struct Mapping {
    source: u16,
    word: usize,
    mask: u16,
    pressure: Option<usize>,
}

const fn map(source: u16, word: usize, mask: u16, pressure: Option<usize>) -> Mapping {
    Mapping {
        source,
        word,
        mask,
        pressure,
    }
}

const MAPPINGS: &[Mapping] = &[
    map(bits::GUIDE, offset::SYSTEM, system::PS, None),
    map(bits::DPAD_LEFT, offset::DIGITAL1, digital1::LEFT, Some(offset::PRESS_LEFT)),
    map(bits::DPAD_DOWN, offset::DIGITAL1, digital1::DOWN, Some(offset::PRESS_DOWN)),
    map(bits::DPAD_RIGHT, offset::DIGITAL1, digital1::RIGHT, Some(offset::PRESS_RIGHT)),
    map(bits::DPAD_UP, offset::DIGITAL1, digital1::UP, Some(offset::PRESS_UP)),
    map(bits::START, offset::DIGITAL1, digital1::START, None),
    map(bits::RIGHT_STICK, offset::DIGITAL1, digital1::R3, None),
    map(bits::LEFT_STICK, offset::DIGITAL1, digital1::L3, None),
    map(bits::BACK, offset::DIGITAL1, digital1::SELECT, None),
    map(bits::X, offset::DIGITAL2, digital2::SQUARE, Some(offset::PRESS_SQUARE)),
    map(bits::A, offset::DIGITAL2, digital2::CROSS, Some(offset::PRESS_CROSS)),
    map(bits::B, offset::DIGITAL2, digital2::CIRCLE, Some(offset::PRESS_CIRCLE)),
    map(bits::Y, offset::DIGITAL2, digital2::TRIANGLE, Some(offset::PRESS_TRIANGLE)),
    map(bits::RIGHT_SHOULDER, offset::DIGITAL2, digital2::R1, Some(offset::PRESS_R1)),
    map(bits::LEFT_SHOULDER, offset::DIGITAL2, digital2::L1, Some(offset::PRESS_L1)),
];

/// Rescale a signed 16-bit axis to 0..=255 centered at 0x80.
pub fn axis_to_byte(raw: i16) -> u16 {
    let high = raw.to_le_bytes()[1];
    u16::from(high ^ 0x80)
}

/// Like [`axis_to_byte`] with the direction flipped; the complement is taken
/// before the offset, so raw 0 lands on 0x7F and raw -1 on 0x80.
pub fn inverted_axis_to_byte(raw: i16) -> u16 {
    let high = raw.to_le_bytes()[1];
    u16::from(!high ^ 0x80)
}

/// Build the canonical report for one decoded input.
pub fn to_canonical(input: &PadInput) -> CanonicalReport {
    let mut report = CanonicalReport::neutral();

    for m in MAPPINGS {
        let pressed = input.buttons & m.source != 0;
        report.set_bit(m.word, m.mask, pressed);
        if let Some(pressure) = m.pressure {
            report.set(pressure, if pressed { PRESSURE_MAX } else { 0 });
        }
    }

    report.set_bit(offset::DIGITAL2, digital2::L2, input.left_trigger > 0);
    report.set_bit(offset::DIGITAL2, digital2::R2, input.right_trigger > 0);
    report.set(offset::PRESS_L2, u16::from(input.left_trigger));
    report.set(offset::PRESS_R2, u16::from(input.right_trigger));

    report.set(offset::ANALOG_RIGHT_X, axis_to_byte(input.right.0));
    report.set(offset::ANALOG_RIGHT_Y, inverted_axis_to_byte(input.right.1));
    report.set(offset::ANALOG_LEFT_X, axis_to_byte(input.left.0));
    report.set(offset::ANALOG_LEFT_Y, inverted_axis_to_byte(input.left.1));

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_extremes() {
        assert_eq!(axis_to_byte(i16::MIN), 0x00);
        assert_eq!(axis_to_byte(0), 0x80);
        assert_eq!(axis_to_byte(i16::MAX), 0xFF);
        assert_eq!(inverted_axis_to_byte(i16::MIN), 0xFF);
        assert_eq!(inverted_axis_to_byte(-1), 0x80);
        assert_eq!(inverted_axis_to_byte(0), 0x7F);
        assert_eq!(inverted_axis_to_byte(i16::MAX), 0x00);
    }

    #[test]
    fn inverted_axis_mirrors_plain_axis() {
        for raw in [i16::MIN, -12000, -1, 0, 1, 300, 20000, i16::MAX] {
            assert_eq!(axis_to_byte(raw) + inverted_axis_to_byte(raw), 0xFF);
        }
    }

    #[test]
    fn mapping_sources_are_distinct() {
        let mut seen = 0u16;
        for m in MAPPINGS {
            assert_eq!(seen & m.source, 0, "{:#06x} mapped twice", m.source);
            seen |= m.source;
        }
    }

    #[test]
    fn analog_trigger_sets_digital_and_pressure() {
        let input = PadInput {
            left_trigger: 0x40,
            ..PadInput::default()
        };
        let report = to_canonical(&input);
        assert!(report.is_pressed(offset::DIGITAL2, digital2::L2));
        assert!(!report.is_pressed(offset::DIGITAL2, digital2::R2));
        assert_eq!(report.word(offset::PRESS_L2), 0x40);
    }
}
