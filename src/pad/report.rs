//! Canonical virtual-controller report.
//!
//! 24 sixteen-bit words, laid out the way the pad subsystem consumes them:
//!
//! | Word  | Content                                                    |
//! |-------|------------------------------------------------------------|
//! | 0     | system buttons (PS)                                        |
//! | 1     | reserved                                                   |
//! | 2     | digital 1: select, L3, R3, start, up, right, down, left    |
//! | 3     | digital 2: L2, R2, L1, R1, triangle, circle, cross, square |
//! | 4–7   | analog right x/y, left x/y (rest 0x80)                     |
//! | 8–19  | pressure values, 0..=0xFF                                  |
//! | 20–23 | motion sensors x/y/z/g (rest 0x200)                        |

pub const REPORT_WORDS: usize = 24;

pub const ANALOG_REST: u16 = 0x0080;
pub const SENSOR_REST: u16 = 0x0200;
pub const PRESSURE_MAX: u16 = 0x00FF;

/// Word offsets inside [`CanonicalReport::words`]
pub mod offset {
    pub const SYSTEM: usize = 0;
    pub const DIGITAL1: usize = 2;
    pub const DIGITAL2: usize = 3;
    pub const ANALOG_RIGHT_X: usize = 4;
    pub const ANALOG_RIGHT_Y: usize = 5;
    pub const ANALOG_LEFT_X: usize = 6;
    pub const ANALOG_LEFT_Y: usize = 7;
    pub const PRESS_RIGHT: usize = 8;
    pub const PRESS_LEFT: usize = 9;
    pub const PRESS_UP: usize = 10;
    pub const PRESS_DOWN: usize = 11;
    pub const PRESS_TRIANGLE: usize = 12;
    pub const PRESS_CIRCLE: usize = 13;
    pub const PRESS_CROSS: usize = 14;
    pub const PRESS_SQUARE: usize = 15;
    pub const PRESS_L1: usize = 16;
    pub const PRESS_R1: usize = 17;
    pub const PRESS_L2: usize = 18;
    pub const PRESS_R2: usize = 19;
    pub const SENSOR_X: usize = 20;
    pub const SENSOR_Y: usize = 21;
    pub const SENSOR_Z: usize = 22;
    pub const SENSOR_G: usize = 23;
}

/// Bits of the [`offset::SYSTEM`] word
pub mod system {
    pub const PS: u16 = 0x0001;
}

/// Bits of the [`offset::DIGITAL1`] word
pub mod digital1 {
    pub const SELECT: u16 = 0x0001;
    pub const L3: u16 = 0x0002;
    pub const R3: u16 = 0x0004;
    pub const START: u16 = 0x0008;
    pub const UP: u16 = 0x0010;
    pub const RIGHT: u16 = 0x0020;
    pub const DOWN: u16 = 0x0040;
    pub const LEFT: u16 = 0x0080;
}

/// Bits of the [`offset::DIGITAL2`] word
pub mod digital2 {
    pub const L2: u16 = 0x0001;
    pub const R2: u16 = 0x0002;
    pub const L1: u16 = 0x0004;
    pub const R1: u16 = 0x0008;
    pub const TRIANGLE: u16 = 0x0010;
    pub const CIRCLE: u16 = 0x0020;
    pub const CROSS: u16 = 0x0040;
    pub const SQUARE: u16 = 0x0080;
}

/// Button and axis state handed to the pad subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalReport {
    pub words: [u16; REPORT_WORDS],
}

impl CanonicalReport {
    /// Every field the source hardware does not drive, at rest: sticks
    /// centered, sensors at their midpoint, buttons and pressures cleared.
    pub fn neutral() -> Self {
        let mut words = [0u16; REPORT_WORDS];
        words[offset::ANALOG_RIGHT_X] = ANALOG_REST;
        words[offset::ANALOG_RIGHT_Y] = ANALOG_REST;
        words[offset::ANALOG_LEFT_X] = ANALOG_REST;
        words[offset::ANALOG_LEFT_Y] = ANALOG_REST;
        words[offset::SENSOR_X] = SENSOR_REST;
        words[offset::SENSOR_Y] = SENSOR_REST;
        words[offset::SENSOR_Z] = SENSOR_REST;
        words[offset::SENSOR_G] = SENSOR_REST;
        Self { words }
    }

    pub fn word(&self, index: usize) -> u16 {
        self.words.get(index).copied().unwrap_or(0)
    }

    /// Set or clear `mask` inside the word at `index`.
    pub fn set_bit(&mut self, index: usize, mask: u16, on: bool) {
        if let Some(word) = self.words.get_mut(index) {
            if on {
                *word |= mask;
            } else {
                *word &= !mask;
            }
        }
    }

    pub fn set(&mut self, index: usize, value: u16) {
        if let Some(word) = self.words.get_mut(index) {
            *word = value;
        }
    }

    pub fn is_pressed(&self, index: usize, mask: u16) -> bool {
        self.word(index) & mask != 0
    }
}

impl Default for CanonicalReport {
    fn default() -> Self {
        Self::neutral()
    }
}
