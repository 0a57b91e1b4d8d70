//! Output reports written to the pad's out pipe.

/// LED ring patterns, indexed by port modulo four
pub const LED_PATTERNS: [u8; 4] = [0x06, 0x07, 0x08, 0x09];

const WIRELESS_LED_FLAG: u8 = 0x40;

pub fn led_for_port(port: u32) -> u8 {
    LED_PATTERNS[(port % 4) as usize]
}

pub fn wired_led(led: u8) -> Vec<u8> {
    vec![0x01, 0x03, led]
}

pub fn wireless_led(led: u8) -> Vec<u8> {
    vec![0x00, 0x00, 0x08, WIRELESS_LED_FLAG | led]
}

pub fn wired_rumble(left: u8, right: u8) -> Vec<u8> {
    vec![0x00, 0x08, 0x00, left, right, 0x00, 0x00, 0x00]
}

pub fn wireless_rumble(left: u8, right: u8) -> Vec<u8> {
    vec![0x00, 0x01, 0x0f, 0xc0, 0x00, left, right]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn led_wraps_every_four_ports() {
        assert_eq!(led_for_port(0), 0x06);
        assert_eq!(led_for_port(3), 0x09);
        assert_eq!(led_for_port(4), 0x06);
        assert_eq!(led_for_port(6), 0x08);
    }

    #[test]
    fn command_lengths() {
        assert_eq!(wired_led(0x06), vec![0x01, 0x03, 0x06]);
        assert_eq!(wireless_led(0x07), vec![0x00, 0x00, 0x08, 0x47]);
        assert_eq!(wired_rumble(1, 2).len(), 8);
        assert_eq!(wireless_rumble(1, 2)[5..], [1, 2]);
    }
}
