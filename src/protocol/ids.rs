//! Vendor/product match tables.
//!
//! Only used to decide whether the bridge claims a device and which report
//! format its units speak.

use super::ReportFormat;
use crate::usb::DeviceMatch;

const fn entry(vendor_id: u16, product_id: u16, name: &'static str) -> DeviceMatch {
    DeviceMatch {
        vendor_id,
        product_id,
        name,
    }
}

/// Directly wired pads
pub const WIRED_DEVICES: &[DeviceMatch] = &[
    entry(0x045e, 0x028e, "Microsoft X-Box 360 pad"),
    entry(0x046d, 0xc242, "Logitech Chillstream Controller"),
    entry(0x0738, 0x4716, "Mad Catz Wired Xbox 360 Controller"),
    entry(0x0738, 0x4728, "Mad Catz Street Fighter IV FightPad"),
    entry(0x0738, 0x4738, "Mad Catz Wired Xbox 360 Controller (SFIV)"),
    entry(0x0738, 0xbeef, "Mad Catz JOYTECH NEO SE Advanced GamePad"),
    entry(0x0e6f, 0x0201, "Pelican PL-3601 'TSZ' Wired Xbox 360 Controller"),
    entry(0x0e6f, 0x0213, "Afterglow Gamepad for Xbox 360"),
    entry(0x0f0d, 0x000d, "Hori Fighting Stick EX2"),
    entry(0x0f0d, 0x0016, "Hori Real Arcade Pro.EX"),
    entry(0x146b, 0x0601, "BigBen Interactive XBOX 360 Controller"),
    entry(0x1689, 0xfd00, "Razer Onza Tournament Edition"),
    entry(0x1689, 0xfd01, "Razer Onza Classic Edition"),
    entry(0x1bad, 0x0003, "Harmonix Rock Band Drumkit"),
    entry(0x1bad, 0xf016, "Mad Catz Xbox 360 Controller"),
    entry(0x1bad, 0xf028, "Street Fighter IV FightPad"),
    entry(0x1bad, 0xf901, "Gamestop Xbox 360 Controller"),
    entry(0x1bad, 0xf903, "Tron Xbox 360 controller"),
    entry(0x24c6, 0x5300, "PowerA MINI PROEX Controller"),
];

/// Wireless receivers multiplexing up to four pads
pub const WIRELESS_RECEIVERS: &[DeviceMatch] = &[
    entry(0x045e, 0x0291, "Xbox 360 Wireless Receiver (XBOX)"),
    entry(0x045e, 0x0719, "Xbox 360 Wireless Receiver"),
];

/// Find the table row for a vendor/product pair.
pub fn lookup(vendor_id: u16, product_id: u16) -> Option<(ReportFormat, &'static DeviceMatch)> {
    let matches = |m: &&DeviceMatch| m.vendor_id == vendor_id && m.product_id == product_id;
    WIRED_DEVICES
        .iter()
        .find(matches)
        .map(|m| (ReportFormat::Wired, m))
        .or_else(|| {
            WIRELESS_RECEIVERS
                .iter()
                .find(matches)
                .map(|m| (ReportFormat::Wireless, m))
        })
}

/// Both tables, wired first.
pub fn all_matches() -> Vec<DeviceMatch> {
    WIRED_DEVICES
        .iter()
        .chain(WIRELESS_RECEIVERS.iter())
        .copied()
        .collect()
}
