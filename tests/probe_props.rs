//! Property tests for device probing.
//!
//! A device is accepted exactly when its vendor/product pair is in one of
//! the match tables and a slot is free. The table decides the report format.

use proptest::prelude::*;
use std::sync::Arc;
use xpad_bridge::driver::hotplug::probe_descriptors;
use xpad_bridge::driver::{Driver, DriverSettings, ProbeOutcome, ProbeRejection};
use xpad_bridge::notify::TracingNotifier;
use xpad_bridge::pad::loopback::LoopbackPads;
use xpad_bridge::protocol::ids::{lookup, WIRED_DEVICES, WIRELESS_RECEIVERS};
use xpad_bridge::protocol::ReportFormat;
use xpad_bridge::usb::parse_descriptors;
use xpad_bridge::usb::sim::{wired_pad, SimulatedBus};

fn known_device() -> impl Strategy<Value = (u16, u16, ReportFormat)> {
    let wired = (0..WIRED_DEVICES.len()).prop_map(|i| {
        let m = WIRED_DEVICES[i];
        (m.vendor_id, m.product_id, ReportFormat::Wired)
    });
    let wireless = (0..WIRELESS_RECEIVERS.len()).prop_map(|i| {
        let m = WIRELESS_RECEIVERS[i];
        (m.vendor_id, m.product_id, ReportFormat::Wireless)
    });
    prop_oneof![wired, wireless]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Any pair is accepted iff it is listed and a slot is free.
    #[test]
    fn prop_accept_iff_listed_and_free(vendor_id: u16, product_id: u16, free: bool) {
        let descriptors = parse_descriptors(&wired_pad(vendor_id, product_id))
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let outcome = probe_descriptors(&descriptors, free);
        match (lookup(vendor_id, product_id), free) {
            (Some((format, entry)), true) => prop_assert_eq!(
                outcome,
                ProbeOutcome::Accepted { format, name: entry.name }
            ),
            (Some(_), false) => prop_assert_eq!(
                outcome,
                ProbeOutcome::Rejected(ProbeRejection::NoFreeSlot)
            ),
            (None, _) => {
                let accepted = matches!(outcome, ProbeOutcome::Accepted { .. });
                prop_assert!(!accepted);
            }
        }
    }

    /// Every listed device is accepted with the format of its table.
    #[test]
    fn prop_listed_devices_get_their_format((vendor_id, product_id, format) in known_device()) {
        let descriptors = parse_descriptors(&wired_pad(vendor_id, product_id))
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        match probe_descriptors(&descriptors, true) {
            ProbeOutcome::Accepted { format: got, .. } => prop_assert_eq!(got, format),
            other => prop_assert!(false, "{:04x}:{:04x} rejected: {:?}", vendor_id, product_id, other),
        }
    }
}

#[test]
fn driver_probe_rejects_once_slots_run_out() -> Result<(), Box<dyn std::error::Error>> {
    let bus = Arc::new(SimulatedBus::new());
    let driver = Driver::new(
        bus.clone(),
        Arc::new(LoopbackPads::new()),
        Arc::new(TracingNotifier::new(false)),
        DriverSettings::default(),
    );

    for _ in 0..xpad_bridge::driver::MAX_SLOTS {
        let device = bus.plug(&wired_pad(0x045e, 0x028e))?;
        assert!(matches!(driver.probe(device)?, ProbeOutcome::Accepted { .. }));
        driver.attach(device, ReportFormat::Wired)?;
    }

    let late = bus.plug(&wired_pad(0x045e, 0x028e))?;
    assert_eq!(
        driver.probe(late)?,
        ProbeOutcome::Rejected(ProbeRejection::NoFreeSlot)
    );
    Ok(())
}

/// Every pad and receiver the bridge is known to drive, in table order.
const KNOWN_WIRED: [(u16, u16, &str); 19] = [
    (0x045e, 0x028e, "Microsoft X-Box 360 pad"),
    (0x046d, 0xc242, "Logitech Chillstream Controller"),
    (0x0738, 0x4716, "Mad Catz Wired Xbox 360 Controller"),
    (0x0738, 0x4728, "Mad Catz Street Fighter IV FightPad"),
    (0x0738, 0x4738, "Mad Catz Wired Xbox 360 Controller (SFIV)"),
    (0x0738, 0xbeef, "Mad Catz JOYTECH NEO SE Advanced GamePad"),
    (0x0e6f, 0x0201, "Pelican PL-3601 'TSZ' Wired Xbox 360 Controller"),
    (0x0e6f, 0x0213, "Afterglow Gamepad for Xbox 360"),
    (0x0f0d, 0x000d, "Hori Fighting Stick EX2"),
    (0x0f0d, 0x0016, "Hori Real Arcade Pro.EX"),
    (0x146b, 0x0601, "BigBen Interactive XBOX 360 Controller"),
    (0x1689, 0xfd00, "Razer Onza Tournament Edition"),
    (0x1689, 0xfd01, "Razer Onza Classic Edition"),
    (0x1bad, 0x0003, "Harmonix Rock Band Drumkit"),
    (0x1bad, 0xf016, "Mad Catz Xbox 360 Controller"),
    (0x1bad, 0xf028, "Street Fighter IV FightPad"),
    (0x1bad, 0xf901, "Gamestop Xbox 360 Controller"),
    (0x1bad, 0xf903, "Tron Xbox 360 controller"),
    (0x24c6, 0x5300, "PowerA MINI PROEX Controller"),
];

const KNOWN_RECEIVERS: [(u16, u16, &str); 2] = [
    (0x045e, 0x0291, "Xbox 360 Wireless Receiver (XBOX)"),
    (0x045e, 0x0719, "Xbox 360 Wireless Receiver"),
];

#[test]
fn match_tables_list_every_known_device() -> Result<(), Box<dyn std::error::Error>> {
    let rows = |table: &[xpad_bridge::usb::DeviceMatch]| -> Vec<(u16, u16, &'static str)> {
        table.iter().map(|m| (m.vendor_id, m.product_id, m.name)).collect()
    };
    assert_eq!(rows(WIRED_DEVICES), KNOWN_WIRED.to_vec());
    assert_eq!(rows(WIRELESS_RECEIVERS), KNOWN_RECEIVERS.to_vec());

    for (vendor_id, product_id, name) in KNOWN_WIRED {
        let descriptors = parse_descriptors(&wired_pad(vendor_id, product_id))?;
        assert_eq!(
            probe_descriptors(&descriptors, true),
            ProbeOutcome::Accepted {
                format: ReportFormat::Wired,
                name
            },
            "{vendor_id:04x}:{product_id:04x}"
        );
    }
    for (vendor_id, product_id, name) in KNOWN_RECEIVERS {
        assert_eq!(
            lookup(vendor_id, product_id).map(|(format, m)| (format, m.name)),
            Some((ReportFormat::Wireless, name))
        );
    }
    Ok(())
}
