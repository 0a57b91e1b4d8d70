//! Standard USB descriptor parsing.
//!
//! # Layouts (little-endian 16-bit fields)
//! | Type | Len | Fields used                                             |
//! |------|-----|---------------------------------------------------------|
//! | 0x01 | 18  | idVendor @8, idProduct @10                              |
//! | 0x02 | 9   | bConfigurationValue @5                                  |
//! | 0x04 | 9   | bInterfaceNumber @2, bAlternateSetting @3               |
//! | 0x05 | 7   | bEndpointAddress @2, bmAttributes @3, wMaxPacketSize @4 |
//!
//! Descriptor types outside this table (HID, vendor class descriptors, ...)
//! are skipped.

pub const DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;
pub const DESCRIPTOR_TYPE_CONFIGURATION: u8 = 0x02;
pub const DESCRIPTOR_TYPE_INTERFACE: u8 = 0x04;
pub const DESCRIPTOR_TYPE_ENDPOINT: u8 = 0x05;

const DEVICE_LEN: usize = 18;
const CONFIGURATION_LEN: usize = 9;
const INTERFACE_LEN: usize = 9;
const ENDPOINT_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationDescriptor {
    pub configuration_value: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub alternate_setting: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    pub fn is_in(&self) -> bool {
        self.address & 0x80 != 0
    }

    /// Same endpoint description with a different address. Used to open the
    /// out pipe that mirrors an in endpoint.
    pub fn with_address(&self, address: u8) -> Self {
        Self { address, ..*self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    Device(DeviceDescriptor),
    Configuration(ConfigurationDescriptor),
    Interface(InterfaceDescriptor),
    Endpoint(EndpointDescriptor),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("descriptor at offset {offset} has invalid length {length}")]
    InvalidLength { offset: usize, length: u8 },

    #[error("descriptor at offset {offset} runs past the end of the buffer ({available} bytes left)")]
    Truncated { offset: usize, available: usize },

    #[error("descriptor type {kind:#04x} at offset {offset} is shorter than {need} bytes")]
    TooShort { offset: usize, kind: u8, need: usize },
}

/// Parse a concatenated descriptor blob (as returned by GET_DESCRIPTOR for a
/// device followed by its full configuration) into typed descriptors.
pub fn parse_descriptors(data: &[u8]) -> Result<Vec<Descriptor>, DescriptorError> {
    let mut out = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let rest = &data[offset..];
        let length = rest[0];
        if length < 2 {
            return Err(DescriptorError::InvalidLength { offset, length });
        }
        let length_usize = usize::from(length);
        let Some(body) = rest.get(..length_usize) else {
            return Err(DescriptorError::Truncated {
                offset,
                available: rest.len(),
            });
        };

        if let Some(descriptor) = parse_one(offset, body)? {
            out.push(descriptor);
        }
        offset += length_usize;
    }

    Ok(out)
}

fn parse_one(offset: usize, body: &[u8]) -> Result<Option<Descriptor>, DescriptorError> {
    let kind = body[1];
    let need = match kind {
        DESCRIPTOR_TYPE_DEVICE => DEVICE_LEN,
        DESCRIPTOR_TYPE_CONFIGURATION => CONFIGURATION_LEN,
        DESCRIPTOR_TYPE_INTERFACE => INTERFACE_LEN,
        DESCRIPTOR_TYPE_ENDPOINT => ENDPOINT_LEN,
        _ => return Ok(None),
    };
    if body.len() < need {
        return Err(DescriptorError::TooShort { offset, kind, need });
    }

    let descriptor = match kind {
        DESCRIPTOR_TYPE_DEVICE => Descriptor::Device(DeviceDescriptor {
            vendor_id: u16::from_le_bytes([body[8], body[9]]),
            product_id: u16::from_le_bytes([body[10], body[11]]),
        }),
        DESCRIPTOR_TYPE_CONFIGURATION => Descriptor::Configuration(ConfigurationDescriptor {
            configuration_value: body[5],
        }),
        DESCRIPTOR_TYPE_INTERFACE => Descriptor::Interface(InterfaceDescriptor {
            number: body[2],
            alternate_setting: body[3],
        }),
        _ => Descriptor::Endpoint(EndpointDescriptor {
            address: body[2],
            attributes: body[3],
            max_packet_size: u16::from_le_bytes([body[4], body[5]]),
        }),
    };
    Ok(Some(descriptor))
}

/// Encoders for the four descriptor kinds above, producing wire-format bytes.
pub mod encode {
    use super::*;

    pub fn device(vendor_id: u16, product_id: u16) -> Vec<u8> {
        let [vl, vh] = vendor_id.to_le_bytes();
        let [pl, ph] = product_id.to_le_bytes();
        vec![
            DEVICE_LEN as u8,
            DESCRIPTOR_TYPE_DEVICE,
            0x00,
            0x02, // bcdUSB 2.00
            0xff,
            0xff,
            0xff,
            0x08,
            vl,
            vh,
            pl,
            ph,
            0x14,
            0x01,
            0x01,
            0x02,
            0x03,
            0x01,
        ]
    }

    pub fn configuration(value: u8, interfaces: u8, total_length: u16) -> Vec<u8> {
        let [tl, th] = total_length.to_le_bytes();
        vec![
            CONFIGURATION_LEN as u8,
            DESCRIPTOR_TYPE_CONFIGURATION,
            tl,
            th,
            interfaces,
            value,
            0x00,
            0xa0,
            0xfa,
        ]
    }

    pub fn interface(number: u8, alternate: u8, endpoints: u8) -> Vec<u8> {
        vec![
            INTERFACE_LEN as u8,
            DESCRIPTOR_TYPE_INTERFACE,
            number,
            alternate,
            endpoints,
            0xff,
            0x5d,
            0x01,
            0x00,
        ]
    }

    pub fn endpoint(address: u8, max_packet_size: u16) -> Vec<u8> {
        let [ml, mh] = max_packet_size.to_le_bytes();
        vec![
            ENDPOINT_LEN as u8,
            DESCRIPTOR_TYPE_ENDPOINT,
            address,
            0x03, // interrupt
            ml,
            mh,
            0x04,
        ]
    }
}
