//! Bridge from USB Xbox 360 pads and wireless receivers to a virtual
//! controller subsystem.

pub mod config;
pub mod driver;
pub mod notify;
pub mod pad;
pub mod protocol;
pub mod replay;
pub mod usb;
