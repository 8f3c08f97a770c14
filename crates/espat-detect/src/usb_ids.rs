//! USB Vendor/Product IDs of serial bridges found on ESP8266 boards

/// USB Vendor ID / Product ID pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl UsbId {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

/// Known bridges and their chip names
///
/// NodeMCU boards ship with CP2102 or CH340G, ESP-01 programmers mostly
/// with CH340 or FTDI parts.
const BRIDGES: &[(UsbId, &str)] = &[
    (UsbId::new(0x10C4, 0xEA60), "CP210x"),
    (UsbId::new(0x1A86, 0x7523), "CH340"),
    (UsbId::new(0x1A86, 0x5523), "CH341"),
    (UsbId::new(0x1A86, 0x55D4), "CH9102"),
    (UsbId::new(0x0403, 0x6001), "FT232R"),
    (UsbId::new(0x0403, 0x6015), "FT231X"),
    (UsbId::new(0x067B, 0x2303), "PL2303"),
];

/// Chip name for a known bridge
pub fn bridge_name(vid: u16, pid: u16) -> Option<&'static str> {
    let id = UsbId::new(vid, pid);
    BRIDGES
        .iter()
        .find(|(known, _)| *known == id)
        .map(|(_, name)| *name)
}
