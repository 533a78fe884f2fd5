//! Host-side serial port discovery.

use crate::port::PortInfo;

/// Discover available serial ports, USB adapters first.
#[cfg(feature = "native")]
pub fn discover_ports() -> crate::Result<Vec<PortInfo>> {
    use crate::port::{NativePortEnumerator, PortEnumerator};

    let mut ports = NativePortEnumerator::list_ports()?;
    sort_ports(&mut ports);
    Ok(ports)
}

/// Order ports for display: USB adapters before built-in UARTs, then by
/// name.
pub fn sort_ports(ports: &mut [PortInfo]) {
    ports.sort_by(|a, b| {
        b.vid
            .is_some()
            .cmp(&a.vid.is_some())
            .then_with(|| a.name.cmp(&b.name))
    });
}
