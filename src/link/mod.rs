//! Byte-stream link to the display device.
//!
//! This module owns the serial connection to exactly one attached device:
//!
//! - [`Link`] - the byte-stream operations the protocol engine needs
//! - [`SerialLink`] - the real serial implementation with reconnect support
//! - [`discover`] - host-side endpoint discovery by port description
//!
//! The [`Link`] trait is the testable seam: the transfer protocol engine is
//! written against it, so protocol behavior can be exercised with a scripted
//! link and no hardware.

// ============================================================================
// Modules
// ============================================================================

mod serial;

pub use serial::SerialLink;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Port description keywords that identify common USB-to-serial bridges.
///
/// Matched case-insensitively as substrings against the human-readable
/// description of each enumerated endpoint.
const LINK_KEYWORDS: &[&str] = &["USB SERIAL", "CH340", "CP210", "UART", "USB-SERIAL"];

// ============================================================================
// Link Trait
// ============================================================================

/// Byte-stream operations over the device connection.
///
/// Implemented by [`SerialLink`] for real hardware and by scripted mocks in
/// tests. All operations are synchronous and bounded: reads never block past
/// their deadline, and a faulted implementation must report itself closed.
pub trait Link {
    /// Returns `true` if the underlying stream is open.
    fn is_open(&self) -> bool;

    /// Writes all bytes to the stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Link`] on any I/O fault. The link is unusable
    /// afterwards and must be reconnected.
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Flushes buffered output to the device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Link`] on any I/O fault.
    fn flush(&mut self) -> Result<()>;

    /// Reads one newline-terminated line, waiting at most `deadline`.
    ///
    /// Returns the line with surrounding whitespace trimmed, or an empty
    /// string if no complete line arrived before the deadline. Bytes that
    /// are not valid UTF-8 are replaced, never rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Link`] on any I/O fault other than a timeout.
    fn read_line(&mut self, deadline: Duration) -> Result<String>;

    /// Discards any bytes buffered on the inbound side.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Link`] if the stream rejects the clear. Callers
    /// that clear opportunistically ignore this error.
    fn clear_input(&mut self) -> Result<()>;
}

// ============================================================================
// Discovery
// ============================================================================

/// Finds the serial endpoint most likely to be the display device.
///
/// Scores each enumerated port by matching [`LINK_KEYWORDS`] against its
/// description; the first keyword match wins. When nothing matches but at
/// least one port exists, the first enumerated port is returned as a
/// fallback: some connection beats none, since enumeration order is not
/// authoritative. On hosts with several unrelated serial devices this
/// fallback can pick the wrong port, which is why every candidate is logged
/// before falling back.
///
/// # Errors
///
/// Returns [`Error::LinkNotFound`] only when zero ports exist.
pub fn discover() -> Result<String> {
    let ports = serialport::available_ports().map_err(|e| Error::link(e.to_string()))?;

    discover_in(&ports)
}

/// Keyword scan over an already-enumerated port list.
fn discover_in(ports: &[serialport::SerialPortInfo]) -> Result<String> {
    for port in ports {
        let description = describe_port(port);
        let upper = description.to_uppercase();

        if LINK_KEYWORDS.iter().any(|k| upper.contains(k)) {
            info!(port = %port.port_name, description = %description, "Found candidate device");
            return Ok(port.port_name.clone());
        }
    }

    // No keyword match. List everything, then fall back to the first port.
    if let Some(first) = ports.first() {
        warn!("No device matched by description. Available ports:");
        for port in ports {
            warn!(port = %port.port_name, description = %describe_port(port), "  candidate");
        }
        return Ok(first.port_name.clone());
    }

    Err(Error::LinkNotFound)
}

/// Builds a human-readable description for an enumerated port.
fn describe_port(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => {
            let product = usb.product.as_deref().unwrap_or("");
            let manufacturer = usb.manufacturer.as_deref().unwrap_or("");
            format!("{product} {manufacturer}").trim().to_string()
        }
        other => format!("{other:?}"),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serialport::{SerialPortInfo, SerialPortType, UsbPortInfo};

    fn usb_port(name: &str, product: &str) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid: 0x1a86,
                pid: 0x7523,
                serial_number: None,
                manufacturer: None,
                product: Some(product.to_string()),
            }),
        }
    }

    fn unknown_port(name: &str) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::Unknown,
        }
    }

    #[test]
    fn test_discover_matches_keyword() {
        let ports = vec![
            unknown_port("/dev/ttyS0"),
            usb_port("/dev/ttyUSB0", "CH340 serial converter"),
        ];
        assert_eq!(discover_in(&ports).unwrap(), "/dev/ttyUSB0");
    }

    #[test]
    fn test_discover_is_case_insensitive() {
        let ports = vec![usb_port("/dev/ttyACM0", "cp2102n usb to uart bridge")];
        assert_eq!(discover_in(&ports).unwrap(), "/dev/ttyACM0");
    }

    #[test]
    fn test_discover_falls_back_to_first_port() {
        let ports = vec![unknown_port("/dev/ttyS0"), unknown_port("/dev/ttyS1")];
        assert_eq!(discover_in(&ports).unwrap(), "/dev/ttyS0");
    }

    #[test]
    fn test_discover_empty_is_not_found() {
        let err = discover_in(&[]).unwrap_err();
        assert!(matches!(err, Error::LinkNotFound));
    }

    #[test]
    fn test_keyword_match_beats_enumeration_order() {
        let ports = vec![
            unknown_port("/dev/ttyS0"),
            usb_port("/dev/ttyUSB1", "USB-SERIAL adapter"),
        ];
        assert_eq!(discover_in(&ports).unwrap(), "/dev/ttyUSB1");
    }
}
