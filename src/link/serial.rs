//! Serial implementation of the device link.
//!
//! Owns the one serial handle in the process. Any I/O fault drops the handle
//! before the error propagates, so a faulted link is always observably
//! disconnected and never half-usable.

// ============================================================================
// Imports
// ============================================================================

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

use super::{Link, discover};

// ============================================================================
// Constants
// ============================================================================

/// Settle delay after opening before the device is considered ready.
const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Cooldown between close and the first reopen attempt.
const RECONNECT_COOLDOWN: Duration = Duration::from_secs(2);

/// Pause between failed reopen attempts.
const RECONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Maximum reopen attempts per reconnect cycle.
const RECONNECT_ATTEMPTS: u32 = 3;

/// Per-read timeout on the underlying port.
///
/// Short so that [`Link::read_line`] can honor its own deadline instead of
/// blocking on a single read.
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(100);

// ============================================================================
// SerialLink
// ============================================================================

/// Serial connection to the display device.
///
/// The handle is exclusively owned here; the protocol engine borrows it for
/// the duration of one transfer and never stores it.
pub struct SerialLink {
    /// Open handle, `None` while disconnected.
    port: Option<Box<dyn SerialPort>>,
    /// Endpoint identifier from the last successful discovery.
    port_name: Option<String>,
    /// Baud rate used for every open.
    baud_rate: u32,
}

impl SerialLink {
    /// Creates a disconnected link.
    #[inline]
    #[must_use]
    pub fn new(baud_rate: u32) -> Self {
        Self {
            port: None,
            port_name: None,
            baud_rate,
        }
    }

    /// Returns the endpoint identifier, if one has been discovered.
    #[inline]
    #[must_use]
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// Discovers the device endpoint and opens it.
    ///
    /// Waits the fixed settle delay after opening, then discards anything
    /// already buffered in both directions.
    ///
    /// # Errors
    ///
    /// - [`Error::LinkNotFound`] if no serial endpoint exists
    /// - [`Error::Link`] if the endpoint cannot be opened
    pub async fn connect(&mut self) -> Result<()> {
        info!("Detecting display device...");

        let name = discover()?;
        self.open(&name).await
    }

    /// Opens a specific endpoint at the configured baud rate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Link`] if the open fails.
    pub async fn open(&mut self, name: &str) -> Result<()> {
        let port = serialport::new(name, self.baud_rate)
            .timeout(PORT_READ_TIMEOUT)
            .open()
            .map_err(|e| Error::link(format!("cannot open {name}: {e}")))?;

        // Device resets on open; give it time to come up.
        sleep(SETTLE_DELAY).await;

        let _ = port.clear(ClearBuffer::All);

        self.port = Some(port);
        self.port_name = Some(name.to_string());

        info!(port = %name, baud = self.baud_rate, "Connected to display device");
        Ok(())
    }

    /// Closes the connection.
    ///
    /// Idempotent; safe to call on an already-closed link.
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Serial link closed");
        }
    }

    /// Closes and re-establishes the connection.
    ///
    /// Waits the fixed cooldown, then retries discovery + open up to
    /// [`RECONNECT_ATTEMPTS`] times; the first successful open wins.
    /// Discovery is re-run per attempt since a replugged device may
    /// enumerate under a different name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Link`] after all attempts fail.
    pub async fn reconnect(&mut self) -> Result<()> {
        info!("Reconnecting to display device...");

        self.close();
        sleep(RECONNECT_COOLDOWN).await;

        for attempt in 1..=RECONNECT_ATTEMPTS {
            info!(attempt, max = RECONNECT_ATTEMPTS, "Reconnection attempt");

            match self.connect().await {
                Ok(()) => {
                    info!("Reconnection successful");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnection attempt failed");
                }
            }

            sleep(RECONNECT_RETRY_DELAY).await;
        }

        error!(attempts = RECONNECT_ATTEMPTS, "Reconnection failed");
        Err(Error::link(format!(
            "reconnection failed after {RECONNECT_ATTEMPTS} attempts"
        )))
    }

    /// Drops the handle and produces a link error for a faulted operation.
    ///
    /// Callers must not assume a faulted link is still usable, so the handle
    /// is nulled before the error is returned.
    fn fault(&mut self, context: &str, err: std::io::Error) -> Error {
        error!(context, error = %err, "Serial fault, marking link disconnected");
        self.port = None;
        Error::link(format!("{context}: {err}"))
    }

    /// Borrows the open handle or fails with a link error.
    fn handle(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| Error::link("link is not connected"))
    }
}

// ============================================================================
// Link Implementation
// ============================================================================

impl Link for SerialLink {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let result = self.handle()?.write_all(bytes);
        result.map_err(|e| self.fault("write", e))
    }

    fn flush(&mut self) -> Result<()> {
        let result = self.handle()?.flush();
        result.map_err(|e| self.fault("flush", e))
    }

    fn read_line(&mut self, deadline: Duration) -> Result<String> {
        let started = Instant::now();
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        while started.elapsed() < deadline {
            let read = self.handle()?.read(&mut byte);
            match read {
                Ok(0) => {}
                Ok(_) => {
                    if byte[0] == b'\n' {
                        return Ok(String::from_utf8_lossy(&line).trim().to_string());
                    }
                    line.push(byte[0]);
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(self.fault("read", e)),
            }
        }

        // Deadline exhausted without a terminator.
        Ok(String::new())
    }

    fn clear_input(&mut self) -> Result<()> {
        let result = self.handle()?.clear(ClearBuffer::Input);
        result.map_err(|e| Error::link(format!("clear input: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_link_is_disconnected() {
        let link = SerialLink::new(9600);
        assert!(!link.is_open());
        assert!(link.port_name().is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut link = SerialLink::new(9600);
        link.close();
        link.close();
        assert!(!link.is_open());
    }

    #[test]
    fn test_operations_on_closed_link_fail() {
        let mut link = SerialLink::new(9600);

        assert!(link.write_all(b"x").is_err());
        assert!(link.flush().is_err());
        assert!(link.clear_input().is_err());
        assert!(link.read_line(Duration::from_millis(1)).is_err());
    }

    #[test]
    fn test_fault_reports_link_disconnected() {
        let mut link = SerialLink::new(9600);

        let io_err = std::io::Error::new(ErrorKind::BrokenPipe, "device unplugged");
        let err = link.fault("write", io_err);

        assert!(err.is_link_error());
        assert!(!link.is_open());
    }

    #[test]
    fn test_constants() {
        assert_eq!(SETTLE_DELAY.as_secs(), 2);
        assert_eq!(RECONNECT_COOLDOWN.as_secs(), 2);
        assert_eq!(RECONNECT_ATTEMPTS, 3);
    }
}
