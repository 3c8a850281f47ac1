//! Session state and failure accounting.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::SystemTime;

// ============================================================================
// ClientState
// ============================================================================

/// Lifecycle state of the bridge session.
///
/// Degradation is not a separate state: the loop stays `Online` while the
/// consecutive-failure counter climbs, and flips to `Reconnecting` only for
/// the duration of a reconnect cycle. `Offline` is reached solely by
/// explicit shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Link discovery and registration in progress.
    Starting,
    /// Polling loop active.
    Online,
    /// Coordinated link + session reconnection in progress.
    Reconnecting,
    /// Shut down; the loop has exited.
    Offline,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Starting => "starting",
            Self::Online => "online",
            Self::Reconnecting => "reconnecting",
            Self::Offline => "offline",
        };
        f.write_str(label)
    }
}

// ============================================================================
// ClientStatus
// ============================================================================

/// Point-in-time snapshot for the administrative surface.
#[derive(Debug, Clone)]
pub struct ClientStatus {
    /// Current lifecycle state.
    pub state: ClientState,
    /// Registered device identity, once registration has succeeded.
    pub device_id: Option<String>,
    /// Serial endpoint the device is attached to, once discovered.
    pub port: Option<String>,
    /// Wall-clock time of the last completed poll cycle.
    pub last_poll: Option<SystemTime>,
}

impl Default for ClientStatus {
    fn default() -> Self {
        Self {
            state: ClientState::Starting,
            device_id: None,
            port: None,
            last_poll: None,
        }
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (device: {}, port: {})",
            self.state,
            self.device_id.as_deref().unwrap_or("-"),
            self.port.as_deref().unwrap_or("-"),
        )
    }
}

// ============================================================================
// ErrorCounter
// ============================================================================

/// Consecutive poll-cycle failure counter.
///
/// Reset to zero on any successful cycle; crossing the threshold triggers a
/// coordinated reconnection. Scoped to one polling-loop run.
#[derive(Debug, Clone, Copy)]
pub struct ErrorCounter {
    count: u32,
    threshold: u32,
}

impl ErrorCounter {
    /// Creates a counter that trips at `threshold` consecutive failures.
    #[inline]
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold,
        }
    }

    /// Current consecutive-failure count.
    #[inline]
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Threshold at which reconnection triggers.
    #[inline]
    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Records a clean cycle, resetting the count.
    pub fn record_success(&mut self) {
        self.count = 0;
    }

    /// Records a failed cycle; returns `true` when a reconnect cycle is due.
    ///
    /// The count is not reset here: it clears only on a clean cycle or a
    /// successful re-registration, so a persistently failing loop keeps
    /// retrying reconnection on every scheduled cycle.
    pub fn record_failure(&mut self) -> bool {
        self.count += 1;
        self.count >= self.threshold
    }

    /// Clears the count after a successful re-registration.
    pub fn reset(&mut self) {
        self.count = 0;
    }
}

// ============================================================================
// Tests
// ============================================================================
