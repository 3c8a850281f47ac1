//! qrbridge - payment backend to display device bridge.
//!
//! This crate connects a remote payment backend to a physically attached
//! microcontroller display: it polls the backend for pending commands and
//! pushes prepared images to the device over a serial byte stream.
//!
//! # Architecture
//!
//! The bridge is a single polling loop driving four layers:
//!
//! - **Session controller** ([`client`]): pulls work items, dispatches them
//!   in arrival order, reports every outcome, and coordinates reconnection
//!   of both the serial link and the backend session when either degrades
//! - **Command source client** ([`backend`]): registration, polling, and
//!   best-effort status reporting over HTTP
//! - **Transfer protocol engine** ([`protocol`]): the chunked upload
//!   handshake with stop-and-wait per-chunk acknowledgment
//! - **Transport link** ([`link`]): the one serial handle in the process,
//!   with discovery, fault detection, and reconnect
//!
//! Control flows downward; failure signals flow upward and trigger
//! reconnection at the session controller.
//!
//! # Quick Start
//!
//! ```no_run
//! use qrbridge::{Config, DeviceClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_env();
//!     config.validate()?;
//!
//!     let mut client = DeviceClient::new(config)?;
//!     client.start().await?;
//!     client.run().await;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backend`] | Command source HTTP client and work item types |
//! | [`client`] | Session controller and administrative surface |
//! | [`config`] | Environment-driven configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`imaging`] | Data URI decoding and device payload preparation |
//! | [`link`] | Serial transport link and endpoint discovery |
//! | [`protocol`] | Chunked device-transfer protocol |

// ============================================================================
// Modules
// ============================================================================

/// Command source HTTP client.
///
/// Registration, polling, and best-effort status reporting against the
/// payment backend.
pub mod backend;

/// Session controller.
///
/// The top-level polling loop, dispatch policy, and reconnection logic.
pub mod client;

/// Environment-driven configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Image payload preparation.
///
/// Decodes `data:` URIs and converts images into the payload the device
/// renders.
pub mod imaging;

/// Serial transport link.
///
/// Endpoint discovery, the [`link::Link`] seam, and the reconnecting serial
/// implementation.
pub mod link;

/// Chunked device-transfer protocol.
///
/// The upload handshake, per-chunk acknowledgment, and rotation control.
pub mod protocol;

// ============================================================================
// Re-exports
// ============================================================================

// Backend types
pub use backend::{BackendClient, Outcome, SessionHandle, WorkItem, WorkKind};

// Client types
pub use client::{ClientControls, ClientState, ClientStatus, DeviceClient};

// Configuration
pub use config::Config;

// Error types
pub use error::{Error, Result};

// Link types
pub use link::{Link, SerialLink};

// Protocol types
pub use protocol::TransferSession;
