//! Session controller.
//!
//! The top-level driver: one polling loop per process pulls work items from
//! the backend, dispatches them to the transfer protocol engine over the
//! serial link, reports every outcome, and coordinates reconnection of both
//! the link and the logical session when either side degrades.
//!
//! # Lifecycle
//!
//! ```text
//! Starting --start()--> Online --5 consecutive failures--> Reconnecting
//!                          ^                                    |
//!                          +---- successful re-registration ----+
//! ```
//!
//! There is no automatic terminal state: a failed reconnect cycle leaves the
//! stale session handle in place and the loop keeps retrying on its normal
//! schedule. An external [`ClientControls::force_restart`] request runs the
//! same reconnect cycle between polls, out of band from the failure counter.
//! Only an explicit [`ClientControls::stop`] ends the loop.
//!
//! # Concurrency
//!
//! One logical worker drives all device I/O; the link and the transfer
//! session are never accessed concurrently. Shutdown is cooperative: the
//! running flag is observed between cycles, so shutdown latency is bounded
//! by one in-flight chunk-ack window plus the current sleep.

// ============================================================================
// Modules
// ============================================================================

mod state;

pub use state::{ClientState, ClientStatus, ErrorCounter};

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, SystemTime};

use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::backend::{BackendClient, Outcome, SessionHandle, WorkItem, WorkKind};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::imaging;
use crate::link::{Link, SerialLink};
use crate::protocol;

// ============================================================================
// Constants
// ============================================================================

/// Filename announced to the device for every upload; the firmware keeps a
/// single image slot.
const DEVICE_FILENAME: &str = "1.jpeg";

// ============================================================================
// ClientControls
// ============================================================================

/// Administrative surface handed to the presentation layer.
///
/// Cheap to clone; usable from any task while the loop runs.
#[derive(Clone)]
pub struct ClientControls {
    running: Arc<AtomicBool>,
    restart_requested: Arc<AtomicBool>,
    status: Arc<Mutex<ClientStatus>>,
}

impl ClientControls {
    /// Requests a cooperative shutdown.
    ///
    /// The loop observes the flag between cycles, closes the link, and
    /// releases the session.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Requests a coordinated reconnect of the link and the session, out of
    /// band from the failure counter.
    ///
    /// The loop services the request between poll cycles; repeated requests
    /// before then collapse into one reconnect cycle.
    pub fn force_restart(&self) {
        self.restart_requested.store(true, Ordering::SeqCst);
    }

    /// Returns `true` while the loop is scheduled to keep running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the current session status.
    #[must_use]
    pub fn status(&self) -> ClientStatus {
        self.status.lock().clone()
    }
}

// ============================================================================
// DeviceClient
// ============================================================================

/// The bridge's session controller.
///
/// Owns the serial link, the backend client, and the session handle; exactly
/// one instance drives the device per process.
pub struct DeviceClient {
    config: Config,
    link: SerialLink,
    backend: BackendClient,
    handle: Option<SessionHandle>,
    errors: ErrorCounter,
    running: Arc<AtomicBool>,
    restart_requested: Arc<AtomicBool>,
    status: Arc<Mutex<ClientStatus>>,
}

impl DeviceClient {
    /// Creates a client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the backend client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let backend = BackendClient::new(&config)?;
        let link = SerialLink::new(config.baud_rate);
        let errors = ErrorCounter::new(config.max_consecutive_errors);

        Ok(Self {
            config,
            link,
            backend,
            handle: None,
            errors,
            running: Arc::new(AtomicBool::new(false)),
            restart_requested: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(ClientStatus::default())),
        })
    }

    /// Returns the administrative controls for this client.
    #[must_use]
    pub fn controls(&self) -> ClientControls {
        ClientControls {
            running: Arc::clone(&self.running),
            restart_requested: Arc::clone(&self.restart_requested),
            status: Arc::clone(&self.status),
        }
    }

    /// Connects the link and registers with the backend.
    ///
    /// Both steps are fatal at startup: the loop must not begin against a
    /// missing device or an unregistered session.
    ///
    /// # Errors
    ///
    /// - [`Error::LinkNotFound`] / [`Error::Link`] if no device is attached
    /// - [`Error::Registration`] if the backend rejects or is unreachable
    pub async fn start(&mut self) -> Result<()> {
        info!("Step 1: Detecting display device...");
        self.link.connect().await?;
        self.set_port(self.link.port_name().map(str::to_string));

        info!("Step 2: Registering with backend...");
        let handle = self
            .backend
            .register(&self.config.host_name, self.link.port_name())
            .await?;

        info!(device_id = %handle, "Bridge is online");
        self.set_handle(handle);
        self.set_state(ClientState::Online);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Runs the polling loop until stopped.
    ///
    /// Each cycle polls for work and dispatches it in arrival order. A clean
    /// cycle resets the consecutive-failure counter; a failed cycle
    /// increments it and backs off longer, and at the threshold a
    /// coordinated reconnect cycle runs before polling resumes.
    pub async fn run(&mut self) {
        info!(
            interval = ?self.config.poll_interval,
            "Step 3: Polling loop started"
        );

        while self.running.load(Ordering::SeqCst) {
            self.service_restart_request().await;

            match self.poll_cycle().await {
                Ok(()) => {
                    self.errors.record_success();
                    sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    let due = self.errors.record_failure();
                    error!(
                        errors = self.errors.count(),
                        max = self.errors.threshold(),
                        error = %e,
                        "Polling error"
                    );

                    if due {
                        self.reconnect_cycle().await;
                    }

                    sleep(self.config.error_backoff).await;
                }
            }
        }

        self.shutdown();
    }

    /// Executes one poll cycle: fetch pending work and dispatch all of it.
    ///
    /// # Errors
    ///
    /// Returns an error only when the backend cannot be reached; dispatch
    /// failures are reported per item and never fail the cycle.
    pub async fn poll_cycle(&mut self) -> Result<()> {
        let handle = self
            .handle
            .clone()
            .ok_or_else(|| Error::registration("no active session"))?;

        let items = self.backend.poll(&handle).await?;

        if !items.is_empty() {
            info!(count = items.len(), "Received command(s)");
        }

        // The device accepts exactly one transfer at a time; dispatch is
        // synchronous and in arrival order.
        for item in items {
            self.dispatch_and_report(&handle, item).await;
        }

        self.status.lock().last_poll = Some(SystemTime::now());
        Ok(())
    }
}

// ============================================================================
// DeviceClient - Dispatch
// ============================================================================

impl DeviceClient {
    /// Dispatches one work item and reports its outcome.
    ///
    /// Every item gets a status report regardless of outcome; a bad item
    /// must never crash the loop, so dispatch errors are converted into
    /// reports here.
    async fn dispatch_and_report(&mut self, handle: &SessionHandle, item: WorkItem) {
        let item_id = item.id.clone();
        info!(item = %item_id, "Executing command");

        match item.kind {
            WorkKind::DisplayImage { image, .. } => {
                let started = Instant::now();
                let result = self.display_image(image).await;
                let elapsed = started.elapsed().as_secs_f64();

                match result {
                    Ok(()) => {
                        info!(item = %item_id, elapsed, "Image displayed");
                        self.backend
                            .report_status(handle, &item_id, Outcome::Success, Some(elapsed), None)
                            .await;
                    }
                    Err(e) if e.is_recoverable() => {
                        // Device-side failure: the backend may reissue the
                        // item, and the next dispatch restarts the handshake.
                        error!(item = %item_id, error = %e, "Image transfer failed");
                        self.backend
                            .report_status(
                                handle,
                                &item_id,
                                Outcome::Failed,
                                Some(elapsed),
                                Some(e.to_string()),
                            )
                            .await;
                    }
                    Err(e) => {
                        error!(item = %item_id, error = %e, "Command execution error");
                        self.backend
                            .report_status(
                                handle,
                                &item_id,
                                Outcome::Error,
                                None,
                                Some(e.to_string()),
                            )
                            .await;
                    }
                }
            }

            WorkKind::RestartRotation => {
                let result = self.restart_rotation().await;
                let outcome = Outcome::from_completed(result.is_ok());

                match result {
                    Ok(()) => info!(item = %item_id, "Rotation restarted"),
                    Err(ref e) => error!(item = %item_id, error = %e, "Failed to restart rotation"),
                }

                self.backend
                    .report_status(
                        handle,
                        &item_id,
                        outcome,
                        None,
                        result.err().map(|e| e.to_string()),
                    )
                    .await;
            }

            WorkKind::Unknown(kind) => {
                // No device I/O for work we do not understand.
                warn!(item = %item_id, kind = %kind, "Unknown command type");
                self.backend
                    .report_status(
                        handle,
                        &item_id,
                        Outcome::Failed,
                        None,
                        Some(Error::unknown_command(kind).to_string()),
                    )
                    .await;
            }
        }
    }

    /// Decodes, prepares, and uploads one image payload.
    async fn display_image(&mut self, image: Option<String>) -> Result<()> {
        let uri = image.ok_or_else(|| Error::decode("no image data in command"))?;

        // Everything that can fail without touching the device fails first.
        let encoded = imaging::decode_data_uri(&uri)?;
        let payload = imaging::prepare_for_device(
            &encoded,
            self.config.device_width,
            self.config.device_height,
        )?;

        self.ensure_link().await?;
        protocol::upload_image(
            &mut self.link,
            &payload,
            DEVICE_FILENAME,
            self.config.chunk_size,
        )
        .await
    }

    /// Resumes the device's idle carousel.
    async fn restart_rotation(&mut self) -> Result<()> {
        self.ensure_link().await?;
        protocol::start_rotation(&mut self.link)
    }

    /// Reconnects the link if a previous fault disconnected it.
    async fn ensure_link(&mut self) -> Result<()> {
        if self.link.is_open() {
            return Ok(());
        }

        warn!("Device disconnected, attempting reconnect...");
        self.link.reconnect().await?;
        self.set_port(self.link.port_name().map(str::to_string));
        Ok(())
    }
}

// ============================================================================
// DeviceClient - Reconnection & Shutdown
// ============================================================================

impl DeviceClient {
    /// Services a pending [`ClientControls::force_restart`] request.
    ///
    /// Returns whether a reconnect cycle ran. The request flag is consumed
    /// either way, so requests queued during a cycle collapse into one.
    async fn service_restart_request(&mut self) -> bool {
        if !self.restart_requested.swap(false, Ordering::SeqCst) {
            return false;
        }

        info!("Manual restart requested");
        self.reconnect_cycle().await;
        true
    }

    /// Coordinated reconnection of the link and the logical session.
    ///
    /// The link reconnect runs first and its outcome does not gate the
    /// re-registration: a fresh session against a still-missing device is
    /// more useful than neither. A failed re-registration leaves the stale
    /// handle in place and the reported state stays `Reconnecting` until a
    /// registration succeeds; the loop keeps retrying on schedule.
    async fn reconnect_cycle(&mut self) {
        warn!("Attempting coordinated reconnection...");
        self.set_state(ClientState::Reconnecting);

        if let Err(e) = self.link.reconnect().await {
            error!(error = %e, "Device reconnection failed");
        }
        self.set_port(self.link.port_name().map(str::to_string));

        match self
            .backend
            .register(&self.config.host_name, self.link.port_name())
            .await
        {
            Ok(handle) => {
                info!(device_id = %handle, "Reconnection successful");
                self.set_handle(handle);
                self.errors.reset();
                self.set_state(ClientState::Online);
            }
            Err(e) => {
                // The session may be stale; the reported state must not
                // claim online until a registration succeeds.
                error!(error = %e, "Backend re-registration failed");
            }
        }
    }

    /// Closes the link and releases the session.
    fn shutdown(&mut self) {
        info!("Shutting down...");
        self.link.close();
        self.handle = None;
        self.set_state(ClientState::Offline);
        info!("Shutdown complete");
    }
}

// ============================================================================
// DeviceClient - Status
// ============================================================================

impl DeviceClient {
    fn set_state(&self, state: ClientState) {
        self.status.lock().state = state;
    }

    fn set_port(&self, port: Option<String>) {
        self.status.lock().port = port;
    }

    fn set_handle(&mut self, handle: SessionHandle) {
        self.status.lock().device_id = Some(handle.as_str().to_string());
        self.handle = Some(handle);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};

    fn test_client() -> DeviceClient {
        let config = Config {
            api_key: "test-key".to_string(),
            // Nothing listens here; backend calls fail fast as transport
            // errors instead of hanging.
            backend_url: "http://127.0.0.1:1".to_string(),
            ..Config::default()
        };
        DeviceClient::new(config).expect("client should build")
    }

    /// A tiny valid image payload, as work items carry it.
    fn sample_data_uri() -> String {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(4, 4, |x, y| Rgb([x as u8 * 60, y as u8 * 60, 128]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode sample");
        format!("data:image/png;base64,{}", BASE64.encode(out.into_inner()))
    }

    #[test]
    fn test_new_client_is_starting_and_stopped() {
        let client = test_client();
        let controls = client.controls();

        assert!(!controls.is_running());
        assert_eq!(controls.status().state, ClientState::Starting);
        assert!(controls.status().device_id.is_none());
    }

    #[test]
    fn test_controls_stop_flips_running_flag() {
        let client = test_client();
        let controls = client.controls();

        client.running.store(true, Ordering::SeqCst);
        assert!(controls.is_running());

        controls.stop();
        assert!(!controls.is_running());
    }

    #[tokio::test]
    async fn test_poll_cycle_without_session_fails() {
        let mut client = test_client();

        let err = client.poll_cycle().await.unwrap_err();
        assert!(matches!(err, Error::Registration { .. }));
    }

    #[tokio::test]
    async fn test_poll_cycle_with_unreachable_backend_fails() {
        let mut client = test_client();
        client.set_handle(SessionHandle::new("device_test_000000"));

        let err = client.poll_cycle().await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }

    #[tokio::test]
    async fn test_display_image_rejects_missing_payload_before_device_io() {
        let mut client = test_client();

        let err = client.display_image(None).await.unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
        assert!(!client.link.is_open());
    }

    #[tokio::test]
    async fn test_display_image_rejects_malformed_uri_before_device_io() {
        let mut client = test_client();

        let err = client
            .display_image(Some("data:text/plain;base64,aGk=".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
        assert!(!client.link.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_image_requires_link_before_upload() {
        let mut client = test_client();

        let err = client
            .display_image(Some(sample_data_uri()))
            .await
            .unwrap_err();

        // Decoding succeeded; the failure came from the device pathway,
        // after a reconnect attempt on the closed link.
        assert!(err.is_link_error() || err.is_protocol_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_restart_drives_one_reconnect_cycle() {
        let mut client = test_client();
        client.set_handle(SessionHandle::new("device_test_000000"));
        let controls = client.controls();

        // Nothing pending: no cycle runs.
        assert!(!client.service_restart_request().await);

        controls.force_restart();
        assert!(client.service_restart_request().await);

        // The request is consumed, not sticky.
        assert!(!client.service_restart_request().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconnect_cycle_leaves_reconnecting_state() {
        let mut client = test_client();
        client.set_handle(SessionHandle::new("device_test_000000"));

        // Unreachable backend: re-registration fails, the stale handle stays,
        // and the reported state must not claim online.
        client.reconnect_cycle().await;

        assert_eq!(client.controls().status().state, ClientState::Reconnecting);
        assert!(client.handle.is_some());
    }

    #[test]
    fn test_shutdown_releases_session() {
        let mut client = test_client();
        client.set_handle(SessionHandle::new("device_test_000000"));

        client.shutdown();

        assert!(client.handle.is_none());
        assert_eq!(client.controls().status().state, ClientState::Offline);
    }
}
