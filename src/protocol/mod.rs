//! Chunked upload protocol for the display device.
//!
//! The device speaks newline-terminated ASCII control lines with raw binary
//! chunk payloads in between, all over the same byte-stream link:
//!
//! 1. `sending**<name>**<size>**<chunk>` announces an upload; the device
//!    answers with lines terminated by `exit`, and must say `start`.
//! 2. Each chunk is written raw and must be answered with a line containing
//!    `ok` before the next chunk is sent (stop-and-wait, not windowed).
//! 3. `stoprotation` switches the device from its idle carousel to the
//!    just-uploaded image; `startrotation` resumes the carousel.
//!
//! There is no per-chunk checksum or retransmission; the recovery granularity
//! is the whole handshake, which the session controller restarts by retrying
//! the dispatch.

// ============================================================================
// Modules
// ============================================================================

mod session;

pub use session::TransferSession;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::link::Link;

// ============================================================================
// Constants
// ============================================================================

/// Maximum response reads during the upload handshake.
const HANDSHAKE_READS: usize = 100;

/// Spacing between handshake response reads.
const HANDSHAKE_POLL: Duration = Duration::from_millis(100);

/// Maximum acknowledgment polls per chunk.
const ACK_POLLS: usize = 50;

/// Spacing between acknowledgment polls.
const ACK_POLL: Duration = Duration::from_millis(100);

/// Settle delay after `stoprotation` before the image is considered shown.
const DISPLAY_SETTLE: Duration = Duration::from_millis(500);

/// Progress is logged every this many chunks.
const PROGRESS_EVERY: usize = 10;

/// Line that terminates a multi-line device response.
const RESPONSE_TERMINATOR: &str = "exit";

// ============================================================================
// Control Lines
// ============================================================================

/// Builds the upload announcement line.
#[inline]
#[must_use]
pub fn upload_header(filename: &str, total_bytes: usize, chunk_size: usize) -> String {
    format!("sending**{filename}**{total_bytes}**{chunk_size}")
}

// ============================================================================
// Upload
// ============================================================================

/// Pushes one fully-prepared image payload to the device and leaves it
/// displayed.
///
/// Runs the announcement handshake, streams the payload chunk by chunk with
/// per-chunk acknowledgment, then stops the idle rotation so the device
/// shows the new image.
///
/// # Errors
///
/// - [`Error::Config`] if `chunk_size` is zero
/// - [`Error::Protocol`] if the device does not confirm the upload or a
///   chunk goes unacknowledged; partial transfers are never resumed
/// - [`Error::Link`] on any I/O fault; the link is disconnected afterwards
pub async fn upload_image<L: Link>(
    link: &mut L,
    payload: &[u8],
    filename: &str,
    chunk_size: usize,
) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::config("chunk size must be at least 1 byte"));
    }

    let mut session = TransferSession::new(payload.len(), chunk_size);

    info!(
        filename,
        bytes = payload.len(),
        chunks = session.total_chunks(),
        "Uploading image to device"
    );

    // Announce the upload and wait for the device to confirm.
    let header = upload_header(filename, payload.len(), chunk_size);
    let response = send_command_await_response(link, &header)?;
    debug!(response = %truncate(&response, 100), "Device handshake response");

    if !response.to_lowercase().contains("start") {
        return Err(Error::protocol("upload not confirmed by device"));
    }

    for (index, chunk) in payload.chunks(chunk_size).enumerate() {
        let number = index + 1;

        // Stale output from the device must not be mistaken for this
        // chunk's acknowledgment. The link may legitimately have nothing
        // buffered, so a failed clear is ignored.
        let _ = link.clear_input();

        link.write_all(chunk)?;
        link.flush()?;
        session.record_sent();

        wait_for_ack(link, number, session.total_chunks())?;
        session.record_acked();

        if number % PROGRESS_EVERY == 0 || number == session.total_chunks() {
            info!(sent = number, total = session.total_chunks(), "Upload progress");
        }
    }

    // Switch the device from its idle carousel to the uploaded image.
    send_command(link, "stoprotation")?;
    sleep(DISPLAY_SETTLE).await;

    info!(%session, "Upload completed");
    Ok(())
}

/// Resumes the device's idle image carousel.
///
/// Fire-and-forget; no response is awaited.
///
/// # Errors
///
/// Returns [`Error::Link`] if the command cannot be written.
pub fn start_rotation<L: Link>(link: &mut L) -> Result<()> {
    info!("Starting rotation");
    send_command(link, "startrotation")
}

// ============================================================================
// Command Helpers
// ============================================================================

/// Writes a newline-terminated control line without awaiting a response.
fn send_command<L: Link>(link: &mut L, command: &str) -> Result<()> {
    link.write_all(command.as_bytes())?;
    link.write_all(b"\n")?;
    link.flush()
}

/// Writes a control line and collects the device's multi-line response.
///
/// Reads until a line case-insensitively equal to `exit` or until the fixed
/// read budget is exhausted. Non-empty lines before the terminator are
/// concatenated into the response text.
fn send_command_await_response<L: Link>(link: &mut L, command: &str) -> Result<String> {
    let _ = link.clear_input();
    send_command(link, command)?;

    let mut response = String::new();

    for _ in 0..HANDSHAKE_READS {
        let line = link.read_line(HANDSHAKE_POLL)?;

        if line.is_empty() {
            continue;
        }

        let terminated = line.eq_ignore_ascii_case(RESPONSE_TERMINATOR);
        if !terminated {
            response.push_str(&line);
            response.push('\n');
        }
        if terminated {
            break;
        }
    }

    Ok(response.trim().to_string())
}

/// Polls for a chunk acknowledgment within the fixed budget.
///
/// A non-empty line containing `ok` (case-insensitive) is the ack. When the
/// budget runs out the whole transfer is aborted; the caller restarts the
/// handshake rather than retrying mid-stream.
fn wait_for_ack<L: Link>(link: &mut L, chunk: usize, total: usize) -> Result<()> {
    for _ in 0..ACK_POLLS {
        let line = link.read_line(ACK_POLL)?;

        if !line.is_empty() && line.to_lowercase().contains("ok") {
            return Ok(());
        }
    }

    Err(Error::protocol(format!(
        "chunk {chunk}/{total} unacknowledged"
    )))
}

/// Clips a response string for logging.
fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

// ============================================================================
// Tests
// ============================================================================
