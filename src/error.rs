//! Error types for the mdweave library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`MdWeaveError`] — **Fatal**: the run cannot proceed at all (invalid
//!   configuration, relay cannot bind its port, upstream provider not
//!   configured, output file unwritable). Returned as `Err(MdWeaveError)`
//!   from the top-level `process*` functions and from relay start-up.
//!
//! * [`PictureError`] — **Non-fatal**: a single picture failed (encode
//!   glitch, local save after an upload fallback also failed) but every
//!   other picture is fine. Stored inside
//!   [`crate::output::PictureOutcome`] so callers can inspect partial
//!   success rather than losing the whole document to one bad image.
//!
//! Upload failures are deliberately *not* in either taxonomy: the placement
//! resolver falls back to local disk, so an upload failure only becomes a
//! [`PictureError`] when the fallback itself fails too.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the mdweave library.
///
/// Picture-level failures use [`PictureError`] and are stored in
/// [`crate::output::PictureOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum MdWeaveError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Remote placement requested but a required storage value is missing.
    #[error(
        "Object storage is not configured: missing {missing}\n\
         Set OSS_ENDPOINT, OSS_ACCESS_KEY_ID, OSS_ACCESS_KEY_SECRET, and OSS_BUCKET_NAME."
    )]
    StorageNotConfigured { missing: String },

    // ── Relay errors ──────────────────────────────────────────────────────
    /// The relay could not bind its listener; the run that depends on it
    /// must be aborted.
    #[error("Relay failed to bind {addr}: {source}")]
    RelayBindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The upstream completion provider is not initialised (missing API key
    /// etc.). Raised at relay start-up, before serving begins.
    #[error("Completion provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// `start()` called while the relay is not stopped, or `stop()` while
    /// it is not serving.
    #[error("Relay is {state}; expected {expected}")]
    RelayStateInvalid {
        state: &'static str,
        expected: &'static str,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single picture.
///
/// The overall run continues past any of these; the affected picture keeps
/// whatever reference it had (possibly none) and every other picture is
/// processed normally.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PictureError {
    /// PNG encoding of the picture content failed.
    #[error("Picture {index}: PNG encoding failed: {detail}")]
    EncodeFailed { index: usize, detail: String },

    /// Writing the picture file to the local image directory failed.
    ///
    /// When the placement policy was remote-with-fallback this means both
    /// the upload and the fallback failed; `upload_detail` carries the
    /// original upload error in that case.
    #[error("Picture {index}: local save to '{path}' failed: {detail}")]
    SaveFailed {
        index: usize,
        path: PathBuf,
        detail: String,
        upload_detail: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_not_configured_names_missing_value() {
        let e = MdWeaveError::StorageNotConfigured {
            missing: "OSS_BUCKET_NAME".into(),
        };
        assert!(e.to_string().contains("OSS_BUCKET_NAME"));
    }

    #[test]
    fn relay_state_display() {
        let e = MdWeaveError::RelayStateInvalid {
            state: "serving",
            expected: "stopped",
        };
        let msg = e.to_string();
        assert!(msg.contains("serving"), "got: {msg}");
        assert!(msg.contains("stopped"), "got: {msg}");
    }

    #[test]
    fn save_failed_carries_upload_detail() {
        let e = PictureError::SaveFailed {
            index: 4,
            path: PathBuf::from("/out/images/image_000004_ab.png"),
            detail: "read-only file system".into(),
            upload_detail: Some("HTTP 403".into()),
        };
        assert!(e.to_string().contains("Picture 4"));
    }
}
