//! Result types returned by a serialization run.
//!
//! A run returns one [`AnnotateOutput`]: the assembled Markdown, one
//! [`PictureOutcome`] per picture (in document order), and aggregated
//! [`RunStats`]. Per-picture failures live inside their outcome rather than
//! aborting the run, so callers can decide their own tolerance: ignore
//! fallbacks, log them, or fail the batch when anything fell back.

use crate::error::PictureError;
use serde::{Deserialize, Serialize};

/// Complete result of one document-serialization run.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnnotateOutput {
    /// The assembled Markdown document.
    pub markdown: String,
    /// Per-picture placement outcomes, in document order.
    pub outcomes: Vec<PictureOutcome>,
    /// Aggregated run statistics.
    pub stats: RunStats,
}

/// What happened to one picture during placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PictureOutcome {
    /// Sequential position among the document's items (0-based).
    pub index: usize,
    /// Deterministic file name (`image_{index:06}_{hash}.png`).
    pub file_name: String,
    /// Which strategy produced the final reference.
    pub placement: Placement,
    /// Set when the picture ended the run without a usable reference.
    pub error: Option<PictureError>,
}

/// The strategy that produced a picture's final reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// Written to the local image directory (local-only policy).
    Local,
    /// Uploaded to object storage.
    Uploaded,
    /// Upload failed; written to the local image directory instead.
    FellBack,
    /// No reference could be produced.
    Failed,
}

/// Aggregated statistics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Total pictures in the document.
    pub pictures: usize,
    /// Pictures uploaded to object storage.
    pub uploaded: usize,
    /// Pictures that fell back to local disk after a failed upload.
    pub fell_back: usize,
    /// Pictures written locally under the local-only policy.
    pub saved_locally: usize,
    /// Pictures that ended the run without a reference.
    pub failed: usize,
    /// Wall-clock time spent resolving placements.
    pub placement_duration_ms: u64,
    /// Wall-clock time for the whole run (placement + serialization).
    pub total_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_round_trips_through_json() {
        let output = AnnotateOutput {
            markdown: "# Doc\n".into(),
            outcomes: vec![PictureOutcome {
                index: 1,
                file_name: "image_000001_ab.png".into(),
                placement: Placement::FellBack,
                error: None,
            }],
            stats: RunStats {
                pictures: 1,
                fell_back: 1,
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&output).expect("serialize");
        let back: AnnotateOutput = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.outcomes[0].placement, Placement::FellBack);
        assert_eq!(back.stats.fell_back, 1);
    }
}
