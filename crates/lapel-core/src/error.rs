//! Error taxonomy shared across the orchestrator.
//!
//! Reason strings emitted to the client are stable snake_case codes; the
//! client renders them, it never sees stack detail.

use std::time::Duration;

/// Errors raised while ingesting an utterance.
///
/// All of these are fatal for the current recording. The controller decides
/// whether the interaction recovers via re-record or escalates to user
/// intervention.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Sequence number jumped past the configured tolerance, or went backwards.
    #[error("sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    /// The spill file would push the session past its disk quota.
    #[error("session disk quota of {limit_bytes} bytes exceeded")]
    DiskQuotaExceeded { limit_bytes: u64 },

    /// The utterance passed the absolute recording ceiling.
    #[error("recording exceeded the {limit_bytes} byte ceiling")]
    MaxRecordingExceeded { limit_bytes: u64 },

    /// Binary framing contract broken (length mismatch, undersized or
    /// oversized chunk, binary without meta).
    #[error("frame protocol violation: {detail}")]
    FrameProtocolViolation { detail: String },

    /// No frame arrived within the chunk-arrival window.
    #[error("no audio frame within {0:?}")]
    ChunkArrivalTimeout(Duration),

    /// Spill file I/O failed.
    #[error("spill I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Stable reason code surfaced to the client.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SequenceGap { .. } => "sequence_gap",
            Self::DiskQuotaExceeded { .. } => "disk_quota_exceeded",
            Self::MaxRecordingExceeded { .. } => "max_recording_exceeded",
            Self::FrameProtocolViolation { .. } => "frame_protocol_violation",
            Self::ChunkArrivalTimeout(_) => "chunk_arrival_timeout",
            Self::Io(_) => "ingest_io_failed",
        }
    }
}

/// Verdict of the recognition quality gate for one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityVerdict {
    /// Usable transcript.
    Ok,
    /// The recognizer produced no text.
    Empty,
    /// Confidence fell below the configured threshold.
    LowConfidence,
    /// Shorter than the minimum record duration.
    TooShort,
    /// RMS energy below the audible floor.
    TooQuiet,
    /// Clipped beyond usability.
    TooLoud,
}

impl QualityVerdict {
    /// Reason code for `request_rerecord`, or `None` for a passing verdict.
    #[must_use]
    pub const fn reason(self) -> Option<&'static str> {
        match self {
            Self::Ok => None,
            Self::Empty => Some("empty_transcript"),
            Self::LowConfidence => Some("low_confidence"),
            Self::TooShort => Some("too_short"),
            Self::TooQuiet => Some("too_quiet"),
            Self::TooLoud => Some("too_loud"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_codes_are_stable() {
        assert_eq!(
            IngestError::SequenceGap {
                expected: 4,
                got: 20
            }
            .code(),
            "sequence_gap"
        );
        assert_eq!(
            IngestError::DiskQuotaExceeded { limit_bytes: 1 }.code(),
            "disk_quota_exceeded"
        );
        assert_eq!(
            IngestError::FrameProtocolViolation {
                detail: "x".into()
            }
            .code(),
            "frame_protocol_violation"
        );
    }

    #[test]
    fn ok_verdict_has_no_reason() {
        assert!(QualityVerdict::Ok.reason().is_none());
        assert_eq!(QualityVerdict::TooQuiet.reason(), Some("too_quiet"));
    }
}
