//! Audio ingest buffer — owns the recording artifact for one utterance.
//!
//! Frames are absorbed at the network's pace into a short in-memory queue
//! and an append-only spill file, so a slow disk never stalls the socket
//! reader for long and a long utterance never lives entirely in RAM. On
//! finalize the caller gets a handle to the complete, ordered PCM byte
//! stream plus its duration at the canonical sample rate.
//!
//! Sequence numbers are accepted from whatever origin the device uses
//! (0- or 1-based): the first observed value seeds the counter. Forward
//! gaps up to the configured tolerance are treated as benign loss and
//! forward-filled; anything larger, or a regression, is fatal for the
//! utterance.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;

use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

use lapel_core::audio;
use lapel_core::error::IngestError;

/// Chunks retained in the short-term in-memory queue.
const RECENT_QUEUE_CAPACITY: usize = 32;

/// Bounds enforced while absorbing frames.
#[derive(Debug, Clone)]
pub struct BufferLimits {
    /// Smallest acceptable binary frame.
    pub min_chunk_bytes: usize,

    /// Largest acceptable binary frame.
    pub max_chunk_bytes: usize,

    /// Benign forward sequence gap (frames) tolerated with forward-fill.
    pub seq_gap_tolerance: u64,

    /// Absolute per-utterance ceiling.
    pub max_recording_bytes: u64,

    /// Disk budget remaining for this session at open time.
    pub disk_budget_bytes: u64,

    /// Acknowledge every Nth accepted chunk.
    pub ack_every_n_chunks: u64,
}

/// Result of one accepted append.
#[derive(Debug, Clone, Copy)]
pub struct AppendOutcome {
    /// The accepted sequence number.
    pub seq: u64,

    /// Cumulative ack to emit, if this chunk hit the ack cadence.
    pub ack: Option<u64>,
}

/// The complete utterance after `finalize`.
#[derive(Debug)]
pub struct FinalizedRecording {
    /// Spill file holding the full ordered PCM stream.
    pub spill_path: PathBuf,

    /// Total accepted bytes (equals the sum of accepted `len_bytes`).
    pub total_bytes: u64,

    /// Number of accepted chunks.
    pub accepted_chunks: u64,

    /// Highest accepted sequence number, if any chunk arrived.
    pub last_seq: Option<u64>,

    /// Duration at the canonical sample rate.
    pub duration: std::time::Duration,
}

/// An in-progress utterance.
pub struct AudioBuffer {
    spill_path: PathBuf,
    writer: BufWriter<File>,
    limits: BufferLimits,
    /// Next expected sequence number; `None` until the first frame seeds it.
    expected_seq: Option<u64>,
    accepted_chunks: u64,
    total_bytes: u64,
    first_frame_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    recent: VecDeque<Bytes>,
}

impl AudioBuffer {
    /// Allocate the spill file under `dir` and start a fresh utterance.
    pub async fn open(dir: &Path, limits: BufferLimits) -> Result<Self, IngestError> {
        fs::create_dir_all(dir).await?;
        let spill_path = dir.join(format!("utterance-{}.pcm", Uuid::new_v4()));
        let file = File::create(&spill_path).await?;

        Ok(Self {
            spill_path,
            writer: BufWriter::new(file),
            limits,
            expected_seq: None,
            accepted_chunks: 0,
            total_bytes: 0,
            first_frame_at: None,
            last_frame_at: None,
            recent: VecDeque::with_capacity(RECENT_QUEUE_CAPACITY),
        })
    }

    /// Absorb one binary frame.
    ///
    /// Any error is fatal for the utterance; the caller aborts the buffer
    /// and routes the failure through the recovery policy.
    pub async fn append(&mut self, seq: u64, chunk: Bytes) -> Result<AppendOutcome, IngestError> {
        let len = chunk.len();
        if len < self.limits.min_chunk_bytes {
            return Err(IngestError::FrameProtocolViolation {
                detail: format!(
                    "{len}-byte chunk is below the {}-byte minimum",
                    self.limits.min_chunk_bytes
                ),
            });
        }
        if len > self.limits.max_chunk_bytes {
            return Err(IngestError::FrameProtocolViolation {
                detail: format!(
                    "{len}-byte chunk exceeds the {}-byte maximum",
                    self.limits.max_chunk_bytes
                ),
            });
        }

        match self.expected_seq {
            // First frame seeds the counter; 0- and 1-based devices both work.
            None => {}
            Some(expected) => {
                if seq + 1 < expected {
                    return Err(IngestError::SequenceGap {
                        expected,
                        got: seq,
                    });
                }
                let gap = seq.saturating_sub(expected);
                if gap > self.limits.seq_gap_tolerance {
                    return Err(IngestError::SequenceGap {
                        expected,
                        got: seq,
                    });
                }
                if gap > 0 {
                    tracing::debug!(expected, seq, gap, "forward-filling benign sequence gap");
                }
            }
        }

        let new_total = self.total_bytes + len as u64;
        if new_total > self.limits.max_recording_bytes {
            return Err(IngestError::MaxRecordingExceeded {
                limit_bytes: self.limits.max_recording_bytes,
            });
        }
        if new_total > self.limits.disk_budget_bytes {
            return Err(IngestError::DiskQuotaExceeded {
                limit_bytes: self.limits.disk_budget_bytes,
            });
        }

        self.writer.write_all(&chunk).await?;

        let now = Instant::now();
        self.first_frame_at.get_or_insert(now);
        self.last_frame_at = Some(now);
        self.expected_seq = Some(seq + 1);
        self.total_bytes = new_total;
        self.accepted_chunks += 1;

        if self.recent.len() == RECENT_QUEUE_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(chunk);

        let ack =
            (self.accepted_chunks % self.limits.ack_every_n_chunks == 0).then_some(seq);
        Ok(AppendOutcome { seq, ack })
    }

    /// Total bytes accepted so far.
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Highest accepted sequence number so far.
    #[must_use]
    pub fn last_seq(&self) -> Option<u64> {
        self.expected_seq.map(|next| next - 1)
    }

    /// Freeze the utterance: flush, close the spill file, and hand back the
    /// complete stream.
    pub async fn finalize(mut self, sample_rate: u32) -> Result<FinalizedRecording, IngestError> {
        self.writer.flush().await?;
        let last_seq = self.last_seq();

        let wall_span = match (self.first_frame_at, self.last_frame_at) {
            (Some(first), Some(last)) => last.duration_since(first),
            _ => std::time::Duration::ZERO,
        };
        tracing::debug!(
            bytes = self.total_bytes,
            chunks = self.accepted_chunks,
            wall_span_ms = wall_span.as_millis() as u64,
            "utterance finalized"
        );

        Ok(FinalizedRecording {
            spill_path: self.spill_path,
            total_bytes: self.total_bytes,
            accepted_chunks: self.accepted_chunks,
            last_seq,
            duration: audio::duration_from_bytes(self.total_bytes, sample_rate),
        })
    }

    /// Drop the utterance: delete the spill file and release buffers.
    ///
    /// Returns the number of bytes that had been spilled, for accounting.
    pub async fn abort(mut self) -> u64 {
        self.recent.clear();
        let _ = self.writer.flush().await;
        drop(self.writer);
        if let Err(err) = fs::remove_file(&self.spill_path).await {
            tracing::warn!(
                path = %self.spill_path.display(),
                error = %err,
                "failed to remove aborted spill file"
            );
        }
        self.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> BufferLimits {
        BufferLimits {
            min_chunk_bytes: 32,
            max_chunk_bytes: 512 * 1024,
            seq_gap_tolerance: 10,
            max_recording_bytes: 50 * 1024 * 1024,
            disk_budget_bytes: 100 * 1024 * 1024,
            ack_every_n_chunks: 4,
        }
    }

    fn chunk(len: usize) -> Bytes {
        Bytes::from(vec![0u8; len])
    }

    #[tokio::test]
    async fn accepts_ordered_frames_and_acks_every_fourth() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = AudioBuffer::open(dir.path(), limits()).await.unwrap();

        for seq in 0..3u64 {
            let outcome = buffer.append(seq, chunk(16_000)).await.unwrap();
            assert!(outcome.ack.is_none(), "no ack before the cadence");
        }
        let outcome = buffer.append(3, chunk(16_000)).await.unwrap();
        assert_eq!(outcome.ack, Some(3));

        let finalized = buffer.finalize(16_000).await.unwrap();
        assert_eq!(finalized.total_bytes, 64_000);
        assert_eq!(finalized.accepted_chunks, 4);
        assert_eq!(finalized.last_seq, Some(3));
        assert_eq!(finalized.duration, std::time::Duration::from_secs(2));
    }

    #[tokio::test]
    async fn first_observed_seq_may_be_one_based() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = AudioBuffer::open(dir.path(), limits()).await.unwrap();

        buffer.append(1, chunk(32)).await.unwrap();
        buffer.append(2, chunk(32)).await.unwrap();
        assert_eq!(buffer.last_seq(), Some(2));
    }

    #[tokio::test]
    async fn gap_of_exactly_tolerance_forward_fills() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = AudioBuffer::open(dir.path(), limits()).await.unwrap();

        buffer.append(0, chunk(32)).await.unwrap();
        // expected is now 1; a jump to 11 is a gap of exactly 10.
        buffer.append(11, chunk(32)).await.unwrap();
        assert_eq!(buffer.last_seq(), Some(11));
    }

    #[tokio::test]
    async fn gap_past_tolerance_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = AudioBuffer::open(dir.path(), limits()).await.unwrap();

        buffer.append(0, chunk(32)).await.unwrap();
        let err = buffer.append(12, chunk(32)).await.unwrap_err();
        assert!(matches!(err, IngestError::SequenceGap { expected: 1, got: 12 }));
    }

    #[tokio::test]
    async fn regressing_seq_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = AudioBuffer::open(dir.path(), limits()).await.unwrap();

        buffer.append(5, chunk(32)).await.unwrap();
        buffer.append(6, chunk(32)).await.unwrap();
        let err = buffer.append(3, chunk(32)).await.unwrap_err();
        assert!(matches!(err, IngestError::SequenceGap { .. }));
    }

    #[tokio::test]
    async fn duplicate_seq_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = AudioBuffer::open(dir.path(), limits()).await.unwrap();

        buffer.append(0, chunk(32)).await.unwrap();
        // Non-decreasing: a retransmit of the last frame is accepted.
        buffer.append(0, chunk(32)).await.unwrap();
        assert_eq!(buffer.total_bytes(), 64);
    }

    #[tokio::test]
    async fn rejects_31_byte_chunk_accepts_32() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = AudioBuffer::open(dir.path(), limits()).await.unwrap();

        let err = buffer.append(0, chunk(31)).await.unwrap_err();
        assert!(matches!(err, IngestError::FrameProtocolViolation { .. }));

        buffer.append(0, chunk(32)).await.unwrap();
    }

    #[tokio::test]
    async fn disk_budget_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut bounds = limits();
        bounds.disk_budget_bytes = 100;
        let mut buffer = AudioBuffer::open(dir.path(), bounds).await.unwrap();

        buffer.append(0, chunk(64)).await.unwrap();
        let err = buffer.append(1, chunk(64)).await.unwrap_err();
        assert!(matches!(err, IngestError::DiskQuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn recording_ceiling_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut bounds = limits();
        bounds.max_recording_bytes = 100;
        let mut buffer = AudioBuffer::open(dir.path(), bounds).await.unwrap();

        buffer.append(0, chunk(64)).await.unwrap();
        let err = buffer.append(1, chunk(64)).await.unwrap_err();
        assert!(matches!(err, IngestError::MaxRecordingExceeded { .. }));
    }

    #[tokio::test]
    async fn abort_removes_the_spill_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = AudioBuffer::open(dir.path(), limits()).await.unwrap();
        buffer.append(0, chunk(64)).await.unwrap();

        let spill = buffer.spill_path.clone();
        let freed = buffer.abort().await;

        assert_eq!(freed, 64);
        assert!(!spill.exists());
    }

    #[tokio::test]
    async fn finalized_bytes_equal_sum_of_accepted_lens() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = AudioBuffer::open(dir.path(), limits()).await.unwrap();

        let lens = [16_000usize, 12_000, 16_000, 400];
        for (seq, len) in lens.iter().enumerate() {
            buffer.append(seq as u64, chunk(*len)).await.unwrap();
        }

        let finalized = buffer.finalize(16_000).await.unwrap();
        assert_eq!(
            finalized.total_bytes,
            lens.iter().map(|l| *l as u64).sum::<u64>()
        );
        let on_disk = std::fs::metadata(&finalized.spill_path).unwrap().len();
        assert_eq!(on_disk, finalized.total_bytes);
    }
}
