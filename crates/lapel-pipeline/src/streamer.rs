//! Playback streamer — frames a reply artifact into wire chunks.
//!
//! Runs on the controller task, which is what keeps the invariant that
//! each `tts_chunk_meta` is immediately followed by its binary frame with
//! nothing interleaved. Backpressure comes from the bounded outbound
//! queue: a send only completes once the writer has drained earlier
//! frames to the transport.

use bytes::Bytes;

use lapel_core::protocol::ServerFrame;

use crate::outbound::{Outbound, OutboundSender};
use crate::synthesizer::ReplyArtifact;

/// Errors while streaming a reply. There is no chunk-level retransmit:
/// any failure aborts the reply.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("artifact read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel closed while streaming")]
    ChannelClosed,
}

/// Streams artifacts chunk by chunk over the outbound queue.
pub struct PlaybackStreamer {
    chunk_size: usize,
}

impl PlaybackStreamer {
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(2),
        }
    }

    /// Send the artifact as `tts_chunk_meta` + binary pairs, then `tts_done`.
    ///
    /// Returns the number of chunks sent.
    pub async fn stream(
        &self,
        artifact: &ReplyArtifact,
        outbound: &OutboundSender,
    ) -> Result<u64, StreamError> {
        let bytes = tokio::fs::read(&artifact.path).await?;
        let mut seq = 0u64;

        for chunk in bytes.chunks(self.chunk_size) {
            outbound
                .send(Outbound::Frame(ServerFrame::TtsChunkMeta {
                    seq,
                    len_bytes: chunk.len() as u64,
                }))
                .await
                .map_err(|_| StreamError::ChannelClosed)?;
            outbound
                .send(Outbound::Binary(Bytes::copy_from_slice(chunk)))
                .await
                .map_err(|_| StreamError::ChannelClosed)?;
            seq += 1;
        }

        outbound
            .send(Outbound::Frame(ServerFrame::TtsDone))
            .await
            .map_err(|_| StreamError::ChannelClosed)?;

        tracing::debug!(chunks = seq, bytes = bytes.len(), "reply streamed");
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lapel_core::protocol::AudioFormat;
    use tokio::sync::mpsc;

    fn artifact_with_bytes(dir: &std::path::Path, len: usize) -> ReplyArtifact {
        let path = dir.join("reply.pcm");
        std::fs::write(&path, vec![7u8; len]).unwrap();
        ReplyArtifact {
            path,
            size_bytes: len as u64,
            duration_ms: 0,
            sample_rate: 16_000,
            format: AudioFormat::Pcm,
        }
    }

    #[tokio::test]
    async fn meta_is_always_followed_by_matching_binary() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = artifact_with_bytes(dir.path(), 40_000);
        let streamer = PlaybackStreamer::new(16_000);
        let (tx, mut rx) = mpsc::channel(64);

        let chunks = streamer.stream(&artifact, &tx).await.unwrap();
        assert_eq!(chunks, 3);
        drop(tx);

        let mut expected_seq = 0u64;
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Frame(ServerFrame::TtsChunkMeta { seq, len_bytes }) => {
                    assert_eq!(seq, expected_seq);
                    let next = rx.recv().await.expect("binary after meta");
                    match next {
                        Outbound::Binary(bytes) => {
                            assert_eq!(bytes.len() as u64, len_bytes);
                        }
                        other => panic!("expected binary after meta, got {other:?}"),
                    }
                    expected_seq += 1;
                }
                Outbound::Frame(ServerFrame::TtsDone) => {
                    assert_eq!(expected_seq, 3);
                    assert!(rx.recv().await.is_none());
                    return;
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
        panic!("tts_done never arrived");
    }

    #[tokio::test]
    async fn dropped_receiver_aborts_the_reply() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = artifact_with_bytes(dir.path(), 40_000);
        let streamer = PlaybackStreamer::new(16_000);
        let (tx, rx) = mpsc::channel(64);
        drop(rx);

        let err = streamer.stream(&artifact, &tx).await.unwrap_err();
        assert!(matches!(err, StreamError::ChannelClosed));
    }
}
