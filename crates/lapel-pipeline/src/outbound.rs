//! Outbound channel types.
//!
//! Everything the server sends rides one bounded mpsc per channel binding.
//! The writer task drains it in order, which is what guarantees that a
//! `tts_chunk_meta` frame is immediately followed by its binary chunk with
//! nothing interleaved: the controller is the only sender while a reply is
//! streaming, and the queue preserves order. The bound provides the
//! backpressure — chunk emission awaits queue space, which the writer only
//! frees after the previous frame has gone out on the transport.

use bytes::Bytes;
use tokio::sync::mpsc;

use lapel_core::protocol::ServerFrame;

/// Capacity of the per-channel outbound queue.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 32;

/// One outbound datum: a typed text frame or an opaque binary frame.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(ServerFrame),
    Binary(Bytes),
}

/// Sending half of the outbound queue, held by the session controller.
pub type OutboundSender = mpsc::Sender<Outbound>;

/// Receiving half, owned by the channel writer task.
pub type OutboundReceiver = mpsc::Receiver<Outbound>;
