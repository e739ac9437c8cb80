//! WebSocket attach handler and the per-channel task pair.
//!
//! `GET /ws?session=<id>&token=<t>` authenticates and reserves the session
//! *before* the upgrade — a conflicting or unauthenticated attach is
//! refused as plain HTTP. After the upgrade two tasks bridge the socket to
//! the controller:
//!
//! * **Reader** — decodes text frames, drops malformed ones, forwards
//!   typed inputs and binary frames to the controller's input queue in
//!   receive order.
//! * **Writer** — drains the bounded outbound queue to the socket,
//!   serialized, which preserves the meta-then-binary pairing of reply
//!   chunks end to end.
//!
//! Whichever task finishes first aborts the other; the registry is then
//! told the channel detached so the controller can start its grace timer.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use lapel_core::protocol::{decode_client_frame, encode_server_frame};
use lapel_pipeline::controller::SessionInput;
use lapel_pipeline::outbound::{Outbound, OUTBOUND_CHANNEL_CAPACITY};
use lapel_pipeline::registry::Attachment;

use crate::auth::authorized;
use crate::error::HttpError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AttachQuery {
    pub session: Option<String>,
    pub token: Option<String>,
}

/// `GET /ws` — authenticate, admit, then upgrade.
pub async fn attach(
    State(ctx): State<AppState>,
    Query(query): Query<AttachQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !authorized(&ctx.settings, &headers, query.token.as_deref()) {
        tracing::warn!("channel attach refused: bad or missing token");
        return HttpError::Unauthorized.into_response();
    }
    let Some(session_id) = query.session else {
        return HttpError::BadRequest("missing session parameter".to_string()).into_response();
    };

    match ctx.registry.attach(&session_id).await {
        Ok(attachment) => ws.on_upgrade(move |socket| {
            run_channel(socket, ctx, session_id, attachment)
        }),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn run_channel(
    socket: WebSocket,
    ctx: AppState,
    session_id: String,
    attachment: Attachment,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
    if attachment
        .input_tx
        .send(SessionInput::Attached {
            outbound: outbound_tx,
            resumed: attachment.resumed,
        })
        .await
        .is_err()
    {
        tracing::warn!(session = %session_id, "controller gone before channel start");
        return;
    }

    tracing::info!(session = %session_id, resumed = attachment.resumed, "channel bound");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // ── Writer: outbound queue → socket, in order ────────────────────
    let writer_session = session_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            let message = match outbound {
                Outbound::Frame(frame) => match encode_server_frame(&frame) {
                    Ok(json) => Message::Text(json.into()),
                    Err(err) => {
                        tracing::error!(session = %writer_session, error = %err, "frame encode failed");
                        continue;
                    }
                },
                Outbound::Binary(bytes) => Message::Binary(bytes),
            };
            if ws_sender.send(message).await.is_err() {
                break;
            }
        }
    });

    // ── Reader: socket → typed inputs, in receive order ──────────────
    let input_tx = attachment.input_tx.clone();
    let reader_session = session_id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let Some(envelope) = decode_client_frame(text.as_str()) else {
                        continue;
                    };
                    if envelope.session != reader_session {
                        tracing::warn!(
                            bound = %reader_session,
                            presented = %envelope.session,
                            "frame for a different session dropped"
                        );
                        continue;
                    }
                    if input_tx
                        .send(SessionInput::Frame(envelope.message))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(Message::Binary(bytes)) => {
                    if input_tx.send(SessionInput::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                // Graceful close or transport error ends the channel.
                Ok(Message::Close(_)) | Err(_) => break,
                // Ping/pong are answered by the websocket layer.
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    ctx.registry.mark_detached(&session_id).await;
    tracing::info!(session = %session_id, "channel detached");
}
