//! Framing helpers shared by the server accept loop and the client's
//! per-peer connection actor: one JSON-over-WebSocket-text frame per
//! `PeerFrame` (§6 "Peer wire protocol").

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use pos_schemas::envelope::PeerFrame;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub async fn send_frame<S>(ws: &mut WebSocketStream<S>, frame: &PeerFrame) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let text = serde_json::to_string(frame).context("encoding peer frame")?;
    ws.send(Message::Text(text))
        .await
        .context("sending peer frame")?;
    Ok(())
}

/// The result of reading one logical frame off the wire.
///
/// A transport failure (socket reset, handshake violation) still surfaces
/// through `recv_frame`'s `Result::Err` and is propagated with `?` — there's
/// nothing to reply to. A frame that arrives intact but fails to parse, or
/// one that exceeds the configured size cap, is an application-level
/// condition the caller replies to instead.
pub enum RecvOutcome {
    /// A frame decoded successfully.
    Frame(PeerFrame),
    /// The frame arrived but was not valid JSON, or not a `PeerFrame` shape.
    /// The connection stays open; the caller replies with an error and keeps
    /// reading.
    Malformed(String),
    /// The frame's encoded size exceeded the configured cap. The caller
    /// replies with an error and then closes the connection.
    Oversize(usize),
    /// The connection was closed cleanly (EOF or a close frame).
    Closed,
}

/// Reads the next data frame, skipping ping/pong/close control frames.
/// `max_message_bytes` bounds the size of a text frame's UTF-8 encoding;
/// anything larger is reported as `RecvOutcome::Oversize` without attempting
/// to parse it.
pub async fn recv_frame<S>(
    ws: &mut WebSocketStream<S>,
    max_message_bytes: usize,
) -> Result<RecvOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let msg = match ws.next().await {
            None => return Ok(RecvOutcome::Closed),
            Some(msg) => msg.context("reading peer frame")?,
        };
        match msg {
            Message::Text(text) => {
                if text.len() > max_message_bytes {
                    return Ok(RecvOutcome::Oversize(text.len()));
                }
                return Ok(match serde_json::from_str(&text) {
                    Ok(frame) => RecvOutcome::Frame(frame),
                    Err(e) => RecvOutcome::Malformed(e.to_string()),
                });
            }
            Message::Close(_) => return Ok(RecvOutcome::Closed),
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {
                continue;
            }
        }
    }
}
