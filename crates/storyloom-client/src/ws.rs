//! WebSocket transport — one JSON `StreamEvent` per text message.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::event::ingest_frame;
use crate::transport::{EventStream, TurnRequest};

/// Connect, send the turn request, and return the reply event stream.
///
/// The read loop runs in a spawned task so pings get answered while the
/// consumer is between polls; the task ends when the server closes or the
/// receiver is dropped (cancel path).
pub async fn open_turn_stream(url: &str, request: &TurnRequest) -> anyhow::Result<EventStream> {
    debug!(%url, "Connecting WebSocket");
    let (ws, _) = tokio_tungstenite::connect_async(url).await?;
    let (mut write, mut read) = ws.split();

    let payload = serde_json::to_string(request)?;
    write.send(Message::Text(payload.into())).await?;

    let (tx, rx) = mpsc::unbounded_channel::<anyhow::Result<crate::event::StreamEvent>>();

    tokio::spawn(async move {
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if let Some(event) = ingest_frame(text.as_str()) {
                        if tx.send(Ok(event)).is_err() {
                            // Consumer gone — cancelled turn.
                            break;
                        }
                    }
                }
                Ok(Message::Ping(data)) => {
                    if write.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket closed by server");
                    break;
                }
                Ok(Message::Binary(_)) => {
                    warn!("binary WebSocket frame ignored");
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = tx.send(Err(anyhow::anyhow!("WebSocket error: {e}")));
                    break;
                }
            }
        }
    });

    Ok(Box::pin(UnboundedReceiverStream::new(rx)))
}
