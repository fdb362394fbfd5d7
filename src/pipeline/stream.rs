use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

use crate::config::DeepgramConfig;

/// A recognition result from the streaming transcriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsrEvent {
    /// Partial hypothesis; the caller is still speaking.
    Interim(String),
    /// Finalized fragment; safe to accumulate into the turn.
    Final(String),
}

/// Streaming transcription channel.
///
/// Owns the upstream WebSocket in a spawned driver task: caller audio goes
/// up through `send_audio`, recognition results come back as [`AsrEvent`]s
/// on the channel given to [`AsrStream::connect`]. All events are delivered
/// over that channel; nothing runs on the socket task but I/O and parsing.
pub struct AsrStream {
    audio_tx: mpsc::Sender<Bytes>,
    shutdown: CancellationToken,
}

impl AsrStream {
    /// Connect to the transcriber and start the driver task.
    pub async fn connect(
        config: &DeepgramConfig,
        events: mpsc::Sender<AsrEvent>,
    ) -> Result<Self, AsrStreamError> {
        let url = format!(
            "wss://api.deepgram.com/v1/listen?model={}&interim_results=true&smart_format=true\
             &encoding=linear16&sample_rate=16000&channels=1&endpointing=300",
            config.model
        );

        let mut request = url
            .into_client_request()
            .map_err(|e| AsrStreamError::Connect(e.to_string()))?;
        let auth = format!("Token {}", config.api_key)
            .parse()
            .map_err(|_| AsrStreamError::Connect("bad api key header".to_string()))?;
        request.headers_mut().insert("Authorization", auth);

        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| AsrStreamError::Connect(e.to_string()))?;
        tracing::info!(model = %config.model, "Streaming transcriber connected");

        let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(64);
        let shutdown = CancellationToken::new();
        tokio::spawn(drive(ws, audio_rx, events, shutdown.clone()));

        Ok(Self { audio_tx, shutdown })
    }

    /// Forward one chunk of caller audio upstream. Dropped silently if the
    /// driver has already shut down; the call is ending anyway.
    pub async fn send_audio(&self, chunk: Bytes) {
        let _ = self.audio_tx.send(chunk).await;
    }

    /// Tear down the upstream connection.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for AsrStream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn drive(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut audio_rx: mpsc::Receiver<Bytes>,
    events: mpsc::Sender<AsrEvent>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut packets: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            chunk = audio_rx.recv() => {
                let Some(chunk) = chunk else { break };
                packets += 1;
                if ws_tx.send(Message::Binary(chunk)).await.is_err() {
                    tracing::warn!("Transcriber send failed, closing stream");
                    break;
                }
            }
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Transcriber closed the stream");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!("Transcriber stream error: {e}");
                        break;
                    }
                };

                if let Some(event) = parse_result(text.as_str()) {
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!(packets, "Transcriber driver exited");
}

/// Pull (transcript, is_final) out of a transcriber message. Metadata and
/// empty-transcript frames yield nothing.
fn parse_result(raw: &str) -> Option<AsrEvent> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let transcript = value
        .pointer("/channel/alternatives/0/transcript")?
        .as_str()?
        .trim();
    if transcript.is_empty() {
        return None;
    }

    let is_final = value
        .get("is_final")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    Some(if is_final {
        AsrEvent::Final(transcript.to_string())
    } else {
        AsrEvent::Interim(transcript.to_string())
    })
}

#[derive(Debug, thiserror::Error)]
pub enum AsrStreamError {
    #[error("Failed to connect to streaming transcriber: {0}")]
    Connect(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_final_result() {
        let raw = r#"{
            "is_final": true,
            "channel": { "alternatives": [ { "transcript": "my internet is down" } ] }
        }"#;
        assert_eq!(
            parse_result(raw),
            Some(AsrEvent::Final("my internet is down".to_string()))
        );
    }

    #[test]
    fn parses_interim_result() {
        let raw = r#"{
            "is_final": false,
            "channel": { "alternatives": [ { "transcript": "my inter" } ] }
        }"#;
        assert_eq!(
            parse_result(raw),
            Some(AsrEvent::Interim("my inter".to_string()))
        );
    }

    #[test]
    fn empty_transcript_yields_nothing() {
        let raw = r#"{
            "is_final": false,
            "channel": { "alternatives": [ { "transcript": "" } ] }
        }"#;
        assert_eq!(parse_result(raw), None);
    }

    #[test]
    fn metadata_frames_yield_nothing() {
        assert_eq!(parse_result(r#"{"type":"Metadata","request_id":"x"}"#), None);
        assert_eq!(parse_result("not json"), None);
    }
}
