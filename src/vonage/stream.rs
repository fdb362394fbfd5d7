use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use crate::orchestrator;
use crate::pipeline::stream::{AsrEvent, AsrStream};
use crate::pipeline::turns::{TurnDetector, TurnSignal};
use crate::AppState;

/// GET /voice/stream: the telephony layer attaches the call's raw audio
/// to this WebSocket.
pub async fn stream(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

/// Per-call streaming loop: caller audio goes up to the transcriber, its
/// events drive the turn detector, and a completed turn spawns the
/// orchestrator. The detector's silence deadline is one arm of the select
/// so turn boundaries fire even when the line goes quiet.
async fn handle_socket(state: AppState, mut socket: WebSocket) {
    let (event_tx, mut event_rx) = mpsc::channel::<AsrEvent>(64);
    let asr = match AsrStream::connect(&state.config.deepgram, event_tx).await {
        Ok(asr) => asr,
        Err(e) => {
            tracing::error!("Cannot stream this call, no transcriber: {e}");
            return;
        }
    };

    let mut detector = TurnDetector::new(state.config.turn.silence_ms);
    let mut call_id: Option<String> = None;

    loop {
        // A far-future wake keeps the deadline arm inert while disarmed.
        let wake = detector
            .deadline()
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Binary(chunk))) => {
                        asr.send_audio(chunk).await;
                    }
                    Some(Ok(Message::Text(text))) => {
                        if call_id.is_none() {
                            call_id = parse_call_id(text.as_str());
                            if let Some(id) = &call_id {
                                tracing::info!(call_id = %id, "Audio stream attached");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(call_id = ?call_id, "Audio stream closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(call_id = ?call_id, "Audio stream error: {e}");
                        break;
                    }
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    AsrEvent::Final(text) => detector.on_final(&text),
                    AsrEvent::Interim(text) => {
                        if detector.on_interim(&text) == TurnSignal::BargeIn {
                            if let Some(id) = call_id.clone() {
                                // Best effort: the caller talked over us,
                                // cut the spoken reply short.
                                let region = state
                                    .store
                                    .get(&id)
                                    .await
                                    .and_then(|s| s.region_url);
                                let control = state.call_control.clone();
                                tokio::spawn(async move {
                                    if let Err(e) =
                                        control.stop_speech(&id, region.as_deref()).await
                                    {
                                        tracing::debug!(call_id = %id, "Barge-in stop failed: {e}");
                                    }
                                });
                            }
                        }
                    }
                }
            }
            _ = tokio::time::sleep_until(wake), if detector.deadline().is_some() => {
                if let Some(utterance) = detector.poll(Instant::now()) {
                    match &call_id {
                        Some(id) => {
                            tokio::spawn(orchestrator::run_streaming_turn(
                                state.clone(),
                                id.clone(),
                                utterance,
                            ));
                        }
                        None => {
                            tracing::warn!("Turn completed before the stream identified its call");
                        }
                    }
                }
            }
        }
    }

    asr.close();
}

/// The first text frame on the stream identifies the call, either at the
/// top level or inside the headers we attached to the connect NCCO.
fn parse_call_id(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value
        .get("uuid")
        .or_else(|| value.pointer("/headers/uuid"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_id_from_top_level() {
        let raw = r#"{"event":"websocket:connected","uuid":"abc-123"}"#;
        assert_eq!(parse_call_id(raw), Some("abc-123".to_string()));
    }

    #[test]
    fn call_id_from_headers() {
        let raw = r#"{"event":"websocket:connected","headers":{"uuid":"def-456"}}"#;
        assert_eq!(parse_call_id(raw), Some("def-456".to_string()));
    }

    #[test]
    fn no_call_id_in_plain_frames() {
        assert_eq!(parse_call_id(r#"{"event":"ping"}"#), None);
        assert_eq!(parse_call_id("not json"), None);
    }
}
