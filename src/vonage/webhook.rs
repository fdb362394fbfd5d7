use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::orchestrator::{self, AsrInput};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AnswerParams {
    pub uuid: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub region_url: Option<String>,
}

/// GET /voice/answer: a call arrived, return the greeting NCCO.
pub async fn answer(
    State(state): State<AppState>,
    Query(params): Query<AnswerParams>,
) -> Response {
    let ncco = orchestrator::handle_answer(
        &state,
        &params.uuid,
        &params.from,
        &params.to,
        params.region_url,
    )
    .await;
    Json(ncco).into_response()
}

#[derive(Debug, Deserialize)]
pub struct AsrPayload {
    pub uuid: String,
    #[serde(default)]
    pub speech: Option<Value>,
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub recording_url: Option<String>,
}

/// POST /voice/asr: one caller utterance in turn-based mode.
pub async fn asr(State(state): State<AppState>, Json(payload): Json<AsrPayload>) -> Response {
    let input = AsrInput {
        speech_text: extract_speech_text(payload.speech.as_ref()),
        audio: payload.audio,
        recording_url: payload.recording_url,
    };

    match orchestrator::handle_asr_turn(&state, &payload.uuid, input).await {
        Some(ncco) => Json(ncco).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "unknown call" })),
        )
            .into_response(),
    }
}

/// POST /voice/events: call lifecycle notifications. Always 200 with an
/// empty NCCO so the telephony layer never retries.
pub async fn events(State(state): State<AppState>, Json(event): Json<Value>) -> Response {
    orchestrator::handle_event(&state, &event).await;
    Json(serde_json::json!([])).into_response()
}

/// Best recognition hypothesis out of a speech-input result block.
fn extract_speech_text(speech: Option<&Value>) -> Option<String> {
    let text = speech?
        .pointer("/results/0/text")?
        .as_str()?
        .trim()
        .to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_text_comes_from_first_result() {
        let speech = serde_json::json!({
            "results": [
                { "text": "my printer is jammed", "confidence": "0.91" },
                { "text": "my printer is jelly", "confidence": "0.40" }
            ]
        });
        assert_eq!(
            extract_speech_text(Some(&speech)),
            Some("my printer is jammed".to_string())
        );
    }

    #[test]
    fn missing_or_empty_results_yield_none() {
        assert_eq!(extract_speech_text(None), None);
        assert_eq!(
            extract_speech_text(Some(&serde_json::json!({ "timeout_reason": "start_timeout" }))),
            None
        );
        assert_eq!(
            extract_speech_text(Some(&serde_json::json!({ "results": [{ "text": "  " }] }))),
            None
        );
    }
}
