use serde::Serialize;

/// Speech-input silence threshold for the very first listen after the
/// greeting. Later turns use a tighter window.
pub const FIRST_LISTEN_SILENCE: f64 = 1.5;
pub const LISTEN_SILENCE: f64 = 1.2;
/// Listen window when the reply asked to wait for the caller.
pub const WAIT_LISTEN_SILENCE: f64 = 5.0;

/// One call-control instruction in the ordered list returned to the
/// telephony layer per webhook.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Ncco {
    Talk {
        text: String,
        #[serde(rename = "bargeIn")]
        barge_in: bool,
    },
    Input {
        #[serde(rename = "type")]
        kind: Vec<String>,
        #[serde(rename = "eventUrl")]
        event_url: Vec<String>,
        speech: SpeechInput,
    },
    Connect {
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        endpoint: Vec<Endpoint>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout: Option<u32>,
        #[serde(rename = "eventUrl", skip_serializing_if = "Option::is_none")]
        event_url: Option<Vec<String>>,
    },
    Hangup,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SpeechInput {
    pub language: String,
    #[serde(rename = "endOnSilence")]
    pub end_on_silence: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Endpoint {
    Phone {
        number: String,
    },
    Websocket {
        uri: String,
        #[serde(rename = "content-type")]
        content_type: String,
        headers: StreamHeaders,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StreamHeaders {
    pub uuid: String,
}

impl Ncco {
    pub fn talk(text: impl Into<String>, barge_in: bool) -> Self {
        Ncco::Talk {
            text: text.into(),
            barge_in,
        }
    }

    /// Listen for caller speech, posting the result to `event_url`.
    pub fn listen(event_url: &str, end_on_silence: f64) -> Self {
        Ncco::Input {
            kind: vec!["speech".to_string()],
            event_url: vec![event_url.to_string()],
            speech: SpeechInput {
                language: "en-US".to_string(),
                end_on_silence,
            },
        }
    }

    /// Bridge the caller to a phone number (transfer).
    pub fn connect_phone(from: &str, number: &str, events_url: &str) -> Self {
        Ncco::Connect {
            from: Some(from.to_string()),
            endpoint: vec![Endpoint::Phone {
                number: number.to_string(),
            }],
            timeout: Some(60),
            event_url: Some(vec![events_url.to_string()]),
        }
    }

    /// Attach the call's audio to our streaming WebSocket endpoint.
    pub fn connect_stream(ws_url: &str, call_id: &str) -> Self {
        Ncco::Connect {
            from: None,
            endpoint: vec![Endpoint::Websocket {
                uri: ws_url.to_string(),
                content_type: "audio/l16;rate=16000".to_string(),
                headers: StreamHeaders {
                    uuid: call_id.to_string(),
                },
            }],
            timeout: None,
            event_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn talk_serializes_with_barge_in() {
        let json = serde_json::to_value(Ncco::talk("Hello there.", true)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "action": "talk",
                "text": "Hello there.",
                "bargeIn": true
            })
        );
    }

    #[test]
    fn input_serializes_speech_settings() {
        let json =
            serde_json::to_value(Ncco::listen("https://x.example/voice/asr", 1.2)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "action": "input",
                "type": ["speech"],
                "eventUrl": ["https://x.example/voice/asr"],
                "speech": { "language": "en-US", "endOnSilence": 1.2 }
            })
        );
    }

    #[test]
    fn connect_phone_serializes_endpoint() {
        let json = serde_json::to_value(Ncco::connect_phone(
            "+18335550000",
            "+14705550000",
            "https://x.example/voice/events",
        ))
        .unwrap();
        assert_eq!(json["action"], "connect");
        assert_eq!(json["from"], "+18335550000");
        assert_eq!(json["endpoint"][0]["type"], "phone");
        assert_eq!(json["endpoint"][0]["number"], "+14705550000");
        assert_eq!(json["timeout"], 60);
    }

    #[test]
    fn connect_stream_serializes_websocket_endpoint() {
        let json = serde_json::to_value(Ncco::connect_stream(
            "wss://x.example/voice/stream",
            "abc-123",
        ))
        .unwrap();
        assert_eq!(json["endpoint"][0]["type"], "websocket");
        assert_eq!(json["endpoint"][0]["uri"], "wss://x.example/voice/stream");
        assert_eq!(json["endpoint"][0]["content-type"], "audio/l16;rate=16000");
        assert_eq!(json["endpoint"][0]["headers"]["uuid"], "abc-123");
        assert!(json.get("from").is_none());
    }

    #[test]
    fn hangup_serializes_bare() {
        let json = serde_json::to_value(Ncco::Hangup).unwrap();
        assert_eq!(json, serde_json::json!({ "action": "hangup" }));
    }
}
