use std::time::Duration;

use crate::actions::{self, ActionTag};
use crate::greeting;
use crate::ncco::{Ncco, FIRST_LISTEN_SILENCE, LISTEN_SILENCE, WAIT_LISTEN_SILENCE};
use crate::pipeline::llm::GenerationRequest;
use crate::pipeline::stt::SttError;
use crate::session::{CallSession, Role};
use crate::AppState;

/// Sentinels standing in for a user turn when no usable speech arrived.
/// They reach the transcript so agents reviewing a ticket see the gap, but
/// they never reach the reply generator.
pub const NO_AUDIO: &str = "[NO_AUDIO]";
pub const SILENCE: &str = "[SILENCE]";
pub const ASR_FAILED: &str = "[ASR_FAILED]";
pub const ASR_ERROR: &str = "[ASR_ERROR]";

/// Short utterances that are real answers, not recognizer noise.
const SHORT_UTTERANCES: &[&str] = &[
    "yes", "no", "ok", "help", "yeah", "yep", "sure", "yup", "hi", "hey",
];

/// Transcription artifacts the recognizer produces from line noise.
const NOISE_ARTIFACTS: &[&str] = &[
    "hau",
    "uh",
    "um",
    "the wind",
    "background noise",
    "[noise]",
    "disturbance",
];

/// Bare confirmations that never benefit from a knowledge-base lookup.
const CONFIRMATIONS: &[&str] = &[
    "yes", "no", "okay", "ok", "yep", "sure", "correct", "perfect", "done", "completed",
];

const APOLOGY_NO_SPEECH: &str = "I didn't catch that. Could you say it again?";
const APOLOGY_BUSY: &str =
    "I'm sorry, we're a little busy right now. Could you repeat that in a moment?";
const APOLOGY_GENERIC: &str =
    "I'm sorry, I'm having trouble processing that. Could you say it again?";

/// What an ASR webhook can carry for one turn: recognized text from the
/// telephony layer's own recognizer, or audio for us to transcribe.
#[derive(Debug, Default)]
pub struct AsrInput {
    pub speech_text: Option<String>,
    pub audio: Option<String>,
    pub recording_url: Option<String>,
}

/// Answer a new call: seed the session, kick off the identity lookup, and
/// return the greeting NCCO.
///
/// The lookup runs in the background; the greeting waits a short beat for it
/// so known callers are greeted by name, then proceeds anonymously rather
/// than leaving dead air on the line.
pub async fn handle_answer(
    state: &AppState,
    call_id: &str,
    from: &str,
    to: &str,
    region_url: Option<String>,
) -> Vec<Ncco> {
    tracing::info!(call_id, from, "Inbound call answered");

    state
        .store
        .replace(
            call_id,
            CallSession {
                phone: from.to_string(),
                bot_number: to.to_string(),
                region_url,
                ..Default::default()
            },
        )
        .await;

    if from.len() > 5 && !from.eq_ignore_ascii_case("unknown") {
        let lookup_state = state.clone();
        let lookup_call = call_id.to_string();
        let lookup_phone = from.to_string();
        let mut handle =
            tokio::spawn(async move { background_lookup(lookup_state, lookup_call, lookup_phone).await });
        // Give the lookup a brief head start so the greeting can be
        // personalized; past that it keeps running in the background.
        let wait = Duration::from_millis(state.config.turn.lookup_wait_ms);
        let _ = tokio::time::timeout(wait, &mut handle).await;
    } else {
        state.store.update(call_id, |s| s.lookup_done = true).await;
    }

    let session = state.store.get_or_create(call_id).await;
    let greeting =
        greeting::answer_greeting(&state.config.agent.org_name, session.valid_contact_name());
    state
        .store
        .append_turn(call_id, Role::Assistant, &greeting)
        .await;

    if state.config.deepgram.api_key.is_empty() {
        // Turn-based mode: the telephony layer records each utterance and
        // posts it to the ASR webhook.
        vec![
            Ncco::talk(greeting, false),
            Ncco::listen(&state.config.asr_url(), FIRST_LISTEN_SILENCE),
        ]
    } else {
        vec![
            Ncco::talk(greeting, false),
            Ncco::connect_stream(&state.config.stream_url(), call_id),
        ]
    }
}

/// One turn of the turn-based webhook flow. `None` means the call is not
/// known to this server and the webhook should 404.
pub async fn handle_asr_turn(
    state: &AppState,
    call_id: &str,
    input: AsrInput,
) -> Option<Vec<Ncco>> {
    state.store.get(call_id).await?;
    wait_for_lookup(state, call_id).await;

    if !claim_turn(state, call_id).await {
        tracing::info!(call_id, "Turn already in flight, dropping utterance");
        return Some(Vec::new());
    }

    let ncco = asr_turn(state, call_id, input).await;
    state.store.update(call_id, |s| s.processing = false).await;
    Some(ncco)
}

async fn asr_turn(state: &AppState, call_id: &str, input: AsrInput) -> Vec<Ncco> {
    let mut text = transcribe_input(state, call_id, input).await;
    if !is_sentinel(&text) && is_noise(&text) {
        text = SILENCE.to_string();
    }
    let asr_listen_url = state.config.asr_url();

    // Only ASR failures short-circuit; silence still reaches the generator
    // so it can ask the caller to repeat themselves in context.
    if is_failure_sentinel(&text) {
        state.store.append_turn(call_id, Role::User, &text).await;
        return vec![
            Ncco::talk(APOLOGY_NO_SPEECH, true),
            Ncco::listen(&asr_listen_url, LISTEN_SILENCE),
        ];
    }

    let pre_turns = state
        .store
        .get(call_id)
        .await
        .map(|s| s.transcript.len())
        .unwrap_or(0);
    state.store.append_turn(call_id, Role::User, &text).await;

    let raw = generate_reply(state, call_id, &text).await;
    state.store.append_turn(call_id, Role::Assistant, &raw).await;

    let parsed = actions::parse_reply(&raw);
    if let Some(label) = parsed.sentiment() {
        let label = label.to_string();
        state.store.update(call_id, |s| s.sentiment = label).await;
    }

    let wants_hangup = parsed.tags.iter().any(|t| matches!(t, ActionTag::Hangup));
    let wants_wait = parsed.tags.iter().any(|t| matches!(t, ActionTag::Wait));
    let transfer_target = parsed.tags.iter().find_map(|t| match t {
        ActionTag::Transfer(number) => Some(number.clone()),
        _ => None,
    });

    // Call control here happens through the returned NCCO, so transfer,
    // hangup and wait are consumed inline; the rest run in the background.
    let background: Vec<ActionTag> = parsed
        .tags
        .iter()
        .filter(|t| {
            !matches!(
                t,
                ActionTag::Transfer(_)
                    | ActionTag::Hangup
                    | ActionTag::Wait
                    | ActionTag::Sentiment(_)
            )
        })
        .cloned()
        .collect();
    if !background.is_empty() {
        tokio::spawn(actions::executor::execute_tags(
            state.clone(),
            call_id.to_string(),
            background,
            parsed.speech.len(),
        ));
    }

    let mut ncco = vec![Ncco::talk(parsed.speech, transfer_target.is_none())];
    if let Some(number) = transfer_target {
        let target = actions::executor::resolve_transfer_target(
            number.as_deref(),
            &state.config.agent.transfer_number,
        );
        let session = state.store.get_or_create(call_id).await;
        state
            .store
            .update(call_id, |s| s.transfer_requested = true)
            .await;
        ncco.push(Ncco::connect_phone(
            &session.bot_number,
            &target,
            &state.config.events_url(),
        ));
    } else if wants_hangup {
        ncco.push(Ncco::Hangup);
    } else {
        let silence = if wants_wait {
            WAIT_LISTEN_SILENCE
        } else if pre_turns <= 1 {
            FIRST_LISTEN_SILENCE
        } else {
            LISTEN_SILENCE
        };
        ncco.push(Ncco::listen(&asr_listen_url, silence));
    }
    ncco
}

/// One turn of the streaming flow: the silence detector handed us a full
/// utterance and the reply is spoken back over the live call.
pub async fn run_streaming_turn(state: AppState, call_id: String, utterance: String) {
    if state.store.get(&call_id).await.is_none() {
        tracing::warn!(call_id, "Streaming turn for unknown call, ignoring");
        return;
    }
    wait_for_lookup(&state, &call_id).await;

    if !claim_turn(&state, &call_id).await {
        tracing::info!(call_id, utterance, "Turn already in flight, dropping utterance");
        return;
    }

    streaming_turn(&state, &call_id, utterance.trim()).await;
    state.store.update(&call_id, |s| s.processing = false).await;
}

async fn streaming_turn(state: &AppState, call_id: &str, utterance: &str) {
    if utterance.is_empty() {
        return;
    }
    if is_noise(utterance) {
        // The caller still hears something for this turn; the noise just
        // never reaches the generator or the transcript.
        tracing::debug!(call_id, utterance, "Noise utterance, asking the caller to repeat");
        let session = state.store.get_or_create(call_id).await;
        if let Err(e) = state
            .call_control
            .speak(call_id, session.region_url.as_deref(), APOLOGY_NO_SPEECH)
            .await
        {
            tracing::error!(call_id, "Failed to speak reply: {e}");
        }
        return;
    }

    state.store.append_turn(call_id, Role::User, utterance).await;

    let raw = generate_reply(state, call_id, utterance).await;
    state.store.append_turn(call_id, Role::Assistant, &raw).await;

    let parsed = actions::parse_reply(&raw);
    if let Some(label) = parsed.sentiment() {
        let label = label.to_string();
        state.store.update(call_id, |s| s.sentiment = label).await;
    }

    let session = state.store.get_or_create(call_id).await;
    if let Err(e) = state
        .call_control
        .speak(call_id, session.region_url.as_deref(), &parsed.speech)
        .await
    {
        tracing::error!(call_id, "Failed to speak reply: {e}");
    }

    let background: Vec<ActionTag> = parsed
        .tags
        .iter()
        .filter(|t| !matches!(t, ActionTag::Sentiment(_)))
        .cloned()
        .collect();
    if !background.is_empty() {
        tokio::spawn(actions::executor::execute_tags(
            state.clone(),
            call_id.to_string(),
            background,
            parsed.speech.len(),
        ));
    }
}

/// Generate the assistant reply for `issue`, reading fresh session context.
/// API failures degrade to a spoken fallback rather than an error.
async fn generate_reply(state: &AppState, call_id: &str, issue: &str) -> String {
    let kb = if should_skip_kb(issue) {
        String::new()
    } else {
        state.helpdesk.search_kb(issue).await
    };

    let session = state.store.get_or_create(call_id).await;
    let request = GenerationRequest {
        issue,
        kb: &kb,
        history: &session.transcript,
        contact_name: session.valid_contact_name(),
        recent_tickets: &session.recent_tickets,
        active_ticket_id: session.ticket_id.as_deref(),
        phone: (!session.phone.is_empty()).then_some(session.phone.as_str()),
    };

    match state.llm.generate(&request).await {
        Ok(reply) => reply,
        Err(crate::pipeline::llm::LlmError::RateLimited) => {
            tracing::warn!(call_id, "Reply generator rate limited");
            APOLOGY_BUSY.to_string()
        }
        Err(e) => {
            tracing::error!(call_id, "Reply generation failed: {e}");
            APOLOGY_GENERIC.to_string()
        }
    }
}

/// Look up who is calling and what they already have open. Always marks the
/// lookup finished so waiting turns never stall on a failure.
pub async fn background_lookup(state: AppState, call_id: String, phone: String) {
    let contact = match state.helpdesk.find_contact(&phone).await {
        Ok(Some(contact)) => Some(contact),
        Ok(None) => {
            // Register the caller under their number; a real name arrives
            // later via UPDATE_NAME.
            match state.helpdesk.create_contact(&phone, &phone).await {
                Ok(contact) => Some(contact),
                Err(e) => {
                    tracing::warn!(call_id, "Contact creation failed: {e}");
                    None
                }
            }
        }
        Err(e) => {
            tracing::warn!(call_id, "Contact lookup failed: {e}");
            None
        }
    };

    let mut contact_id = None;
    let mut contact_name = None;
    let mut recent_tickets = Vec::new();
    if let Some(contact) = contact {
        contact_id = Some(contact.id);
        contact_name = contact.name;
        match state.helpdesk.list_open_tickets(contact.id).await {
            Ok(tickets) => recent_tickets = tickets,
            Err(e) => tracing::warn!(call_id, "Ticket lookup failed: {e}"),
        }
    }

    tracing::info!(
        call_id,
        contact_id = ?contact_id,
        open_tickets = recent_tickets.len(),
        "Identity lookup finished"
    );
    state
        .store
        .update(&call_id, |s| {
            s.contact_id = contact_id;
            s.contact_name = contact_name;
            s.recent_tickets = recent_tickets;
            s.lookup_done = true;
        })
        .await;
}

/// Call lifecycle events. Completion closes out the session and attaches
/// the transcript to the call's ticket.
pub async fn handle_event(state: &AppState, event: &serde_json::Value) {
    let status = event.get("status").and_then(|v| v.as_str()).unwrap_or("");
    let call_id = event
        .get("uuid")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    tracing::debug!(call_id, status, "Call event");

    if status != "completed" || call_id.is_empty() {
        return;
    }

    state.store.update(&call_id, |s| s.completed = true).await;
    let Some(session) = state.store.get(&call_id).await else {
        return;
    };
    if let Some(ticket_id) = session.ticket_id {
        let helpdesk = state.helpdesk.clone();
        let transcript = session.transcript;
        tokio::spawn(async move {
            match helpdesk.append_note(&ticket_id, &transcript).await {
                Ok(()) => tracing::info!(ticket_id, "Transcript attached to ticket"),
                Err(e) => tracing::error!(ticket_id, "Failed to attach transcript: {e}"),
            }
        });
    }
}

/// Atomically claim the at-most-one-turn-in-flight slot. Losing callers
/// drop their utterance; turns are never queued.
async fn claim_turn(state: &AppState, call_id: &str) -> bool {
    let mut claimed = false;
    state
        .store
        .update(call_id, |s| {
            if !s.processing {
                s.processing = true;
                claimed = true;
            }
        })
        .await;
    claimed
}

/// Poll until the identity lookup finishes or the ceiling passes; the turn
/// then proceeds with whatever context is available.
async fn wait_for_lookup(state: &AppState, call_id: &str) {
    let ceiling = Duration::from_millis(state.config.turn.lookup_ceiling_ms);
    let started = tokio::time::Instant::now();
    loop {
        let done = state
            .store
            .get(call_id)
            .await
            .map(|s| s.lookup_done)
            .unwrap_or(true);
        if done || started.elapsed() >= ceiling {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn transcribe_input(state: &AppState, call_id: &str, input: AsrInput) -> String {
    if let Some(text) = input.speech_text {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let source = input
        .audio
        .filter(|a| !a.is_empty())
        .or(input.recording_url.filter(|u| !u.is_empty()));
    let Some(source) = source else {
        return NO_AUDIO.to_string();
    };

    match state.stt.transcribe(&source).await {
        Ok(Some(text)) => text,
        Ok(None) => SILENCE.to_string(),
        Err(e @ (SttError::Decode(_) | SttError::Encode(_))) => {
            tracing::error!(call_id, "Bad audio payload: {e}");
            ASR_ERROR.to_string()
        }
        Err(e) => {
            tracing::error!(call_id, "Transcription failed: {e}");
            ASR_FAILED.to_string()
        }
    }
}

fn is_sentinel(text: &str) -> bool {
    matches!(text, NO_AUDIO | SILENCE | ASR_FAILED | ASR_ERROR)
}

/// The sentinels that mean the pipeline itself broke. Silence is not among
/// them; a silent turn still gets a generated reply.
fn is_failure_sentinel(text: &str) -> bool {
    matches!(text, NO_AUDIO | ASR_FAILED | ASR_ERROR)
}

/// Short non-answers and known recognizer artifacts never reach the
/// generator; answering them derails the conversation.
fn is_noise(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    if NOISE_ARTIFACTS.contains(&lower.as_str()) {
        return true;
    }
    lower.len() < 5 && !SHORT_UTTERANCES.contains(&lower.as_str())
}

/// Greetings and bare confirmations get no KB context; the lookup would
/// only add latency.
fn should_skip_kb(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    let word = lower.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    lower.len() < 10 || CONFIRMATIONS.contains(&word)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::helpdesk::HelpdeskClient;
    use crate::pipeline::llm::LlmClient;
    use crate::pipeline::stt::SttClient;
    use crate::session::SessionStore;
    use crate::vonage::client::CallControlClient;

    const TEST_CONFIG: &str = r#"
        [server]
        host = "127.0.0.1"
        port = 0
        external_url = "https://test.example"

        [vonage]
        application_id = "app-id"
        private_key_path = "/nonexistent/private.key"

        [groq]
        api_key = "gsk_test"

        [helpdesk]
        domain = "test.example"
        api_key = "fd_test"
    "#;

    fn test_state() -> AppState {
        let config: Config = toml::from_str(TEST_CONFIG).unwrap();
        AppState {
            store: SessionStore::new(),
            stt: Arc::new(SttClient::new("key".to_string(), "whisper".to_string())),
            llm: Arc::new(LlmClient::new("key".to_string(), "model".to_string())),
            helpdesk: Arc::new(HelpdeskClient::new("test.example", "key")),
            call_control: Arc::new(CallControlClient::new(
                "app-id".to_string(),
                "/nonexistent/private.key",
            )),
            config: Arc::new(config),
        }
    }

    #[test]
    fn noise_filter_passes_real_answers() {
        assert!(!is_noise("yes"));
        assert!(!is_noise("no"));
        assert!(!is_noise("help"));
        assert!(!is_noise("my printer is jammed"));
    }

    #[test]
    fn noise_filter_drops_artifacts_and_fragments() {
        assert!(is_noise("uh"));
        assert!(is_noise("Hau"));
        assert!(is_noise("the wind"));
        assert!(is_noise("background noise"));
        assert!(is_noise("a"));
        assert!(is_noise("hm"));
    }

    #[test]
    fn sentinels_are_recognized() {
        assert!(is_sentinel(NO_AUDIO));
        assert!(is_sentinel(SILENCE));
        assert!(is_sentinel(ASR_FAILED));
        assert!(is_sentinel(ASR_ERROR));
        assert!(!is_sentinel("yes"));
    }

    #[test]
    fn silence_is_not_a_failure() {
        assert!(is_failure_sentinel(NO_AUDIO));
        assert!(is_failure_sentinel(ASR_FAILED));
        assert!(is_failure_sentinel(ASR_ERROR));
        assert!(!is_failure_sentinel(SILENCE));
    }

    #[tokio::test]
    async fn silence_turn_reaches_the_reply_path() {
        let state = test_state();
        state.store.update("call-1", |s| s.lookup_done = true).await;

        // A too-short utterance is normalized to the silence sentinel and
        // must still produce a generated (here: fallback) assistant turn.
        let input = AsrInput {
            speech_text: Some("zz".to_string()),
            ..Default::default()
        };
        let ncco = handle_asr_turn(&state, "call-1", input).await.unwrap();

        let session = state.store.get("call-1").await.unwrap();
        assert_eq!(session.transcript.len(), 2);
        assert_eq!(session.transcript[0].role, Role::User);
        assert_eq!(session.transcript[0].content, SILENCE);
        assert_eq!(session.transcript[1].role, Role::Assistant);
        assert!(!session.processing);
        assert_eq!(ncco.len(), 2);
    }

    #[tokio::test]
    async fn asr_failure_short_circuits_without_a_reply_turn() {
        let state = test_state();
        state.store.update("call-1", |s| s.lookup_done = true).await;

        // No speech, no audio, no recording: nothing to transcribe.
        let ncco = handle_asr_turn(&state, "call-1", AsrInput::default())
            .await
            .unwrap();

        let session = state.store.get("call-1").await.unwrap();
        assert_eq!(session.transcript.len(), 1);
        assert_eq!(session.transcript[0].content, NO_AUDIO);
        assert!(!session.processing);
        assert_eq!(ncco[0], Ncco::talk(APOLOGY_NO_SPEECH, true));
    }

    #[tokio::test]
    async fn noise_streaming_turn_is_answered_but_not_recorded() {
        let state = test_state();
        state.store.update("call-1", |s| s.lookup_done = true).await;

        run_streaming_turn(state.clone(), "call-1".to_string(), "zz".to_string()).await;

        // The apology is spoken (best effort) instead of dropping the turn
        // silently; the noise itself never enters the transcript and the
        // processing gate is released.
        let session = state.store.get("call-1").await.unwrap();
        assert!(session.transcript.is_empty());
        assert!(!session.processing);
    }

    #[test]
    fn kb_skipped_for_confirmations_and_short_text() {
        assert!(should_skip_kb("yes"));
        assert!(should_skip_kb("Okay."));
        assert!(should_skip_kb("Perfect!"));
        assert!(should_skip_kb("hi there"));
        assert!(!should_skip_kb("my internet keeps dropping"));
    }

    #[tokio::test]
    async fn claim_turn_admits_exactly_one() {
        let store = SessionStore::new();
        store.update("call-1", |_| {}).await;

        // claim_turn needs only the store; exercise the same logic inline
        let mut first = false;
        store
            .update("call-1", |s| {
                if !s.processing {
                    s.processing = true;
                    first = true;
                }
            })
            .await;
        let mut second = false;
        store
            .update("call-1", |s| {
                if !s.processing {
                    s.processing = true;
                    second = true;
                }
            })
            .await;

        assert!(first);
        assert!(!second);
    }
}
