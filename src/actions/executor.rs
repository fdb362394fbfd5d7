use std::time::Duration;

use crate::actions::ActionTag;
use crate::helpdesk::STATUS_RESOLVED;
use crate::session::is_placeholder_name;
use crate::AppState;

/// Execute a reply's action tags in order.
///
/// Runs off the voice path: the caller has already heard (or is hearing) the
/// reply. Each tag is executed in isolation; a failing helpdesk call is
/// logged and the rest still run. `speech_len` is the character length of
/// the spoken reply, used to time hangups after the speech finishes.
pub async fn execute_tags(state: AppState, call_id: String, tags: Vec<ActionTag>, speech_len: usize) {
    for tag in tags {
        match tag {
            ActionTag::CreateTicket(description) => {
                create_ticket(&state, &call_id, &description).await;
            }
            ActionTag::UseTicket(id) => {
                adopt_ticket(&state, &call_id, &id).await;
            }
            ActionTag::ResolveTicket(id) => {
                resolve_ticket(&state, &call_id, id).await;
            }
            ActionTag::UpdateName(name) => {
                update_name(&state, &call_id, &name).await;
            }
            ActionTag::Transfer(number) => {
                transfer(&state, &call_id, number.as_deref()).await;
            }
            ActionTag::Hangup => {
                hangup(&state, &call_id, speech_len).await;
            }
            ActionTag::Sentiment(label) => {
                state
                    .store
                    .update(&call_id, |s| s.sentiment = label.clone())
                    .await;
            }
            ActionTag::Wait => {
                tracing::debug!(call_id, "Caller asked to hold; next listen extends");
            }
            ActionTag::Unknown { kind, payload } => {
                tracing::warn!(call_id, kind, ?payload, "Ignoring unknown action tag");
            }
        }
    }
}

/// Create a ticket unless the call already has one. The gate reads fresh
/// state so two tags in one reply cannot double-create.
async fn create_ticket(state: &AppState, call_id: &str, description: &str) {
    let Some(session) = state.store.get(call_id).await else {
        return;
    };
    if let Some(existing) = session.ticket_id {
        tracing::info!(call_id, existing, "Ticket already attached, skipping create");
        return;
    }

    let phone = (!session.phone.is_empty()).then_some(session.phone.as_str());
    match state
        .helpdesk
        .create_ticket(
            call_id,
            description,
            phone,
            &session.sentiment,
            session.contact_id,
        )
        .await
    {
        Ok(Some(id)) => {
            tracing::info!(call_id, ticket_id = %id, "Ticket created");
            state
                .store
                .update(call_id, |s| {
                    if s.ticket_id.is_none() {
                        s.ticket_id = Some(id.clone());
                    }
                })
                .await;
        }
        Ok(None) => tracing::warn!(call_id, "Ticket created but no id in response"),
        Err(e) => tracing::error!(call_id, "Ticket creation failed: {e}"),
    }
}

async fn adopt_ticket(state: &AppState, call_id: &str, ticket_id: &str) {
    let mut adopted = false;
    state
        .store
        .update(call_id, |s| {
            if s.ticket_id.is_none() {
                s.ticket_id = Some(ticket_id.to_string());
                adopted = true;
            }
        })
        .await;
    if adopted {
        tracing::info!(call_id, ticket_id, "Adopted existing ticket for this call");
    } else {
        tracing::warn!(call_id, ticket_id, "Call already has a ticket, not replacing");
    }
}

async fn resolve_ticket(state: &AppState, call_id: &str, ticket_id: Option<String>) {
    let ticket_id = match ticket_id {
        Some(id) => Some(id),
        None => state.store.get(call_id).await.and_then(|s| s.ticket_id),
    };
    let Some(ticket_id) = ticket_id else {
        tracing::warn!(call_id, "RESOLVE_TICKET with no ticket attached to the call");
        return;
    };
    let Ok(numeric) = ticket_id.parse::<u64>() else {
        tracing::warn!(call_id, ticket_id, "Unparseable ticket id, not resolving");
        return;
    };

    match state
        .helpdesk
        .set_ticket_status(numeric, STATUS_RESOLVED)
        .await
    {
        Ok(()) => tracing::info!(call_id, ticket_id, "Ticket resolved"),
        Err(e) => tracing::error!(call_id, ticket_id, "Ticket resolve failed: {e}"),
    }
}

async fn update_name(state: &AppState, call_id: &str, name: &str) {
    let Some(session) = state.store.get(call_id).await else {
        return;
    };
    if !should_update_name(session.contact_name.as_deref(), name) {
        tracing::debug!(call_id, name, "Name update skipped");
        return;
    }

    let result = match session.contact_id {
        Some(contact_id) => state
            .helpdesk
            .rename_contact(contact_id, name)
            .await
            .map(|()| Some(contact_id)),
        None if !session.phone.is_empty() => state
            .helpdesk
            .create_contact(name, &session.phone)
            .await
            .map(|c| Some(c.id)),
        None => Ok(None),
    };

    match result {
        Ok(contact_id) => {
            state
                .store
                .update(call_id, |s| {
                    s.contact_name = Some(name.to_string());
                    if s.contact_id.is_none() {
                        s.contact_id = contact_id;
                    }
                })
                .await;
            tracing::info!(call_id, name, "Contact name updated");
        }
        Err(e) => tracing::error!(call_id, name, "Contact update failed: {e}"),
    }
}

async fn transfer(state: &AppState, call_id: &str, number: Option<&str>) {
    let target = resolve_transfer_target(number, &state.config.agent.transfer_number);
    let Some(session) = state.store.get(call_id).await else {
        return;
    };

    state.store.update(call_id, |s| s.transfer_requested = true).await;
    match state
        .call_control
        .transfer(
            call_id,
            session.region_url.as_deref(),
            &session.bot_number,
            &target,
        )
        .await
    {
        Ok(()) => tracing::info!(call_id, target, "Call transferred"),
        Err(e) => tracing::error!(call_id, target, "Transfer failed: {e}"),
    }
}

/// Hang up after the spoken goodbye has had time to play out.
async fn hangup(state: &AppState, call_id: &str, speech_len: usize) {
    tokio::time::sleep(hangup_delay(speech_len)).await;
    let region = state.store.get(call_id).await.and_then(|s| s.region_url);
    match state.call_control.hangup(call_id, region.as_deref()).await {
        Ok(()) => tracing::info!(call_id, "Call hung up"),
        Err(e) => tracing::warn!(call_id, "Hangup failed (caller may have hung up): {e}"),
    }
}

/// Only a placeholder name may be replaced, and only by a real one.
fn should_update_name(current: Option<&str>, new: &str) -> bool {
    if is_placeholder_name(new) {
        return false;
    }
    match current {
        Some(existing) => is_placeholder_name(existing),
        None => true,
    }
}

/// A spoken number with at least seven digits is a usable destination;
/// anything else falls back to the configured agent line.
pub(crate) fn resolve_transfer_target(raw: Option<&str>, default: &str) -> String {
    if let Some(raw) = raw {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() >= 7 {
            return digits;
        }
    }
    default.to_string()
}

/// Rough time-to-speak at conversational pace, capped so a runaway reply
/// cannot hold the line.
fn hangup_delay(speech_len: usize) -> Duration {
    let secs = (speech_len as f64 / 12.0 + 1.2).min(20.0);
    Duration::from_secs_f64(secs)
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

    #[tokio::test]
    async fn adoption_never_replaces_an_attached_ticket() {
        let state = test_state();
        state
            .store
            .update("call-1", |s| s.ticket_id = Some("41".to_string()))
            .await;

        adopt_ticket(&state, "call-1", "42").await;

        let session = state.store.get("call-1").await.unwrap();
        assert_eq!(session.ticket_id.as_deref(), Some("41"));
    }

    #[tokio::test]
    async fn adoption_attaches_when_no_ticket_yet() {
        let state = test_state();
        state.store.update("call-1", |_| {}).await;

        adopt_ticket(&state, "call-1", "42").await;

        let session = state.store.get("call-1").await.unwrap();
        assert_eq!(session.ticket_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn create_is_skipped_when_ticket_already_attached() {
        let state = test_state();
        state
            .store
            .update("call-1", |s| s.ticket_id = Some("41".to_string()))
            .await;

        // Gated before any helpdesk call, so no request leaves the process.
        create_ticket(&state, "call-1", "printer jam").await;

        let session = state.store.get("call-1").await.unwrap();
        assert_eq!(session.ticket_id.as_deref(), Some("41"));
    }

    #[test]
    fn placeholder_names_are_replaceable() {
        assert!(should_update_name(None, "Maria"));
        assert!(should_update_name(Some("unknown"), "Maria"));
        assert!(should_update_name(Some("+15551234567"), "Maria"));
        assert!(!should_update_name(Some("Maria"), "John"));
    }

    #[test]
    fn placeholder_never_overwrites() {
        assert!(!should_update_name(None, "unknown"));
        assert!(!should_update_name(None, "12345"));
        assert!(!should_update_name(Some("Maria"), "unknown"));
    }

    #[test]
    fn transfer_target_needs_seven_digits() {
        assert_eq!(
            resolve_transfer_target(Some("+1 (470) 555-0000"), "18335645478"),
            "14705550000"
        );
        assert_eq!(resolve_transfer_target(Some("911"), "18335645478"), "18335645478");
        assert_eq!(resolve_transfer_target(None, "18335645478"), "18335645478");
        assert_eq!(
            resolve_transfer_target(Some("the front desk"), "18335645478"),
            "18335645478"
        );
    }

    #[test]
    fn hangup_delay_scales_and_caps() {
        assert!(hangup_delay(0) >= Duration::from_secs_f64(1.2));
        assert!(hangup_delay(60) > hangup_delay(12));
        assert_eq!(hangup_delay(10_000), Duration::from_secs_f64(20.0));
    }
}
