use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::helpdesk::TicketSummary;

/// Trailing transcript window kept per call. Older turns are evicted FIFO.
pub const TRANSCRIPT_WINDOW: usize = 50;

/// Speaker role for one transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One transcript entry: who spoke and what they said.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Mutable per-call state. One exists per active call, keyed by the
/// telephony layer's call UUID.
#[derive(Debug, Clone)]
pub struct CallSession {
    /// Role-tagged transcript, capped to [`TRANSCRIPT_WINDOW`] turns.
    pub transcript: Vec<Turn>,
    /// At-most-one-turn-in-flight guard. While true, new utterances for this
    /// call are dropped, never queued.
    pub processing: bool,
    /// The one ticket attached to this call, if any. Set by creation or by
    /// adopting an existing ticket; never replaced once set.
    pub ticket_id: Option<String>,
    pub contact_id: Option<u64>,
    pub contact_name: Option<String>,
    /// Latest sentiment label reported by the reply generator.
    pub sentiment: String,
    /// Caller number as reported by the answer webhook.
    pub phone: String,
    /// The number the caller dialed; used as the from-leg on transfers.
    pub bot_number: String,
    /// Regional call-control endpoint for this call, if the webhook gave one.
    pub region_url: Option<String>,
    pub recent_tickets: Vec<TicketSummary>,
    /// Set once the background identity lookup has finished (or was skipped).
    pub lookup_done: bool,
    pub transfer_requested: bool,
    pub completed: bool,
}

impl Default for CallSession {
    fn default() -> Self {
        Self {
            transcript: Vec::new(),
            processing: false,
            ticket_id: None,
            contact_id: None,
            contact_name: None,
            sentiment: "Neutral".to_string(),
            phone: String::new(),
            bot_number: String::new(),
            region_url: None,
            recent_tickets: Vec::new(),
            lookup_done: false,
            transfer_requested: false,
            completed: false,
        }
    }
}

impl CallSession {
    /// The contact name if it is a real name, not a placeholder.
    pub fn valid_contact_name(&self) -> Option<&str> {
        self.contact_name
            .as_deref()
            .filter(|n| !is_placeholder_name(n))
    }
}

/// A name that is empty, "unknown", or contains no letter (phone-shaped)
/// counts as no name at all.
pub fn is_placeholder_name(name: &str) -> bool {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown") {
        return true;
    }
    !trimmed.chars().any(|c| c.is_ascii_alphabetic())
}

/// Store of per-call sessions.
///
/// The map is the single source of truth during concurrent access: the
/// foreground turn task, the background lookup, the action executor and the
/// completion handler all mutate through it. Callers must read-modify-write
/// against a fresh fetch; no session copy is valid across an await.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, CallSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the session for a call, creating it with defaults on first
    /// access. Idempotent: concurrent callers see the same session.
    pub async fn get_or_create(&self, call_id: &str) -> CallSession {
        self.inner
            .lock()
            .await
            .entry(call_id.to_string())
            .or_default()
            .clone()
    }

    /// Fetch an existing session without creating one. ASR-turn webhooks for
    /// unknown calls must see a not-found, not a fresh session.
    pub async fn get(&self, call_id: &str) -> Option<CallSession> {
        self.inner.lock().await.get(call_id).cloned()
    }

    /// Overwrite the stored session. Last writer wins; callers must have
    /// fetched fresh state first.
    pub async fn replace(&self, call_id: &str, session: CallSession) {
        self.inner.lock().await.insert(call_id.to_string(), session);
    }

    /// Read-modify-write under the lock. `f` must not block; it runs with
    /// the store locked and no suspension point in between.
    pub async fn update<F>(&self, call_id: &str, f: F)
    where
        F: FnOnce(&mut CallSession),
    {
        let mut map = self.inner.lock().await;
        f(map.entry(call_id.to_string()).or_default());
    }

    /// Append one turn and truncate to the trailing window.
    pub async fn append_turn(&self, call_id: &str, role: Role, content: &str) {
        let mut map = self.inner.lock().await;
        let session = map.entry(call_id.to_string()).or_default();
        session.transcript.push(Turn {
            role,
            content: content.to_string(),
        });
        if session.transcript.len() > TRANSCRIPT_WINDOW {
            let excess = session.transcript.len() - TRANSCRIPT_WINDOW;
            session.transcript.drain(..excess);
        }
    }

    pub async fn active_calls(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = SessionStore::new();
        store
            .update("call-1", |s| s.phone = "+15551234567".to_string())
            .await;

        let first = store.get_or_create("call-1").await;
        let second = store.get_or_create("call-1").await;
        assert_eq!(first.phone, "+15551234567");
        assert_eq!(second.phone, "+15551234567");
        assert_eq!(store.active_calls().await, 1);
    }

    #[tokio::test]
    async fn get_does_not_create() {
        let store = SessionStore::new();
        assert!(store.get("missing").await.is_none());
        assert_eq!(store.active_calls().await, 0);
    }

    #[tokio::test]
    async fn transcript_truncates_fifo() {
        let store = SessionStore::new();
        for i in 0..TRANSCRIPT_WINDOW + 10 {
            store
                .append_turn("call-1", Role::User, &format!("turn {i}"))
                .await;
        }

        let session = store.get("call-1").await.unwrap();
        assert_eq!(session.transcript.len(), TRANSCRIPT_WINDOW);
        // Earliest entries evicted first, order preserved
        assert_eq!(session.transcript[0].content, "turn 10");
        assert_eq!(
            session.transcript.last().unwrap().content,
            format!("turn {}", TRANSCRIPT_WINDOW + 9)
        );
    }

    #[tokio::test]
    async fn update_preserves_other_fields() {
        let store = SessionStore::new();
        store
            .update("call-1", |s| s.ticket_id = Some("42".to_string()))
            .await;
        store.update("call-1", |s| s.processing = true).await;

        let session = store.get("call-1").await.unwrap();
        assert_eq!(session.ticket_id.as_deref(), Some("42"));
        assert!(session.processing);
    }

    #[test]
    fn default_sentiment_is_neutral() {
        let session = CallSession::default();
        assert_eq!(session.sentiment, "Neutral");
        assert!(!session.processing);
        assert!(session.ticket_id.is_none());
    }

    #[test]
    fn placeholder_names() {
        assert!(is_placeholder_name(""));
        assert!(is_placeholder_name("  "));
        assert!(is_placeholder_name("unknown"));
        assert!(is_placeholder_name("Unknown"));
        assert!(is_placeholder_name("UNKNOWN"));
        assert!(is_placeholder_name("15551234567"));
        assert!(is_placeholder_name("+1 555 123 4567"));
        assert!(!is_placeholder_name("Maria"));
        assert!(!is_placeholder_name("John Smith"));
    }

    #[test]
    fn valid_contact_name_filters_placeholders() {
        let mut session = CallSession {
            contact_name: Some("+15551234567".to_string()),
            ..Default::default()
        };
        assert!(session.valid_contact_name().is_none());

        session.contact_name = Some("Maria".to_string());
        assert_eq!(session.valid_contact_name(), Some("Maria"));
    }
}
