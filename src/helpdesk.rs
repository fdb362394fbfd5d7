use std::sync::LazyLock;
use std::time::Duration;

use base64::Engine;
use regex::Regex;
use serde::Deserialize;

use crate::actions::strip_tags;
use crate::session::{Role, Turn};

/// Freshdesk ticket status codes.
pub const STATUS_OPEN: u8 = 2;
pub const STATUS_PENDING: u8 = 3;
pub const STATUS_RESOLVED: u8 = 4;

/// High and Urgent priority codes, which trigger the escalation flow.
pub const PRIORITY_HIGH: u8 = 3;
pub const PRIORITY_URGENT: u8 = 4;

/// How many recent tickets are surfaced to the reply generator.
const RECENT_TICKET_CAP: usize = 2;

/// KB lookups must not hold up a voice turn.
const KB_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Deserialize)]
pub struct Contact {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
}

/// The slice of a ticket the reply generator needs for matching.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketSummary {
    pub id: u64,
    pub status: u8,
    pub priority: u8,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub description_text: String,
}

impl TicketSummary {
    pub fn is_high_priority(&self) -> bool {
        self.priority == PRIORITY_HIGH || self.priority == PRIORITY_URGENT
    }
}

/// Freshdesk-style REST client: contacts, tickets, notes, KB search.
pub struct HelpdeskClient {
    client: reqwest::Client,
    base: String,
    domain: String,
    auth_header: String,
}

impl HelpdeskClient {
    pub fn new(domain: &str, api_key: &str) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{api_key}:X"));
        Self {
            client: reqwest::Client::new(),
            base: format!("https://{domain}/api/v2"),
            domain: domain.to_string(),
            auth_header: format!("Basic {encoded}"),
        }
    }

    /// Search for a contact by phone, trying both the ten-digit and full
    /// formats against phone and mobile fields.
    pub async fn find_contact(&self, phone: &str) -> Result<Option<Contact>, HelpdeskError> {
        let query = contact_query(phone);
        if query.is_empty() {
            return Ok(None);
        }

        #[derive(Deserialize)]
        struct SearchResults {
            #[serde(default)]
            results: Vec<Contact>,
        }

        let url = format!("{}/search/contacts", self.base);
        let resp = self
            .client
            .get(&url)
            .query(&[("query", format!("\"{query}\""))])
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .map_err(|e| HelpdeskError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(HelpdeskError::Api(format!("{status}: {body}")));
        }

        let parsed: SearchResults = resp
            .json()
            .await
            .map_err(|e| HelpdeskError::Request(e.to_string()))?;

        Ok(parsed.results.into_iter().next())
    }

    pub async fn create_contact(&self, name: &str, phone: &str) -> Result<Contact, HelpdeskError> {
        let url = format!("{}/contacts", self.base);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", &self.auth_header)
            .json(&serde_json::json!({ "name": name, "phone": phone }))
            .send()
            .await
            .map_err(|e| HelpdeskError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(HelpdeskError::Api(format!("{status}: {body}")));
        }

        resp.json()
            .await
            .map_err(|e| HelpdeskError::Request(e.to_string()))
    }

    pub async fn rename_contact(&self, contact_id: u64, name: &str) -> Result<(), HelpdeskError> {
        let url = format!("{}/contacts/{contact_id}", self.base);
        let resp = self
            .client
            .put(&url)
            .header("Authorization", &self.auth_header)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(|e| HelpdeskError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(HelpdeskError::Api(format!("{status}: {body}")));
        }
        Ok(())
    }

    /// The contact's open/pending tickets, newest first, capped at two.
    pub async fn list_open_tickets(
        &self,
        contact_id: u64,
    ) -> Result<Vec<TicketSummary>, HelpdeskError> {
        let url = format!("{}/tickets", self.base);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("requester_id", contact_id.to_string()),
                ("include", "description".to_string()),
                ("order_by", "created_at".to_string()),
                ("order_type", "desc".to_string()),
            ])
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .map_err(|e| HelpdeskError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(HelpdeskError::Api(format!("{status}: {body}")));
        }

        let all: Vec<TicketSummary> = resp
            .json()
            .await
            .map_err(|e| HelpdeskError::Request(e.to_string()))?;

        Ok(filter_open_tickets(all))
    }

    /// Create a ticket for this call. Returns the new ticket id.
    pub async fn create_ticket(
        &self,
        call_id: &str,
        description: &str,
        phone: Option<&str>,
        sentiment: &str,
        requester_id: Option<u64>,
    ) -> Result<Option<String>, HelpdeskError> {
        let mut payload = serde_json::json!({
            "description": format!("Call ID: {call_id}\n\nLast issue: {description}"),
            "subject": ticket_subject(description),
            "priority": 1,
            "status": STATUS_OPEN,
            "source": 3, // Phone
            "tags": ["voicedesk", format!("Sentiment_{sentiment}")],
        });
        if let Some(id) = requester_id {
            payload["requester_id"] = serde_json::json!(id);
        } else if let Some(phone) = phone {
            payload["phone"] = serde_json::json!(phone);
        }

        let url = format!("{}/tickets", self.base);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", &self.auth_header)
            .json(&payload)
            .send()
            .await
            .map_err(|e| HelpdeskError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(HelpdeskError::Api(format!("{status}: {body}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| HelpdeskError::Request(e.to_string()))?;

        let id = body
            .get("id")
            .or_else(|| body.pointer("/ticket/id"))
            .and_then(|v| v.as_u64())
            .map(|id| id.to_string());
        Ok(id)
    }

    pub async fn set_ticket_status(
        &self,
        ticket_id: u64,
        status: u8,
    ) -> Result<(), HelpdeskError> {
        let url = format!("{}/tickets/{ticket_id}", self.base);
        let resp = self
            .client
            .put(&url)
            .header("Authorization", &self.auth_header)
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await
            .map_err(|e| HelpdeskError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(HelpdeskError::Api(format!("{status}: {body}")));
        }
        Ok(())
    }

    /// Attach the call transcript to the ticket as a private note.
    pub async fn append_note(
        &self,
        ticket_id: &str,
        transcript: &[Turn],
    ) -> Result<(), HelpdeskError> {
        if transcript.is_empty() {
            return Ok(());
        }

        let url = format!("{}/tickets/{ticket_id}/notes", self.base);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", &self.auth_header)
            .json(&serde_json::json!({
                "body": render_transcript_html(transcript),
                "private": true,
            }))
            .send()
            .await
            .map_err(|e| HelpdeskError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(HelpdeskError::Api(format!("{status}: {body}")));
        }
        Ok(())
    }

    /// Best-effort KB search against the public solutions endpoint.
    /// Returns an empty string on any failure; a voice turn never waits on
    /// this beyond the short timeout.
    pub async fn search_kb(&self, query: &str) -> String {
        let term = kb_search_term(query);
        if term.is_empty() {
            return String::new();
        }

        let url = format!("https://{}/support/search/solutions.json", self.domain);
        let resp = match self
            .client
            .get(&url)
            .query(&[("term", term.as_str())])
            .timeout(KB_TIMEOUT)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!(status = %r.status(), "KB search non-success");
                return String::new();
            }
            Err(e) => {
                tracing::debug!("KB search failed: {e}");
                return String::new();
            }
        };

        let body: serde_json::Value = match resp.json().await {
            Ok(v) => v,
            Err(_) => return String::new(),
        };

        let articles = body
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();

        let snippets: Vec<String> = articles
            .iter()
            .take(3)
            .filter_map(|art| {
                let title = strip_html(art.get("title")?.as_str()?);
                let desc = art
                    .get("description")
                    .or_else(|| art.get("description_text"))
                    .or_else(|| art.get("desc"))
                    .and_then(|v| v.as_str())
                    .map(strip_html)
                    .unwrap_or_default();
                let desc: String = desc.chars().take(120).collect();
                Some(format!("• {title}: {desc}"))
            })
            .collect();

        snippets.join("\n")
    }
}

/// Filter to open/pending and truncate to the ticket cap.
fn filter_open_tickets(all: Vec<TicketSummary>) -> Vec<TicketSummary> {
    all.into_iter()
        .filter(|t| t.status == STATUS_OPEN || t.status == STATUS_PENDING)
        .take(RECENT_TICKET_CAP)
        .collect()
}

/// Build the phone search query, matching both full and ten-digit forms.
fn contact_query(phone: &str) -> String {
    let full: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if full.is_empty() {
        return String::new();
    }
    let ten = if full.len() >= 10 {
        &full[full.len() - 10..]
    } else {
        full.as_str()
    };
    format!(
        "(phone:'{ten}' OR mobile:'{ten}' OR phone:'{full}' OR mobile:'{full}' OR phone:'+{full}')"
    )
}

fn ticket_subject(description: &str) -> String {
    let head: String = description.chars().take(30).collect();
    format!("Voice Support Call - {head}...")
}

/// Condense a spoken query into a few keywords for the KB search.
fn kb_search_term(query: &str) -> String {
    static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").expect("regex"));
    let lower = query.to_lowercase();
    let cleaned = NON_WORD.replace_all(&lower, "");
    cleaned
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .take(6)
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_html(text: &str) -> String {
    static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("regex"));
    TAG.replace_all(text, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render the conversation as HTML for a ticket note, with action tags
/// stripped so agents see only what was said.
fn render_transcript_html(transcript: &[Turn]) -> String {
    let mut html = String::from(
        "<h3>Call Transcript</h3><div style='font-family: sans-serif; line-height: 1.6;'>",
    );
    for turn in transcript {
        let content = strip_tags(&turn.content);
        match turn.role {
            Role::User => {
                html.push_str(&format!(
                    "<p><b>User:</b> <span style='color: #2c3e50;'>{content}</span></p>"
                ));
            }
            Role::Assistant => {
                html.push_str(&format!(
                    "<p><b>Assistant:</b> <span style='color: #2980b9;'>{content}</span></p>"
                ));
            }
        }
    }
    html.push_str("</div><hr><p><small><i>Generated by Voicedesk</i></small></p>");
    html
}

#[derive(Debug, thiserror::Error)]
pub enum HelpdeskError {
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("Helpdesk API error: {0}")]
    Api(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(id: u64, status: u8, priority: u8) -> TicketSummary {
        TicketSummary {
            id,
            status,
            priority,
            subject: format!("ticket {id}"),
            description_text: String::new(),
        }
    }

    #[test]
    fn contact_query_uses_both_digit_forms() {
        let q = contact_query("+1 (555) 123-4567");
        assert!(q.contains("phone:'5551234567'"));
        assert!(q.contains("phone:'15551234567'"));
        assert!(q.contains("phone:'+15551234567'"));
    }

    #[test]
    fn contact_query_empty_for_no_digits() {
        assert_eq!(contact_query("unknown"), "");
    }

    #[test]
    fn open_ticket_filter_caps_at_two() {
        let all = vec![
            ticket(1, STATUS_OPEN, 1),
            ticket(2, STATUS_RESOLVED, 1),
            ticket(3, STATUS_PENDING, 2),
            ticket(4, STATUS_OPEN, 1),
        ];
        let filtered = filter_open_tickets(all);
        assert_eq!(
            filtered.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![1, 3]
        );
    }

    #[test]
    fn high_priority_detection() {
        assert!(ticket(1, STATUS_OPEN, PRIORITY_HIGH).is_high_priority());
        assert!(ticket(1, STATUS_OPEN, PRIORITY_URGENT).is_high_priority());
        assert!(!ticket(1, STATUS_OPEN, 1).is_high_priority());
    }

    #[test]
    fn subject_truncates_long_descriptions() {
        let subject = ticket_subject("my internet keeps dropping every few minutes at home");
        assert!(subject.starts_with("Voice Support Call - "));
        assert!(subject.len() < 60);
    }

    #[test]
    fn kb_term_keeps_meaningful_words() {
        assert_eq!(
            kb_search_term("My printer is jammed, again!"),
            "printer jammed again"
        );
        assert_eq!(kb_search_term("ok"), "");
    }

    #[test]
    fn strip_html_flattens_markup() {
        assert_eq!(
            strip_html("<p>Reset your <b>router</b></p>"),
            "Reset your router"
        );
    }

    #[test]
    fn transcript_html_strips_action_tags() {
        let transcript = vec![
            Turn {
                role: Role::User,
                content: "my internet is down".to_string(),
            },
            Turn {
                role: Role::Assistant,
                content: "Let me help. [ACTION: CREATE_TICKET: internet down] [SENTIMENT: Sad]"
                    .to_string(),
            },
        ];
        let html = render_transcript_html(&transcript);
        assert!(html.contains("my internet is down"));
        assert!(html.contains("Let me help."));
        assert!(!html.contains("ACTION"));
        assert!(!html.contains("SENTIMENT"));
    }
}
