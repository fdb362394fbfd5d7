use serde::Serialize;
use serde_json::Value;

use crate::helpdesk::{TicketSummary, PRIORITY_URGENT, STATUS_PENDING, STATUS_RESOLVED};
use crate::session::Turn;

/// How many trailing transcript turns the generator sees. The stored
/// transcript is longer; the prompt window is deliberately tighter.
const HISTORY_WINDOW: usize = 12;

const MAX_TOKENS: u32 = 600;
const TEMPERATURE: f32 = 0.3;

/// Everything a single reply generation needs, pulled from the session
/// before the call.
pub struct GenerationRequest<'a> {
    pub issue: &'a str,
    pub kb: &'a str,
    pub history: &'a [Turn],
    pub contact_name: Option<&'a str>,
    pub recent_tickets: &'a [TicketSummary],
    pub active_ticket_id: Option<&'a str>,
    pub phone: Option<&'a str>,
}

/// Chat-completion client for reply generation.
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

impl LlmClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    /// Generate the assistant reply for one turn. The returned text still
    /// carries its inline action/sentiment tags; the caller parses them.
    pub async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, LlmError> {
        let system = build_system_prompt(request);
        let user = format!("Issue: {}\n\nKB Context:\n{}", request.issue, request.kb);

        let mut messages = vec![ChatMessage {
            role: "system",
            content: &system,
        }];
        let start = request.history.len().saturating_sub(HISTORY_WINDOW);
        for turn in &request.history[start..] {
            messages.push(ChatMessage {
                role: turn.role.as_str(),
                content: &turn.content,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &user,
        });

        let resp = self
            .client
            .post("https://api.groq.com/openai/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": messages,
                "max_tokens": MAX_TOKENS,
                "temperature": TEMPERATURE,
            }))
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{status}: {body}")));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        body.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| LlmError::Api("empty completion".to_string()))
    }
}

fn build_system_prompt(request: &GenerationRequest<'_>) -> String {
    let mut prompt = String::from(
        "You are a friendly voice support agent on a live phone call. Keep replies short \
         and speakable: one or two sentences, no lists, no markdown.\n\
         \n\
         IDENTITY: If you do not know the caller's name, ask for it once, early. When the \
         caller states their name, include [ACTION: UPDATE_NAME: <name>] in your reply.\n\
         \n\
         TICKETS: When the caller describes a new issue that needs follow-up, include \
         [ACTION: CREATE_TICKET: <short issue summary>]. If the issue matches one of the \
         recent tickets listed below, include [ACTION: USE_TICKET: <id>] instead of \
         creating a duplicate. When the caller confirms the issue is fixed, include \
         [ACTION: RESOLVE_TICKET]. Never speak ticket id numbers to the caller.\n\
         \n\
         ESCALATION: If the caller has a High or Urgent priority ticket, acknowledge the \
         urgency and offer to transfer them to a human agent. If the caller asks for a \
         human, include [ACTION: TRANSFER] (or [ACTION: TRANSFER: <number>] if they give \
         a number). When the caller says goodbye or the issue is done, say a short \
         goodbye and include [ACTION: HANGUP]. If the caller asks you to hold, include \
         [ACTION: WAIT].\n\
         \n\
         Always end your reply with exactly one [SENTIMENT: <Happy|Neutral|Frustrated|Angry>] \
         tag reflecting the caller's mood.",
    );

    if request.contact_name.is_some() || request.phone.is_some() {
        prompt.push_str("\n\nCUSTOMER INFO:");
        if let Some(name) = request.contact_name {
            prompt.push_str(&format!("\n- Name: {name}"));
        }
        if let Some(phone) = request.phone {
            prompt.push_str(&format!("\n- Phone: {phone}"));
        }
    }

    if !request.recent_tickets.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&format_ticket_context(request.recent_tickets));
        if request.recent_tickets.iter().any(|t| t.is_high_priority()) {
            prompt.push_str(
                "\nThis caller has a high-priority ticket. Acknowledge it and offer a \
                 transfer to a human agent.",
            );
        }
        if mentions_prior_issue(request.issue) {
            prompt.push_str(
                "\nThe caller is referring to an earlier issue. Match it against the \
                 recent tickets above and use USE_TICKET rather than creating a new one.",
            );
        }
    }

    if let Some(id) = request.active_ticket_id {
        prompt.push_str(&format!(
            "\n\nACTIVE_SESSION_TICKET_ID: {id}\n\
             A ticket already exists for this call. Do not create another; use \
             USE_TICKET or RESOLVE_TICKET against it."
        ));
    }

    prompt
}

fn status_label(status: u8) -> &'static str {
    match status {
        STATUS_PENDING => "Pending",
        STATUS_RESOLVED => "Resolved",
        _ => "Open",
    }
}

fn priority_label(priority: u8) -> &'static str {
    match priority {
        PRIORITY_URGENT => "Urgent",
        3 => "High",
        2 => "Medium",
        _ => "Low",
    }
}

fn format_ticket_context(tickets: &[TicketSummary]) -> String {
    let mut block = String::from("RECENT_TICKETS:");
    for ticket in tickets {
        let desc: String = ticket.description_text.chars().take(100).collect();
        block.push_str(&format!(
            "\n- id {} [{} / {}] {}: {}",
            ticket.id,
            status_label(ticket.status),
            priority_label(ticket.priority),
            ticket.subject,
            desc
        ));
    }
    block
}

/// Heuristic for "the caller is talking about something they reported
/// before", which should bias the generator toward USE_TICKET.
fn mentions_prior_issue(issue: &str) -> bool {
    const CUES: &[&str] = &[
        "last time",
        "called before",
        "called earlier",
        "still",
        "again",
        "my ticket",
        "existing ticket",
        "previous",
        "earlier issue",
        "same issue",
        "same problem",
    ];
    let lower = issue.to_lowercase();
    CUES.iter().any(|cue| lower.contains(cue))
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited by completion API")]
    RateLimited,
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("Completion API error: {0}")]
    Api(String),
}
