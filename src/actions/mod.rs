pub mod executor;

use std::sync::LazyLock;

use regex::Regex;

/// A structured command embedded inline in a generated reply.
///
/// The wire form is a bracketed mini-grammar, not JSON:
/// `[ACTION: KIND]`, `[ACTION: KIND: payload]`, `[SENTIMENT: label]`.
/// Kinds this build does not know about come back as [`ActionTag::Unknown`]
/// so newer generator prompts degrade gracefully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionTag {
    CreateTicket(String),
    UseTicket(String),
    ResolveTicket(Option<String>),
    UpdateName(String),
    Transfer(Option<String>),
    Hangup,
    Wait,
    Sentiment(String),
    Unknown {
        kind: String,
        payload: Option<String>,
    },
}

/// A reply split into what gets spoken and what gets executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    /// Tag-free text for TTS, whitespace normalized.
    pub speech: String,
    /// Tags in their original left-to-right order.
    pub tags: Vec<ActionTag>,
}

impl ParsedReply {
    pub fn sentiment(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| match t {
            ActionTag::Sentiment(label) => Some(label.as_str()),
            _ => None,
        })
    }
}

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(ACTION|SENTIMENT):\s*([^\]]+)\]").expect("tag regex"));

// The generator is instructed never to reveal ticket identifiers; these
// scrub any that slip into the spoken text anyway.
static TICKET_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\(?ID:\s*\d+\)?").expect("ticket id regex"));
static TICKET_PHRASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)ticket\s+id\s*[:#]?\s*\d*").expect("ticket phrase regex"));

/// Extract all inline tags from a generated reply and return the clean
/// spoken text alongside them.
pub fn parse_reply(raw: &str) -> ParsedReply {
    let mut tags = Vec::new();
    for cap in TAG_RE.captures_iter(raw) {
        let family = &cap[1];
        let content = cap[2].trim();
        tags.push(match family {
            "SENTIMENT" => ActionTag::Sentiment(capitalize_label(content)),
            _ => parse_action(content),
        });
    }

    let without_tags = TAG_RE.replace_all(raw, "");
    let speech = scrub_ticket_ids(&without_tags);

    ParsedReply { speech, tags }
}

/// Strip tags from text without interpreting them. Used when rendering the
/// transcript for ticket notes.
pub fn strip_tags(text: &str) -> String {
    normalize_whitespace(&TAG_RE.replace_all(text, ""))
}

fn parse_action(content: &str) -> ActionTag {
    let (kind, payload) = match content.split_once(':') {
        Some((k, p)) => (k.trim(), Some(p.trim())),
        None => (content, None),
    };
    let payload_string = payload
        .filter(|p| !p.is_empty())
        .map(|p| p.to_string());

    match kind.to_ascii_uppercase().as_str() {
        "CREATE_TICKET" => ActionTag::CreateTicket(
            payload_string.unwrap_or_else(|| "No description provided".to_string()),
        ),
        "USE_TICKET" => match payload_string {
            Some(id) => ActionTag::UseTicket(id),
            None => ActionTag::Unknown {
                kind: "USE_TICKET".to_string(),
                payload: None,
            },
        },
        "RESOLVE_TICKET" => ActionTag::ResolveTicket(payload_string),
        "UPDATE_NAME" => match payload_string {
            Some(name) => ActionTag::UpdateName(name),
            None => ActionTag::Unknown {
                kind: "UPDATE_NAME".to_string(),
                payload: None,
            },
        },
        "TRANSFER" => ActionTag::Transfer(payload_string),
        "HANGUP" => ActionTag::Hangup,
        "WAIT" => ActionTag::Wait,
        other => ActionTag::Unknown {
            kind: other.to_string(),
            payload: payload_string,
        },
    }
}

fn scrub_ticket_ids(text: &str) -> String {
    // Phrase form first: it subsumes the bare `ID: 123` pattern, which
    // would otherwise eat the digits and leave a dangling "ticket".
    let text = TICKET_PHRASE_RE.replace_all(text, "");
    let text = TICKET_ID_RE.replace_all(&text, "");
    normalize_whitespace(&text)
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn capitalize_label(label: &str) -> String {
    let lower = label.trim().to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => lower,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_speech_and_tags_in_order() {
        let parsed =
            parse_reply("Sure. [ACTION: CREATE_TICKET: printer jam] [SENTIMENT: Neutral]");
        assert_eq!(parsed.speech, "Sure.");
        assert_eq!(
            parsed.tags,
            vec![
                ActionTag::CreateTicket("printer jam".to_string()),
                ActionTag::Sentiment("Neutral".to_string()),
            ]
        );
    }

    #[test]
    fn tags_anywhere_in_text() {
        let parsed = parse_reply(
            "I can help. [ACTION: USE_TICKET: 42] Let me check that for you. [SENTIMENT: angry]",
        );
        assert_eq!(parsed.speech, "I can help. Let me check that for you.");
        assert_eq!(
            parsed.tags,
            vec![
                ActionTag::UseTicket("42".to_string()),
                ActionTag::Sentiment("Angry".to_string()),
            ]
        );
    }

    #[test]
    fn sentiment_label_is_capitalized() {
        let parsed = parse_reply("Bye. [SENTIMENT: HAPPY]");
        assert_eq!(parsed.sentiment(), Some("Happy"));
    }

    #[test]
    fn bare_action_kinds() {
        let parsed = parse_reply("Goodbye! [ACTION: RESOLVE_TICKET] [ACTION: HANGUP]");
        assert_eq!(
            parsed.tags,
            vec![ActionTag::ResolveTicket(None), ActionTag::Hangup]
        );
        assert_eq!(parsed.speech, "Goodbye!");
    }

    #[test]
    fn transfer_with_and_without_number() {
        assert_eq!(
            parse_reply("[ACTION: TRANSFER]").tags,
            vec![ActionTag::Transfer(None)]
        );
        assert_eq!(
            parse_reply("[ACTION: TRANSFER: 14705550000]").tags,
            vec![ActionTag::Transfer(Some("14705550000".to_string()))]
        );
    }

    #[test]
    fn unknown_kind_passes_through() {
        let parsed = parse_reply("Okay. [ACTION: ESCALATE_TO_MANAGER: asap]");
        assert_eq!(
            parsed.tags,
            vec![ActionTag::Unknown {
                kind: "ESCALATE_TO_MANAGER".to_string(),
                payload: Some("asap".to_string()),
            }]
        );
        assert_eq!(parsed.speech, "Okay.");
    }

    #[test]
    fn scrubs_literal_ticket_ids_outside_tags() {
        let parsed = parse_reply("I found your request (ID: 69) in our system.");
        assert_eq!(parsed.speech, "I found your request in our system.");

        let parsed = parse_reply("Your ticket id: 123 is open.");
        assert_eq!(parsed.speech, "Your is open.");
    }

    #[test]
    fn whitespace_is_normalized() {
        let parsed = parse_reply("Hello   there.\n\n[ACTION: WAIT]  How can I help?");
        assert_eq!(parsed.speech, "Hello there. How can I help?");
        assert_eq!(parsed.tags, vec![ActionTag::Wait]);
    }

    #[test]
    fn strip_tags_keeps_plain_text() {
        assert_eq!(
            strip_tags("Glad to help! [ACTION: RESOLVE_TICKET] [ACTION: HANGUP]"),
            "Glad to help!"
        );
    }

    #[test]
    fn no_tags_means_no_actions() {
        let parsed = parse_reply("Just a plain sentence.");
        assert!(parsed.tags.is_empty());
        assert_eq!(parsed.speech, "Just a plain sentence.");
    }

    #[test]
    fn create_ticket_description_keeps_colons() {
        let parsed = parse_reply("[ACTION: CREATE_TICKET: VPN error: code 619]");
        assert_eq!(
            parsed.tags,
            vec![ActionTag::CreateTicket("VPN error: code 619".to_string())]
        );
    }
}
