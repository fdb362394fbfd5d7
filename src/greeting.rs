use crate::session::is_placeholder_name;

/// Greeting spoken when a call is answered.
///
/// Personalized only when the looked-up name is a real name; numeric or
/// placeholder names greet anonymously.
pub fn answer_greeting(org_name: &str, contact_name: Option<&str>) -> String {
    match contact_name.filter(|n| !is_placeholder_name(n)) {
        Some(name) => format!(
            "Hello {name}. Welcome back to {org_name} support. How can I help you today?"
        ),
        None => format!("Hello. Welcome to {org_name} support. How can I help you today?"),
    }
}
