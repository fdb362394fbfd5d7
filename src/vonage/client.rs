use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;

/// API host used when the answer webhook did not name a regional endpoint.
const DEFAULT_API_URL: &str = "https://api.nexmo.com";

/// Token lifetime. Tokens are minted per request, so short is fine.
const TOKEN_TTL_SECS: i64 = 60;

#[derive(Serialize)]
struct Claims {
    application_id: String,
    iat: i64,
    exp: i64,
    jti: String,
}

/// Mid-call control over the telephony API: speak, stop speech, transfer,
/// hang up. Every request carries a freshly minted application JWT.
pub struct CallControlClient {
    client: reqwest::Client,
    application_id: String,
    private_key: Option<String>,
}

impl CallControlClient {
    /// Load the signing key at startup. A missing key is tolerated so the
    /// webhook-only flows still run; mid-call control then fails per call.
    pub fn new(application_id: String, private_key_path: &str) -> Self {
        let private_key = match std::fs::read_to_string(private_key_path) {
            Ok(pem) => Some(pem),
            Err(e) => {
                tracing::warn!(
                    path = private_key_path,
                    "Private key unavailable, mid-call control disabled: {e}"
                );
                None
            }
        };
        Self {
            client: reqwest::Client::new(),
            application_id,
            private_key,
        }
    }

    fn token(&self, jti_prefix: &str) -> Result<String, CallControlError> {
        let pem = self.private_key.as_ref().ok_or(CallControlError::MissingKey)?;
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            application_id: self.application_id.clone(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
            jti: format!("{jti_prefix}_{now}"),
        };
        let key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| CallControlError::Jwt(e.to_string()))?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| CallControlError::Jwt(e.to_string()))
    }

    fn base_url(region_url: Option<&str>) -> &str {
        region_url.filter(|u| !u.is_empty()).unwrap_or(DEFAULT_API_URL)
    }

    /// Speak text into the live call.
    pub async fn speak(
        &self,
        call_id: &str,
        region_url: Option<&str>,
        text: &str,
    ) -> Result<(), CallControlError> {
        let token = self.token("talk")?;
        let url = format!("{}/v1/calls/{call_id}/talk", Self::base_url(region_url));
        let resp = self
            .client
            .put(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "text": text, "language": "en-US" }))
            .send()
            .await
            .map_err(|e| CallControlError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CallControlError::Api(format!("{status}: {body}")));
        }
        Ok(())
    }

    /// Stop any speech currently playing into the call. A 404 means nothing
    /// was playing, which is a success for barge-in purposes.
    pub async fn stop_speech(
        &self,
        call_id: &str,
        region_url: Option<&str>,
    ) -> Result<(), CallControlError> {
        let token = self.token("stop")?;
        let url = format!("{}/v1/calls/{call_id}/talk", Self::base_url(region_url));
        let resp = self
            .client
            .delete(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CallControlError::Request(e.to_string()))?;

        if resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(CallControlError::Api(format!("{status}: {body}")))
        }
    }

    /// Transfer the live call to a phone endpoint.
    pub async fn transfer(
        &self,
        call_id: &str,
        region_url: Option<&str>,
        from: &str,
        to: &str,
    ) -> Result<(), CallControlError> {
        let token = self.token("transfer")?;
        let url = format!("{}/v1/calls/{call_id}", Self::base_url(region_url));
        let ncco = serde_json::json!([{
            "action": "connect",
            "from": e164(from),
            "timeout": 60,
            "endpoint": [{ "type": "phone", "number": e164(to) }],
        }]);
        let resp = self
            .client
            .put(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({
                "action": "transfer",
                "destination": { "type": "ncco", "ncco": ncco },
            }))
            .send()
            .await
            .map_err(|e| CallControlError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CallControlError::Api(format!("{status}: {body}")));
        }
        Ok(())
    }

    /// Hang up the live call.
    pub async fn hangup(
        &self,
        call_id: &str,
        region_url: Option<&str>,
    ) -> Result<(), CallControlError> {
        let token = self.token("hangup")?;
        let url = format!("{}/v1/calls/{call_id}", Self::base_url(region_url));
        let resp = self
            .client
            .put(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "action": "hangup" }))
            .send()
            .await
            .map_err(|e| CallControlError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CallControlError::Api(format!("{status}: {body}")));
        }
        Ok(())
    }
}

/// Digits only; the call-control API rejects formatted numbers.
fn e164(number: &str) -> String {
    number.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum CallControlError {
    #[error("No private key loaded; cannot sign call-control requests")]
    MissingKey,
    #[error("JWT signing failed: {0}")]
    Jwt(String),
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("Call API error: {0}")]
    Api(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e164_strips_formatting() {
        assert_eq!(e164("+1 (470) 555-0000"), "14705550000");
        assert_eq!(e164("18335645478"), "18335645478");
    }

    #[test]
    fn base_url_falls_back_to_default() {
        assert_eq!(CallControlClient::base_url(None), DEFAULT_API_URL);
        assert_eq!(CallControlClient::base_url(Some("")), DEFAULT_API_URL);
        assert_eq!(
            CallControlClient::base_url(Some("https://api-us-3.vonage.com")),
            "https://api-us-3.vonage.com"
        );
    }

    #[test]
    fn missing_key_fails_closed() {
        let client = CallControlClient::new("app".to_string(), "/nonexistent/private.key");
        assert!(matches!(
            client.token("talk"),
            Err(CallControlError::MissingKey)
        ));
    }
}
