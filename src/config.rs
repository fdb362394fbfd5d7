use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub vonage: VonageConfig,
    pub groq: GroqConfig,
    #[serde(default)]
    pub deepgram: DeepgramConfig,
    pub helpdesk: HelpdeskConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub turn: TurnConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public base URL Vonage can reach, e.g. an ngrok tunnel.
    pub external_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VonageConfig {
    pub application_id: String,
    #[serde(default = "default_private_key_path")]
    pub private_key_path: String,
}

fn default_private_key_path() -> String {
    "private.key".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GroqConfig {
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_whisper_model")]
    pub whisper_model: String,
}

fn default_llm_model() -> String {
    "llama-3.1-8b-instant".to_string()
}

fn default_whisper_model() -> String {
    "whisper-large-v3".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeepgramConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_deepgram_model")]
    pub model: String,
}

impl Default for DeepgramConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_deepgram_model(),
        }
    }
}

fn default_deepgram_model() -> String {
    "nova-2".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct HelpdeskConfig {
    /// Freshdesk-style domain, e.g. "acme.freshdesk.com".
    pub domain: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Organization name spoken in the greeting.
    #[serde(default = "default_org_name")]
    pub org_name: String,
    /// Fallback destination for transfers when the reply gives no number.
    #[serde(default = "default_transfer_number")]
    pub transfer_number: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            org_name: default_org_name(),
            transfer_number: default_transfer_number(),
        }
    }
}

fn default_org_name() -> String {
    "Voicedesk".to_string()
}

fn default_transfer_number() -> String {
    "18335645478".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TurnConfig {
    /// Silence after a final transcript that closes a streaming turn.
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,
    /// How long the answer path waits for the identity lookup before
    /// greeting anonymously.
    #[serde(default = "default_lookup_wait_ms")]
    pub lookup_wait_ms: u64,
    /// Ceiling on waiting for the identity lookup before a turn proceeds
    /// with whatever context is available.
    #[serde(default = "default_lookup_ceiling_ms")]
    pub lookup_ceiling_ms: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            silence_ms: default_silence_ms(),
            lookup_wait_ms: default_lookup_wait_ms(),
            lookup_ceiling_ms: default_lookup_ceiling_ms(),
        }
    }
}

fn default_silence_ms() -> u64 {
    300
}

fn default_lookup_wait_ms() -> u64 {
    400
}

fn default_lookup_ceiling_ms() -> u64 {
    2500
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env from the same directory as config.toml
        let env_path = config_dir().join(".env");
        match dotenvy::from_path(&env_path) {
            Ok(()) => tracing::info!("Loaded .env from {}", env_path.display()),
            Err(dotenvy::Error::Io(_)) => {
                tracing::debug!(
                    "No .env file at {}, using environment only",
                    env_path.display()
                );
            }
            Err(e) => tracing::warn!("Failed to parse .env: {e}"),
        }

        let path = config_path();
        tracing::info!("Loading config from {}", path.display());

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            format!(
                "Failed to read config at {}: {}. Copy config.example.toml to {}",
                path.display(),
                e,
                path.display()
            )
        })?;

        let mut config: Config = toml::from_str(&contents)?;

        // Env var overrides for secrets and tunnel URLs
        if let Ok(v) = std::env::var("VONAGE_APPLICATION_ID") {
            config.vonage.application_id = v;
        }
        if let Ok(v) = std::env::var("VONAGE_PRIVATE_KEY_PATH") {
            config.vonage.private_key_path = v;
        }
        if let Ok(v) = std::env::var("GROQ_API_KEY") {
            config.groq.api_key = v;
        }
        if let Ok(v) = std::env::var("DEEPGRAM_API_KEY") {
            config.deepgram.api_key = v;
        }
        if let Ok(v) = std::env::var("FRESH_DOMAIN") {
            config.helpdesk.domain = v;
        }
        if let Ok(v) = std::env::var("FRESH_API_KEY") {
            config.helpdesk.api_key = v;
        }
        if let Ok(v) = std::env::var("AGENT_NUMBER") {
            config.agent.transfer_number = v;
        }
        if let Ok(v) = std::env::var("PUBLIC_URL") {
            config.server.external_url = v;
        }

        Ok(config)
    }

    /// WebSocket URL for the caller audio stream, derived from the public URL.
    pub fn stream_url(&self) -> String {
        format!(
            "{}/voice/stream",
            self.server
                .external_url
                .replace("https://", "wss://")
                .replace("http://", "ws://")
        )
    }

    /// Webhook URL for turn-based ASR results.
    pub fn asr_url(&self) -> String {
        format!("{}/voice/asr", self.server.external_url)
    }

    /// Webhook URL for call lifecycle events.
    pub fn events_url(&self) -> String {
        format!("{}/voice/events", self.server.external_url)
    }
}

fn config_dir() -> PathBuf {
    if let Ok(p) = std::env::var("VOICEDESK_CONFIG") {
        // If pointing to a file, use its parent directory
        let path = PathBuf::from(p);
        return path.parent().map(|p| p.to_path_buf()).unwrap_or(path);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".voicedesk")
}

fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("VOICEDESK_CONFIG") {
        return PathBuf::from(p);
    }

    config_dir().join("config.toml")
}
