mod actions;
mod config;
mod greeting;
mod helpdesk;
mod ncco;
mod orchestrator;
mod pipeline;
mod session;
mod vonage;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::helpdesk::HelpdeskClient;
use crate::pipeline::llm::LlmClient;
use crate::pipeline::stt::SttClient;
use crate::session::SessionStore;
use crate::vonage::client::CallControlClient;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared server state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: SessionStore,
    pub stt: Arc<SttClient>,
    pub llm: Arc<LlmClient>,
    pub helpdesk: Arc<HelpdeskClient>,
    pub call_control: Arc<CallControlClient>,
}

#[tokio::main]
async fn main() {
    match std::env::args().nth(1).as_deref() {
        Some("--version" | "-V") => println!("voicedesk {VERSION}"),
        Some("--help" | "-h") => print_help(),
        Some(other) => {
            eprintln!("Unknown argument: {other}");
            print_help();
            std::process::exit(2);
        }
        None => serve().await,
    }
}

fn print_help() {
    println!("voicedesk {VERSION} - voice support agent server");
    println!();
    println!("Usage: voicedesk [--version | --help]");
    println!();
    println!("Runs the webhook/stream server. Configuration is read from");
    println!("~/.voicedesk/config.toml (override with VOICEDESK_CONFIG).");
}

async fn serve() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("voicedesk=info,tower_http=info")),
        )
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration error: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(version = VERSION, "Starting voicedesk");
    tracing::info!(public_url = %config.server.external_url, "Webhook base");
    if config.deepgram.api_key.is_empty() {
        tracing::info!("No streaming transcriber key; calls run in turn-based mode");
    }

    let state = AppState {
        store: SessionStore::new(),
        stt: Arc::new(SttClient::new(
            config.groq.api_key.clone(),
            config.groq.whisper_model.clone(),
        )),
        llm: Arc::new(LlmClient::new(
            config.groq.api_key.clone(),
            config.groq.model.clone(),
        )),
        helpdesk: Arc::new(HelpdeskClient::new(
            &config.helpdesk.domain,
            &config.helpdesk.api_key,
        )),
        call_control: Arc::new(CallControlClient::new(
            config.vonage.application_id.clone(),
            &config.vonage.private_key_path,
        )),
        config: Arc::new(config),
    };

    let app = Router::new()
        .route("/voice/answer", get(vonage::webhook::answer))
        .route("/voice/asr", post(vonage::webhook::asr))
        .route("/voice/events", post(vonage::webhook::events))
        .route("/voice/stream", get(vonage::stream::stream))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Cannot bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on {addr}");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": VERSION,
        "active_calls": state.store.active_calls().await,
    }))
}
