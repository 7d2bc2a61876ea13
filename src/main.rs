//! Calvox server binary: wire the collaborators together and serve.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use calvox::agent::{AgentConfig, AgentLoop};
use calvox::auth::SessionAuth;
use calvox::calendar::{CalendarToolEngine, FileCredentialStore, GoogleCalendar};
use calvox::config::Config;
use calvox::history::HistoryStore;
use calvox::provider::OpenAiChatProvider;
use calvox::server::{self, AppState};
use calvox::tools::{calendar::register_calendar_tools, ToolRegistry};

#[derive(Parser)]
#[command(name = "calvox", about = "Voice and text calendar assistant server")]
struct Args {
    /// Bind address, overriding BIND_ADDR.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the environment may be set directly.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("calvox=info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env().context("loading configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let credentials = Arc::new(
        FileCredentialStore::new(Config::dir().join("credentials"))
            .context("opening credential store")?,
    );
    let calendar = Arc::new(GoogleCalendar::new(config.calendar_api_base.clone()));
    let engine = Arc::new(CalendarToolEngine::new(credentials, calendar));

    let mut registry = ToolRegistry::new();
    register_calendar_tools(&mut registry, engine);
    let registry = Arc::new(registry);

    let history = Arc::new(HistoryStore::new().context("opening history store")?);
    let provider = Arc::new(OpenAiChatProvider::new(
        config.chat_api_base.clone(),
        config.model_api_key.clone(),
        config.chat_model.clone(),
    ));
    let agent = Arc::new(AgentLoop::new(
        provider,
        Arc::clone(&registry),
        history,
        AgentConfig::default(),
    ));

    let state = AppState {
        agent,
        registry,
        auth: Arc::new(SessionAuth::new(&config.jwt_secret)),
        config: config.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "calvox listening");
    axum::serve(listener, server::router(state))
        .await
        .context("serving")?;
    Ok(())
}
