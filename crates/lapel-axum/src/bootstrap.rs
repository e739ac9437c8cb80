//! Server bootstrap - the composition root.
//!
//! This module is the ONLY place where infrastructure is wired together:
//! settings are validated, the HTTP engines are constructed, the session
//! registry and download store are created, and the sweeper task is
//! spawned. Handlers receive everything through [`ServerContext`]; no
//! ambient globals leak into handler bodies.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use lapel_core::settings::Settings;
use lapel_engines::{EngineConfig, HttpReplyGenerator, HttpSpeechSynthesis, HttpSpeechToText};
use lapel_pipeline::controller::Engines;
use lapel_pipeline::downloads::{DownloadStore, DOWNLOADS_DIR};
use lapel_pipeline::registry::SessionRegistry;
use lapel_pipeline::sweeper;

/// Everything the handlers need, wired once at startup.
pub struct ServerContext {
    pub settings: Arc<Settings>,
    pub registry: Arc<SessionRegistry>,
    pub downloads: Arc<DownloadStore>,
    /// Collaborator engine names reported by `/health`.
    pub engine_names: Vec<String>,
    started_at: Instant,
    sweeper: JoinHandle<()>,
}

impl ServerContext {
    /// Seconds since the server came up.
    #[must_use]
    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Graceful teardown: ask every session to shut down and stop the
    /// sweeper.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down sessions");
        self.registry.shutdown_all().await;
        self.sweeper.abort();
    }
}

/// Bind and serve until ctrl-c, then tear the sessions down.
pub async fn serve(ctx: crate::state::AppState) -> Result<()> {
    let bind_addr = format!("{}:{}", ctx.settings.host, ctx.settings.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "lapel listening");

    let app = crate::routes::create_router(Arc::clone(&ctx));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(ctx))
        .await
        .context("server error")
}

async fn shutdown_signal(ctx: crate::state::AppState) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
    ctx.shutdown().await;
}

/// Bootstrap with the default HTTP-backed collaborator engines.
pub async fn bootstrap(settings: Settings) -> Result<ServerContext> {
    let config = EngineConfig::from_settings(&settings);
    let engines = Engines {
        stt: Arc::new(HttpSpeechToText::new(&config).context("building STT engine")?),
        llm: Arc::new(HttpReplyGenerator::new(&config).context("building LLM engine")?),
        tts: Arc::new(HttpSpeechSynthesis::new(&config).context("building TTS engine")?),
    };
    bootstrap_with_engines(settings, engines)
}

/// Bootstrap with injected collaborator engines (tests, embedded setups).
pub fn bootstrap_with_engines(settings: Settings, engines: Engines) -> Result<ServerContext> {
    settings
        .validate()
        .context("settings failed startup validation")?;

    tracing::info!(
        temp_dir = %settings.temp_dir.display(),
        chunk_size = settings.chunk_size_bytes,
        "bootstrapping lapel"
    );

    let settings = Arc::new(settings);
    let downloads = Arc::new(DownloadStore::new(
        settings.temp_dir.join(DOWNLOADS_DIR),
        settings.download_ttl,
    ));
    let engine_names = vec![
        engines.stt.engine_name().to_string(),
        engines.llm.engine_name().to_string(),
        engines.tts.engine_name().to_string(),
    ];
    let registry = Arc::new(SessionRegistry::new(
        Arc::clone(&settings),
        engines,
        Arc::clone(&downloads),
    ));
    let sweeper = sweeper::spawn(
        Arc::clone(&settings),
        Arc::clone(&registry),
        Arc::clone(&downloads),
    );

    Ok(ServerContext {
        settings,
        registry,
        downloads,
        engine_names,
        started_at: Instant::now(),
        sweeper,
    })
}
