use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use code_synth::config::ServiceConfig;
use code_synth::engine::{GenerationEngine, ModelHandle};
use code_synth::service::CodeSynthService;
use code_synth::transport;

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::load().context("loading configuration")?;
    init_tracing(&config.log_filter);

    // No model, no service.
    let handle = ModelHandle::load(&config.model).context("loading model")?;
    let service = Arc::new(
        CodeSynthService::start(GenerationEngine::new(handle), &config)
            .context("starting generation worker")?,
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let app = transport::router(Arc::clone(&service));
    let bind = config.bind.clone();
    let engine = service.engine_description().to_string();
    runtime.block_on(async move {
        let listener = TcpListener::bind(&bind)
            .await
            .with_context(|| format!("binding {}", bind))?;
        info!(addr = %bind, engine = %engine, "code synthesis service ready");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("serving HTTP")
    })?;

    service.shutdown();
    Ok(())
}
