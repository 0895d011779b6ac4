use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use clausecheck::analysis::AnthropicClient;
use clausecheck::config::Settings;
use clausecheck::limits::{SemaphoreAdmission, SlidingWindowRateLimiter};
use clausecheck::pipeline::Pipeline;
use clausecheck::research::{ContextEnricher, PerplexityClient};
use clausecheck::server::{AppState, serve};

#[derive(Parser, Debug)]
#[command(name = "clausecheck", about = "Contract analysis API server", version)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "CLAUSECHECK_HOST", default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to bind.
    #[arg(long, env = "CLAUSECHECK_PORT", default_value_t = 8000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("clausecheck=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Arc::new(Settings::from_env().context("loading configuration")?);

    let completion = Arc::new(AnthropicClient::new(&settings).context("building analysis client")?);
    let enricher: Option<Arc<dyn ContextEnricher>> = match PerplexityClient::from_settings(&settings)
    {
        Some(client) => Some(Arc::new(client)),
        None => {
            tracing::info!("PERPLEXITY_API_KEY not set, legal research disabled");
            None
        }
    };
    let pipeline = Pipeline::new(Arc::clone(&settings), completion, enricher);

    let rate_limiter = Arc::new(SlidingWindowRateLimiter::per_minute(
        settings.rate_limit_per_minute,
    ));
    let admission = Arc::new(SemaphoreAdmission::new(settings.max_concurrent_analyses));
    let state = Arc::new(AppState::new(
        Arc::clone(&settings),
        pipeline,
        rate_limiter,
        admission,
    ));

    let addr = SocketAddr::new(cli.host, cli.port);
    serve(addr, state, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {err}");
        return;
    }
    tracing::info!("shutdown signal received");
}
