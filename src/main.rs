mod config;
mod inspect;
mod lifecycle;
mod sandbox;
mod server;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::Request;
use clap::Parser;
use dotenvy::dotenv;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::inspect::Inspector;
use crate::lifecycle::{LifecycleSettings, Orchestrator};
use crate::sandbox::SandboxProvider;

#[derive(Parser)]
#[command(name = "agent-sandbox", about = "Sandboxed coding agent lifecycle service")]
enum Cli {
    /// Start the HTTP server (default when no subcommand is given)
    #[command(alias = "run")]
    Serve {
        /// Listen port, overrides PORT
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // No subcommand given: serve. --help and --version still go through clap.
    let args: Vec<String> = std::env::args().collect();
    let cli = if args.len() <= 1 {
        Cli::Serve { port: None }
    } else {
        Cli::parse()
    };

    match cli {
        Cli::Serve { port } => run_server(port).await,
    }
}

async fn run_server(port_override: Option<u16>) -> Result<()> {
    let config = config::Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agent_sandbox=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(false),
        )
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();

    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    // No request-wide timeout: exec and snapshot last as long as the platform takes.
    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;

    let provider: Arc<dyn SandboxProvider> = Arc::from(sandbox::build_provider(
        http_client,
        &config.platform_url,
        config.platform_token.clone(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        provider.clone(),
        LifecycleSettings::new(config.base_image.clone()),
    ));
    let inspector = Arc::new(Inspector::new(provider, config.max_read_bytes));

    if config.api_secret.is_none() {
        tracing::warn!("SANDBOX_API_SECRET is not set, the API accepts unauthenticated requests");
    }

    let app_state = server::AppState {
        orchestrator,
        inspector,
        api_secret: config.api_secret.as_deref().map(Arc::from),
    };

    let app = server::create_app(app_state)
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(NewSentryLayer::<Request<Body>>::new_from_top());

    let port = port_override.unwrap_or(config.port);
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, base_image = %config.base_image, "listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
