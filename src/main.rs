mod config;
mod proxy;
mod server;
mod testflow;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::Request;
use clap::Parser;
use dotenvy::dotenv;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::proxy::ReqwestExecutor;
use crate::testflow::RunRequest;
use crate::testflow::runner::TestflowRunner;

#[derive(Parser)]
#[command(name = "testflow-runtime", about = "Executes API testflows and proxies outbound requests")]
enum Cli {
    /// Start the HTTP server (default when no subcommand is given)
    #[command(alias = "run-server")]
    Serve,
    /// Execute one testflow run read from a JSON file and print the result
    Run {
        /// Run request file (nodes, edges, variables)
        file: PathBuf,
        /// Allow requests to loopback and private network addresses
        #[arg(long)]
        allow_private_networks: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // Parse CLI args, defaulting to Serve when no subcommand is given,
    // but still allow --help and --version to work.
    let args: Vec<String> = std::env::args().collect();
    let cli = if args.len() <= 1 { Cli::Serve } else { Cli::parse() };

    let config = config::Config::from_env();
    init_tracing();

    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            send_default_pii: true,
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    match cli {
        Cli::Serve => run_server(config).await,
        Cli::Run {
            file,
            allow_private_networks,
        } => run_file(config, &file, allow_private_networks).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("testflow_runtime=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(false)
                .with_writer(std::io::stderr),
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
}

async fn run_server(config: config::Config) -> Result<()> {
    let executor = Arc::new(ReqwestExecutor::new(config.executor_config())?);
    if config.allow_private_networks {
        tracing::warn!("outbound address validation disabled (ALLOW_PRIVATE_NETWORKS)");
    }

    let app = server::create_app(server::AppState::new(executor))
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(NewSentryLayer::<Request<Body>>::new_from_top());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, environment = %config.environment, "listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

async fn run_file(config: config::Config, file: &Path, allow_private_networks: bool) -> Result<()> {
    let request = load_run_request(file)?;

    let mut executor_config = config.executor_config();
    executor_config.allow_private_networks |= allow_private_networks;
    let runner = TestflowRunner::new(Arc::new(ReqwestExecutor::new(executor_config)?));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("🛑 Interrupted, cancelling run");
                cancel.cancel();
            }
        }
    });

    let result = runner.run(request, cancel).await?;
    let output = serde_json::to_string_pretty(&result).context("failed to serialize run result")?;
    println!("{output}");

    Ok(())
}

fn load_run_request(path: &Path) -> Result<RunRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read run file: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse run file: {}", path.display()))
}
