use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use enf_api::app::{self, check_standalone_worker};
use enf_api::http::router;
use enf_api::Settings;

#[derive(Debug, Parser)]
#[command(name = "enf-api", version, about = "Locate audio recordings in time from their grid hum")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// HTTP API with an in-process worker pool (default)
    Serve {
        /// Only accept submissions; leave matching to `enf-api worker` processes
        #[arg(long)]
        no_workers: bool,
    },
    /// Worker pool only; needs the sqlite queue and S3 blob storage
    Worker,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("ENF_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command.unwrap_or(Command::Serve { no_workers: false }) {
        Command::Serve { no_workers } => {
            let enf = app::build(&settings).await?;
            let workers = if no_workers {
                None
            } else {
                Some(enf.ledger().start_workers(enf.context.clone()).await?)
            };

            let addr = settings.http.addr();
            let listener = TcpListener::bind(&addr).await?;
            info!(%addr, "listening");
            axum::serve(listener, router(enf.state.clone()))
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            if let Some(workers) = workers {
                workers.shutdown().await?;
            }
        }
        Command::Worker => {
            check_standalone_worker(&settings)?;
            let enf = app::build(&settings).await?;
            let workers = enf.ledger().start_workers(enf.context.clone()).await?;
            info!(workers = workers.len(), "worker pool running");

            shutdown_signal().await;
            workers.shutdown().await?;
        }
    }

    Ok(())
}
