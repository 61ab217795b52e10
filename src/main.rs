use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use onboarding_agent::cli;
use onboarding_agent::client::ApiClient;
use onboarding_agent::config::ServiceConfig;
use onboarding_agent::onboarding::{
    OnboardingService, StageCatalog, UserIdentity, onboarding_routes, spawn_maintenance_task,
};
use onboarding_agent::tickets::{HttpTicketClient, LocalTicketClient, TicketClient};

/// How long open HTTP connections get to finish after a shutdown signal.
const HTTP_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

const DEFAULT_API_URL: &str = "http://localhost:8080";

#[derive(Parser)]
#[command(name = "onboarding-agent")]
#[command(about = "Conversational onboarding for new team members")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the onboarding API server
    Server {
        /// Listen port (overrides ONBOARDING_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with the onboarding agent from the terminal
    Interactive {
        #[arg(long)]
        user_id: String,

        #[arg(long)]
        username: String,

        #[arg(long)]
        email: String,

        #[arg(long, default_value = DEFAULT_API_URL)]
        api_url: String,
    },

    /// Show the status of an onboarding session
    Status {
        session_id: String,

        #[arg(long, default_value = DEFAULT_API_URL)]
        api_url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match Cli::parse().command {
        Commands::Server { port } => run_server(port).await,
        Commands::Interactive {
            user_id,
            username,
            email,
            api_url,
        } => {
            let client = ApiClient::new(api_url)?;
            let user = UserIdentity::new(user_id, username, email);
            let stdin = BufReader::new(tokio::io::stdin());
            let mut stdout = std::io::stdout();
            cli::run_interactive(&client, &user, stdin, &mut stdout)
                .await
                .context("interactive session failed")?;
            Ok(())
        }
        Commands::Status {
            session_id,
            api_url,
        } => {
            let client = ApiClient::new(api_url)?;
            let status = client
                .status(&session_id)
                .await
                .context("failed to get status")?;
            cli::print_status(&mut std::io::stdout(), &status);
            Ok(())
        }
    }
}

async fn run_server(port: Option<u16>) -> anyhow::Result<()> {
    let mut config = ServiceConfig::from_env().context("invalid configuration")?;
    if let Some(port) = port {
        config.port = port;
    }

    let catalog = match config.catalog_path {
        Some(ref path) => StageCatalog::load(path)
            .await
            .with_context(|| format!("failed to load stage catalog from {}", path.display()))?,
        None => StageCatalog::default(),
    };

    let ticket_client: Arc<dyn TicketClient> = match config.sync.api_url {
        Some(ref url) => Arc::new(HttpTicketClient::new(
            url.clone(),
            config.sync.api_token.clone(),
            config.sync.request_timeout,
        )?),
        None => {
            info!("TICKET_API_URL not set, tickets are tracked locally");
            Arc::new(LocalTicketClient::new())
        }
    };

    let service = Arc::new(OnboardingService::new(&config, catalog, ticket_client)?);
    let maintenance = spawn_maintenance_task(Arc::clone(&service), config.sweep_interval);

    let app = onboarding_routes(Arc::clone(&service));
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "Onboarding agent listening");

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = stop_tx.send(true);
    });

    let mut serve_rx = stop_rx.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = serve_rx.wait_for(|stop| *stop).await;
        })
        .into_future();

    let mut grace_rx = stop_rx;
    tokio::select! {
        result = server => result.context("server error")?,
        _ = async {
            let _ = grace_rx.wait_for(|stop| *stop).await;
            tokio::time::sleep(HTTP_SHUTDOWN_GRACE).await;
        } => warn!("Connections still open after grace period, closing"),
    }

    maintenance.abort();
    if !service.shutdown().await {
        warn!("Shut down with ticket reconciliations still in flight");
    }
    info!("Onboarding agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
