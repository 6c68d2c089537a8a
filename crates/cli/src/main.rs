use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    clap::Parser,
    tokio::net::TcpListener,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    wabcast_config::WabcastConfig,
    wabcast_contacts::ContactBook,
    wabcast_dispatch::Dispatcher,
    wabcast_gateway::{AppState, serve},
    wabcast_sessions::{MemoryTokenStore, SessionController, SqliteTokenStore, TokenStore},
    wabcast_whatsapp::{SidecarConnector, SidecarOptions},
};

/// Delay between sidecar connect attempts.
const SIDECAR_RETRY_DELAY: Duration = Duration::from_secs(2);

/// WhatsApp broadcast gateway.
#[derive(Parser, Debug)]
#[command(name = "wabcast", version, about)]
struct Cli {
    /// Config file (defaults to the platform config dir).
    #[arg(long, short, env = "WABCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind the HTTP server to.
    #[arg(long, env = "WABCAST_BIND")]
    bind: Option<String>,

    /// HTTP port.
    #[arg(long, short, env = "PORT")]
    port: Option<u16>,

    /// Contacts JSON file.
    #[arg(long, env = "WABCAST_CONTACTS")]
    contacts: Option<PathBuf>,

    /// Local port of the WhatsApp Web sidecar.
    #[arg(long, env = "WABCAST_SIDECAR_PORT")]
    sidecar_port: Option<u16>,

    /// SQLite file for auth tokens.
    #[arg(long, env = "WABCAST_DB")]
    db: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, env = "WABCAST_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn apply_to(&self, config: &mut WabcastConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(contacts) = &self.contacts {
            config.contacts.path = contacts.clone();
        }
        if let Some(port) = self.sidecar_port {
            config.sidecar.port = port;
        }
        if let Some(db) = &self.db {
            config.store.sqlite_path = Some(db.clone());
        }
    }
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn token_store(config: &WabcastConfig) -> Result<Arc<dyn TokenStore>> {
    Ok(match &config.store.sqlite_path {
        Some(path) => {
            info!(path = %path.display(), "persisting session tokens");
            Arc::new(SqliteTokenStore::connect(path).await?)
        },
        None => Arc::new(MemoryTokenStore::new()),
    })
}

fn sidecar_options(config: &WabcastConfig) -> SidecarOptions {
    SidecarOptions {
        port: config.sidecar.port,
        connect_retries: config.sidecar.connect_retries,
        retry_delay: SIDECAR_RETRY_DELAY,
        auth_dir: config.sidecar.auth_dir.as_ref().map(PathBuf::from),
        request_timeout: config.sidecar.request_timeout(),
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
}

async fn run(config: WabcastConfig) -> Result<()> {
    let tokens = token_store(&config).await?;
    let connector = Arc::new(SidecarConnector::new(sidecar_options(&config)));
    let sessions = SessionController::new(connector)
        .with_token_store(tokens)
        .with_start_timeout(config.sessions.start_timeout());

    let contacts = Arc::new(ContactBook::open(&config.contacts.path));
    let dispatcher = Arc::new(
        Dispatcher::new(sessions.clone(), Arc::clone(&contacts))
            .with_pacing(config.dispatch.pacing())
            .with_default_country_code(config.dispatch.default_country_code.clone()),
    );

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let state = AppState {
        sessions: sessions.clone(),
        dispatcher,
        contacts,
    };
    let served = serve(listener, state, shutdown_signal()).await;

    sessions.shutdown().await;
    info!("stopped");
    served
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(&cli);

    let mut config = wabcast_config::load_config(cli.config.as_deref())?;
    cli.apply_to(&mut config);
    run(config).await
}
