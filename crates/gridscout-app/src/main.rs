use anyhow::{Context, Result};
use clap::Parser;
use gridscout_app::{ApiState, router};
use gridscout_jobs::JobRegistry;
use gridscout_storage::RunStore;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "gridscout",
    version,
    about = "Multi-agent grid exploration benchmark server"
)]
struct Cli {
    /// Address the REST API binds to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Directory where runs are archived.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
}

impl Cli {
    /// Environment variables take precedence over the command line; a
    /// malformed value keeps the current setting with a warning.
    fn apply_env(&mut self) {
        if let Ok(addr) = env::var("GRIDSCOUT_REST_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => self.addr = parsed,
                Err(err) => warn!(%addr, %err, "invalid GRIDSCOUT_REST_ADDR; keeping default"),
            }
        }
        if let Ok(dir) = env::var("GRIDSCOUT_DATA_DIR") {
            if dir.trim().is_empty() {
                warn!("empty GRIDSCOUT_DATA_DIR; keeping default");
            } else {
                self.data_dir = PathBuf::from(dir);
            }
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();
    init_tracing();
    cli.apply_env();

    let store = RunStore::open(&cli.data_dir)
        .with_context(|| format!("failed to open data directory {}", cli.data_dir.display()))?;
    let state = ApiState {
        registry: JobRegistry::new(),
        store: Arc::new(store),
    };

    let listener = tokio::net::TcpListener::bind(cli.addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.addr))?;
    info!(address = %cli.addr, data_dir = %cli.data_dir.display(), "GridScout API listening");

    axum::serve(listener, router(state))
        .await
        .context("server errored")
}
