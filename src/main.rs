// Edinburgh bus tracker server
// Line-protocol TCP server for live departures, plus a weekly stop-location database rebuild

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bustracker_server::config::{DEFAULT_CONFIG_FILE, ServerConfig};
use bustracker_server::server::{ConnectionAcceptor, ConnectionContext, ConnectionRegistry};
use bustracker_server::snapshot::{RebuildScheduler, SnapshotBuilder, SnapshotStore};
use bustracker_server::upstream::{HttpUpstream, Upstream};

#[derive(Parser, Debug)]
#[command(name = "ebtserver", version, about = "Edinburgh bus tracker server")]
struct Cli {
    /// Configuration file (key=value lines)
    #[arg(long, short = 'c', value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Debug logging, unless RUST_LOG says otherwise
    #[arg(long, short = 'd')]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .compact()
        .try_init()
    {
        eprintln!("Failed to initialise logging: {}", e);
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    info!(version = bustracker_server::VERSION, "🚀 Edinburgh Bus Tracker Server starting");

    let config = ServerConfig::load(&cli.config);
    info!(
        port = config.port,
        bind = %config.bind_address,
        max_connections = config.max_connections,
        db_path = ?config.db_path,
        timezone = %config.timezone,
        "📡 Configuration loaded"
    );

    let upstream: Arc<dyn Upstream> = match HttpUpstream::new(&config.upstream_url) {
        Ok(upstream) => Arc::new(upstream),
        Err(e) => {
            error!(error = %e, "❌ Failed to set up the upstream client");
            std::process::exit(1);
        }
    };

    let store = match SnapshotStore::new(&config.db_path) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "❌ Failed to open the database directory");
            std::process::exit(1);
        }
    };
    let marker_path = store.paths().marker.clone();

    let builder = Arc::new(SnapshotBuilder::new(Arc::clone(&upstream), store));
    let scheduler = match RebuildScheduler::new(builder, config.timezone).start() {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "❌ Failed to start the rebuild scheduler");
            std::process::exit(1);
        }
    };

    let registry = ConnectionRegistry::new(config.connection_limit());
    let context = Arc::new(ConnectionContext {
        db_url: config.db_url.clone(),
        marker_path,
        version_path: config.version_file.clone(),
        upstream,
    });

    let acceptor = match ConnectionAcceptor::bind(
        &config.bind_address,
        config.port,
        registry,
        context,
        config.read_timeout,
    ) {
        Ok(acceptor) => acceptor,
        Err(e) => {
            error!(error = %e, "❌ Server cannot start without its listening socket");
            scheduler.stop();
            std::process::exit(1);
        }
    };

    acceptor.run();
    scheduler.stop();
}
