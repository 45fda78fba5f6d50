use std::path::PathBuf;

use clap::Parser;
use retention_plugins::{
    AppState, build_app, config::ServiceConfig, db::DbPool, models::PluginRelease, observability,
};

/// CLI arguments for the retention plugin service
#[derive(Parser, Debug)]
#[command(version, about = "Retention plugin service", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "retention-plugins.toml")]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the HTTP server (default)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Publish a plugin release from a JSON file into the catalog
    Publish {
        /// Release definition (JSON)
        release: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match ServiceConfig::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                args.config.display(),
                e
            );
            std::process::exit(1);
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config).await,
        Command::Migrate => run_migrations(config).await,
        Command::Publish { release } => run_publish(config, release).await,
    }
}

async fn run_server(config: ServiceConfig) {
    let server_config = config.server.clone();
    let state = match AppState::from_config(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize service");
            std::process::exit(1);
        }
    };

    let app = build_app(&server_config, state);
    let bind_addr = server_config.bind_addr();
    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %bind_addr, "Failed to bind to address");
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}", bind_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn run_migrations(config: ServiceConfig) {
    let db = match DbPool::from_config(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    };
    if let Err(e) = db.run_migrations().await {
        tracing::error!(error = %e, "Migration failed");
        std::process::exit(1);
    }
}

async fn run_publish(config: ServiceConfig, path: PathBuf) {
    let release: PluginRelease = match std::fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
    {
        Ok(release) => release,
        Err(e) => {
            tracing::error!(error = %e, path = %path.display(), "Failed to read release");
            std::process::exit(1);
        }
    };

    let services = match AppState::from_config(config).await {
        Ok(AppState {
            services: Some(services),
            ..
        }) => services,
        Ok(_) => {
            tracing::error!("Publishing requires a configured database");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize service");
            std::process::exit(1);
        }
    };

    if let Err(e) = services.retention_plugins.publish_release(&release).await {
        tracing::error!(error = %e, "Failed to publish release");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
