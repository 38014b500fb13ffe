//! davshelf entry point.

use clap::Parser;
use davshelf::{
    Engine,
    auth::StaticTokenAuth,
    config::{Cli, Command, Config, ConnectionCommand, TaskCommand},
    crypto,
    db::{self, Database},
    scheduler::Scheduler,
    server,
    sync::SyncReport,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    // Handle command
    match cli.command {
        Some(Command::Init { force }) => cmd_init(force),
        Some(Command::Key) => {
            println!("{}", crypto::generate_key());
            Ok(())
        }
        Some(Command::Connection { action }) => cmd_connection(action, &config).await,
        Some(Command::SyncAll) => cmd_sync_all(&config).await,
        Some(Command::Task { action }) => cmd_task(action, &config),
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => {
            // Default: start server
            cmd_serve(config, None).await
        }
    }
}

/// Initialize config and database.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    // Write default config
    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    // Initialize database
    let config = Config::default();
    let _db = open_database(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    println!("\nKeep the [webdav] key in config.toml safe: stored passwords cannot be read without it.");
    println!("Then run: davshelf connection add --user admin <url> <username>");

    Ok(())
}

/// Connection management commands.
async fn cmd_connection(action: ConnectionCommand, config: &Config) -> anyhow::Result<()> {
    match action {
        ConnectionCommand::Add {
            user,
            base_url,
            username,
            password,
        } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("WebDAV password: ")?,
            };

            let engine = Engine::build(config)?;
            let conn = engine
                .sync
                .create(&user, &base_url, &username, &password)
                .await?;
            println!("Added connection: {} -> {} (id: {})", username, base_url, conn.id);
            engine.finish().await;
        }

        ConnectionCommand::List { user } => {
            let db = open_database(&config.database.path)?;
            let conns = db.list_connections(&user)?;
            if conns.is_empty() {
                println!("No connections found.");
            } else {
                println!(
                    "{:<36} {:<40} {:<16} {:<8} LAST SYNC",
                    "ID", "URL", "USERNAME", "STATUS"
                );
                println!("{}", "-".repeat(120));
                for conn in conns {
                    let last_sync = conn
                        .last_sync_at
                        .map(|ts| db::timestamp_to_datetime(ts).format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "never".to_string());
                    println!(
                        "{:<36} {:<40} {:<16} {:<8} {}",
                        conn.id, conn.base_url, conn.username, conn.last_sync_status, last_sync
                    );
                    if !conn.last_error.is_empty() {
                        println!("  error: {}", conn.last_error);
                    }
                }
            }
        }

        ConnectionCommand::Del { user, id } => {
            let db = open_database(&config.database.path)?;
            db.delete_connection(&user, &id)?;
            println!("Deleted connection: {}", id);
        }

        ConnectionCommand::Sync { user, id } => {
            init_logging();
            let engine = Engine::build(config)?;
            let result = engine.sync.sync(&user, &id).await;
            engine.finish().await;
            print_report(&id, &result?);
        }
    }

    Ok(())
}

/// Sync every connection once.
async fn cmd_sync_all(config: &Config) -> anyhow::Result<()> {
    init_logging();
    let engine = Engine::build(config)?;
    let result = engine.sync.sync_all().await;
    engine.finish().await;
    result?;
    println!("All connections synced.");
    Ok(())
}

/// Task inspection commands.
fn cmd_task(action: TaskCommand, config: &Config) -> anyhow::Result<()> {
    let db = open_database(&config.database.path)?;

    match action {
        TaskCommand::List { user } => {
            let tasks = db.list_tasks(&user)?;
            if tasks.is_empty() {
                println!("No tasks found.");
                return Ok(());
            }

            println!("{:<36} {:<10} {:<8} {:<16} ERROR", "ID", "TYPE", "STATUS", "CREATED");
            println!("{}", "-".repeat(100));
            for task in tasks {
                println!(
                    "{:<36} {:<10} {:<8} {:<16} {}",
                    task.id,
                    task.task_type,
                    task.status,
                    db::timestamp_to_datetime(task.created_at).format("%Y-%m-%d %H:%M"),
                    task.error
                );
            }
        }
    }

    Ok(())
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    // Override bind address if specified
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    init_logging();

    let engine = Engine::build(&config)?;
    let auth = StaticTokenAuth::new(config.auth.tokens.clone());
    if auth.is_empty() {
        tracing::warn!("No API tokens configured; every API request will be rejected");
    }

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        tokens = auth.len(),
        "Starting davshelf server"
    );

    let cancel = engine.cancel_token();

    match config.webdav.sync_interval() {
        Some(period) => {
            let scheduler = Scheduler::new(engine.sync.clone(), period);
            tokio::spawn(scheduler.run(cancel.clone()));
        }
        None => tracing::info!("Background sync disabled"),
    }

    let state = server::AppState::new(
        engine.sync.clone(),
        engine.queue.clone(),
        engine.db.clone(),
        Arc::new(auth),
    );
    let app = server::create_router(state);

    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    engine.shutdown().await;
    Ok(())
}

fn open_database(path: &Path) -> anyhow::Result<Database> {
    Ok(Database::open(path)?)
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "davshelf=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
    cancel.cancel();
}

fn print_report(id: &str, report: &SyncReport) {
    println!(
        "Synced {}: {} files, {} books updated, {} marked missing, {} tasks queued",
        id, report.discovered, report.upserted, report.marked_missing, report.enqueued
    );
}

/// Prompt for password input.
fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;

    Ok(password.trim().to_string())
}
