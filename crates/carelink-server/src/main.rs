use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("carelink=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let config = config::Config::load(&args.config)?;

    ensure_data_dirs(&config);

    let engine = match config.database.engine {
        config::DatabaseEngine::Sqlite => carelink_db::DatabaseEngine::Sqlite,
        config::DatabaseEngine::Postgres => carelink_db::DatabaseEngine::Postgres,
    };
    let db = carelink_db::create_pool_with_engine(
        &config.database.url,
        config.database.max_connections,
        Some(engine),
    )
    .await?;
    carelink_db::run_migrations_for_engine(&db, engine).await?;

    let state = carelink_core::AppState {
        db,
        config: carelink_core::AppConfig {
            jwt_secret: config.auth.jwt_secret.clone(),
            session_ttl_seconds: config.auth.session_ttl_seconds,
            pre2fa_ttl_seconds: config.auth.pre2fa_ttl_seconds,
            otp_ttl_seconds: config.auth.otp_ttl_seconds,
            totp_issuer: config.auth.totp_issuer.clone(),
            public_url: config.server.public_url.clone(),
            argon2_memory_kib: config.auth.argon2_memory_kib,
            argon2_iterations: config.auth.argon2_iterations,
        },
        notifier: Arc::new(carelink_core::notify::LogSink),
    };

    let app = carelink_api::build_router().with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;

    print_startup_banner(
        &config.server.bind_address,
        &config.server.public_url,
        &config.database.url,
    );

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
        println!();
        tracing::info!("Shutting down (ctrl-c)...");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    Ok(())
}

/// Ensure the SQLite database directory exists before the server starts.
fn ensure_data_dirs(config: &config::Config) {
    if let Some(db_path) = config
        .database
        .url
        .strip_prefix("sqlite://")
        .and_then(|s| s.split('?').next())
    {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
    }
}

fn print_startup_banner(bind_address: &str, public_url: &Option<String>, db_url: &str) {
    println!();
    println!("   ____               _     _       _    ");
    println!("  / ___|__ _ _ __ ___| |   (_)_ __ | | __");
    println!(" | |   / _` | '__/ _ \\ |   | | '_ \\| |/ /");
    println!(" | |__| (_| | | |  __/ |___| | | | |   < ");
    println!("  \\____\\__,_|_|  \\___|_____|_|_| |_|_|\\_\\");
    println!();
    println!("  Listening:   http://{}", bind_address);
    if let Some(url) = public_url {
        println!("  Public URL:  {}", url);
    }
    println!("  Database:    {}", db_url);
    println!();
}
