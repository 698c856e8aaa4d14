//! sockgate-server: authenticated WebSocket upgrade gateway.
//!
//! Accepts HTTP upgrade requests on one listener, authorizes each against
//! its endpoint, and hands upgraded connections to the echo handler.

mod config;
mod echo;
mod gateway;
mod listener;
mod request;
mod resolver;
mod server;

use clap::Parser;
use config::{ConfigOverrides, ServerConfig};
use server::GateServer;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// How long shutdown waits for terminated connections to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// sockgate-server: authenticated WebSocket upgrade gateway
#[derive(Parser, Debug)]
#[command(name = "sockgate-server", version, about = "Authenticated WebSocket upgrade gateway")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.sockgate/config.toml")]
    config: String,

    /// TLS certificate (PEM)
    #[arg(long)]
    cert: Option<String>,

    /// TLS private key (PEM)
    #[arg(long)]
    key: Option<String>,

    /// Resolver timeout in seconds (0 disables)
    #[arg(long)]
    resolve_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print a signed access token for USER and exit
    #[arg(long, value_name = "USER")]
    issue_token: Option<String>,

    /// Print a fresh hex secret for `auth.secret` and exit
    #[arg(long)]
    generate_secret: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    if cli.generate_secret {
        match sockgate_core::generate_secret() {
            Ok(secret) => println!("{}", hex::encode(secret)),
            Err(e) => {
                error!(error = %e, "failed to generate secret");
                std::process::exit(1);
            }
        }
        return;
    }

    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(
        Some(&config_path),
        ConfigOverrides {
            bind: cli.bind,
            port: cli.port,
            cert: cli.cert,
            key: cli.key,
            resolve_timeout: cli.resolve_timeout,
        },
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    if let Some(user) = cli.issue_token {
        let Some(secret) = server_config.secret.as_deref() else {
            error!("auth.secret must be set to issue tokens");
            std::process::exit(1);
        };
        println!(
            "{}",
            sockgate_core::issue_access_token(secret, &user, server_config.token_ttl)
        );
        return;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %server_config.bind,
        port = server_config.port,
        tls = server_config.tls_enabled(),
        "starting sockgate-server"
    );

    let gate_server = match GateServer::new(server_config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = gate_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    gate_server.shutdown(SHUTDOWN_GRACE).await;
    info!("sockgate-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
