//! `hydronom` – fleet telemetry server.
//!
//! This binary wires the engine together and runs it until Ctrl-C:
//!
//! 1. Loads `~/.hydronom/config.toml` (written with defaults on first run),
//!    then applies `HYDRONOM_*` environment overrides.
//! 2. Opens the journal, builds the state cache, subscription hub, and
//!    command queue, and injects them into the control plane.
//! 3. Serves the HTTP + WebSocket gateway.
//! 4. Intercepts **Ctrl-C** to stop accepting connections and exit cleanly.

mod config;
mod observability;

use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use hydronom_gateway::GatewayServer;
use hydronom_kernel::ControlPlane;
use hydronom_middleware::{SubscriptionHub, command_queue};
use hydronom_store::{Journal, StateCache};
use hydronom_types::FleetError;

fn main() {
    // The guard flushes exported spans when `main` returns.
    let _tracing = observability::init_tracing("hydronom");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => first_run_config(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    info!(?cfg, "configuration resolved");

    // ── Shutdown signal ───────────────────────────────────────────────────
    let (stop_tx, stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let _ = stop_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(serve(&cfg, stop_rx)) {
        error!(error = %e, "server stopped with error");
        println!("{}: {}", "Fatal".red().bold(), e);
        std::process::exit(1);
    }
    println!("{}", "  ✓ Hydronom stopped.".green());
}

async fn serve(cfg: &config::Config, shutdown: watch::Receiver<bool>) -> Result<(), FleetError> {
    let journal = Arc::new(Journal::open(&cfg.log_dir)?);
    let hub = Arc::new(SubscriptionHub::new(Duration::from_millis(cfg.send_timeout_ms)));
    let (commands, drain) = command_queue();
    let plane = ControlPlane::new(Arc::new(StateCache::new()), journal, hub, commands);

    println!(
        "  Gateway on {}  ·  logs in {}\n",
        format!("http://{}:{}", cfg.bind_address, cfg.port).bold(),
        cfg.log_dir.display().to_string().bold()
    );

    GatewayServer::new(plane, drain)
        .with_bind_address(cfg.bind_address.clone())
        .with_port(cfg.port)
        .with_auth_token(cfg.auth_token.clone())
        .with_cors_origin(cfg.cors_origin.clone())
        .run(shutdown)
        .await
}

/// No config file yet: persist the defaults so operators have a file to
/// edit, then apply environment overrides for this run.
fn first_run_config() -> config::Config {
    let mut cfg = config::Config::default();
    match config::save(&cfg) {
        Ok(()) => println!(
            "  {} Default config written to {}",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    config::apply_env_overrides(&mut cfg);
    cfg
}

fn print_banner() {
    println!();
    println!("{}", r#"  _  _         _                           "#.bold().cyan());
    println!("{}", r#" | || |_  _ __| |_ _ ___ _ _  ___ _ __      "#.bold().cyan());
    println!("{}", r#" | __ | || / _` | '_/ _ \ ' \/ _ \ '  \     "#.bold().cyan());
    println!("{}", r#" |_||_|\_, \__,_|_| \___/_||_\___/_|_|_|    "#.bold().cyan());
    println!("{}", r#"       |__/                                 "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Hydronom".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Real-time fleet telemetry engine");
    println!();
}
