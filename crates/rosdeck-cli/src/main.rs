//! `rosdeck-cli` – rosdeck operator console
//!
//! This binary is the entry point for the rosdeck stack. It:
//!
//! 1. Checks for `~/.rosdeck/config.toml`; runs a **first-run setup** when the
//!    file is absent.
//! 2. Mounts every consumer against one connection manager, with the local
//!    simulator feeding telemetry until a robot is connected.
//! 3. Drops the user into an **interactive REPL** with slash-commands
//!    (`/connect`, `/status`, `/battery`, `/telemetry`, `/actions`,
//!    `/action`, `/help`).
//! 4. Intercepts **Ctrl-C** to shut the connection manager down (closing the
//!    transport and cancelling keep-alive and retry timers) and exit.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

use rosdeck_middleware::{ConnectionManager, WsConnector};
use rosdeck_runtime::Deck;

fn main() {
    // Hold the guard for the whole process; dropping it flushes spans.
    let _tracing = rosdeck_runtime::init_tracing("rosdeck");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Ok(None) => run_first_run_setup(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            std::process::exit(1);
        }
    };

    let manager = ConnectionManager::new(Arc::new(WsConnector::new()), cfg.connection_settings());
    let deck = {
        let _enter = rt.enter();
        Deck::new(manager.clone(), cfg.robot_id.clone())
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    let ctrlc_manager = manager.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – disconnecting …".yellow().bold());
        ctrlc_manager.shutdown();
        println!("{}", "  ✓ Transport closed, timers cancelled.".green());
        shutdown_flag.store(true, Ordering::SeqCst);
        std::process::exit(0);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    println!(
        "  Robot: {}  Simulator: {}",
        manager.settings().default_url().bold(),
        if deck.is_simulating() { "running".yellow() } else { "paused".dimmed() }
    );
    println!();
    println!("  Type {} to reach the robot, {} for all commands.\n", "/connect".bold().cyan(), "/help".bold().cyan());

    repl::run(&deck, &rt, shutdown);

    manager.shutdown();
    drop(deck);
}

// ─────────────────────────────────────────────────────────────────────────────
// First-run setup
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_setup() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║         rosdeck First-Run Setup      ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found. Let's point rosdeck at a robot.\n");

    let mut cfg = config::Config::default();

    cfg.robot_host = prompt_line(&format!("  Robot IP or bridge URL [{}]: ", cfg.robot_host), &cfg.robot_host);

    let port_str = prompt_line(
        &format!("  rosbridge WebSocket port [{}]: ", cfg.robot_port),
        &cfg.robot_port.to_string(),
    );
    if let Ok(p) = port_str.trim().parse::<u16>() {
        cfg.robot_port = p;
    }

    let simulated = prompt_line("  Use simulated (/dummy) topics? [y/N]: ", "n");
    cfg.simulated_topics = matches!(simulated.trim().to_ascii_lowercase().as_str(), "y" | "yes");

    config::apply_env_overrides(&mut cfg);
    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", "  ╭───────────────────╮".bold().cyan());
    println!("{}", "  │  r o s d e c k    │".bold().cyan());
    println!("{}", "  ╰───────────────────╯".bold().cyan());
    println!();
    println!("  {} {}", "rosdeck".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Robot teleoperation console over rosbridge");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
