//! REPL – Read-Eval-Print Loop for the rosdeck operator console.
//!
//! Supported slash-commands:
//!   /connect [addr]         – connect to `addr` or the configured robot
//!   /status                 – connection status and last error
//!   /battery                – battery level and which source feeds it
//!   /telemetry              – every consumer's latest value as JSON
//!   /actions                – actions offered in the robot's current mode
//!   /action <name> [input]  – run a robot action
//!   /help                   – show this list
//!   /quit | /exit           – disconnect and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rosdeck_runtime::{Deck, RobotAction};
use rosdeck_types::{ConnectionStatus, DataSource};
use tokio::runtime::Runtime;

/// One parsed line of operator input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect(Option<String>),
    Status,
    Battery,
    Telemetry,
    Actions,
    Action { action: RobotAction, input: Option<String> },
    Help,
    Quit,
    /// Recognised command with bad arguments.
    Invalid(String),
    Unknown(String),
}

/// Parse one input line. Returns `None` for a blank line.
pub fn parse(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let arg = (!rest.is_empty()).then(|| rest.to_string());

    let cmd = match head {
        "/connect" => Command::Connect(arg),
        "/status" => Command::Status,
        "/battery" => Command::Battery,
        "/telemetry" => Command::Telemetry,
        "/actions" => Command::Actions,
        "/action" => parse_action(rest),
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    };
    Some(cmd)
}

fn parse_action(rest: &str) -> Command {
    let (name, input) = match rest.split_once(char::is_whitespace) {
        Some((name, input)) => (name, Some(input.trim().to_string())),
        None => (rest, None),
    };
    if name.is_empty() {
        return Command::Invalid("usage: /action <name> [input]".to_string());
    }
    match name.parse::<RobotAction>() {
        Ok(action) => Command::Action { action, input },
        Err(e) => Command::Invalid(e.to_string()),
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(deck: &Deck, rt: &Runtime, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "rosdeck>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let Some(cmd) = parse(&line) else { continue };
        match cmd {
            Command::Connect(addr) => cmd_connect(deck, rt, addr.as_deref()),
            Command::Status => cmd_status(deck),
            Command::Battery => cmd_battery(deck),
            Command::Telemetry => cmd_telemetry(deck),
            Command::Actions => cmd_actions(deck),
            Command::Action { action, input } => cmd_action(deck, rt, action, input.as_deref()),
            Command::Help => cmd_help(),
            Command::Quit => {
                deck.manager().shutdown();
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Command::Invalid(msg) => println!("{} {}", "Error:".red(), msg),
            Command::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "rosdeck Commands".bold().underline());
    println!("  {}  – connect (default: configured robot)", "/connect [addr]".bold().cyan());
    println!("  {}          – connection status", "/status".bold().cyan());
    println!("  {}         – battery level and source", "/battery".bold().cyan());
    println!("  {}       – latest telemetry as JSON", "/telemetry".bold().cyan());
    println!("  {}         – actions allowed in the current mode", "/actions".bold().cyan());
    println!("  {} – run a robot action", "/action <name> [input]".bold().cyan());
    println!("  {}    – disconnect and exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_connect(deck: &Deck, rt: &Runtime, addr: Option<&str>) {
    let manager = deck.manager();
    let target = addr.map_or_else(|| manager.settings().default_url(), str::to_string);
    print!("  Connecting to {} … ", target.bold());
    io::stdout().flush().ok();

    let outcome = match addr {
        Some(addr) => rt.block_on(manager.connect(addr)),
        None => rt.block_on(manager.connect_default()),
    };
    match outcome {
        Ok(()) => println!("{}", "connected".green()),
        Err(e) => {
            println!("{}", "failed".red());
            println!("  {}", e.to_string().dimmed());
            if manager.status() == ConnectionStatus::Error {
                println!("  Retrying in the background; see {}.", "/status".bold());
            }
        }
    }
}

fn cmd_status(deck: &Deck) {
    let snapshot = deck.manager().snapshot();
    let status = match snapshot.status {
        ConnectionStatus::Connected => "connected".green(),
        ConnectionStatus::Connecting => "connecting".yellow(),
        ConnectionStatus::Idle => "idle".dimmed(),
        ConnectionStatus::Error => "error".red(),
    };
    println!("{}", "Connection".bold().underline());
    println!("  Status    : {}", status);
    println!("  Target    : {}", snapshot.url.as_deref().unwrap_or("-"));
    println!("  Transport : #{}", snapshot.epoch);
    if let Some(err) = snapshot.last_error {
        println!("  Last error: {}", err.red());
    }
    println!(
        "  Simulator : {}",
        if deck.is_simulating() { "running".yellow() } else { "paused".dimmed() }
    );
    println!("  Mode      : {}", deck.mode().to_string().bold());
}

fn cmd_battery(deck: &Deck) {
    match deck.battery() {
        Some(reading) => {
            let source = match reading.source {
                DataSource::Real => "robot".green(),
                DataSource::Simulated => "simulator".yellow(),
                DataSource::None => "none".dimmed(),
            };
            println!(
                "  Battery: {}%  {:.1} V  ({})",
                reading.percent().to_string().bold(),
                reading.voltage,
                source
            );
        }
        None => println!("  Battery: {}", "no reading yet".dimmed()),
    }
}

fn cmd_telemetry(deck: &Deck) {
    match serde_json::to_string_pretty(&deck.telemetry()) {
        Ok(json) => println!("{}", json),
        Err(e) => println!("{}: {}", "Serialisation error".red(), e),
    }
}

fn cmd_actions(deck: &Deck) {
    let mode = deck.mode();
    println!("{} {}", "Actions in mode".bold().underline(), mode.to_string().bold());
    let allowed = deck.actions().available();
    if allowed.is_empty() {
        println!("  {}", "none (robot is locked out or in an unlisted mode)".dimmed());
        return;
    }
    for action in allowed {
        println!("    • {}", action.name().cyan());
    }
}

fn cmd_action(deck: &Deck, rt: &Runtime, action: RobotAction, input: Option<&str>) {
    print!("  {} … ", action.name().bold());
    io::stdout().flush().ok();
    match rt.block_on(deck.actions().run(action, input)) {
        Ok(response) => {
            println!("{}", "ok".green());
            if action == RobotAction::Prompt {
                println!("  {}", response);
            }
        }
        Err(e) => println!("{} {}", "failed:".red(), e),
    }
}
