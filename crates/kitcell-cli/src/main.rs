//! `kitcell` – run a kitting session against the simulated cell.
//!
//! ```text
//! kitcell [SCENARIO.toml] [--config PATH]
//! ```
//!
//! 1. Loads the cell configuration (`--config`, else `~/.kitcell/config.toml`,
//!    else built-in defaults).
//! 2. Loads the scenario, or the bundled single-gear run when none is given.
//! 3. Registers the static scene, publishes the scenario's perception and
//!    plays its competition timeline into the state store.
//! 4. Runs any scenario commands through the command surface, then the full
//!    session: start, order loop, end.
//! 5. **Ctrl-C** marks the competition `Ended`; the order loop aborts at its
//!    next check and the remaining queue is discarded.

mod scenario;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use kitcell_hal::{CellBackends, SimCell};
use kitcell_middleware::{EventBus, StateStore, Topic, TopicReceiver};
use kitcell_runtime::config::{self, CellConfig};
use kitcell_runtime::scene::populate_static_scene;
use kitcell_runtime::{
    CellCommand, CommandReply, PickPlaceSequencer, SessionOutcome, command_channel, run_session,
    telemetry,
};
use kitcell_types::{CellError, CompetitionState, EventPayload};
use tokio::sync::Mutex;
use tracing::warn;

use scenario::{DEFAULT_SCENARIO, Scenario};

fn main() -> ExitCode {
    let _guard = telemetry::init_tracing("kitcell");

    let args = Args::parse();

    let cfg = match load_config(args.config.as_ref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {e}", "Config error".red());
            return ExitCode::from(2);
        }
    };

    let scenario = match &args.scenario {
        Some(path) => Scenario::load(path),
        None => Scenario::parse(DEFAULT_SCENARIO),
    };
    let scenario = match scenario {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}: {e}", "Scenario error".red());
            return ExitCode::from(2);
        }
    };

    print_banner(&args);

    let store = StateStore::new();
    let ctrlc_store = store.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – ending the competition …".yellow().bold());
        ctrlc_store.set_competition(CompetitionState::Ended);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; the session can only end on its own");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {e}", "failed to start tokio runtime".red());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg, scenario, store)) {
        Ok(outcome) => {
            print_outcome(&outcome);
            if outcome.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("{}: {e}", "Session error".red().bold());
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arguments and config
// ─────────────────────────────────────────────────────────────────────────────

/// Run a kitting session against the simulated cell.
#[derive(Debug, Default, PartialEq, Parser)]
#[command(name = "kitcell", version)]
struct Args {
    /// Scenario file; the bundled single-gear run when omitted.
    scenario: Option<PathBuf>,

    /// Cell configuration instead of `~/.kitcell/config.toml`.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn load_config(explicit: Option<&PathBuf>) -> Result<CellConfig, CellError> {
    match explicit {
        Some(path) => config::load_from(path)?
            .ok_or_else(|| CellError::Config(format!("{} not found", path.display()))),
        None => config::load_or_default(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

async fn run(
    cfg: CellConfig,
    scenario: Scenario,
    store: StateStore,
) -> Result<SessionOutcome, CellError> {
    let cfg = Arc::new(cfg);
    let bus = EventBus::default();
    let mut order_events = bus.subscribe(Topic::Orders);

    let cell = SimCell::builder(store.clone())
        .with_config(scenario.sim.clone())
        .build();
    let backends = CellBackends::uniform(cell.clone());
    populate_static_scene(cell.as_ref());
    scenario.apply_perception(&store);

    let sequencer = Arc::new(Mutex::new(PickPlaceSequencer::new(
        cfg.clone(),
        store.clone(),
        backends.clone(),
        bus.clone(),
    )));

    if !scenario.commands.is_empty() {
        let (server, client) = command_channel(sequencer.clone(), &cfg, 8);
        let server = tokio::spawn(server.run());
        for command in &scenario.commands {
            let reply = client.call(command.clone()).await?;
            print_reply(command, &reply);
        }
        drop(client);
        if let Err(e) = server.await {
            warn!(error = %e, "command server task failed");
        }
    }

    let feeds = scenario.spawn_feeds(store.clone());
    let outcome = run_session(cfg, store, backends, bus, sequencer).await;
    feeds.abort();

    print_events(&mut order_events);
    outcome
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner(args: &Args) {
    println!();
    println!("{}", "  kitcell – floor robot kitting session".bold().cyan());
    let source = args
        .scenario
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "bundled single-gear scenario".to_string());
    println!("  scenario: {}", source.dimmed());
    println!();
}

fn print_reply(command: &CellCommand, reply: &CommandReply) {
    let mark = if reply.success { "✓".green() } else { "✗".red() };
    println!("  {mark} {:<20} {}", command.name(), reply.message.dimmed());
}

fn print_events(rx: &mut TopicReceiver) {
    while let Some(event) = rx.try_recv() {
        match event.payload {
            EventPayload::PartPlaced {
                order_id,
                part,
                quadrant,
                success,
            } => {
                let mark = if success { "✓".green() } else { "✗".red() };
                println!("  {mark} [{order_id}] {part} → quadrant {quadrant}");
            }
            EventPayload::QualityChecked {
                order_id,
                all_passed,
            } if !all_passed => {
                println!("  {} [{order_id}] quality check flagged an issue", "!".yellow());
            }
            EventPayload::OrderSubmitted { order_id, accepted } => {
                let status = if accepted {
                    "submitted".green()
                } else {
                    "submission rejected".red()
                };
                println!("  → [{order_id}] {status}");
            }
            EventPayload::OrderDiscarded { order_id, reason } => {
                println!("  {} [{order_id}] discarded: {reason}", "-".yellow());
            }
            _ => {}
        }
    }
}

fn print_outcome(outcome: &SessionOutcome) {
    println!();
    if outcome.success {
        println!("{}", "  ✓ Session completed".green().bold());
    } else {
        println!("{}", "  ✗ Session aborted".red().bold());
    }
    for r in &outcome.reports {
        let quality = match r.quality_passed {
            Some(true) => "passed".green(),
            Some(false) => "issue".yellow(),
            None => "unavailable".dimmed(),
        };
        let submitted = if r.submitted { "yes".green() } else { "no".red() };
        println!(
            "    {:<8} parts {}/{}  quality {quality}  submitted {submitted}",
            r.order_id, r.parts_placed, r.parts_attempted
        );
    }
    if !outcome.discarded.is_empty() {
        println!("    discarded: {}", outcome.discarded.join(", ").yellow());
    }
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
