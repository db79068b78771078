//! Home energy simulator entry point: CLI wiring and scenario-driven runs.

use std::path::Path;
use std::process;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use home_energy_sim::cli::{self, CliCommand, CliOptions};
use home_energy_sim::config::{ScenarioConfig, seconds_or_max};
use home_energy_sim::devices::AccessoryId;
use home_energy_sim::forecast::ForecastPoint;
use home_energy_sim::io::export::{collect_series, export_csv};
use home_energy_sim::sim::clock::{Clock, ManualClock, SystemClock};
use home_energy_sim::sim::engine::Engine;
use home_energy_sim::sim::heartbeat::{EngineHandle, Heartbeat};
use home_energy_sim::sim::kpi::EnergyReport;
use home_energy_sim::sim::types::EngineSnapshot;
use home_energy_sim::store::MemoryStore;

/// Final state printed with `--json`.
#[derive(Serialize)]
struct RunSummary<'a> {
    snapshot: &'a EngineSnapshot,
    forecast: &'a [ForecastPoint],
    report: &'a EnergyReport,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("home_energy_sim=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {message}");
    process::exit(1);
}

fn load_scenario(opts: &CliOptions) -> ScenarioConfig {
    let loaded = match (&opts.scenario, &opts.preset) {
        (Some(path), _) => ScenarioConfig::from_toml_file(path),
        (None, Some(name)) => ScenarioConfig::from_preset(name),
        (None, None) => Ok(ScenarioConfig::baseline()),
    };
    let mut scenario = loaded.unwrap_or_else(|e| fail(e));
    if let Some(ticks) = opts.ticks {
        scenario.simulation.ticks = ticks;
    }

    let errors = scenario.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }
    scenario
}

/// Builds an engine over an empty store, seeds accessories and the schedule.
fn build_engine<C: Clock>(scenario: &ScenarioConfig, clock: C) -> Engine<MemoryStore, C> {
    let mut engine = Engine::new(scenario.sim_config(), MemoryStore::new(), clock)
        .unwrap_or_else(|e| fail(e));
    let ids = engine
        .add_accessories(scenario.new_accessories())
        .unwrap_or_else(|e| fail(e));

    let by_name = |name: &str| -> Option<AccessoryId> {
        scenario
            .accessories
            .iter()
            .position(|a| a.name == name)
            .map(|i| ids[i])
    };
    for change in &scenario.schedule {
        let Some(id) = by_name(&change.accessory) else {
            fail(format!("no accessory named \"{}\"", change.accessory));
        };
        engine
            .schedule_power_change(
                id,
                change.on,
                seconds_or_max(change.at_secs),
                change.duration_secs.map(seconds_or_max),
            )
            .unwrap_or_else(|e| fail(e));
    }
    engine
}

/// Prints the forecast summary and energy report, then writes optional outputs.
fn finish<C: Clock>(engine: &Engine<MemoryStore, C>, start: DateTime<Utc>, opts: &CliOptions) {
    let snapshot = engine.snapshot().unwrap_or_else(|e| fail(e));
    let forecast = engine.forecast().unwrap_or_else(|e| fail(e));
    let report = EnergyReport::from_store(engine.store(), start, snapshot.timestamp)
        .unwrap_or_else(|e| fail(e));

    if opts.json {
        let summary = RunSummary {
            snapshot: &snapshot,
            forecast: &forecast,
            report: &report,
        };
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => fail(format!("failed to encode JSON: {e}")),
        }
    } else {
        println!("\n--- Forecast ---");
        println!("Time to empty:         {}", snapshot.time_to_empty);
        println!("Health:                {}", snapshot.health);
        println!("Pending events:        {}", snapshot.pending_events);
        if let Some(last) = forecast.last() {
            println!(
                "Trajectory:            {} points, {:.1}% at {}",
                forecast.len(),
                last.charge_level * 100.0,
                last.timestamp.format("%Y-%m-%dT%H:%M:%S")
            );
        }
        println!("\n{report}");
    }

    if let Some(ref path) = opts.telemetry_out {
        if let Err(e) = export_csv(&collect_series(engine.store()), Path::new(path)) {
            fail(format!("failed to write CSV: {e}"));
        }
        eprintln!("Telemetry written to {}", path.display());
    }
}

/// Steps a manual clock through the configured heartbeats.
fn run_stepped(scenario: &ScenarioConfig, opts: &CliOptions) {
    let start = scenario.start_time().unwrap_or_else(|e| fail(e));
    let clock = ManualClock::starting_at(start);
    let mut engine = build_engine(scenario, clock.clone());
    let interval = scenario.heartbeat();

    info!(ticks = scenario.simulation.ticks, "stepped run");
    for i in 0..scenario.simulation.ticks {
        if i > 0 {
            clock.advance(interval);
        }
        if let Err(e) = engine.tick() {
            fail(e);
        }
        if !opts.json {
            match engine.snapshot() {
                Ok(snapshot) => println!("{snapshot}"),
                Err(e) => fail(e),
            }
        }
    }

    finish(&engine, start, opts);
}

/// Runs the heartbeat on wall time until the configured tick count.
fn run_realtime(scenario: &ScenarioConfig, opts: &CliOptions) {
    let runtime = tokio::runtime::Runtime::new()
        .unwrap_or_else(|e| fail(format!("failed to create tokio runtime: {e}")));

    runtime.block_on(async {
        let clock = SystemClock;
        let start = clock.now();
        let engine = build_engine(scenario, clock);
        let handle = EngineHandle::new(engine).unwrap_or_else(|e| fail(e));
        let mut snapshots = handle.subscribe();

        let (stop, stop_rx) = broadcast::channel(1);
        let heartbeat = Heartbeat::spawn(handle.clone(), stop_rx);

        let mut seen = 0;
        while seen < scenario.simulation.ticks {
            if snapshots.changed().await.is_err() {
                break;
            }
            let snapshot = snapshots.borrow_and_update().clone();
            if !opts.json {
                println!("{snapshot}");
            }
            seen += 1;
        }

        // The heartbeat may already have exited; nothing to stop then.
        let _ = stop.send(());
        match heartbeat.await {
            Ok(completed) => info!(completed, "heartbeat finished"),
            Err(e) => fail(format!("heartbeat task failed: {e}")),
        }

        handle.with_engine(|engine| finish(engine, start, opts)).await;
    });
}

fn main() {
    init_tracing();

    let opts = match cli::parse_args() {
        Ok(CliCommand::Run(opts)) => opts,
        Ok(CliCommand::Help) => {
            cli::print_usage();
            return;
        }
        Err(e) => {
            eprintln!("error: {e}");
            cli::print_usage();
            process::exit(2);
        }
    };

    let scenario = load_scenario(&opts);
    if opts.realtime {
        run_realtime(&scenario, &opts);
    } else {
        run_stepped(&scenario, &opts);
    }
}
