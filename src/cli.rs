//! Command-line argument parsing for the `home-energy-sim` binary.

use std::env;
use std::path::PathBuf;

/// Parsed run options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOptions {
    pub scenario: Option<PathBuf>,
    pub preset: Option<String>,
    /// Overrides `simulation.ticks`.
    pub ticks: Option<usize>,
    /// Drive the heartbeat on wall time instead of a manual clock.
    pub realtime: bool,
    pub telemetry_out: Option<PathBuf>,
    /// Print the final snapshot and forecast as JSON instead of text.
    pub json: bool,
}

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Run(CliOptions),
    Help,
}

pub fn parse_args() -> Result<CliCommand, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    parse_args_from(args)
}

/// Parses arguments, excluding the program name.
///
/// # Errors
///
/// Returns a message for unknown flags, missing or malformed values,
/// repeated flags, and `--scenario` combined with `--preset`.
pub fn parse_args_from(args: Vec<String>) -> Result<CliCommand, String> {
    let mut opts = CliOptions::default();
    let mut i = 0usize;

    while i < args.len() {
        match args[i].as_str() {
            "--scenario" => {
                i += 1;
                let path = args.next_or_err(
                    i,
                    "missing value for --scenario (expected a TOML file path)",
                )?;
                if opts.scenario.replace(PathBuf::from(path)).is_some() {
                    return Err("--scenario provided more than once".to_string());
                }
            }
            "--preset" => {
                i += 1;
                let name =
                    args.next_or_err(i, "missing value for --preset (expected a preset name)")?;
                if opts.preset.replace(name.to_string()).is_some() {
                    return Err("--preset provided more than once".to_string());
                }
            }
            "--ticks" => {
                i += 1;
                let raw = args.next_or_err(i, "missing value for --ticks (expected a count)")?;
                let ticks = raw
                    .parse::<usize>()
                    .map_err(|_| format!("--ticks value \"{raw}\" is not a valid count"))?;
                if opts.ticks.replace(ticks).is_some() {
                    return Err("--ticks provided more than once".to_string());
                }
            }
            "--telemetry-out" => {
                i += 1;
                let path = args.next_or_err(
                    i,
                    "missing value for --telemetry-out (expected a file path)",
                )?;
                if opts.telemetry_out.replace(PathBuf::from(path)).is_some() {
                    return Err("--telemetry-out provided more than once".to_string());
                }
            }
            "--realtime" => opts.realtime = true,
            "--json" => opts.json = true,
            "--help" | "-h" => return Ok(CliCommand::Help),
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    if opts.scenario.is_some() && opts.preset.is_some() {
        return Err(
            "arguments `--scenario` and `--preset` are mutually exclusive; choose one source"
                .to_string(),
        );
    }

    if opts.scenario.is_none() && opts.preset.is_none() {
        opts.preset = Some("baseline".to_string());
    }

    Ok(CliCommand::Run(opts))
}

trait SliceArgExt {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String>;
}

impl SliceArgExt for [String] {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String> {
        self.get(index)
            .map(String::as_str)
            .ok_or_else(|| err.to_string())
    }
}

pub fn print_usage() {
    eprintln!("home-energy-sim: household battery, generator and accessory simulator");
    eprintln!();
    eprintln!("Usage: home-energy-sim [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --scenario <path>        Load scenario from TOML config file");
    eprintln!("  --preset <name>          Use a built-in preset (baseline, evening_peak, solar_surplus)");
    eprintln!("  --ticks <n>              Override the number of heartbeats");
    eprintln!("  --realtime               Run the heartbeat on wall time");
    eprintln!("  --telemetry-out <path>   Export stored series to CSV");
    eprintln!("  --json                   Print the final snapshot and forecast as JSON");
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --scenario or --preset is given, the baseline preset is used.");
    eprintln!("Log verbosity follows RUST_LOG (default: home_energy_sim=info).");
}
