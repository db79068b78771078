use std::process::Command;

#[derive(Debug)]
struct Outlook {
    time_to_empty: String,
    health: String,
}

#[test]
fn presets_run_via_cli_and_produce_distinct_outlooks() {
    let baseline = parse_outlook(&run_cli(&["--preset", "baseline", "--ticks", "20"]));
    let evening_peak = parse_outlook(&run_cli(&["--preset", "evening_peak", "--ticks", "20"]));
    let solar_surplus = parse_outlook(&run_cli(&["--preset", "solar_surplus", "--ticks", "20"]));

    assert_eq!(baseline.health, "healthy", "baseline: {baseline:?}");
    assert_eq!(evening_peak.health, "critical", "evening_peak: {evening_peak:?}");
    assert_eq!(solar_surplus.health, "healthy", "solar_surplus: {solar_surplus:?}");

    assert_eq!(solar_surplus.time_to_empty, "never");
    assert_ne!(
        baseline.time_to_empty, evening_peak.time_to_empty,
        "expected baseline and evening_peak to drain at different rates"
    );
}

#[test]
fn scenario_files_match_their_presets() {
    for name in ["baseline", "evening_peak", "solar_surplus"] {
        let path = format!("scenarios/{name}.toml");
        let from_file = run_cli(&["--scenario", &path, "--ticks", "15"]);
        let from_preset = run_cli(&["--preset", name, "--ticks", "15"]);
        assert_eq!(from_file, from_preset, "{path} diverges from preset {name}");
    }
}

#[test]
fn json_summary_is_machine_readable() {
    let stdout = run_cli(&["--preset", "evening_peak", "--ticks", "12", "--json"]);
    let summary: serde_json::Value =
        serde_json::from_str(&stdout).expect("stdout should be a single JSON document");

    assert_eq!(summary["snapshot"]["health"], "critical");
    assert_eq!(summary["snapshot"]["time_to_empty"]["kind"], "after");
    assert!(summary["snapshot"]["time_to_empty"]["seconds"].as_f64().is_some_and(|s| s > 0.0));
    assert_eq!(summary["snapshot"]["accessories"].as_array().map(Vec::len), Some(4));

    let forecast = summary["forecast"].as_array().expect("forecast array");
    assert!(!forecast.is_empty());
    assert_eq!(forecast[0]["timestamp"], summary["snapshot"]["timestamp"]);

    assert!(summary["report"]["consumed_wh"].as_f64().is_some_and(|wh| wh > 0.0));
}

#[test]
fn unknown_preset_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_home-energy-sim"))
        .args(["--preset", "blackout"])
        .output()
        .expect("home-energy-sim process should run");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown preset"), "stderr={stderr}");
}

fn run_cli(args: &[&str]) -> String {
    let output = Command::new(env!("CARGO_BIN_EXE_home-energy-sim"))
        .args(args)
        .output()
        .expect("home-energy-sim process should run");

    assert!(
        output.status.success(),
        "run failed for {args:?}: stderr={} ",
        String::from_utf8_lossy(&output.stderr)
    );

    String::from_utf8(output.stdout).expect("stdout should be valid UTF-8")
}

fn parse_outlook(stdout: &str) -> Outlook {
    Outlook {
        time_to_empty: parse_field(stdout, "Time to empty:"),
        health: parse_field(stdout, "Health:"),
    }
}

fn parse_field(stdout: &str, label: &str) -> String {
    let line = stdout
        .lines()
        .find(|line| line.trim_start().starts_with(label))
        .unwrap_or_else(|| panic!("missing line `{label}` in output: {stdout}"));

    line.split_once(':')
        .map(|(_, right)| right.trim().to_string())
        .unwrap_or_else(|| panic!("invalid format for line `{line}`"))
}
