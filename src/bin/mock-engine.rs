//! Stand-in for the calculation engine, driven by command-line flags.
//!
//! Speaks the same file protocol as the real engine: reads the request from
//! `--input`, writes the response to `--output` (or stdout), exits 0 when a
//! result was produced.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "mock-engine")]
#[command(about = "Scriptable calculation engine for tests")]
struct Args {
    /// Request document
    #[arg(long)]
    input: PathBuf,

    /// Response document; stdout when omitted
    #[arg(long)]
    output: Option<PathBuf>,

    /// Behavior while failing attempts remain
    #[arg(long, value_enum, default_value = "ok")]
    mode: Mode,

    /// Sleep before answering (all modes)
    #[arg(long, default_value = "0")]
    sleep_ms: u64,

    /// Only the first N invocations use --mode, later ones answer normally.
    /// Needs --state to count invocations across processes.
    #[arg(long, requires = "state")]
    fail_attempts: Option<u32>,

    /// Invocation counter file
    #[arg(long)]
    state: Option<PathBuf>,

    /// Canned response emitted verbatim in ok mode
    #[arg(long)]
    response: Option<PathBuf>,

    /// Write the response to stdout even when --output is given
    #[arg(long)]
    stdout: bool,

    /// Message printed to stderr in fail mode
    #[arg(long, default_value = "engine crashed")]
    stderr: String,

    /// Exit code in fail and error-shape modes
    #[arg(long, default_value = "1")]
    exit_code: i32,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Ok,
    /// Sleep for an hour, to be killed by the caller
    Hang,
    Fail,
    Empty,
    Garbage,
    ErrorShape,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let attempt = match &args.state {
        Some(state) => bump_counter(state)?,
        None => 1,
    };
    let mode = match args.fail_attempts {
        Some(n) if attempt > n => Mode::Ok,
        _ => args.mode,
    };

    if args.sleep_ms > 0 {
        std::thread::sleep(Duration::from_millis(args.sleep_ms));
    }

    let request: Value = serde_json::from_str(
        &std::fs::read_to_string(&args.input)
            .with_context(|| format!("reading {}", args.input.display()))?,
    )
    .context("request is not valid JSON")?;

    match mode {
        Mode::Ok => {
            let body = match &args.response {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => serde_json::to_string_pretty(&calculate(&request)?)?,
            };
            emit(&args, &body)?;
            Ok(())
        }
        Mode::Hang => {
            std::thread::sleep(Duration::from_secs(3600));
            Ok(())
        }
        Mode::Fail => {
            eprintln!("{}", args.stderr);
            std::process::exit(args.exit_code);
        }
        Mode::Empty => Ok(()),
        Mode::Garbage => emit(&args, "this is not json {"),
        Mode::ErrorShape => {
            let doc = json!({
                "error": "validation_error",
                "message": "staff_count is out of range",
                "details": "Input data is not valid"
            });
            emit(&args, &serde_json::to_string_pretty(&doc)?)?;
            std::process::exit(args.exit_code);
        }
    }
}

fn emit(args: &Args, body: &str) -> Result<()> {
    match (&args.output, args.stdout) {
        (Some(path), false) => std::fs::write(path, body)
            .with_context(|| format!("writing {}", path.display()))?,
        _ => {
            let mut out = std::io::stdout().lock();
            out.write_all(body.as_bytes())?;
            out.flush()?;
        }
    }
    Ok(())
}

fn bump_counter(path: &PathBuf) -> Result<u32> {
    let current = std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(0);
    let next = current + 1;
    std::fs::write(path, next.to_string())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(next)
}

// Toy cost model; only the shape of the answer matters to callers.
fn calculate(request: &Value) -> Result<Value> {
    let number = |key: &str| {
        request
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("request is missing numeric field {key}"))
    };

    let staff_count = number("staff_count")?;
    let training_hours = number("training_hours_needed")?;
    let kitchen = number("kitchen_size_sqm")?;
    let rent_sqm = number("location_rent_sqm")?;
    let equipment_value = number("equipment_value")?;
    let age = number("equipment_age_years")?;
    let capacity = number("daily_capacity")?;

    let wages = staff_count * 3200.0;
    let training = staff_count * training_hours * 25.0;
    let depreciation = equipment_value / 10.0 * (1.0 + age / 20.0);
    let rent = rent_sqm * kitchen;
    let supplies = capacity * 4.5 * 30.0;

    let staff_costs = wages + training;
    let equipment_costs = depreciation;
    let location_costs = rent;
    let operational_costs = supplies;
    let now = Utc::now().format("%Y%m%d_%H%M%S").to_string();

    Ok(json!({
        "session_id": now,
        "session_name": request.get("session_name").cloned().unwrap_or(Value::Null),
        "calculation_timestamp": now,
        "validation_passed": true,
        "staff_costs": staff_costs,
        "equipment_costs": equipment_costs,
        "location_costs": location_costs,
        "operational_costs": operational_costs,
        "total_cost": staff_costs + equipment_costs + location_costs + operational_costs,
        "cost_breakdowns": [
            {"category": "Staff", "subcategory": "Wages", "amount": wages,
             "formula": format!("{staff_count} staff x 3200"), "details": {"staff_count": staff_count}},
            {"category": "Staff", "subcategory": "Training", "amount": training,
             "formula": format!("{staff_count} x {training_hours}h x 25"), "details": "hourly rate 25"},
            {"category": "Equipment", "subcategory": "Depreciation", "amount": depreciation,
             "formula": "value / 10 x (1 + age / 20)", "details": {"age_years": age}},
            {"category": "Location", "subcategory": "Rent", "amount": rent,
             "formula": format!("{rent_sqm} x {kitchen} m2"), "details": null},
        ]
    }))
}
