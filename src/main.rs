use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use track_a_face::{
    validate, AppConfig, CalculationBridge, CalculationError, RestaurantInput, SessionStore,
};

#[derive(Parser)]
#[command(name = "track-a-face")]
#[command(about = "Restaurant startup and operating cost estimator")]
struct Cli {
    /// TOML configuration file; TRACKAFACE_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check an input document without running the engine
    Validate {
        /// Input file path (use "-" for stdin)
        #[arg(short, long, default_value = "-")]
        input: String,
    },

    /// Validate, then run the calculation engine
    Calculate {
        /// Input file path (use "-" for stdin)
        #[arg(short, long, default_value = "-")]
        input: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Timeout in seconds, overriding the configuration
        #[arg(short, long)]
        timeout: Option<f64>,

        /// Total attempts for transient failures, overriding the configuration
        #[arg(short, long)]
        retries: Option<u32>,

        /// Print technical details of a failure
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print a default input document to start from
    Template,

    /// Manage saved sessions
    #[command(subcommand)]
    Session(SessionCommands),

    /// Check the interpreter and engine installation
    Diagnose {
        /// Also run one calculation on a known-good input
        #[arg(long)]
        test_connection: bool,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Save an input document as a session
    Save {
        /// Input file path (use "-" for stdin)
        #[arg(short, long, default_value = "-")]
        input: String,

        /// File name inside the sessions directory (generated when omitted)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Print the inputs stored in a session file
    Load { path: PathBuf },

    /// List saved sessions, newest first
    List,

    /// Delete a session file
    Delete { path: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    // stdout carries results, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate { input } => {
            let input = read_input(&input)?;
            let report = validate(&input);
            for outcome in &report.outcomes {
                println!("{outcome}");
            }
            if report.is_submittable() {
                println!("input can be submitted");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("input is blocked by {} error(s)", report.errors().count());
                Ok(ExitCode::from(1))
            }
        }

        Commands::Calculate {
            input,
            format,
            timeout,
            retries,
            verbose,
        } => {
            let input = read_input(&input)?;
            let mut engine = config.engine;
            if let Some(t) = timeout {
                engine.timeout_secs = t;
            }
            if let Some(r) = retries {
                engine.max_retries = r;
            }
            engine.validate()?;

            let bridge = CalculationBridge::new(engine);
            match bridge.submit(&input).await {
                Ok(result) => {
                    match format {
                        OutputFormat::Json => println!(
                            "{}",
                            serde_json::to_string_pretty(&result)
                                .context("Failed to serialize result")?
                        ),
                        OutputFormat::Text => println!("{result}"),
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    report_failure(&err, format, verbose)?;
                    Ok(ExitCode::from(2))
                }
            }
        }

        Commands::Template => {
            let input = RestaurantInput {
                session_name: "New session".to_string(),
                ..RestaurantInput::default()
            };
            println!("{}", serde_json::to_string_pretty(&input)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Session(command) => {
            let store = SessionStore::new(&config.sessions_dir);
            run_session(&store, command)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Diagnose { test_connection } => {
            let bridge = CalculationBridge::new(config.engine);
            let diagnostic = bridge.diagnose().await;
            println!("{diagnostic}");
            println!("Sessions:    {}", config.sessions_dir.display());

            let mut ready = diagnostic.is_ready();
            if test_connection {
                match bridge.test_connection().await {
                    Ok(result) => {
                        println!("Connection:  ok (total cost {:.2})", result.total_cost)
                    }
                    Err(err) => {
                        ready = false;
                        println!("Connection:  FAILED ({}: {})", err.kind, err.message);
                    }
                }
            }
            Ok(if ready {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
    }
}

fn run_session(store: &SessionStore, command: SessionCommands) -> Result<()> {
    match command {
        SessionCommands::Save { input, name } => {
            let input = read_input(&input)?;
            let path = match name {
                Some(name) => store.save_as(&input, &name)?,
                None => store.save(&input)?,
            };
            println!("{}", path.display());
        }
        SessionCommands::Load { path } => {
            let input = store.load(&path)?;
            println!("{}", serde_json::to_string_pretty(&input)?);
        }
        SessionCommands::List => {
            let entries = store.list()?;
            if entries.is_empty() {
                println!("No saved sessions in {}", store.dir().display());
            }
            for entry in entries {
                println!(
                    "{:<30} {}  {}",
                    entry.metadata.session_name,
                    entry.metadata.modified_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.path.display()
                );
            }
        }
        SessionCommands::Delete { path } => {
            store.delete(&path)?;
            println!("deleted {}", path.display());
        }
    }
    Ok(())
}

fn report_failure(err: &CalculationError, format: OutputFormat, verbose: bool) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(err)?),
        OutputFormat::Text => {
            eprintln!("{}", err.user_summary());
            if let Some(fault) = err.fault {
                eprintln!("Cause: {fault}");
            }
            if verbose && !err.details.is_empty() {
                eprintln!("\nDetails:\n{}", err.details);
            }
        }
    }
    Ok(())
}

fn read_input(source: &str) -> Result<RestaurantInput> {
    let text = if source == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| anyhow!("Failed to read from stdin: {e}"))?;
        buffer
    } else {
        std::fs::read_to_string(Path::new(source))
            .map_err(|e| anyhow!("Failed to read input file {source}: {e}"))?
    };
    serde_json::from_str(&text).map_err(|e| anyhow!("Failed to parse input JSON: {e}"))
}
