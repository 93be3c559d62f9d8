//! CLI argument parsing and command dispatch

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use shop_bench::{Runner, Scenario, ScenarioKind, ScenarioParams};
use shop_bench_core::BenchErrorKind;
use shop_bench_http::{CommerceClient, TargetConfig};
use shop_bench_report::{render_text, write_json, Report};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Run finished and every check passed
pub const EXIT_PASSED: u8 = 0;
/// Run finished but a threshold or the fairness check failed
pub const EXIT_FAILED: u8 = 1;
/// Run could not be carried out
pub const EXIT_FATAL: u8 = 2;

/// shop-bench - load generation and outcome verification for commerce backends
#[derive(Parser, Debug)]
#[command(name = "shop-bench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scenario against the target
    Run {
        /// Scenario preset
        #[arg(value_enum)]
        scenario: ScenarioKind,

        #[command(flatten)]
        args: ScenarioArgs,

        /// Also write the report as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// List the scenario presets
    List,
    /// Build and validate a scenario without contacting the target
    Validate {
        /// Scenario preset
        #[arg(value_enum)]
        scenario: ScenarioKind,

        #[command(flatten)]
        args: ScenarioArgs,
    },
}

/// Knobs shared by `run` and `validate`
#[derive(Args, Debug, Clone)]
pub struct ScenarioArgs {
    /// Base URL of the service under test
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:8000/api/v1")]
    pub base_url: String,

    /// Peak clients of ramping scenarios
    #[arg(long, env = "MAX_VUS")]
    pub max_vus: Option<usize>,

    /// Ramp-up duration (e.g. "30s")
    #[arg(long, env = "RAMP_DURATION", value_parser = humantime::parse_duration)]
    pub ramp_duration: Option<Duration>,

    /// Hold duration at peak (e.g. "1m")
    #[arg(long, env = "HOLD_DURATION", value_parser = humantime::parse_duration)]
    pub hold_duration: Option<Duration>,

    /// Accounts to provision
    #[arg(long, env = "NUM_USERS")]
    pub num_users: Option<usize>,

    /// Per-request timeout
    #[arg(long, env = "REQUEST_TIMEOUT", value_parser = humantime::parse_duration)]
    pub request_timeout: Option<Duration>,

    /// Stock of the contended product
    #[arg(long, env = "INITIAL_STOCK")]
    pub initial_stock: Option<u32>,

    /// Clients of constant scenarios
    #[arg(long, env = "VUS")]
    pub vus: Option<usize>,

    /// Duration of constant scenarios
    #[arg(long, env = "DURATION", value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Products created by product-insert
    #[arg(long, env = "TOTAL_PRODUCTS")]
    pub total_products: Option<usize>,

    /// Orders seeded by order-list
    #[arg(long, env = "ORDERS_PER_USER")]
    pub orders_per_user: Option<usize>,

    /// Hard deadline for the whole run
    #[arg(long, env = "MAX_DURATION", value_parser = humantime::parse_duration)]
    pub max_duration: Option<Duration>,

    /// Cap on iterations per second across all clients
    #[arg(long, env = "RATE_LIMIT")]
    pub rate_limit: Option<f64>,

    /// Run id embedded in account emails (defaults to the start time)
    #[arg(long, env = "RUN_ID")]
    pub run_id: Option<String>,
}

impl ScenarioArgs {
    fn params(&self) -> ScenarioParams {
        let run_id = self
            .run_id
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis().to_string());
        ScenarioParams {
            run_id,
            max_clients: self.max_vus,
            ramp: self.ramp_duration,
            hold: self.hold_duration,
            users: self.num_users,
            request_timeout: self.request_timeout,
            initial_stock: self.initial_stock,
            clients: self.vus,
            duration: self.duration,
            total_products: self.total_products,
            orders_per_user: self.orders_per_user,
            max_duration: self.max_duration,
            rate_limit: self.rate_limit,
        }
    }

    fn target(&self) -> TargetConfig {
        let mut target = TargetConfig::new(self.base_url.clone());
        if let Some(timeout) = self.request_timeout {
            target = target.with_request_timeout(timeout);
        }
        target
    }
}

impl Cli {
    /// Dispatch the selected command
    pub async fn run(&self) -> Result<ExitCode> {
        match &self.command {
            Commands::List => {
                for kind in ScenarioKind::ALL {
                    println!("{}", kind.name());
                }
                Ok(ExitCode::from(EXIT_PASSED))
            }
            Commands::Validate { scenario, args } => {
                let scenario = Scenario::preset(*scenario, &args.params())
                    .context("Failed to build scenario")?;
                scenario.validate().context("Scenario is invalid")?;
                print_banner(&scenario, &args.base_url);
                println!("✓ {} is valid", scenario.name);
                Ok(ExitCode::from(EXIT_PASSED))
            }
            Commands::Run {
                scenario,
                args,
                json,
            } => run_scenario(*scenario, args, json.as_deref()).await,
        }
    }
}

async fn run_scenario(
    kind: ScenarioKind,
    args: &ScenarioArgs,
    json: Option<&Path>,
) -> Result<ExitCode> {
    let scenario = Scenario::preset(kind, &args.params()).context("Failed to build scenario")?;
    print_banner(&scenario, &args.base_url);

    let client = CommerceClient::new(&args.target())
        .with_context(|| format!("Failed to create client for {}", args.base_url))?;
    let client = Arc::new(client);
    let runner = Runner::new(scenario, client.clone(), client);

    let (report, code) = match runner.run().await {
        Ok(report) => {
            let code = if report.passed { EXIT_PASSED } else { EXIT_FAILED };
            (report, code)
        }
        Err(e) if e.kind == BenchErrorKind::Setup => {
            (runner.generator().aborted(e.message), EXIT_FATAL)
        }
        Err(e) => return Err(e).context("Run failed"),
    };

    emit(&report, json)?;
    Ok(ExitCode::from(code))
}

fn emit(report: &Report, json: Option<&Path>) -> Result<()> {
    println!("{}", render_text(report));
    if let Some(path) = json {
        write_json(report, path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("✓ Report written to {}", path.display());
    }
    Ok(())
}

fn print_banner(scenario: &Scenario, base_url: &str) {
    println!("\n{}", "=".repeat(70));
    println!("   shop-bench - {}", scenario.name);
    println!("{}", "=".repeat(70));
    println!();
    println!("Configuration:");
    println!("  Target:       {base_url}");
    println!("  Executor:     {}", scenario.run.executor.name());
    println!("  Concurrency:  {}", scenario.run.max_concurrency);
    println!(
        "  Deadline:     {}",
        humantime::format_duration(scenario.run.max_duration)
    );
    println!("  Population:   {}", scenario.setup.population);
    println!("  Thresholds:   {}", scenario.thresholds.len());
    if let Some(check) = &scenario.fairness {
        println!(
            "  FIFO check:   capacity {} / {} clients",
            check.capacity, check.clients
        );
    }
    println!("{}", "=".repeat(70));
    println!();
}

/// Exit code for an error that escaped [`Cli::run`]
pub fn fatal(error: &anyhow::Error) -> ExitCode {
    eprintln!("Error: {error:#}");
    ExitCode::from(EXIT_FATAL)
}

