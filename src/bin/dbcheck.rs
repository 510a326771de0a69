use sqlpool::diagnostics::{run_checks, CheckReport, Expectations};
use sqlpool::{Executor, Pool, PoolConfig, SqliteFactory};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: dbcheck [--config PATH] [--json] [--table NAME]... [--view NAME]...
without --table or --view, the football statistics tables and views are checked";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    json: bool,
    expected: Expectations,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().ok_or("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--json" => parsed.json = true,
            "--table" => parsed
                .expected
                .tables
                .push(args.next().ok_or("--table needs a name")?),
            "--view" => parsed
                .expected
                .views
                .push(args.next().ok_or("--view needs a name")?),
            "-h" | "--help" => return Err(USAGE.to_string()),
            other => return Err(format!("unknown argument '{}'\n{}", other, USAGE)),
        }
    }
    if parsed.expected.is_empty() {
        parsed.expected = Expectations::standard();
    }
    Ok(parsed)
}

fn print_report(report: &CheckReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(out) => println!("{}", out),
            Err(e) => eprintln!("Failed to serialize report: {}", e),
        }
        return;
    }
    for check in &report.checks {
        let mark = if check.passed { "✓" } else { "✗" };
        println!("{} {}: {}", mark, check.name, check.detail);
    }
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sqlpool=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::from(2);
        }
    };

    let config = match PoolConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ config: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(address = %config.target.address(), "checking database");

    let pool = match Pool::connect(config, SqliteFactory::new()) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("✗ connection: database connection failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let executor = Executor::new(pool);
    let report = run_checks(&executor, &args.expected);
    print_report(&report, args.json);
    executor.close_all();

    if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
