use std::net::IpAddr;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tracesim::error::{outcome_suggestions, Outcome};
use tracesim::format;
use tracesim::runtime::config::{load_runtime_config, ConfigOverrides};

#[derive(Debug, Parser)]
#[command(name = "tracesim")]
#[command(about = "Simulate traceroute between two IP addresses using collected routing facts")]
#[command(after_help = "\
Exit codes:
  0: path found successfully
  1: source and destination found, but no path between them
  2: source not found in router network or destination not reachable
  4: live trace ran but found no Linux routers in the path
  10: invalid input, configuration, or internal errors

Reverse path tracing is the default and needs a controller address, either
from the configuration file or --controller-ip; use --forward-trace to
disable it.")]
struct Cli {
    /// Source IP address
    #[arg(short = 's', long)]
    source: String,

    /// Destination IP address
    #[arg(short = 'd', long)]
    destination: String,

    /// Output the path as JSON
    #[arg(short = 'j', long)]
    json: bool,

    /// No output, exit code only
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Increase logging detail (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable the live-trace fallback (simulation only)
    #[arg(long = "no-mtr")]
    no_mtr: bool,

    /// Force forward tracing (disables the reverse-trace default)
    #[arg(long = "forward-trace")]
    forward_trace: bool,

    /// Software simulation only, never invoke the live tracer
    #[arg(long = "software-sim")]
    software_sim: bool,

    /// Controller address used as the reverse-trace starting point
    #[arg(long = "controller-ip")]
    controller_ip: Option<String>,

    /// Directory containing router facts snapshots
    #[arg(long = "tsim-facts")]
    tsim_facts: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    process::exit(run_cli(cli));
}

fn run_cli(cli: Cli) -> i32 {
    let (Ok(src), Ok(dst)) = (
        cli.source.parse::<IpAddr>(),
        cli.destination.parse::<IpAddr>(),
    ) else {
        if !cli.quiet {
            eprintln!(
                "Error: invalid IP address in -s {} / -d {}",
                cli.source, cli.destination
            );
        }
        return Outcome::InvalidInput.exit_code();
    };

    let controller_ip = match cli.controller_ip.as_deref().map(str::parse::<IpAddr>) {
        None => None,
        Some(Ok(addr)) => Some(addr),
        Some(Err(_)) => {
            if !cli.quiet {
                eprintln!("Error: invalid controller IP address");
            }
            return Outcome::InvalidInput.exit_code();
        }
    };

    let overrides = ConfigOverrides {
        tsim_facts: cli.tsim_facts.clone(),
        controller_ip,
        no_mtr: cli.no_mtr,
        force_forward_trace: cli.forward_trace,
        software_simulation_only: cli.software_sim,
        verbose_level: (cli.verbose > 0).then_some(cli.verbose),
    };
    let config = match load_runtime_config(&overrides) {
        Ok(config) => config,
        Err(err) => {
            if !cli.quiet {
                eprintln!("Error: {err:#}");
            }
            return Outcome::Configuration.exit_code();
        }
    };

    init_logging(config.verbose_level, cli.quiet);

    match tracesim::run(&config, src, dst) {
        Ok(report) => {
            if cli.quiet {
                return report.outcome.exit_code();
            }
            if cli.json {
                println!("{}", format::format_json(&report.path));
            } else {
                println!(
                    "traceroute to {dst} from {src}{}",
                    report.mode.banner_note()
                );
                for line in format::format_text(&report.path) {
                    println!("{line}");
                }
            }
            report.outcome.exit_code()
        }
        Err(err) => {
            let outcome = err.outcome();
            if !cli.quiet {
                eprintln!("Error: {err}");
                for suggestion in outcome_suggestions(outcome) {
                    eprintln!("Suggestion: {suggestion}");
                }
                if cli.json {
                    println!("{}", format::failure_json(outcome, &err.to_string()));
                }
            }
            outcome.exit_code()
        }
    }
}

fn init_logging(verbose_level: u8, quiet: bool) {
    let default_filter = if quiet {
        "off"
    } else {
        match verbose_level {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
