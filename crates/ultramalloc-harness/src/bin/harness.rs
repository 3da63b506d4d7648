//! CLI entrypoint for the ultramalloc harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use ultramalloc_core::{AllocatorLogLevel, SafetyLevel};
use ultramalloc_harness::{ChurnConfig, LogEmitter, LogEntry, Scenario, run_churn, run_scenario};

/// Scenario and stress tooling for ultramalloc.
#[derive(Debug, Parser)]
#[command(name = "ultramalloc-harness")]
#[command(about = "Scenario and stress harness for the ultramalloc allocator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Plain,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run canned scenarios and report each check.
    Scenario {
        /// Scenario to run (all scenarios if omitted).
        name: Option<Scenario>,
        /// Safety mode (strict, hardened or off).
        #[arg(long, default_value = "strict", value_parser = parse_mode)]
        mode: SafetyLevel,
        #[arg(long, value_enum, default_value_t = Format::Plain)]
        format: Format,
    },
    /// Run the multi-threaded allocate/reallocate/release workload.
    Churn {
        #[arg(long, default_value_t = 4)]
        threads: usize,
        /// Operations per thread.
        #[arg(long, default_value_t = 10_000)]
        ops: usize,
        #[arg(long, default_value_t = 0xDEAD_BEEF)]
        seed: u64,
        #[arg(long, default_value = "strict", value_parser = parse_mode)]
        mode: SafetyLevel,
        #[arg(long, value_enum, default_value_t = Format::Plain)]
        format: Format,
    },
    /// Run every scenario with trace logging and export the lifecycle log.
    Log {
        /// Output JSONL path.
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value = "strict", value_parser = parse_mode)]
        mode: SafetyLevel,
    },
}

fn parse_mode(s: &str) -> Result<SafetyLevel, String> {
    let mode = SafetyLevel::from_str_loose(s);
    if mode.as_str().eq_ignore_ascii_case(s.trim()) {
        Ok(mode)
    } else {
        Err(format!("unknown mode '{s}' (expected strict, hardened or off)"))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Scenario { name, mode, format } => {
            let scenarios = name.map_or_else(|| Scenario::ALL.to_vec(), |s| vec![s]);
            let mut failed = 0usize;
            let mut reports = Vec::with_capacity(scenarios.len());
            for scenario in scenarios {
                let report = run_scenario(scenario, mode, None)?;
                if !report.passed {
                    failed += 1;
                }
                reports.push(report);
            }
            match format {
                Format::Plain => {
                    for report in &reports {
                        print!("{report}");
                    }
                }
                Format::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
            }
            if failed > 0 {
                return Err(format!("{failed} scenario(s) failed").into());
            }
        }
        Command::Churn {
            threads,
            ops,
            seed,
            mode,
            format,
        } => {
            let report = run_churn(ChurnConfig {
                threads,
                ops,
                seed,
                mode,
            })?;
            match format {
                Format::Plain => print!("{report}"),
                Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
            if !report.passed() {
                return Err("churn found an inconsistent heap".into());
            }
        }
        Command::Log { output, mode } => {
            let mut emitter = LogEmitter::to_file(&output)?;
            for scenario in Scenario::ALL {
                let report = run_scenario(scenario, mode, Some(AllocatorLogLevel::Trace))?;
                for record in &report.log {
                    let entry = LogEntry::from_record(record)
                        .with_scenario(scenario.as_str())
                        .with_mode(mode.as_str());
                    emitter.emit(&entry)?;
                }
            }
            let lines = emitter.lines();
            emitter.finish()?;
            eprintln!("Wrote {lines} log lines to {}", output.display());
        }
    }

    Ok(())
}
