use anyhow::Result;
use clap::{Parser, Subcommand};
use iot_orchestrator::{
    DeviceRegistry, Outcome, Program, ProgramReport, SequencePolicy, load_program,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "iot-orchestrator")]
#[command(about = "Run register/wake/sleep programs against simulated devices")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register all devices, wake them, then put them to sleep
    Run {
        /// Program file (JSON); defaults to IOT_CONFIG or the built-in program
        #[arg(short, long, env = "IOT_CONFIG")]
        config: Option<PathBuf>,
        /// Stop a device's command sequence at its first failure
        #[arg(long, default_value_t = false)]
        strict: bool,
        /// Print the report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Register all devices and list them
    Devices {
        #[arg(short, long, env = "IOT_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("iot_orchestrator=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            strict,
            json,
        } => {
            let program_config = load_program(config.as_deref())?;
            let policy = if strict {
                SequencePolicy::AbortOnFailure
            } else {
                SequencePolicy::FailSoft
            };
            info!(
                "Running program with {} devices ({:?})",
                program_config.devices.len(),
                policy
            );

            let report = Program::new(program_config).with_policy(policy).run().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }

            if !report.is_success() {
                std::process::exit(1);
            }
        }
        Commands::Devices { config } => {
            let program = Program::new(load_program(config.as_deref())?);
            let registry = Arc::new(DeviceRegistry::new());

            info!("Registering {} devices", program.config().devices.len());
            let start = Instant::now();
            let registrations = program.register(&registry).await;
            info!("Registration took {:?}", start.elapsed());

            println!("{:<12} {:<20} {:<15} {:<30}", "ID", "LABEL", "KIND", "STATUS");
            println!("{}", "-".repeat(77));
            for reg in registrations {
                let id = reg
                    .device
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let status = reg
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "Registered".to_string());
                println!(
                    "{:<12} {:<20} {:<15} {:<30}",
                    id,
                    reg.label,
                    reg.kind.to_string(),
                    status
                );
            }
        }
    }

    Ok(())
}

fn print_report(report: &ProgramReport) {
    println!("Registration ({:.3}s):", report.register_elapsed.as_secs_f64());
    for reg in &report.registrations {
        match (&reg.device, &reg.error) {
            (Some(id), _) => println!("  {} -> {}", reg.label, id),
            (None, Some(err)) => println!("  {} FAILED: {}", reg.label, err),
            (None, None) => println!("  {} -> ?", reg.label),
        }
    }

    println!();
    println!("Wake ({:.3}s):", report.wake_elapsed.as_secs_f64());
    print_outcome(&report.wake, 1);

    println!();
    println!("Sleep ({:.3}s):", report.sleep_elapsed.as_secs_f64());
    print_outcome(&report.sleep, 1);

    println!();
    println!("Elapsed: {:.3}s", report.total_elapsed.as_secs_f64());
}

fn print_outcome(outcome: &Outcome, depth: usize) {
    let indent = "  ".repeat(depth);
    match outcome {
        Outcome::Dispatch(d) => {
            let label = d.label.as_deref().unwrap_or("<unknown>");
            match d.error() {
                None => println!(
                    "{}{} {}: ok ({:.3}s)",
                    indent,
                    label,
                    d.command,
                    d.elapsed.as_secs_f64()
                ),
                Some(err) => println!(
                    "{}{} {}: {:?} error: {}",
                    indent,
                    label,
                    d.command,
                    err.kind(),
                    err
                ),
            }
        }
        Outcome::Skipped => println!("{}(skipped)", indent),
        Outcome::Sequence(children) => {
            println!("{}sequence:", indent);
            for child in children {
                print_outcome(child, depth + 1);
            }
        }
        Outcome::Parallel(children) => {
            println!("{}parallel:", indent);
            for child in children {
                print_outcome(child, depth + 1);
            }
        }
    }
}
