//! Tessera command-line interface.
//!
//! Run block workloads from TOML configuration files:
//! ```sh
//! tessera-cli run job.toml
//! tessera-cli validate job.toml
//! tessera-cli devices job.toml
//! tessera-cli ops
//! ```

mod config;
mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tessera_kernel::KernelOp;

#[derive(Parser)]
#[command(name = "tessera-cli")]
#[command(about = "Tessera: block-array execution across serial, message-passing and cluster backends")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workload from a TOML configuration file.
    Run {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Rerun on the serial backend and require identical results.
        #[arg(long)]
        check: bool,
    },
    /// Validate a configuration file without running the workload.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// List the devices the configured backend places blocks on.
    Devices {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// List the block operations every backend registers.
    Ops,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, output, check } => {
            println!("Tessera block workload");
            println!("======================");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());

            let summary = runner::run_job(&job)?;
            println!(
                "Backend: {} ({} devices, {} cores)",
                summary.backend, summary.devices, summary.num_cores
            );
            println!("Blocks: {}, elements: {}", summary.blocks, summary.size);
            println!("Sum:  {:.6}", summary.sum);
            println!("Mean: {:.6}", summary.mean);
            println!("Min:  {:.6} at {:?}", summary.min.value, summary.min.coords);
            println!("Max:  {:.6} at {:?}", summary.max.value, summary.max.coords);
            for (p, v) in &summary.percentiles {
                println!("p{:<4} {:.6}", p, v);
            }

            if check {
                runner::cross_check(&job, &summary)?;
                println!("Serial cross-check passed.");
            }

            let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));
            if job.output.save_summary {
                runner::write_summary_csv(&summary, &out_dir.join("summary.csv"), &job)?;
            }

            println!("Workload complete.");
            Ok(())
        }
        Commands::Validate { config } => {
            let _job = config::load_config(&config)?;
            println!("Configuration is valid: {}", config.display());
            Ok(())
        }
        Commands::Devices { config } => {
            let job = config::load_config(&config)?;
            let devices = runner::describe_devices(&job.backend)?;
            println!("{} devices:", devices.len());
            for info in devices {
                match info.compute_units {
                    Some(units) => println!("  {}  [{}, {} CPUs]", info.device, info.backend_type, units),
                    None => println!("  {}  [{}]", info.device, info.backend_type),
                }
            }
            Ok(())
        }
        Commands::Ops => {
            println!("Block operations ({}):", KernelOp::ALL.len());
            for op in KernelOp::ALL {
                println!("  {}", op);
            }
            Ok(())
        }
    }
}
