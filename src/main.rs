//! frameloop - CLI

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use frameloop::runtime::executor::StatsSnapshot;
use frameloop::util::config::load_config;
use frameloop::util::logger::{self, LogLevel};
use frameloop::{Executor, Operation, NAME, VERSION};

/// Thread-affine cooperative operation executor
#[derive(Parser, Debug)]
#[command(name = "frameloop")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Config file (overrides $FRAMELOOP_CONFIG and the user config)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive an executor thread from several producer threads
    Run {
        /// Producer threads
        #[arg(short, long, default_value_t = 4)]
        producers: usize,

        /// Operations submitted by each producer
        #[arg(short, long, default_value_t = 1000)]
        operations: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print version information
    Version,
}

#[derive(Debug, Serialize)]
struct Report {
    producers: usize,
    operations: u64,
    sum: u64,
    executed: u64,
    elapsed_ms: u128,
    stats: StatsSnapshot,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    let level = if args.verbose {
        LogLevel::Debug
    } else {
        config
            .log_level
            .parse()
            .with_context(|| format!("Invalid log level in configuration: {}", config.log_level))?
    };
    logger::init_with_level(level);

    match args.command {
        Commands::Run {
            producers,
            operations,
            json,
        } => {
            let executor = Executor::with_config(config);
            let report = drive(&executor, producers, operations).context("Executor run failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} operations from {} producers in {} ms (sum {}, executed {})",
                    report.producers as u64 * report.operations,
                    report.producers,
                    report.elapsed_ms,
                    report.sum,
                    report.executed,
                );
            }
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}

/// Start the executor thread, flood it from `producers` threads, then await
/// every result and shut down.
fn drive(
    executor: &Executor,
    producers: usize,
    operations: u64,
) -> Result<Report> {
    let started = Instant::now();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    let startup = executor.run_async()?;
    runtime.block_on(async { startup.await })?;
    info!("executor thread {:?} ready", executor.thread_id());

    let executed = Arc::new(AtomicU64::new(0));
    let (sender, receiver) = crossbeam::channel::unbounded::<Operation<u64>>();

    crossbeam::scope(|scope| -> Result<()> {
        let handles: Vec<_> = (0..producers)
            .map(|producer| {
                let sender = sender.clone();
                let executed = executed.clone();
                scope.spawn(move |_| -> Result<()> {
                    for index in 0..operations {
                        let executed = executed.clone();
                        let value = producer as u64 * operations + index;
                        let operation = executor.invoke_async(move || {
                            executed.fetch_add(1, Ordering::Relaxed);
                            Ok(value)
                        })?;
                        sender.send(operation).map_err(|_| anyhow!("result channel closed"))?;
                    }
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle.join().map_err(|_| anyhow!("producer thread panicked"))??;
        }
        Ok(())
    })
    .map_err(|_| anyhow!("producer scope panicked"))??;
    drop(sender);

    let sum = runtime.block_on(async {
        let mut sum = 0u64;
        for operation in receiver.iter() {
            sum += operation.await?;
        }
        Ok::<_, anyhow::Error>(sum)
    })?;

    executor.shutdown();
    executor.join()?;

    Ok(Report {
        producers,
        operations,
        sum,
        executed: executed.load(Ordering::Relaxed),
        elapsed_ms: started.elapsed().as_millis(),
        stats: executor.stats().snapshot(),
    })
}
