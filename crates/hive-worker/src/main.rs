// Entry point of the worker process.
//
// The parent starts the worker as `hive-worker <runnable> <read_fd> <write_fd>`
// and talks to it over the two descriptors. Exit status is 0 when the parent
// ended the conversation, 1 otherwise.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use hive_common::constants::variables;
use hive_common::{init_logging, LoggingConfig, MessageChannel};
use hive_sdk::StringUtil;
use hive_worker::{RunnableRegistry, Worker};

/// Command-line arguments for the worker process.
#[derive(Parser, Debug)]
#[command(name = "hive-worker", about = "eHive guest worker")]
struct Args {
    /// Name of the runnable to host, optionally fully qualified.
    #[arg(required_unless_present = "list")]
    runnable: Option<String>,

    /// Descriptor the parent writes to.
    #[arg(required_unless_present = "list")]
    read_fd: Option<i32>,

    /// Descriptor the parent reads from.
    #[arg(required_unless_present = "list")]
    write_fd: Option<i32>,

    /// Debug level; above 1 every protocol message is logged.
    #[arg(long, env = variables::DEBUG, default_value = "0", value_parser = parse_debug_level)]
    debug: i64,

    /// Print the known runnables and exit.
    #[arg(long)]
    list: bool,
}

fn parse_debug_level(value: &str) -> Result<i64, String> {
    StringUtil::convert_to_debug_level(value)
        .ok_or_else(|| format!("'{value}' is neither a number nor a boolean"))
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&LoggingConfig::from_env(args.debug));

    let registry = RunnableRegistry::with_builtins();
    if args.list {
        for name in registry.names() {
            println!("{name}");
        }
        return ExitCode::SUCCESS;
    }

    match run(args, &registry) {
        Ok(jobs) => {
            tracing::info!("worker finished after {} job(s)", jobs);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("worker failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args, registry: &RunnableRegistry) -> Result<usize> {
    let (Some(name), Some(read_fd), Some(write_fd)) = (args.runnable, args.read_fd, args.write_fd)
    else {
        anyhow::bail!("a runnable name and two file descriptors are required");
    };
    let runnable = registry.create(&name)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;

    runtime.block_on(async move {
        let channel = MessageChannel::from_raw_fds(read_fd, write_fd)
            .with_context(|| format!("cannot open descriptors {read_fd} and {write_fd}"))?;
        tracing::debug!(runnable = %name, read_fd, write_fd, "worker starting");
        let mut worker = Worker::new(runnable, channel).with_debug(args.debug);
        Ok::<_, anyhow::Error>(worker.run().await?)
    })
}
