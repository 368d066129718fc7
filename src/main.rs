// SPDX-License-Identifier: Apache-2.0 OR MIT
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ringlog::{logf, Config, Dispatcher, JobCategory, LogSystem};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Start the log system and dispatcher and push demo jobs through them
    Run {
        #[arg(long, short)]
        config: Option<PathBuf>,
        /// Number of demo jobs to submit
        #[arg(long, default_value_t = 32)]
        jobs: usize,
    },
    /// Parse and validate a configuration file
    CheckConfig { path: PathBuf },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run { config, jobs } => run(config, jobs),
        Command::CheckConfig { path } => check_config(&path),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn check_config(path: &Path) -> Result<()> {
    let config = load_config(Some(path))?;
    println!("{}: ok", path.display());
    println!("{}", config.to_json5());
    Ok(())
}

fn run(config_path: Option<PathBuf>, jobs: usize) -> Result<()> {
    let config = load_config(config_path.as_deref())?;

    let log_system = LogSystem::init(&config.log)
        .with_context(|| format!("starting log system on {}", config.log.path.display()))?;
    let logger = log_system.logger();
    logf!(logger, "main", "ringlogd starting, {} demo jobs", jobs);

    let dispatcher = Dispatcher::new(config.dispatcher, Some(logger.clone()));
    dispatcher
        .init(config.dispatcher.workers)
        .context("starting dispatcher")?;

    let done = Arc::new(AtomicUsize::new(0));
    for i in 0..jobs {
        let category = JobCategory::ALL[i % JobCategory::COUNT];
        let logger = logger.clone();
        let done = Arc::clone(&done);
        dispatcher.add_fn(category, move || {
            logf!(logger, category.as_str(), "job {} ran in the {} category", i, category);
            done.fetch_add(1, Ordering::Relaxed);
        })?;
    }

    // Only General jobs run on the pool; drain the rest here.
    let mut drained = 0;
    for category in [JobCategory::Main, JobCategory::Render, JobCategory::Io] {
        drained += dispatcher.job_process_for_category(category);
    }
    while done.load(Ordering::Relaxed) < jobs {
        std::thread::yield_now();
    }
    logf!(logger, "main", "{} category jobs ran on the main thread", drained);

    dispatcher.stop().context("stopping dispatcher")?;
    logger.flush();

    let log_stats = logger.stats();
    let dispatch_stats = dispatcher.stats();
    log_system.shutdown().context("stopping log system")?;

    println!("log: {:?}", log_stats);
    println!("dispatch: {:?}", dispatch_stats);
    Ok(())
}
