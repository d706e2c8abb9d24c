// sprout/src/main.rs
use std::fs;
use std::process;

use clap::Parser;
use colored::Colorize;
use sprout_common::config::Config;
use sprout_common::error::SproutError;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{CliArgs, CommandStatus};

#[tokio::main]
async fn main() {
    let cli_args = CliArgs::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            init_stderr_logging(EnvFilter::new("warn"));
            report_error(&e);
            process::exit(1);
        }
    };

    init_logging(&config, cli_args.verbose);

    match cli_args.command.run(&config).await {
        Ok(CommandStatus::Success) => {
            debug!("Command completed successfully.");
        }
        Ok(status @ CommandStatus::Degraded) => {
            debug!("Command completed with failed smoke tests.");
            process::exit(status.exit_code());
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            report_error(&e);
            process::exit(1);
        }
    }
}

fn report_error(e: &SproutError) {
    match e.stage() {
        Some(stage) => eprintln!(
            "{} [{}] during {}: {}",
            "Error".red().bold(),
            e.kind(),
            stage,
            e.root_cause()
        ),
        None => eprintln!("{} [{}]: {}", "Error".red().bold(), e.kind(), e),
    }
}

fn init_logging(config: &Config, verbose: u8) {
    let level_filter = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let max_log_level = level_filter.into_level().unwrap_or(tracing::Level::WARN);

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("SPROUT_LOG")
        .from_env_lossy();

    if verbose == 0 {
        init_stderr_logging(env_filter);
        return;
    }

    let log_dir = config.logs_dir();
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!(
            "{} Failed to create log directory {}: {}",
            "Warning:".yellow(),
            log_dir.display(),
            e
        );
        init_stderr_logging(env_filter);
        return;
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, "sprout.log");
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);
    let stderr_writer = std::io::stderr.with_max_level(max_log_level);
    let file_writer = non_blocking_appender.with_max_level(max_log_level);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(stderr_writer.and(file_writer))
        .with_ansi(true)
        .without_time()
        .try_init();

    // Keep guard alive
    Box::leak(Box::new(guard));

    debug!(
        "Verbose logging enabled. Writing logs to: {}/sprout.log",
        log_dir.display()
    );
}

fn init_stderr_logging(env_filter: EnvFilter) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .without_time()
        .try_init();
}
