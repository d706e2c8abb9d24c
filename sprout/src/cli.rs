// sprout/src/cli.rs
//! Defines the command-line argument structure using clap.
use clap::{ArgAction, Parser, Subcommand};
use sprout_common::error::Result;
use sprout_common::model::platform::Platform;
use sprout_common::Config;
use tracing::debug;

pub mod info;
pub mod install;
pub mod list;
pub mod status;

use crate::cli::info::Info;
use crate::cli::install::InstallArgs;
use crate::cli::list::List;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "sprout", bin_name = "sprout")]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// More output; repeat for debug (-vv) and trace (-vvv) logs
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Install(InstallArgs),
    Info(Info),
    List(List),
}

/// How a command that did not fail outright ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    /// Everything installed, but at least one smoke test failed.
    Degraded,
}

impl CommandStatus {
    /// Process exit status; hard failures exit with 1 in `main`.
    pub fn exit_code(self) -> i32 {
        match self {
            CommandStatus::Success => 0,
            CommandStatus::Degraded => 2,
        }
    }
}

impl Command {
    pub async fn run(&self, config: &Config) -> Result<CommandStatus> {
        match self {
            Self::Install(command) => command.run(config).await,
            Self::Info(command) => command.run(config).map(|_| CommandStatus::Success),
            Self::List(command) => command.run(config).map(|_| CommandStatus::Success),
        }
    }
}

/// `--platform` (or `SPROUT_PLATFORM`) if given, otherwise the running host.
pub fn resolve_platform(requested: Option<&str>) -> Result<Platform> {
    match requested {
        Some(raw) => {
            let platform: Platform = raw.parse()?;
            debug!("Using platform override {} ({})", platform, platform.platform_id());
            Ok(platform)
        }
        None => Platform::detect(),
    }
}
