//! Command dispatch: bridges CLI args -> core operations -> output formatting.

pub mod config_cmd;
pub mod controls;
pub mod run;
pub mod send;
pub mod snapshot;

use moonlink_core::BridgeConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a printer-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, config: BridgeConfig, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Run(args) => run::handle(config, args, global).await,
        Command::Snapshot(args) => snapshot::handle(config, args, global).await,
        Command::Send(args) => send::handle(&config, args, global).await,
        // Handled before a printer config is resolved
        Command::Controls | Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
