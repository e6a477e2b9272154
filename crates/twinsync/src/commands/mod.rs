//! Command handlers: bridge CLI args -> core calls -> output formatting.

pub mod config_cmd;
pub mod key;
pub mod model_id;
pub mod replay;
pub mod schemas;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a parsed command to its handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Key(args) => key::handle(&args, global),
        Command::ModelId(args) => model_id::handle(&args, global),
        Command::Schemas(args) => schemas::handle(&args, global),
        Command::Replay(args) => replay::handle(args, global).await,
        Command::Config(args) => config_cmd::handle(&args, global),
        // Completions are handled before dispatch
        Command::Completions(_) => Ok(()),
    }
}
