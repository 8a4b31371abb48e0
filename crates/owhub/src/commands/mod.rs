//! Command dispatch: routes parsed CLI commands to their handlers.

pub mod config_cmd;
pub mod confirm;
pub mod export;
pub mod status;
pub mod util;
pub mod watch;

use crate::cli::{Command, GlobalOpts};
use crate::config::HubContext;
use crate::error::CliError;

/// Dispatch a hub-backed command. `Config` and `Completions` are
/// handled in `main` before a hub exists.
pub async fn dispatch(
    cmd: Command,
    ctx: &HubContext,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(ctx, args, global).await,
        Command::Confirm(args) => confirm::handle(ctx, args, global).await,
        Command::Status(args) => status::handle(ctx, args, global).await,
        Command::Export(args) => export::handle(ctx, args, global).await,
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
