//! Command dispatch: bridges CLI args -> session handle -> output formatting.

pub mod dump;
pub mod get;
pub mod set;
pub mod table;
pub mod util;
pub mod watch;

use velink_core::SessionHandle;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a session-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    handle: &SessionHandle,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(handle, args, global).await,
        Command::Dump(args) => dump::handle(handle, args, global).await,
        Command::Get(args) => get::handle(handle, args, global).await,
        Command::Set(args) => set::handle(handle, args, global).await,
        Command::Table(args) => table::handle(handle, args, global).await,
        // Completions is handled before a session exists
        Command::Completions(_) => Ok(()),
    }
}
