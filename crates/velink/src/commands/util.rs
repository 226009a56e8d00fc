//! Shared helpers for command handlers.

use std::time::Duration;

use velink_core::{CoreError, ItemPath, SessionHandle};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Wait for the source to connect, then give the initial population
/// `settle` seconds to arrive.
pub async fn connect(
    handle: &SessionHandle,
    global: &GlobalOpts,
    settle: u64,
) -> Result<(), CliError> {
    handle
        .wait_connected(Duration::from_secs(global.timeout))
        .await
        .map_err(|e| match e {
            CoreError::TransportDisconnected { .. } => CliError::Timeout {
                seconds: global.timeout,
            },
            other => other.into(),
        })?;
    if settle > 0 {
        tokio::time::sleep(Duration::from_secs(settle)).await;
    }
    Ok(())
}

/// Parse an item path argument. The root is not an item.
pub fn item_path(raw: &str) -> Result<ItemPath, CliError> {
    let path = ItemPath::parse(raw);
    if path.is_root() {
        return Err(CliError::Validation {
            field: "path".into(),
            reason: format!("'{raw}' does not name an item"),
        });
    }
    Ok(path)
}
