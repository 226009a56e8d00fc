//! Item writes.

use velink_core::{SessionHandle, Value};

use crate::cli::{GlobalOpts, SetArgs};
use crate::error::CliError;
use crate::output;

use super::util;

pub async fn handle(
    handle: &SessionHandle,
    args: SetArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let path = util::item_path(&args.path)?;
    let value = Value::parse_loose(&args.value);
    util::connect(handle, global, args.settle).await?;

    handle.set_value(&path, value.clone()).await?;
    tracing::info!(%path, %value, "write accepted");
    output::print_output(&format!("{path} <- {value}"), global.quiet);
    Ok(())
}
