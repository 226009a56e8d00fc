//! Single item lookup.

use velink_core::{ItemSnapshot, SessionHandle};

use crate::cli::{GetArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

fn detail(s: &ItemSnapshot, color: bool) -> String {
    [
        format!("Path:     {}", output::path_label(&s.path.to_string(), color)),
        format!("Value:    {}", s.text),
        format!("State:    {}", output::liveness(s.live, color)),
        format!("Writable: {}", if s.writable { "yes" } else { "no" }),
        format!(
            "Updated:  {}",
            s.updated_at.map_or_else(|| "-".into(), |t| t.to_rfc3339())
        ),
    ]
    .join("\n")
}

pub async fn handle(
    handle: &SessionHandle,
    args: GetArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let path = util::item_path(&args.path)?;
    util::connect(handle, global, args.settle).await?;

    let snapshot = handle.snapshot(&path).await?;
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &snapshot,
        |s| detail(s, color),
        |s| s.text.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
