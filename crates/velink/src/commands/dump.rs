//! Tree dump.

use tabled::Tabled;
use velink_core::{ItemPath, ItemSnapshot, SessionHandle};

use crate::cli::{DumpArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
pub(super) struct ItemRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl ItemRow {
    pub(super) fn new(s: &ItemSnapshot, color: bool) -> Self {
        Self {
            path: s.path.to_string(),
            value: s.text.clone(),
            state: output::liveness(s.live, color),
            updated: s
                .updated_at
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_default(),
        }
    }
}

pub async fn handle(
    handle: &SessionHandle,
    args: DumpArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    util::connect(handle, global, args.settle).await?;

    let prefix = args
        .prefix
        .as_deref()
        .map_or_else(ItemPath::root, ItemPath::parse);
    let items: Vec<ItemSnapshot> = handle
        .dump(&prefix)
        .await?
        .into_iter()
        .filter(|s| args.all || s.value.is_valid())
        .collect();

    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &items,
        |s| ItemRow::new(s, color),
        |s| format!("{} {}", s.path, s.text),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
