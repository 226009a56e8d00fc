//! Sorted table view over a path pattern.

use std::collections::BTreeMap;

use serde::Serialize;
use velink_core::{Comparator, Row, SessionHandle, SortKey, TableSpec, Value};

use crate::cli::{GlobalOpts, TableArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct TableLine {
    path: String,
    live: bool,
    #[serde(skip_serializing_if = "unset")]
    key: Value,
    columns: BTreeMap<String, Value>,
}

fn unset(value: &Value) -> bool {
    !value.is_valid()
}

fn comparator(args: &TableArgs) -> Comparator {
    let key = args.sort.as_deref().map_or(SortKey::Name, SortKey::child);
    if args.desc {
        Comparator::descending(key)
    } else {
        Comparator::ascending(key)
    }
}

pub async fn handle(
    handle: &SessionHandle,
    args: TableArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    util::connect(handle, global, args.settle).await?;

    let spec = TableSpec::new(&args.pattern, comparator(&args))
        .with_columns(args.columns.iter().map(|c| SortKey::child(c)).collect());
    let model = handle.table_model(spec).await?;
    let rows = model.rows();
    let lines: Vec<TableLine> = rows.iter().map(|r| line(r, &args.columns)).collect();

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &lines,
        |_| {
            let mut headers = vec!["Row".to_owned(), "State".to_owned()];
            headers.extend(args.columns.iter().cloned());
            let records = rows
                .iter()
                .map(|row| {
                    let mut record = vec![
                        output::path_label(&row.path.to_string(), color),
                        output::liveness(row.live, color),
                    ];
                    record.extend(row.cells.iter().map(ToString::to_string));
                    record
                })
                .collect();
            output::render_dynamic_table(headers, records)
        },
        |lines| {
            lines
                .iter()
                .map(|l| l.path.clone())
                .collect::<Vec<_>>()
                .join("\n")
        },
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

fn line(row: &Row, columns: &[String]) -> TableLine {
    TableLine {
        path: row.path.to_string(),
        live: row.live,
        key: row.key.clone(),
        columns: columns.iter().cloned().zip(row.cells.iter().cloned()).collect(),
    }
}
