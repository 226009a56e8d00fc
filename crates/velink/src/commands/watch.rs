//! Live change stream.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use velink_core::{ItemPath, Scope, SessionHandle, TreeEvent, Value};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum Change {
    Value,
    Added,
    Removed,
    Live,
}

#[derive(Debug, Serialize)]
struct ChangeLine {
    time: DateTime<Utc>,
    path: String,
    change: Change,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    live: Option<bool>,
}

impl ChangeLine {
    fn new(path: &ItemPath, change: Change) -> Self {
        Self {
            time: Utc::now(),
            path: path.to_string(),
            change,
            value: None,
            live: None,
        }
    }

    fn value(path: &ItemPath, value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::new(path, Change::Value)
        }
    }

    fn from_event(event: &TreeEvent) -> Option<Self> {
        Some(match event {
            TreeEvent::ValueChanged { path, value, .. } => Self::value(path, value.clone()),
            TreeEvent::ChildAdded { path, .. } => Self::new(path, Change::Added),
            TreeEvent::ChildRemoved { path, .. } => Self::new(path, Change::Removed),
            TreeEvent::LivenessChanged { path, live, .. } => Self {
                live: Some(*live),
                ..Self::new(path, Change::Live)
            },
            TreeEvent::Described { .. } => return None,
        })
    }

    fn text(&self, color: bool) -> String {
        let time = self.time.format("%H:%M:%S%.3f");
        let path = output::path_label(&self.path, color);
        match self.change {
            Change::Value => format!(
                "{time} {path} = {}",
                self.value
                    .as_ref()
                    .map_or_else(String::new, ToString::to_string)
            ),
            Change::Added => format!("{time} + {path}"),
            Change::Removed => format!("{time} - {path}"),
            Change::Live => format!(
                "{time} {path} {}",
                output::liveness(self.live.unwrap_or(false), color)
            ),
        }
    }
}

pub async fn handle(
    handle: &SessionHandle,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let paths = args
        .paths
        .iter()
        .map(|raw| util::item_path(raw))
        .collect::<Result<Vec<_>, _>>()?;
    util::connect(handle, global, 0).await?;

    let scope = if args.subtree {
        Scope::Subtree
    } else {
        Scope::Exact
    };
    let mut streams = Vec::with_capacity(paths.len());
    for path in &paths {
        streams.push(handle.watch(path, scope).await?);
    }

    let color = output::should_color(&global.color);
    let limit = args.count.unwrap_or(usize::MAX);
    let mut printed = 0_usize;
    // A value can reach both the snapshot and the stream; print it once.
    let mut last: HashMap<ItemPath, Value> = HashMap::new();
    let mut emit = |line: &ChangeLine| -> Result<bool, CliError> {
        let text = output::render_line(&global.output, line, |l| l.text(color))?;
        output::print_output(&text, global.quiet);
        printed += 1;
        Ok(printed >= limit)
    };

    for path in &paths {
        let snapshot = handle.snapshot(path).await?;
        if !snapshot.value.is_valid() {
            continue;
        }
        last.insert(path.clone(), snapshot.value.clone());
        let line = ChangeLine::value(path, snapshot.value);
        if emit(&line)? {
            return Ok(());
        }
    }

    let mut events = futures_util::stream::select_all(streams);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.next() => {
                let Some(event) = event else { break };
                if let TreeEvent::ValueChanged { path, value, .. } = &event {
                    if last.get(path) == Some(value) {
                        continue;
                    }
                    last.insert(path.clone(), value.clone());
                }
                let Some(line) = ChangeLine::from_event(&event) else {
                    continue;
                };
                if emit(&line)? {
                    break;
                }
            }
        }
    }
    Ok(())
}
