use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{AdapterContext, TransportAdapter, WriteRequest, ticker};
use crate::backend::{ConnectionState, SourceKind};
use crate::error::CoreError;
use crate::model::{Format, ItemPath, Value};
use crate::tree::Mutation;

/// Raw events of the synthetic source.
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    /// Announce the whole schema with step-0 values.
    Populate,
    /// Advance scripted items to step `n`.
    Step(u64),
    /// Reflect an accepted write.
    Echo { path: ItemPath, value: Value },
}

/// One item of the built-in schema.
#[derive(Debug, Clone)]
struct MockItem {
    path: ItemPath,
    format: Option<Format>,
    writable: bool,
    /// Values cycled through by `Step`. Writable items hold one value.
    script: Vec<Value>,
}

impl MockItem {
    fn scripted(path: &str, unit: &str, decimals: u8, script: &[f64]) -> Self {
        Self {
            path: ItemPath::parse(path),
            format: Some(Format::new(unit, decimals)),
            writable: false,
            script: script.iter().copied().map(Value::Float).collect(),
        }
    }

    fn counter(path: &str, unit: &str, script: &[i64]) -> Self {
        Self {
            path: ItemPath::parse(path),
            format: Some(Format::new(unit, 0)),
            writable: false,
            script: script.iter().copied().map(Value::Int).collect(),
        }
    }

    fn fixed(path: &str, value: Value) -> Self {
        Self {
            path: ItemPath::parse(path),
            format: None,
            writable: false,
            script: vec![value],
        }
    }

    fn setting(path: &str, format: Option<Format>, value: Value) -> Self {
        Self {
            path: ItemPath::parse(path),
            format,
            writable: true,
            script: vec![value],
        }
    }

    fn at(&self, step: u64) -> Value {
        let len = self.script.len() as u64;
        usize::try_from(step % len.max(1))
            .ok()
            .and_then(|i| self.script.get(i))
            .cloned()
            .unwrap_or_default()
    }
}

/// Deterministic demo installation: a battery, a solar charger, a grid
/// meter, two tanks, a few consumers and two settings.
fn schema() -> Vec<MockItem> {
    vec![
        MockItem::scripted(
            "battery/soldc/voltage",
            "V",
            2,
            &[12.8, 12.8, 12.9, 12.9, 13.0, 12.9],
        ),
        MockItem::scripted("battery/soldc/current", "A", 1, &[-3.2, -3.1, -2.9, -3.0]),
        MockItem::counter("battery/soldc/soc", "%", &[87, 87, 86, 86]),
        MockItem::counter("solarcharger/ttyO2/yield/power", "W", &[420, 455, 470, 440]),
        MockItem::counter("grid/cgwacs/ac/power", "W", &[-120, 35, 310, 80]),
        MockItem::counter("tank/fresh/level", "%", &[64, 64, 63]),
        MockItem::counter("tank/waste/level", "%", &[22, 22, 23]),
        MockItem::fixed("devices/inverter/name", Value::from("Inverter")),
        MockItem::counter("devices/inverter/power", "W", &[350, 360]),
        MockItem::fixed("devices/charger/name", Value::from("Charger")),
        MockItem::counter("devices/charger/power", "W", &[120, 110]),
        MockItem::fixed("devices/fridge/name", Value::from("Fridge")),
        MockItem::counter("devices/fridge/power", "W", &[45, 0]),
        MockItem::setting("settings/gui/brightness", Some(Format::new("%", 0)), Value::Int(80)),
        MockItem::setting("settings/system/name", None, Value::from("velink demo")),
    ]
}

/// Synthetic source. Needs no network; emits the built-in schema once and
/// then advances every scripted item each `interval`.
pub struct MockAdapter {
    interval: Duration,
    items: Arc<Vec<MockItem>>,
    ctx: Option<AdapterContext>,
    cancel: Option<CancellationToken>,
}

impl MockAdapter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            items: Arc::new(schema()),
            ctx: None,
            cancel: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Paths of every item the source produces.
    pub fn paths(&self) -> Vec<ItemPath> {
        self.items.iter().map(|i| i.path.clone()).collect()
    }
}

fn translate(items: &[MockItem], event: MockEvent) -> Vec<Mutation> {
    match event {
        MockEvent::Populate => items
            .iter()
            .flat_map(|item| {
                [
                    Mutation::Describe {
                        path: item.path.clone(),
                        format: item.format.clone(),
                        writable: item.writable,
                    },
                    Mutation::ValueChanged {
                        path: item.path.clone(),
                        value: item.at(0),
                    },
                ]
            })
            .collect(),
        MockEvent::Step(n) => items
            .iter()
            .filter(|item| item.script.len() > 1)
            .map(|item| Mutation::ValueChanged {
                path: item.path.clone(),
                value: item.at(n),
            })
            .collect(),
        MockEvent::Echo { path, value } => vec![Mutation::ValueChanged { path, value }],
    }
}

impl TransportAdapter for MockAdapter {
    type RawEvent = MockEvent;

    fn kind(&self) -> SourceKind {
        SourceKind::Mock
    }

    fn connect(&mut self, ctx: AdapterContext) {
        self.disconnect();
        let cancel = ctx.cancel.child_token();
        let task_ctx = AdapterContext {
            cancel: cancel.clone(),
            ..ctx.clone()
        };
        tokio::spawn(run(Arc::clone(&self.items), self.interval, task_ctx));
        self.cancel = Some(cancel);
        self.ctx = Some(ctx);
    }

    fn disconnect(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }

    fn on_remote_event(&self, event: MockEvent) -> Vec<Mutation> {
        translate(&self.items, event)
    }

    fn translate_write(&self, request: WriteRequest) {
        let Some(ctx) = self.ctx.clone() else {
            return;
        };
        let accepted = self
            .items
            .iter()
            .find(|item| item.path == request.path)
            .map(|item| item.writable);
        let echo = match accepted {
            Some(true) => Some(self.on_remote_event(MockEvent::Echo {
                path: request.path.clone(),
                value: request.value.clone(),
            })),
            _ => None,
        };
        tokio::spawn(async move {
            let result = match (accepted, echo) {
                (Some(true), Some(echo)) => {
                    if ctx.push_all(echo).await {
                        Ok(())
                    } else {
                        Err(CoreError::SessionClosed)
                    }
                }
                (Some(_), _) => Err(CoreError::rejected(&request.path, "item is read-only")),
                (None, _) => Err(CoreError::rejected(
                    &request.path,
                    "mock source has no such item",
                )),
            };
            ctx.complete(request.id, result);
        });
    }
}

impl fmt::Debug for MockAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockAdapter")
            .field("interval", &self.interval)
            .field("items", &self.items.len())
            .field("running", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

async fn run(items: Arc<Vec<MockItem>>, interval: Duration, ctx: AdapterContext) {
    ctx.status(ConnectionState::Connecting).await;
    if !ctx.push_all(translate(&items, MockEvent::Populate)).await {
        return;
    }
    ctx.status(ConnectionState::Connected).await;
    info!(
        items = items.len(),
        interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        "mock source connected"
    );

    let mut tick = ticker(interval);
    // The first tick completes immediately; step 0 was the populate.
    tick.tick().await;
    let mut step: u64 = 1;
    loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            _ = tick.tick() => {
                if !ctx.push_all(translate(&items, MockEvent::Step(step))).await {
                    break;
                }
                step += 1;
            }
        }
    }
    debug!("mock adapter stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn populate_describes_and_sets_every_item() {
        let adapter = MockAdapter::new(Duration::from_secs(1));
        let out = adapter.on_remote_event(MockEvent::Populate);
        assert_eq!(out.len(), adapter.paths().len() * 2);
        assert!(out.contains(&Mutation::value_changed("battery/soldc/voltage", 12.8)));
    }

    #[test]
    fn steps_are_deterministic() {
        let adapter = MockAdapter::new(Duration::from_secs(1));
        let voltage = |step| {
            adapter
                .on_remote_event(MockEvent::Step(step))
                .into_iter()
                .find(|m| m.path() == &ItemPath::parse("battery/soldc/voltage"))
                .unwrap()
        };
        assert_eq!(voltage(1), Mutation::value_changed("battery/soldc/voltage", 12.8));
        assert_eq!(voltage(2), Mutation::value_changed("battery/soldc/voltage", 12.9));
        assert_eq!(voltage(8), voltage(2));
    }

    #[test]
    fn fixed_items_do_not_step() {
        let adapter = MockAdapter::new(Duration::from_secs(1));
        let out = adapter.on_remote_event(MockEvent::Step(3));
        assert!(!out.iter().any(|m| m.path() == &ItemPath::parse("devices/fridge/name")));
        assert!(!out.iter().any(|m| m.path() == &ItemPath::parse("settings/gui/brightness")));
    }
}
