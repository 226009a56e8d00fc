// ── Reactive item streams ──
//
// Channel-backed view of tree events for consumers living off the session
// loop. The stream owns its subscription: dropping it unsubscribes.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::bus::{Scope, SubscriptionGuard};
use crate::model::ItemPath;
use crate::tree::{ItemTree, TreeEvent};

/// Events for one path (or subtree), in the order they were applied.
#[derive(Debug)]
pub struct ItemStream {
    path: ItemPath,
    rx: mpsc::UnboundedReceiver<TreeEvent>,
    _guard: SubscriptionGuard,
}

impl ItemStream {
    /// Subscribe to `path`, creating a placeholder if nothing is there yet.
    pub fn attach(tree: &mut ItemTree, path: &ItemPath, scope: Scope) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = tree.subscribe(path, scope, move |event, _| {
            let _ = tx.send(event.clone());
        });
        Self {
            path: path.clone(),
            rx,
            _guard: tree.bus().guard(id),
        }
    }

    pub fn path(&self) -> &ItemPath {
        &self.path
    }

    /// Wait for the next event. `None` once the session has shut down.
    pub async fn next(&mut self) -> Option<TreeEvent> {
        self.rx.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_next(&mut self) -> Option<TreeEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for ItemStream {
    type Item = TreeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
