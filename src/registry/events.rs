//! Debounced device update notifications
//!
//! Mutations are queued to a worker that waits for a quiet interval before
//! flushing the whole batch to every observer. Each new event restarts the
//! timer. Without a Tokio runtime the bus falls back to synchronous delivery.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::EVENT_DEBOUNCE_MS;
use crate::models::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateKind {
    Discovered,
    Updated,
    WentOffline,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Discovered => "discovered",
            UpdateKind::Updated => "updated",
            UpdateKind::WentOffline => "wentOffline",
        }
    }
}

/// Snapshot of a device right after the mutation that produced it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceUpdate {
    pub device: Device,
    pub kind: UpdateKind,
}

/// Observer callback, invoked with each flushed batch
pub type UpdateCallback = Arc<dyn Fn(&[DeviceUpdate]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observers = Arc<Mutex<Vec<(ObserverId, UpdateCallback)>>>;

pub struct EventBus {
    observers: Observers,
    next_id: AtomicU64,
    sender: Mutex<Option<mpsc::UnboundedSender<DeviceUpdate>>>,
    quiet: Duration,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_debounce(Duration::from_millis(EVENT_DEBOUNCE_MS))
    }

    pub fn with_debounce(quiet: Duration) -> Self {
        Self {
            observers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            sender: Mutex::new(None),
            quiet,
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&[DeviceUpdate]) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.observers.lock().push((id, Arc::new(callback)));
        id
    }

    /// Returns false when the id was not subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn emit(&self, update: DeviceUpdate) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            deliver(&self.observers, &[update]);
            return;
        };

        let mut sender = self.sender.lock();
        let update = match sender.as_ref().map(|tx| tx.send(update.clone())) {
            Some(Ok(())) => return,
            // Worker is gone (its runtime shut down); start a fresh one.
            Some(Err(mpsc::error::SendError(update))) => update,
            None => update,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(run_debouncer(rx, Arc::clone(&self.observers), self.quiet));
        if tx.send(update).is_err() {
            tracing::warn!("[EVENTS] Debounce worker closed before first event");
        }
        *sender = Some(tx);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_debouncer(
    mut rx: mpsc::UnboundedReceiver<DeviceUpdate>,
    observers: Observers,
    quiet: Duration,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        loop {
            match tokio::time::timeout(quiet, rx.recv()).await {
                Ok(Some(next)) => batch.push(next),
                Ok(None) | Err(_) => break,
            }
        }
        tracing::debug!("[EVENTS] Flushing {} device update(s)", batch.len());
        deliver(&observers, &batch);
    }
}

fn deliver(observers: &Observers, batch: &[DeviceUpdate]) {
    // Callbacks run outside the lock so they may subscribe or unsubscribe.
    let callbacks: Vec<UpdateCallback> = observers
        .lock()
        .iter()
        .map(|(_, cb)| Arc::clone(cb))
        .collect();
    for callback in callbacks {
        callback(batch);
    }
}
