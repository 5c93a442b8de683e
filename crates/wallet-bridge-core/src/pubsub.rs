//! State publisher: the current serialized snapshot of one named piece of
//! wallet state plus the listeners that want every new one.

use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

/// Receives every snapshot a [`StatePublisher`] publishes, as JSON text.
pub trait StateListener: Send + Sync {
    fn notify(&self, serialized: &str);
}

impl<F> StateListener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn notify(&self, serialized: &str) {
        self(serialized)
    }
}

struct PublisherInner {
    current: Option<String>,
    version: u64,
    listeners: Vec<Arc<dyn StateListener>>,
}

/// Holds the latest snapshot of a named state and fans it out.
///
/// Listeners run synchronously inside `publish`, in registration order, while
/// the publisher is locked, so every listener sees versions in order. A
/// listener must not publish to the publisher that is notifying it.
pub struct StatePublisher {
    name: String,
    inner: Mutex<PublisherInner>,
}

impl StatePublisher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(PublisherInner {
                current: None,
                version: 0,
                listeners: Vec::new(),
            }),
        }
    }

    /// Number of snapshots published so far.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// The latest snapshot, serialized.
    pub fn current(&self) -> Option<String> {
        self.lock().current.clone()
    }

    /// Replace the snapshot and notify every listener. Returns the new version.
    pub fn publish(&self, snapshot: Value) -> u64 {
        let serialized = snapshot.to_string();
        let mut inner = self.lock();
        inner.version += 1;
        inner.current = Some(serialized);
        let version = inner.version;

        tracing::trace!(state = %self.name, version, listeners = inner.listeners.len(), "publishing snapshot");
        if let Some(current) = inner.current.as_deref() {
            for listener in &inner.listeners {
                listener.notify(current);
            }
        }
        version
    }

    /// Serialize `snapshot` and publish it. Nothing changes if serialization
    /// fails.
    pub fn publish_serialize<T: Serialize + ?Sized>(
        &self,
        snapshot: &T,
    ) -> Result<u64, serde_json::Error> {
        let value = serde_json::to_value(snapshot)?;
        Ok(self.publish(value))
    }

    /// Register a listener. If a snapshot exists it is delivered right away.
    pub fn subscribe(&self, listener: Arc<dyn StateListener>) {
        let mut inner = self.lock();
        if let Some(current) = inner.current.as_deref() {
            listener.notify(current);
        }
        inner.listeners.push(listener);
    }

    fn lock(&self) -> MutexGuard<'_, PublisherInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
