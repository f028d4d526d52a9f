//! Online/offline signal with edge-triggered notifications.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use fieldsync_remote::ReachabilityProbe;

/// Network reachability as seen by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn from_online(online: bool) -> Self {
        if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online)
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Online => f.write_str("online"),
            Connectivity::Offline => f.write_str("offline"),
        }
    }
}

type Listener = Arc<dyn Fn(Connectivity) + Send + Sync>;

struct Inner {
    state: watch::Sender<Connectivity>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_listener: AtomicU64,
}

/// Shared online/offline state.
///
/// Listeners are called only on transitions, never for a repeated report of
/// the current state. They run synchronously on the thread that reported the
/// transition, so they must not block.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    /// Create a monitor with an initial state.
    pub fn new(initial: Connectivity) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                state,
                listeners: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    /// Current state.
    pub fn current_state(&self) -> Connectivity {
        *self.inner.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current_state().is_online()
    }

    /// Report a reachability observation.
    ///
    /// Returns `true` if this was a transition; only then are listeners
    /// and watchers notified.
    pub fn set_state(&self, state: Connectivity) -> bool {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });

        if changed {
            info!("Connectivity changed: {}", state);
            let listeners: Vec<Listener> = self
                .inner
                .listeners
                .lock()
                .map(|l| l.values().cloned().collect())
                .unwrap_or_default();
            for listener in listeners {
                listener(state);
            }
        }

        changed
    }

    /// Shorthand for [`ConnectivityMonitor::set_state`].
    pub fn set_online(&self, online: bool) -> bool {
        self.set_state(Connectivity::from_online(online))
    }

    /// Subscribe to transitions.
    ///
    /// The listener stays registered until the returned subscription is
    /// unsubscribed or dropped.
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Connectivity) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.insert(id, Arc::new(listener));
        }
        Subscription {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    /// Receiver for async consumers; `changed()` resolves on transitions.
    pub fn watch(&self) -> watch::Receiver<Connectivity> {
        self.inner.state.subscribe()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(Connectivity::Offline)
    }
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &self.current_state())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Registration handle returned by [`ConnectivityMonitor::on_change`].
pub struct Subscription {
    id: u64,
    monitor: Weak<Inner>,
}

impl Subscription {
    /// Remove the listener.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            if let Ok(mut listeners) = inner.listeners.lock() {
                listeners.remove(&self.id);
            }
        }
    }
}

/// Feeds periodic reachability probes into a monitor.
pub struct ReachabilityPoller {
    monitor: ConnectivityMonitor,
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
}

impl ReachabilityPoller {
    pub fn new(
        monitor: ConnectivityMonitor,
        probe: Arc<dyn ReachabilityProbe>,
        interval: Duration,
    ) -> Self {
        Self {
            monitor,
            probe,
            interval,
        }
    }

    /// Probe once and report the result. Returns whether it was a transition.
    pub async fn poll_once(&self) -> bool {
        let reachable = self.probe.is_reachable().await;
        debug!("Reachability probe: {}", reachable);
        self.monitor.set_online(reachable)
    }

    /// Probe on a fixed interval until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.poll_once().await;
            }
        })
    }
}
