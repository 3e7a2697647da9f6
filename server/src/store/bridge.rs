//! Pub/Sub bridge management for the Redis engine
//!
//! One bridge per channel (not per subscriber): a dedicated task holds the
//! Redis SUBSCRIBE connection and forwards payloads to a local broadcast
//! channel. Reference counting tears the bridge down when the last local
//! subscriber drops.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Manages the bridges for all channels this process subscribes to
pub struct BridgeRegistry {
    bridges: RwLock<HashMap<String, Arc<ChannelBridge>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    broadcast_capacity: usize,
}

impl BridgeRegistry {
    pub fn new(broadcast_capacity: usize) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            bridges: RwLock::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
            broadcast_capacity,
        }
    }

    /// Get or create the bridge for a channel. Returns `(bridge, is_new)`;
    /// the caller starts the forwarding task when `is_new`.
    pub fn get_or_create(&self, channel: &str) -> (Arc<ChannelBridge>, bool) {
        {
            let bridges = self.bridges.read();
            if let Some(bridge) = bridges.get(channel) {
                return (Arc::clone(bridge), false);
            }
        }

        let mut bridges = self.bridges.write();
        if let Some(bridge) = bridges.get(channel) {
            return (Arc::clone(bridge), false);
        }
        let bridge = Arc::new(ChannelBridge::new(
            channel.to_owned(),
            self.broadcast_capacity,
            self.shutdown_rx.clone(),
        ));
        bridges.insert(channel.to_owned(), Arc::clone(&bridge));
        (bridge, true)
    }

    /// Remove a bridge once its subscriber count has reached zero
    pub fn remove_if_idle(&self, channel: &str) {
        let mut bridges = self.bridges.write();
        if let Some(bridge) = bridges.get(channel) {
            if bridge.subscriber_count() == 0 {
                bridge.stop();
                bridges.remove(channel);
                tracing::debug!(channel, "removed idle pub/sub bridge");
            }
        }
    }

    /// Stop every bridge task
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let bridges: Vec<Arc<ChannelBridge>> =
            self.bridges.read().values().cloned().collect();
        for bridge in bridges {
            bridge.wait_for_stop().await;
        }
        self.bridges.write().clear();
    }
}

/// Bridge for a single channel: local broadcast plus the forwarding task
pub struct ChannelBridge {
    channel: String,
    sender: broadcast::Sender<Vec<u8>>,
    subscriber_count: AtomicU64,
    task_handle: Mutex<Option<JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ChannelBridge {
    fn new(channel: String, capacity: usize, shutdown_rx: watch::Receiver<bool>) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            channel,
            sender,
            subscriber_count: AtomicU64::new(0),
            task_handle: Mutex::new(None),
            stop_tx,
            stop_rx,
            shutdown_rx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn subscriber_count(&self) -> u64 {
        self.subscriber_count.load(Ordering::SeqCst)
    }

    pub fn add_subscriber(&self) -> u64 {
        self.subscriber_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn remove_subscriber(&self) -> u64 {
        self.subscriber_count
            .fetch_sub(1, Ordering::SeqCst)
            .saturating_sub(1)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.sender.subscribe()
    }

    pub fn send(&self, payload: Vec<u8>) -> Result<usize, broadcast::error::SendError<Vec<u8>>> {
        self.sender.send(payload)
    }

    pub fn is_task_running(&self) -> bool {
        self.task_handle.lock().is_some()
    }

    pub fn set_task(&self, handle: JoinHandle<()>) {
        let mut guard = self.task_handle.lock();
        if let Some(old) = guard.take() {
            tracing::warn!(channel = %self.channel, "bridge task already set, replacing");
            old.abort();
        }
        *guard = Some(handle);
    }

    pub fn stop_rx(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub async fn wait_for_stop(&self) {
        let handle = self.task_handle.lock().take();
        if let Some(h) = handle {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), h).await;
        }
    }
}

/// Broadcast receiver that maintains the bridge refcount; when the last one
/// drops, the bridge itself is scheduled for removal.
pub struct ManagedBridgeSubscription {
    receiver: broadcast::Receiver<Vec<u8>>,
    bridge: Arc<ChannelBridge>,
    registry: Arc<BridgeRegistry>,
}

impl ManagedBridgeSubscription {
    pub fn new(
        receiver: broadcast::Receiver<Vec<u8>>,
        bridge: Arc<ChannelBridge>,
        registry: Arc<BridgeRegistry>,
    ) -> Self {
        Self {
            receiver,
            bridge,
            registry,
        }
    }

    pub async fn recv(&mut self) -> Result<Vec<u8>, broadcast::error::RecvError> {
        self.receiver.recv().await
    }
}

impl Drop for ManagedBridgeSubscription {
    fn drop(&mut self) {
        let remaining = self.bridge.remove_subscriber();
        if remaining == 0 {
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                return;
            };
            let registry = Arc::clone(&self.registry);
            let channel = self.bridge.channel().to_owned();
            handle.spawn(async move {
                // brief grace period for quick re-subscribes
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                registry.remove_if_idle(&channel);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bridge_is_shared_and_refcounted() {
        let registry = Arc::new(BridgeRegistry::new(16));

        let (bridge, is_new) = registry.get_or_create("g/a");
        assert!(is_new);
        bridge.add_subscriber();

        let (bridge2, is_new2) = registry.get_or_create("g/a");
        assert!(!is_new2);
        bridge2.add_subscriber();
        assert_eq!(bridge.subscriber_count(), 2);

        bridge.remove_subscriber();
        bridge.remove_subscriber();
        assert_eq!(bridge.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropping_last_subscription_removes_bridge() {
        let registry = Arc::new(BridgeRegistry::new(16));
        let (bridge, _) = registry.get_or_create("g/b");
        bridge.add_subscriber();
        let receiver = bridge.subscribe();

        let sub = ManagedBridgeSubscription::new(receiver, bridge, Arc::clone(&registry));
        drop(sub);

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        let (_, is_new) = registry.get_or_create("g/b");
        assert!(is_new, "bridge should have been removed");
    }

    #[tokio::test]
    async fn send_reaches_local_subscribers() {
        let registry = Arc::new(BridgeRegistry::new(16));
        let (bridge, _) = registry.get_or_create("g/c");
        let mut rx = bridge.subscribe();
        bridge.send(b"payload".to_vec()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"payload");
    }
}
