//! Bus Session Module
//!
//! Topic-scoped callbacks and publishing on top of a [`BusTransport`].

use crate::infrastructure::mqtt::{topic_matches, BusError, BusTransport, MessageHandler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

struct Subscription {
    filter: String,
    handler: MessageHandler,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct BusSession<B: BusTransport> {
    transport: Arc<B>,
    connected: Arc<AtomicBool>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
}

/// Cloneable publish handle. Safe to use from the link's notification task.
pub struct BusPublisher<B: BusTransport> {
    transport: Arc<B>,
    connected: Arc<AtomicBool>,
}

impl<B: BusTransport> Clone for BusPublisher<B> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            connected: self.connected.clone(),
        }
    }
}

impl<B: BusTransport> BusPublisher<B> {
    /// Publish one message, QoS 0, not retained.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(BusError::NotConnected);
        }
        self.transport.publish(topic, payload)
    }
}

impl<B: BusTransport> BusSession<B> {
    pub fn new(transport: B) -> Self {
        Self {
            transport: Arc::new(transport),
            connected: Arc::new(AtomicBool::new(false)),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn connect(&mut self) -> Result<(), BusError> {
        if self.is_connected() {
            return Err(BusError::Connect("already connected".to_string()));
        }

        let subscriptions = self.subscriptions.clone();
        let dispatch: MessageHandler = Arc::new(move |topic: &str, payload: &[u8]| {
            let handlers: Vec<MessageHandler> = lock(&subscriptions)
                .iter()
                .filter(|s| topic_matches(&s.filter, topic))
                .map(|s| s.handler.clone())
                .collect();

            if handlers.is_empty() {
                debug!("No handler for message on {}", topic);
            }
            for handler in handlers {
                handler(topic, payload);
            }
        });

        self.transport.connect(dispatch).await?;
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    pub fn publisher(&self) -> BusPublisher<B> {
        BusPublisher {
            transport: self.transport.clone(),
            connected: self.connected.clone(),
        }
    }

    /// Register `on_message` for `topic` (wildcards allowed). The callback
    /// runs on the bus event-loop thread.
    pub async fn subscribe<F>(&mut self, topic: &str, on_message: F) -> Result<(), BusError>
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }

        // Registered before SUBSCRIBE goes out so the first message is not lost
        lock(&self.subscriptions).push(Subscription {
            filter: topic.to_string(),
            handler: Arc::new(on_message),
        });

        if let Err(e) = self.transport.subscribe(topic).await {
            lock(&self.subscriptions).retain(|s| s.filter != topic);
            return Err(e);
        }
        info!("Subscribed to {}", topic);
        Ok(())
    }

    /// Stop delivering `topic`. Local handlers are dropped even if the
    /// broker call fails.
    pub async fn unsubscribe(&mut self, topic: &str) -> Result<(), BusError> {
        lock(&self.subscriptions).retain(|s| s.filter != topic);
        if !self.is_connected() {
            return Ok(());
        }
        self.transport.unsubscribe(topic).await
    }

    /// Best-effort teardown. Always leaves the session disconnected.
    pub async fn disconnect(&mut self) {
        lock(&self.subscriptions).clear();
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!("{}", e);
        }
    }
}
