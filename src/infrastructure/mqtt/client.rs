//! MQTT Client Module
//!
//! rumqttc-backed [`BusTransport`]. The rumqttc event loop is polled on its
//! own thread with a current-thread runtime; inbound publishes are handed to
//! the session's [`MessageHandler`] from there.

use crate::domain::models::{BusCredentials, BusEndpoint};
use crate::infrastructure::mqtt::{BusError, BusTransport, MessageHandler};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Requests buffered between the client handle and the event loop
const REQUEST_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

type ReadySender = oneshot::Sender<Result<(), BusError>>;

struct Worker {
    handle: thread::JoinHandle<()>,
    stop: CancellationToken,
}

pub struct MqttTransport {
    endpoint: BusEndpoint,
    credentials: Option<BusCredentials>,
    connect_timeout: Duration,
    client: Mutex<Option<AsyncClient>>,
    /// Active subscriptions, re-issued after every reconnect
    topics: Arc<Mutex<Vec<String>>>,
    worker: Mutex<Option<Worker>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MqttTransport {
    pub fn new(
        endpoint: BusEndpoint,
        credentials: Option<BusCredentials>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            connect_timeout,
            client: Mutex::new(None),
            topics: Arc::new(Mutex::new(Vec::new())),
            worker: Mutex::new(None),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.endpoint.client_id.clone(),
            self.endpoint.host.clone(),
            self.endpoint.port,
        );
        options
            .set_keep_alive(Duration::from_secs(self.endpoint.keep_alive_secs.max(1)))
            .set_clean_session(true);
        if let Some(credentials) = &self.credentials {
            options.set_credentials(
                credentials.username.clone(),
                credentials.password.clone().unwrap_or_default(),
            );
        }
        options
    }

    fn client(&self) -> Result<AsyncClient, BusError> {
        lock(&self.client).clone().ok_or(BusError::NotConnected)
    }
}

#[async_trait]
impl BusTransport for MqttTransport {
    async fn connect(&self, on_message: MessageHandler) -> Result<(), BusError> {
        if lock(&self.client).is_some() {
            return Err(BusError::Connect("already connected".to_string()));
        }

        info!("Connecting to bus at {}...", self.endpoint);
        let (client, eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = CancellationToken::new();
        // Stops the loop thread unless the connection is handed to `worker`
        let guard = stop.clone().drop_guard();

        let loop_client = client.clone();
        let topics = self.topics.clone();
        let loop_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("mqtt-event-loop".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(BusError::Connect(e.to_string())));
                        return;
                    }
                };
                rt.block_on(run_event_loop(
                    eventloop,
                    loop_client,
                    topics,
                    on_message,
                    ready_tx,
                    loop_stop,
                ));
            })
            .map_err(|e| BusError::Connect(e.to_string()))?;

        let outcome = match tokio::time::timeout(self.connect_timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BusError::Connect("event loop exited".to_string())),
            Err(_) => Err(BusError::Connect(format!(
                "no answer from {} within {:.1}s",
                self.endpoint,
                self.connect_timeout.as_secs_f64()
            ))),
        };

        outcome?;
        *lock(&self.client) = Some(client);
        *lock(&self.worker) = Some(Worker {
            handle,
            stop: guard.disarm(),
        });
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client()?
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| BusError::Publish(e.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        self.client()?
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        let mut topics = lock(&self.topics);
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BusError> {
        lock(&self.topics).retain(|t| t != topic);
        // Never waits on the request queue, which stops draining while the
        // broker is unreachable
        self.client()?
            .try_unsubscribe(topic)
            .map_err(|e| BusError::Subscribe(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        let client = lock(&self.client).take();
        let worker = lock(&self.worker).take();

        let result = match client {
            Some(client) => client
                .try_disconnect()
                .map_err(|e| BusError::Disconnect(e.to_string())),
            None => Ok(()),
        };

        if let Some(Worker { handle, stop }) = worker {
            if result.is_err() {
                // DISCONNECT was never queued, so the loop will not exit on its own
                stop.cancel();
            }
            let joined =
                tokio::time::timeout(DISCONNECT_GRACE, tokio::task::spawn_blocking(move || handle.join()))
                    .await;
            if joined.is_err() {
                warn!("Bus event loop did not stop in time, cancelling");
                stop.cancel();
            }
        }

        info!("Bus disconnected");
        result
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.stop.cancel();
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Arc<Mutex<Vec<String>>>,
    on_message: MessageHandler,
    ready: ReadySender,
    stop: CancellationToken,
) {
    let mut ready = Some(ready);

    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    let err = BusError::Connect(format!("broker refused connection: {:?}", ack.code));
                    match ready.take() {
                        Some(tx) => {
                            let _ = tx.send(Err(err));
                            break;
                        }
                        None => {
                            error!("{}", err);
                            continue;
                        }
                    }
                }

                info!("Bus connection established");
                let active = lock(&topics).clone();
                for topic in active {
                    debug!("Re-subscribing to {}", topic);
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                        warn!("Failed to re-subscribe to {}: {}", topic, e);
                    }
                }
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                on_message(&publish.topic, &publish.payload);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent, stopping bus event loop");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(BusError::Connect(e.to_string())));
                    break;
                }
                warn!("Bus connection error: {}. Retrying...", e);
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }

    debug!("Bus event loop stopped");
}
