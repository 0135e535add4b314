//! Bridge Coordinator
//!
//! Owns the connection state and both sessions. Startup, relaying and
//! shutdown all run on the link scheduler; the bus event-loop thread only
//! ever touches the handoff queue.

use crate::bridge::error::BridgeError;
use crate::bridge::handoff::{self, HandoffReceiver, PendingWrite};
use crate::bridge::reporter::Reporter;
use crate::domain::frame::Frame;
use crate::domain::models::{BridgeEvent, DeviceDescriptor, DropReason};
use crate::domain::settings::BridgeConfig;
use crate::domain::state::ConnectionState;
use crate::infrastructure::bluetooth::{DeviceResolver, DeviceScanner, LinkSession, LinkTransport};
use crate::infrastructure::mqtt::{BusPublisher, BusSession, BusTransport};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Commands relayed to the link are always acknowledged writes
const REQUIRE_ACK: bool = true;

/// Longest any single teardown step may take before it is abandoned
const TEARDOWN_STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Bridge<S: DeviceScanner, L: LinkTransport, B: BusTransport> {
    config: BridgeConfig,
    resolver: DeviceResolver<S>,
    link_transport: L,
    bus_transport: B,
    state_tx: watch::Sender<ConnectionState>,
    reporter: Reporter,
}

impl<S: DeviceScanner, L: LinkTransport, B: BusTransport> Bridge<S, L, B> {
    pub fn new(config: BridgeConfig, scanner: S, link_transport: L, bus_transport: B) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            config,
            resolver: DeviceResolver::new(scanner),
            link_transport,
            bus_transport,
            state_tx,
            reporter: Reporter::default(),
        }
    }

    /// Send every [`BridgeEvent`] to `events`.
    pub fn with_reporter(mut self, events: mpsc::UnboundedSender<BridgeEvent>) -> Self {
        self.reporter = Reporter::new(events);
        self
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Run startup, relay until `stop` fires, then shut down.
    ///
    /// Always ends in [`ConnectionState::Disconnected`]. A startup failure is
    /// returned after the partial setup has been torn down.
    pub async fn run(self, stop: CancellationToken) -> Result<(), BridgeError> {
        let Bridge {
            config,
            resolver,
            link_transport,
            bus_transport,
            state_tx,
            reporter,
        } = self;
        let mut active = ActiveBridge {
            config,
            state: ConnectionState::Idle,
            state_tx,
            reporter,
            link: None,
            bus: None,
            handoff: None,
            link_lost: false,
        };

        let outcome = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                info!("Stop requested during startup");
                Ok(())
            }
            result = active.start(resolver, link_transport, bus_transport) => result,
        };

        match &outcome {
            Ok(()) if !stop.is_cancelled() => active.relay(&stop).await,
            Ok(()) => {}
            Err(e) => error!("Startup failed: {}", e),
        }

        active.shutdown().await;
        outcome
    }
}

/// Sessions and state once the bridge is running.
struct ActiveBridge<L: LinkTransport, B: BusTransport> {
    config: BridgeConfig,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    reporter: Reporter,
    link: Option<LinkSession<L>>,
    bus: Option<BusSession<B>>,
    handoff: Option<HandoffReceiver>,
    link_lost: bool,
}

impl<L: LinkTransport, B: BusTransport> ActiveBridge<L, B> {
    fn set_state(&mut self, next: ConnectionState) {
        match self.state.transition(next) {
            Ok(state) => {
                info!("State: {} -> {}", self.state, state);
                self.state = state;
                self.state_tx.send_replace(state);
                self.reporter.send(BridgeEvent::StateChanged(state));
            }
            Err(e) => error!("{}", e),
        }
    }

    async fn start<S: DeviceScanner>(
        &mut self,
        resolver: DeviceResolver<S>,
        link_transport: L,
        bus_transport: B,
    ) -> Result<(), BridgeError> {
        let descriptor = self.resolve(&resolver).await?;

        let bus = self.bus.insert(BusSession::new(bus_transport));
        bus.connect().await?;
        info!("Bus connected to {}", self.config.endpoint);
        let publisher = bus.publisher();

        self.set_state(ConnectionState::Connecting);
        let link = self
            .link
            .insert(LinkSession::new(link_transport, self.config.characteristics));
        link.connect(&descriptor, self.config.timeout).await?;
        self.set_state(ConnectionState::Connected);

        let publish_topic = self.config.topics.publish_topic.clone();
        if self.config.publish_initial_value {
            self.publish_initial_value(&publisher, &publish_topic).await;
        }

        let reporter = self.reporter.clone();
        if let Some(link) = self.link.as_mut() {
            link.enable_notify(move |frame| {
                publish_frame(&publisher, &publish_topic, &reporter, frame)
            })
            .await?;
        }
        self.set_state(ConnectionState::NotifyActive);

        let (sender, receiver) = handoff::channel(self.config.queue_capacity);
        self.handoff = Some(receiver);
        let reporter = self.reporter.clone();
        if let Some(bus) = self.bus.as_mut() {
            bus.subscribe(&self.config.topics.subscribe_topic, move |topic, payload| {
                match sender.submit(payload.to_vec()) {
                    Ok(seq) => debug!(
                        "Queued command #{} from {} ({} bytes)",
                        seq,
                        topic,
                        payload.len()
                    ),
                    Err(rejected) => {
                        warn!("Dropped command #{}: {}", rejected.seq, rejected.reason);
                        reporter.send(BridgeEvent::CommandDropped {
                            seq: rejected.seq,
                            reason: rejected.reason,
                        });
                    }
                }
            })
            .await?;
        }
        self.set_state(ConnectionState::Relaying);

        Ok(())
    }

    async fn resolve<S: DeviceScanner>(
        &mut self,
        resolver: &DeviceResolver<S>,
    ) -> Result<DeviceDescriptor, BridgeError> {
        if self.config.device.resolved_address.is_some() {
            return Ok(self.config.device.clone());
        }
        self.set_state(ConnectionState::Resolving);
        let descriptor = resolver
            .resolve(self.config.device.clone(), self.config.timeout)
            .await?;
        self.config.device = descriptor.clone();
        Ok(descriptor)
    }

    async fn publish_initial_value(&mut self, publisher: &BusPublisher<B>, topic: &str) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        match link.read_current().await {
            Ok(frame) => publish_frame(publisher, topic, &self.reporter, frame),
            Err(e) => warn!("Initial read failed: {}", e),
        }
    }

    async fn relay(&mut self, stop: &CancellationToken) {
        let Some(mut queue) = self.handoff.take() else {
            return;
        };

        let mut health = tokio::time::interval(self.config.link_check_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        health.tick().await;

        info!(
            "Relaying {} -> {} and {} -> link",
            self.config.characteristics.notify,
            self.config.topics.publish_topic,
            self.config.topics.subscribe_topic
        );

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                Some(write) = queue.recv() => self.relay_write(write).await,
                _ = health.tick() => self.check_link().await,
            }
        }

        self.handoff = Some(queue);
    }

    async fn relay_write(&mut self, write: PendingWrite) {
        if !self.state.allows_writes() || self.link.is_none() {
            self.drop_command(write.seq, DropReason::NotRelaying(self.state));
            return;
        }
        let Some(link) = self.link.as_mut() else {
            return;
        };

        match link.write(&write.payload, REQUIRE_ACK).await {
            Ok(()) => {
                debug!("Wrote command #{} ({} bytes)", write.seq, write.payload.len());
                self.reporter.send(BridgeEvent::CommandWritten {
                    seq: write.seq,
                    len: write.payload.len(),
                });
            }
            Err(e) => {
                error!("Write of command #{} failed: {}", write.seq, e);
                self.reporter.send(BridgeEvent::CommandDropped {
                    seq: write.seq,
                    reason: DropReason::WriteFailed(e.to_string()),
                });
            }
        }
    }

    fn drop_command(&self, seq: u64, reason: DropReason) {
        warn!("Dropped command #{}: {}", seq, reason);
        self.reporter.send(BridgeEvent::CommandDropped { seq, reason });
    }

    async fn check_link(&mut self) {
        if self.link_lost {
            return;
        }
        let Some(link) = self.link.as_ref() else {
            return;
        };
        if link.is_connected().await && !link.notifications_ended() {
            return;
        }

        self.link_lost = true;
        warn!(
            "Link to {} lost, commands will be dropped until restart",
            self.config.device.logical_name
        );
        self.reporter.send(BridgeEvent::LinkLost);
    }

    /// Best-effort teardown. Every step runs regardless of earlier failures.
    async fn shutdown(&mut self) {
        self.set_state(ConnectionState::Stopping);

        if let Some(mut queue) = self.handoff.take() {
            for write in queue.close_and_drain() {
                self.drop_command(write.seq, DropReason::NotRelaying(ConnectionState::Stopping));
            }
        }

        if let Some(link) = self.link.as_mut() {
            if let Some(Err(e)) = teardown_step("disable notifications", link.disable_notify()).await {
                warn!("Failed to disable notifications: {}", e);
            }
            teardown_step("link disconnect", link.disconnect()).await;
        }

        if let Some(bus) = self.bus.as_mut() {
            let topic = &self.config.topics.subscribe_topic;
            if let Some(Err(e)) = teardown_step("bus unsubscribe", bus.unsubscribe(topic)).await {
                warn!("Failed to unsubscribe from {}: {}", topic, e);
            }
            teardown_step("bus disconnect", bus.disconnect()).await;
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Bridge stopped");
    }
}

/// Run one teardown step, giving up on it after [`TEARDOWN_STEP_TIMEOUT`].
async fn teardown_step<T>(step: &str, fut: impl Future<Output = T>) -> Option<T> {
    match tokio::time::timeout(TEARDOWN_STEP_TIMEOUT, fut).await {
        Ok(output) => Some(output),
        Err(_) => {
            warn!(
                "{} did not finish within {}s, skipping",
                step,
                TEARDOWN_STEP_TIMEOUT.as_secs()
            );
            None
        }
    }
}

/// Encode one notification and publish it. Runs on the link scheduler.
fn publish_frame<B: BusTransport>(
    publisher: &BusPublisher<B>,
    topic: &str,
    reporter: &Reporter,
    frame: Frame,
) {
    if frame.is_empty() {
        debug!("Empty notification, publishing an empty message");
    }
    let text = frame.encode_text();
    if text.is_hex() {
        debug!("Frame of {} bytes is not UTF-8, publishing as hex", frame.len());
    }

    match publisher.publish(topic, text.as_str().as_bytes().to_vec()) {
        Ok(()) => {
            let text = text.into_string();
            debug!("Published {} bytes to {}", text.len(), topic);
            reporter.send(BridgeEvent::FramePublished {
                topic: topic.to_string(),
                text,
            });
        }
        Err(e) => {
            warn!("Failed to publish frame to {}: {}", topic, e);
            reporter.send(BridgeEvent::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            });
        }
    }
}
