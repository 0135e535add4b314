//! In-memory doubles for the scanner, link and bus capabilities.

use crate::domain::models::DiscoveredDevice;
use crate::infrastructure::bluetooth::{
    ConnectError, DeviceScanner, LinkTransport, NotificationStream, ReadError, ResolutionError,
    SubscribeError, TeardownError, WriteError, WriteMode,
};
use crate::infrastructure::mqtt::{BusError, BusTransport, MessageHandler};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Shared, ordered record of teardown-relevant calls across fakes.
#[derive(Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<&'static str>>>);

impl Timeline {
    fn record(&self, entry: &'static str) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }
}

pub struct FakeScanner {
    result: Result<Vec<DiscoveredDevice>, ResolutionError>,
}

impl FakeScanner {
    pub fn with_devices(devices: Vec<DiscoveredDevice>) -> Self {
        Self {
            result: Ok(devices),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            result: Err(ResolutionError::Scan(reason.to_string())),
        }
    }
}

#[async_trait]
impl DeviceScanner for FakeScanner {
    async fn discover(&self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>, ResolutionError> {
        self.result.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    Connect(String),
    Subscribe(Uuid),
    Unsubscribe(Uuid),
    Write(Uuid, Vec<u8>),
    Read(Uuid),
    Disconnect,
}

#[derive(Default)]
struct LinkState {
    calls: Vec<LinkCall>,
    writes: Vec<(Uuid, Vec<u8>, WriteMode)>,
    up: bool,
    hang_connect: bool,
    connect_error: Option<ConnectError>,
    late_connect_error: Option<ConnectError>,
    subscribe_error: Option<SubscribeError>,
    write_delay: Option<Duration>,
    write_errors: VecDeque<WriteError>,
    fail_teardown: bool,
    read_value: Vec<u8>,
    notify_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

pub struct FakeLink {
    state: Arc<Mutex<LinkState>>,
    timeline: Timeline,
}

/// Test-side control over a [`FakeLink`] after it has been handed off.
#[derive(Clone)]
pub struct FakeLinkHandle {
    state: Arc<Mutex<LinkState>>,
}

impl FakeLink {
    pub fn new() -> (Self, FakeLinkHandle) {
        Self::with_timeline(Timeline::default())
    }

    pub fn with_timeline(timeline: Timeline) -> (Self, FakeLinkHandle) {
        let state = Arc::new(Mutex::new(LinkState::default()));
        (
            Self {
                state: state.clone(),
                timeline,
            },
            FakeLinkHandle { state },
        )
    }
}

impl FakeLinkHandle {
    /// Push one notification to the active subscription, if any.
    pub fn notify(&self, payload: Vec<u8>) {
        if let Some(tx) = &self.state.lock().unwrap().notify_tx {
            let _ = tx.send(payload);
        }
    }

    /// Simulate the peripheral going away.
    pub fn drop_link(&self) {
        let mut state = self.state.lock().unwrap();
        state.up = false;
        state.notify_tx = None;
    }

    pub fn hang_connect(&self) {
        self.state.lock().unwrap().hang_connect = true;
    }

    pub fn fail_connect(&self, error: ConnectError) {
        self.state.lock().unwrap().connect_error = Some(error);
    }

    /// The link comes up, then connecting still fails (e.g. service discovery).
    pub fn fail_after_link_up(&self, error: ConnectError) {
        self.state.lock().unwrap().late_connect_error = Some(error);
    }

    pub fn fail_subscribe(&self, error: SubscribeError) {
        self.state.lock().unwrap().subscribe_error = Some(error);
    }

    /// Unsubscribe and disconnect both report errors.
    pub fn fail_disconnect(&self) {
        self.state.lock().unwrap().fail_teardown = true;
    }

    /// The next write fails with `error`; later writes succeed.
    pub fn fail_next_write(&self, error: WriteError) {
        self.state.lock().unwrap().write_errors.push_back(error);
    }

    pub fn is_up(&self) -> bool {
        self.state.lock().unwrap().up
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.state.lock().unwrap().write_delay = Some(delay);
    }

    pub fn set_read_value(&self, value: Vec<u8>) {
        self.state.lock().unwrap().read_value = value;
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>, WriteMode)> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl LinkTransport for FakeLink {
    async fn connect(&mut self, address: &str, _timeout: Duration) -> Result<(), ConnectError> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(LinkCall::Connect(address.to_string()));
            if let Some(error) = state.connect_error.clone() {
                return Err(error);
            }
            state.hang_connect
        };
        self.timeline.record("link.connect");
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        state.up = true;
        match state.late_connect_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn subscribe(&mut self, characteristic: Uuid) -> Result<NotificationStream, SubscribeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(LinkCall::Subscribe(characteristic));
        if let Some(error) = state.subscribe_error.clone() {
            return Err(error);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.notify_tx = Some(tx);
        Ok(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|payload| (payload, rx))
        })
        .boxed())
    }

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), SubscribeError> {
        self.timeline.record("link.unsubscribe");
        let mut state = self.state.lock().unwrap();
        state.calls.push(LinkCall::Unsubscribe(characteristic));
        state.notify_tx = None;
        if state.fail_teardown {
            return Err(SubscribeError::Transport("injected unsubscribe failure".to_string()));
        }
        Ok(())
    }

    async fn write(
        &mut self,
        characteristic: Uuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), WriteError> {
        let (delay, error) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(LinkCall::Write(characteristic, payload.to_vec()));
            (state.write_delay, state.write_errors.pop_front())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = error {
            return Err(error);
        }
        self.state
            .lock()
            .unwrap()
            .writes
            .push((characteristic, payload.to_vec(), mode));
        Ok(())
    }

    async fn read(&mut self, characteristic: Uuid) -> Result<Vec<u8>, ReadError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(LinkCall::Read(characteristic));
        Ok(state.read_value.clone())
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().unwrap().up
    }

    async fn disconnect(&mut self) -> Result<(), TeardownError> {
        self.timeline.record("link.disconnect");
        let mut state = self.state.lock().unwrap();
        state.calls.push(LinkCall::Disconnect);
        state.up = false;
        state.notify_tx = None;
        if state.fail_teardown {
            return Err(TeardownError("injected disconnect failure".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    Connect,
    Subscribe(String),
    Unsubscribe(String),
    Disconnect,
}

#[derive(Default)]
struct BusState {
    calls: Vec<BusCall>,
    published: Vec<(String, Vec<u8>)>,
    handler: Option<MessageHandler>,
    connect_error: Option<BusError>,
    fail_subscribe: bool,
    publish_error: Option<BusError>,
    fail_teardown: bool,
    hang_teardown: bool,
}

pub struct FakeBus {
    state: Arc<Mutex<BusState>>,
    timeline: Timeline,
}

#[derive(Clone)]
pub struct FakeBusHandle {
    state: Arc<Mutex<BusState>>,
}

impl FakeBus {
    pub fn new() -> (Self, FakeBusHandle) {
        Self::with_timeline(Timeline::default())
    }

    pub fn with_timeline(timeline: Timeline) -> (Self, FakeBusHandle) {
        let state = Arc::new(Mutex::new(BusState::default()));
        (
            Self {
                state: state.clone(),
                timeline,
            },
            FakeBusHandle { state },
        )
    }
}

impl FakeBusHandle {
    /// Deliver an inbound message from a separate thread, the way the real
    /// event loop does, and wait for the callback to return.
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        let handler = self.state.lock().unwrap().handler.clone();
        if let Some(handler) = handler {
            let topic = topic.to_string();
            let payload = payload.to_vec();
            std::thread::spawn(move || handler(&topic, &payload))
                .join()
                .unwrap();
        }
    }

    pub fn fail_connect(&self, error: BusError) {
        self.state.lock().unwrap().connect_error = Some(error);
    }

    pub fn fail_subscribe(&self) {
        self.state.lock().unwrap().fail_subscribe = true;
    }

    /// Unsubscribe and disconnect both report errors.
    pub fn fail_teardown(&self) {
        self.state.lock().unwrap().fail_teardown = true;
    }

    /// Unsubscribe and disconnect never complete.
    pub fn hang_teardown(&self) {
        self.state.lock().unwrap().hang_teardown = true;
    }

    /// Every publish fails with `error` until cleared with `None`.
    pub fn fail_publish(&self, error: Option<BusError>) {
        self.state.lock().unwrap().publish_error = error;
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn calls(&self) -> Vec<BusCall> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl BusTransport for FakeBus {
    async fn connect(&self, on_message: MessageHandler) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(BusCall::Connect);
        if let Some(error) = state.connect_error.clone() {
            return Err(error);
        }
        state.handler = Some(on_message);
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.publish_error.clone() {
            return Err(error);
        }
        state.published.push((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(BusCall::Subscribe(topic.to_string()));
        if state.fail_subscribe {
            return Err(BusError::Subscribe("injected subscribe failure".to_string()));
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BusError> {
        self.timeline.record("bus.unsubscribe");
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(BusCall::Unsubscribe(topic.to_string()));
            state.hang_teardown
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let state = self.state.lock().unwrap();
        if state.fail_teardown {
            return Err(BusError::Subscribe("injected unsubscribe failure".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.timeline.record("bus.disconnect");
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(BusCall::Disconnect);
            state.handler = None;
            state.hang_teardown
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let state = self.state.lock().unwrap();
        if state.fail_teardown {
            return Err(BusError::Disconnect("injected disconnect failure".to_string()));
        }
        Ok(())
    }
}
