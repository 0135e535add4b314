//! Outbound reporting channel for [`BridgeEvent`]s.

use crate::domain::models::BridgeEvent;
use tokio::sync::mpsc;
use tracing::info;

/// Cheap, cloneable handle the bridge and its callbacks report through.
/// Without a receiver attached every report is discarded.
#[derive(Clone, Default)]
pub struct Reporter {
    sender: Option<mpsc::UnboundedSender<BridgeEvent>>,
}

impl Reporter {
    pub fn new(sender: mpsc::UnboundedSender<BridgeEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn send(&self, event: BridgeEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

/// Running totals over a stream of bridge events.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayStats {
    pub frames_published: u64,
    pub publish_failures: u64,
    pub commands_written: u64,
    pub commands_dropped: u64,
    pub link_lost: bool,
}

impl RelayStats {
    pub fn record(&mut self, event: &BridgeEvent) {
        match event {
            BridgeEvent::FramePublished { .. } => self.frames_published += 1,
            BridgeEvent::PublishFailed { .. } => self.publish_failures += 1,
            BridgeEvent::CommandWritten { .. } => self.commands_written += 1,
            BridgeEvent::CommandDropped { .. } => self.commands_dropped += 1,
            BridgeEvent::LinkLost => self.link_lost = true,
            BridgeEvent::StateChanged(_) => {}
        }
    }

    /// Consume `events` until every sender is gone.
    pub async fn collect(mut events: mpsc::UnboundedReceiver<BridgeEvent>) -> Self {
        let mut stats = Self::default();
        while let Some(event) = events.recv().await {
            stats.record(&event);
        }
        stats
    }

    pub fn log_summary(&self) {
        info!(
            "Relayed {} frames to the bus ({} failed), {} commands to the link ({} dropped){}",
            self.frames_published,
            self.publish_failures,
            self.commands_written,
            self.commands_dropped,
            if self.link_lost { ", link was lost" } else { "" }
        );
    }
}
