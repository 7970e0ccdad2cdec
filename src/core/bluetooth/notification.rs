//! Notification handling for the HC03 device
//! This module drains the subscribed characteristic and hands every frame,
//! in arrival order, to the session.

use std::sync::Arc;

use async_trait::async_trait;
use log::{info, trace};
use tokio::task::JoinHandle;

use crate::core::bluetooth::transport::NotificationReceiver;

/// Receives the frames of one link generation
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// One raw notification
    async fn on_frame(&self, generation: u64, bytes: Vec<u8>);

    /// The transport closed the subscription
    async fn on_link_closed(&self, generation: u64);
}

/// Notification pump for one link
pub struct NotificationHandler {
    generation: u64,
    sink: Arc<dyn FrameSink>,
}

impl NotificationHandler {
    pub fn new(generation: u64, sink: Arc<dyn FrameSink>) -> Self {
        Self { generation, sink }
    }

    /// Spawns the pump. Frames are processed one at a time so ordering is
    /// exactly the transport's delivery order.
    pub fn spawn(self, receiver: NotificationReceiver) -> JoinHandle<()> {
        tokio::spawn(self.process_notifications(receiver))
    }

    async fn process_notifications(self, mut receiver: NotificationReceiver) {
        info!("Listening for HC03 notifications (link {})", self.generation);
        let mut frames = 0usize;
        while let Some(bytes) = receiver.recv().await {
            frames += 1;
            trace!("Frame #{} on link {}: {:02X?}", frames, self.generation, bytes);
            self.sink.on_frame(self.generation, bytes).await;
        }
        info!(
            "Notification stream ended after {} frames (link {})",
            frames, self.generation
        );
        self.sink.on_link_closed(self.generation).await;
    }
}
