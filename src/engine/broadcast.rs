//! Concurrent fan-out of one piece of content to many destinations.

use futures::future::join_all;

use crate::channels::{Channel, ChatId, MessageRef, OutgoingContent};
use crate::error::ChannelError;

/// Result of delivering to one destination.
#[derive(Debug)]
pub struct DeliveryReport {
    pub destination: ChatId,
    pub result: Result<MessageRef, ChannelError>,
}

impl DeliveryReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct BroadcastFanout;

impl BroadcastFanout {
    /// Send `content` to every destination concurrently. One failure never
    /// affects the other destinations; failures are logged and reported.
    pub async fn fan_out(
        channel: &dyn Channel,
        destinations: &[ChatId],
        content: &OutgoingContent,
    ) -> Vec<DeliveryReport> {
        let sends = destinations.iter().map(|destination| async move {
            let result = channel.deliver(destination, content.clone()).await;
            if let Err(ref e) = result {
                tracing::warn!(destination = %destination, error = %e, "Broadcast delivery failed");
            }
            DeliveryReport {
                destination: destination.clone(),
                result,
            }
        });
        let reports = join_all(sends).await;

        let failed = reports.iter().filter(|r| !r.is_ok()).count();
        tracing::debug!(
            destinations = reports.len(),
            failed,
            "Broadcast finished"
        );
        reports
    }
}
