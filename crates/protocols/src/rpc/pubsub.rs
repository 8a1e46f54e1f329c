use crate::ledger::{LedgerError, Trigger, TriggerFeed};
use async_trait::async_trait;
use futures_util::StreamExt;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

/// Trigger feed backed by the `slotSubscribe` websocket notification.
///
/// Each new slot becomes a [`Trigger`] whose marker is the slot number.
pub struct SlotFeed {
    ws_url: String,
}

impl SlotFeed {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

#[async_trait]
impl TriggerFeed for SlotFeed {
    fn name(&self) -> &str {
        "slot"
    }

    async fn run_session(&self, sink: &mpsc::Sender<Trigger>) -> Result<u64, LedgerError> {
        let client = PubsubClient::new(&self.ws_url)
            .await
            .map_err(|e| LedgerError::Rpc(format!("websocket connect {}: {e}", self.ws_url)))?;
        let (mut slots, unsubscribe) = client
            .slot_subscribe()
            .await
            .map_err(|e| LedgerError::Rpc(format!("slot_subscribe: {e}")))?;

        info!(url = %self.ws_url, "Slot subscription established");

        let mut received = 0u64;
        while let Some(slot) = slots.next().await {
            received += 1;
            match sink.try_send(Trigger { marker: slot.slot }) {
                Ok(()) => {}
                Err(TrySendError::Full(trigger)) => {
                    debug!(trigger = %trigger, "Trigger channel full, dropping marker");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Trigger channel closed, ending slot session");
                    break;
                }
            }
        }

        drop(slots);
        unsubscribe().await;
        Ok(received)
    }
}
