use clmm_keeper_protocols::prelude::Trigger;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

/// Emits a trigger at a fixed interval.
///
/// Used instead of the slot feed when block-level reactivity is not needed.
pub struct IntervalTrigger {
    /// Interval between triggers.
    period: Duration,
}

impl IntervalTrigger {
    /// Creates a new interval trigger.
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Emits triggers until the sink is closed. The first trigger fires
    /// immediately.
    pub async fn run(&self, sink: mpsc::Sender<Trigger>) {
        info!(period_secs = self.period.as_secs(), "Starting interval trigger");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut marker = 0u64;

        loop {
            ticker.tick().await;
            marker += 1;
            match sink.try_send(Trigger { marker }) {
                Ok(()) => {}
                Err(TrySendError::Full(trigger)) => {
                    debug!(trigger = %trigger, "Trigger channel full, dropping");
                }
                Err(TrySendError::Closed(_)) => break,
            }
        }

        info!("Interval trigger stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_emits_increasing_markers_and_drops_on_backpressure() {
        let trigger = IntervalTrigger::new(Duration::from_secs(10));
        let (tx, mut rx) = mpsc::channel(2);

        let handle = tokio::spawn(async move { trigger.run(tx).await });

        tokio::time::sleep(Duration::from_secs(35)).await;
        // Capacity 2: markers 3 and 4 found the channel full.
        assert_eq!(rx.recv().await.map(|t| t.marker), Some(1));
        assert_eq!(rx.recv().await.map(|t| t.marker), Some(2));
        assert!(rx.try_recv().is_err());

        // Closing the receiver ends the loop at the next tick.
        drop(rx);
        handle.await.unwrap();
    }
}
