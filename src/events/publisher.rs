use async_nats::Client;
use async_trait::async_trait;
use std::sync::Arc;

use super::subjects::{TransactionFoundEvent, SUBJECT_TRANSACTION_FOUND};
use crate::indexer::types::TransferRecord;

/// Outbound side of the messaging bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, subject: &'static str, payload: Vec<u8>) -> eyre::Result<()>;

    /// Wait until everything published so far has reached the broker.
    async fn flush(&self) -> eyre::Result<()>;
}

#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(&self, subject: &'static str, payload: Vec<u8>) -> eyre::Result<()> {
        (**self).publish(subject, payload).await
    }

    async fn flush(&self) -> eyre::Result<()> {
        (**self).flush().await
    }
}

/// NATS publisher. The client is cheap to clone and shared by all workers.
#[derive(Clone)]
pub struct NatsPublisher {
    client: Client,
}

impl NatsPublisher {
    /// Connect to NATS server
    pub async fn connect(nats_url: &str) -> eyre::Result<Self> {
        let client = async_nats::connect(nats_url)
            .await
            .map_err(|e| eyre::eyre!("Failed to connect to NATS at {}: {}", nats_url, e))?;
        tracing::info!(url = %nats_url, "Connected to NATS");
        Ok(Self { client })
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, subject: &'static str, payload: Vec<u8>) -> eyre::Result<()> {
        self.client.publish(subject, payload.into()).await?;
        Ok(())
    }

    async fn flush(&self) -> eyre::Result<()> {
        self.client.flush().await?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub published: usize,
    pub failed: usize,
}

/// Emit one `indexer.transaction.found` message per committed row.
///
/// Must only be called after the commit that made `transfers` visible.
/// Messages go out ordered by block number; rows of the same block keep
/// their extraction order. Failures are logged per message and never undo
/// the commit.
pub async fn publish_committed<P>(publisher: &P, transfers: &[TransferRecord]) -> PublishReport
where
    P: EventPublisher + ?Sized,
{
    let mut ordered: Vec<&TransferRecord> = transfers.iter().collect();
    ordered.sort_by_key(|t| t.block_number);

    let mut report = PublishReport::default();
    for transfer in ordered {
        let event = TransactionFoundEvent::from(transfer);
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(tx = %transfer.hash, error = %e, "Failed to serialize event");
                report.failed += 1;
                continue;
            }
        };

        match publisher.publish(SUBJECT_TRANSACTION_FOUND, payload).await {
            Ok(()) => report.published += 1,
            Err(e) => {
                tracing::warn!(
                    chain = %transfer.chain,
                    tx = %transfer.hash,
                    block = transfer.block_number,
                    error = %e,
                    "Failed to publish transaction event"
                );
                report.failed += 1;
            }
        }
    }

    if report.published > 0 {
        if let Err(e) = publisher.flush().await {
            tracing::warn!(error = %e, "Failed to flush published events");
        }
    }

    report
}
