//! The storage context: upload, download and preflight against one bound
//! (payer, provider, dataset) combination.

use piece_commitment::{commp, Commitment};
use tokio::{sync::mpsc, time::Instant};

use crate::{
    batcher::Batcher,
    config::ClientConfig,
    error::ClientError,
    transport::{Transports, UploadSession},
    types::{Address, Dataset, Piece, PieceId, Provider, TxRef},
};

/// Result of a confirmed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub commitment: Commitment,
    /// Raw size in bytes.
    pub size: u64,
    pub piece_id: PieceId,
    /// Transaction the piece was added in.
    pub tx: TxRef,
}

/// Progress notifications for an upload. Delivery is best-effort: a listener
/// that went away is logged and never affects the upload itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// Bytes handed to the provider, commitment computed.
    Uploaded { commitment: Commitment },
    /// The provider reported the blob durably parked.
    Parked { commitment: Commitment },
    /// The request joined the dataset's pending batch.
    Queued { commitment: Commitment },
    /// Both the chain and the provider confirmed the addition.
    Confirmed { receipt: UploadReceipt },
}

/// Cost estimate for an upload of a given size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreflightEstimate {
    pub estimated_cost: u128,
    pub allowance: u128,
    pub sufficient: bool,
}

/// A storage context bound to one provider and one dataset.
///
/// Cheap to share behind an `Arc`; concurrent uploads interleave freely up to
/// the batch formation point. Dropping the context shuts the batch worker
/// down.
pub struct StorageContext {
    transports: Transports,
    config: ClientConfig,
    provider: Provider,
    dataset: Dataset,
    payer: Address,
    batcher: Batcher,
}

impl StorageContext {
    pub fn new(
        transports: Transports,
        config: ClientConfig,
        provider: Provider,
        dataset: Dataset,
        payer: Address,
    ) -> Self {
        let batcher = Batcher::spawn(transports.clone(), config.clone(), dataset.id);
        Self {
            transports,
            config,
            provider,
            dataset,
            payer,
            batcher,
        }
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Estimate the cost of storing `size` bytes and whether the payer's
    /// allowance covers it.
    pub async fn preflight(&self, size: u64) -> Result<PreflightEstimate, ClientError> {
        let estimated_cost = self
            .transports
            .registry
            .storage_price(size, self.dataset.with_cdn)
            .await?;
        let allowance = self.transports.registry.allowance(&self.payer).await?;

        Ok(PreflightEstimate {
            estimated_cost,
            allowance,
            sufficient: allowance >= estimated_cost,
        })
    }

    /// Store `data` as one piece of the bound dataset.
    ///
    /// Cancellation by dropping the returned future is effective until the
    /// request joins a submitted batch; past that point the piece is added
    /// regardless.
    pub async fn upload(&self, data: &[u8]) -> Result<UploadReceipt, ClientError> {
        self.upload_with_events(data, None).await
    }

    /// [`StorageContext::upload`] with progress events delivered on the
    /// given channel.
    #[tracing::instrument(skip_all, fields(dataset = %self.dataset.id, size = data.len()))]
    pub async fn upload_with_events(
        &self,
        data: &[u8],
        events: Option<mpsc::UnboundedSender<UploadEvent>>,
    ) -> Result<UploadReceipt, ClientError> {
        // The commitment is computed locally; the provider re-derives it and
        // the batch carries ours, so a disagreeing provider cannot swap
        // content.
        let commitment = commp::calculate(data)?;
        let size = data.len() as u64;

        match self
            .transports
            .blob
            .create_upload_session(&commitment, size)
            .await?
        {
            UploadSession::AlreadyExists => {
                tracing::debug!(%commitment, "provider already has the blob");
            }
            UploadSession::Created(session) => {
                self.transports.blob.put_bytes(&session, data).await?;
            }
        }
        notify(&events, UploadEvent::Uploaded { commitment });

        self.wait_parked(&commitment, size).await?;
        notify(&events, UploadEvent::Parked { commitment });

        notify(&events, UploadEvent::Queued { commitment });
        let piece = self.batcher.enqueue(commitment, size).await?;

        let receipt = UploadReceipt {
            commitment: piece.commitment,
            size: piece.size,
            piece_id: piece.piece_id,
            tx: piece.tx,
        };
        notify(
            &events,
            UploadEvent::Confirmed {
                receipt: receipt.clone(),
            },
        );
        Ok(receipt)
    }

    /// Fetch a piece and verify it hashes back to `commitment` before any
    /// bytes reach the caller.
    #[tracing::instrument(skip_all, fields(dataset = %self.dataset.id, %commitment))]
    pub async fn download(&self, commitment: &Commitment) -> Result<Vec<u8>, ClientError> {
        let bytes = self.transports.blob.get_bytes(commitment).await?;

        let actual = match commp::calculate(&bytes) {
            Ok(actual) => actual,
            Err(_) => {
                return Err(ClientError::Integrity {
                    expected: *commitment,
                    actual: None,
                })
            }
        };
        if actual != *commitment {
            return Err(ClientError::Integrity {
                expected: *commitment,
                actual: Some(actual),
            });
        }

        Ok(bytes)
    }

    /// Whether the bound dataset tracks a piece with this commitment.
    pub async fn has_piece(&self, commitment: &Commitment) -> Result<bool, ClientError> {
        let pieces = self.list_pieces().await?;
        Ok(pieces.iter().any(|piece| piece.commitment == *commitment))
    }

    /// All pieces tracked in the bound dataset.
    pub async fn list_pieces(&self) -> Result<Vec<Piece>, ClientError> {
        Ok(self
            .transports
            .registry
            .dataset_pieces(self.dataset.id)
            .await?)
    }

    /// Poll the provider until the blob is parked or the parking budget runs
    /// out. Transient probe failures are swallowed until the deadline.
    async fn wait_parked(&self, commitment: &Commitment, size: u64) -> Result<(), ClientError> {
        let deadline = Instant::now() + self.config.parking_timeout;

        loop {
            match self.transports.blob.is_ready(commitment, size).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(err) => tracing::trace!(%err, "park poll failed, retrying"),
            }

            if Instant::now() >= deadline {
                return Err(ClientError::ParkingTimeout {
                    commitment: *commitment,
                    elapsed: self.config.parking_timeout,
                });
            }
            tokio::time::sleep(self.config.parking_poll_interval).await;
        }
    }
}

impl Drop for StorageContext {
    fn drop(&mut self) {
        self.batcher.shutdown();
    }
}

fn notify(events: &Option<mpsc::UnboundedSender<UploadEvent>>, event: UploadEvent) {
    if let Some(sender) = events {
        if sender.send(event).is_err() {
            // A gone listener must never abort the upload.
            tracing::warn!("upload event listener went away");
        }
    }
}
