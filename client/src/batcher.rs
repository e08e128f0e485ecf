//! Coalescing of concurrent single-piece requests into batched piece
//! addition transactions.
//!
//! Each dataset gets one worker task owning the pending queue. Requests
//! accumulate until a debounce window closes or the batch is full; the worker
//! then reads the dataset's next piece id once, assigns contiguous ids in
//! arrival order and submits a single transaction for the whole batch. The
//! worker flushes one batch at a time, which is the serialization point that
//! keeps id ranges of in-flight batches from overlapping; requests arriving
//! mid-flush buffer in the channel and form the next batch.

use std::sync::Arc;

use piece_commitment::Commitment;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ClientConfig,
    reconciler::{self, ReconcileError},
    transport::{TransportError, Transports},
    types::{DatasetId, PieceId, TransactionPayload, TxRef},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    /// The batch transaction could not be submitted. Every member of the
    /// batch observes this same error.
    #[error("failed to submit piece addition for dataset {dataset}: {error}")]
    Submission {
        dataset: DatasetId,
        error: Arc<TransportError>,
    },
    #[error("failed to read the next piece id for dataset {dataset}: {error}")]
    Registry {
        dataset: DatasetId,
        error: Arc<TransportError>,
    },
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("the batcher for dataset {0} is shut down")]
    Closed(DatasetId),
}

/// Per-request outcome of a confirmed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceReceipt {
    pub commitment: Commitment,
    pub size: u64,
    pub piece_id: PieceId,
    /// Transaction the piece was added in.
    pub tx: TxRef,
}

struct BatchRequest {
    commitment: Commitment,
    size: u64,
    reply: oneshot::Sender<Result<PieceReceipt, BatchError>>,
}

/// Handle to a dataset's batch worker.
pub struct Batcher {
    dataset: DatasetId,
    sender: mpsc::UnboundedSender<BatchRequest>,
    token: CancellationToken,
}

impl Batcher {
    /// Spawn the worker task for one dataset.
    pub fn spawn(transports: Transports, config: ClientConfig, dataset: DatasetId) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let worker = BatchWorker {
            transports,
            config,
            dataset,
            token: token.clone(),
        };
        tokio::spawn(worker.run(receiver));

        Self {
            dataset,
            sender,
            token,
        }
    }

    /// Queue a parked piece for the next batch and await its terminal
    /// outcome.
    ///
    /// Dropping the returned future after this call does not retract the
    /// request; once its batch is submitted the piece is added regardless.
    pub async fn enqueue(
        &self,
        commitment: Commitment,
        size: u64,
    ) -> Result<PieceReceipt, BatchError> {
        let (reply, outcome) = oneshot::channel();
        self.sender
            .send(BatchRequest {
                commitment,
                size,
                reply,
            })
            .map_err(|_| BatchError::Closed(self.dataset))?;

        outcome.await.map_err(|_| BatchError::Closed(self.dataset))?
    }

    /// Stop the worker. Queued requests fail with [`BatchError::Closed`].
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct BatchWorker {
    transports: Transports,
    config: ClientConfig,
    dataset: DatasetId,
    token: CancellationToken,
}

impl BatchWorker {
    #[tracing::instrument(skip_all, fields(dataset = %self.dataset))]
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<BatchRequest>) {
        let max_batch = self.config.effective_max_batch_size();

        'outer: loop {
            // Wait for the request that opens the next batch.
            let first = tokio::select! {
                () = self.token.cancelled() => break 'outer,
                request = receiver.recv() => match request {
                    Some(request) => request,
                    None => break 'outer,
                },
            };

            let mut batch = vec![first];

            // Debounce window; every arrival restarts it, a full batch ends
            // it early.
            while batch.len() < max_batch {
                let deadline = tokio::time::Instant::now() + self.config.batch_debounce;
                tokio::select! {
                    () = self.token.cancelled() => {
                        fail_all(batch, BatchError::Closed(self.dataset));
                        break 'outer;
                    }
                    _ = tokio::time::sleep_until(deadline) => break,
                    request = receiver.recv() => match request {
                        Some(request) => batch.push(request),
                        None => break,
                    },
                }
            }

            self.flush(batch).await;
        }

        // Anything still queued will never be submitted.
        receiver.close();
        while let Ok(request) = receiver.try_recv() {
            let _ = request.reply.send(Err(BatchError::Closed(self.dataset)));
        }
        tracing::debug!("batch worker stopped");
    }

    #[tracing::instrument(skip_all, fields(dataset = %self.dataset, batch_size = batch.len()))]
    async fn flush(&self, batch: Vec<BatchRequest>) {
        match self.submit(&batch).await {
            Ok((first_id, tx)) => {
                for (offset, request) in batch.into_iter().enumerate() {
                    let receipt = PieceReceipt {
                        commitment: request.commitment,
                        size: request.size,
                        piece_id: first_id.offset(offset as u64),
                        tx,
                    };
                    // The caller may have gone away; the piece is on chain
                    // either way.
                    let _ = request.reply.send(Ok(receipt));
                }
            }
            Err(error) => {
                tracing::warn!(%error, "batch failed");
                fail_all(batch, error);
            }
        }
    }

    /// Read the id counter, submit the whole batch in one transaction and
    /// await its dual confirmation.
    async fn submit(&self, batch: &[BatchRequest]) -> Result<(PieceId, TxRef), BatchError> {
        let first_id = self
            .transports
            .registry
            .next_piece_id(self.dataset)
            .await
            .map_err(|error| BatchError::Registry {
                dataset: self.dataset,
                error: Arc::new(error),
            })?;

        let piece_ids: Vec<PieceId> = (0..batch.len() as u64)
            .map(|offset| first_id.offset(offset))
            .collect();
        let pieces = batch
            .iter()
            .map(|request| (request.commitment, request.size))
            .collect();

        let tx = self
            .transports
            .chain
            .submit_transaction(TransactionPayload::AddPieces {
                dataset: self.dataset,
                pieces,
            })
            .await
            .map_err(|error| BatchError::Submission {
                dataset: self.dataset,
                error: Arc::new(error),
            })?;
        tracing::debug!(%tx, first_piece_id = %first_id, "submitted piece addition");

        reconciler::await_piece_addition(&self.transports, &self.config, &tx, self.dataset, piece_ids)
            .await?;

        Ok((first_id, tx))
    }
}

fn fail_all(batch: Vec<BatchRequest>, error: BatchError) {
    for request in batch {
        let _ = request.reply.send(Err(error.clone()));
    }
}
