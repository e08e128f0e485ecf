//! Reconciliation of the two lagging sources of truth behind a submitted
//! transaction: the chain receipt and the provider's own attestation.
//!
//! The two signals are tracked independently and completion requires both to
//! be positive. Either one alone is insufficient: the provider's record can
//! trail a settled chain, and right after submission the opposite holds.

use std::time::Duration;

use tokio::time::Instant;

use crate::{
    config::ClientConfig,
    transport::Transports,
    types::{DatasetId, PieceId, TxRef},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("transaction {tx} reverted on chain in block {block}")]
    ChainRevert { tx: TxRef, block: u64 },
    #[error("provider never acknowledged transaction {tx}: {last_error}")]
    ServerUnavailable { tx: TxRef, last_error: String },
    #[error(
        "transaction {tx} not confirmed within {}s (chain: {chain_confirmed}, server: {server_confirmed})",
        timeout.as_secs()
    )]
    TimedOut {
        tx: TxRef,
        timeout: Duration,
        chain_confirmed: bool,
        server_confirmed: bool,
    },
    #[error("provider reported piece ids {actual:?} for transaction {tx}, expected {expected:?}")]
    PieceIdMismatch {
        tx: TxRef,
        expected: Vec<PieceId>,
        actual: Vec<PieceId>,
    },
}

/// What the awaited transaction was supposed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    DatasetCreation,
    PieceAddition {
        dataset: DatasetId,
        piece_ids: Vec<PieceId>,
    },
}

/// Terminal result once both signals agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    DatasetCreated { dataset_id: DatasetId, block: u64 },
    PiecesAdded { piece_ids: Vec<PieceId>, block: u64 },
}

/// Await the dual confirmation of a dataset creation transaction, returning
/// the created dataset's id.
pub async fn await_dataset_creation(
    transports: &Transports,
    config: &ClientConfig,
    tx: &TxRef,
) -> Result<(DatasetId, u64), ReconcileError> {
    match await_completion(transports, config, tx, Expected::DatasetCreation).await? {
        Completion::DatasetCreated { dataset_id, block } => Ok((dataset_id, block)),
        Completion::PiecesAdded { .. } => {
            unreachable!("dataset creation expectation completes with DatasetCreated")
        }
    }
}

/// Await the dual confirmation of a piece addition transaction.
pub async fn await_piece_addition(
    transports: &Transports,
    config: &ClientConfig,
    tx: &TxRef,
    dataset: DatasetId,
    piece_ids: Vec<PieceId>,
) -> Result<(Vec<PieceId>, u64), ReconcileError> {
    let expected = Expected::PieceAddition { dataset, piece_ids };
    match await_completion(transports, config, tx, expected).await? {
        Completion::PiecesAdded { piece_ids, block } => Ok((piece_ids, block)),
        Completion::DatasetCreated { .. } => {
            unreachable!("piece addition expectation completes with PiecesAdded")
        }
    }
}

/// Poll the chain receipt and the provider attestation until both are
/// positive, the chain reverts, or the confirmation budget runs out.
///
/// Transient transport failures on either signal are swallowed and retried;
/// only the overall deadline turns them into an error.
#[tracing::instrument(skip_all, fields(tx = %tx))]
pub async fn await_completion(
    transports: &Transports,
    config: &ClientConfig,
    tx: &TxRef,
    expected: Expected,
) -> Result<Completion, ReconcileError> {
    let deadline = Instant::now() + config.confirmation_timeout;

    // Chain-confirmed block, provider-confirmed payload and the last
    // non-"not yet known" server failure, each tracked on its own.
    let mut chain_block: Option<u64> = None;
    let mut server_dataset: Option<DatasetId> = None;
    let mut server_pieces: Option<Vec<PieceId>> = None;
    let mut last_server_error: Option<String> = None;

    loop {
        if chain_block.is_none() {
            match transports.chain.transaction_receipt(tx).await {
                Ok(Some(receipt)) if receipt.mined => {
                    if receipt.success {
                        tracing::debug!(block = receipt.block, "transaction mined");
                        chain_block = Some(receipt.block);
                    } else {
                        // A revert is terminal, the provider cannot undo it.
                        return Err(ReconcileError::ChainRevert {
                            tx: *tx,
                            block: receipt.block,
                        });
                    }
                }
                Ok(_) => {}
                Err(err) => tracing::trace!(%err, "receipt poll failed, retrying"),
            }
        }

        match &expected {
            Expected::DatasetCreation if server_dataset.is_none() => {
                match transports.attestation.dataset_creation_status(tx).await {
                    Ok(Some(status)) if status.confirmed => {
                        tracing::debug!(dataset = %status.dataset_id, "provider confirmed dataset");
                        server_dataset = Some(status.dataset_id);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(%err, "attestation endpoint misbehaved");
                        last_server_error = Some(err.to_string());
                    }
                }
            }
            Expected::PieceAddition { dataset, piece_ids } if server_pieces.is_none() => {
                match transports.attestation.piece_addition_status(*dataset, tx).await {
                    Ok(Some(status)) if status.confirmed => {
                        if status.piece_ids != *piece_ids {
                            return Err(ReconcileError::PieceIdMismatch {
                                tx: *tx,
                                expected: piece_ids.clone(),
                                actual: status.piece_ids,
                            });
                        }
                        tracing::debug!("provider confirmed piece addition");
                        server_pieces = Some(status.piece_ids);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(%err, "attestation endpoint misbehaved");
                        last_server_error = Some(err.to_string());
                    }
                }
            }
            _ => {}
        }

        // Completion needs both signals; for dataset creation the id the
        // provider reported must also read back live from the registry.
        if let Some(block) = chain_block {
            match &expected {
                Expected::DatasetCreation => {
                    if let Some(dataset_id) = server_dataset {
                        match transports.registry.dataset(dataset_id).await {
                            Ok(Some(dataset)) if dataset.live => {
                                return Ok(Completion::DatasetCreated { dataset_id, block });
                            }
                            Ok(_) => tracing::trace!(%dataset_id, "dataset not live yet"),
                            Err(err) => tracing::trace!(%err, "registry poll failed, retrying"),
                        }
                    }
                }
                Expected::PieceAddition { .. } => {
                    if let Some(piece_ids) = &server_pieces {
                        return Ok(Completion::PiecesAdded {
                            piece_ids: piece_ids.clone(),
                            block,
                        });
                    }
                }
            }
        }

        if Instant::now() >= deadline {
            let server_confirmed = server_dataset.is_some() || server_pieces.is_some();
            return Err(match last_server_error {
                Some(last_error) if chain_block.is_some() => ReconcileError::ServerUnavailable {
                    tx: *tx,
                    last_error,
                },
                _ => ReconcileError::TimedOut {
                    tx: *tx,
                    timeout: config.confirmation_timeout,
                    chain_confirmed: chain_block.is_some(),
                    server_confirmed,
                },
            });
        }

        tokio::time::sleep(config.confirmation_poll_interval).await;
    }
}
