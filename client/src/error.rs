use std::time::Duration;

use piece_commitment::{Commitment, FormatError, SizeError};

use crate::{
    batcher::BatchError, reconciler::ReconcileError, resolver::ResolveError,
    transport::TransportError,
};

/// Errors surfaced by the public storage operations.
///
/// Every operation either resolves with a fully populated result or fails
/// with exactly one of these, carrying the ids and sizes needed to diagnose
/// the failure without re-querying the transports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Size(#[from] SizeError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The provider accepted the bytes but never reported the blob parked.
    #[error("blob for {commitment} was not parked within {}s", elapsed.as_secs())]
    ParkingTimeout {
        commitment: Commitment,
        elapsed: Duration,
    },
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    /// Downloaded bytes do not hash back to the requested commitment.
    /// `actual` is `None` when the body was too small to commit to at all.
    #[error("downloaded bytes do not match commitment {expected}")]
    Integrity {
        expected: Commitment,
        actual: Option<Commitment>,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
}
