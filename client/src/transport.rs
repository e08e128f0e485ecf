//! Interfaces to the external collaborators: the chain, the provider's blob
//! store, the provider's attestation endpoint and the health probe.
//!
//! The client core consumes these as black boxes. Implementations live with
//! the application wiring; the integration tests drive the core through
//! in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use piece_commitment::Commitment;

use crate::types::{
    Address, Dataset, DatasetId, Piece, PieceId, Provider, Receipt, TransactionPayload, TxRef,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The collaborator could not be reached or dropped the request.
    #[error("network error: {0}")]
    Network(String),
    /// The collaborator rejected the request (bad signature, refused
    /// session, unknown route).
    #[error("request rejected: {0}")]
    Rejected(String),
    /// The collaborator answered with something that could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Transaction submission and receipt lookup.
#[async_trait]
pub trait ChainTransport: Send + Sync {
    async fn submit_transaction(
        &self,
        payload: TransactionPayload,
    ) -> Result<TxRef, TransportError>;

    /// `None` while the chain does not know the transaction yet.
    async fn transaction_receipt(&self, tx: &TxRef) -> Result<Option<Receipt>, TransportError>;
}

/// Read-only view over the on-chain provider and dataset directories.
#[async_trait]
pub trait RegistryView: Send + Sync {
    async fn dataset(&self, id: DatasetId) -> Result<Option<Dataset>, TransportError>;

    /// All datasets whose payer is `payer`, live or not.
    async fn datasets_of(&self, payer: &Address) -> Result<Vec<Dataset>, TransportError>;

    async fn approved_providers(&self) -> Result<Vec<Provider>, TransportError>;

    /// The id the next appended piece will receive.
    async fn next_piece_id(&self, dataset: DatasetId) -> Result<PieceId, TransportError>;

    async fn dataset_pieces(&self, dataset: DatasetId) -> Result<Vec<Piece>, TransportError>;

    /// Total storage cost for `size` bytes under the given retrieval path.
    async fn storage_price(&self, size: u64, with_cdn: bool) -> Result<u128, TransportError>;

    /// Remaining payment allowance of the payer.
    async fn allowance(&self, payer: &Address) -> Result<u128, TransportError>;
}

/// Reference to an open upload session on the provider's blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef(pub String);

/// Outcome of opening an upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSession {
    Created(SessionRef),
    /// The provider already holds a blob with this commitment; the byte
    /// transfer can be skipped.
    AlreadyExists,
}

/// The provider's blob store.
#[async_trait]
pub trait BlobTransport: Send + Sync {
    async fn create_upload_session(
        &self,
        commitment: &Commitment,
        size: u64,
    ) -> Result<UploadSession, TransportError>;

    async fn put_bytes(&self, session: &SessionRef, bytes: &[u8]) -> Result<(), TransportError>;

    /// Whether the blob has been durably parked and can be referenced in a
    /// transaction.
    async fn is_ready(&self, commitment: &Commitment, size: u64) -> Result<bool, TransportError>;

    async fn get_bytes(&self, commitment: &Commitment) -> Result<Vec<u8>, TransportError>;
}

/// Provider-side view of a piece addition transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceAdditionStatus {
    pub confirmed: bool,
    pub piece_ids: Vec<PieceId>,
}

/// Provider-side view of a dataset creation transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetCreationStatus {
    pub confirmed: bool,
    pub dataset_id: DatasetId,
}

/// The provider's own record of processed transactions. Lags the chain, and
/// occasionally the other way around.
#[async_trait]
pub trait AttestationTransport: Send + Sync {
    /// `Ok(None)` means "not yet known", an error means the endpoint
    /// misbehaved. The two are reported distinctly.
    async fn piece_addition_status(
        &self,
        dataset: DatasetId,
        tx: &TxRef,
    ) -> Result<Option<PieceAdditionStatus>, TransportError>;

    async fn dataset_creation_status(
        &self,
        tx: &TxRef,
    ) -> Result<Option<DatasetCreationStatus>, TransportError>;
}

/// Lightweight provider liveness check used during automatic selection.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn ping(&self, provider: &Provider) -> Result<(), TransportError>;
}

/// The full set of collaborator handles the client core runs against.
#[derive(Clone)]
pub struct Transports {
    pub chain: Arc<dyn ChainTransport>,
    pub registry: Arc<dyn RegistryView>,
    pub blob: Arc<dyn BlobTransport>,
    pub attestation: Arc<dyn AttestationTransport>,
    pub probe: Arc<dyn HealthProbe>,
}
