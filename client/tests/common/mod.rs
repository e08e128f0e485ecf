//! In-memory collaborators for driving the client core in tests: one shared
//! state behind every transport trait, with injectable lag and failures.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use dataset_client::{
    Address, AttestationTransport, BlobTransport, ChainTransport, ClientConfig, Commitment,
    Dataset, DatasetId, HealthProbe, Piece, PieceId, Provider, ProviderId, Receipt, RegistryView,
    TransactionPayload, TransportError, Transports, TxRef,
};
use dataset_client::transport::{
    DatasetCreationStatus, PieceAdditionStatus, SessionRef, UploadSession,
};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEffect {
    DatasetCreated(DatasetId),
    PiecesAdded {
        dataset: DatasetId,
        piece_ids: Vec<PieceId>,
    },
    /// Reverted transactions change nothing.
    None,
}

#[derive(Debug, Clone)]
pub struct FakeTx {
    pub receipt: Receipt,
    pub effect: TxEffect,
    /// Remaining attestation polls answered with "not yet known".
    pub server_polls_left: u32,
}

#[derive(Default)]
pub struct NetState {
    pub providers: Vec<Provider>,
    pub datasets: HashMap<DatasetId, Dataset>,
    pub pieces: HashMap<DatasetId, Vec<Piece>>,

    pub blobs: HashMap<Commitment, Vec<u8>>,
    pub sessions: HashMap<String, Commitment>,
    pub park_polls_left: HashMap<Commitment, u32>,
    /// Readiness polls a fresh blob answers "not ready" before parking.
    pub park_delay_polls: u32,
    /// Blobs never park at all.
    pub never_park: bool,
    pub corrupt_downloads: bool,

    pub transactions: HashMap<TxRef, FakeTx>,
    pub tx_counter: u64,
    pub next_dataset_id: u64,

    pub price_per_byte: u128,
    pub allowances: HashMap<Address, u128>,

    pub unhealthy: HashSet<ProviderId>,
    /// Upcoming submissions that fail at the transport.
    pub fail_submissions: u32,
    /// Upcoming submissions that mine but revert.
    pub revert_submissions: u32,
    /// Attestation polls answered "not yet known" per fresh transaction.
    pub server_lag_polls: u32,
    /// Attestation never knows any transaction.
    pub server_silent: bool,
    /// Attestation answers garbage.
    pub server_malformed: bool,
}

pub struct FakeNet {
    pub state: Mutex<NetState>,
}

impl FakeNet {
    pub fn new(state: NetState) -> Arc<Self> {
        init_tracing();
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn transports(self: &Arc<Self>) -> Transports {
        Transports {
            chain: self.clone(),
            registry: self.clone(),
            blob: self.clone(),
            attestation: self.clone(),
            probe: self.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetState> {
        self.state.lock().expect("fake state lock poisoned")
    }
}

#[async_trait]
impl ChainTransport for FakeNet {
    async fn submit_transaction(
        &self,
        payload: TransactionPayload,
    ) -> Result<TxRef, TransportError> {
        let mut state = self.lock();

        if state.fail_submissions > 0 {
            state.fail_submissions -= 1;
            return Err(TransportError::Network("injected submission failure".into()));
        }

        state.tx_counter += 1;
        let mut raw = [0u8; 32];
        raw[..8].copy_from_slice(&state.tx_counter.to_be_bytes());
        let tx = TxRef(raw);
        let block = state.tx_counter;

        if state.revert_submissions > 0 {
            state.revert_submissions -= 1;
            let server_polls_left = state.server_lag_polls;
            state.transactions.insert(
                tx,
                FakeTx {
                    receipt: Receipt {
                        mined: true,
                        success: false,
                        block,
                    },
                    effect: TxEffect::None,
                    server_polls_left,
                },
            );
            return Ok(tx);
        }

        let effect = match payload {
            TransactionPayload::CreateDataset {
                payer,
                provider,
                with_cdn,
            } => {
                state.next_dataset_id += 1;
                let id = DatasetId::new(state.next_dataset_id);
                state.datasets.insert(
                    id,
                    Dataset {
                        id,
                        provider,
                        payer,
                        with_cdn,
                        live: true,
                        managed: true,
                        next_piece_id: PieceId::new(0),
                        piece_count: 0,
                    },
                );
                TxEffect::DatasetCreated(id)
            }
            TransactionPayload::AddPieces { dataset, pieces } => {
                let entry = state
                    .datasets
                    .get_mut(&dataset)
                    .expect("test submitted pieces for an unknown dataset");
                let first = entry.next_piece_id;
                let piece_ids: Vec<PieceId> = (0..pieces.len() as u64)
                    .map(|offset| first.offset(offset))
                    .collect();
                entry.next_piece_id = first.offset(pieces.len() as u64);
                entry.piece_count += pieces.len() as u64;

                let recorded = state.pieces.entry(dataset).or_default();
                for (id, (commitment, size)) in piece_ids.iter().zip(pieces) {
                    recorded.push(Piece {
                        id: *id,
                        commitment,
                        size,
                    });
                }
                TxEffect::PiecesAdded { dataset, piece_ids }
            }
        };

        let server_polls_left = state.server_lag_polls;
        state.transactions.insert(
            tx,
            FakeTx {
                receipt: Receipt {
                    mined: true,
                    success: true,
                    block,
                },
                effect,
                server_polls_left,
            },
        );
        Ok(tx)
    }

    async fn transaction_receipt(&self, tx: &TxRef) -> Result<Option<Receipt>, TransportError> {
        Ok(self.lock().transactions.get(tx).map(|entry| entry.receipt))
    }
}

#[async_trait]
impl RegistryView for FakeNet {
    async fn dataset(&self, id: DatasetId) -> Result<Option<Dataset>, TransportError> {
        Ok(self.lock().datasets.get(&id).cloned())
    }

    async fn datasets_of(&self, payer: &Address) -> Result<Vec<Dataset>, TransportError> {
        Ok(self
            .lock()
            .datasets
            .values()
            .filter(|dataset| dataset.payer == *payer)
            .cloned()
            .collect())
    }

    async fn approved_providers(&self) -> Result<Vec<Provider>, TransportError> {
        Ok(self.lock().providers.clone())
    }

    async fn next_piece_id(&self, dataset: DatasetId) -> Result<PieceId, TransportError> {
        self.lock()
            .datasets
            .get(&dataset)
            .map(|dataset| dataset.next_piece_id)
            .ok_or_else(|| TransportError::Rejected(format!("unknown dataset {dataset}")))
    }

    async fn dataset_pieces(&self, dataset: DatasetId) -> Result<Vec<Piece>, TransportError> {
        Ok(self.lock().pieces.get(&dataset).cloned().unwrap_or_default())
    }

    async fn storage_price(&self, size: u64, with_cdn: bool) -> Result<u128, TransportError> {
        let state = self.lock();
        let multiplier = if with_cdn { 2 } else { 1 };
        Ok(state.price_per_byte * size as u128 * multiplier)
    }

    async fn allowance(&self, payer: &Address) -> Result<u128, TransportError> {
        Ok(self.lock().allowances.get(payer).copied().unwrap_or(0))
    }
}

#[async_trait]
impl BlobTransport for FakeNet {
    async fn create_upload_session(
        &self,
        commitment: &Commitment,
        _size: u64,
    ) -> Result<UploadSession, TransportError> {
        let mut state = self.lock();
        if state.blobs.contains_key(commitment) {
            return Ok(UploadSession::AlreadyExists);
        }
        let session = commitment.to_string();
        state.sessions.insert(session.clone(), *commitment);
        Ok(UploadSession::Created(SessionRef(session)))
    }

    async fn put_bytes(&self, session: &SessionRef, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock();
        let commitment = *state
            .sessions
            .get(&session.0)
            .ok_or_else(|| TransportError::Rejected("unknown session".into()))?;
        let delay = state.park_delay_polls;
        state.blobs.insert(commitment, bytes.to_vec());
        state.park_polls_left.insert(commitment, delay);
        Ok(())
    }

    async fn is_ready(&self, commitment: &Commitment, _size: u64) -> Result<bool, TransportError> {
        let mut state = self.lock();
        if state.never_park || !state.blobs.contains_key(commitment) {
            return Ok(false);
        }
        let left = state.park_polls_left.entry(*commitment).or_insert(0);
        if *left == 0 {
            Ok(true)
        } else {
            *left -= 1;
            Ok(false)
        }
    }

    async fn get_bytes(&self, commitment: &Commitment) -> Result<Vec<u8>, TransportError> {
        let state = self.lock();
        let mut bytes = state
            .blobs
            .get(commitment)
            .cloned()
            .ok_or_else(|| TransportError::Rejected(format!("unknown blob {commitment}")))?;
        if state.corrupt_downloads {
            bytes[0] ^= 0xff;
        }
        Ok(bytes)
    }
}

#[async_trait]
impl AttestationTransport for FakeNet {
    async fn piece_addition_status(
        &self,
        _dataset: DatasetId,
        tx: &TxRef,
    ) -> Result<Option<PieceAdditionStatus>, TransportError> {
        let mut state = self.lock();
        if state.server_silent {
            return Ok(None);
        }
        if state.server_malformed {
            return Err(TransportError::Malformed("injected garbage response".into()));
        }
        let Some(entry) = state.transactions.get_mut(tx) else {
            return Ok(None);
        };
        if entry.server_polls_left > 0 {
            entry.server_polls_left -= 1;
            return Ok(None);
        }
        match &entry.effect {
            TxEffect::PiecesAdded { piece_ids, .. } => Ok(Some(PieceAdditionStatus {
                confirmed: true,
                piece_ids: piece_ids.clone(),
            })),
            _ => Ok(None),
        }
    }

    async fn dataset_creation_status(
        &self,
        tx: &TxRef,
    ) -> Result<Option<DatasetCreationStatus>, TransportError> {
        let mut state = self.lock();
        if state.server_silent {
            return Ok(None);
        }
        if state.server_malformed {
            return Err(TransportError::Malformed("injected garbage response".into()));
        }
        let Some(entry) = state.transactions.get_mut(tx) else {
            return Ok(None);
        };
        if entry.server_polls_left > 0 {
            entry.server_polls_left -= 1;
            return Ok(None);
        }
        match entry.effect {
            TxEffect::DatasetCreated(dataset_id) => Ok(Some(DatasetCreationStatus {
                confirmed: true,
                dataset_id,
            })),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl HealthProbe for FakeNet {
    async fn ping(&self, provider: &Provider) -> Result<(), TransportError> {
        if self.lock().unhealthy.contains(&provider.id) {
            Err(TransportError::Network("injected probe failure".into()))
        } else {
            Ok(())
        }
    }
}

pub fn provider(id: u64) -> Provider {
    Provider {
        id: ProviderId::new(id),
        address: Address::new(format!("0xprovider{id}")),
        upload_endpoint: Url::parse(&format!("http://provider-{id}.example/upload/"))
            .expect("static url"),
        retrieval_endpoint: Url::parse(&format!("http://provider-{id}.example/retrieve/"))
            .expect("static url"),
        active: true,
    }
}

pub fn dataset(id: u64, provider: u64, payer: &Address, piece_count: u64) -> Dataset {
    Dataset {
        id: DatasetId::new(id),
        provider: ProviderId::new(provider),
        payer: payer.clone(),
        with_cdn: false,
        live: true,
        managed: true,
        next_piece_id: PieceId::new(piece_count),
        piece_count,
    }
}

pub fn payer() -> Address {
    Address::new("0xpayer")
}

/// Config with short windows so paused-clock tests step through quickly.
pub fn test_config() -> ClientConfig {
    use std::time::Duration;

    ClientConfig {
        max_batch_size: 32,
        batch_debounce: Duration::from_millis(100),
        parking_poll_interval: Duration::from_millis(100),
        parking_timeout: Duration::from_secs(5),
        confirmation_poll_interval: Duration::from_millis(100),
        confirmation_timeout: Duration::from_secs(10),
    }
}

/// A deterministic payload of `len` bytes, distinct per `seed`.
pub fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_add((i % 251) as u8))
        .collect()
}

/// Honours `RUST_LOG`; repeated calls after the first are no-ops.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
