//! Client engine for provider-hosted, ledger-tracked datasets.
//!
//! Turns "store these bytes with some provider" into a confirmed, verifiable
//! piece of an on-chain dataset, and "fetch by commitment" into
//! integrity-checked bytes. The heavy lifting sits in four parts:
//!
//! - [`piece_commitment`]: the chunk-invariant content commitment;
//! - [`resolver`]: picking the provider and dataset a piece lands in;
//! - [`batcher`]: coalescing concurrent uploads into one transaction per
//!   dataset batch while keeping piece id assignment contiguous;
//! - [`reconciler`]: joining the chain receipt and the provider attestation
//!   into one terminal completion signal.
//!
//! [`StorageContext`] composes them behind upload/download/preflight/list
//! operations; [`StorageManager`] adds selector resolution, dataset creation
//! and context reuse on top.
//!
//! The chain, blob store, attestation endpoint and health probe are consumed
//! through the traits in [`transport`]; the crate holds no durable state of
//! its own.

pub mod batcher;
pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod reconciler;
pub mod resolver;
pub mod transport;
pub mod types;

pub use piece_commitment::{self, commp, Commitment, PieceInfo};

pub use crate::{
    batcher::{BatchError, PieceReceipt},
    config::ClientConfig,
    context::{PreflightEstimate, StorageContext, UploadEvent, UploadReceipt},
    error::ClientError,
    manager::StorageManager,
    reconciler::{Completion, Expected, ReconcileError},
    resolver::{DatasetChoice, DatasetSelector, Resolution, ResolveError},
    transport::{
        AttestationTransport, BlobTransport, ChainTransport, HealthProbe, RegistryView,
        TransportError, Transports,
    },
    types::{
        Address, Dataset, DatasetId, Piece, PieceId, Provider, ProviderId, Receipt,
        TransactionPayload, TxRef,
    },
};
