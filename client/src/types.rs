//! Core identifiers and registry entities.

use core::ops::Deref;

use piece_commitment::Commitment;
use url::Url;

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Deserialize,
            ::serde::Serialize,
        )]
        pub struct $name(u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                Self(id)
            }
        }

        impl Deref for $name {
            type Target = u64;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype! {
    /// Registry-unique identifier of a storage provider.
    ProviderId
}

id_newtype! {
    /// Ledger-assigned identifier of a dataset.
    DatasetId
}

id_newtype! {
    /// Per-dataset, sequentially assigned identifier of a piece.
    PieceId
}

impl PieceId {
    /// The piece id `n` positions after this one.
    pub fn offset(self, n: u64) -> Self {
        Self(self.0 + n)
    }
}

/// Opaque chain account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, ::serde::Deserialize, ::serde::Serialize)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Address {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Deserialize, ::serde::Serialize)]
pub struct TxRef(pub [u8; 32]);

impl core::fmt::Display for TxRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// An approved storage provider as seen through the registry.
#[derive(Debug, Clone, PartialEq, Eq, ::serde::Deserialize, ::serde::Serialize)]
pub struct Provider {
    pub id: ProviderId,
    pub address: Address,
    /// Base URL of the provider's blob upload service.
    pub upload_endpoint: Url,
    /// Base URL of the provider's retrieval service.
    pub retrieval_endpoint: Url,
    pub active: bool,
}

/// A ledger-tracked, provider-owned, payer-scoped collection of pieces.
#[derive(Debug, Clone, PartialEq, Eq, ::serde::Deserialize, ::serde::Serialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub provider: ProviderId,
    pub payer: Address,
    /// Whether retrieval for this dataset is served through the accelerated
    /// path. Affects selection and pricing, never commitment computation.
    pub with_cdn: bool,
    pub live: bool,
    /// Whether this deployment manages the dataset. Foreign datasets are
    /// never selected automatically.
    pub managed: bool,
    pub next_piece_id: PieceId,
    pub piece_count: u64,
}

/// One uploaded unit of data tracked in a dataset. Immutable once its
/// addition transaction is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, ::serde::Deserialize, ::serde::Serialize)]
pub struct Piece {
    pub id: PieceId,
    pub commitment: Commitment,
    /// Raw (unpadded) size in bytes.
    pub size: u64,
}

/// Transaction receipt as reported by the chain transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub mined: bool,
    pub success: bool,
    pub block: u64,
}

/// The transactions this client submits. Wire encoding is the chain
/// transport's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionPayload {
    CreateDataset {
        payer: Address,
        provider: ProviderId,
        with_cdn: bool,
    },
    AddPieces {
        dataset: DatasetId,
        /// Commitment and raw size per piece, in assignment order.
        pieces: Vec<(Commitment, u64)>,
    },
}
