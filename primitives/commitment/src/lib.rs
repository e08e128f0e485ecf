//! Content commitments for pieces tracked in on-chain datasets.
//!
//! A piece commitment is the root of a binary merkle tree built over the
//! Fr32-expanded piece content, together with the tree height. The crate
//! provides the streaming calculator ([`CommitmentHasher`]) and conversions
//! between the current, self-describing CID representation and the legacy
//! `(CID, padded size)` pair.

pub mod commp;
pub mod piece;

use cid::{multihash::Multihash, Cid};

use crate::piece::{PaddedPieceSize, PieceSizeError};

pub use crate::commp::{calculate, CommitmentHasher, SizeError};

/// Merkle tree node size in bytes.
pub const NODE_SIZE: usize = 32;

/// Multicodec code for raw binary data, used by the current piece CID
/// representation.
///
/// https://github.com/multiformats/multicodec/blob/badcfe56bb7e0bbb06b60d57565186cd6be1f932/table.csv#L41
pub const CID_CODEC_RAW: u64 = 0x55;

/// Filecoin piece or sector data commitment merkle node/root (CommP & CommD),
/// used by the legacy piece CID representation.
///
/// https://github.com/multiformats/multicodec/blob/badcfe56bb7e0bbb06b60d57565186cd6be1f932/table.csv#L554
pub const FIL_COMMITMENT_UNSEALED: u64 = 0xf101;

/// SHA2-256 with the two most significant bits from the last byte zeroed (as
/// via a mask with 0b00111111) - used for proving trees as in Filecoin.
///
/// https://github.com/multiformats/multicodec/blob/badcfe56bb7e0bbb06b60d57565186cd6be1f932/table.csv#L153
pub const SHA2_256_TRUNC254_PADDED: u64 = 0x1012;

/// SHA2-256 over the Fr32-expanded binary merkle tree, with the tree height
/// carried in the digest. Used by the current piece CID representation.
///
/// https://github.com/multiformats/multicodec/blob/master/table.csv#L156
pub const FR32_SHA256_TRUNC254_PADBINTREE: u64 = 0x1011;

/// Smallest supported tree height; `32 << 2` is the 128 byte minimum padded
/// piece size.
pub const MIN_TREE_HEIGHT: u8 = 2;

/// Largest supported tree height, bounding pieces to `32 << 50` bytes.
pub const MAX_TREE_HEIGHT: u8 = 50;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("bytes are not a valid cid: {0}")]
    InvalidCid(String),
    #[error("expected multicodec {expected:#x}, got {actual:#x}")]
    UnexpectedCodec { expected: u64, actual: u64 },
    #[error("expected multihash {expected:#x}, got {actual:#x}")]
    UnexpectedMultihash { expected: u64, actual: u64 },
    #[error("expected a digest of {expected} bytes, got {actual}")]
    UnexpectedDigestLength { expected: usize, actual: usize },
    #[error("tree height {0} is outside the supported range {MIN_TREE_HEIGHT}..={MAX_TREE_HEIGHT}")]
    HeightOutOfRange(u8),
    #[error(transparent)]
    InvalidSize(#[from] PieceSizeError),
}

/// A piece content commitment.
///
/// Equality is structural: two commitments are equal when their merkle roots
/// and tree heights are equal. The padded piece size is fully determined by
/// the height, which makes the current CID representation self-describing.
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Commitment {
    root: [u8; NODE_SIZE],
    height: u8,
}

impl Commitment {
    /// Creates a new `Commitment` from a merkle root and a tree height.
    /// Returns an error if the height is outside the supported range.
    pub fn new(root: [u8; NODE_SIZE], height: u8) -> Result<Self, FormatError> {
        if !(MIN_TREE_HEIGHT..=MAX_TREE_HEIGHT).contains(&height) {
            return Err(FormatError::HeightOutOfRange(height));
        }
        Ok(Self { root, height })
    }

    /// Returns the raw merkle root bytes.
    pub fn root(&self) -> [u8; NODE_SIZE] {
        self.root
    }

    /// Returns the merkle tree height.
    pub fn height(&self) -> u8 {
        self.height
    }

    /// Returns the padded piece size committed to, `32 << height` bytes.
    pub fn padded_size(&self) -> PaddedPieceSize {
        PaddedPieceSize::new((NODE_SIZE as u64) << self.height)
            .expect("32 << height is a valid padded size for any supported height")
    }

    /// Converts the commitment to its current CID representation: a raw-codec
    /// CIDv1 whose multihash digest is the tree height followed by the root.
    pub fn cid(&self) -> Cid {
        let mut digest = [0u8; NODE_SIZE + 1];
        digest[0] = self.height;
        digest[1..].copy_from_slice(&self.root);
        let hash = Multihash::wrap(FR32_SHA256_TRUNC254_PADBINTREE, &digest)
            .expect("multihash is large enough so it can wrap the digest");
        Cid::new_v1(CID_CODEC_RAW, hash)
    }

    /// Parses a commitment from its current CID representation.
    pub fn from_cid(cid: &Cid) -> Result<Self, FormatError> {
        if cid.codec() != CID_CODEC_RAW {
            return Err(FormatError::UnexpectedCodec {
                expected: CID_CODEC_RAW,
                actual: cid.codec(),
            });
        }

        let hash = cid.hash();
        if hash.code() != FR32_SHA256_TRUNC254_PADBINTREE {
            return Err(FormatError::UnexpectedMultihash {
                expected: FR32_SHA256_TRUNC254_PADBINTREE,
                actual: hash.code(),
            });
        }

        let digest = hash.digest();
        if digest.len() != NODE_SIZE + 1 {
            return Err(FormatError::UnexpectedDigestLength {
                expected: NODE_SIZE + 1,
                actual: digest.len(),
            });
        }

        let mut root = [0u8; NODE_SIZE];
        root.copy_from_slice(&digest[1..]);
        Self::new(root, digest[0])
    }

    /// Parses a commitment from the byte encoding of its current CID
    /// representation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let cid = Cid::try_from(bytes).map_err(|err| FormatError::InvalidCid(err.to_string()))?;
        Self::from_cid(&cid)
    }

    /// Converts the commitment to the legacy representation, a
    /// `fil-commitment-unsealed` CID paired with the padded piece size.
    pub fn to_piece_info(&self) -> PieceInfo {
        let hash = Multihash::wrap(SHA2_256_TRUNC254_PADDED, &self.root)
            .expect("multihash is large enough so it can wrap the root");
        PieceInfo {
            cid: Cid::new_v1(FIL_COMMITMENT_UNSEALED, hash),
            size: self.padded_size(),
        }
    }

    /// Parses a commitment from its legacy representation.
    ///
    /// Round-trips losslessly with [`Commitment::to_piece_info`] for every
    /// supported power-of-two padded size.
    pub fn from_piece_info(piece_info: &PieceInfo) -> Result<Self, FormatError> {
        if piece_info.cid.codec() != FIL_COMMITMENT_UNSEALED {
            return Err(FormatError::UnexpectedCodec {
                expected: FIL_COMMITMENT_UNSEALED,
                actual: piece_info.cid.codec(),
            });
        }

        let hash = piece_info.cid.hash();
        if hash.code() != SHA2_256_TRUNC254_PADDED {
            return Err(FormatError::UnexpectedMultihash {
                expected: SHA2_256_TRUNC254_PADDED,
                actual: hash.code(),
            });
        }

        let digest = hash.digest();
        if digest.len() != NODE_SIZE {
            return Err(FormatError::UnexpectedDigestLength {
                expected: NODE_SIZE,
                actual: digest.len(),
            });
        }

        // Validity of the size was checked on construction, the height bound
        // still needs to hold.
        let height = (*piece_info.size / NODE_SIZE as u64).trailing_zeros() as u8;
        let mut root = [0u8; NODE_SIZE];
        root.copy_from_slice(digest);
        Self::new(root, height)
    }
}

impl core::fmt::Display for Commitment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.cid())
    }
}

/// Legacy piece commitment representation: the unsealed-commitment CID plus
/// the padded piece size. The CID alone does not carry the size, which is why
/// the pair is the unit of conversion.
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceInfo {
    /// Legacy piece commitment CID.
    pub cid: Cid,
    /// Piece size with padding.
    pub size: PaddedPieceSize,
}
