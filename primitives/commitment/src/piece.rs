use core::ops::{Add, AddAssign, Deref};

use crate::NODE_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PieceSizeError {
    #[error("minimum unpadded piece size is 127 bytes")]
    UnpaddedTooSmall,
    #[error("unpadded piece size must be a power of 2 multiple of 127")]
    NotQuadMultiple,
    #[error("minimum padded piece size is 128 bytes")]
    PaddedTooSmall,
    #[error("padded piece size must be a power of 2")]
    NotPowerOfTwo,
    #[error("padded piece size must be a multiple of the node size")]
    NotAMultipleOfNodeSize,
}

/// Size of a piece in bytes. Unpadded piece size should be power of two
/// multiple of 127.
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[derive(PartialEq, Debug, Eq, Clone, Copy, PartialOrd, Ord)]
pub struct UnpaddedPieceSize(u64);

impl UnpaddedPieceSize {
    /// The minimum piece size.
    pub const MIN: UnpaddedPieceSize = UnpaddedPieceSize(127);

    /// Initialize new unpadded piece size. Error is returned if the size is
    /// invalid.
    pub fn new(size: u64) -> Result<Self, PieceSizeError> {
        if size < 127 {
            return Err(PieceSizeError::UnpaddedTooSmall);
        }

        // is 127 * 2^n
        if size >> size.trailing_zeros() != 127 {
            return Err(PieceSizeError::NotQuadMultiple);
        }

        Ok(Self(size))
    }

    /// Converts unpadded piece size into padded piece size.
    pub fn padded(self) -> PaddedPieceSize {
        let padded_bytes = self.0 + (self.0 / 127);
        PaddedPieceSize(padded_bytes)
    }
}

impl core::fmt::Display for UnpaddedPieceSize {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for UnpaddedPieceSize {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Add for UnpaddedPieceSize {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        UnpaddedPieceSize(self.0 + other.0)
    }
}

/// Size of a piece in bytes with padding. The size is always a power of two
/// number.
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[derive(PartialEq, Debug, Eq, Clone, Copy, PartialOrd, Ord)]
pub struct PaddedPieceSize(u64);

impl PaddedPieceSize {
    /// The minimum piece size.
    pub const MIN: PaddedPieceSize = PaddedPieceSize(128);

    /// Initialize new padded piece size. Error is returned if the size is
    /// invalid.
    pub fn new(size: u64) -> Result<Self, PieceSizeError> {
        if size < 128 {
            return Err(PieceSizeError::PaddedTooSmall);
        }

        if size.count_ones() != 1 {
            return Err(PieceSizeError::NotPowerOfTwo);
        }

        if size % NODE_SIZE as u64 != 0 {
            return Err(PieceSizeError::NotAMultipleOfNodeSize);
        }

        Ok(Self(size))
    }

    /// Converts padded piece size into an unpadded piece size.
    pub fn unpadded(self) -> UnpaddedPieceSize {
        let unpadded_bytes = self.0 - (self.0 / 128);
        UnpaddedPieceSize(unpadded_bytes)
    }

    /// The function accepts arbitrary size and transforms it to the
    /// PaddedPieceSize:
    ///
    /// 1. We first add as many bytes as we get when we add "0" byte after each
    ///    127 bytes. That is because the piece content is expanded with
    ///    "Fr32 padding" before hashing.
    /// 2. We "round" the padded size to the first power of two number. That is
    ///    needed because a binary merkle tree is used for the commitment
    ///    computation.
    pub fn from_arbitrary_size(size: u64) -> Self {
        let padded_bytes = size + (size / 127);
        let padded_bytes = padded_bytes.next_power_of_two().max(*Self::MIN);
        Self::new(padded_bytes).expect("the padded piece size is correct")
    }
}

impl core::fmt::Display for PaddedPieceSize {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for PaddedPieceSize {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Add for PaddedPieceSize {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        PaddedPieceSize(self.0 + other.0)
    }
}

impl AddAssign for PaddedPieceSize {
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}
