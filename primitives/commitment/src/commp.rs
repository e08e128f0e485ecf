//! Streaming piece commitment calculator.
//!
//! The content is expanded with Fr32 padding (two zero bits after every 254
//! bits), zero-padded up to the next power-of-two padded size and hashed into
//! a binary merkle tree of 32 byte nodes with truncated SHA2-256. The
//! calculator keeps one subtree root per tree height, so memory stays
//! logarithmic in the piece size and the result does not depend on how the
//! input was chunked.

use sha2::{Digest, Sha256};

use crate::{piece::PaddedPieceSize, Commitment, NODE_SIZE};

/// The minimum amount of data a commitment can be computed over.
///
/// One Fr32 quad: below this the padded merkle construction is not
/// well-defined. Must match the provider's accepted range.
pub const MIN_PIECE_SIZE: u64 = 127;

/// Bytes of content per Fr32 quad.
const QUAD_UNPADDED: usize = 127;
/// Bytes per Fr32 quad after expansion, four merkle nodes.
const QUAD_PADDED: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("piece must be at least {MIN_PIECE_SIZE} bytes, got {length}")]
pub struct SizeError {
    /// Length of the rejected input in bytes.
    pub length: u64,
}

/// Calculate the piece commitment over a full byte slice.
///
/// Equivalent to feeding the same bytes through [`CommitmentHasher`] in
/// chunks of any size.
pub fn calculate(data: &[u8]) -> Result<Commitment, SizeError> {
    let mut hasher = CommitmentHasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Incremental piece commitment calculator.
///
/// Chunk boundaries passed to [`CommitmentHasher::update`] do not affect the
/// result. The hasher is not restartable: [`CommitmentHasher::finalize`]
/// consumes it, and the commitment does not exist before the input sequence
/// ends.
#[derive(Debug, Clone)]
pub struct CommitmentHasher {
    /// Partially filled Fr32 quad.
    quad: [u8; QUAD_UNPADDED],
    quad_len: usize,
    /// Total content bytes consumed so far.
    consumed: u64,
    /// Merkle leaves produced so far, always a multiple of four.
    leaves: u64,
    /// Pending subtree roots as `(height, root)`, strictly decreasing in
    /// height from the bottom of the stack.
    stack: Vec<(u8, [u8; NODE_SIZE])>,
}

impl CommitmentHasher {
    pub fn new() -> Self {
        Self {
            quad: [0u8; QUAD_UNPADDED],
            quad_len: 0,
            consumed: 0,
            leaves: 0,
            stack: Vec::new(),
        }
    }

    /// Total content bytes consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Feed the next chunk of content. Chunks may have arbitrary, non-fixed
    /// boundaries.
    pub fn update(&mut self, mut data: &[u8]) {
        self.consumed += data.len() as u64;

        while !data.is_empty() {
            let take = (QUAD_UNPADDED - self.quad_len).min(data.len());
            self.quad[self.quad_len..self.quad_len + take].copy_from_slice(&data[..take]);
            self.quad_len += take;
            data = &data[take..];

            if self.quad_len == QUAD_UNPADDED {
                self.flush_quad();
            }
        }
    }

    /// Finish the input sequence and return the commitment.
    pub fn finalize(mut self) -> Result<Commitment, SizeError> {
        if self.consumed < MIN_PIECE_SIZE {
            return Err(SizeError {
                length: self.consumed,
            });
        }

        let padded_size = PaddedPieceSize::from_arbitrary_size(self.consumed);

        // Zero-fill the trailing partial quad.
        if self.quad_len > 0 {
            self.quad[self.quad_len..].fill(0);
            self.quad_len = QUAD_UNPADDED;
            self.flush_quad();
        }

        // Fill the rest of the leaf layer with zero subtrees, largest
        // aligned subtree first.
        let target_leaves = *padded_size / NODE_SIZE as u64;
        let zero_roots = zero_subtree_roots(target_leaves.trailing_zeros() as u8);
        while self.leaves < target_leaves {
            let aligned = self.leaves.trailing_zeros();
            let remaining = 63 - (target_leaves - self.leaves).leading_zeros();
            let height = aligned.min(remaining) as u8;
            self.push_node(height, zero_roots[height as usize]);
            self.leaves += 1 << height;
        }

        let (height, root) = self
            .stack
            .pop()
            .expect("at least one quad was flushed for a valid piece size");
        debug_assert!(self.stack.is_empty());
        debug_assert_eq!((NODE_SIZE as u64) << height, *padded_size);

        Ok(Commitment::new(root, height)
            .expect("height is bounded by the maximum supported piece size"))
    }

    /// Expand the filled quad to four merkle nodes and push them.
    fn flush_quad(&mut self) {
        debug_assert_eq!(self.quad_len, QUAD_UNPADDED);
        let expanded = fr32_expand_quad(&self.quad);
        for node in expanded.chunks_exact(NODE_SIZE) {
            let mut leaf = [0u8; NODE_SIZE];
            leaf.copy_from_slice(node);
            self.push_node(0, leaf);
        }
        self.leaves += QUAD_PADDED as u64 / NODE_SIZE as u64;
        self.quad_len = 0;
    }

    /// Push a subtree root, merging equal-height neighbours as they appear.
    fn push_node(&mut self, height: u8, node: [u8; NODE_SIZE]) {
        let mut height = height;
        let mut node = node;
        while let Some(&(top_height, top)) = self.stack.last() {
            if top_height != height {
                break;
            }
            self.stack.pop();
            node = truncated_hash(&top, &node);
            height += 1;
        }
        self.stack.push((height, node));
    }
}

impl Default for CommitmentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA2-256 over both nodes with the two most significant bits of the last
/// byte zeroed, so the digest stays a valid field element.
fn truncated_hash(left: &[u8; NODE_SIZE], right: &[u8; NODE_SIZE]) -> [u8; NODE_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut node: [u8; NODE_SIZE] = hasher.finalize().into();
    node[NODE_SIZE - 1] &= 0b0011_1111;
    node
}

/// Roots of all-zero subtrees for heights `0..=max_height`. The Fr32
/// expansion of zero bytes is zero bytes, so the height zero entry is the
/// zero node.
fn zero_subtree_roots(max_height: u8) -> Vec<[u8; NODE_SIZE]> {
    let mut roots = Vec::with_capacity(max_height as usize + 1);
    roots.push([0u8; NODE_SIZE]);
    for height in 1..=max_height as usize {
        let below = roots[height - 1];
        roots.push(truncated_hash(&below, &below));
    }
    roots
}

/// Expand 127 content bytes to 128 bytes by inserting two zero bits after
/// every 254 bits, in little-endian bit order.
fn fr32_expand_quad(quad: &[u8; QUAD_UNPADDED]) -> [u8; QUAD_PADDED] {
    let mut out = [0u8; QUAD_PADDED];

    // First field element: bits 0..254.
    out[..31].copy_from_slice(&quad[..31]);
    out[31] = quad[31] & 0x3f;

    // Second: bits 254..508, starting at bit 6 of byte 31.
    for j in 0..31 {
        out[32 + j] = (quad[31 + j] >> 6) | (quad[32 + j] << 2);
    }
    out[63] = ((quad[62] >> 6) | (quad[63] << 2)) & 0x3f;

    // Third: bits 508..762, starting at bit 4 of byte 63.
    for j in 0..31 {
        out[64 + j] = (quad[63 + j] >> 4) | (quad[64 + j] << 4);
    }
    out[95] = ((quad[94] >> 4) | (quad[95] << 4)) & 0x3f;

    // Fourth: bits 762..1016, starting at bit 2 of byte 95. The input runs
    // out exactly at the last six bits.
    for j in 0..30 {
        out[96 + j] = (quad[95 + j] >> 2) | (quad[96 + j] << 6);
    }
    out[126] = quad[125] >> 2 | (quad[126] << 6);
    out[127] = (quad[126] >> 2) & 0x3f;

    out
}
