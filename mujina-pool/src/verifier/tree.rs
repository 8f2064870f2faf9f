//! Equihash solution check.
//!
//! A solution is `2^k` indices packed as big-endian `n/(k+1)+1` bit fields.
//! Each index selects an `n`-bit slice of a personalized BLAKE2b digest of
//! the header. Pairing the indices as a binary tree, every level must
//! collide on its next `n/(k+1)` bits, keep the subtree with the smaller
//! first index on the left, and share no index with its sibling. The XOR of
//! all leaves must be zero.

use blake2b_simd::{Params as Blake2bParams, State};
use thiserror::Error;

use super::EquihashParams;

/// Why a solution was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolutionError {
    #[error("unsupported Equihash parameters n={n} k={k}")]
    UnsupportedParams { n: u32, k: u32 },

    #[error("solution is {actual} bytes, expected {expected}")]
    Length { actual: usize, expected: usize },

    #[error("no collision at level {0}")]
    Collision(usize),

    #[error("subtrees out of order at level {0}")]
    OutOfOrder(usize),

    #[error("duplicate index at level {0}")]
    DuplicateIndex(usize),

    #[error("root hash is not zero")]
    NonZeroRoot,
}

/// Derived sizes for one (n, k) pair.
struct Shape {
    k: usize,
    hash_bytes: usize,
    indices_per_hash: u32,
    collision_bits: usize,
}

impl Shape {
    fn new(n: u32, k: u32) -> Result<Self, SolutionError> {
        let unsupported = SolutionError::UnsupportedParams { n, k };
        if n % 8 != 0 || n > 512 || k < 3 || k >= n || n % (k + 1) != 0 {
            return Err(unsupported);
        }

        // Index fields are read into a u32
        let collision_bits = (n / (k + 1)) as usize;
        if !(8..=24).contains(&collision_bits) {
            return Err(unsupported);
        }

        Ok(Self {
            k: k as usize,
            hash_bytes: n as usize / 8,
            indices_per_hash: 512 / n,
            collision_bits,
        })
    }

    fn solution_len(&self) -> usize {
        ((1 << self.k) * (self.collision_bits + 1)) / 8
    }

    fn digest_len(&self) -> usize {
        self.indices_per_hash as usize * self.hash_bytes
    }
}

/// BLAKE2b state over the header, personalized as `personalization ||
/// n (LE) || k (LE)`.
fn header_state(params: &EquihashParams, shape: &Shape, header: &[u8]) -> State {
    let mut personal = [0u8; 16];
    personal[..8].copy_from_slice(&params.personalization);
    personal[8..12].copy_from_slice(&params.n.to_le_bytes());
    personal[12..].copy_from_slice(&params.k.to_le_bytes());

    let mut state = Blake2bParams::new()
        .hash_length(shape.digest_len())
        .personal(&personal)
        .to_state();
    state.update(header);
    state
}

/// Split a big-endian bit string into `width`-bit values.
fn read_bits(bytes: &[u8], width: usize) -> Vec<u32> {
    let mask = (1u64 << width) - 1;
    let mut out = Vec::with_capacity(bytes.len() * 8 / width);
    let mut acc = 0u64;
    let mut acc_bits = 0;

    for &byte in bytes {
        acc = (acc << 8) | u64::from(byte);
        acc_bits += 8;
        if acc_bits >= width {
            acc_bits -= width;
            out.push(((acc >> acc_bits) & mask) as u32);
        }
    }
    out
}

/// A subtree: the XOR of its leaves' collision fields, and its indices in
/// tree order.
#[derive(Debug, Clone)]
struct Node {
    fields: Vec<u32>,
    indices: Vec<u32>,
}

impl Node {
    fn leaf(shape: &Shape, state: &State, index: u32) -> Self {
        let mut state = state.clone();
        state.update(&(index / shape.indices_per_hash).to_le_bytes());
        let digest = state.finalize();

        let start = (index % shape.indices_per_hash) as usize * shape.hash_bytes;
        let slice = &digest.as_bytes()[start..start + shape.hash_bytes];

        Self {
            fields: read_bits(slice, shape.collision_bits),
            indices: vec![index],
        }
    }

    fn shares_index(&self, other: &Node) -> bool {
        self.indices.iter().any(|i| other.indices.contains(i))
    }

    fn join(&self, right: &Node) -> Node {
        Node {
            fields: self.fields.iter().zip(&right.fields).map(|(a, b)| a ^ b).collect(),
            indices: self.indices.iter().chain(&right.indices).copied().collect(),
        }
    }

    fn merge(&self, right: &Node, level: usize) -> Result<Node, SolutionError> {
        if self.fields[level] != right.fields[level] {
            return Err(SolutionError::Collision(level));
        }
        if right.indices[0] < self.indices[0] {
            return Err(SolutionError::OutOfOrder(level));
        }
        if self.shares_index(right) {
            return Err(SolutionError::DuplicateIndex(level));
        }
        Ok(self.join(right))
    }
}

/// Check `solution` (no length preamble) against the full 140-byte `header`.
pub fn verify(params: &EquihashParams, header: &[u8], solution: &[u8]) -> Result<(), SolutionError> {
    let shape = Shape::new(params.n, params.k)?;
    if solution.len() != shape.solution_len() {
        return Err(SolutionError::Length {
            actual: solution.len(),
            expected: shape.solution_len(),
        });
    }

    let state = header_state(params, &shape, header);
    let mut nodes: Vec<Node> = read_bits(solution, shape.collision_bits + 1)
        .into_iter()
        .map(|index| Node::leaf(&shape, &state, index))
        .collect();

    for level in 0..shape.k {
        nodes = nodes
            .chunks(2)
            .map(|pair| pair[0].merge(&pair[1], level))
            .collect::<Result<_, _>>()?;
    }

    match nodes.as_slice() {
        [root] if root.fields[shape.k] == 0 => Ok(()),
        _ => Err(SolutionError::NonZeroRoot),
    }
}

/// Wagner's algorithm, exhaustive and quadratic per level. Only practical
/// for toy parameters.
#[cfg(test)]
pub(super) fn solve(params: &EquihashParams, header: &[u8]) -> Vec<Vec<u8>> {
    let shape = Shape::new(params.n, params.k).unwrap();
    let state = header_state(params, &shape, header);
    let width = shape.collision_bits + 1;

    let mut nodes: Vec<Node> = (0..1u32 << width)
        .map(|index| Node::leaf(&shape, &state, index))
        .collect();

    for level in 0..shape.k {
        let mut next = Vec::new();
        for (i, a) in nodes.iter().enumerate() {
            for b in &nodes[i + 1..] {
                if a.fields[level] != b.fields[level] || a.shares_index(b) {
                    continue;
                }
                let (left, right) = if a.indices[0] < b.indices[0] { (a, b) } else { (b, a) };
                next.push(left.join(right));
            }
        }
        nodes = next;
    }

    nodes
        .into_iter()
        .filter(|node| node.fields[shape.k] == 0)
        .map(|node| pack_indices(&node.indices, width))
        .collect()
}

#[cfg(test)]
fn pack_indices(indices: &[u32], width: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut acc = 0u64;
    let mut acc_bits = 0;
    for &index in indices {
        acc = (acc << width) | u64::from(index);
        acc_bits += width;
        while acc_bits >= 8 {
            acc_bits -= 8;
            out.push((acc >> acc_bits) as u8);
        }
    }
    out
}

#[cfg(test)]
pub(super) mod fixtures {
    use super::super::{EquihashParams, HEADER_SIZE};

    /// Equihash(32, 3): 9-byte solutions, solvable in a test.
    pub const TOY: EquihashParams = EquihashParams {
        n: 32,
        k: 3,
        solution_size: 9,
        personalization: *b"ZcashPoW",
    };

    /// First header (varying the nonce) with a solution under `params`.
    pub fn solved(params: &EquihashParams) -> ([u8; HEADER_SIZE], Vec<u8>) {
        let mut header = [0u8; HEADER_SIZE];
        for nonce in 0u32..256 {
            header[108..112].copy_from_slice(&nonce.to_le_bytes());
            if let Some(solution) = super::solve(params, &header).into_iter().next() {
                return (header, solution);
            }
        }
        panic!("no solution found");
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{TOY, solved};
    use super::*;
    use crate::verifier::{HEADER_INPUT_SIZE, ZERO_PERSONALIZATION};

    #[test]
    fn bit_fields_round_trip() {
        let indices = [0x1ff, 0, 0x0aa, 0x155, 1, 2, 3, 0x100];
        let packed = pack_indices(&indices, 9);
        assert_eq!(packed.len(), 9);
        assert_eq!(read_bits(&packed, 9), indices);
        assert_eq!(read_bits(&[0xab, 0xcd], 8), [0xab, 0xcd]);
    }

    #[test]
    fn solved_header_verifies() {
        let (header, solution) = solved(&TOY);
        assert_eq!(verify(&TOY, &header, &solution), Ok(()));

        // Agrees with the equihash crate
        let (input, nonce) = header.split_at(HEADER_INPUT_SIZE);
        assert!(::equihash::is_valid_solution(32, 3, input, nonce, &solution).is_ok());
    }

    #[test]
    fn personalization_selects_the_puzzle() {
        let zero = EquihashParams {
            personalization: ZERO_PERSONALIZATION,
            ..TOY
        };
        let (header, solution) = solved(&zero);
        assert_eq!(verify(&zero, &header, &solution), Ok(()));
        assert!(verify(&TOY, &header, &solution).is_err());

        let (input, nonce) = header.split_at(HEADER_INPUT_SIZE);
        assert!(::equihash::is_valid_solution(32, 3, input, nonce, &solution).is_err());
    }

    #[test]
    fn tree_rules_enforced() {
        let (header, solution) = solved(&TOY);
        let indices = read_bits(&solution, 9);

        // Halves swapped: every subtree still collides, the root is out of order
        let swapped: Vec<u32> = indices[4..].iter().chain(&indices[..4]).copied().collect();
        assert_eq!(
            verify(&TOY, &header, &pack_indices(&swapped, 9)),
            Err(SolutionError::OutOfOrder(2))
        );

        let repeated = vec![indices[0]; 8];
        assert_eq!(
            verify(&TOY, &header, &pack_indices(&repeated, 9)),
            Err(SolutionError::DuplicateIndex(0))
        );

        let mut other = header;
        other[0] ^= 1;
        assert!(verify(&TOY, &other, &solution).is_err());
    }

    #[test]
    fn rejects_bad_shapes() {
        let header = [0u8; 140];
        assert_eq!(
            verify(&TOY, &header, &[0u8; 8]),
            Err(SolutionError::Length {
                actual: 8,
                expected: 9
            })
        );

        let odd = EquihashParams { n: 30, ..TOY };
        assert_eq!(
            verify(&odd, &header, &[0u8; 9]),
            Err(SolutionError::UnsupportedParams { n: 30, k: 3 })
        );
    }
}
