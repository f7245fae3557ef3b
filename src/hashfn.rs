//! The word hash and slot count shared, unmodified, between the driver and every worker.
//!
//! This must be bit-identical across processes: it determines which hash-table slot a word lands
//! in, and the slot-watermark protocol (see `driver::recv`) depends on driver and worker agreeing
//! on exactly where that is.

/// Number of chain-head slots in every hash table, driver and worker alike. A prime, unlike the
/// simpler power-of-two slot count some variants of this protocol use elsewhere; see DESIGN.md for
/// why this implementation standardises on the prime count.
pub const SLOT_COUNT: usize = 262_143;

/// Hash a key: 64-bit little-endian lanes folded with a multiply-add, then any trailing bytes
/// folded in one at a time with a smaller multiplier.
pub fn word_hash(bytes: &[u8]) -> u64 {
	let mut h: u64 = 0;
	let mut chunks = bytes.chunks_exact(8);
	for chunk in &mut chunks {
		let lane = u64::from_le_bytes(chunk.try_into().expect("chunks_exact(8) yields 8-byte chunks"));
		h = lane.wrapping_add(h.wrapping_mul(524_287));
	}
	for &byte in chunks.remainder() {
		h = (byte as u64).wrapping_add(h.wrapping_mul(127));
	}
	h
}

/// Map a hash to its slot index.
pub fn slot_of(hash: u64) -> usize {
	(hash % SLOT_COUNT as u64) as usize
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_key_hashes_to_zero() {
		assert_eq!(word_hash(b""), 0);
	}

	#[test]
	fn hash_is_deterministic() {
		assert_eq!(word_hash(b"hello"), word_hash(b"hello"));
		assert_eq!(word_hash(b"distributed word count"), word_hash(b"distributed word count"));
	}

	#[test]
	fn distinct_keys_usually_hash_differently() {
		assert_ne!(word_hash(b"hello"), word_hash(b"world"));
		assert_ne!(word_hash(b"the"), word_hash(b"The"));
	}

	#[test]
	fn slot_of_is_in_range() {
		for key in [&b""[..], b"a", b"hello world", b"0123456789abcdefgh"] {
			assert!(slot_of(word_hash(key)) < SLOT_COUNT);
		}
	}

	#[test]
	fn lanes_and_trailing_bytes_both_contribute() {
		// An 8-byte key and a 9-byte key that extends it must hash differently: the extra trailing
		// byte has to perturb the accumulator.
		let eight = word_hash(b"abcdefgh");
		let nine = word_hash(b"abcdefghi");
		assert_ne!(eight, nine);
	}
}
