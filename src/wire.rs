//! The worker-to-driver framing defined in spec §4.4: a length-prefixed `prefix` string, a
//! length-prefixed `suffix` string, then any number of `(count, word)` entries, all little-endian.
//!
//! There is deliberately no symmetric "decode" side for the driver-to-worker stream: that
//! direction carries raw file bytes with connection close as the only framing (see
//! `driver::send`).

/// Append a `u16`-length-prefixed string to `out`. Panics if `bytes.len()` overflows `u16`
/// (callers are expected to have already validated this against the 1 MiB buffer limit).
pub fn encode_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
	let len: u16 = bytes.len().try_into().expect("prefix/suffix string exceeds u16 length");
	out.extend_from_slice(&len.to_le_bytes());
	out.extend_from_slice(bytes);
}

/// Append a `(count: u32, len: u16, bytes)` table entry to `out`.
pub fn encode_entry(out: &mut Vec<u8>, count: u32, bytes: &[u8]) {
	let len: u16 = bytes.len().try_into().expect("word exceeds u16 length");
	out.extend_from_slice(&count.to_le_bytes());
	out.extend_from_slice(&len.to_le_bytes());
	out.extend_from_slice(bytes);
}

/// Try to decode one `u16`-length-prefixed string from the start of `buf`.
///
/// Returns `Some((consumed, bytes))` on success, `None` if `buf` doesn't yet hold a complete
/// frame. Fails with a description suitable for a protocol-violation abort if the declared length
/// would run past `buf`'s capacity-that-matters (callers compare against their buffer size).
pub fn decode_prefixed(buf: &[u8]) -> Option<(usize, &[u8])> {
	if buf.len() < 2 {
		return None;
	}
	let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
	if buf.len() < 2 + len {
		return None;
	}
	Some((2 + len, &buf[2..2 + len]))
}

/// Try to decode one `(count, word)` table entry from the start of `buf`.
pub fn decode_entry(buf: &[u8]) -> Option<(usize, u32, &[u8])> {
	if buf.len() < 6 {
		return None;
	}
	let count = u32::from_le_bytes(buf[0..4].try_into().unwrap());
	let len = u16::from_le_bytes([buf[4], buf[5]]) as usize;
	if buf.len() < 6 + len {
		return None;
	}
	Some((6 + len, count, &buf[6..6 + len]))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn prefixed_roundtrips() {
		let mut buf = Vec::new();
		encode_prefixed(&mut buf, b"hello");
		let (consumed, bytes) = decode_prefixed(&buf).unwrap();
		assert_eq!(consumed, buf.len());
		assert_eq!(bytes, b"hello");
	}

	#[test]
	fn empty_prefixed_roundtrips() {
		let mut buf = Vec::new();
		encode_prefixed(&mut buf, b"");
		let (consumed, bytes) = decode_prefixed(&buf).unwrap();
		assert_eq!(consumed, 2);
		assert_eq!(bytes, b"");
	}

	#[test]
	fn entry_roundtrips() {
		let mut buf = Vec::new();
		encode_entry(&mut buf, 42, b"world");
		let (consumed, count, bytes) = decode_entry(&buf).unwrap();
		assert_eq!(consumed, buf.len());
		assert_eq!(count, 42);
		assert_eq!(bytes, b"world");
	}

	#[test]
	fn truncated_frame_returns_none() {
		let mut buf = Vec::new();
		encode_entry(&mut buf, 1, b"partial");
		buf.truncate(buf.len() - 2);
		assert!(decode_entry(&buf).is_none());
	}

	#[test]
	fn multiple_frames_decode_in_sequence() {
		let mut buf = Vec::new();
		encode_entry(&mut buf, 1, b"aa");
		encode_entry(&mut buf, 2, b"bb");
		encode_entry(&mut buf, 3, b"ccc");
		let mut offset = 0;
		let mut seen = Vec::new();
		while let Some((consumed, count, bytes)) = decode_entry(&buf[offset..]) {
			seen.push((count, bytes.to_vec()));
			offset += consumed;
		}
		assert_eq!(offset, buf.len());
		assert_eq!(seen, vec![(1, b"aa".to_vec()), (2, b"bb".to_vec()), (3, b"ccc".to_vec())]);
	}
}
