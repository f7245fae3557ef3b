//! Driver receive side (component G): per-worker parsing of the wire stream defined in
//! `wire.rs`, plus the slot-watermark bookkeeping (spec §4.3) that the heap manager (`driver::heap`)
//! reads to decide what is safe to flush.

use crate::{
	hashfn::{slot_of, word_hash, SLOT_COUNT},
	ring::RingBuffer,
	transport::ReadSource,
	wire,
};
use log::trace;
use std::io::{self, ErrorKind, Read};

const RING_CAPACITY: usize = 1024 * 1024;

/// A worker closed its socket mid-frame: fatal per spec §7, not a silent end-of-stream.
fn truncated(what: &str) -> io::Error {
	io::Error::new(io::ErrorKind::InvalidData, format!("worker stream closed mid-{what} frame"))
}

#[derive(Debug)]
pub enum RecvEvent {
	Prefix(Vec<u8>),
	Suffix(Vec<u8>),
	Entry { slot: usize, count: u32, word: Vec<u8> },
	Eof,
}

enum Stage {
	AwaitPrefix,
	AwaitSuffix,
	Entries,
	Done,
}

/// One worker's receive-side state: its socket (or, in `--offline` mode, its dump file), buffer,
/// and how far its wire stream has been parsed.
pub struct RecvSlot {
	source: Box<dyn ReadSource>,
	ring: RingBuffer,
	stage: Stage,
	last_seen_slot: Option<usize>,
	source_eof: bool,
}

impl RecvSlot {
	pub fn new(source: Box<dyn ReadSource>) -> Self {
		Self { source, ring: RingBuffer::new(RING_CAPACITY), stage: Stage::AwaitPrefix, last_seen_slot: None, source_eof: false }
	}

	pub fn fd(&self) -> i32 {
		use std::os::unix::io::AsRawFd;
		self.source.as_raw_fd()
	}

	pub fn is_done(&self) -> bool {
		matches!(self.stage, Stage::Done)
	}

	/// Pull as many bytes as are currently available, then decode every complete frame they
	/// contain. Returns the events produced this call, in wire order.
	pub fn tick(&mut self) -> io::Result<Vec<RecvEvent>> {
		self.fill()?;
		let mut events = Vec::new();
		let mut scratch = Vec::new();
		loop {
			self.ring.peek_all(&mut scratch);
			match self.stage {
				Stage::Done => break,
				Stage::AwaitPrefix => match wire::decode_prefixed(&scratch) {
					Some((consumed, bytes)) => {
						let prefix = bytes.to_vec();
						self.ring.consume(consumed);
						self.stage = Stage::AwaitSuffix;
						events.push(RecvEvent::Prefix(prefix));
					},
					None => {
						if self.source_eof {
							return Err(truncated("prefix"));
						}
						break;
					},
				},
				Stage::AwaitSuffix => match wire::decode_prefixed(&scratch) {
					Some((consumed, bytes)) => {
						let suffix = bytes.to_vec();
						self.ring.consume(consumed);
						self.stage = Stage::Entries;
						events.push(RecvEvent::Suffix(suffix));
					},
					None => {
						if self.source_eof {
							return Err(truncated("suffix"));
						}
						break;
					},
				},
				Stage::Entries => match wire::decode_entry(&scratch) {
					Some((consumed, count, word)) => {
						let hash = word_hash(word);
						let slot = slot_of(hash);
						if let Some(last) = self.last_seen_slot {
							if slot < last {
								return Err(io::Error::new(
									io::ErrorKind::InvalidData,
									format!("worker reported slot {slot} after {last}: entries must be non-decreasing"),
								));
							}
						}
						self.last_seen_slot = Some(slot);
						let word = word.to_vec();
						self.ring.consume(consumed);
						events.push(RecvEvent::Entry { slot, count, word });
					},
					None => {
						if self.source_eof {
							if self.ring.is_empty() {
								self.stage = Stage::Done;
								events.push(RecvEvent::Eof);
							} else {
								return Err(truncated("entry"));
							}
						}
						break;
					},
				},
			}
		}
		Ok(events)
	}

	/// `finished_hash_entries` per spec §4.3/§9: the slot index below which this worker is known
	/// to have no further contributions. `None` until a watermark can be established at all.
	pub fn finished_hash_entries(&self) -> Option<usize> {
		if self.is_done() {
			return Some(SLOT_COUNT - 1);
		}
		self.last_seen_slot.map(|s| s.saturating_sub(1))
	}

	fn fill(&mut self) -> io::Result<()> {
		if self.source_eof || self.ring.free() == 0 {
			return Ok(());
		}
		let source = &mut self.source;
		match self.ring.fill_from(|buf| {
			trace!("> read(fd={}, buf=[len={}])", {
				use std::os::unix::io::AsRawFd;
				source.as_raw_fd()
			}, buf.len());
			source.read(buf)
		}) {
			Ok(0) => self.source_eof = true,
			Ok(_) => (),
			Err(err) if err.kind() == ErrorKind::WouldBlock => (),
			Err(err) => return Err(err),
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;
	use std::os::unix::io::AsRawFd;

	struct FakeSource(Cursor<Vec<u8>>);
	impl Read for FakeSource {
		fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
			self.0.read(buf)
		}
	}
	impl AsRawFd for FakeSource {
		fn as_raw_fd(&self) -> i32 {
			0
		}
	}

	fn encode_stream(prefix: &[u8], suffix: &[u8], entries: &[(u32, &[u8])]) -> Vec<u8> {
		let mut out = Vec::new();
		wire::encode_prefixed(&mut out, prefix);
		wire::encode_prefixed(&mut out, suffix);
		for (count, word) in entries {
			wire::encode_entry(&mut out, *count, word);
		}
		out
	}

	#[test]
	fn parses_prefix_suffix_and_entries_then_eof() {
		let bytes = encode_stream(b"hello", b"hello", &[(1, b"world")]);
		let mut slot = RecvSlot::new(Box::new(FakeSource(Cursor::new(bytes))));
		let mut events = Vec::new();
		while !slot.is_done() {
			events.extend(slot.tick().unwrap());
		}
		assert!(matches!(&events[0], RecvEvent::Prefix(p) if p == b"hello"));
		assert!(matches!(&events[1], RecvEvent::Suffix(s) if s == b"hello"));
		assert!(matches!(&events[2], RecvEvent::Entry { count: 1, word, .. } if word == b"world"));
		assert!(matches!(events.last().unwrap(), RecvEvent::Eof));
	}

	#[test]
	fn empty_stream_yields_empty_prefix_and_suffix_then_eof() {
		let bytes = encode_stream(b"", b"", &[]);
		let mut slot = RecvSlot::new(Box::new(FakeSource(Cursor::new(bytes))));
		let mut events = Vec::new();
		while !slot.is_done() {
			events.extend(slot.tick().unwrap());
		}
		assert!(matches!(&events[0], RecvEvent::Prefix(p) if p.is_empty()));
		assert!(matches!(&events[1], RecvEvent::Suffix(s) if s.is_empty()));
		assert!(matches!(events.last().unwrap(), RecvEvent::Eof));
	}

	#[test]
	fn out_of_order_slot_is_a_protocol_violation() {
		// Two words whose hashes happen to land in descending slot order are vanishingly rare to
		// pick by hand, so exercise the check directly against known hashes instead.
		let a = word_hash(b"aaaaaaaaaaaaaaaaaaaaaaaa");
		let b = word_hash(b"b");
		let (first, second) = if slot_of(a) < slot_of(b) {
			(b"b".as_slice(), b"aaaaaaaaaaaaaaaaaaaaaaaa".as_slice())
		} else {
			(b"aaaaaaaaaaaaaaaaaaaaaaaa".as_slice(), b"b".as_slice())
		};
		// `first` always lands in the higher slot; sending it before `second` must fail.
		let bytes = encode_stream(b"", b"", &[(1, first), (1, second)]);
		let mut slot = RecvSlot::new(Box::new(FakeSource(Cursor::new(bytes))));
		let mut err = None;
		while !slot.is_done() {
			match slot.tick() {
				Ok(_) => (),
				Err(e) => {
					err = Some(e);
					break;
				},
			}
		}
		assert!(err.is_some());
		assert_eq!(err.unwrap().kind(), io::ErrorKind::InvalidData);
	}

	#[test]
	fn truncated_entry_frame_at_eof_is_fatal_not_a_hang() {
		let mut bytes = encode_stream(b"", b"", &[(1, b"hello")]);
		bytes.truncate(bytes.len() - 2); // chop the entry frame mid-word
		let mut slot = RecvSlot::new(Box::new(FakeSource(Cursor::new(bytes))));
		let mut err = None;
		for _ in 0..8 {
			match slot.tick() {
				Ok(_) if slot.is_done() => break,
				Ok(_) => (),
				Err(e) => {
					err = Some(e);
					break;
				},
			}
		}
		let err = err.expect("truncated stream must error, not hang forever");
		assert_eq!(err.kind(), io::ErrorKind::InvalidData);
		assert!(!slot.is_done());
	}

	#[test]
	fn truncated_prefix_frame_at_eof_is_fatal() {
		let mut bytes = Vec::new();
		wire::encode_prefixed(&mut bytes, b"hello");
		bytes.truncate(bytes.len() - 2);
		let mut slot = RecvSlot::new(Box::new(FakeSource(Cursor::new(bytes))));
		let err = loop {
			match slot.tick() {
				Ok(_) => (),
				Err(e) => break e,
			}
		};
		assert_eq!(err.kind(), io::ErrorKind::InvalidData);
	}
}
