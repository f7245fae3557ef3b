//! A fixed-capacity byte ring buffer with monotonic producer/consumer cursors.
//!
//! Grounded on the teacher's cursor-based buffers (`socket_server/buffer.rs`'s `Wrapping<usize>`
//! `copyin_idx`/`copyout_idx` pair, `client/mod.rs`'s `Buffer`), generalised from those buffers'
//! fixed small capacities to an arbitrary byte capacity, and made genuinely circular: a write that
//! would cross the physical end of the backing array is split into two `copy_from_slice` calls
//! instead of triggering a compaction pass.

use std::num::Wrapping;

pub struct RingBuffer {
	buf: Box<[u8]>,
	/// Monotonically increasing byte index of the next byte to be read.
	read_idx: Wrapping<usize>,
	/// Monotonically increasing byte index of the next byte to be written.
	write_idx: Wrapping<usize>,
}

impl RingBuffer {
	pub fn new(capacity: usize) -> Self {
		assert!(capacity > 0, "ring buffer capacity must be nonzero");
		Self { buf: vec![0u8; capacity].into_boxed_slice(), read_idx: Wrapping(0), write_idx: Wrapping(0) }
	}

	fn cap(&self) -> usize {
		self.buf.len()
	}

	/// Bytes currently buffered and available to read.
	pub fn filled(&self) -> usize {
		(self.write_idx - self.read_idx).0
	}

	/// Free space currently available to write into.
	pub fn free(&self) -> usize {
		self.cap() - self.filled()
	}

	pub fn is_empty(&self) -> bool {
		self.filled() == 0
	}

	/// Copy `data` into the buffer. Panics if `data.len() > self.free()`.
	pub fn write(&mut self, data: &[u8]) {
		assert!(data.len() <= self.free(), "ring buffer overflow: {} bytes into {} free", data.len(), self.free());
		let cap = self.cap();
		let start = self.write_idx.0 % cap;
		let first_len = (cap - start).min(data.len());
		self.buf[start..start + first_len].copy_from_slice(&data[..first_len]);
		if first_len < data.len() {
			let rest = &data[first_len..];
			self.buf[..rest.len()].copy_from_slice(rest);
		}
		self.write_idx += data.len();
	}

	/// Copy up to `buf.len()` buffered bytes out without consuming them, returning how many were
	/// copied. Used to hand data to a non-blocking `write(2)`-style call that may take less than
	/// everything offered.
	pub fn peek(&self, buf: &mut [u8]) -> usize {
		let n = self.filled().min(buf.len());
		let cap = self.cap();
		let start = self.read_idx.0 % cap;
		let first_len = (cap - start).min(n);
		buf[..first_len].copy_from_slice(&self.buf[start..start + first_len]);
		if first_len < n {
			buf[first_len..n].copy_from_slice(&self.buf[..n - first_len]);
		}
		n
	}

	/// Mark `n` previously peeked bytes as consumed.
	pub fn consume(&mut self, n: usize) {
		assert!(n <= self.filled(), "consumed {n} bytes but only {} were filled", self.filled());
		self.read_idx += n;
	}

	/// Copy out and consume exactly `buf.len()` bytes. Panics if fewer are available; callers must
	/// check `filled()` first.
	pub fn read_exact(&mut self, buf: &mut [u8]) {
		let n = self.peek(buf);
		assert_eq!(n, buf.len(), "read_exact: not enough data buffered");
		self.consume(n);
	}

	/// Copy every currently-buffered byte into `out`, resizing it as needed, without consuming.
	/// Used by parsers that need a linear view of the buffered bytes regardless of the physical
	/// wrap point.
	pub fn peek_all(&self, out: &mut Vec<u8>) {
		out.resize(self.filled(), 0);
		self.peek(out);
	}

	/// Fill as much of the buffer's free space as possible from `source`, returning the number of
	/// bytes read this call (0 means `source` had nothing ready right now).
	pub fn fill_from(&mut self, mut source: impl FnMut(&mut [u8]) -> std::io::Result<usize>) -> std::io::Result<usize> {
		let cap = self.cap();
		let start = self.write_idx.0 % cap;
		let contiguous_free = (cap - start).min(self.free());
		if contiguous_free == 0 {
			return Ok(0);
		}
		let n = source(&mut self.buf[start..start + contiguous_free])?;
		self.write_idx += n;
		Ok(n)
	}
}
