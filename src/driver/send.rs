//! Driver send side (component F): streams one worker's byte range from the input file to its
//! send socket, with no framing beyond "closing the socket marks end of chunk" (spec §4.4/§4.5).

use crate::transport::WriteSink;
use log::trace;
use std::{
	fs::File,
	io::{self, ErrorKind, Read, Seek, SeekFrom, Write},
	os::unix::io::AsRawFd,
};

const CHUNK: usize = 64 * 1024;

pub struct SendSlot {
	file: File,
	remaining: u64,
	sock: Option<Box<dyn WriteSink>>,
	buf: Vec<u8>,
}

impl SendSlot {
	pub fn new(mut file: File, range_start: u64, range_len: u64, sock: Box<dyn WriteSink>) -> io::Result<Self> {
		file.seek(SeekFrom::Start(range_start))?;
		Ok(Self { file, remaining: range_len, sock: Some(sock), buf: Vec::new() })
	}

	pub fn fd(&self) -> Option<i32> {
		self.sock.as_ref().map(|s| s.as_raw_fd())
	}

	pub fn is_done(&self) -> bool {
		self.sock.is_none()
	}

	/// Push more bytes toward the worker. The crate does not reach for `sendfile(2)`: buffered
	/// `read`+`write` keeps this generic over TCP and the offline-replay path (see DESIGN.md).
	pub fn tick(&mut self) -> io::Result<()> {
		let Some(sock) = self.sock.as_mut() else { return Ok(()) };

		if self.buf.is_empty() && self.remaining > 0 {
			let want = CHUNK.min(self.remaining as usize);
			self.buf.resize(want, 0);
			self.file.read_exact(&mut self.buf)?;
			self.remaining -= want as u64;
		}

		while !self.buf.is_empty() {
			trace!("> write(fd={}, buf=[len={}])", sock.as_raw_fd(), self.buf.len());
			match sock.write(&self.buf) {
				Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
				Ok(n) => {
					trace!("< write returned {n}");
					self.buf.drain(..n);
				},
				Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
				Err(err) => return Err(err),
			}
		}

		if self.remaining == 0 && self.buf.is_empty() {
			// Dropping the socket closes it, signalling end-of-chunk to the worker.
			self.sock = None;
		}
		Ok(())
	}
}
