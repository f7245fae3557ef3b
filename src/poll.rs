//! A small `poll(2)`-based multiplexer, keyed by a stable logical id rather than array position.
//!
//! Generalised from the teacher's `Epoll` (`epoll.rs`) — same "one wrapper object owns the
//! multiplexing fd, `register`/`wait` are the whole API" shape — but retargeted from `epoll(7)` to
//! `poll(2)`, since this protocol's event loop (§4.5) is specified directly in terms of `poll(-1)`
//! and the `POLLIN`/`POLLOUT`/`POLLERR`/`POLLHUP` flags rather than edge-triggered epoll semantics.

use log::trace;
use nix::poll::{poll, PollFd, PollFlags};
use std::{
	io,
	os::unix::io::{AsRawFd, RawFd},
};

pub type Interest = PollFlags;
pub const POLLIN: Interest = PollFlags::POLLIN;
pub const POLLOUT: Interest = PollFlags::POLLOUT;
pub const POLLERR: Interest = PollFlags::POLLERR;
pub const POLLHUP: Interest = PollFlags::POLLHUP;

/// A `poll(2)` set keyed by caller-assigned `u64` ids (the teacher plays the same trick with
/// epoll's `EpollEvent::data()`). Lets the driver and worker event loops refer to "the socket for
/// worker 3" without tracking its position in the underlying array.
#[derive(Default)]
pub struct Poller {
	fds: Vec<PollFd>,
	keys: Vec<u64>,
}

impl Poller {
	pub fn new() -> Self {
		Self { fds: Vec::new(), keys: Vec::new() }
	}

	pub fn is_empty(&self) -> bool {
		self.fds.is_empty()
	}

	pub fn len(&self) -> usize {
		self.fds.len()
	}

	/// Register `fd` under `key` with the given interest. The caller retains ownership of `fd` and
	/// must keep it open until `deregister` is called.
	pub fn register(&mut self, fd: RawFd, interest: Interest, key: u64) {
		trace!("poller: registering fd {fd} under key {key} with interest {interest:?}");
		self.fds.push(PollFd::new(fd, interest));
		self.keys.push(key);
	}

	/// Update the interest flags for an existing registration.
	pub fn set_interest(&mut self, key: u64, interest: Interest) {
		if let Some(i) = self.keys.iter().position(|&k| k == key) {
			let fd = self.fds[i].as_raw_fd();
			self.fds[i] = PollFd::new(fd, interest);
		}
	}

	/// Remove a registration. No-op if `key` isn't registered.
	pub fn deregister(&mut self, key: u64) {
		if let Some(i) = self.keys.iter().position(|&k| k == key) {
			self.fds.swap_remove(i);
			self.keys.swap_remove(i);
		}
	}

	/// Block until at least one registered fd is ready (or `timeout_ms` elapses; `None` blocks
	/// forever, matching the spec's `poll(-1)`). Returns `(key, revents)` pairs for every fd with
	/// nonempty revents.
	pub fn wait(&mut self, timeout_ms: Option<i32>) -> io::Result<Vec<(u64, PollFlags)>> {
		let timeout = timeout_ms.unwrap_or(-1);
		trace!("> poll(nfds={}, timeout={timeout})", self.fds.len());
		let n = poll(&mut self.fds, timeout).map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
		trace!("< poll returned {n}");
		let mut ready = Vec::with_capacity(n as usize);
		for (fd, &key) in self.fds.iter().zip(self.keys.iter()) {
			if let Some(revents) = fd.revents() {
				if !revents.is_empty() {
					ready.push((key, revents));
				}
			}
		}
		Ok(ready)
	}
}
