//! Bump-pointer region allocator for word-record byte storage.
//!
//! Mirrors the teacher's `ShmBlock` (`shm.rs`): a raw `mmap` call wrapped in a small owned type
//! that `munmap`s on drop. Here the mapping is anonymous and private rather than file-backed and
//! shared, and instead of one long-lived mapping we keep a growable list of fixed-size regions so
//! allocation never has to move already-handed-out bytes.

use log::warn;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use std::{ffi::c_void, io, ptr, slice};

/// Size of each region acquired from the OS, in bytes.
const REGION_SIZE: usize = 2 * 1024 * 1024;

/// Round `n` up to the next multiple of 8.
fn round_up_8(n: usize) -> usize {
	(n + 7) & !7
}

struct Region {
	ptr: *mut u8,
	cap: usize,
	used: usize,
}

impl Region {
	fn new(cap: usize) -> io::Result<Self> {
		// Safety: addr NULL lets the kernel choose the mapping address; MAP_ANONYMOUS means fd/offset
		// are ignored. The mapping is never read before being written by `alloc_bytes`, and the kernel
		// zero-fills anonymous pages, so uninitialized reads are impossible.
		let ptr = unsafe {
			mmap(ptr::null_mut(), cap, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE, MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS, -1, 0)
		}
		.map_err(|errno| io::Error::new(io::ErrorKind::OutOfMemory, format!("mmap({cap} bytes) failed: {errno}")))?;
		Ok(Self { ptr: ptr.cast(), cap, used: 0 })
	}

	fn remaining(&self) -> usize {
		self.cap - self.used
	}

	/// Copy `data` into this region at the current bump offset and advance it. Caller must have
	/// already checked `remaining() >= round_up_8(data.len())`.
	fn bump_copy(&mut self, data: &[u8]) -> *const u8 {
		let dst = unsafe { self.ptr.add(self.used) };
		// Safety: `dst` points `data.len()` bytes into a region of at least `self.cap` bytes, and the
		// caller has already verified `self.used + data.len() <= self.cap`.
		unsafe { ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
		self.used += round_up_8(data.len());
		dst
	}
}

impl Drop for Region {
	fn drop(&mut self) {
		// Safety: `self.ptr`/`self.cap` are exactly the address/length returned by the `mmap` call that
		// created this region, and no other reference derives from it outside `ArenaBytes` handles that
		// only outlive the owning `Arena` by convention (see `ArenaBytes::as_slice`).
		if let Err(err) = unsafe { munmap(self.ptr.cast::<c_void>(), self.cap) } {
			warn!("munmap({:p}, {}) failed: {err}", self.ptr, self.cap);
		}
	}
}

/// A never-freed byte slice handed out by an [`Arena`].
///
/// Valid only as long as the originating `Arena` has not been dropped. In this crate `ArenaBytes`
/// values are only ever stored back inside the same table that owns the `Arena`, so the two are
/// always dropped together.
#[derive(Clone, Copy)]
pub struct ArenaBytes {
	ptr: *const u8,
	len: usize,
}

impl ArenaBytes {
	pub fn as_slice(&self) -> &[u8] {
		// Safety: see the type's doc comment.
		unsafe { slice::from_raw_parts(self.ptr, self.len) }
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}
}

/// Bump allocator: acquires 2 MiB anonymous regions from the OS and never frees individual
/// allocations. Used by the worker's word table, which lives for the process's whole lifetime.
pub struct Arena {
	regions: Vec<Region>,
	bytes_allocated: usize,
}

impl Arena {
	pub fn new() -> Self {
		Self { regions: Vec::new(), bytes_allocated: 0 }
	}

	/// Total bytes handed out so far (rounded up to the 8-byte bump granularity).
	pub fn bytes_allocated(&self) -> usize {
		self.bytes_allocated
	}

	/// Copy `data` into the arena and return a stable handle to it.
	pub fn alloc_bytes(&mut self, data: &[u8]) -> io::Result<ArenaBytes> {
		let needed = round_up_8(data.len());
		let fits_last = self.regions.last().is_some_and(|r| r.remaining() >= needed);
		if !fits_last {
			let region_size = REGION_SIZE.max(needed);
			self.regions.push(Region::new(region_size)?);
		}
		let region = self.regions.last_mut().expect("just ensured a region exists");
		let ptr = region.bump_copy(data);
		self.bytes_allocated += needed;
		Ok(ArenaBytes { ptr, len: data.len() })
	}
}

impl Default for Arena {
	fn default() -> Self {
		Self::new()
	}
}
