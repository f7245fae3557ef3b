//! Heap manager (component H): decides, after every event-loop tick, whether to flush sealed
//! slots and whether to throttle workers that are running ahead of the pack (spec §4.6).

use crate::{driver_table::DriverTable, hashfn::SLOT_COUNT};

/// Above this live-heap size, a compaction pass runs.
pub const TARGET_MAX_HEAP: usize = 512 * 1024 * 1024;
/// If live heap is still above this after compaction, laggard-aware throttling kicks in.
pub const THROTTLE_HEAP: usize = 256 * 1024 * 1024;
/// How far ahead of the watermark a worker may race before its `POLLIN` is withdrawn.
const THROTTLE_SLOT_LEAD: usize = 100;

pub struct HeapManager {
	last_flushed_slot: Option<usize>,
}

/// What the caller (the driver's event loop) should do with each worker's poll interest as a
/// result of a compaction pass.
pub struct ThrottleDecision {
	pub throttle: Vec<usize>,
	pub unthrottle: Vec<usize>,
}

impl HeapManager {
	pub fn new() -> Self {
		Self { last_flushed_slot: None }
	}

	pub fn last_flushed_slot(&self) -> Option<usize> {
		self.last_flushed_slot
	}

	/// Run one compaction pass if `table.live_bytes()` warrants it. `headers_complete` is whether
	/// every worker has delivered both prefix and suffix (unsafe to compact otherwise — boundary
	/// words for a sealed slot might not have been inserted yet). `finished` is each worker's
	/// current `finished_hash_entries`, `None` meaning "not yet established".
	pub fn maybe_compact(&mut self, table: &mut DriverTable, headers_complete: bool, finished: &[Option<usize>], emit: impl FnMut(u64, &[u8])) -> ThrottleDecision {
		if table.live_bytes() <= TARGET_MAX_HEAP {
			return ThrottleDecision { throttle: Vec::new(), unthrottle: Vec::new() };
		}
		if !headers_complete {
			// Every worker that has already finished its header is throttled outright: there is
			// nothing safe to free yet, so there is no point letting it keep racing ahead.
			let throttle = finished.iter().enumerate().filter(|(_, f)| f.is_some()).map(|(i, _)| i).collect();
			return ThrottleDecision { throttle, unthrottle: Vec::new() };
		}

		let Some(w) = Self::watermark(finished) else {
			return ThrottleDecision { throttle: Vec::new(), unthrottle: Vec::new() };
		};
		let start = self.last_flushed_slot.map_or(0, |s| s + 1);
		if start <= w {
			table.flush_range(start..w + 1, emit);
			self.last_flushed_slot = Some(w);
		}

		if table.live_bytes() > THROTTLE_HEAP {
			let throttle = finished.iter().enumerate().filter(|(_, f)| f.map_or(false, |f| f >= w + THROTTLE_SLOT_LEAD)).map(|(i, _)| i).collect();
			let unthrottle = finished.iter().enumerate().filter(|(_, f)| f.map_or(false, |f| f < w + THROTTLE_SLOT_LEAD)).map(|(i, _)| i).collect();
			ThrottleDecision { throttle, unthrottle }
		} else {
			let unthrottle = (0..finished.len()).collect();
			ThrottleDecision { throttle: Vec::new(), unthrottle }
		}
	}

	fn watermark(finished: &[Option<usize>]) -> Option<usize> {
		finished.iter().copied().try_fold(usize::MAX, |acc, f| f.map(|f| acc.min(f)))
	}

	/// Flush everything remaining at shutdown: the tail `(last_flushed_slot, S)` first, then
	/// `[0, last_flushed_slot]` — the latter holds only the late boundary-spliced words that
	/// landed in an already-flushed slot (the "Boundary screw ups" trailer, spec §6/§9).
	pub fn drain_all(&mut self, table: &mut DriverTable, mut emit_main: impl FnMut(u64, &[u8]), mut emit_trailer: impl FnMut(u64, &[u8])) {
		let tail_start = self.last_flushed_slot.map_or(0, |s| s + 1);
		table.flush_range(tail_start..SLOT_COUNT, &mut emit_main);
		if let Some(last) = self.last_flushed_slot {
			table.flush_range(0..last + 1, &mut emit_trailer);
		}
	}
}

impl Default for HeapManager {
	fn default() -> Self {
		Self::new()
	}
}
