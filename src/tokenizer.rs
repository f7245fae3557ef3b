//! The worker's streaming lexer (component D): turns a byte stream into prefix/suffix strings and
//! locally-counted interior words.
//!
//! The source drives this with `setjmp`/`longjmp` to unwind out of the scan loop on EOF; here EOF
//! is just another value flowing through an explicit `feed` call, propagated with the tagged
//! [`Emit`] return value instead of a nonlocal jump (see DESIGN.md).

use crate::{ring::RingBuffer, worker_table::ArenaTable};
use std::io;

/// A byte is a word byte iff it's `[0-9A-Za-z]`; everything else is a separator. ASCII letters are
/// lower-cased before being counted or compared.
fn is_word_byte(b: u8) -> bool {
	b.is_ascii_alphanumeric()
}

fn lower(bytes: &[u8]) -> Vec<u8> {
	bytes.iter().map(|b| b.to_ascii_lowercase()).collect()
}

#[derive(Debug, PartialEq, Eq)]
enum State {
	ReadingPrefix,
	ReadingWords,
	Draining,
}

/// What happened as a result of a [`Tokenizer::feed`] call.
pub enum Emit {
	/// No boundary string became available this call; the caller should read more input (or, if
	/// the source is already at EOF, call `feed` again with `input_eof: true`).
	Pending,
	/// The prefix string is now known and should be sent as the first wire message.
	Prefix(Vec<u8>),
	/// End of input reached: here is the suffix string. The caller should send it, then stream the
	/// table's contents (the tokenizer's job is done after this).
	Eof(Vec<u8>),
}

pub struct Tokenizer {
	state: State,
	/// Bytes of a word that started in an earlier `feed` call but didn't reach a separator (or
	/// EOF) yet.
	pending_word: Vec<u8>,
	/// Set only by the no-whitespace-in-the-whole-chunk edge case: the prefix and suffix are the
	/// same bytes, but `Emit` can only report one at a time, so the suffix report is deferred to
	/// the next call.
	pending_eof_emit: Option<Vec<u8>>,
	scratch: Vec<u8>,
}

impl Tokenizer {
	pub fn new() -> Self {
		Self { state: State::ReadingPrefix, pending_word: Vec::new(), pending_eof_emit: None, scratch: Vec::new() }
	}

	/// Consume as much of `ring`'s currently buffered bytes as forms complete words, inserting
	/// each into `table`. `input_eof` must be `true` once the underlying source has returned EOF
	/// and every byte it ever will produce is already in `ring`.
	pub fn feed(&mut self, ring: &mut RingBuffer, table: &mut ArenaTable, input_eof: bool) -> io::Result<Emit> {
		if let Some(suffix) = self.pending_eof_emit.take() {
			return Ok(Emit::Eof(suffix));
		}
		ring.peek_all(&mut self.scratch);
		match self.state {
			State::ReadingPrefix => self.feed_prefix(ring, input_eof),
			State::ReadingWords => self.feed_words(ring, table, input_eof),
			State::Draining => Ok(Emit::Pending),
		}
	}

	fn feed_prefix(&mut self, ring: &mut RingBuffer, input_eof: bool) -> io::Result<Emit> {
		let buffer_full = ring.free() == 0;
		match self.scratch.iter().position(|&b| !is_word_byte(b)) {
			Some(k) => {
				let prefix = lower(&self.scratch[..k]);
				ring.consume(k);
				self.state = State::ReadingWords;
				Ok(Emit::Prefix(prefix))
			},
			None if input_eof => {
				// No whitespace anywhere in this worker's whole chunk: the entire chunk is both
				// prefix and suffix (spec §3, §9). We still need to report it twice, so stash a
				// copy and let the next `feed` call (now in `Draining`) hand it back as the suffix.
				let whole = lower(&self.scratch);
				ring.consume(self.scratch.len());
				self.state = State::Draining;
				self.pending_eof_emit = Some(whole.clone());
				Ok(Emit::Prefix(whole))
			},
			None if buffer_full => {
				// A single "word" longer than the buffer: emit what we have as the prefix and keep
				// scanning the rest as ordinary word bytes (explicitly acceptable per spec §4.2).
				let prefix = lower(&self.scratch);
				ring.consume(self.scratch.len());
				self.state = State::ReadingWords;
				Ok(Emit::Prefix(prefix))
			},
			None => Ok(Emit::Pending),
		}
	}

	fn feed_words(&mut self, ring: &mut RingBuffer, table: &mut ArenaTable, input_eof: bool) -> io::Result<Emit> {
		let buffer_full_before_this_call = ring.free() == 0;
		let mut pos = 0;
		loop {
			// Skip separators.
			while pos < self.scratch.len() && !is_word_byte(self.scratch[pos]) {
				pos += 1;
			}
			let word_start = pos;
			while pos < self.scratch.len() && is_word_byte(self.scratch[pos]) {
				pos += 1;
			}
			if pos < self.scratch.len() {
				// Hit a separator after (possibly zero) word bytes: a complete word, unless it's
				// empty and there's no pending continuation, in which case we just skip it and
				// keep scanning the outer loop.
				if pos > word_start || !self.pending_word.is_empty() {
					let mut word = std::mem::take(&mut self.pending_word);
					word.extend_from_slice(&lower(&self.scratch[word_start..pos]));
					table.bump_word_counter(&word, 1)?;
				}
				continue;
			}
			// Ran off the end of currently buffered bytes without finding a separator.
			let tail = lower(&self.scratch[word_start..pos]);
			if input_eof {
				// EOF with a (possibly empty) trailing run of word bytes and nothing after it: that
				// run, plus anything already pending, is the suffix. It is *not* inserted into the
				// local table (the driver splices it across worker boundaries instead).
				let mut suffix = std::mem::take(&mut self.pending_word);
				suffix.extend_from_slice(&tail);
				ring.consume(pos);
				self.state = State::Draining;
				return Ok(Emit::Eof(suffix));
			}
			if buffer_full_before_this_call && !tail.is_empty() {
				// Oversized word: flush what we have as a standalone entry and keep going (same
				// quirk as the prefix case).
				let mut word = std::mem::take(&mut self.pending_word);
				word.extend_from_slice(&tail);
				table.bump_word_counter(&word, 1)?;
				ring.consume(pos);
				return Ok(Emit::Pending);
			}
			// Need more input before we can tell where this word ends.
			self.pending_word.extend_from_slice(&tail);
			ring.consume(pos);
			return Ok(Emit::Pending);
		}
	}
}

impl Default for Tokenizer {
	fn default() -> Self {
		Self::new()
	}
}
