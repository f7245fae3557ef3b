//! Driver command-line surface (spec §6).

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "driver")]
pub struct Args {
	/// Input file to partition, followed by `<ip> <outport> <inport>` triples, one per worker.
	/// Absent entirely when `--offline` is used instead.
	pub file_and_workers: Vec<String>,

	/// Read pre-recorded worker outputs from these files instead of dialing out. Each file takes
	/// the place of one worker's receive stream; no sending happens in this mode.
	#[arg(long, num_args = 1.., conflicts_with = "prepopulate")]
	pub offline: Vec<String>,

	/// Send all input to all workers first, then switch to receiving. Workers must also be
	/// started with `--prepopulate`.
	#[arg(long)]
	pub prepopulate: bool,
}

/// One worker's connection coordinates, parsed out of `file_and_workers`.
pub struct WorkerTarget {
	pub ip: String,
	pub outport: u16,
	pub inport: u16,
}

impl Args {
	/// Split `file_and_workers` into the input file path and the per-worker `(ip, outport,
	/// inport)` triples. Only meaningful when `--offline` wasn't given.
	pub fn parse_targets(&self) -> std::io::Result<(String, Vec<WorkerTarget>)> {
		let mut iter = self.file_and_workers.iter();
		let file = iter.next().cloned().ok_or_else(|| invalid("missing <file>"))?;
		let rest: Vec<&String> = iter.collect();
		if rest.len() % 3 != 0 {
			return Err(invalid("worker arguments must come in <ip> <outport> <inport> triples"));
		}
		let mut targets = Vec::with_capacity(rest.len() / 3);
		for triple in rest.chunks_exact(3) {
			let ip = triple[0].clone();
			let outport: u16 = triple[1].parse().map_err(|_| invalid("outport must be a u16"))?;
			let inport: u16 = triple[2].parse().map_err(|_| invalid("inport must be a u16"))?;
			targets.push(WorkerTarget { ip, outport, inport });
		}
		if targets.is_empty() {
			return Err(invalid("at least one worker must be specified"));
		}
		Ok((file, targets))
	}
}

fn invalid(msg: &str) -> std::io::Error {
	std::io::Error::new(std::io::ErrorKind::InvalidInput, msg)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_file_and_single_worker() {
		let args = Args { file_and_workers: vec!["input.txt".into(), "127.0.0.1".into(), "9000".into(), "9001".into()], offline: Vec::new(), prepopulate: false };
		let (file, targets) = args.parse_targets().unwrap();
		assert_eq!(file, "input.txt");
		assert_eq!(targets.len(), 1);
		assert_eq!(targets[0].ip, "127.0.0.1");
		assert_eq!(targets[0].outport, 9000);
		assert_eq!(targets[0].inport, 9001);
	}

	#[test]
	fn rejects_incomplete_triple() {
		let args = Args { file_and_workers: vec!["input.txt".into(), "127.0.0.1".into(), "9000".into()], offline: Vec::new(), prepopulate: false };
		assert!(args.parse_targets().is_err());
	}
}
