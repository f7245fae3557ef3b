//! Worker command-line surface (spec §6).

use clap::Parser;

/// Accept a chunk of a file over TCP, count words in it, and stream back the counts.
#[derive(Debug, Parser)]
#[command(name = "worker")]
pub struct Args {
	/// Port the driver dials to stream this worker its input chunk.
	pub inport: Option<u16>,
	/// Port the driver dials to receive this worker's table.
	pub outport: Option<u16>,

	/// Read input from stdin and write the table to stdout instead of using TCP.
	#[arg(long, conflicts_with_all = ["inport", "outport"])]
	pub stdin: bool,

	/// Drain the entire input into a temp file before computing, instead of tokenising the live
	/// stream. Decouples the receive and send phases to match a `--prepopulate` driver.
	#[arg(long)]
	pub prepopulate: bool,
}
