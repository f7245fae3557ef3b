use clap::Parser;
use tallymux::{logger, worker};

fn main() {
	logger::init();
	let args = worker::cli::Args::parse();
	if let Err(err) = worker::run(args) {
		log::error!("worker: {err}");
		std::process::exit(1);
	}
}
