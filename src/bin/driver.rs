use clap::Parser;
use tallymux::{driver, logger};

fn main() {
	logger::init();
	let args = driver::cli::Args::parse();
	if let Err(err) = driver::run(args) {
		log::error!("driver: {err}");
		std::process::exit(1);
	}
}
