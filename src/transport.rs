//! The thin connection/accept layer the core protocol logic (arena, hash tables, tokenizer, wire
//! codec, event loop) is deliberately blind to — see SPEC_FULL.md §4.8 and §1's "deliberately out
//! of scope" list. Everything here just produces something implementing [`ReadSource`] /
//! [`WriteSink`]; the driver and worker engines don't care whether the bytes come from a live TCP
//! socket, a replayed dump file, or a pipe.

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::{
	fs::File,
	io::{self, Read, Seek, Write},
	net::{TcpListener, TcpStream},
	os::unix::io::{AsRawFd, RawFd},
};

/// Something bytes can be read from, with a raw fd suitable for registering in a [`crate::poll::Poller`].
pub trait ReadSource: Read + AsRawFd + Send {}
impl<T: Read + AsRawFd + Send> ReadSource for T {}

/// Something bytes can be written to, with a raw fd suitable for registering in a [`crate::poll::Poller`].
pub trait WriteSink: Write + AsRawFd + Send {}
impl<T: Write + AsRawFd + Send> WriteSink for T {}

pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
	let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| io::Error::from_raw_os_error(e as i32))?;
	let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
	fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| io::Error::from_raw_os_error(e as i32))?;
	Ok(())
}

/// Driver side: dial out to one worker's send port (to stream it a file range) and receive port
/// (to stream back its table). Both sockets are set non-blocking for the poll-driven event loop.
pub fn connect_worker(ip: &str, send_port: u16, recv_port: u16) -> io::Result<(TcpStream, TcpStream)> {
	let send_sock = TcpStream::connect((ip, send_port))?;
	let recv_sock = TcpStream::connect((ip, recv_port))?;
	send_sock.set_nonblocking(true)?;
	recv_sock.set_nonblocking(true)?;
	Ok((send_sock, recv_sock))
}

/// Worker side: listen on `in_port` (the driver's matching "send" port) and `out_port` (the
/// driver's matching "receive" port), and accept exactly one connection on each — the spec fixes
/// worker membership at process start, so there is never a second peer to accept.
pub fn accept_worker(in_port: u16, out_port: u16) -> io::Result<(TcpStream, TcpStream)> {
	let in_listener = TcpListener::bind(("0.0.0.0", in_port))?;
	let out_listener = TcpListener::bind(("0.0.0.0", out_port))?;
	let (recv_sock, _) = in_listener.accept()?;
	let (send_sock, _) = out_listener.accept()?;
	recv_sock.set_nonblocking(true)?;
	send_sock.set_nonblocking(true)?;
	Ok((recv_sock, send_sock))
}

/// Driver `--offline` replay: substitute a plain file for a worker's receive socket. Regular files
/// are always poll-ready, so no non-blocking flag is needed for correctness, but setting one is
/// harmless and keeps this source uniform with the live-socket path.
pub fn open_dump_file(path: &std::path::Path) -> io::Result<File> {
	File::open(path)
}

/// `--prepopulate` support: read `source` to completion into a fresh temp file, then reopen it for
/// reading. Used by both roles to decouple their receive and send phases — draining into a file
/// first means the subsequent read side is driven synchronously rather than through the poll loop,
/// since regular files are always poll-ready.
pub fn prepopulate_drain(mut source: impl Read) -> io::Result<File> {
	let mut tmp = tempfile::tempfile()?;
	io::copy(&mut source, &mut tmp)?;
	tmp.rewind()?;
	Ok(tmp)
}
