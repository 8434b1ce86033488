//! Stream listener. Messages arrive back to back on a connection and are
//! split on the BER length of each outer SEQUENCE.

use std::io::{ self, Read };
use std::net::{ SocketAddr, TcpListener, TcpStream };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::thread::{ self, JoinHandle };

use parking_lot::Mutex;
use socket2::{ Domain, Protocol, Socket, Type };
use tracing::{ debug, error, warn };
use trapline::record::ber_frame_len;
use trapline::InboundMessage;

use crate::dispatch::MessageSink;
use crate::{ is_timeout, MAX_DATAGRAM, READ_TIMEOUT };

const BACKLOG: i32 = 128;

/// Largest frame accepted before the connection is dropped
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Reader threads of live connections
pub(crate) type Connections = Arc<Mutex<Vec<JoinHandle<()>>>>;

pub(crate) fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    let listener: TcpListener = socket.into();
    // Accept polls so the thread can notice shutdown
    listener.set_nonblocking(true)?;
    Ok(listener)
}

pub(crate) fn spawn_acceptor(
    listener: TcpListener,
    sink: MessageSink,
    running: Arc<AtomicBool>,
    connections: Connections
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("trapline-tcp-accept".to_string())
        .spawn(move || accept_loop(&listener, &sink, &running, &connections))
}

fn accept_loop(listener: &TcpListener, sink: &MessageSink, running: &Arc<AtomicBool>, connections: &Connections) {
    while running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "connection accepted");
                if let Err(e) = spawn_reader(stream, peer, sink.clone(), running.clone(), connections) {
                    error!(%peer, error = %e, "failed to start connection reader");
                }
            }
            Err(e) if is_timeout(&e) => thread::sleep(READ_TIMEOUT / 5),
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(READ_TIMEOUT / 5);
            }
        }
    }
    debug!("TCP acceptor exiting");
}

fn spawn_reader(
    stream: TcpStream,
    peer: SocketAddr,
    sink: MessageSink,
    running: Arc<AtomicBool>,
    connections: &Connections
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let handle = thread::Builder::new()
        .name(format!("trapline-tcp-{}", peer))
        .spawn(move || read_loop(stream, peer, &sink, &running))?;

    let mut live = connections.lock();
    live.retain(|h| !h.is_finished());
    live.push(handle);
    Ok(())
}

fn read_loop(mut stream: TcpStream, peer: SocketAddr, sink: &MessageSink, running: &AtomicBool) {
    let mut chunk = vec![0u8; MAX_DATAGRAM];
    let mut pending = FrameBuffer::default();

    while running.load(Ordering::Acquire) {
        match stream.read(&mut chunk) {
            Ok(0) => {
                debug!(%peer, "connection closed by peer");
                return;
            }
            Ok(n) => {
                pending.extend(&chunk[..n]);
                loop {
                    match pending.next_frame() {
                        Ok(Some(frame)) => sink.deliver(InboundMessage::new(peer, frame)),
                        Ok(None) => break,
                        Err(e) => {
                            warn!(%peer, error = %e, "dropping connection with unframeable data");
                            return;
                        }
                    }
                }
            }
            Err(e) if is_timeout(&e) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(%peer, error = %e, "connection read failed");
                return;
            }
        }
    }
}

/// Accumulates stream bytes and cuts whole BER elements off the front
#[derive(Debug, Default)]
pub(crate) struct FrameBuffer {
    data: Vec<u8>,
}

impl FrameBuffer {
    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub(crate) fn next_frame(&mut self) -> trapline::Result<Option<Vec<u8>>> {
        let Some(len) = ber_frame_len(&self.data)? else {
            return Ok(None);
        };
        if len > MAX_FRAME_LEN {
            return Err(trapline::TraplineError::invalid_message(format!("frame of {} bytes exceeds limit", len)));
        }
        if self.data.len() < len {
            return Ok(None);
        }
        Ok(Some(self.data.drain(..len).collect()))
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_split_across_reads() {
        let mut frames = FrameBuffer::default();
        frames.extend(&[0x30, 0x03, 0x02]);
        assert_eq!(frames.next_frame().unwrap(), None);

        frames.extend(&[0x01, 0x01, 0x30, 0x00, 0x30]);
        assert_eq!(frames.next_frame().unwrap(), Some(vec![0x30, 0x03, 0x02, 0x01, 0x01]));
        assert_eq!(frames.next_frame().unwrap(), Some(vec![0x30, 0x00]));
        assert_eq!(frames.next_frame().unwrap(), None);
        assert_eq!(frames.buffered(), 1);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut frames = FrameBuffer::default();
        frames.extend(&[0x30, 0x84, 0x7f, 0xff, 0xff, 0xff]);
        assert!(frames.next_frame().is_err());
    }
}
