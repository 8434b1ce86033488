//! Datagram listener. One receive thread, one message per datagram.

use std::io;
use std::net::{ SocketAddr, UdpSocket };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::thread::{ self, JoinHandle };

use socket2::{ Domain, Protocol, Socket, Type };
use tracing::{ debug, warn };
use trapline::InboundMessage;

use crate::dispatch::MessageSink;
use crate::{ is_timeout, MAX_DATAGRAM, READ_TIMEOUT };

pub(crate) fn bind(addr: SocketAddr) -> io::Result<UdpSocket> {
    // Exclusive: a second receiver on the same port must fail to bind
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.bind(&addr.into())?;

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(READ_TIMEOUT))?;
    Ok(socket)
}

pub(crate) fn spawn_receiver(
    socket: UdpSocket,
    sink: MessageSink,
    running: Arc<AtomicBool>
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("trapline-udp".to_string())
        .spawn(move || receive_loop(&socket, &sink, &running))
}

fn receive_loop(socket: &UdpSocket, sink: &MessageSink, running: &AtomicBool) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    while running.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => {
                debug!(%peer, len, "datagram received");
                sink.deliver(InboundMessage::new(peer, buf[..len].to_vec()));
            }
            Err(e) if is_timeout(&e) => {}
            Err(e) => {
                // ICMP errors from earlier sends surface here on some platforms
                warn!(error = %e, "UDP receive failed");
            }
        }
    }
    debug!("UDP receiver exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::{ Duration, Instant };

    #[test]
    fn test_receiver_delivers_and_stops() {
        let socket = bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = socket.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let sink = MessageSink::Direct(
            Arc::new(move |message: InboundMessage| {
                assert_eq!(message.payload, b"ping");
                c.fetch_add(1, Ordering::SeqCst);
            })
        );

        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn_receiver(socket, sink, running.clone()).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        for _ in 0..3 {
            sender.send_to(b"ping", addr).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);

        running.store(false, Ordering::Release);
        handle.join().unwrap();
    }
}
