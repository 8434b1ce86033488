//! trapline-listener - socket transport for trapline source tasks.
//!
//! Binds a UDP or TCP listener with `socket2`, reads messages on dedicated
//! threads and hands each one to the task's handler, inline or through a
//! dispatch pool.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trapline::{ InboundMessage, ListenProtocol, ListenerSettings, Transport };
//! use trapline_listener::SocketTransport;
//!
//! let settings = ListenerSettings::new("127.0.0.1:0".parse().unwrap(), ListenProtocol::Udp);
//! let handle = SocketTransport
//!     .bind(&settings, Arc::new(|message: InboundMessage| println!("{} bytes", message.payload.len())))
//!     .unwrap();
//! println!("listening on {}", handle.local_addr());
//! handle.close().unwrap();
//! ```

mod dispatch;
pub mod tcp;
mod udp;

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{ error, info };
use trapline::{
    ListenProtocol,
    ListenerHandle,
    ListenerSettings,
    MessageHandler,
    Result,
    SecurityMode,
    TraplineError,
    Transport,
};

use crate::dispatch::{ DispatchPool, MessageSink };

/// How long a blocked read waits before rechecking for shutdown
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Receive buffer size; the largest UDP payload fits
pub const MAX_DATAGRAM: usize = 64 * 1024;

pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// `Transport` backed by OS sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketTransport;

impl Transport for SocketTransport {
    fn bind(&self, settings: &ListenerSettings, handler: MessageHandler) -> Result<Box<dyn ListenerHandle>> {
        SocketListener::open(settings, handler).map(|l| Box::new(l) as Box<dyn ListenerHandle>)
    }
}

struct Threads {
    receiver: JoinHandle<()>,
    connections: Option<tcp::Connections>,
    sink: MessageSink,
    pool: Option<DispatchPool>,
}

/// Handle to a bound listener. Closing (or dropping) it stops every thread.
pub struct SocketListener {
    local_addr: SocketAddr,
    protocol: ListenProtocol,
    running: Arc<AtomicBool>,
    threads: Mutex<Option<Threads>>,
}

impl SocketListener {
    pub fn open(settings: &ListenerSettings, handler: MessageHandler) -> Result<Self> {
        let addr = settings.address;
        let bind_error = |source: io::Error| TraplineError::Bind { addr, source };

        let running = Arc::new(AtomicBool::new(true));
        let (sink, pool) = dispatch::build(settings.dispatch, handler)?;

        let (local_addr, receiver, connections) = match settings.protocol {
            ListenProtocol::Udp => {
                let socket = udp::bind(addr).map_err(bind_error)?;
                let local_addr = socket.local_addr()?;
                let receiver = udp::spawn_receiver(socket, sink.clone(), running.clone())?;
                (local_addr, receiver, None)
            }
            ListenProtocol::Tcp => {
                let listener = tcp::bind(addr).map_err(bind_error)?;
                let local_addr = listener.local_addr()?;
                let connections = tcp::Connections::default();
                let receiver = tcp::spawn_acceptor(listener, sink.clone(), running.clone(), connections.clone())?;
                (local_addr, receiver, Some(connections))
            }
        };

        info!(
            %local_addr,
            protocol = %settings.protocol,
            dispatch = ?settings.dispatch,
            mpv3 = settings.mpv3_enabled,
            "listener bound"
        );
        log_security(&settings.security);

        Ok(Self {
            local_addr,
            protocol: settings.protocol,
            running,
            threads: Mutex::new(Some(Threads { receiver, connections, sink, pool })),
        })
    }

    pub fn protocol(&self) -> ListenProtocol {
        self.protocol
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::Release);

        let Some(threads) = self.threads.lock().take() else {
            return;
        };

        join("receiver", threads.receiver);
        if let Some(connections) = threads.connections {
            for handle in connections.lock().drain(..) {
                join("connection", handle);
            }
        }

        // Last sender gone: pool workers finish the queue and exit
        drop(threads.sink);
        if let Some(pool) = threads.pool {
            pool.join();
        }
        info!(local_addr = %self.local_addr, "listener closed");
    }
}

fn join(role: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!(role, "listener thread panicked");
    }
}

fn log_security(security: &SecurityMode) {
    match security {
        SecurityMode::Disabled => {}
        SecurityMode::NoAuthNoPriv { username } => {
            info!(username = %username, "USM user registered without authentication or privacy");
        }
        SecurityMode::AuthPriv(credentials) => {
            info!(
                username = %credentials.username,
                authentication = %credentials.authentication,
                privacy = %credentials.privacy,
                "USM user registered; encrypted PDUs are forwarded undecrypted"
            );
        }
    }
}

impl ListenerHandle for SocketListener {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn close(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SocketListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketListener")
            .field("local_addr", &self.local_addr)
            .field("protocol", &self.protocol)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{ TcpStream, UdpSocket };
    use std::sync::atomic::AtomicU64;
    use std::time::Instant;
    use trapline::DispatchMode;

    fn counter_handler() -> (Arc<AtomicU64>, MessageHandler) {
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let handler: MessageHandler = Arc::new(move |_: trapline::InboundMessage| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    fn wait_for(count: &AtomicU64, expected: u64) -> u64 {
        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < expected && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        count.load(Ordering::SeqCst)
    }

    #[test]
    fn test_udp_pooled_listener() {
        let (count, handler) = counter_handler();
        let settings = ListenerSettings::new("127.0.0.1:0".parse().unwrap(), ListenProtocol::Udp)
            .with_dispatch(DispatchMode::Pooled { threads: 3 });
        let listener = SocketListener::open(&settings, handler).unwrap();
        assert!(listener.is_running());

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        for _ in 0..10 {
            sender.send_to(&[0x30, 0x00], listener.local_addr()).unwrap();
        }
        assert_eq!(wait_for(&count, 10), 10);

        listener.close().unwrap();
        assert!(!listener.is_running());
        listener.close().unwrap();
    }

    #[test]
    fn test_tcp_listener_frames_stream() {
        let (count, handler) = counter_handler();
        let settings = ListenerSettings::new("127.0.0.1:0".parse().unwrap(), ListenProtocol::Tcp);
        let listener = SocketListener::open(&settings, handler).unwrap();

        let mut stream = TcpStream::connect(listener.local_addr()).unwrap();
        stream.write_all(&[0x30, 0x01, 0x05, 0x30, 0x00]).unwrap();
        stream.write_all(&[0x30, 0x02, 0x01]).unwrap();
        stream.write_all(&[0x02]).unwrap();
        stream.flush().unwrap();

        assert_eq!(wait_for(&count, 3), 3);
        listener.close().unwrap();
    }

    #[test]
    fn test_bind_conflict_reports_address() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = occupied.local_addr().unwrap();

        let (_count, handler) = counter_handler();
        let settings = ListenerSettings::new(addr, ListenProtocol::Tcp);
        match SocketListener::open(&settings, handler) {
            Err(TraplineError::Bind { addr: reported, .. }) => assert_eq!(reported, addr),
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_udp_port_is_exclusive() {
        let (_count, handler) = counter_handler();
        let settings = ListenerSettings::new("127.0.0.1:0".parse().unwrap(), ListenProtocol::Udp);
        let first = SocketListener::open(&settings, handler).unwrap();
        let addr = first.local_addr();

        let (_count, handler) = counter_handler();
        let settings = ListenerSettings::new(addr, ListenProtocol::Udp);
        match SocketListener::open(&settings, handler) {
            Err(TraplineError::Bind { addr: reported, .. }) => assert_eq!(reported, addr),
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }

        first.close().unwrap();
        let (_count, handler) = counter_handler();
        let reopened = SocketListener::open(&settings, handler).unwrap();
        assert_eq!(reopened.local_addr(), addr);
    }
}
