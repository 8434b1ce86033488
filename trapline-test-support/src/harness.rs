//! A trap source task running on real sockets, for end-to-end tests.

use std::collections::HashMap;
use std::io::Write;
use std::net::{ SocketAddr, TcpListener, TcpStream, UdpSocket };
use std::time::{ Duration, Instant };

use parking_lot::Mutex;
use trapline::{ ListenProtocol, PollOutcome, TrapRecord, TrapSourceTask, TraplineError, Result };
use trapline_listener::SocketTransport;

const BIND_ATTEMPTS: usize = 5;

pub struct TaskHarness {
    task: TrapSourceTask,
    addr: SocketAddr,
    protocol: ListenProtocol,
    udp: UdpSocket,
    tcp: Mutex<Option<TcpStream>>,
}

impl TaskHarness {
    /// Start a task on a free loopback port. `extra` overrides the defaults.
    pub fn start(protocol: ListenProtocol, extra: &[(&str, &str)]) -> Result<Self> {
        let mut last_error = None;

        for _ in 0..BIND_ATTEMPTS {
            let port = free_port(protocol)?;
            let mut settings = HashMap::from([
                ("topic".to_string(), "traps".to_string()),
                ("listen.address".to_string(), "127.0.0.1".to_string()),
                ("listen.port".to_string(), port.to_string()),
                ("listen.protocol".to_string(), protocol.to_string()),
                ("poll.backoff.ms".to_string(), "10".to_string()),
            ]);
            for (k, v) in extra {
                settings.insert(k.to_string(), v.to_string());
            }

            let mut task = TrapSourceTask::new();
            match task.start(&settings, &SocketTransport) {
                Ok(()) => {
                    let addr = task.local_addr().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], port)));
                    return Ok(Self {
                        task,
                        addr,
                        protocol,
                        udp: UdpSocket::bind("127.0.0.1:0")?,
                        tcp: Mutex::new(None),
                    });
                }
                // Someone grabbed the port between probe and bind
                Err(e @ TraplineError::Bind { .. }) => {
                    task.stop();
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| TraplineError::unexpected("no bind attempt made")))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn task(&self) -> &TrapSourceTask {
        &self.task
    }

    pub fn task_mut(&mut self) -> &mut TrapSourceTask {
        &mut self.task
    }

    /// Send one message over the task's protocol
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        match self.protocol {
            ListenProtocol::Udp => {
                self.udp.send_to(payload, self.addr)?;
            }
            ListenProtocol::Tcp => {
                let mut stream = self.tcp.lock();
                if stream.is_none() {
                    *stream = Some(TcpStream::connect(self.addr)?);
                }
                if let Some(s) = stream.as_mut() {
                    s.write_all(payload)?;
                    s.flush()?;
                }
            }
        }
        Ok(())
    }

    /// Poll until `expected` records arrived or `timeout` passed
    pub fn poll_until(&self, expected: usize, timeout: Duration) -> Result<Vec<TrapRecord>> {
        let deadline = Instant::now() + timeout;
        let mut records = Vec::new();
        while records.len() < expected && Instant::now() < deadline {
            if let PollOutcome::Batch(batch) = self.task.poll()? {
                records.extend(batch);
            }
        }
        Ok(records)
    }

    pub fn stop(&mut self) {
        self.tcp.lock().take();
        self.task.stop();
    }
}

fn free_port(protocol: ListenProtocol) -> Result<u16> {
    let port = match protocol {
        ListenProtocol::Udp => UdpSocket::bind("127.0.0.1:0")?.local_addr()?.port(),
        ListenProtocol::Tcp => TcpListener::bind("127.0.0.1:0")?.local_addr()?.port(),
    };
    Ok(port)
}
