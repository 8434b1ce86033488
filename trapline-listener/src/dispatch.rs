//! Hand-off from receive threads to the task's message handler.

use std::io;
use std::thread::{ self, JoinHandle };

use crossbeam_channel::{ unbounded, Sender };
use tracing::{ debug, error, warn };
use trapline::{ DispatchMode, InboundMessage, MessageHandler };

/// Where a receive thread puts each message
#[derive(Clone)]
pub(crate) enum MessageSink {
    /// Run the handler on the receiving thread
    Direct(MessageHandler),
    /// Queue for the dispatch pool
    Pooled(Sender<InboundMessage>),
}

impl MessageSink {
    pub(crate) fn deliver(&self, message: InboundMessage) {
        match self {
            MessageSink::Direct(handler) => handler(message),
            MessageSink::Pooled(tx) => {
                if let Err(e) = tx.send(message) {
                    warn!(peer = %e.0.peer, "dispatch pool gone, dropping message");
                }
            }
        }
    }
}

/// Worker threads draining the dispatch queue.
///
/// Workers exit once every `MessageSink::Pooled` clone has been dropped.
pub(crate) struct DispatchPool {
    workers: Vec<JoinHandle<()>>,
}

impl DispatchPool {
    pub(crate) fn join(self) {
        for worker in self.workers {
            if worker.join().is_err() {
                error!("dispatch thread panicked");
            }
        }
    }
}

pub(crate) fn build(mode: DispatchMode, handler: MessageHandler) -> io::Result<(MessageSink, Option<DispatchPool>)> {
    let threads = match mode {
        DispatchMode::SingleThreaded => {
            return Ok((MessageSink::Direct(handler), None));
        }
        DispatchMode::Pooled { threads } => threads.max(1),
    };

    let (tx, rx) = unbounded::<InboundMessage>();
    let mut workers = Vec::with_capacity(threads);
    for i in 0..threads {
        let rx = rx.clone();
        let handler = handler.clone();
        let worker = thread::Builder::new()
            .name(format!("trapline-dispatch-{}", i))
            .spawn(move || {
                for message in rx.iter() {
                    handler(message);
                }
            })?;
        workers.push(worker);
    }
    debug!(threads, "dispatch pool started");

    Ok((MessageSink::Pooled(tx), Some(DispatchPool { workers })))
}
