//! trapline - SNMP trap source for batch-pulling consumers.
//!
//! Listener threads push traps into an unbounded buffer; the host scheduler
//! pulls them back out in bounded batches, backing off when idle.
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use trapline::{ PollOutcome, TrapSourceTask, Transport };
//!
//! fn run(transport: &dyn Transport) -> trapline::Result<()> {
//!     let settings = HashMap::from([("topic".to_string(), "traps".to_string())]);
//!     let mut task = TrapSourceTask::new();
//!     task.start(&settings, transport)?;
//!
//!     if let PollOutcome::Batch(records) = task.poll()? {
//!         println!("got {} traps", records.len());
//!     }
//!     task.stop();
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod buffer;
pub mod config;
pub mod error;
pub mod metrics;
pub mod poller;
pub mod record;
pub mod task;
pub mod transport;

pub use backoff::Backoff;
pub use buffer::RecordBuffer;
pub use config::{ DispatchMode, ListenProtocol, SecurityMode, TraplineConfig };
pub use error::{ Result, TraplineError };
pub use metrics::{ Counter, MetricsSnapshot, TaskMetrics };
pub use poller::{ PollOutcome, Poller, RecordSource };
pub use record::{ InboundMessage, PduKind, SnmpVersion, TrapConverter, TrapHeader, TrapRecord };
pub use task::{ TaskState, TrapSourceTask };
pub use transport::{ ListenerHandle, ListenerSettings, MessageHandler, Transport };
