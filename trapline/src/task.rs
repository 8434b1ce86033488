//! Trap source task: the lifecycle the host scheduler drives.
//!
//! `start` validates configuration, builds the buffer and opens the listener.
//! `poll` hands batches to the host. `stop` releases everything and is safe
//! in any state.

use std::collections::HashMap;
use std::panic::{ catch_unwind, AssertUnwindSafe };
use std::sync::Arc;

use tracing::{ debug, error, info, warn };

use crate::backoff::Backoff;
use crate::buffer::RecordBuffer;
use crate::config::TraplineConfig;
use crate::error::{ Result, TraplineError };
use crate::metrics::{ MetricsSnapshot, TaskMetrics };
use crate::poller::{ PollOutcome, Poller, METRICS_REPORT_INTERVAL };
use crate::record::{ InboundMessage, SnmpVersion, TrapConverter, TrapHeader, TrapRecord };
use crate::transport::{ ListenerHandle, ListenerSettings, MessageHandler, Transport };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Started,
    Stopped,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Created => "created",
            TaskState::Started => "started",
            TaskState::Stopped => "stopped",
        }
    }
}

struct Resources {
    config: TraplineConfig,
    buffer: Arc<RecordBuffer<TrapRecord>>,
    metrics: Arc<TaskMetrics>,
    poller: Poller<RecordBuffer<TrapRecord>, TrapRecord>,
    listener: Option<Box<dyn ListenerHandle>>,
}

pub struct TrapSourceTask {
    state: TaskState,
    resources: Option<Resources>,
}

impl TrapSourceTask {
    pub fn new() -> Self {
        Self {
            state: TaskState::Created,
            resources: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn start(&mut self, settings: &HashMap<String, String>, transport: &dyn Transport) -> Result<()> {
        if self.state != TaskState::Created {
            return Err(TraplineError::InvalidState {
                expected: TaskState::Created.as_str(),
                actual: self.state.as_str(),
            });
        }

        let config = TraplineConfig::from_map(settings)?;

        let buffer = Arc::new(RecordBuffer::new());
        let metrics = Arc::new(TaskMetrics::new());
        let backoff = Arc::new(Backoff::new(config.poll_backoff));

        let mut poller = Poller::new(buffer.clone(), config.batch_size, backoff).with_metrics(metrics.clone());
        if config.collect_metrics {
            poller = poller.report_metrics_every(METRICS_REPORT_INTERVAL);
        }

        let handler = message_handler(
            TrapConverter::new(config.topic.clone()),
            buffer.clone(),
            metrics.clone(),
            config.mpv3_enabled
        );
        let listener_settings = ListenerSettings::from_config(&config);

        let resources = self.resources.insert(Resources {
            config,
            buffer,
            metrics,
            poller,
            listener: None,
        });

        let listener = transport.bind(&listener_settings, handler)?;
        info!(
            topic = %resources.config.topic,
            addr = %listener.local_addr(),
            protocol = %listener_settings.protocol,
            security = resources.config.security.name(),
            "trap source started"
        );
        if let Some(username) = resources.config.security.username() {
            debug!(username, "USM user configured");
        }
        resources.listener = Some(listener);

        self.state = TaskState::Started;
        Ok(())
    }

    /// Next batch for the host. Blocks up to the backoff interval when idle.
    pub fn poll(&self) -> Result<PollOutcome<TrapRecord>> {
        match (self.state, &self.resources) {
            (TaskState::Started, Some(resources)) => resources.poller.poll(),
            (TaskState::Stopped, _) => Err(TraplineError::Interrupted),
            (state, _) =>
                Err(TraplineError::InvalidState {
                    expected: TaskState::Started.as_str(),
                    actual: state.as_str(),
                }),
        }
    }

    /// Release the listener and buffered records. Safe in any state.
    pub fn stop(&mut self) {
        if let Some(resources) = &mut self.resources {
            resources.poller.backoff().interrupt();

            if let Some(listener) = resources.listener.take() {
                match catch_unwind(AssertUnwindSafe(|| listener.close())) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(error = %e, "failed to close listener"),
                    Err(_) => error!("listener panicked while closing"),
                }
            }

            let dropped = resources.buffer.size();
            resources.buffer.clear();
            if self.state == TaskState::Started {
                info!(topic = %resources.config.topic, dropped, metrics = %resources.metrics.snapshot(), "trap source stopped");
            }
        }
        self.state = TaskState::Stopped;
    }

    pub fn config(&self) -> Option<&TraplineConfig> {
        self.resources.as_ref().map(|r| &r.config)
    }

    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.resources.as_ref().map(|r| r.metrics.snapshot())
    }

    pub fn buffer(&self) -> Option<&Arc<RecordBuffer<TrapRecord>>> {
        self.resources.as_ref().map(|r| &r.buffer)
    }

    /// Backoff of the running poller; interrupting it wakes a blocked `poll`
    pub fn backoff(&self) -> Option<Arc<Backoff>> {
        self.resources.as_ref().map(|r| r.poller.backoff().clone())
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.resources
            .as_ref()
            .and_then(|r| r.listener.as_ref())
            .map(|l| l.local_addr())
    }
}

impl Default for TrapSourceTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TrapSourceTask {
    fn drop(&mut self) {
        if self.state == TaskState::Started {
            self.stop();
        }
    }
}

impl std::fmt::Debug for TrapSourceTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrapSourceTask")
            .field("state", &self.state)
            .field("buffered", &self.buffer().map(|b| b.size()))
            .finish()
    }
}

fn message_handler(
    converter: TrapConverter,
    buffer: Arc<RecordBuffer<TrapRecord>>,
    metrics: Arc<TaskMetrics>,
    mpv3_enabled: bool
) -> MessageHandler {
    Arc::new(move |message: InboundMessage| {
        metrics.record_received();

        let header = match TrapHeader::parse(&message.payload) {
            Ok(header) => header,
            Err(e) => {
                warn!(peer = %message.peer, error = %e, "dropping malformed message");
                return;
            }
        };

        if header.version == SnmpVersion::V3 && !mpv3_enabled {
            debug!(peer = %message.peer, "dropping SNMPv3 message, mpv3 disabled");
            return;
        }
        if !header.pdu.is_trap() {
            debug!(peer = %message.peer, pdu = ?header.pdu, "ignoring non-trap PDU");
            return;
        }

        buffer.append(converter.convert(&message, &header));
        metrics.record_processed();
    })
}
