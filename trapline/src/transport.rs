//! Listener capability seam.
//!
//! The task never opens sockets itself. It hands a handler to a `Transport`
//! and keeps the returned handle so `stop` can release the listener.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::{ DispatchMode, ListenProtocol, SecurityMode, TraplineConfig };
use crate::error::Result;
use crate::record::InboundMessage;

/// Called once per received message, possibly from several threads
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Everything a transport needs to open a listener
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub address: SocketAddr,
    pub protocol: ListenProtocol,
    pub dispatch: DispatchMode,
    pub mpv3_enabled: bool,
    pub security: SecurityMode,
}

impl ListenerSettings {
    /// Settings for an arbitrary address; port 0 binds an ephemeral port
    pub fn new(address: SocketAddr, protocol: ListenProtocol) -> Self {
        Self {
            address,
            protocol,
            dispatch: DispatchMode::SingleThreaded,
            mpv3_enabled: false,
            security: SecurityMode::Disabled,
        }
    }

    pub fn from_config(config: &TraplineConfig) -> Self {
        Self {
            address: config.listen_addr(),
            protocol: config.listen_protocol,
            dispatch: config.dispatch,
            mpv3_enabled: config.mpv3_enabled,
            security: config.security.clone(),
        }
    }

    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }
}

/// Opens listeners
pub trait Transport: Send + Sync {
    fn bind(&self, settings: &ListenerSettings, handler: MessageHandler) -> Result<Box<dyn ListenerHandle>>;
}

/// A running listener
pub trait ListenerHandle: Send + Sync {
    /// Address actually bound, with the real port when 0 was requested
    fn local_addr(&self) -> SocketAddr;

    /// Stop receiving and release the socket. Calling it twice is a no-op.
    fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let config = TraplineConfig::from_pairs(
            &[
                ("topic", "traps"),
                ("listen.address", "127.0.0.1"),
                ("listen.port", "20162"),
                ("listen.protocol", "tcp"),
                ("snmp4j.multithreaded", "true"),
                ("dispatcher.thread.pool.size", "4"),
                ("mpv3.enabled", "true"),
            ]
        ).unwrap();

        let settings = ListenerSettings::from_config(&config);
        assert_eq!(settings.address, "127.0.0.1:20162".parse().unwrap());
        assert_eq!(settings.protocol, ListenProtocol::Tcp);
        assert_eq!(settings.dispatch, DispatchMode::Pooled { threads: 4 });
        assert!(settings.mpv3_enabled);
        assert_eq!(settings.security, SecurityMode::Disabled);
    }

    #[test]
    fn test_ephemeral_settings() {
        let settings = ListenerSettings::new("127.0.0.1:0".parse().unwrap(), ListenProtocol::Udp)
            .with_dispatch(DispatchMode::Pooled { threads: 2 });
        assert_eq!(settings.address.port(), 0);
        assert_eq!(settings.dispatch, DispatchMode::Pooled { threads: 2 });
    }
}
