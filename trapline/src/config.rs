//! Task configuration, parsed and validated from a flat string map.
//!
//! Validation is eager: a `TraplineConfig` only exists if every entry is
//! well-formed, in range and consistent with the others, so nothing invalid
//! ever reaches the listener.

use std::collections::HashMap;
use std::fmt;
use std::net::{ IpAddr, SocketAddr, ToSocketAddrs };
use std::str::FromStr;
use std::time::Duration;

use crate::config_error;
use crate::error::{ Result, TraplineError };

/// Configuration keys
pub mod keys {
    pub const TOPIC: &str = "topic";
    pub const LISTEN_ADDRESS: &str = "listen.address";
    pub const LISTEN_PORT: &str = "listen.port";
    pub const LISTEN_PROTOCOL: &str = "listen.protocol";
    pub const BATCH_SIZE: &str = "batch.size";
    pub const POLL_BACKOFF_MS: &str = "poll.backoff.ms";
    pub const DISPATCHER_THREAD_POOL_SIZE: &str = "dispatcher.thread.pool.size";
    pub const DISPATCHER_MULTITHREADED: &str = "snmp4j.multithreaded";
    pub const MPV3_ENABLED: &str = "mpv3.enabled";
    pub const COLLECT_METRICS: &str = "metrics.collect.snmp";
    pub const USM_USERNAME: &str = "usm.username";
    pub const USM_NO_AUTH_NO_PRIV: &str = "usm.noauthnoprivenabled";
    pub const USM_AUTHENTICATION_PASSPHRASE: &str = "usm.passphrases.authentication";
    pub const USM_PRIVACY_PASSPHRASE: &str = "usm.passphrases.privacy";
    pub const USM_AUTHENTICATION_PROTOCOL: &str = "usm.protocols.authentication";
    pub const USM_PRIVACY_PROTOCOL: &str = "usm.protocols.privacy";

    pub const ALL: [&str; 16] = [
        TOPIC,
        LISTEN_ADDRESS,
        LISTEN_PORT,
        LISTEN_PROTOCOL,
        BATCH_SIZE,
        POLL_BACKOFF_MS,
        DISPATCHER_THREAD_POOL_SIZE,
        DISPATCHER_MULTITHREADED,
        MPV3_ENABLED,
        COLLECT_METRICS,
        USM_USERNAME,
        USM_NO_AUTH_NO_PRIV,
        USM_AUTHENTICATION_PASSPHRASE,
        USM_PRIVACY_PASSPHRASE,
        USM_AUTHENTICATION_PROTOCOL,
        USM_PRIVACY_PROTOCOL,
    ];
}

mod defaults {
    pub const LISTEN_ADDRESS: &str = "0.0.0.0";
    pub const LISTEN_PORT: i64 = 10161;
    pub const BATCH_SIZE: i64 = 1024;
    pub const POLL_BACKOFF_MS: i64 = 250;
    pub const DISPATCHER_THREAD_POOL_SIZE: i64 = 10;
}

pub const MIN_PORT: i64 = 1025;
pub const MAX_PORT: i64 = 65535;
pub const MIN_BATCH_SIZE: i64 = 10;
pub const MIN_POLL_BACKOFF_MS: i64 = 10;
pub const MAX_DISPATCHER_THREADS: i64 = 100;

/// Implements case-insensitive `FromStr`, canonical `Display` and the list
/// of accepted spellings for a closed set of names.
macro_rules! named_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const VARIANTS: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn names() -> String {
                Self::VARIANTS.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let wanted = s.trim();
                Self::VARIANTS.iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| format!("must be one of {} (got '{}')", Self::names(), s))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Transport the listener binds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenProtocol {
    Udp,
    Tcp,
}

named_enum!(ListenProtocol { Udp => "UDP", Tcp => "TCP" });

/// USM authentication algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationProtocol {
    Md5,
    Sha,
    Sha512,
}

named_enum!(AuthenticationProtocol { Md5 => "MD5", Sha => "SHA", Sha512 => "SHA2_512" });

/// USM privacy algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivacyProtocol {
    Des3,
    Aes128,
    Aes256,
}

named_enum!(PrivacyProtocol { Des3 => "DES3", Aes128 => "AES128", Aes256 => "AES256" });

/// Credentials for an authenticated, encrypted USM user
#[derive(Clone, PartialEq, Eq)]
pub struct UsmCredentials {
    pub username: String,
    pub authentication: AuthenticationProtocol,
    pub authentication_passphrase: String,
    pub privacy: PrivacyProtocol,
    pub privacy_passphrase: String,
}

impl fmt::Debug for UsmCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsmCredentials")
            .field("username", &self.username)
            .field("authentication", &self.authentication)
            .field("authentication_passphrase", &"<redacted>")
            .field("privacy", &self.privacy)
            .field("privacy_passphrase", &"<redacted>")
            .finish()
    }
}

/// Exactly one security mode is active for a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityMode {
    /// No USM user is registered
    Disabled,
    /// Identity only, no authentication or encryption
    NoAuthNoPriv { username: String },
    /// Authentication and privacy with both passphrases
    AuthPriv(UsmCredentials),
}

impl SecurityMode {
    pub fn username(&self) -> Option<&str> {
        match self {
            SecurityMode::Disabled => None,
            SecurityMode::NoAuthNoPriv { username } => Some(username),
            SecurityMode::AuthPriv(credentials) => Some(&credentials.username),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SecurityMode::Disabled => "disabled",
            SecurityMode::NoAuthNoPriv { .. } => "noAuthNoPriv",
            SecurityMode::AuthPriv(_) => "authPriv",
        }
    }
}

/// How decoded messages are handed to the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// The receiving thread runs the handler itself
    SingleThreaded,
    /// Messages fan out to a pool of dispatch threads
    Pooled { threads: usize },
}

#[derive(Debug, Clone)]
pub struct TraplineConfig {
    pub topic: String,
    pub listen_address: IpAddr,
    pub listen_port: u16,
    pub listen_protocol: ListenProtocol,
    pub batch_size: usize,
    pub poll_backoff: Duration,
    pub dispatch: DispatchMode,
    pub mpv3_enabled: bool,
    pub collect_metrics: bool,
    pub security: SecurityMode,
}

impl TraplineConfig {
    /// Parse and validate every entry. Fails on the first offending key.
    pub fn from_map(settings: &HashMap<String, String>) -> Result<Self> {
        let s = Settings(settings);

        for key in settings.keys() {
            if !keys::ALL.contains(&key.as_str()) {
                tracing::debug!(key = %key, "ignoring unknown configuration key");
            }
        }

        let topic = s.required_string(keys::TOPIC)?;

        let listen_port = s.int_in_range(keys::LISTEN_PORT, defaults::LISTEN_PORT, MIN_PORT, MAX_PORT)? as u16;
        let address_text = s.string(keys::LISTEN_ADDRESS, defaults::LISTEN_ADDRESS);
        let listen_address = resolve(&address_text, listen_port)?;
        let listen_protocol: ListenProtocol = s.named(keys::LISTEN_PROTOCOL, ListenProtocol::Udp)?;

        let batch_size = s.int_in_range(
            keys::BATCH_SIZE,
            defaults::BATCH_SIZE,
            MIN_BATCH_SIZE,
            i32::MAX as i64
        )? as usize;
        let poll_backoff_ms = s.int_in_range(
            keys::POLL_BACKOFF_MS,
            defaults::POLL_BACKOFF_MS,
            MIN_POLL_BACKOFF_MS,
            i32::MAX as i64
        )? as u64;

        let pool_size = s.int_in_range(
            keys::DISPATCHER_THREAD_POOL_SIZE,
            defaults::DISPATCHER_THREAD_POOL_SIZE,
            1,
            MAX_DISPATCHER_THREADS
        )? as usize;
        let dispatch = if s.bool(keys::DISPATCHER_MULTITHREADED, false)? {
            DispatchMode::Pooled { threads: pool_size }
        } else {
            DispatchMode::SingleThreaded
        };

        let mpv3_enabled = s.bool(keys::MPV3_ENABLED, false)?;
        let collect_metrics = s.bool(keys::COLLECT_METRICS, true)?;
        let security = Self::security_mode(&s)?;

        Ok(Self {
            topic,
            listen_address,
            listen_port,
            listen_protocol,
            batch_size,
            poll_backoff: Duration::from_millis(poll_backoff_ms),
            dispatch,
            mpv3_enabled,
            collect_metrics,
            security,
        })
    }

    /// Convenience for building a config from literal pairs
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Result<Self> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        Self::from_map(&map)
    }

    fn security_mode(s: &Settings<'_>) -> Result<SecurityMode> {
        // Both enumerations are validated even when no user is configured.
        let authentication: AuthenticationProtocol = s.named(
            keys::USM_AUTHENTICATION_PROTOCOL,
            AuthenticationProtocol::Md5
        )?;
        let privacy: PrivacyProtocol = s.named(keys::USM_PRIVACY_PROTOCOL, PrivacyProtocol::Aes128)?;

        let username = s.string(keys::USM_USERNAME, "");

        if s.bool(keys::USM_NO_AUTH_NO_PRIV, false)? {
            return Ok(SecurityMode::NoAuthNoPriv { username });
        }
        if username.is_empty() {
            return Ok(SecurityMode::Disabled);
        }

        let authentication_passphrase = s.string(keys::USM_AUTHENTICATION_PASSPHRASE, "");
        if authentication_passphrase.is_empty() {
            return Err(
                config_error!(
                    keys::USM_AUTHENTICATION_PASSPHRASE,
                    "required for user '{}' unless {} is true",
                    username,
                    keys::USM_NO_AUTH_NO_PRIV
                )
            );
        }
        let privacy_passphrase = s.string(keys::USM_PRIVACY_PASSPHRASE, "");
        if privacy_passphrase.is_empty() {
            return Err(
                config_error!(
                    keys::USM_PRIVACY_PASSPHRASE,
                    "required for user '{}' unless {} is true",
                    username,
                    keys::USM_NO_AUTH_NO_PRIV
                )
            );
        }

        Ok(
            SecurityMode::AuthPriv(UsmCredentials {
                username,
                authentication,
                authentication_passphrase,
                privacy,
                privacy_passphrase,
            })
        )
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.listen_port)
    }
}

/// Resolve a literal IP or a host name, taking the first address returned
fn resolve(host: &str, port: u16) -> Result<IpAddr> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| config_error!(keys::LISTEN_ADDRESS, "cannot resolve '{}': {}", host, e))?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| config_error!(keys::LISTEN_ADDRESS, "'{}' resolved to no address", host))
}

/// Typed lookups over the raw map, each error naming its key
struct Settings<'a>(&'a HashMap<String, String>);

impl Settings<'_> {
    fn raw(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.trim())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or(default).to_string()
    }

    fn required_string(&self, key: &str) -> Result<String> {
        match self.raw(key) {
            Some(v) if !v.is_empty() => Ok(v.to_string()),
            Some(_) => Err(TraplineError::config(key, "must not be empty")),
            None => Err(TraplineError::config(key, "missing required configuration")),
        }
    }

    fn int_in_range(&self, key: &str, default: i64, min: i64, max: i64) -> Result<i64> {
        let value = match self.raw(key) {
            None => default,
            Some(text) =>
                text
                    .parse::<i64>()
                    .map_err(|_| config_error!(key, "expected an integer, got '{}'", text))?,
        };
        if value < min || value > max {
            return Err(config_error!(key, "{} is outside [{}, {}]", value, min, max));
        }
        Ok(value)
    }

    fn bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.raw(key) {
            None => Ok(default),
            Some(text) if text.eq_ignore_ascii_case("true") => Ok(true),
            Some(text) if text.eq_ignore_ascii_case("false") => Ok(false),
            Some(text) => Err(config_error!(key, "expected true or false, got '{}'", text)),
        }
    }

    fn named<T: FromStr<Err = String>>(&self, key: &str, default: T) -> Result<T> {
        match self.raw(key) {
            None => Ok(default),
            Some(text) => text.parse::<T>().map_err(|message| TraplineError::config(key, message)),
        }
    }
}
