//! trapline driver - runs one trap source task and drains it until Ctrl-C.
//!
//! Usage: trapline-driver <settings.toml>
//!
//! Nested TOML tables become dotted keys, so `[listen] port = 10162` sets
//! `listen.port`. Log level comes from `RUST_LOG` (default `info`).

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;

use anyhow::{ bail, Context };
use tracing::{ debug, error, info };
use tracing_subscriber::EnvFilter;
use trapline::{ PollOutcome, TrapSourceTask, TraplineError };
use trapline_listener::SocketTransport;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: trapline-driver <settings.toml>");
    };
    let text = std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path))?;
    let settings = flatten(&text).with_context(|| format!("failed to parse {}", path))?;

    let mut task = TrapSourceTask::new();
    if let Err(e) = task.start(&settings, &SocketTransport) {
        task.stop();
        return Err(e).context("trap source failed to start");
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let backoff = task.backoff();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
        if let Some(b) = &backoff {
            b.interrupt();
        }
    }).context("failed to install Ctrl-C handler")?;

    let mut total = 0u64;
    let outcome = loop {
        if !running.load(Ordering::SeqCst) {
            break Ok(());
        }
        match task.poll() {
            Ok(PollOutcome::Batch(records)) => {
                total += records.len() as u64;
                for record in &records {
                    debug!(
                        peer = %record.peer,
                        version = record.version.as_str(),
                        pdu = ?record.pdu,
                        bytes = record.payload.len(),
                        "trap"
                    );
                }
                info!(count = records.len(), total, "batch polled");
            }
            Ok(PollOutcome::NoData) => {}
            Err(TraplineError::Interrupted) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    task.stop();
    info!(total, "driver exiting");
    outcome.context("poll failed")
}

/// Flatten a TOML document into the dotted string map the task expects
fn flatten(text: &str) -> anyhow::Result<HashMap<String, String>> {
    let table: toml::Table = text.parse()?;
    let mut out = HashMap::new();
    flatten_into("", &table, &mut out)?;
    Ok(out)
}

fn flatten_into(prefix: &str, table: &toml::Table, out: &mut HashMap<String, String>) -> anyhow::Result<()> {
    for (key, value) in table {
        let full = if prefix.is_empty() { key.clone() } else { format!("{}.{}", prefix, key) };
        match value {
            toml::Value::Table(inner) => flatten_into(&full, inner, out)?,
            toml::Value::Array(_) => bail!("'{}': arrays are not supported", full),
            other => {
                out.insert(full, scalar(other));
            }
        }
    }
    Ok(())
}

fn scalar(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_nested_tables() {
        let settings = flatten(
            r#"
            topic = "traps"

            [listen]
            address = "127.0.0.1"
            port = 10162
            protocol = "tcp"

            [usm]
            noauthnoprivenabled = true

            [dispatcher.thread.pool]
            size = 4
            "#
        ).unwrap();

        assert_eq!(settings["topic"], "traps");
        assert_eq!(settings["listen.address"], "127.0.0.1");
        assert_eq!(settings["listen.port"], "10162");
        assert_eq!(settings["usm.noauthnoprivenabled"], "true");
        assert_eq!(settings["dispatcher.thread.pool.size"], "4");

        let config = trapline::TraplineConfig::from_map(&settings).unwrap();
        assert_eq!(config.listen_port, 10162);
    }

    #[test]
    fn test_flatten_rejects_arrays() {
        assert!(flatten("ports = [1, 2]").is_err());
        assert!(flatten("not toml at all =").is_err());
    }
}
