//! Tracing subscriber setup
//!
//! Output goes to stderr at WARN unless a verbosity flag or `RUST_LOG` says
//! otherwise. With `--log-to-server` a second, uncoloured copy of every event
//! is streamed to the study's log collector over TCP.

use std::net::TcpStream;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Verbosity flags as given on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verbosity {
    pub quiet: bool,
    pub verbose: bool,
    pub debug: bool,
}

impl Verbosity {
    /// Effective level; `--debug` beats `--verbose` beats `--quiet`
    pub fn level(&self) -> Level {
        if self.debug {
            Level::DEBUG
        } else if self.verbose {
            Level::INFO
        } else if self.quiet {
            Level::ERROR
        } else {
            Level::WARN
        }
    }

    /// Flags to forward to a child invocation
    pub fn flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.verbose {
            flags.push("-v");
        }
        if self.debug {
            flags.push("-d");
        }
        if self.quiet {
            flags.push("-q");
        }
        flags
    }
}

/// Default filter when `RUST_LOG` is unset
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    format!(
        "warn,dm_qc_report={0},dmqc_report={0},dmqc_common={0}",
        level
    )
}

/// Install the global subscriber
///
/// A log server that cannot be reached is reported and otherwise ignored.
pub fn init_logging(verbosity: Verbosity, log_server: Option<(String, u16)>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity.level())));

    let mut connect_error = None;
    let remote_layer = log_server.and_then(|(host, port)| {
        match TcpStream::connect((host.as_str(), port)) {
            Ok(stream) => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(stream)),
            ),
            Err(e) => {
                connect_error = Some(format!("{}:{}: {}", host, port, e));
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(remote_layer)
        .init();

    if let Some(e) = connect_error {
        tracing::warn!("Cannot connect to log server {}", e);
    }
}
