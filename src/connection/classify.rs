//! Connection failure classification.
//!
//! The driver reports transport problems as I/O errors, which is the stable
//! signal used here. Whether the target is a local development instance can
//! only be guessed from the connection string, so the LocalDB diagnosis stays
//! a best-effort heuristic.

use std::sync::LazyLock;

use log::error;
use regex::Regex;

use crate::error::SqlOpsError;
use crate::util::contains_ci;

/// Diagnostic shown when a local-instance connection fails at the network level.
pub const LOCAL_INSTANCE_HINT: &str = "Looks like you are trying to connect to LocalDB. \
This client only speaks TDS over TCP and cannot use LocalDB's named pipe, so \
`(localdb)\\<instance>` never connects. Start the instance, enable a TCP port \
for it and connect with `Server=tcp:127.0.0.1,<port>` instead.";

/// Message shapes of network-level failures for errors that arrive as text only
static NETWORK_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(network-related|instance-specific|connection refused|actively refused|timed out|no such host|failed to lookup address|name or service not known)",
    )
    .expect("Invalid network error regex")
});

/// What went wrong while opening a connection
#[derive(Debug)]
pub enum ConnectFailure {
    /// The TCP socket could not be established.
    Tcp(std::io::Error),
    /// The driver failed during login or TLS negotiation.
    Driver(tiberius::error::Error),
}

impl ConnectFailure {
    fn is_network_level(&self) -> bool {
        match self {
            ConnectFailure::Tcp(_) => true,
            ConnectFailure::Driver(err) => match err {
                tiberius::error::Error::Io { .. } | tiberius::error::Error::Routing { .. } => true,
                other => NETWORK_ERROR_RE.is_match(&other.to_string()),
            },
        }
    }

    fn into_source(self) -> Box<dyn std::error::Error + Send + Sync> {
        match self {
            ConnectFailure::Tcp(err) => Box::new(err),
            ConnectFailure::Driver(err) => Box::new(err),
        }
    }

    fn message(&self) -> String {
        match self {
            ConnectFailure::Tcp(err) => err.to_string(),
            ConnectFailure::Driver(err) => err.to_string(),
        }
    }
}

/// True when a connection string points at a local development instance.
pub fn looks_like_local_instance(connection_string: &str) -> bool {
    contains_ci(connection_string, "localdb")
}

/// Turn a connect failure into the error reported to callers.
///
/// Network-level failures against a LocalDB-looking connection string get the
/// TCP hint; the original error is always kept as the source.
pub fn classify_connect_error(connection_string: &str, failure: ConnectFailure) -> SqlOpsError {
    let message = failure.message();
    if failure.is_network_level() && looks_like_local_instance(connection_string) {
        error!("{}", LOCAL_INSTANCE_HINT);
        return SqlOpsError::LocalInstanceConnectivity {
            message: LOCAL_INSTANCE_HINT.to_string(),
            source: failure.into_source(),
        };
    }

    SqlOpsError::Connectivity {
        message,
        source: failure.into_source(),
    }
}
