//! ---
//! fwu_section: "05-networking-external-interfaces"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Device transport capability and simulated devices."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
use std::time::Duration;

/// Failure classes reported by a [`crate::Transport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The device could not be reached at all.
    #[error("{0}")]
    Connectivity(String),
    /// An established session dropped while a request was in flight.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// A command did not answer before its ceiling elapsed.
    #[error("command `{command}` timed out after {}s", .after.as_secs())]
    Timeout {
        /// Command line that timed out.
        command: String,
        /// Ceiling that was applied.
        after: Duration,
    },
    /// File transfer failed while the session was up.
    #[error("{0}")]
    Transfer(String),
    /// Any other protocol or command-channel failure.
    #[error("{0}")]
    Protocol(String),
}

impl TransportError {
    /// True for the "device unreachable" family: unreachable, dropped session, timeout.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            TransportError::Connectivity(_)
                | TransportError::ConnectionLost(_)
                | TransportError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(TransportError::Connectivity("no route".into()).is_connectivity());
        assert!(TransportError::ConnectionLost("eof".into()).is_connectivity());
        assert!(TransportError::Timeout {
            command: "cat x".into(),
            after: Duration::from_secs(3)
        }
        .is_connectivity());
        assert!(!TransportError::Transfer("Invalid packet blocking".into()).is_connectivity());
        assert!(!TransportError::Protocol("channel closed".into()).is_connectivity());
    }

    #[test]
    fn display_keeps_cause_verbatim() {
        let err = TransportError::Connectivity("Connection failed".into());
        assert_eq!(err.to_string(), "Connection failed");
        let err = TransportError::Timeout {
            command: "sysupgrade --test /tmp/a.bin".into(),
            after: Duration::from_secs(30),
        };
        assert_eq!(
            err.to_string(),
            "command `sysupgrade --test /tmp/a.bin` timed out after 30s"
        );
    }
}
