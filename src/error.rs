// Drydock
// Copyright (C) 2025 - Drydock Project Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// long with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Main error type for drydock operations.
///
/// The first group is terminal for the whole run, the second marks a single
/// host as skipped, the rest surface from the API client, remote sessions,
/// upgrades and the workflow itself.
#[derive(Debug)]
pub enum DrydockError {
    /// Manifest file does not exist at the given path
    ManifestNotFound(String),

    /// Manifest is not parseable as a document
    ManifestSyntax(String),

    /// Manifest parsed but failed schema validation; all problems collected
    ManifestInvalid(Vec<String>),

    /// A host entry sets a field that must live in [defaults]
    ForbiddenOverride { host: String, field: String },

    /// A referenced secret name is not present in the environment
    CredentialMissing(String),

    /// Proxmox rejected the API token
    AuthFailed(String),

    /// The configured node name is not known to the cluster
    NodeUnknown(String),

    /// A guest id was not found on the node
    GuestUnknown(String),

    /// A Proxmox task (UPID) finished with a non-OK exit status
    TaskFailed(String),

    /// Transport could not be established at all
    Unreachable(String),

    /// A bounded wait elapsed
    Timeout(String),

    /// Protocol-level transport fault (HTTP 5xx, broken channel, ...)
    Transport(String),

    /// /etc/os-release unreadable or the OS family is unsupported
    OsDetectionFailed(String),

    /// A package upgrade step exited non-zero
    UpgradeFailed { step: String, stderr: String },

    /// Reachability checks before any state change failed
    PreflightFailed(String),

    /// The per-host wall-clock deadline expired
    HostDeadlineExceeded(String),

    /// Cooperative cancellation; a distinct terminal state, not a failure
    Cancelled,

    /// CLI / configuration errors outside the manifest
    Config(String),

    /// IO errors
    Io(io::Error),
}

impl fmt::Display for DrydockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrydockError::ManifestNotFound(path) => write!(f, "manifest not found: {}", path),
            DrydockError::ManifestSyntax(msg) => write!(f, "manifest syntax error: {}", msg),
            DrydockError::ManifestInvalid(problems) => {
                write!(f, "manifest invalid ({} problem(s)): {}", problems.len(), problems.join("; "))
            }
            DrydockError::ForbiddenOverride { host, field } => {
                write!(f, "host '{}' overrides '{}', which must be set in [defaults]", host, field)
            }
            DrydockError::CredentialMissing(name) => {
                write!(f, "credential missing: environment variable '{}' is not set", name)
            }
            DrydockError::AuthFailed(msg) => write!(f, "API authentication failed: {}", msg),
            DrydockError::NodeUnknown(node) => write!(f, "unknown node: {}", node),
            DrydockError::GuestUnknown(msg) => write!(f, "unknown guest: {}", msg),
            DrydockError::TaskFailed(msg) => write!(f, "task failed: {}", msg),
            DrydockError::Unreachable(msg) => write!(f, "unreachable: {}", msg),
            DrydockError::Timeout(msg) => write!(f, "timed out: {}", msg),
            DrydockError::Transport(msg) => write!(f, "transport error: {}", msg),
            DrydockError::OsDetectionFailed(msg) => write!(f, "OS detection failed: {}", msg),
            DrydockError::UpgradeFailed { step, stderr } => {
                write!(f, "upgrade step '{}' failed: {}", step, stderr)
            }
            DrydockError::PreflightFailed(msg) => write!(f, "preflight failed: {}", msg),
            DrydockError::HostDeadlineExceeded(msg) => write!(f, "host deadline exceeded: {}", msg),
            DrydockError::Cancelled => write!(f, "cancelled"),
            DrydockError::Config(msg) => write!(f, "configuration error: {}", msg),
            DrydockError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl StdError for DrydockError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            DrydockError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for DrydockError {
    fn from(err: io::Error) -> Self {
        DrydockError::Io(err)
    }
}

impl DrydockError {
    /// Only protocol-level transport faults are retried by the API client.
    /// Auth and domain errors never are.
    pub fn is_transient(&self) -> bool {
        matches!(self, DrydockError::Transport(_))
    }
}

/// Result type alias for drydock operations
pub type Result<T> = std::result::Result<T, DrydockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_forbidden_override() {
        let e = DrydockError::ForbiddenOverride {
            host: "pve1".into(),
            field: "identity_file".into(),
        };
        let s = format!("{}", e);
        assert!(s.contains("pve1"));
        assert!(s.contains("identity_file"));
        assert!(s.contains("[defaults]"));
    }

    #[test]
    fn test_display_manifest_invalid_collects() {
        let e = DrydockError::ManifestInvalid(vec!["a".into(), "b".into()]);
        let s = format!("{}", e);
        assert!(s.contains("2 problem(s)"));
        assert!(s.contains("a; b"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(DrydockError::Transport("boom".into()).is_transient());
        assert!(!DrydockError::AuthFailed("401".into()).is_transient());
        assert!(!DrydockError::Timeout("t".into()).is_transient());
        assert!(!DrydockError::GuestUnknown("100".into()).is_transient());
    }

    #[test]
    fn test_io_source() {
        let e = DrydockError::from(io::Error::new(io::ErrorKind::Other, "x"));
        assert!(e.source().is_some());
    }
}
