//! Error taxonomy for the shell-session core.
//!
//! Only failures that prevent a structured [`crate::ExecuteResult`] from
//! being produced at all show up here. Non-zero exits, cancellation, and
//! shell death are not errors at this layer -- they are ordinary fields on
//! a successful result.

use std::path::PathBuf;

/// Errors returned by [`crate::execute_bash`] and the lower-level session API.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    /// The child shell exited (or otherwise failed to become usable) before
    /// its first command could be dispatched.
    #[error("shell session not started (fingerprint {fingerprint}): {reason}")]
    StartupFailed { fingerprint: String, reason: String },

    /// The child spawned but its stdin handle could not be acquired.
    #[error("shell session stdin unavailable (fingerprint {fingerprint})")]
    StdinUnavailable { fingerprint: String },

    /// Writing the generated command script to the shell's stdin failed.
    #[error("failed to write command to shell session (fingerprint {fingerprint}): {source}")]
    WriteFailed {
        fingerprint: String,
        #[source]
        source: std::io::Error,
    },

    /// `execute` was called on a session that has already been disposed.
    #[error("shell session is closed (fingerprint {fingerprint})")]
    SessionClosed { fingerprint: String },

    /// A snapshot path was configured but does not exist.
    #[error("snapshot file not found: {0}")]
    SnapshotNotFound(PathBuf),

    /// I/O failure in the one-shot (non-persistent) execution path.
    #[error("one-shot execution failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ShellError {
    /// Whether the executor entry point should transparently dispose the
    /// session, spawn a replacement, and retry the command once. Only the
    /// two named startup-failure variants are eligible -- broadening this
    /// predicate to cover mid-command failures would retry commands that
    /// may have already had partial side effects, which is not safe to do
    /// silently.
    #[must_use]
    pub fn is_restartable(&self) -> bool {
        matches!(self, Self::StartupFailed { .. } | Self::StdinUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_failures_are_restartable() {
        assert!(ShellError::StartupFailed {
            fingerprint: "fp".to_string(),
            reason: "spawn failed".to_string(),
        }
        .is_restartable());
        assert!(ShellError::StdinUnavailable {
            fingerprint: "fp".to_string(),
        }
        .is_restartable());
    }

    #[test]
    fn mid_command_and_other_failures_are_not_restartable() {
        assert!(!ShellError::WriteFailed {
            fingerprint: "fp".to_string(),
            source: std::io::Error::other("broken pipe"),
        }
        .is_restartable());
        assert!(!ShellError::SessionClosed {
            fingerprint: "fp".to_string(),
        }
        .is_restartable());
        assert!(!ShellError::SnapshotNotFound(PathBuf::from("/missing")).is_restartable());
        assert!(!ShellError::Io(std::io::Error::other("boom")).is_restartable());
    }
}
