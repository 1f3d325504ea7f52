//! Structured error codes
//!
//! Every failure that can abort a run is identified by an opaque string
//! token. The token is what gets written into the task file's `error` field
//! and carried through logs, so external tooling can match on it without
//! parsing prose.

use thiserror::Error;

/// Failure tokens persisted into the task file and reported to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorCode {
    // Session establishment
    #[error("connection-closed")]
    ConnectionClosed,
    #[error("connection-auth-fail")]
    AuthFail,
    #[error("connection-refused")]
    ConnectionRefused,
    #[error("connection-timeout")]
    ConnectionTimeout,
    #[error("connection-denied")]
    AccessDenied,
    #[error("connection-unable-to-negotiate")]
    UnableToNegotiate,
    #[error("connection-no-available-method")]
    NoAvailableMethod,

    // Command transmission
    #[error("spawner-command-send-error")]
    CommandSend,
    #[error("spawner-prompt-capture-timeout")]
    PromptCaptureTimeout,
    #[error("spawner-prompt-has-been-changed")]
    PromptChanged,
    #[error("spawner-prompt-was-not-defined")]
    PromptUndefined,

    // Extension logic
    #[error("spawner-regex-variable-not-exist")]
    VariableMissing,
    #[error("spawner-regex-group-val-count-not-equal")]
    GroupCountMismatch,
    #[error("spawner-when-condition-double-based")]
    WhenDoubleBased,

    // Task file syntax
    #[error("syntax-host-is-not-set")]
    HostNotSet,
    #[error("syntax-no-tasks")]
    NoTasks,

    // Internal failures
    #[error("internal-error-spawn-exec-command-error")]
    SpawnExec,
    #[error("internal-error-spawn-buffer-is-empty")]
    EmptyBuffer,
    #[error("internal-error-sshhello-yes-send")]
    HostKeyReply,
    #[error("internal-error-cisco-enable")]
    CiscoEnable,
    #[error("internal-error-cisco-menu-exit")]
    CiscoMenuExit,
}

impl ErrorCode {
    /// The token as a plain string slice.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionClosed => "connection-closed",
            ErrorCode::AuthFail => "connection-auth-fail",
            ErrorCode::ConnectionRefused => "connection-refused",
            ErrorCode::ConnectionTimeout => "connection-timeout",
            ErrorCode::AccessDenied => "connection-denied",
            ErrorCode::UnableToNegotiate => "connection-unable-to-negotiate",
            ErrorCode::NoAvailableMethod => "connection-no-available-method",
            ErrorCode::CommandSend => "spawner-command-send-error",
            ErrorCode::PromptCaptureTimeout => "spawner-prompt-capture-timeout",
            ErrorCode::PromptChanged => "spawner-prompt-has-been-changed",
            ErrorCode::PromptUndefined => "spawner-prompt-was-not-defined",
            ErrorCode::VariableMissing => "spawner-regex-variable-not-exist",
            ErrorCode::GroupCountMismatch => "spawner-regex-group-val-count-not-equal",
            ErrorCode::WhenDoubleBased => "spawner-when-condition-double-based",
            ErrorCode::HostNotSet => "syntax-host-is-not-set",
            ErrorCode::NoTasks => "syntax-no-tasks",
            ErrorCode::SpawnExec => "internal-error-spawn-exec-command-error",
            ErrorCode::EmptyBuffer => "internal-error-spawn-buffer-is-empty",
            ErrorCode::HostKeyReply => "internal-error-sshhello-yes-send",
            ErrorCode::CiscoEnable => "internal-error-cisco-enable",
            ErrorCode::CiscoMenuExit => "internal-error-cisco-menu-exit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_as_str() {
        let codes = [
            ErrorCode::ConnectionClosed,
            ErrorCode::AuthFail,
            ErrorCode::NoAvailableMethod,
            ErrorCode::PromptChanged,
            ErrorCode::GroupCountMismatch,
            ErrorCode::HostNotSet,
            ErrorCode::CiscoMenuExit,
        ];
        for code in codes {
            assert_eq!(code.to_string(), code.as_str());
        }
    }

    #[test]
    fn tokens_are_stable() {
        assert_eq!(
            ErrorCode::PromptCaptureTimeout.as_str(),
            "spawner-prompt-capture-timeout"
        );
        assert_eq!(
            ErrorCode::WhenDoubleBased.as_str(),
            "spawner-when-condition-double-based"
        );
        assert_eq!(
            ErrorCode::SpawnExec.as_str(),
            "internal-error-spawn-exec-command-error"
        );
    }
}
