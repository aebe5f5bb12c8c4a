//! Error handling module for kubesandbox
//!
//! Provides the error taxonomy raised by the planner using thiserror.
//! Every variant is fatal at the planner level: nothing is retried and
//! already-executed steps are never rolled back.

use thiserror::Error;

/// Main error type for kubesandbox
#[derive(Error, Debug)]
pub enum SandboxError {
    /// A step was built without any invocation form
    #[error("Neither \"command\" nor \"quoted_command\" was specified for the step")]
    NoCommandSpecified,

    /// A missing dependency has no registered installation source
    #[error("No installation source available for the package {0}")]
    UnknownPackage(String),

    /// Script download returned a non-2xx status, or the script exited nonzero
    #[error("Failed to install package \"{package}\": {reason}")]
    InstallationFailed { package: String, reason: String },

    /// A mandatory step exited nonzero
    #[error("Step \"{step}\" failed\n\n{message}")]
    ExecutionFailure { step: String, message: String },

    /// The root access probe failed
    #[error("Package installation requires root privileges")]
    PrivilegeRequired,

    /// The user interrupted the root access probe
    #[error("Package installation aborted by user")]
    InstallationAborted,

    /// IO errors (report files, log files, signal registration)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors (environment, installer sources)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for kubesandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

impl SandboxError {
    /// Create an installation failure for `package`
    pub fn installation_failed(package: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstallationFailed {
            package: package.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SandboxError::UnknownPackage("k3d".to_string());
        assert_eq!(
            err.to_string(),
            "No installation source available for the package k3d"
        );

        let err = SandboxError::installation_failed("helm", "HTTP 404");
        assert_eq!(
            err.to_string(),
            "Failed to install package \"helm\": HTTP 404"
        );
    }

    #[test]
    fn test_execution_failure_carries_step_message() {
        let err = SandboxError::ExecutionFailure {
            step: "create cluster".to_string(),
            message: "Cluster creation failed".to_string(),
        };
        let text = err.to_string();
        assert!(text.starts_with("Step \"create cluster\" failed"));
        assert!(text.ends_with("Cluster creation failed"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SandboxError = io_err.into();
        assert!(matches!(err, SandboxError::Io(_)));
    }
}
