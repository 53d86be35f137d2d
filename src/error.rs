//! Library-wide error type with chained causes.
//!
//! Errors carry a stable kind, a message template with `{0}`, `{1}`, …
//! placeholders, the argument strings for those placeholders, and an
//! optional underlying reason error. OS-level failures are wrapped with the
//! high-level kind and the raw OS error attached as the reason.

use std::collections::BTreeMap;
use std::fmt;

/// Stable error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Success,
    Other,
    Parameter,
    Usage,
    Internal,
    Os,
    CannotOpenCamera,
    CannotQueryDeviceCapabilities,
    CannotSetCameraFormat,
    CannotAllocCapturingBuffers,
    CannotStartCapturing,
    ErrorWhileCapturing,
    CannotStopCapturing,
    CannotFreeCapturingBuffers,
    RtspConnectionFailed,
    RtspAuthenticationFailed,
    RtspStreamNotFound,
    RtspConnectionLost,
    RtspTimeout,
    RtspUnsupportedCodec,
    FileNotFound,
    FileReadError,
    FileNoVideoStream,
    FileUnsupportedCodec,
}

impl ErrorKind {
    /// Stable wire name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Success => "success",
            ErrorKind::Other => "other",
            ErrorKind::Parameter => "parameter-error",
            ErrorKind::Usage => "usage-error",
            ErrorKind::Internal => "internal-error",
            ErrorKind::Os => "os",
            ErrorKind::CannotOpenCamera => "cannot-open-camera",
            ErrorKind::CannotQueryDeviceCapabilities => "cannot-query-device-capabilities",
            ErrorKind::CannotSetCameraFormat => "cannot-set-camera-format",
            ErrorKind::CannotAllocCapturingBuffers => "cannot-alloc-capturing-buffers",
            ErrorKind::CannotStartCapturing => "cannot-start-capturing",
            ErrorKind::ErrorWhileCapturing => "error-while-capturing",
            ErrorKind::CannotStopCapturing => "cannot-stop-capturing",
            ErrorKind::CannotFreeCapturingBuffers => "cannot-free-capturing-buffers",
            ErrorKind::RtspConnectionFailed => "rtsp-connection-failed",
            ErrorKind::RtspAuthenticationFailed => "rtsp-authentication-failed",
            ErrorKind::RtspStreamNotFound => "rtsp-stream-not-found",
            ErrorKind::RtspConnectionLost => "rtsp-connection-lost",
            ErrorKind::RtspTimeout => "rtsp-timeout",
            ErrorKind::RtspUnsupportedCodec => "rtsp-unsupported-codec",
            ErrorKind::FileNotFound => "file-not-found",
            ErrorKind::FileReadError => "file-read-error",
            ErrorKind::FileNoVideoStream => "file-no-video-stream",
            ErrorKind::FileUnsupportedCodec => "file-unsupported-codec",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capture pipeline error.
///
/// The message is a template; `{0}`, `{1}`, … are substituted from the
/// arguments set via [`Error::set_arg`]. Placeholders without a matching
/// argument are left in the message literally.
#[derive(Debug, thiserror::Error)]
#[error("{}", self.formatted_message())]
pub struct Error {
    kind: ErrorKind,
    template: String,
    args: BTreeMap<usize, String>,
    #[source]
    reason: Option<Box<Error>>,
}

impl Error {
    /// Create a new error from a kind and a message template.
    pub fn new(kind: ErrorKind, template: impl Into<String>) -> Self {
        Self {
            kind,
            template: template.into(),
            args: BTreeMap::new(),
            reason: None,
        }
    }

    /// Construct a kind-`os` error from the calling thread's last OS error.
    pub fn from_last_os_error() -> Self {
        let io = std::io::Error::last_os_error();
        Error::new(ErrorKind::Os, io.to_string())
    }

    /// Wrap an `io::Error` as a kind-`os` error.
    pub fn from_io(io: &std::io::Error) -> Self {
        Error::new(ErrorKind::Os, io.to_string())
    }

    /// Set the argument substituted for `{n}`.
    pub fn set_arg(&mut self, n: usize, value: impl Into<String>) {
        self.args.insert(n, value.into());
    }

    /// Builder form of [`Error::set_arg`].
    pub fn with_arg(mut self, n: usize, value: impl Into<String>) -> Self {
        self.set_arg(n, value);
        self
    }

    /// Attach the underlying cause. Takes ownership of the reason chain.
    pub fn set_reason(&mut self, reason: Error) {
        self.reason = Some(Box::new(reason));
    }

    /// Builder form of [`Error::set_reason`].
    pub fn with_reason(mut self, reason: Error) -> Self {
        self.set_reason(reason);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message_template(&self) -> &str {
        &self.template
    }

    pub fn arg(&self, n: usize) -> Option<&str> {
        self.args.get(&n).map(String::as_str)
    }

    pub fn reason(&self) -> Option<&Error> {
        self.reason.as_deref()
    }

    /// The message template with all known `{i}` placeholders substituted.
    pub fn formatted_message(&self) -> String {
        let mut msg = self.template.clone();
        for (n, arg) in &self.args {
            msg = msg.replace(&format!("{{{n}}}"), arg);
        }
        msg
    }

    /// The formatted message followed by the reason chain, each cause
    /// joined with "because".
    pub fn full_message(&self) -> String {
        let mut msg = self.formatted_message();
        let mut cause = self.reason();
        while let Some(err) = cause {
            msg.push_str(" because ");
            msg.push_str(&err.formatted_message());
            cause = err.reason();
        }
        msg
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_template_arguments() {
        let err = Error::new(ErrorKind::CannotOpenCamera, "Cannot open camera ({0})")
            .with_arg(0, "/dev/video0");
        assert_eq!(err.formatted_message(), "Cannot open camera (/dev/video0)");
    }

    #[test]
    fn leaves_unset_placeholders_literal() {
        let err = Error::new(ErrorKind::Internal, "failed at step {0} of {1}").with_arg(0, "3");
        assert_eq!(err.formatted_message(), "failed at step 3 of {1}");
    }

    #[test]
    fn reason_chain_is_traversed() {
        let os = Error::new(ErrorKind::Os, "No such file or directory");
        let err = Error::new(ErrorKind::FileNotFound, "File not found: {0}")
            .with_arg(0, "clip.mp4")
            .with_reason(os);

        assert_eq!(
            err.full_message(),
            "File not found: clip.mp4 because No such file or directory"
        );
        assert_eq!(err.reason().unwrap().kind(), ErrorKind::Os);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(ErrorKind::RtspConnectionFailed.name(), "rtsp-connection-failed");
        assert_eq!(
            ErrorKind::CannotAllocCapturingBuffers.name(),
            "cannot-alloc-capturing-buffers"
        );
    }
}
