//! Call status codes.
//!
//! Every call terminates with a [`Status`]. The code set is closed: the
//! seventeen codes below, numbered `0..=16`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal status code of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Code {
    /// The call completed successfully.
    Ok = 0,
    /// The call was cancelled, typically by the caller.
    Cancelled = 1,
    /// Unknown error, including handler failures without a specific code.
    Unknown = 2,
    /// The client specified an invalid argument.
    InvalidArgument = 3,
    /// The deadline expired before the call completed.
    DeadlineExceeded = 4,
    /// Some requested entity was not found.
    NotFound = 5,
    /// The entity a client attempted to create already exists.
    AlreadyExists = 6,
    /// The caller lacks permission for the operation.
    PermissionDenied = 7,
    /// Some resource has been exhausted.
    ResourceExhausted = 8,
    /// The system is not in a state required for the operation.
    FailedPrecondition = 9,
    /// The operation was aborted.
    Aborted = 10,
    /// The operation was attempted past the valid range.
    OutOfRange = 11,
    /// The method is not implemented or not supported.
    Unimplemented = 12,
    /// An internal invariant was broken.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// The request lacks valid authentication credentials.
    Unauthenticated = 16,
}

impl Code {
    /// All codes in numeric order.
    pub const ALL: [Self; 17] = [
        Self::Ok,
        Self::Cancelled,
        Self::Unknown,
        Self::InvalidArgument,
        Self::DeadlineExceeded,
        Self::NotFound,
        Self::AlreadyExists,
        Self::PermissionDenied,
        Self::ResourceExhausted,
        Self::FailedPrecondition,
        Self::Aborted,
        Self::OutOfRange,
        Self::Unimplemented,
        Self::Internal,
        Self::Unavailable,
        Self::DataLoss,
        Self::Unauthenticated,
    ];

    /// Numeric value of the code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Look up a code by its numeric value.
    #[must_use]
    pub fn from_i32(value: i32) -> Option<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }

    /// Canonical upper-case name, e.g. `DEADLINE_EXCEEDED`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    /// Whether this is [`Code::Ok`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A status code with optional human-readable details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// The status code.
    pub code: Code,
    /// Details describing the outcome; empty for OK.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl Status {
    /// Create a status.
    #[must_use]
    pub fn new(code: Code, details: impl Into<String>) -> Self {
        Self {
            code,
            details: details.into(),
        }
    }

    /// The OK status.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            code: Code::Ok,
            details: String::new(),
        }
    }

    /// A `CANCELLED` status.
    #[must_use]
    pub fn cancelled(details: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, details)
    }

    /// A `DEADLINE_EXCEEDED` status.
    #[must_use]
    pub fn deadline_exceeded(details: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, details)
    }

    /// An `UNIMPLEMENTED` status.
    #[must_use]
    pub fn unimplemented(details: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, details)
    }

    /// An `INTERNAL` status.
    #[must_use]
    pub fn internal(details: impl Into<String>) -> Self {
        Self::new(Code::Internal, details)
    }

    /// An `UNAVAILABLE` status.
    #[must_use]
    pub fn unavailable(details: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, details)
    }

    /// Whether the code is OK.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.details.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.details)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_numbered_in_order() {
        for (index, code) in Code::ALL.iter().enumerate() {
            assert_eq!(code.as_i32(), i32::try_from(index).unwrap());
            assert_eq!(Code::from_i32(code.as_i32()), Some(*code));
        }
        assert_eq!(Code::from_i32(17), None);
        assert_eq!(Code::from_i32(-1), None);
    }

    #[test]
    fn test_code_serialization() {
        let json = serde_json::to_string(&Code::DeadlineExceeded).unwrap();
        assert_eq!(json, "\"DEADLINE_EXCEEDED\"");

        let status: Status = serde_json::from_str(r#"{"code":"OK"}"#).unwrap();
        assert_eq!(status, Status::ok());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::ok().to_string(), "OK");
        assert_eq!(
            Status::unimplemented("no handler for /svc/M").to_string(),
            "UNIMPLEMENTED: no handler for /svc/M"
        );
    }
}
