//! Assertions for call outcomes and metadata.
//!
//! The macros panic with both sides of the comparison so a failing
//! conformance test shows what the peer actually sent.

use rpckit_core::error::RpcError;
#[doc(hidden)]
pub use rpckit_core::metadata::seen_subset;
use rpckit_core::metadata::Metadata;
use rpckit_core::status::Code;

/// Assert that every entry of `expected` was seen in `actual`.
///
/// # Panics
///
/// Panics if an expected entry is missing.
pub fn assert_seen(expected: &Metadata, actual: &Metadata) {
    assert!(
        seen_subset(expected, actual),
        "expected metadata {expected:?} to be seen in {actual:?}"
    );
}

/// Assert that a call result failed with the given status code.
///
/// # Panics
///
/// Panics if the result is `Ok` or carries a different code.
pub fn assert_status_code<T: std::fmt::Debug>(result: &Result<T, RpcError>, expected: Code) {
    match result {
        Ok(value) => panic!("expected {expected} status, call succeeded with {value:?}"),
        Err(err) => assert_eq!(err.code(), expected, "unexpected error: {err}"),
    }
}

/// Assert that metadata was seen, with a custom message on failure.
///
/// # Example
///
/// ```rust
/// use rpckit_core::metadata::Metadata;
/// use rpckit_testing::assert_metadata_seen;
///
/// let expected = Metadata::new().with("k", "v").unwrap();
/// let actual = Metadata::new().with("other", "x").unwrap().with("k", "v").unwrap();
/// assert_metadata_seen!(expected, actual);
/// ```
#[macro_export]
macro_rules! assert_metadata_seen {
    ($expected:expr, $actual:expr) => {
        $crate::assertions::assert_seen(&$expected, &$actual)
    };
    ($expected:expr, $actual:expr, $($msg:tt)+) => {
        assert!(
            $crate::assertions::seen_subset(&$expected, &$actual),
            $($msg)+
        )
    };
}

/// Assert that a call result is an error with the given code.
///
/// # Example
///
/// ```rust
/// use rpckit_core::{Code, RpcError};
/// use rpckit_testing::assert_call_failed;
///
/// let result: Result<(), RpcError> = Err(RpcError::unimplemented("/test/Nope"));
/// assert_call_failed!(result, Code::Unimplemented);
/// ```
#[macro_export]
macro_rules! assert_call_failed {
    ($result:expr, $code:expr) => {
        $crate::assertions::assert_status_code(&$result, $code)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::client_to_server_metadata;

    #[test]
    fn test_assert_seen_ignores_extra_entries() {
        let mut actual = Metadata::new().with("user-agent", "rpckit").unwrap();
        actual.extend(client_to_server_metadata());
        assert_seen(&client_to_server_metadata(), &actual);
        assert_metadata_seen!(client_to_server_metadata(), actual, "extra entries are allowed");
    }

    #[test]
    #[should_panic(expected = "to be seen")]
    fn test_assert_seen_missing_entry() {
        assert_seen(&client_to_server_metadata(), &Metadata::new());
    }

    #[test]
    fn test_assert_status_code() {
        let result: Result<(), RpcError> = Err(RpcError::unimplemented("/test/Missing"));
        assert_call_failed!(result, Code::Unimplemented);
    }

    #[test]
    #[should_panic(expected = "call succeeded")]
    fn test_assert_status_code_on_success() {
        let result: Result<u8, RpcError> = Ok(1);
        assert_status_code(&result, Code::Internal);
    }
}
