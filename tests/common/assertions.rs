//! Custom assertion utilities for tests.

use std::borrow::Cow;

/// Assert that a result is Ok and return the inner value.
///
/// Provides a better error message than `.unwrap()` by including context.
pub fn assert_ok<T, E: std::fmt::Debug>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("{} failed: {:?}", context, e),
    }
}

/// Assert that an error message contains expected text (case-insensitive).
pub fn assert_error_contains<E: std::fmt::Display>(error: E, expected_text: &str, context: &str) {
    let error_str = error.to_string().to_lowercase();
    let expected_lower = expected_text.to_lowercase();

    assert!(
        error_str.contains(&expected_lower),
        "{}: error message should contain '{}', got: {}",
        context,
        expected_text,
        error
    );
}

/// Assert the transformer handed back the very input slice.
pub fn assert_borrowed(out: &Cow<'_, [u8]>, input: &[u8], context: &str) {
    match out {
        Cow::Borrowed(bytes) => {
            assert_eq!(bytes.as_ptr(), input.as_ptr(), "{}: borrowed a different buffer", context);
            assert_eq!(bytes.len(), input.len(), "{}: borrowed length differs", context);
        }
        Cow::Owned(_) => panic!("{}: expected the input back, got rewritten bytes", context),
    }
}

/// Assert the transformer produced new bytes and return them.
pub fn assert_owned(out: Cow<'_, [u8]>, context: &str) -> Vec<u8> {
    match out {
        Cow::Owned(bytes) => bytes,
        Cow::Borrowed(_) => panic!("{}: expected rewritten bytes, got the input back", context),
    }
}
