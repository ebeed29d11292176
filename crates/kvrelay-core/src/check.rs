//! Request checks run before routing

use kvrelay_protocol::Request;
use thiserror::Error;
use tracing::debug;

use crate::types::MAX_KEY_LENGTH;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("Key is empty")]
    EmptyKey,

    #[error("Key is {len} bytes, limit is {limit}")]
    KeyTooLong { len: usize, limit: usize },

    #[error("Key contains illegal character {0:?}")]
    IllegalKeyChar(char),
}

/// Cheap structural validation of a request
#[derive(Debug, Clone, Copy)]
pub struct RequestChecker {
    max_key_length: usize,
}

impl RequestChecker {
    pub fn new(max_key_length: usize) -> Self {
        Self { max_key_length }
    }

    pub fn check(&self, request: &Request) -> Result<(), CheckError> {
        let key = request.key();

        if key.is_empty() {
            return Err(CheckError::EmptyKey);
        }

        if key.len() > self.max_key_length {
            return Err(CheckError::KeyTooLong {
                len: key.len(),
                limit: self.max_key_length,
            });
        }

        if let Some(c) = key.chars().find(|c| c.is_whitespace() || c.is_control()) {
            debug!(op = %request.op(), "Rejecting key with illegal character");
            return Err(CheckError::IllegalKeyChar(c));
        }

        Ok(())
    }
}

impl Default for RequestChecker {
    fn default() -> Self {
        Self::new(MAX_KEY_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        let checker = RequestChecker::default();
        assert!(checker.check(&Request::get("foo")).is_ok());
        assert!(checker.check(&Request::delete("/a/b/foo:bar")).is_ok());
        assert!(checker.check(&Request::get("k".repeat(MAX_KEY_LENGTH))).is_ok());
    }

    #[test]
    fn test_empty_key() {
        let checker = RequestChecker::default();
        assert_eq!(checker.check(&Request::get("")), Err(CheckError::EmptyKey));
    }

    #[test]
    fn test_key_too_long() {
        let checker = RequestChecker::default();
        let result = checker.check(&Request::set("k".repeat(MAX_KEY_LENGTH + 1), &b"v"[..]));
        assert_eq!(
            result,
            Err(CheckError::KeyTooLong {
                len: MAX_KEY_LENGTH + 1,
                limit: MAX_KEY_LENGTH
            })
        );
    }

    #[test]
    fn test_illegal_characters() {
        let checker = RequestChecker::default();
        assert_eq!(
            checker.check(&Request::get("foo bar")),
            Err(CheckError::IllegalKeyChar(' '))
        );
        assert_eq!(
            checker.check(&Request::get("foo\r\n")),
            Err(CheckError::IllegalKeyChar('\r'))
        );
        assert!(matches!(
            checker.check(&Request::get("a\u{7f}")),
            Err(CheckError::IllegalKeyChar(_))
        ));
    }
}
