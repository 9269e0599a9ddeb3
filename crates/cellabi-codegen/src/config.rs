//! Message header configuration.
//!
//! External inbound messages carry optional header fields ahead of the
//! function id.  Which ones are present is a per-contract setting and
//! decides where argument data starts.

use serde::Deserialize;

use crate::error::{CodegenError, CodegenResult};

/// Longest optional signature prefix: presence bit plus a 512-bit signature.
pub const MAX_OPTIONAL_SIGN_LENGTH: u32 = 1 + 512;

/// Width of a function id or an answer id.
pub const FUNCTION_ID_BITS: u32 = 32;

/// Header fields present in external inbound messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MessageHeaders {
    pub pubkey: bool,
    pub time: bool,
    pub expire: bool,
}

impl MessageHeaders {
    /// Parse a header set from JSON, e.g. `{"pubkey": true, "time": true}`.
    pub fn from_json(text: &str) -> CodegenResult<Self> {
        serde_json::from_str(text).map_err(|e| CodegenError::Config(e.to_string()))
    }

    /// Bits preceding the arguments of an external inbound call.
    pub fn external_offset(&self, responsible: bool) -> u32 {
        MAX_OPTIONAL_SIGN_LENGTH
            + if self.pubkey { 1 + 256 } else { 0 }
            + if self.time { 64 } else { 0 }
            + if self.expire { 32 } else { 0 }
            + FUNCTION_ID_BITS
            + if responsible { FUNCTION_ID_BITS } else { 0 }
    }
}

/// Bits preceding the arguments of an internal inbound call.
pub fn internal_offset(responsible: bool) -> u32 {
    FUNCTION_ID_BITS + if responsible { FUNCTION_ID_BITS } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets() {
        let none = MessageHeaders::default();
        assert_eq!(none.external_offset(false), 545);
        assert_eq!(none.external_offset(true), 577);
        let all = MessageHeaders {
            pubkey: true,
            time: true,
            expire: true,
        };
        assert_eq!(all.external_offset(false), 545 + 257 + 64 + 32);
        assert_eq!(internal_offset(false), 32);
        assert_eq!(internal_offset(true), 64);
    }

    #[test]
    fn parse_json() {
        let h = MessageHeaders::from_json(r#"{"time": true}"#).unwrap();
        assert_eq!(
            h,
            MessageHeaders {
                pubkey: false,
                time: true,
                expire: false
            }
        );
        assert!(matches!(
            MessageHeaders::from_json(r#"{"nonce": true}"#),
            Err(CodegenError::Config(_))
        ));
    }
}
