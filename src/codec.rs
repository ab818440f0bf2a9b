//! Dynamic protobuf codec: decodes and encodes messages against
//! registry descriptors, with a blind-decode fallback when no schema is
//! available.
//!
//! Decoding never fails fatally — every error becomes an in-tree
//! `Error` leaf so partial results survive. Encoding is strict and
//! surfaces `SchemaMissing` / `TypeMismatch` to the caller.

pub mod decode;
pub mod encode;

pub use decode::{decode, decode_blind};
pub use encode::{encode, template};

use thiserror::Error;

/// Error type for the encode/template paths. Decode errors stay in-tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// No descriptor resolvable for the requested type
    #[error("no schema registered for type {0}")]
    SchemaMissing(String),
    /// A leaf value cannot be coerced to the declared field type
    #[error("type mismatch on field {field}: expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        got: &'static str,
    },
}

/// Codec tunables, carried from [`crate::settings::CodecConfig`].
#[derive(Debug, Clone, Copy)]
pub struct CodecOptions {
    /// If true, invalid UTF-8 in string fields yields an error leaf
    /// rather than falling back to raw bytes.
    pub strict_utf8: bool,
    /// Minimum fraction of a length-delimited payload a candidate
    /// nested message must consume during blind decode to be accepted.
    pub blind_decode_threshold: f64,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            strict_utf8: false,
            blind_decode_threshold: 0.8,
        }
    }
}

/// Nesting bound for decode and template recursion. Deeper input
/// produces an error leaf instead of risking stack exhaustion.
pub(crate) const MAX_RECURSION_DEPTH: usize = 64;
