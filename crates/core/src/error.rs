//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Ran out of input while decoding a binary value.
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEof(usize),

    /// A varuint32 used more than 5 bytes.
    #[error("varuint32 longer than 5 bytes")]
    VaruintOverflow,

    /// A length-prefixed string was not valid UTF-8.
    #[error("invalid utf-8 in encoded string")]
    InvalidUtf8,

    /// Name contained an invalid character or was too long.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Symbol code contained an invalid character or precision.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Invalid hex encoding.
    #[error("invalid hex encoding")]
    InvalidHex,

    /// Unsupported or malformed public key.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Unsupported or malformed signature.
    #[error("invalid signature")]
    InvalidSignature,

    /// Public key recovery from a signature failed.
    #[error("signature recovery failed")]
    RecoveryFailed,

    /// The ABI does not define the requested type.
    #[error("unknown ABI type: {0}")]
    UnknownAbiType(String),

    /// The ABI does not define the requested action.
    #[error("ABI defines no action named {0}")]
    UnknownAbiAction(String),

    /// Typedef chain did not terminate within the resolution bound.
    #[error("typedef cycle or nesting too deep while resolving {0}")]
    TypeResolution(String),

    /// ABI decode recursion exceeded the depth bound.
    #[error("ABI value nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    /// A decode call exceeded its configured time budget.
    #[error("decode exceeded the {0:?} time budget")]
    DecodeTimeout(std::time::Duration),
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
