//! Error taxonomy for the consensus core.
//!
//! Only structural problems and call-ordering mistakes are errors. Routine
//! verification outcomes (bad signature, ineligible forger, insufficient
//! balance) are reported as plain `bool`/`Option` values by the callers.

use thiserror::Error;

/// Malformed input detected while building or linking a block.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("attempted to create a block with {count} transactions (max {max})")]
    TooManyTransactions { count: usize, max: usize },

    #[error("attempted to create a block with payload length {0}")]
    InvalidPayloadLength(i32),

    #[error("block transactions are not sorted: {current} follows {previous}")]
    UnsortedTransactions { previous: i64, current: i64 },

    #[error("generation signature of a version {version} block must be {expected} bytes, got {actual}")]
    InvalidGenerationSignatureLength {
        version: i32,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported block version {0}")]
    UnsupportedVersion(i32),

    #[error("previous block hash must be present iff version > 1 (version {0})")]
    PreviousBlockHashMismatch(i32),

    #[error("previous block id doesn't match: declared {declared:?}, got {actual}")]
    PreviousBlockMismatch { declared: Option<i64>, actual: i64 },

    #[error("block carries {declared} transactions but {supplied} were supplied")]
    TransactionCountMismatch { declared: usize, supplied: usize },
}

/// A valid object was used in the wrong order.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("block is not signed yet")]
    NotSigned,

    #[error("block already signed")]
    AlreadySigned,

    #[error("block height not yet set")]
    HeightNotSet,

    #[error("block already linked to its predecessor")]
    AlreadyLinked,

    #[error("block not yet linked into the chain")]
    NotLinked,

    #[error("generating key of account {0} does not match the block's public key")]
    GeneratingKeyMismatch(i64),
}

/// The predecessor of a block under verification is not known locally yet.
///
/// Callers should retry once the referenced block arrives.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("can't verify signature because previous block {previous_block_id:?} is missing")]
pub struct BlockOutOfOrder {
    pub previous_block_id: Option<i64>,
}

/// Failure while reading a fixed-layout byte sequence.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input: needed {needed} more bytes")]
    UnexpectedEof { needed: usize },

    #[error("{0} trailing bytes after decoding")]
    TrailingBytes(usize),
}

#[derive(Debug, Error)]
pub enum BlockError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    OutOfOrder(#[from] BlockOutOfOrder),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("signing failed: {0}")]
    Signing(#[from] ed25519_dalek::SignatureError),
}
