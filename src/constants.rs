//! Protocol constants shared by every node on the network.

/// Upper bound on the number of transactions a single block may carry.
pub const MAX_NUMBER_OF_TRANSACTIONS: usize = 255;

/// Upper bound on the summed byte length of a block's transactions.
pub const MAX_PAYLOAD_LENGTH: i32 = MAX_NUMBER_OF_TRANSACTIONS as i32 * 128;

/// Total supply, in whole coins.
pub const MAX_BALANCE: i64 = 1_000_000_000;

/// Base target of the genesis block.
pub const INITIAL_BASE_TARGET: i64 = 153_722_867;

/// Ceiling for any base target produced by the difficulty adjustment.
pub const MAX_BASE_TARGET: i64 = MAX_BALANCE * INITIAL_BASE_TARGET;

/// Target spacing between blocks, in seconds.
pub const BLOCK_TIME: i64 = 60;

/// Well-known id of the genesis block.
pub const GENESIS_BLOCK_ID: i64 = 2_680_262_203_532_249_785;

/// Fees are carried in whole coins while balances are kept in hundredths.
pub const FEE_TO_BALANCE_SCALE: i64 = 100;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const HASH_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;
