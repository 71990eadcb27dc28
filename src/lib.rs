//! Consensus core of a proof-of-stake chain.
//!
//! Blocks and transactions use fixed little-endian layouts hashed with
//! SHA-256 and signed with ed25519. Forging eligibility follows the
//! generation-signature lottery weighted by effective balance, and the base
//! target is retuned every block towards a 60 second spacing. The
//! [`mempool::TransactionProcessor`] keeps confirmed, unconfirmed and
//! double-spending transactions in disjoint pools.

pub mod account;
pub mod blockchain;
pub mod chain;
pub mod codec;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod difficulty;
pub mod error;
pub mod forge;
pub mod mempool;
pub mod time;
pub mod tx;

pub use blockchain::Block;
pub use error::BlockError;
pub use tx::Transaction;
