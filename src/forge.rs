//! Block generation: when an account may forge, and how its block is assembled.

use std::sync::Arc;

use crate::account::AccountLedger;
use crate::blockchain::{self, generation_signature_len, Block, BlockHeader};
use crate::constants::{MAX_NUMBER_OF_TRANSACTIONS, MAX_PAYLOAD_LENGTH};
use crate::crypto::{self, HashBytes, PublicKeyBytes};
use crate::error::{BlockError, StateError};
use crate::tx::{Transaction, TRANSACTION_BYTES_LEN};
use sha2::Digest;

/// The hash whose leading bytes form the forger's hit for the next block.
pub fn generation_hash(
    previous: &Block,
    public_key: &PublicKeyBytes,
    secret_phrase: &str,
    version: i32,
) -> Result<(Vec<u8>, HashBytes), BlockError> {
    if version == 1 {
        let signature = crypto::sign(previous.generation_signature(), secret_phrase)?;
        let hash = crypto::digest(&signature);
        Ok((signature.to_vec(), hash))
    } else {
        let hash = blockchain::generation_hash(previous.generation_signature(), public_key);
        Ok((hash.to_vec(), hash))
    }
}

/// Earliest timestamp at which a forger with `hit` and `effective_balance`
/// satisfies `hit < target` on top of `previous`. `None` if the forger has
/// no stake or the wait does not fit the timestamp range.
pub fn earliest_timestamp(previous: &Block, hit: u64, effective_balance: i64) -> Result<Option<i32>, StateError> {
    if effective_balance <= 0 {
        return Ok(None);
    }
    let per_second = i128::from(previous.base_target()?) * i128::from(effective_balance);
    let elapsed = i128::from(hit) / per_second + 1;
    let timestamp = i128::from(previous.timestamp()) + elapsed;
    Ok(i32::try_from(timestamp).ok())
}

/// Assembles and signs a block on top of `previous`.
pub struct BlockBuilder<'a> {
    previous: &'a Block,
    version: i32,
    transactions: Vec<Arc<Transaction>>,
}

impl<'a> BlockBuilder<'a> {
    pub fn new(previous: &'a Block) -> Self {
        Self {
            previous,
            version: 2,
            transactions: Vec::new(),
        }
    }

    pub fn version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    pub fn transactions(mut self, transactions: Vec<Arc<Transaction>>) -> Self {
        self.transactions = transactions;
        self
    }

    /// Orders transactions by id and keeps those that fit the block limits
    /// and whose totals stay representable.
    fn select(&mut self) -> (Vec<Arc<Transaction>>, i32, i32) {
        let mut candidates = std::mem::take(&mut self.transactions);
        candidates.sort_by_key(|tx| tx.id());

        let mut selected = Vec::new();
        let (mut total_amount, mut total_fee) = (0i32, 0i32);
        for tx in candidates {
            if selected.len() == MAX_NUMBER_OF_TRANSACTIONS
                || (selected.len() + 1) * TRANSACTION_BYTES_LEN > MAX_PAYLOAD_LENGTH as usize
            {
                break;
            }
            let (Some(amount), Some(fee)) = (
                total_amount.checked_add(tx.amount()),
                total_fee.checked_add(tx.fee()),
            ) else {
                continue;
            };
            total_amount = amount;
            total_fee = fee;
            selected.push(tx);
        }
        (selected, total_amount, total_fee)
    }

    pub fn build(mut self, secret_phrase: &str, timestamp: i32) -> Result<Block, BlockError> {
        let public_key = crypto::public_key(secret_phrase)?;
        let (transactions, total_amount, total_fee) = self.select();

        let mut payload = crypto::sha256();
        for tx in &transactions {
            tx.encode(&mut payload);
        }

        let (generation_signature, _) =
            generation_hash(self.previous, &public_key, secret_phrase, self.version)?;
        let previous_block_hash =
            (self.version > 1).then(|| crypto::digest(&self.previous.to_bytes()));

        let header = BlockHeader {
            version: self.version,
            timestamp,
            previous_block_id: Some(self.previous.id()?),
            total_amount,
            total_fee,
            payload_length: (transactions.len() * TRANSACTION_BYTES_LEN) as i32,
            payload_hash: payload.finalize().into(),
            generator_public_key: public_key,
            generation_signature,
            previous_block_hash,
        };
        let block = Block::new(header, transactions, None)?;
        block.sign(secret_phrase)?;
        Ok(block)
    }
}

/// Signed and linked first block of a chain.
pub fn genesis_block(secret_phrase: &str, version: i32) -> Result<Block, BlockError> {
    let header = BlockHeader {
        version,
        timestamp: 0,
        previous_block_id: None,
        total_amount: 0,
        total_fee: 0,
        payload_length: 0,
        payload_hash: crypto::digest(&[]),
        generator_public_key: crypto::public_key(secret_phrase)?,
        generation_signature: vec![0u8; generation_signature_len(version)],
        previous_block_hash: (version > 1).then_some([0u8; 32]),
    };
    let block = Block::new(header, vec![], None)?;
    block.sign(secret_phrase)?;
    block.set_previous(None)?;
    Ok(block)
}

/// Forges the next block at the earliest timestamp the account is eligible for.
///
/// Returns `None` when the account holds no stake.
pub fn forge_next<L: AccountLedger + ?Sized>(
    previous: &Block,
    secret_phrase: &str,
    ledger: &L,
    transactions: Vec<Arc<Transaction>>,
    version: i32,
) -> Result<Option<Block>, BlockError> {
    let public_key = crypto::public_key(secret_phrase)?;
    let (_, hash) = generation_hash(previous, &public_key, secret_phrase, version)?;
    let effective_balance = ledger.effective_balance(ledger.id_from_public_key(&public_key));
    let Some(timestamp) = earliest_timestamp(previous, blockchain::hit(&hash), effective_balance)? else {
        return Ok(None);
    };
    BlockBuilder::new(previous)
        .version(version)
        .transactions(transactions)
        .build(secret_phrase, timestamp)
        .map(Some)
}
