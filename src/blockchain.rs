//! Blocks: fixed-layout encoding, identity, signing and the forging rules.
//!
//! A [`Block`] is immutable once built. Its chain metadata (height, base
//! target, cumulative difficulty) lives in write-once cells filled when the
//! block is linked to its predecessor; id, string id and generator id are
//! computed on first use and cached.

use num_bigint::{BigInt, BigUint};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use crate::account::{AccountId, AccountLedger};
use crate::chain::ChainState;
use crate::codec::{EncodeSink, Reader};
use crate::constants::{
    FEE_TO_BALANCE_SCALE, GENESIS_BLOCK_ID, HASH_LEN, INITIAL_BASE_TARGET,
    MAX_NUMBER_OF_TRANSACTIONS, MAX_PAYLOAD_LENGTH, SIGNATURE_LEN,
};
use crate::crypto::{self, HashBytes, PublicKeyBytes, SignatureBytes};
use crate::difficulty;
use crate::error::{BlockError, BlockOutOfOrder, StateError, ValidationError};
use crate::tx::{BlockLink, Transaction, TransactionRecord};

/// Encoded length of a block. Version 1 carries a 64-byte generation
/// signature; later versions carry a 32-byte one plus the previous block hash.
pub const BLOCK_BYTES_LEN: usize = 4 + 4 + 8 + 4 + 4 + 4 + 4 + 32 + 32 + (32 + 32) + 64;

/// Length of the generation signature for a block version.
pub fn generation_signature_len(version: i32) -> usize {
    if version == 1 {
        SIGNATURE_LEN
    } else {
        HASH_LEN
    }
}

/// Generation signature of a version 2+ block forged by `public_key` on top
/// of a block whose generation signature is `previous_generation_signature`.
pub fn generation_hash(previous_generation_signature: &[u8], public_key: &PublicKeyBytes) -> HashBytes {
    let mut hasher = crypto::sha256();
    hasher.write(previous_generation_signature);
    hasher.write(public_key);
    hasher.finalize().into()
}

/// First eight bytes of `hash`, little-endian.
pub fn hit(hash: &HashBytes) -> u64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(head)
}

/// Stake- and time-weighted forging target.
pub fn target(base_target: i64, effective_balance: i64, elapsed: i32) -> BigInt {
    BigInt::from(base_target) * BigInt::from(effective_balance) * BigInt::from(elapsed)
}

/// Header fields fixed when a block is assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    /// Seconds since the network epoch.
    pub timestamp: i32,
    pub previous_block_id: Option<i64>,
    pub total_amount: i32,
    pub total_fee: i32,
    pub payload_length: i32,
    pub payload_hash: HashBytes,
    pub generator_public_key: PublicKeyBytes,
    pub generation_signature: Vec<u8>,
    /// Hash of the previous block's bytes; only present when `version > 1`.
    pub previous_block_hash: Option<HashBytes>,
}

/// Chain metadata of a block that was linked before, e.g. when reloading a
/// stored chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedMetadata {
    pub height: u32,
    pub base_target: i64,
    pub cumulative_difficulty: BigUint,
    pub next_block_id: Option<i64>,
}

#[derive(Debug)]
pub struct Block {
    header: BlockHeader,
    transactions: Vec<Arc<Transaction>>,
    transaction_ids: Vec<i64>,
    block_signature: OnceLock<SignatureBytes>,

    id: OnceLock<i64>,
    string_id: OnceLock<String>,
    generator_id: OnceLock<AccountId>,
    height: OnceLock<u32>,
    base_target: OnceLock<i64>,
    cumulative_difficulty: OnceLock<BigUint>,
    next_block_id: RwLock<Option<i64>>,
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header
            && self.block_signature.get() == other.block_signature.get()
            && self.transaction_ids == other.transaction_ids
    }
}

impl Eq for Block {}

impl Block {
    /// Builds a block, checking the structural invariants.
    ///
    /// Transactions must be sorted by id; equal neighbouring ids are allowed.
    pub fn new(
        header: BlockHeader,
        transactions: Vec<Arc<Transaction>>,
        block_signature: Option<SignatureBytes>,
    ) -> Result<Self, ValidationError> {
        if transactions.len() > MAX_NUMBER_OF_TRANSACTIONS {
            return Err(ValidationError::TooManyTransactions {
                count: transactions.len(),
                max: MAX_NUMBER_OF_TRANSACTIONS,
            });
        }
        if header.payload_length < 0 || header.payload_length > MAX_PAYLOAD_LENGTH {
            return Err(ValidationError::InvalidPayloadLength(header.payload_length));
        }
        if header.version < 1 {
            return Err(ValidationError::UnsupportedVersion(header.version));
        }
        let expected = generation_signature_len(header.version);
        if header.generation_signature.len() != expected {
            return Err(ValidationError::InvalidGenerationSignatureLength {
                version: header.version,
                expected,
                actual: header.generation_signature.len(),
            });
        }
        if (header.version > 1) != header.previous_block_hash.is_some() {
            return Err(ValidationError::PreviousBlockHashMismatch(header.version));
        }

        let mut transaction_ids = Vec::with_capacity(transactions.len());
        let mut previous = i64::MIN;
        for tx in &transactions {
            let current = tx.id();
            if current < previous {
                return Err(ValidationError::UnsortedTransactions { previous, current });
            }
            transaction_ids.push(current);
            previous = current;
        }

        let signature = OnceLock::new();
        if let Some(sig) = block_signature {
            let _ = signature.set(sig);
        }

        Ok(Self {
            header,
            transactions,
            transaction_ids,
            block_signature: signature,
            id: OnceLock::new(),
            string_id: OnceLock::new(),
            generator_id: OnceLock::new(),
            height: OnceLock::new(),
            base_target: OnceLock::new(),
            cumulative_difficulty: OnceLock::new(),
            next_block_id: RwLock::new(None),
        })
    }

    /// Rebuilds a block together with metadata computed when it was first linked.
    pub fn restore(
        header: BlockHeader,
        transactions: Vec<Arc<Transaction>>,
        block_signature: SignatureBytes,
        metadata: LinkedMetadata,
    ) -> Result<Self, ValidationError> {
        let block = Self::new(header, transactions, Some(block_signature))?;
        let _ = block.height.set(metadata.height);
        let _ = block.base_target.set(metadata.base_target);
        let _ = block.cumulative_difficulty.set(metadata.cumulative_difficulty);
        *block.next_block_id.write() = metadata.next_block_id;
        Ok(block)
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn version(&self) -> i32 {
        self.header.version
    }

    pub fn timestamp(&self) -> i32 {
        self.header.timestamp
    }

    pub fn previous_block_id(&self) -> Option<i64> {
        self.header.previous_block_id
    }

    pub fn generator_public_key(&self) -> &PublicKeyBytes {
        &self.header.generator_public_key
    }

    pub fn generation_signature(&self) -> &[u8] {
        &self.header.generation_signature
    }

    pub fn total_fee(&self) -> i32 {
        self.header.total_fee
    }

    pub fn transactions(&self) -> &[Arc<Transaction>] {
        &self.transactions
    }

    pub fn transaction_ids(&self) -> &[i64] {
        &self.transaction_ids
    }

    pub fn block_signature(&self) -> Option<&SignatureBytes> {
        self.block_signature.get()
    }

    pub fn next_block_id(&self) -> Option<i64> {
        *self.next_block_id.read()
    }

    pub fn set_next_block_id(&self, id: Option<i64>) {
        *self.next_block_id.write() = id;
    }

    fn encode_unsigned<S: EncodeSink>(&self, out: &mut S) {
        let h = &self.header;
        out.put_i32(h.version);
        out.put_i32(h.timestamp);
        out.put_i64(h.previous_block_id.unwrap_or(0));
        out.put_i32(self.transactions.len() as i32);
        out.put_i32(h.total_amount);
        out.put_i32(h.total_fee);
        out.put_i32(h.payload_length);
        out.write(&h.payload_hash);
        out.write(&h.generator_public_key);
        out.write(&h.generation_signature);
        if let Some(previous_block_hash) = &h.previous_block_hash {
            out.write(previous_block_hash);
        }
    }

    /// Writes the consensus layout. An unsigned block has a zeroed signature slot.
    pub fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.encode_unsigned(out);
        out.write(self.block_signature.get().unwrap_or(&[0u8; SIGNATURE_LEN]));
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BLOCK_BYTES_LEN);
        self.encode(&mut buf);
        buf
    }

    /// The signed prefix: every byte except the trailing signature.
    fn signing_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BLOCK_BYTES_LEN - SIGNATURE_LEN);
        self.encode_unsigned(&mut buf);
        buf
    }

    /// Decodes the fixed layout. Transaction bodies travel separately and
    /// their number must match the encoded count.
    pub fn from_bytes(bytes: &[u8], transactions: Vec<Arc<Transaction>>) -> Result<Self, BlockError> {
        let mut r = Reader::new(bytes);
        let version = r.read_i32()?;
        let timestamp = r.read_i32()?;
        let previous_block_id = match r.read_i64()? {
            0 => None,
            id => Some(id),
        };
        let count = r.read_i32()?;
        let total_amount = r.read_i32()?;
        let total_fee = r.read_i32()?;
        let payload_length = r.read_i32()?;
        let payload_hash = r.read_array()?;
        let generator_public_key = r.read_array()?;
        let generation_signature = r.read_bytes(generation_signature_len(version))?.to_vec();
        let previous_block_hash = if version > 1 {
            Some(r.read_array()?)
        } else {
            None
        };
        let signature: SignatureBytes = r.read_array()?;
        r.finish()?;

        if usize::try_from(count).ok() != Some(transactions.len()) {
            return Err(ValidationError::TransactionCountMismatch {
                declared: count.max(0) as usize,
                supplied: transactions.len(),
            }
            .into());
        }

        let header = BlockHeader {
            version,
            timestamp,
            previous_block_id,
            total_amount,
            total_fee,
            payload_length,
            payload_hash,
            generator_public_key,
            generation_signature,
            previous_block_hash,
        };
        let signature = (signature != [0u8; SIGNATURE_LEN]).then_some(signature);
        Ok(Self::new(header, transactions, signature)?)
    }

    /// Block id: the first eight bytes of SHA-256 over the signed encoding.
    pub fn id(&self) -> Result<i64, StateError> {
        if let Some(id) = self.id.get() {
            return Ok(*id);
        }
        if self.block_signature.get().is_none() {
            return Err(StateError::NotSigned);
        }
        let mut hasher = crypto::sha256();
        self.encode(&mut hasher);
        let digest: HashBytes = hasher.finalize().into();
        Ok(*self.id.get_or_init(|| crypto::id_from_digest(&digest)))
    }

    /// Unsigned decimal rendering of the id.
    pub fn string_id(&self) -> Result<&str, StateError> {
        let id = self.id()?;
        Ok(self.string_id.get_or_init(|| (id as u64).to_string()))
    }

    pub fn generator_id<L: AccountLedger + ?Sized>(&self, ledger: &L) -> AccountId {
        *self
            .generator_id
            .get_or_init(|| ledger.id_from_public_key(&self.header.generator_public_key))
    }

    pub fn height(&self) -> Result<u32, StateError> {
        self.height.get().copied().ok_or(StateError::HeightNotSet)
    }

    pub fn base_target(&self) -> Result<i64, StateError> {
        self.base_target.get().copied().ok_or(StateError::NotLinked)
    }

    pub fn cumulative_difficulty(&self) -> Result<&BigUint, StateError> {
        self.cumulative_difficulty.get().ok_or(StateError::NotLinked)
    }

    /// Signs the block. A block can be signed once.
    pub fn sign(&self, secret_phrase: &str) -> Result<(), BlockError> {
        if self.block_signature.get().is_some() {
            return Err(StateError::AlreadySigned.into());
        }
        let signature = crypto::sign(&self.signing_payload(), secret_phrase)?;
        self.block_signature
            .set(signature)
            .map_err(|_| StateError::AlreadySigned)?;
        Ok(())
    }

    /// Checks the block signature and pins the generator's public key to its account.
    pub fn verify_block_signature<L: AccountLedger + ?Sized>(&self, ledger: &L) -> bool {
        let account = self.generator_id(ledger);
        if !ledger.contains_account(account) {
            return false;
        }
        let Some(signature) = self.block_signature.get() else {
            return false;
        };
        crypto::verify(
            signature,
            &self.signing_payload(),
            &self.header.generator_public_key,
        ) && ledger.set_or_verify_generating_key(
            account,
            &self.header.generator_public_key,
            self.height.get().copied(),
        )
    }

    /// Checks that the generator was entitled to forge this block.
    ///
    /// A missing previous block is the only error; every other failure,
    /// including internal ones, reports `false`.
    pub fn verify_generation_signature<L, C>(&self, ledger: &L, chain: &C) -> Result<bool, BlockOutOfOrder>
    where
        L: AccountLedger + ?Sized,
        C: ChainState + ?Sized,
    {
        let previous = self
            .header
            .previous_block_id
            .and_then(|id| chain.block(id))
            .ok_or(BlockOutOfOrder {
                previous_block_id: self.header.previous_block_id,
            })?;

        match self.check_generation_signature(&previous, ledger) {
            Ok(eligible) => Ok(eligible),
            Err(e) => {
                warn!(error = %e, "error verifying block generation signature");
                Ok(false)
            }
        }
    }

    fn check_generation_signature<L: AccountLedger + ?Sized>(
        &self,
        previous: &Block,
        ledger: &L,
    ) -> Result<bool, StateError> {
        let account = self.generator_id(ledger);
        let effective_balance = if ledger.contains_account(account) {
            ledger.effective_balance(account)
        } else {
            0
        };
        if effective_balance <= 0 {
            return Ok(false);
        }

        let elapsed = self.header.timestamp.wrapping_sub(previous.header.timestamp);
        let target = target(previous.base_target()?, effective_balance, elapsed);

        let generation_hash = if self.header.version == 1 {
            if !crypto::verify(
                &self.header.generation_signature,
                &previous.header.generation_signature,
                &self.header.generator_public_key,
            ) {
                return Ok(false);
            }
            crypto::digest(&self.header.generation_signature)
        } else {
            let expected = generation_hash(
                &previous.header.generation_signature,
                &self.header.generator_public_key,
            );
            if self.header.generation_signature != expected {
                return Ok(false);
            }
            expected
        };

        Ok(BigInt::from(hit(&generation_hash)) < target)
    }

    fn is_genesis(&self) -> bool {
        self.header.previous_block_id.is_none() && self.id().ok() == Some(GENESIS_BLOCK_ID)
    }

    /// Links the block to its predecessor (`None` for genesis), fixing height,
    /// base target and cumulative difficulty. Runs once per block.
    pub fn set_previous(&self, previous: Option<&Block>) -> Result<(), BlockError> {
        if self.height.get().is_some() {
            return Err(StateError::AlreadyLinked.into());
        }
        let height = match previous {
            Some(previous) => {
                let previous_id = previous.id()?;
                if self.header.previous_block_id != Some(previous_id) {
                    return Err(ValidationError::PreviousBlockMismatch {
                        declared: self.header.previous_block_id,
                        actual: previous_id,
                    }
                    .into());
                }
                previous.height()? + 1
            }
            None => 0,
        };
        let (base_target, cumulative_difficulty) = self.calculate_base_target(previous)?;
        let link = if self.transactions.is_empty() {
            None
        } else {
            Some(BlockLink {
                block_id: self.id()?,
                height,
            })
        };

        self.height
            .set(height)
            .map_err(|_| StateError::AlreadyLinked)?;
        let _ = self.base_target.set(base_target);
        let _ = self.cumulative_difficulty.set(cumulative_difficulty);

        if let Some(link) = link {
            for tx in &self.transactions {
                tx.set_block(link);
            }
        }
        info!(
            id = ?self.id().ok().map(|id| id as u64),
            height,
            base_target,
            "block linked"
        );
        Ok(())
    }

    fn calculate_base_target(&self, previous: Option<&Block>) -> Result<(i64, BigUint), StateError> {
        match previous {
            Some(previous) if !self.is_genesis() => {
                let elapsed = self.header.timestamp.wrapping_sub(previous.header.timestamp);
                let base_target =
                    difficulty::next_base_target(previous.base_target()?, i64::from(elapsed));
                let cumulative_difficulty = difficulty::next_cumulative_difficulty(
                    previous.cumulative_difficulty()?,
                    base_target,
                );
                Ok((base_target, cumulative_difficulty))
            }
            _ => Ok((INITIAL_BASE_TARGET, BigUint::default())),
        }
    }

    fn fee_credit(&self) -> i64 {
        i64::from(self.header.total_fee) * FEE_TO_BALANCE_SCALE
    }

    /// Credits the block fees to the generator and records its key binding.
    pub fn apply<L: AccountLedger + ?Sized>(&self, ledger: &L) -> Result<(), BlockError> {
        let height = self.height()?;
        let account = ledger.add_or_get_account(self.generator_id(ledger));
        if !ledger.apply_generating_key(account, &self.header.generator_public_key, height) {
            return Err(StateError::GeneratingKeyMismatch(account).into());
        }
        ledger.adjust_balance_and_unconfirmed_balance(account, self.fee_credit());
        Ok(())
    }

    /// Reverts [`Block::apply`] and detaches the block's transactions.
    pub fn undo<L: AccountLedger + ?Sized>(&self, ledger: &L) -> Result<(), BlockError> {
        let height = self.height()?;
        let account = self.generator_id(ledger);
        ledger.undo_generating_key(account, height);
        ledger.adjust_balance_and_unconfirmed_balance(account, -self.fee_credit());
        for tx in &self.transactions {
            tx.clear_block();
        }
        Ok(())
    }

    pub fn to_record(&self) -> BlockRecord {
        let h = &self.header;
        BlockRecord {
            version: h.version,
            timestamp: h.timestamp,
            previous_block: h.previous_block_id.map(|id| (id as u64).to_string()),
            number_of_transactions: self.transactions.len(),
            total_amount: h.total_amount,
            total_fee: h.total_fee,
            payload_length: h.payload_length,
            payload_hash: hex::encode(h.payload_hash),
            generator_public_key: hex::encode(h.generator_public_key),
            generation_signature: hex::encode(&h.generation_signature),
            previous_block_hash: h.previous_block_hash.map(hex::encode).unwrap_or_default(),
            block_signature: self.block_signature.get().map(hex::encode).unwrap_or_default(),
            transactions: self.transactions.iter().map(|tx| tx.to_record()).collect(),
        }
    }

    /// Builds a block from its interchange record; `None` if the record is
    /// malformed or describes an invalid block.
    pub fn from_record(record: BlockRecord) -> Option<Self> {
        let previous_block_id = match record.previous_block.as_deref() {
            None | Some("") | Some("0") => None,
            Some(s) => Some(s.parse::<u64>().ok()? as i64),
        };
        let previous_block_hash = match record.previous_block_hash.as_str() {
            "" => None,
            s => Some(decode_hex_array(s)?),
        };
        let block_signature = match record.block_signature.as_str() {
            "" => None,
            s => Some(decode_hex_array(s)?),
        };
        if record.number_of_transactions != record.transactions.len() {
            return None;
        }
        let transactions = record
            .transactions
            .into_iter()
            .map(|tx| Transaction::from_record(tx).map(Arc::new))
            .collect::<Option<Vec<_>>>()?;
        let header = BlockHeader {
            version: record.version,
            timestamp: record.timestamp,
            previous_block_id,
            total_amount: record.total_amount,
            total_fee: record.total_fee,
            payload_length: record.payload_length,
            payload_hash: decode_hex_array(&record.payload_hash)?,
            generator_public_key: decode_hex_array(&record.generator_public_key)?,
            generation_signature: hex::decode(&record.generation_signature).ok()?,
            previous_block_hash,
        };
        Self::new(header, transactions, block_signature).ok()
    }

    pub fn from_json(json: &str) -> Option<Self> {
        Self::from_record(serde_json::from_str(json).ok()?)
    }
}

fn decode_hex_array<const N: usize>(s: &str) -> Option<[u8; N]> {
    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out).ok()?;
    Some(out)
}

/// Interchange form of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub version: i32,
    pub timestamp: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_block: Option<String>,
    pub number_of_transactions: usize,
    pub total_amount: i32,
    pub total_fee: i32,
    pub payload_length: i32,
    pub payload_hash: String,
    pub generator_public_key: String,
    pub generation_signature: String,
    pub previous_block_hash: String,
    pub block_signature: String,
    pub transactions: Vec<TransactionRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::InMemoryLedger;
    use crate::chain::InMemoryChain;
    use crate::constants::MAX_BASE_TARGET;
    use crate::tx::TransactionBody;

    const GENERATOR: &str = "generator secret";

    fn generator_key() -> PublicKeyBytes {
        crypto::public_key(GENERATOR).unwrap()
    }

    fn header(version: i32, timestamp: i32, previous_block_id: Option<i64>) -> BlockHeader {
        BlockHeader {
            version,
            timestamp,
            previous_block_id,
            total_amount: 0,
            total_fee: 0,
            payload_length: 0,
            payload_hash: [7u8; 32],
            generator_public_key: generator_key(),
            generation_signature: vec![1u8; generation_signature_len(version)],
            previous_block_hash: (version > 1).then_some([9u8; 32]),
        }
    }

    fn tx_with_id(id: i64) -> Arc<Transaction> {
        let body = TransactionBody {
            tx_type: 0,
            subtype: 0,
            timestamp: 0,
            deadline: 60,
            sender_public_key: generator_key(),
            recipient_id: 1,
            amount: 1,
            fee: 1,
            referenced_transaction_id: None,
        };
        Arc::new(body.sign(GENERATOR).unwrap().with_id(id))
    }

    fn signed(header: BlockHeader) -> Block {
        let block = Block::new(header, vec![], None).unwrap();
        block.sign(GENERATOR).unwrap();
        block
    }

    fn genesis() -> Arc<Block> {
        let block = signed(header(2, 0, None));
        block.set_previous(None).unwrap();
        Arc::new(block)
    }

    /// Builds a version 2 child of `previous` whose generation signature is
    /// the deterministic one for the generator key.
    fn child(previous: &Block, timestamp: i32) -> Block {
        let mut h = header(2, timestamp, Some(previous.id().unwrap()));
        h.generation_signature =
            generation_hash(previous.generation_signature(), &generator_key()).to_vec();
        signed(h)
    }

    #[test]
    fn unsorted_transactions_are_rejected() {
        let result = Block::new(header(1, 0, None), vec![tx_with_id(5), tx_with_id(3)], None);
        assert_eq!(
            result.unwrap_err(),
            ValidationError::UnsortedTransactions {
                previous: 5,
                current: 3
            }
        );
    }

    #[test]
    fn equal_neighbouring_ids_are_allowed() {
        let block = Block::new(
            header(1, 0, None),
            vec![tx_with_id(3), tx_with_id(3), tx_with_id(5)],
            None,
        )
        .unwrap();
        assert_eq!(block.transaction_ids(), &[3, 3, 5]);
    }

    #[test]
    fn too_many_transactions_are_rejected() {
        let txs = (0..=MAX_NUMBER_OF_TRANSACTIONS as i64).map(tx_with_id).collect();
        assert!(matches!(
            Block::new(header(1, 0, None), txs, None),
            Err(ValidationError::TooManyTransactions { .. })
        ));
    }

    #[test]
    fn payload_length_is_bounded() {
        let mut h = header(1, 0, None);
        h.payload_length = -1;
        assert_eq!(
            Block::new(h.clone(), vec![], None).unwrap_err(),
            ValidationError::InvalidPayloadLength(-1)
        );
        h.payload_length = MAX_PAYLOAD_LENGTH + 1;
        assert!(Block::new(h.clone(), vec![], None).is_err());
        h.payload_length = MAX_PAYLOAD_LENGTH;
        assert!(Block::new(h, vec![], None).is_ok());
    }

    #[test]
    fn layout_must_match_version() {
        let mut h = header(2, 0, None);
        h.generation_signature = vec![0u8; 64];
        assert!(matches!(
            Block::new(h, vec![], None),
            Err(ValidationError::InvalidGenerationSignatureLength { expected: 32, .. })
        ));

        let mut h = header(2, 0, None);
        h.previous_block_hash = None;
        assert_eq!(
            Block::new(h, vec![], None).unwrap_err(),
            ValidationError::PreviousBlockHashMismatch(2)
        );

        let mut h = header(1, 0, None);
        h.previous_block_hash = Some([0u8; 32]);
        assert!(Block::new(h, vec![], None).is_err());

        assert_eq!(
            Block::new(header(0, 0, None), vec![], None).unwrap_err(),
            ValidationError::UnsupportedVersion(0)
        );
    }

    #[test]
    fn encoding_has_fixed_layout() {
        let mut h = header(1, 77, Some(-2));
        h.total_amount = 10;
        h.total_fee = 3;
        h.payload_length = 256;
        let block = Block::new(h, vec![tx_with_id(1)], None).unwrap();
        let bytes = block.to_bytes();

        assert_eq!(bytes.len(), BLOCK_BYTES_LEN);
        assert_eq!(&bytes[0..4], &1i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &77i32.to_le_bytes());
        assert_eq!(&bytes[8..16], &(-2i64).to_le_bytes());
        assert_eq!(&bytes[16..20], &1i32.to_le_bytes());
        assert_eq!(&bytes[20..24], &10i32.to_le_bytes());
        assert_eq!(&bytes[24..28], &3i32.to_le_bytes());
        assert_eq!(&bytes[28..32], &256i32.to_le_bytes());
        assert_eq!(&bytes[32..64], &[7u8; 32]);
        assert_eq!(&bytes[64..96], &generator_key());
        assert_eq!(&bytes[96..160], &[1u8; 64][..]);
        assert_eq!(&bytes[160..], &[0u8; 64][..]);
    }

    #[test]
    fn version_two_appends_previous_hash() {
        let block = signed(header(2, 0, None));
        let bytes = block.to_bytes();
        assert_eq!(bytes.len(), BLOCK_BYTES_LEN);
        assert_eq!(&bytes[96..128], &[1u8; 32]);
        assert_eq!(&bytes[128..160], &[9u8; 32]);
        assert_eq!(&bytes[160..], block.block_signature().unwrap());
    }

    #[test]
    fn encoding_is_deterministic() {
        let block = signed(header(2, 5, Some(1)));
        assert_eq!(block.to_bytes(), block.to_bytes());
        let again = signed(header(2, 5, Some(1)));
        assert_eq!(block.to_bytes(), again.to_bytes());
    }

    #[test]
    fn from_bytes_reproduces_fields() {
        for version in [1, 2] {
            let txs = vec![tx_with_id(2), tx_with_id(9)];
            let mut h = header(version, 1234, Some(i64::MIN));
            h.total_amount = 50;
            h.total_fee = 2;
            h.payload_length = 256;
            let block = Block::new(h, txs.clone(), None).unwrap();
            block.sign(GENERATOR).unwrap();

            let decoded = Block::from_bytes(&block.to_bytes(), txs).unwrap();
            assert_eq!(decoded, block);
            assert_eq!(decoded.header(), block.header());
            assert_eq!(decoded.id().unwrap(), block.id().unwrap());
        }
    }

    #[test]
    fn from_bytes_checks_transaction_count() {
        let block = Block::new(header(1, 0, None), vec![tx_with_id(1)], None).unwrap();
        assert!(matches!(
            Block::from_bytes(&block.to_bytes(), vec![]),
            Err(BlockError::Validation(ValidationError::TransactionCountMismatch {
                declared: 1,
                supplied: 0
            }))
        ));
        assert!(matches!(
            Block::from_bytes(&block.to_bytes()[..100], vec![]),
            Err(BlockError::Decode(_))
        ));
    }

    #[test]
    fn unsigned_block_decodes_unsigned() {
        let block = Block::new(header(2, 0, None), vec![], None).unwrap();
        let decoded = Block::from_bytes(&block.to_bytes(), vec![]).unwrap();
        assert!(decoded.block_signature().is_none());
    }

    #[test]
    fn id_requires_signature() {
        let block = Block::new(header(1, 0, None), vec![], None).unwrap();
        assert_eq!(block.id(), Err(StateError::NotSigned));
        assert_eq!(block.string_id(), Err(StateError::NotSigned));
    }

    #[test]
    fn id_is_idempotent_and_derived_from_bytes() {
        let block = signed(header(1, 0, None));
        let id = block.id().unwrap();
        assert_eq!(block.id().unwrap(), id);
        assert_eq!(id, crypto::id_from_digest(&crypto::digest(&block.to_bytes())));
        assert_eq!(block.string_id().unwrap(), (id as u64).to_string());
        assert!(!block.string_id().unwrap().starts_with('-'));
    }

    #[test]
    fn sign_twice_fails() {
        let block = signed(header(1, 0, None));
        assert!(matches!(
            block.sign(GENERATOR),
            Err(BlockError::State(StateError::AlreadySigned))
        ));
    }

    #[test]
    fn signature_verifies_for_known_generator() {
        let ledger = InMemoryLedger::new();
        let block = signed(header(2, 0, None));
        assert!(!block.verify_block_signature(&ledger));

        let account = ledger.fund(&generator_key(), 100);
        assert!(block.verify_block_signature(&ledger));
        assert_eq!(
            ledger.account(account).unwrap().public_key,
            Some(generator_key())
        );
    }

    #[test]
    fn signature_from_wrong_key_fails() {
        let ledger = InMemoryLedger::new();
        ledger.fund(&generator_key(), 100);
        let block = Block::new(header(2, 0, None), vec![], None).unwrap();
        block.sign("someone else").unwrap();
        assert!(!block.verify_block_signature(&ledger));
    }

    /// Maps every public key to one account, so two keys compete for it.
    struct SharedAccountLedger(InMemoryLedger);

    const SHARED_ACCOUNT: AccountId = 1;

    impl AccountLedger for SharedAccountLedger {
        fn id_from_public_key(&self, _: &PublicKeyBytes) -> AccountId {
            SHARED_ACCOUNT
        }

        fn contains_account(&self, id: AccountId) -> bool {
            self.0.contains_account(id)
        }

        fn resolve_by_public_key(&self, _: &PublicKeyBytes) -> Option<AccountId> {
            self.0.contains_account(SHARED_ACCOUNT).then_some(SHARED_ACCOUNT)
        }

        fn add_or_get_account(&self, id: AccountId) -> AccountId {
            self.0.add_or_get_account(id)
        }

        fn effective_balance(&self, id: AccountId) -> i64 {
            self.0.effective_balance(id)
        }

        fn unconfirmed_balance(&self, id: AccountId) -> i64 {
            self.0.unconfirmed_balance(id)
        }

        fn adjust_unconfirmed_balance(&self, id: AccountId, delta: i64) {
            self.0.adjust_unconfirmed_balance(id, delta)
        }

        fn adjust_confirmed_balance(&self, id: AccountId, delta: i64) {
            self.0.adjust_confirmed_balance(id, delta)
        }

        fn set_or_verify_generating_key(
            &self,
            id: AccountId,
            public_key: &PublicKeyBytes,
            height: Option<u32>,
        ) -> bool {
            self.0.set_or_verify_generating_key(id, public_key, height)
        }

        fn apply_generating_key(&self, id: AccountId, public_key: &PublicKeyBytes, height: u32) -> bool {
            self.0.apply_generating_key(id, public_key, height)
        }

        fn undo_generating_key(&self, id: AccountId, height: u32) {
            self.0.undo_generating_key(id, height)
        }
    }

    #[test]
    fn signature_fails_when_account_is_pinned_to_another_key() {
        let ledger = SharedAccountLedger(InMemoryLedger::new());
        ledger.add_or_get_account(SHARED_ACCOUNT);

        let first = signed(header(2, 0, None));
        first.set_previous(None).unwrap();
        assert!(first.verify_block_signature(&ledger));
        first.apply(&ledger).unwrap();

        let mut h = header(2, 10, Some(first.id().unwrap()));
        h.generator_public_key = crypto::public_key("intruder").unwrap();
        let second = Block::new(h, vec![], None).unwrap();
        second.sign("intruder").unwrap();

        let fresh = SharedAccountLedger(InMemoryLedger::new());
        fresh.add_or_get_account(SHARED_ACCOUNT);
        assert!(second.verify_block_signature(&fresh));
        assert!(!second.verify_block_signature(&ledger));
    }

    #[test]
    fn height_is_unset_until_linked() {
        let block = signed(header(2, 0, None));
        assert_eq!(block.height(), Err(StateError::HeightNotSet));
        assert_eq!(block.base_target(), Err(StateError::NotLinked));
    }

    #[test]
    fn genesis_gets_initial_metadata() {
        let genesis = genesis();
        assert_eq!(genesis.height().unwrap(), 0);
        assert_eq!(genesis.base_target().unwrap(), INITIAL_BASE_TARGET);
        assert_eq!(genesis.cumulative_difficulty().unwrap(), &BigUint::default());
    }

    #[test]
    fn child_recalculates_base_target() {
        let genesis = genesis();
        let block = child(&genesis, 30);
        block.set_previous(Some(&genesis)).unwrap();

        assert_eq!(block.height().unwrap(), 1);
        let expected = difficulty::next_base_target(INITIAL_BASE_TARGET, 30);
        assert_eq!(expected, INITIAL_BASE_TARGET / 2);
        assert_eq!(block.base_target().unwrap(), expected);
        assert_eq!(
            block.cumulative_difficulty().unwrap(),
            &difficulty::block_difficulty(expected)
        );
    }

    #[test]
    fn slow_child_is_bounded() {
        let genesis = genesis();
        let block = child(&genesis, 10_000_000);
        block.set_previous(Some(&genesis)).unwrap();
        assert_eq!(block.base_target().unwrap(), INITIAL_BASE_TARGET * 2);
        assert!(block.base_target().unwrap() <= MAX_BASE_TARGET);
    }

    #[test]
    fn set_previous_rejects_wrong_parent() {
        let genesis = genesis();
        let block = signed(header(2, 10, Some(12345)));
        assert!(matches!(
            block.set_previous(Some(&genesis)),
            Err(BlockError::Validation(ValidationError::PreviousBlockMismatch { .. }))
        ));
        assert_eq!(block.height(), Err(StateError::HeightNotSet));
    }

    #[test]
    fn set_previous_runs_once() {
        let genesis = genesis();
        assert!(matches!(
            genesis.set_previous(None),
            Err(BlockError::State(StateError::AlreadyLinked))
        ));
    }

    #[test]
    fn set_previous_links_transactions() {
        let tx = tx_with_id(4);
        let block = Block::new(header(2, 0, None), vec![Arc::clone(&tx)], None).unwrap();
        block.sign(GENERATOR).unwrap();
        block.set_previous(None).unwrap();
        assert_eq!(
            tx.block(),
            Some(BlockLink {
                block_id: block.id().unwrap(),
                height: 0
            })
        );
    }

    #[test]
    fn failed_link_leaves_block_unlinked() {
        let tx = tx_with_id(4);
        let block = Block::new(header(2, 0, None), vec![Arc::clone(&tx)], None).unwrap();
        assert!(matches!(
            block.set_previous(None),
            Err(BlockError::State(StateError::NotSigned))
        ));
        assert_eq!(block.height(), Err(StateError::HeightNotSet));
        assert_eq!(block.base_target(), Err(StateError::NotLinked));
        assert_eq!(tx.block(), None);

        block.sign(GENERATOR).unwrap();
        block.set_previous(None).unwrap();
        assert_eq!(block.height().unwrap(), 0);
        assert_eq!(tx.block().map(|link| link.block_id), Some(block.id().unwrap()));
    }

    #[test]
    fn undo_detaches_transactions() {
        let ledger = InMemoryLedger::new();
        ledger.fund(&generator_key(), 100);
        let tx = tx_with_id(4);
        let block = Block::new(header(2, 0, None), vec![Arc::clone(&tx)], None).unwrap();
        block.sign(GENERATOR).unwrap();
        block.set_previous(None).unwrap();
        block.apply(&ledger).unwrap();
        assert!(tx.block().is_some());

        block.undo(&ledger).unwrap();
        assert_eq!(tx.block(), None);
    }

    #[test]
    fn restore_keeps_metadata() {
        let metadata = LinkedMetadata {
            height: 9,
            base_target: 77,
            cumulative_difficulty: BigUint::from(1234u32),
            next_block_id: Some(3),
        };
        let block = Block::restore(header(2, 0, Some(1)), vec![], [5u8; 64], metadata).unwrap();
        assert_eq!(block.height().unwrap(), 9);
        assert_eq!(block.base_target().unwrap(), 77);
        assert_eq!(block.next_block_id(), Some(3));
        assert!(block.set_previous(None).is_err());
    }

    #[test]
    fn generation_signature_needs_previous_block() {
        let ledger = InMemoryLedger::new();
        let chain = InMemoryChain::new();
        let block = signed(header(2, 10, Some(42)));
        assert_eq!(
            block.verify_generation_signature(&ledger, &chain),
            Err(BlockOutOfOrder {
                previous_block_id: Some(42)
            })
        );
    }

    #[test]
    fn zero_effective_balance_is_ineligible() {
        let ledger = InMemoryLedger::new();
        let chain = InMemoryChain::new();
        let genesis = genesis();
        chain.push(Arc::clone(&genesis)).unwrap();
        ledger.fund(&generator_key(), 99);

        let block = child(&genesis, 1_000_000);
        assert_eq!(block.verify_generation_signature(&ledger, &chain), Ok(false));
    }

    #[test]
    fn eligibility_follows_hit_and_target() {
        let ledger = InMemoryLedger::new();
        let chain = InMemoryChain::new();
        let genesis = genesis();
        chain.push(Arc::clone(&genesis)).unwrap();
        let effective = 1_000_000_000i64;
        ledger.fund(&generator_key(), effective * 100);

        let gen_hash = generation_hash(genesis.generation_signature(), &generator_key());
        let per_second = INITIAL_BASE_TARGET as u128 * effective as u128;
        let last_ineligible = (hit(&gen_hash) as u128 / per_second) as i32;

        let early = child(&genesis, last_ineligible);
        assert_eq!(early.verify_generation_signature(&ledger, &chain), Ok(false));
        let on_time = child(&genesis, last_ineligible + 1);
        assert_eq!(on_time.verify_generation_signature(&ledger, &chain), Ok(true));
    }

    #[test]
    fn wrong_generation_signature_is_ineligible() {
        let ledger = InMemoryLedger::new();
        let chain = InMemoryChain::new();
        let genesis = genesis();
        chain.push(Arc::clone(&genesis)).unwrap();
        ledger.fund(&generator_key(), 100_000_000_000);

        let block = signed(header(2, 1_000_000, Some(genesis.id().unwrap())));
        assert_eq!(block.verify_generation_signature(&ledger, &chain), Ok(false));
    }

    #[test]
    fn version_one_generation_signature_is_a_signature() {
        let ledger = InMemoryLedger::new();
        let chain = InMemoryChain::new();
        let genesis = signed(header(1, 0, None));
        genesis.set_previous(None).unwrap();
        let genesis = Arc::new(genesis);
        chain.push(Arc::clone(&genesis)).unwrap();
        ledger.fund(&generator_key(), 100_000_000_000);

        let previous_id = Some(genesis.id().unwrap());
        let mut h = header(1, i32::MAX, previous_id);
        h.generation_signature = crypto::sign(genesis.generation_signature(), GENERATOR)
            .unwrap()
            .to_vec();
        let block = signed(h);
        // i32::MAX seconds makes the target exceed any 64-bit hit
        assert_eq!(block.verify_generation_signature(&ledger, &chain), Ok(true));

        let mut h = header(1, i32::MAX, previous_id);
        h.generation_signature = crypto::sign(genesis.generation_signature(), "other")
            .unwrap()
            .to_vec();
        let forged = signed(h);
        assert_eq!(forged.verify_generation_signature(&ledger, &chain), Ok(false));
    }

    #[test]
    fn unlinked_previous_block_reports_false() {
        let ledger = InMemoryLedger::new();
        let chain = InMemoryChain::new();
        let genesis = genesis();
        chain.push(Arc::clone(&genesis)).unwrap();
        ledger.fund(&generator_key(), 100_000_000_000);

        // never linked, so it has no base target
        let orphan = Arc::new(child(&genesis, 60));
        let lookup = OrphanChain(Arc::clone(&orphan));
        let grandchild = child(&orphan, 120);
        assert_eq!(grandchild.verify_generation_signature(&ledger, &lookup), Ok(false));
    }

    struct OrphanChain(Arc<Block>);

    impl ChainState for OrphanChain {
        fn block(&self, id: i64) -> Option<Arc<Block>> {
            (self.0.id().ok() == Some(id)).then(|| Arc::clone(&self.0))
        }

        fn tip(&self) -> Option<Arc<Block>> {
            Some(Arc::clone(&self.0))
        }
    }

    #[test]
    fn apply_and_undo_move_fees() {
        let ledger = InMemoryLedger::new();
        let mut h = header(2, 0, None);
        h.total_fee = 7;
        let block = signed(h);
        block.set_previous(None).unwrap();

        block.apply(&ledger).unwrap();
        let account = ledger.account(block.generator_id(&ledger)).unwrap();
        assert_eq!(account.balance, 700);
        assert_eq!(account.unconfirmed_balance, 700);
        assert_eq!(account.key_height, Some(0));

        block.undo(&ledger).unwrap();
        let account = ledger.account(block.generator_id(&ledger)).unwrap();
        assert_eq!(account.balance, 0);
        assert_eq!(account.public_key, None);
    }

    #[test]
    fn apply_requires_height() {
        let ledger = InMemoryLedger::new();
        let block = signed(header(2, 0, None));
        assert!(matches!(
            block.apply(&ledger),
            Err(BlockError::State(StateError::HeightNotSet))
        ));
    }

    #[test]
    fn record_uses_interchange_names() {
        let v1 = signed(header(1, 3, None));
        let json = serde_json::to_value(v1.to_record()).unwrap();
        assert_eq!(json["previousBlockHash"], "");
        assert_eq!(json["numberOfTransactions"], 0);
        assert!(json.get("previousBlock").is_none());

        let v2 = signed(header(2, 3, Some(-1)));
        let json = serde_json::to_value(v2.to_record()).unwrap();
        assert_eq!(json["previousBlock"], "18446744073709551615");
        assert_eq!(json["previousBlockHash"], hex::encode([9u8; 32]));
        assert_eq!(json["blockSignature"], hex::encode(v2.block_signature().unwrap()));
    }

    #[test]
    fn record_round_trip() {
        let block = Block::new(header(2, 3, Some(-1)), vec![tx_with_id(1)], None).unwrap();
        block.sign(GENERATOR).unwrap();
        let json = serde_json::to_string(&block.to_record()).unwrap();
        // the fixed test id is not the derived one, so the parsed transaction
        // gets its real id back; compare the encodings instead
        let mut record: BlockRecord = serde_json::from_str(&json).unwrap();
        record.transactions[0].id = None;
        let parsed = Block::from_record(record).unwrap();
        assert_eq!(parsed.to_bytes(), block.to_bytes());
        assert!(Block::from_json("{}").is_none());
    }
}
