use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::codec::{EncodeSink, Reader};
use crate::constants::SIGNATURE_LEN;
use crate::crypto::{self, PublicKeyBytes, SignatureBytes};
use crate::error::DecodeError;

/// Encoded length of every transaction.
pub const TRANSACTION_BYTES_LEN: usize = 1 + 1 + 4 + 2 + 32 + 8 + 4 + 4 + 8 + 64;

/// Suffix marking the account id namespace in rendered recipient ids.
pub const ACCOUNT_ID_SUFFIX: char = 'C';

/// Renders an account id as unsigned decimal with the namespace suffix.
pub fn format_account_id(id: u64) -> String {
    format!("{id}{ACCOUNT_ID_SUFFIX}")
}

/// Parses an account id, with or without the namespace suffix.
pub fn parse_account_id(s: &str) -> Option<u64> {
    s.strip_suffix(ACCOUNT_ID_SUFFIX).unwrap_or(s).parse().ok()
}

/// Signed fields of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionBody {
    pub tx_type: u8,
    pub subtype: u8,
    /// Seconds since the network epoch.
    pub timestamp: i32,
    /// Validity window in seconds, counted from `timestamp`.
    pub deadline: i16,
    pub sender_public_key: PublicKeyBytes,
    pub recipient_id: u64,
    pub amount: i32,
    pub fee: i32,
    pub referenced_transaction_id: Option<u64>,
}

impl TransactionBody {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.put_u8(self.tx_type);
        out.put_u8(self.subtype);
        out.put_i32(self.timestamp);
        out.put_i16(self.deadline);
        out.write(&self.sender_public_key);
        out.write(&self.recipient_id.to_le_bytes());
        out.put_i32(self.amount);
        out.put_i32(self.fee);
        out.write(&self.referenced_transaction_id.unwrap_or(0).to_le_bytes());
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            tx_type: r.read_u8()?,
            subtype: r.read_u8()?,
            timestamp: r.read_i32()?,
            deadline: r.read_i16()?,
            sender_public_key: r.read_array()?,
            recipient_id: u64::from_le_bytes(r.read_array()?),
            amount: r.read_i32()?,
            fee: r.read_i32()?,
            referenced_transaction_id: match u64::from_le_bytes(r.read_array()?) {
                0 => None,
                id => Some(id),
            },
        })
    }

    /// Bytes covered by the signature: the full layout with a zeroed signature slot.
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TRANSACTION_BYTES_LEN);
        self.encode(&mut buf);
        buf.write(&[0u8; SIGNATURE_LEN]);
        buf
    }

    /// Signs the body with the key derived from `secret_phrase`.
    pub fn sign(self, secret_phrase: &str) -> Result<Transaction, ed25519_dalek::SignatureError> {
        let signature = crypto::sign(&self.unsigned_bytes(), secret_phrase)?;
        Ok(Transaction::new(self, signature))
    }
}

/// Block that currently includes a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLink {
    pub block_id: i64,
    pub height: u32,
}

/// A signed transaction.
///
/// The id is derived from the signed bytes and cached on first use; the body
/// and signature cannot change afterwards.
#[derive(Debug)]
pub struct Transaction {
    body: TransactionBody,
    signature: SignatureBytes,
    id: OnceLock<i64>,
    block: RwLock<Option<BlockLink>>,
}

impl Clone for Transaction {
    fn clone(&self) -> Self {
        Self {
            body: self.body.clone(),
            signature: self.signature,
            id: self.id.clone(),
            block: RwLock::new(*self.block.read()),
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.body == other.body && self.signature == other.signature
    }
}

impl Eq for Transaction {}

impl Transaction {
    pub fn new(body: TransactionBody, signature: SignatureBytes) -> Self {
        Self {
            body,
            signature,
            id: OnceLock::new(),
            block: RwLock::new(None),
        }
    }

    pub fn body(&self) -> &TransactionBody {
        &self.body
    }

    pub fn signature(&self) -> &SignatureBytes {
        &self.signature
    }

    pub fn timestamp(&self) -> i32 {
        self.body.timestamp
    }

    pub fn deadline(&self) -> i16 {
        self.body.deadline
    }

    pub fn amount(&self) -> i32 {
        self.body.amount
    }

    pub fn fee(&self) -> i32 {
        self.body.fee
    }

    pub fn sender_public_key(&self) -> &PublicKeyBytes {
        &self.body.sender_public_key
    }

    /// Network time after which the transaction can no longer be admitted.
    pub fn expiration(&self) -> i64 {
        i64::from(self.body.timestamp) + i64::from(self.body.deadline)
    }

    /// Amount plus fee, the unconfirmed balance the sender must hold.
    pub fn required_balance(&self) -> i64 {
        i64::from(self.body.amount) + i64::from(self.body.fee)
    }

    pub fn id(&self) -> i64 {
        *self
            .id
            .get_or_init(|| crypto::id_from_digest(&crypto::digest(&self.to_bytes())))
    }

    pub fn string_id(&self) -> String {
        (self.id() as u64).to_string()
    }

    pub fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.body.encode(out);
        out.write(&self.signature);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TRANSACTION_BYTES_LEN);
        self.encode(&mut buf);
        buf
    }

    /// Reads one transaction from the cursor.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let body = TransactionBody::decode(r)?;
        let signature = r.read_array()?;
        Ok(Self::new(body, signature))
    }

    /// Decodes exactly one transaction.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let tx = Self::decode(&mut r)?;
        r.finish()?;
        Ok(tx)
    }

    /// Checks the sender's signature over the body.
    pub fn verify(&self) -> bool {
        crypto::verify(
            &self.signature,
            &self.body.unsigned_bytes(),
            &self.body.sender_public_key,
        )
    }

    pub fn set_block(&self, link: BlockLink) {
        *self.block.write() = Some(link);
    }

    pub fn clear_block(&self) {
        *self.block.write() = None;
    }

    pub fn block(&self) -> Option<BlockLink> {
        *self.block.read()
    }

    pub fn to_record(&self) -> TransactionRecord {
        TransactionRecord {
            tx_type: self.body.tx_type,
            subtype: self.body.subtype,
            id: Some(self.string_id()),
            timestamp: self.body.timestamp,
            deadline: self.body.deadline,
            sender_public_key: hex::encode(self.body.sender_public_key),
            recipient_id: format_account_id(self.body.recipient_id),
            amount: self.body.amount,
            fee: self.body.fee,
            referenced_transaction: self.body.referenced_transaction_id.map(|id| id.to_string()),
            signature: hex::encode(self.signature),
        }
    }

    /// Builds a transaction from its interchange record; `None` if any field is malformed.
    pub fn from_record(record: TransactionRecord) -> Option<Self> {
        let referenced_transaction_id = match record.referenced_transaction.as_deref() {
            None | Some("") | Some("0") => None,
            Some(s) => Some(s.parse().ok()?),
        };
        let body = TransactionBody {
            tx_type: record.tx_type,
            subtype: record.subtype,
            timestamp: record.timestamp,
            deadline: record.deadline,
            sender_public_key: decode_hex_array(&record.sender_public_key)?,
            recipient_id: parse_account_id(&record.recipient_id)?,
            amount: record.amount,
            fee: record.fee,
            referenced_transaction_id,
        };
        let tx = Self::new(body, decode_hex_array(&record.signature)?);
        match record.id {
            Some(id) if id != tx.string_id() => None,
            _ => Some(tx),
        }
    }

    pub fn from_json(json: &str) -> Option<Self> {
        Self::from_record(serde_json::from_str(json).ok()?)
    }

    #[cfg(test)]
    pub(crate) fn with_id(self, id: i64) -> Self {
        let _ = self.id.set(id);
        self
    }
}

fn decode_hex_array<const N: usize>(s: &str) -> Option<[u8; N]> {
    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out).ok()?;
    Some(out)
}

/// Interchange form of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    #[serde(rename = "type")]
    pub tx_type: u8,
    pub subtype: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub timestamp: i32,
    pub deadline: i16,
    pub sender_public_key: String,
    pub recipient_id: String,
    pub amount: i32,
    pub fee: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_transaction: Option<String>,
    pub signature: String,
}
