//! Hash and signature primitives.
//!
//! Keys are derived deterministically from a secret phrase: the SHA-256 digest
//! of the phrase is the Ed25519 secret key. Identifiers (block ids, account
//! ids, transaction ids) are the first eight digest bytes read little-endian.

use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signature, SignatureError, Signer, Verifier};
use sha2::{Digest, Sha256};

use crate::constants::{HASH_LEN, PUBLIC_KEY_LEN, SIGNATURE_LEN};

pub type HashBytes = [u8; HASH_LEN];
pub type PublicKeyBytes = [u8; PUBLIC_KEY_LEN];
pub type SignatureBytes = [u8; SIGNATURE_LEN];

/// Returns a fresh streaming SHA-256 hasher.
pub fn sha256() -> Sha256 {
    Sha256::new()
}

/// One-shot SHA-256.
pub fn digest(data: &[u8]) -> HashBytes {
    Sha256::digest(data).into()
}

/// Reads the first eight bytes of a digest as a little-endian `i64`.
pub fn id_from_digest(digest: &HashBytes) -> i64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    i64::from_le_bytes(head)
}

/// Account id bound to a public key.
pub fn account_id(public_key: &PublicKeyBytes) -> i64 {
    id_from_digest(&digest(public_key))
}

fn keypair(secret_phrase: &str) -> Result<Keypair, SignatureError> {
    let secret = SecretKey::from_bytes(&digest(secret_phrase.as_bytes()))?;
    let public = PublicKey::from(&secret);
    Ok(Keypair { secret, public })
}

/// Public key belonging to a secret phrase.
pub fn public_key(secret_phrase: &str) -> Result<PublicKeyBytes, SignatureError> {
    Ok(keypair(secret_phrase)?.public.to_bytes())
}

/// Signs `message` with the key derived from `secret_phrase`.
pub fn sign(message: &[u8], secret_phrase: &str) -> Result<SignatureBytes, SignatureError> {
    Ok(keypair(secret_phrase)?.sign(message).to_bytes())
}

/// Checks `signature` over `message`. Malformed keys or signatures verify as false.
pub fn verify(signature: &[u8], message: &[u8], public_key: &[u8]) -> bool {
    let Ok(public_key) = PublicKey::from_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };
    public_key.verify(message, &signature).is_ok()
}
